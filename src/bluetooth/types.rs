//! Defines shared data structures for the Bluetooth module.

use bluest::{Characteristic, Device};

/// Represents the state of a successfully connected peer.
/// This struct holds the active handles needed for interaction.
#[derive(Clone)]
pub struct ConnectedPeerState {
    /// The device handle, used for things like checking connection status or disconnecting.
    pub device: Device,
    /// The characteristic carrying calendar chunk frames in both directions.
    pub sync_characteristic: Characteristic,
}
