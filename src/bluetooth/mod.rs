//! Bluetooth functionality for the calendar sync core.
//! This module handles all bluetooth operations including scanning,
//! connecting, and exchanging calendar chunks with nearby peers.

mod connection;
mod constants;
mod manager;
mod notification;
mod registry;
mod scanner;
mod types;

// Re-export types that should be publicly accessible
pub use connection::{BluestChunkWriter, ConnectionManager};
pub use constants::*; // Re-export all constants
pub use manager::SyncManager;
pub use notification::NotificationHandler;
pub use registry::{is_confident_name, PeerDevice, PeerRegistry, PeerSnapshot};
pub use scanner::{PeerScanner, ScanState};
pub use types::ConnectedPeerState;
