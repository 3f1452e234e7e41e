//! Error taxonomy for the calendar sync core.
//! Transient failures are retried internally; everything here is terminal
//! for the operation that returned it and carries a short, user-presentable
//! message.

use thiserror::Error;

/// Errors surfaced by the sync core.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The local payload could not be serialized. Fatal for that send.
    #[error("could not encode calendar payload")]
    Encoding(#[source] serde_json::Error),

    /// Received bytes are not a valid calendar payload.
    #[error("received data is not a valid calendar payload")]
    Decode(#[source] serde_json::Error),

    /// An inbound write was too short or its header was malformed.
    #[error("malformed chunk frame")]
    BadFrame,

    /// The reassembled payload did not match the digest carried in its frames.
    #[error("reassembled payload failed its integrity check")]
    DigestMismatch,

    /// The encoded payload exceeds what the frame header can describe.
    #[error("calendar payload too large to send ({0} bytes)")]
    PayloadTooLarge(usize),

    /// The peer was unreachable or the link refused us.
    #[error("peer is unreachable: {0}")]
    Connection(String),

    /// A chunk write kept failing after backoff.
    #[error("transfer failed: chunk {chunk} rejected after {retries} retries")]
    TransferFailed { chunk: usize, retries: u32 },

    /// A second send was requested while one is active.
    #[error("a transfer is already in progress")]
    TransferInFlight,

    /// The caller aborted the transfer.
    #[error("transfer cancelled")]
    Cancelled,

    /// The master timeout elapsed before the session completed.
    #[error("transfer timed out")]
    TimedOut,

    /// The radio is unavailable, unauthorized or unsupported.
    #[error("discovery unavailable: {0}")]
    Discovery(String),

    /// A calendar entry failed validation on the editing path.
    #[error("invalid calendar entry: {0}")]
    InvalidEntry(String),
}
