//! Chunked transfer protocol: framing, the paced sender and the reassembly
//! buffer. The radio link imposes a small per-write ceiling and offers no
//! built-in framing, so every write carries its own frame header.

pub mod frame;
pub mod receiver;
pub mod sender;

use serde::Serialize;

pub use frame::{CHUNK_DATA_LEN, FRAME_HEADER_LEN, MAX_WRITE_LEN};
pub use receiver::{ChunkOutcome, ReassemblyBuffer};
pub use sender::{ChunkSink, SinkError, TransferSession, TransferSlot};

/// Terminal result of one outbound transfer session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "kebab-case")]
pub enum TransferOutcome {
    /// Every chunk write was accepted. Optimistic: the protocol has no
    /// acknowledgment of the peer's decode, only of the writes.
    Sent,
    /// The session failed; `reason` is a short user-presentable status.
    Failed { reason: String },
}

/// Observable state of the single outbound transfer slot.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransferStatus {
    /// 0.0 to 1.0 as chunk writes are accepted.
    pub progress: f32,
    /// Set once the session completes; cleared by the auto-reset.
    pub outcome: Option<TransferOutcome>,
}
