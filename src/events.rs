//! Published core events and the injectable event sink.
//! Observers (UI, CLI, tests) receive read-only snapshots through a sink;
//! the core never depends on what a sink does with them.

use log::{debug, warn};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::bluetooth::PeerSnapshot;
use crate::calendar::payload::CalendarPayload;
use crate::transfer::TransferOutcome;

/// Events published by the sync core.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum CoreEvent {
    /// A discovery session started.
    ScanStarted,
    /// A discovery session stopped; the published peer list is final.
    ScanStopped,
    /// The published peer collection changed; sent as one atomic snapshot.
    PeersUpdated { peers: Vec<PeerSnapshot> },
    /// Persistent radio status (unavailable / unauthorized). Cleared by a
    /// later successful scan start.
    DiscoveryStatus { message: String },
    /// A peer connection was established.
    PeerConnected { id: String },
    /// A peer connection was torn down.
    PeerDisconnected { id: String },
    /// Outbound transfer progress, 0.0 to 1.0.
    TransferProgress { progress: f32 },
    /// Outbound transfer finished with the given outcome.
    TransferFinished { outcome: TransferOutcome },
    /// Transfer progress and outcome were reset to idle.
    TransferReset,
    /// A complete calendar payload arrived and replaced the local entries.
    CalendarReceived { payload: CalendarPayload },
}

/// Observer seam for everything externally visible.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: CoreEvent);
}

/// Fans events out over a tokio broadcast channel.
pub struct BroadcastSink {
    tx: broadcast::Sender<CoreEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.tx.subscribe()
    }
}

impl EventSink for BroadcastSink {
    fn emit(&self, event: CoreEvent) {
        // A send only fails when nobody is subscribed; that is fine.
        if self.tx.send(event).is_err() {
            debug!("Core event dropped: no subscribers");
        }
    }
}

/// Sink that logs events instead of delivering them anywhere.
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: CoreEvent) {
        match serde_json::to_string(&event) {
            Ok(json) => debug!("Core event: {}", json),
            Err(e) => warn!("Failed to serialize core event: {}", e),
        }
    }
}
