//! Inbound chunk handling: subscribes to the peer's sync characteristic and
//! feeds every notification into the reassembly buffer. A completed payload
//! replaces the local calendar and is published to observers.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::Result;
use bluest::Characteristic;
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::calendar::store::EntryStore;
use crate::error::SyncError;
use crate::events::{CoreEvent, EventSink};
use crate::transfer::receiver::{ChunkOutcome, ReassemblyBuffer};

/// Notification handler for inbound calendar chunks.
#[derive(Clone)]
pub struct NotificationHandler {
    buffer: Arc<Mutex<ReassemblyBuffer>>,
    store: Arc<dyn EntryStore>,
    events: Arc<dyn EventSink>,
    cancel_token: Arc<Mutex<CancellationToken>>,
}

impl NotificationHandler {
    pub fn new(store: Arc<dyn EntryStore>, events: Arc<dyn EventSink>) -> Self {
        Self {
            buffer: Arc::new(Mutex::new(ReassemblyBuffer::new())),
            store,
            events,
            cancel_token: Arc::new(Mutex::new(CancellationToken::new())),
        }
    }

    /// Subscribes to the sync characteristic and processes chunks until the
    /// stream ends or notifications are stopped.
    pub async fn setup_notifications(&self, sync_char: Characteristic) -> Result<()> {
        info!("Subscribing to calendar notifications...");

        let cancel_token = {
            let mut guard = self.cancel_token.lock().unwrap();
            guard.cancel();
            *guard = CancellationToken::new();
            (*guard).clone()
        };
        self.buffer.lock().unwrap().clear();

        let buffer = self.buffer.clone();
        let store = self.store.clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            Self::process_notifications(sync_char, buffer, store, events, cancel_token).await;
        });

        Ok(())
    }

    /// Stops the notification task and drops any partial transfer.
    pub async fn stop_notifications(&self) -> Result<()> {
        self.cancel_token.lock().unwrap().cancel();
        self.buffer.lock().unwrap().clear();
        Ok(())
    }

    async fn process_notifications(
        sync_char: Characteristic,
        buffer: Arc<Mutex<ReassemblyBuffer>>,
        store: Arc<dyn EntryStore>,
        events: Arc<dyn EventSink>,
        cancel_token: CancellationToken,
    ) {
        info!("Listening for calendar chunks...");

        let mut notification_stream = match sync_char.notify().await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to subscribe to notifications: {}", e);
                return;
            }
        };

        loop {
            tokio::select! {
                result = notification_stream.next() => {
                    match result {
                        Some(Ok(value)) => {
                            Self::handle_chunk(&value, &buffer, &store, &events).await;
                        }
                        Some(Err(e)) => {
                            error!("Error in notification stream: {}", e);
                            break;
                        }
                        None => break,
                    }
                }
                _ = cancel_token.cancelled() => break,
            }
        }

        info!("Notification stream ended");
    }

    async fn handle_chunk(
        value: &[u8],
        buffer: &Arc<Mutex<ReassemblyBuffer>>,
        store: &Arc<dyn EntryStore>,
        events: &Arc<dyn EventSink>,
    ) {
        debug!("Received chunk of {} bytes", value.len());

        // Feed under the lock, persist after releasing it.
        let outcome = {
            let mut buffer = buffer.lock().unwrap();
            buffer.on_chunk(value, Instant::now())
        };

        match outcome {
            Ok(ChunkOutcome::Buffered { received, total }) => {
                debug!("Buffered chunk {}/{}", received, total);
            }
            Ok(ChunkOutcome::Duplicate) => {
                debug!("Ignored duplicate chunk");
            }
            Ok(ChunkOutcome::Completed(payload)) => {
                info!(
                    "Calendar received from {:?}: {} entries",
                    payload.sender,
                    payload.entries.len()
                );
                if let Err(e) = store.save_entries(&payload.entries).await {
                    error!("Failed to persist received calendar: {}", e);
                }
                events.emit(CoreEvent::CalendarReceived { payload });
            }
            // An incomplete or garbled stream recovers locally: wait for
            // more chunks or the stale-session reset.
            Err(SyncError::BadFrame) => warn!("Dropped malformed chunk"),
            Err(e) => warn!("Chunk processing failed: {}", e),
        }
    }
}
