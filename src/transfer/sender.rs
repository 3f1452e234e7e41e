//! Outbound transfer: one paced, retried session per send.
//!
//! The link accepts small writes with no flow control feedback, so chunk
//! writes are spaced out on a timer schedule. A transient (queue-full class)
//! rejection retries the same chunk with exponential backoff; a master
//! timeout bounds the whole session so callers never hang on a lost
//! completion.

use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{info, warn};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::calendar::codec;
use crate::calendar::payload::CalendarPayload;
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::events::{CoreEvent, EventSink};
use crate::transfer::frame;
use crate::transfer::{TransferOutcome, TransferStatus};

/// Failure from a chunk write. Transient failures are retried by the
/// session; terminal ones end it.
#[derive(Debug, Clone)]
pub struct SinkError {
    pub transient: bool,
    pub message: String,
}

impl SinkError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            transient: true,
            message: message.into(),
        }
    }

    pub fn terminal(message: impl Into<String>) -> Self {
        Self {
            transient: false,
            message: message.into(),
        }
    }
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for SinkError {}

/// Write seam toward the connected peer. The production implementation
/// writes the calendar characteristic; tests substitute their own.
#[async_trait]
pub trait ChunkSink: Send + Sync {
    async fn write_chunk(&self, frame: &[u8]) -> Result<(), SinkError>;
}

/// The single outbound transfer slot. Guards the one-session-in-flight rule
/// and owns the observable status.
pub struct TransferSlot {
    status: Mutex<TransferStatus>,
    cancel: Mutex<CancellationToken>,
    active: AtomicBool,
    generation: AtomicU64,
}

impl TransferSlot {
    pub fn new() -> Self {
        Self {
            status: Mutex::new(TransferStatus::default()),
            cancel: Mutex::new(CancellationToken::new()),
            active: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        }
    }

    /// Current observable status snapshot.
    pub fn status(&self) -> TransferStatus {
        self.status.lock().unwrap().clone()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Claims the slot for a new session. A second send while one is active
    /// is rejected, never interleaved.
    pub fn try_begin(&self, cancel: CancellationToken) -> Result<u64, SyncError> {
        if self.active.swap(true, Ordering::SeqCst) {
            return Err(SyncError::TransferInFlight);
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.status.lock().unwrap() = TransferStatus::default();
        *self.cancel.lock().unwrap() = cancel;
        Ok(generation)
    }

    fn set_progress(&self, progress: f32) {
        self.status.lock().unwrap().progress = progress;
    }

    fn finish(&self, outcome: TransferOutcome) {
        self.status.lock().unwrap().outcome = Some(outcome);
        self.active.store(false, Ordering::SeqCst);
    }

    /// Aborts the active session's pending scheduled writes, if any.
    pub fn cancel_active(&self) {
        if self.is_active() {
            self.cancel.lock().unwrap().cancel();
        }
    }

    /// Clears progress and outcome after `delay`, unless a newer session has
    /// claimed the slot in the meantime.
    pub fn schedule_reset(
        self: &Arc<Self>,
        generation: u64,
        delay: Duration,
        events: Arc<dyn EventSink>,
    ) {
        let slot = Arc::clone(self);
        tokio::spawn(async move {
            sleep(delay).await;
            if slot.generation.load(Ordering::SeqCst) == generation && !slot.is_active() {
                *slot.status.lock().unwrap() = TransferStatus::default();
                events.emit(CoreEvent::TransferReset);
            }
        });
    }
}

impl Default for TransferSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// One outbound send: the encoded payload split into paced frames.
pub struct TransferSession {
    session_id: u32,
    frames: Vec<Vec<u8>>,
    chunk_index: usize,
    retry_count: u32,
    config: SyncConfig,
    cancel: CancellationToken,
}

impl TransferSession {
    /// Encodes `payload` and prepares its frames. Fails fast when the
    /// payload cannot be serialized or does not fit the frame header.
    pub fn new(payload: &CalendarPayload, config: &SyncConfig) -> Result<Self, SyncError> {
        let bytes = codec::encode(payload)?;
        let session_id = Uuid::new_v4().as_u128() as u32;
        let frames = frame::build_frames(session_id, &bytes)?;
        info!(
            "Transfer session {:08x}: {} bytes in {} chunks",
            session_id,
            bytes.len(),
            frames.len()
        );
        Ok(Self {
            session_id,
            frames,
            chunk_index: 0,
            retry_count: 0,
            config: config.clone(),
            cancel: CancellationToken::new(),
        })
    }

    pub fn chunk_count(&self) -> usize {
        self.frames.len()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Upper bound for the whole session: the full write schedule plus the
    /// settle delay plus a margin for backoff.
    fn master_timeout(&self) -> Duration {
        Duration::from_millis(
            self.config.base_delay_ms
                + self.frames.len() as u64 * self.config.inter_chunk_delay_ms
                + self.config.settle_delay_ms
                + self.config.master_timeout_margin_ms,
        )
    }

    /// Runs the session to its outcome. Publishes progress along the way and
    /// records the outcome in `slot` before returning it.
    pub async fn run(
        mut self,
        sink: &dyn ChunkSink,
        slot: &TransferSlot,
        events: &dyn EventSink,
    ) -> TransferOutcome {
        let cancel = self.cancel.clone();
        let master_timeout = self.master_timeout();

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(SyncError::Cancelled),
            timed = tokio::time::timeout(master_timeout, self.send_all(sink, slot, events)) => {
                match timed {
                    Ok(inner) => inner,
                    Err(_) => Err(SyncError::TimedOut),
                }
            }
        };

        let outcome = match result {
            Ok(()) => TransferOutcome::Sent,
            Err(e) => TransferOutcome::Failed {
                reason: e.to_string(),
            },
        };
        match &outcome {
            TransferOutcome::Sent => info!("Transfer session complete"),
            TransferOutcome::Failed { reason } => warn!("Transfer session failed: {}", reason),
        }

        slot.finish(outcome.clone());
        events.emit(CoreEvent::TransferFinished {
            outcome: outcome.clone(),
        });
        outcome
    }

    async fn send_all(
        &mut self,
        sink: &dyn ChunkSink,
        slot: &TransferSlot,
        events: &dyn EventSink,
    ) -> Result<(), SyncError> {
        let total = self.frames.len();
        sleep(Duration::from_millis(self.config.base_delay_ms)).await;

        for index in 0..total {
            if index > 0 {
                sleep(Duration::from_millis(self.config.inter_chunk_delay_ms)).await;
            }
            self.write_with_retry(sink, index).await?;
            self.chunk_index = index + 1;

            let progress = self.chunk_index as f32 / total as f32;
            slot.set_progress(progress);
            events.emit(CoreEvent::TransferProgress { progress });
        }

        // Let the peer's last notification cycle finish before declaring
        // the session sent.
        sleep(Duration::from_millis(self.config.settle_delay_ms)).await;
        info!(
            "Session {:08x}: all {} chunks written ({} retries)",
            self.session_id, total, self.retry_count
        );
        Ok(())
    }

    async fn write_with_retry(
        &mut self,
        sink: &dyn ChunkSink,
        index: usize,
    ) -> Result<(), SyncError> {
        let mut attempt: u32 = 0;
        loop {
            match sink.write_chunk(&self.frames[index]).await {
                Ok(()) => return Ok(()),
                Err(e) if e.transient => {
                    if attempt >= self.config.max_write_retries {
                        return Err(SyncError::TransferFailed {
                            chunk: index,
                            retries: attempt,
                        });
                    }
                    let backoff = self.config.retry_backoff_ms << attempt;
                    warn!(
                        "Chunk {} of session {:08x} rejected ({}), retry in {} ms",
                        index, self.session_id, e.message, backoff
                    );
                    sleep(Duration::from_millis(backoff)).await;
                    attempt += 1;
                    self.retry_count += 1;
                }
                Err(e) => return Err(SyncError::Connection(e.message)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    struct MockSink {
        written: Mutex<Vec<Vec<u8>>>,
        failures: Mutex<VecDeque<SinkError>>,
        calls: AtomicUsize,
        hang: bool,
    }

    impl MockSink {
        fn new() -> Self {
            Self {
                written: Mutex::new(Vec::new()),
                failures: Mutex::new(VecDeque::new()),
                calls: AtomicUsize::new(0),
                hang: false,
            }
        }

        fn failing_with(failures: Vec<SinkError>) -> Self {
            let sink = Self::new();
            *sink.failures.lock().unwrap() = failures.into();
            sink
        }

        fn hanging() -> Self {
            let mut sink = Self::new();
            sink.hang = true;
            sink
        }
    }

    #[async_trait]
    impl ChunkSink for MockSink {
        async fn write_chunk(&self, frame: &[u8]) -> Result<(), SinkError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                futures_util::future::pending::<()>().await;
            }
            if let Some(err) = self.failures.lock().unwrap().pop_front() {
                return Err(err);
            }
            self.written.lock().unwrap().push(frame.to_vec());
            Ok(())
        }
    }

    struct NullSink;
    impl EventSink for NullSink {
        fn emit(&self, _event: CoreEvent) {}
    }

    fn fast_config() -> SyncConfig {
        SyncConfig {
            base_delay_ms: 1,
            inter_chunk_delay_ms: 1,
            retry_backoff_ms: 1,
            settle_delay_ms: 1,
            master_timeout_margin_ms: 200,
            ..SyncConfig::default()
        }
    }

    fn sample_payload() -> CalendarPayload {
        use crate::calendar::entry::CalendarEntry;
        CalendarPayload {
            sender: "A".to_string(),
            timestamp: 1000,
            entries: vec![
                CalendarEntry::from_wire("X".into(), "L1".into(), 1, 1),
                CalendarEntry::from_wire("Y".into(), "L2".into(), 6, 15),
            ],
        }
    }

    #[tokio::test]
    async fn sends_every_chunk_in_order() {
        let config = fast_config();
        let session = TransferSession::new(&sample_payload(), &config).unwrap();
        let expected = session.chunk_count();
        assert!(expected >= 2);

        let sink = MockSink::new();
        let slot = TransferSlot::new();
        slot.try_begin(session.cancellation_token()).unwrap();

        let outcome = session.run(&sink, &slot, &NullSink).await;
        assert_eq!(outcome, TransferOutcome::Sent);

        let written = sink.written.lock().unwrap();
        assert_eq!(written.len(), expected);
        for (i, frame_bytes) in written.iter().enumerate() {
            let (header, _) = frame::parse_frame(frame_bytes).unwrap();
            assert_eq!(header.index as usize, i);
        }

        let status = slot.status();
        assert_eq!(status.progress, 1.0);
        assert_eq!(status.outcome, Some(TransferOutcome::Sent));
        assert!(!slot.is_active());
    }

    #[tokio::test]
    async fn transient_failure_retries_the_same_chunk() {
        let config = fast_config();
        let session = TransferSession::new(&sample_payload(), &config).unwrap();
        let expected = session.chunk_count();

        let sink = MockSink::failing_with(vec![
            SinkError::transient("queue full"),
            SinkError::transient("queue full"),
        ]);
        let slot = TransferSlot::new();
        slot.try_begin(session.cancellation_token()).unwrap();

        let outcome = session.run(&sink, &slot, &NullSink).await;
        assert_eq!(outcome, TransferOutcome::Sent);

        // Two rejections then every chunk accepted once.
        assert_eq!(sink.calls.load(Ordering::SeqCst), expected + 2);
        let written = sink.written.lock().unwrap();
        let (first_header, _) = frame::parse_frame(&written[0]).unwrap();
        assert_eq!(first_header.index, 0);
    }

    #[tokio::test]
    async fn exhausted_retries_fail_the_session() {
        let config = fast_config();
        let session = TransferSession::new(&sample_payload(), &config).unwrap();
        let retries = config.max_write_retries;

        let failures = (0..=retries)
            .map(|_| SinkError::transient("queue full"))
            .collect();
        let sink = MockSink::failing_with(failures);
        let slot = TransferSlot::new();
        slot.try_begin(session.cancellation_token()).unwrap();

        let outcome = session.run(&sink, &slot, &NullSink).await;
        match outcome {
            TransferOutcome::Failed { reason } => assert!(reason.contains("chunk 0")),
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(sink.written.lock().unwrap().is_empty());
        assert!(!slot.is_active());
    }

    #[tokio::test]
    async fn terminal_sink_error_fails_without_retry() {
        let config = fast_config();
        let session = TransferSession::new(&sample_payload(), &config).unwrap();

        let sink = MockSink::failing_with(vec![SinkError::terminal("link dropped")]);
        let slot = TransferSlot::new();
        slot.try_begin(session.cancellation_token()).unwrap();

        let outcome = session.run(&sink, &slot, &NullSink).await;
        assert_eq!(
            outcome,
            TransferOutcome::Failed {
                reason: "peer is unreachable: link dropped".to_string()
            }
        );
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn master_timeout_bounds_a_hung_write() {
        let config = SyncConfig {
            master_timeout_margin_ms: 50,
            ..fast_config()
        };
        let session = TransferSession::new(&sample_payload(), &config).unwrap();

        let sink = MockSink::hanging();
        let slot = TransferSlot::new();
        slot.try_begin(session.cancellation_token()).unwrap();

        let outcome = session.run(&sink, &slot, &NullSink).await;
        assert_eq!(
            outcome,
            TransferOutcome::Failed {
                reason: "transfer timed out".to_string()
            }
        );
        assert!(!slot.is_active());
    }

    #[tokio::test]
    async fn cancellation_aborts_pending_writes() {
        let config = SyncConfig {
            base_delay_ms: 50,
            ..fast_config()
        };
        let session = TransferSession::new(&sample_payload(), &config).unwrap();
        let cancel = session.cancellation_token();

        let sink = MockSink::new();
        let slot = TransferSlot::new();
        slot.try_begin(cancel.clone()).unwrap();

        cancel.cancel();
        let outcome = session.run(&sink, &slot, &NullSink).await;
        assert_eq!(
            outcome,
            TransferOutcome::Failed {
                reason: "transfer cancelled".to_string()
            }
        );
        assert!(sink.written.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn second_session_is_rejected_while_one_is_active() {
        let slot = TransferSlot::new();
        slot.try_begin(CancellationToken::new()).unwrap();
        assert!(matches!(
            slot.try_begin(CancellationToken::new()),
            Err(SyncError::TransferInFlight)
        ));
    }

    #[tokio::test]
    async fn slot_resets_after_the_hold_delay() {
        let slot = Arc::new(TransferSlot::new());
        let generation = slot.try_begin(CancellationToken::new()).unwrap();
        slot.set_progress(1.0);
        slot.finish(TransferOutcome::Sent);

        slot.schedule_reset(generation, Duration::from_millis(10), Arc::new(NullSink));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let status = slot.status();
        assert_eq!(status.progress, 0.0);
        assert!(status.outcome.is_none());
    }
}
