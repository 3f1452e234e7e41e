//! Inbound reassembly. Chunks arrive as characteristic notifications with
//! no ordering help from the link beyond per-connection FIFO; the frame
//! header tells us which session and slot each write belongs to.

use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::calendar::codec;
use crate::calendar::payload::CalendarPayload;
use crate::error::SyncError;
use crate::transfer::frame::{self, FrameHeader};

/// A session whose chunks stop arriving for this long is discarded; the
/// next chunk starts a fresh session.
pub const STALE_CHUNK_GAP: Duration = Duration::from_secs(15);

/// Result of feeding one inbound write to the buffer.
#[derive(Debug)]
pub enum ChunkOutcome {
    /// The chunk joined (or started) a session that is not yet complete.
    Buffered { received: usize, total: usize },
    /// The chunk was already present; nothing changed.
    Duplicate,
    /// The session completed and decoded. Returned exactly once per session.
    Completed(CalendarPayload),
}

struct InboundSession {
    session: u32,
    total: u16,
    payload_len: u16,
    digest: [u8; 4],
    parts: Vec<Option<Vec<u8>>>,
    received: usize,
    last_chunk_at: Instant,
}

impl InboundSession {
    fn start(header: &FrameHeader, now: Instant) -> Self {
        Self {
            session: header.session,
            total: header.total,
            payload_len: header.payload_len,
            digest: header.digest,
            parts: vec![None; header.total as usize],
            received: 0,
            last_chunk_at: now,
        }
    }

    fn matches(&self, header: &FrameHeader) -> bool {
        self.session == header.session
            && self.total == header.total
            && self.payload_len == header.payload_len
            && self.digest == header.digest
    }
}

/// Accumulates inbound chunk frames until a payload can be decoded.
pub struct ReassemblyBuffer {
    current: Option<InboundSession>,
}

impl ReassemblyBuffer {
    pub fn new() -> Self {
        Self { current: None }
    }

    /// Chunks buffered for the active session, if any.
    pub fn chunk_count(&self) -> usize {
        self.current.as_ref().map(|s| s.received).unwrap_or(0)
    }

    pub fn clear(&mut self) {
        self.current = None;
    }

    /// Feeds one inbound write. `now` is injected so staleness is testable.
    pub fn on_chunk(&mut self, bytes: &[u8], now: Instant) -> Result<ChunkOutcome, SyncError> {
        let (header, data) = frame::parse_frame(bytes)?;
        if header.total == 0 || header.index >= header.total {
            return Err(SyncError::BadFrame);
        }

        if let Some(session) = &self.current {
            if now.duration_since(session.last_chunk_at) > STALE_CHUNK_GAP {
                warn!(
                    "Discarding stale partial transfer {:08x} ({}/{} chunks)",
                    session.session, session.received, session.total
                );
                self.current = None;
            } else if !session.matches(&header) {
                warn!(
                    "Session {:08x} superseded by {:08x}, discarding partial transfer",
                    session.session, header.session
                );
                self.current = None;
            }
        }

        let session = self
            .current
            .get_or_insert_with(|| InboundSession::start(&header, now));

        let slot = &mut session.parts[header.index as usize];
        if slot.is_some() {
            debug!(
                "Duplicate chunk {} for session {:08x}",
                header.index, header.session
            );
            return Ok(ChunkOutcome::Duplicate);
        }
        *slot = Some(data.to_vec());
        session.received += 1;
        session.last_chunk_at = now;

        if session.received < session.total as usize {
            return Ok(ChunkOutcome::Buffered {
                received: session.received,
                total: session.total as usize,
            });
        }

        // All parts present: reassemble, verify, decode, reset. A missing
        // part cannot survive the length and digest checks below.
        let Some(session) = self.current.take() else {
            return Err(SyncError::BadFrame);
        };
        let mut assembled = Vec::with_capacity(session.payload_len as usize);
        for part in session.parts.iter().flatten() {
            assembled.extend_from_slice(part);
        }

        if assembled.len() != session.payload_len as usize
            || frame::payload_digest(&assembled) != session.digest
        {
            warn!(
                "Reassembled session {:08x} failed verification, discarding",
                session.session
            );
            return Err(SyncError::DigestMismatch);
        }

        let payload = codec::decode(&assembled)?;
        info!(
            "Decoded calendar payload from {:?} with {} entries",
            payload.sender,
            payload.entries.len()
        );
        Ok(ChunkOutcome::Completed(payload))
    }
}

impl Default for ReassemblyBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::entry::CalendarEntry;

    fn sample_frames() -> (CalendarPayload, Vec<Vec<u8>>) {
        let payload = CalendarPayload {
            sender: "A".to_string(),
            timestamp: 1000,
            entries: vec![
                CalendarEntry::from_wire("X".into(), "L1".into(), 1, 1),
                CalendarEntry::from_wire("Y".into(), "L2".into(), 6, 15),
            ],
        };
        let bytes = codec::encode(&payload).unwrap();
        let frames = frame::build_frames(42, &bytes).unwrap();
        (payload, frames)
    }

    #[test]
    fn in_order_chunks_decode_exactly_once() {
        let (_, frames) = sample_frames();
        let mut buffer = ReassemblyBuffer::new();
        let now = Instant::now();

        let last = frames.len() - 1;
        for (i, chunk) in frames.iter().enumerate() {
            let at = now + Duration::from_secs(i as u64);
            match buffer.on_chunk(chunk, at).unwrap() {
                ChunkOutcome::Buffered { received, total } => {
                    assert!(i < last);
                    assert_eq!(received, i + 1);
                    assert_eq!(total, frames.len());
                }
                ChunkOutcome::Completed(payload) => {
                    assert_eq!(i, last);
                    assert_eq!(payload.sender, "A");
                    assert_eq!(payload.timestamp, 1000);
                    let months: Vec<u8> = payload.entries.iter().map(|e| e.month).collect();
                    assert_eq!(months, vec![1, 6]);
                }
                ChunkOutcome::Duplicate => panic!("unexpected duplicate"),
            }
        }
        assert_eq!(buffer.chunk_count(), 0);
    }

    #[test]
    fn stale_gap_discards_the_partial_transfer() {
        let (_, frames) = sample_frames();
        assert!(frames.len() >= 2);
        let mut buffer = ReassemblyBuffer::new();
        let now = Instant::now();

        buffer.on_chunk(&frames[0], now).unwrap();
        assert_eq!(buffer.chunk_count(), 1);

        // 20 s exceeds the 15 s window: chunk 1 starts a brand-new session.
        let later = now + Duration::from_secs(20);
        match buffer.on_chunk(&frames[1], later).unwrap() {
            ChunkOutcome::Buffered { received, .. } => assert_eq!(received, 1),
            other => panic!("expected buffered, got {:?}", other),
        }
        assert_eq!(buffer.chunk_count(), 1);
    }

    #[test]
    fn gap_under_the_window_continues_the_session() {
        let (_, frames) = sample_frames();
        let mut buffer = ReassemblyBuffer::new();
        let mut at = Instant::now();

        for (i, chunk) in frames.iter().enumerate() {
            at += Duration::from_secs(14);
            let outcome = buffer.on_chunk(chunk, at).unwrap();
            if i == frames.len() - 1 {
                assert!(matches!(outcome, ChunkOutcome::Completed(_)));
            }
        }
    }

    #[test]
    fn duplicate_chunk_is_ignored() {
        let (_, frames) = sample_frames();
        let mut buffer = ReassemblyBuffer::new();
        let now = Instant::now();

        buffer.on_chunk(&frames[0], now).unwrap();
        assert!(matches!(
            buffer.on_chunk(&frames[0], now).unwrap(),
            ChunkOutcome::Duplicate
        ));
        assert_eq!(buffer.chunk_count(), 1);
    }

    #[test]
    fn newer_session_supersedes_the_buffered_one() {
        let (_, frames) = sample_frames();
        let bytes = codec::encode(&CalendarPayload {
            sender: "B".to_string(),
            timestamp: 2000,
            entries: Vec::new(),
        })
        .unwrap();
        let newer = frame::build_frames(77, &bytes).unwrap();

        let mut buffer = ReassemblyBuffer::new();
        let now = Instant::now();
        buffer.on_chunk(&frames[0], now).unwrap();

        // First frame of a different session replaces the partial one.
        match buffer.on_chunk(&newer[0], now).unwrap() {
            ChunkOutcome::Buffered { received, total } => {
                assert_eq!(received, 1);
                assert_eq!(total, newer.len());
            }
            ChunkOutcome::Completed(payload) => assert_eq!(payload.sender, "B"),
            other => panic!("expected new session, got {:?}", other),
        }

        // The rest of the new session completes with the new sender.
        let mut completed = None;
        for chunk in &newer[1..] {
            if let ChunkOutcome::Completed(payload) = buffer.on_chunk(chunk, now).unwrap() {
                completed = Some(payload);
            }
        }
        if newer.len() > 1 {
            assert_eq!(completed.expect("session completes").sender, "B");
        }
        assert_eq!(buffer.chunk_count(), 0);
    }

    #[test]
    fn corrupted_chunk_fails_verification_and_clears() {
        let (_, mut frames) = sample_frames();
        let last = frames.len() - 1;
        let tail = frames[last].len() - 1;
        frames[last][tail] ^= 0xff;

        let mut buffer = ReassemblyBuffer::new();
        let now = Instant::now();
        for (i, chunk) in frames.iter().enumerate() {
            let result = buffer.on_chunk(chunk, now);
            if i < last {
                assert!(result.is_ok());
            } else {
                assert!(matches!(result, Err(SyncError::DigestMismatch)));
            }
        }
        assert_eq!(buffer.chunk_count(), 0);
    }

    #[test]
    fn malformed_frame_leaves_state_untouched() {
        let (_, frames) = sample_frames();
        let mut buffer = ReassemblyBuffer::new();
        let now = Instant::now();

        buffer.on_chunk(&frames[0], now).unwrap();
        assert!(matches!(
            buffer.on_chunk(&[1, 2, 3], now),
            Err(SyncError::BadFrame)
        ));
        assert_eq!(buffer.chunk_count(), 1);
    }
}
