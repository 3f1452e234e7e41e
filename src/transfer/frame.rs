//! Per-write chunk frames.
//!
//! Wire layout, big-endian:
//!
//! ```text
//! session: u32 | index: u16 | total: u16 | payload_len: u16 | digest: [u8; 4]
//! ```
//!
//! followed by up to [`CHUNK_DATA_LEN`] payload bytes. `digest` is the
//! truncated SHA-256 of the complete encoded payload and is repeated in
//! every frame so the receiver can verify reassembly regardless of which
//! frame arrived first.

use sha2::{Digest, Sha256};

use crate::error::SyncError;

/// Per-write size ceiling of the link.
pub const MAX_WRITE_LEN: usize = 60;

/// Bytes of header in every write.
pub const FRAME_HEADER_LEN: usize = 14;

/// Payload bytes carried per write.
pub const CHUNK_DATA_LEN: usize = MAX_WRITE_LEN - FRAME_HEADER_LEN;

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub session: u32,
    pub index: u16,
    pub total: u16,
    pub payload_len: u16,
    pub digest: [u8; 4],
}

impl FrameHeader {
    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.session.to_be_bytes());
        out.extend_from_slice(&self.index.to_be_bytes());
        out.extend_from_slice(&self.total.to_be_bytes());
        out.extend_from_slice(&self.payload_len.to_be_bytes());
        out.extend_from_slice(&self.digest);
    }

    fn decode(bytes: &[u8]) -> Result<Self, SyncError> {
        if bytes.len() < FRAME_HEADER_LEN {
            return Err(SyncError::BadFrame);
        }
        let mut digest = [0u8; 4];
        digest.copy_from_slice(&bytes[10..14]);
        Ok(Self {
            session: u32::from_be_bytes(bytes[0..4].try_into().unwrap()),
            index: u16::from_be_bytes(bytes[4..6].try_into().unwrap()),
            total: u16::from_be_bytes(bytes[6..8].try_into().unwrap()),
            payload_len: u16::from_be_bytes(bytes[8..10].try_into().unwrap()),
            digest,
        })
    }
}

/// Truncated SHA-256 over the complete encoded payload.
pub fn payload_digest(payload: &[u8]) -> [u8; 4] {
    let hash = Sha256::digest(payload);
    let mut out = [0u8; 4];
    out.copy_from_slice(&hash[..4]);
    out
}

/// Splits an encoded payload into ready-to-write frames, in index order.
/// An empty payload still produces one frame so the session metadata travels.
pub fn build_frames(session: u32, payload: &[u8]) -> Result<Vec<Vec<u8>>, SyncError> {
    let payload_len =
        u16::try_from(payload.len()).map_err(|_| SyncError::PayloadTooLarge(payload.len()))?;
    let total = payload.len().div_ceil(CHUNK_DATA_LEN).max(1);
    let total = u16::try_from(total).map_err(|_| SyncError::PayloadTooLarge(payload.len()))?;
    let digest = payload_digest(payload);

    let mut frames = Vec::with_capacity(total as usize);
    for index in 0..total {
        let start = index as usize * CHUNK_DATA_LEN;
        let end = (start + CHUNK_DATA_LEN).min(payload.len());
        let data = &payload[start.min(payload.len())..end];

        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + data.len());
        FrameHeader {
            session,
            index,
            total,
            payload_len,
            digest,
        }
        .encode_into(&mut frame);
        frame.extend_from_slice(data);
        frames.push(frame);
    }
    Ok(frames)
}

/// Parses one inbound write into its header and data slice.
pub fn parse_frame(bytes: &[u8]) -> Result<(FrameHeader, &[u8]), SyncError> {
    let header = FrameHeader::decode(bytes)?;
    Ok((header, &bytes[FRAME_HEADER_LEN..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let header = FrameHeader {
            session: 0xdead_beef,
            index: 3,
            total: 9,
            payload_len: 400,
            digest: [1, 2, 3, 4],
        };
        let mut bytes = Vec::new();
        header.encode_into(&mut bytes);
        assert_eq!(bytes.len(), FRAME_HEADER_LEN);
        assert_eq!(FrameHeader::decode(&bytes).unwrap(), header);
    }

    #[test]
    fn split_produces_ceil_n_over_c_frames() {
        let payload = vec![7u8; CHUNK_DATA_LEN * 2 + 1];
        let frames = build_frames(1, &payload).unwrap();
        assert_eq!(frames.len(), 3);

        for (i, frame) in frames.iter().enumerate() {
            assert!(frame.len() <= MAX_WRITE_LEN);
            let (header, _) = parse_frame(frame).unwrap();
            assert_eq!(header.index as usize, i);
            assert_eq!(header.total, 3);
            assert_eq!(header.payload_len as usize, payload.len());
        }
        assert_eq!(parse_frame(&frames[2]).unwrap().1.len(), 1);
    }

    #[test]
    fn exact_multiple_has_no_empty_tail() {
        let payload = vec![0u8; CHUNK_DATA_LEN * 4];
        let frames = build_frames(1, &payload).unwrap();
        assert_eq!(frames.len(), 4);
        assert_eq!(parse_frame(&frames[3]).unwrap().1.len(), CHUNK_DATA_LEN);
    }

    #[test]
    fn empty_payload_still_travels() {
        let frames = build_frames(5, &[]).unwrap();
        assert_eq!(frames.len(), 1);
        let (header, data) = parse_frame(&frames[0]).unwrap();
        assert_eq!(header.total, 1);
        assert_eq!(header.payload_len, 0);
        assert!(data.is_empty());
    }

    #[test]
    fn reassembled_data_matches_digest() {
        let payload: Vec<u8> = (0..200u16).map(|i| i as u8).collect();
        let frames = build_frames(2, &payload).unwrap();

        let mut assembled = Vec::new();
        for frame in &frames {
            assembled.extend_from_slice(parse_frame(frame).unwrap().1);
        }
        assert_eq!(assembled, payload);
        assert_eq!(
            parse_frame(&frames[0]).unwrap().0.digest,
            payload_digest(&assembled)
        );
    }

    #[test]
    fn short_write_is_a_bad_frame() {
        assert!(matches!(parse_frame(&[0u8; 5]), Err(SyncError::BadFrame)));
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let payload = vec![0u8; usize::from(u16::MAX) + 1];
        assert!(matches!(
            build_frames(1, &payload),
            Err(SyncError::PayloadTooLarge(_))
        ));
    }
}
