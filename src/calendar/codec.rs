//! Wire codec for [`CalendarPayload`].
//!
//! The encoding is a flattened JSON object (parallel per-entry arrays rather
//! than one object per entry) to keep the byte count, and therefore the
//! chunk count, low. Decoding is defensive: parallel arrays whose lengths
//! disagree are truncated to the shortest, and entries with out-of-range
//! dates are dropped rather than failing the payload.

use log::warn;
use serde::{Deserialize, Serialize};

use crate::calendar::entry::{CalendarEntry, MAX_ENTRIES};
use crate::calendar::payload::CalendarPayload;
use crate::error::SyncError;

/// Cap on `title` and `location` text, in characters.
pub const MAX_TEXT_LEN: usize = 15;

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePayload {
    sender: String,
    timestamp: i64,
    entry_count: usize,
    months: Vec<u8>,
    days: Vec<u8>,
    titles: Vec<String>,
    locations: Vec<String>,
}

/// Serializes a payload to its compact wire form.
pub fn encode(payload: &CalendarPayload) -> Result<Vec<u8>, SyncError> {
    let mut entries: &[CalendarEntry] = &payload.entries;
    if entries.len() > MAX_ENTRIES {
        warn!(
            "Payload has {} entries, truncating to {}",
            entries.len(),
            MAX_ENTRIES
        );
        entries = &entries[..MAX_ENTRIES];
    }

    let wire = WirePayload {
        sender: payload.sender.clone(),
        timestamp: payload.timestamp,
        entry_count: entries.len(),
        months: entries.iter().map(|e| e.month).collect(),
        days: entries.iter().map(|e| e.day).collect(),
        titles: entries.iter().map(|e| clip(&e.title)).collect(),
        locations: entries.iter().map(|e| clip(&e.location)).collect(),
    };

    serde_json::to_vec(&wire).map_err(SyncError::Encoding)
}

/// Parses wire bytes back into a payload. Fails only when the bytes are not
/// a complete, valid JSON object of the expected shape.
pub fn decode(bytes: &[u8]) -> Result<CalendarPayload, SyncError> {
    let wire: WirePayload = serde_json::from_slice(bytes).map_err(SyncError::Decode)?;

    let count = wire
        .entry_count
        .min(wire.months.len())
        .min(wire.days.len())
        .min(wire.titles.len())
        .min(wire.locations.len());
    if count != wire.entry_count {
        warn!(
            "Payload arrays disagree with entryCount {}; truncating to {}",
            wire.entry_count, count
        );
    }

    let mut entries = Vec::with_capacity(count);
    let mut titles = wire.titles.into_iter();
    let mut locations = wire.locations.into_iter();
    for i in 0..count {
        let month = wire.months[i];
        let day = wire.days[i];
        let title = titles.next().unwrap_or_default();
        let location = locations.next().unwrap_or_default();
        if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
            warn!("Dropping entry with out-of-range date {}/{}", month, day);
            continue;
        }
        entries.push(CalendarEntry::from_wire(title, location, month, day));
    }

    Ok(CalendarPayload {
        sender: wire.sender,
        timestamp: wire.timestamp,
        entries,
    })
}

fn clip(text: &str) -> String {
    if text.chars().count() <= MAX_TEXT_LEN {
        text.to_string()
    } else {
        text.chars().take(MAX_TEXT_LEN).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(entries: Vec<CalendarEntry>) -> CalendarPayload {
        CalendarPayload {
            sender: "A".to_string(),
            timestamp: 1000,
            entries,
        }
    }

    fn entry(title: &str, location: &str, month: u8, day: u8) -> CalendarEntry {
        CalendarEntry::from_wire(title.to_string(), location.to_string(), month, day)
    }

    #[test]
    fn round_trip_preserves_fields() {
        let p = payload(vec![entry("X", "L1", 1, 1), entry("Y", "L2", 6, 15)]);
        let decoded = decode(&encode(&p).unwrap()).unwrap();

        assert_eq!(decoded.sender, "A");
        assert_eq!(decoded.timestamp, 1000);
        assert_eq!(decoded.entries.len(), 2);
        for (a, b) in p.entries.iter().zip(decoded.entries.iter()) {
            assert_eq!(a.month, b.month);
            assert_eq!(a.day, b.day);
            assert_eq!(a.title, b.title);
            assert_eq!(a.location, b.location);
        }
    }

    #[test]
    fn wire_keys_match_the_published_format() {
        let p = payload(vec![entry("X", "L1", 1, 1)]);
        let bytes = encode(&p).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        for key in [
            "sender",
            "timestamp",
            "entryCount",
            "months",
            "days",
            "titles",
            "locations",
        ] {
            assert!(value.get(key).is_some(), "missing key {}", key);
        }
        assert_eq!(value["entryCount"], 1);
        assert_eq!(value["months"][0], 1);
    }

    #[test]
    fn long_text_is_clipped_to_fifteen_chars() {
        let p = payload(vec![entry(
            "A very long title indeed",
            "Somewhere far far away",
            3,
            3,
        )]);
        let decoded = decode(&encode(&p).unwrap()).unwrap();
        assert_eq!(decoded.entries[0].title.chars().count(), 15);
        assert_eq!(decoded.entries[0].location.chars().count(), 15);
    }

    #[test]
    fn mismatched_arrays_truncate_to_shortest() {
        let raw = br#"{"sender":"B","timestamp":5,"entryCount":3,
            "months":[1,2,3],"days":[1,2],"titles":["a","b","c"],
            "locations":["x","y","z"]}"#;
        let decoded = decode(raw).unwrap();
        assert_eq!(decoded.entries.len(), 2);
    }

    #[test]
    fn entry_count_smaller_than_arrays_wins() {
        let raw = br#"{"sender":"B","timestamp":5,"entryCount":1,
            "months":[1,2],"days":[1,2],"titles":["a","b"],
            "locations":["x","y"]}"#;
        let decoded = decode(raw).unwrap();
        assert_eq!(decoded.entries.len(), 1);
        assert_eq!(decoded.entries[0].month, 1);
    }

    #[test]
    fn out_of_range_dates_are_dropped_not_fatal() {
        let raw = br#"{"sender":"B","timestamp":5,"entryCount":2,
            "months":[0,6],"days":[1,15],"titles":["a","b"],
            "locations":["x","y"]}"#;
        let decoded = decode(raw).unwrap();
        assert_eq!(decoded.entries.len(), 1);
        assert_eq!(decoded.entries[0].month, 6);
    }

    #[test]
    fn truncated_bytes_fail_without_panic() {
        let p = payload(vec![entry("X", "L", 1, 1)]);
        let bytes = encode(&p).unwrap();
        assert!(matches!(
            decode(&bytes[..bytes.len() / 2]),
            Err(SyncError::Decode(_))
        ));
    }

    #[test]
    fn empty_entry_list_round_trips() {
        let p = payload(Vec::new());
        let decoded = decode(&encode(&p).unwrap()).unwrap();
        assert!(decoded.entries.is_empty());
    }

    #[test]
    fn thirteenth_entry_is_truncated_on_encode() {
        let entries: Vec<CalendarEntry> = (0..13)
            .map(|i| entry("t", "l", (i % 12) + 1, 1))
            .collect();
        let decoded = decode(&encode(&payload(entries)).unwrap()).unwrap();
        assert_eq!(decoded.entries.len(), MAX_ENTRIES);
    }
}
