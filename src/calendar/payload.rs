//! The payload exchanged between two peers: the sender's whole calendar.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::calendar::entry::CalendarEntry;

/// A full calendar snapshot from one sender. A decoded payload replaces the
/// receiver's local entry set wholesale (last-writer-wins, no merge).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarPayload {
    /// Human label of the sending device.
    pub sender: String,
    /// Unix seconds at payload creation.
    pub timestamp: i64,
    /// Ordered entry list, at most one per month.
    pub entries: Vec<CalendarEntry>,
}

impl CalendarPayload {
    /// Builds a payload stamped with the current time.
    pub fn new(sender: &str, entries: Vec<CalendarEntry>) -> Self {
        Self {
            sender: sender.to_string(),
            timestamp: Utc::now().timestamp(),
            entries,
        }
    }
}
