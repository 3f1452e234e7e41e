//! A single calendar entry and the rules for the canonical local set.

use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SyncError;

/// Maximum entries in the canonical local set: one per month.
pub const MAX_ENTRIES: usize = 12;

/// One calendar entry. The local set holds at most one entry per month.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarEntry {
    pub id: Uuid,
    pub title: String,
    pub location: String,
    /// 1..=12
    pub month: u8,
    /// 1..=31, valid for `month` in the year the entry was created.
    pub day: u8,
}

impl CalendarEntry {
    /// Creates a validated entry. Used by the editing path; decoded entries
    /// bypass this and are range-checked by the codec instead.
    pub fn new(title: &str, location: &str, month: u8, day: u8) -> Result<Self, SyncError> {
        let year = Utc::now().year();
        validate_date(month, day, year)?;
        Ok(Self {
            id: Uuid::new_v4(),
            title: title.to_string(),
            location: location.to_string(),
            month,
            day,
        })
    }

    /// Rebuilds an entry from decoded wire fields with a fresh id.
    pub(crate) fn from_wire(title: String, location: String, month: u8, day: u8) -> Self {
        Self {
            id: Uuid::new_v4(),
            title,
            location,
            month,
            day,
        }
    }
}

fn validate_date(month: u8, day: u8, year: i32) -> Result<(), SyncError> {
    if !(1..=12).contains(&month) {
        return Err(SyncError::InvalidEntry(format!("month {} out of range", month)));
    }
    let max_day = days_in_month(month, year);
    if day == 0 || day > max_day {
        return Err(SyncError::InvalidEntry(format!(
            "day {} does not exist in month {}",
            day, month
        )));
    }
    Ok(())
}

/// Number of days in `month` for `year`.
pub fn days_in_month(month: u8, year: i32) -> u8 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if is_leap_year(year) => 29,
        2 => 28,
        _ => 0,
    }
}

fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

/// Inserts `entry` into the canonical set, replacing any existing entry for
/// the same month. Keeps the set ordered by month.
pub fn upsert_entry(entries: &mut Vec<CalendarEntry>, entry: CalendarEntry) {
    entries.retain(|e| e.month != entry.month);
    entries.push(entry);
    entries.sort_by_key(|e| e.month);
}

/// Removes the entry for `month`, if present. Returns whether one existed.
pub fn remove_month(entries: &mut Vec<CalendarEntry>, month: u8) -> bool {
    let before = entries.len();
    entries.retain(|e| e.month != month);
    entries.len() != before
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_day_31_in_short_month() {
        assert!(CalendarEntry::new("Hike", "Trailhead", 4, 31).is_err());
        assert!(CalendarEntry::new("Hike", "Trailhead", 4, 30).is_ok());
    }

    #[test]
    fn rejects_month_zero_and_thirteen() {
        assert!(CalendarEntry::new("X", "", 0, 1).is_err());
        assert!(CalendarEntry::new("X", "", 13, 1).is_err());
    }

    #[test]
    fn february_leap_rules() {
        assert_eq!(days_in_month(2, 2024), 29);
        assert_eq!(days_in_month(2, 2025), 28);
        assert_eq!(days_in_month(2, 1900), 28);
        assert_eq!(days_in_month(2, 2000), 29);
    }

    #[test]
    fn upsert_replaces_same_month() {
        let mut entries = Vec::new();
        upsert_entry(&mut entries, CalendarEntry::new("Old", "A", 6, 1).unwrap());
        upsert_entry(&mut entries, CalendarEntry::new("New", "B", 6, 15).unwrap());
        upsert_entry(&mut entries, CalendarEntry::new("Other", "C", 1, 2).unwrap());

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].month, 1);
        assert_eq!(entries[1].month, 6);
        assert_eq!(entries[1].title, "New");
        assert_eq!(entries[1].day, 15);
    }

    #[test]
    fn remove_month_drops_only_that_month() {
        let mut entries = Vec::new();
        upsert_entry(&mut entries, CalendarEntry::new("A", "", 3, 3).unwrap());
        upsert_entry(&mut entries, CalendarEntry::new("B", "", 7, 7).unwrap());

        assert!(remove_month(&mut entries, 3));
        assert!(!remove_month(&mut entries, 3));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].month, 7);
    }
}
