//! Persistence collaborator. The core only ever calls `load_entries` and
//! `save_entries` on an opaque store; how and where the data lives is the
//! implementor's business.

use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use log::{info, warn};
use tokio::fs;

use crate::calendar::entry::CalendarEntry;
use crate::utils::ensure_directory_exists;

const ENTRIES_FILE_NAME: &str = "calendar_entries.json";

/// Opaque key-value persistence for the local calendar.
#[async_trait]
pub trait EntryStore: Send + Sync {
    /// Returns the stored entries, or `None` when nothing was saved yet.
    async fn load_entries(&self) -> Result<Option<Vec<CalendarEntry>>>;
    /// Replaces the stored entries.
    async fn save_entries(&self, entries: &[CalendarEntry]) -> Result<()>;
}

/// Stores the calendar as one JSON file under a data directory.
pub struct JsonFileStore {
    data_dir: PathBuf,
}

impl JsonFileStore {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
        }
    }

    fn file_path(&self) -> PathBuf {
        self.data_dir.join(ENTRIES_FILE_NAME)
    }
}

#[async_trait]
impl EntryStore for JsonFileStore {
    async fn load_entries(&self) -> Result<Option<Vec<CalendarEntry>>> {
        let file_path = self.file_path();
        if !file_path.exists() {
            warn!("No saved calendar at {:?}", file_path);
            return Ok(None);
        }
        let json = fs::read_to_string(&file_path).await?;
        let entries: Vec<CalendarEntry> = serde_json::from_str(&json)?;
        info!("Loaded {} calendar entries from {:?}", entries.len(), file_path);
        Ok(Some(entries))
    }

    async fn save_entries(&self, entries: &[CalendarEntry]) -> Result<()> {
        ensure_directory_exists(&self.data_dir).await?;
        let file_path = self.file_path();
        let json = serde_json::to_string_pretty(entries)?;
        fs::write(&file_path, json).await?;
        info!("Saved {} calendar entries to {:?}", entries.len(), file_path);
        Ok(())
    }
}

/// In-memory store for tests and headless runs.
pub struct MemoryStore {
    entries: std::sync::Mutex<Option<Vec<CalendarEntry>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: std::sync::Mutex::new(None),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EntryStore for MemoryStore {
    async fn load_entries(&self) -> Result<Option<Vec<CalendarEntry>>> {
        Ok(self.entries.lock().unwrap().clone())
    }

    async fn save_entries(&self, entries: &[CalendarEntry]) -> Result<()> {
        *self.entries.lock().unwrap() = Some(entries.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::entry::upsert_entry;

    #[tokio::test]
    async fn json_store_round_trip() {
        let dir = std::env::temp_dir().join(format!("sync-store-{}", uuid::Uuid::new_v4()));
        let store = JsonFileStore::new(&dir);

        assert!(store.load_entries().await.unwrap().is_none());

        let mut entries = Vec::new();
        upsert_entry(&mut entries, CalendarEntry::new("Dentist", "Main St", 2, 14).unwrap());
        upsert_entry(&mut entries, CalendarEntry::new("Trip", "Airport", 8, 3).unwrap());
        store.save_entries(&entries).await.unwrap();

        let loaded = store.load_entries().await.unwrap().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].title, "Dentist");
        assert_eq!(loaded[1].month, 8);

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn save_replaces_previous_set() {
        let store = MemoryStore::new();
        let first = vec![CalendarEntry::new("A", "", 1, 1).unwrap()];
        let second = vec![CalendarEntry::new("B", "", 2, 2).unwrap()];

        store.save_entries(&first).await.unwrap();
        store.save_entries(&second).await.unwrap();

        let loaded = store.load_entries().await.unwrap().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].title, "B");
    }
}
