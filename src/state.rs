//! Application state management
//! This module wires the sync manager up for a host application.

use std::sync::Arc;

use anyhow::Result;
use log::info;
use tokio::sync::{broadcast, Mutex};

use crate::bluetooth::SyncManager;
use crate::calendar::store::EntryStore;
use crate::config::SyncConfig;
use crate::events::{BroadcastSink, CoreEvent};

/// Global application state
pub struct AppState {
    /// The sync manager instance
    pub sync_manager: Arc<Mutex<SyncManager>>,
    events: Arc<BroadcastSink>,
}

impl AppState {
    /// Creates a new AppState instance
    pub async fn new(config: SyncConfig, store: Arc<dyn EntryStore>) -> Result<Self> {
        info!("Initializing SyncManager...");
        let events = Arc::new(BroadcastSink::new(64));
        let manager = SyncManager::new(config, store, events.clone()).await?;
        Ok(Self {
            sync_manager: Arc::new(Mutex::new(manager)),
            events,
        })
    }

    /// Gets a reference to the sync manager
    pub fn get_sync_manager_arc(&self) -> Arc<Mutex<SyncManager>> {
        self.sync_manager.clone()
    }

    /// Subscribes to the core event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.events.subscribe()
    }
}
