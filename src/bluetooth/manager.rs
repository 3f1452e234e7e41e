//! Sync manager: the main interface over discovery, connections and
//! calendar transfer. Owns every long-lived component and exposes the
//! public operations the application layer calls.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use bluest::{Adapter, Device};
use chrono::{DateTime, Utc};
use log::{info, warn};
use tokio::sync::Mutex as AsyncMutex;

use crate::bluetooth::connection::{BluestChunkWriter, ConnectionManager};
use crate::bluetooth::constants::{CONNECT_RETRY_DELAY_MS, MAX_CONNECT_RETRIES};
use crate::bluetooth::notification::NotificationHandler;
use crate::bluetooth::registry::{PeerRegistry, PeerSnapshot};
use crate::bluetooth::scanner::{PeerScanner, ScanState};
use crate::bluetooth::types::ConnectedPeerState;
use crate::calendar::entry::{self, CalendarEntry};
use crate::calendar::payload::CalendarPayload;
use crate::calendar::store::EntryStore;
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::events::{CoreEvent, EventSink};
use crate::transfer::sender::{TransferSession, TransferSlot};
use crate::transfer::TransferStatus;

/// Manages discovery, connections and calendar transfer for one device.
pub struct SyncManager {
    /// Map of platform device ids to live device handles.
    devices: Arc<Mutex<HashMap<String, Device>>>,
    /// Identity-resolved peer collection.
    registry: Arc<Mutex<PeerRegistry>>,
    /// Currently connected peer, if any.
    connected_state: Arc<AsyncMutex<Option<ConnectedPeerState>>>,
    /// Connection manager
    connection_manager: ConnectionManager,
    /// Peer discovery driver
    scanner: PeerScanner,
    /// Inbound chunk handler
    notification_handler: NotificationHandler,
    /// The single outbound transfer slot.
    transfer_slot: Arc<TransferSlot>,
    /// Persistence collaborator for the local calendar.
    store: Arc<dyn EntryStore>,
    /// Observer seam.
    events: Arc<dyn EventSink>,
    config: SyncConfig,
}

impl SyncManager {
    /// Creates a new SyncManager over the default Bluetooth adapter.
    pub async fn new(
        config: SyncConfig,
        store: Arc<dyn EntryStore>,
        events: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let adapter = Adapter::default()
            .await
            .ok_or_else(|| SyncError::Discovery("no Bluetooth adapter found".to_string()))?;
        adapter.wait_available().await?;
        info!("Bluetooth adapter is available.");

        let devices = Arc::new(Mutex::new(HashMap::new()));
        let registry = Arc::new(Mutex::new(PeerRegistry::new()));
        let connection_manager =
            ConnectionManager::new(adapter.clone(), MAX_CONNECT_RETRIES, CONNECT_RETRY_DELAY_MS);
        let scanner = PeerScanner::new(
            adapter.clone(),
            registry.clone(),
            devices.clone(),
            events.clone(),
        );
        let notification_handler = NotificationHandler::new(store.clone(), events.clone());

        Ok(Self {
            devices,
            registry,
            connected_state: Arc::new(AsyncMutex::new(None)),
            connection_manager,
            scanner,
            notification_handler,
            transfer_slot: Arc::new(TransferSlot::new()),
            store,
            events,
            config,
        })
    }

    /// Starts continuous discovery with immediate updates.
    pub async fn start_scan(&mut self) -> Result<()> {
        self.scanner.start_live().await
    }

    /// Stops the running discovery session.
    pub async fn stop_scan(&mut self) -> Result<()> {
        self.scanner.stop().await
    }

    /// Runs a one-shot buffered refresh; results publish atomically after
    /// the scan window.
    pub async fn refresh(&mut self) -> Result<()> {
        self.scanner
            .start_refresh(Duration::from_secs(self.config.refresh_window_secs))
            .await
    }

    pub fn scan_state(&self) -> ScanState {
        self.scanner.state()
    }

    /// Current sorted peer snapshots.
    pub fn peers(&self) -> Vec<PeerSnapshot> {
        self.registry.lock().unwrap().sorted_snapshots()
    }

    /// Completion time of the last buffered refresh.
    pub fn last_scan_time(&self) -> Option<DateTime<Utc>> {
        self.registry.lock().unwrap().last_scan_time()
    }

    /// Connects to a discovered peer and subscribes to its calendar
    /// characteristic.
    pub async fn connect_peer(&mut self, peer_id: &str) -> Result<()> {
        let device = {
            let devices = self.devices.lock().unwrap();
            devices
                .get(peer_id)
                .cloned()
                .ok_or_else(|| anyhow!("Device not found with ID: {}", peer_id))?
        };

        if device.is_connected().await {
            let already_ours = self
                .connected_state
                .lock()
                .await
                .as_ref()
                .map(|s| s.device.id().to_string() == peer_id)
                .unwrap_or(false);
            if already_ours {
                info!("Device already connected.");
                return Ok(());
            }
        }

        let sync_char = self
            .connection_manager
            .connect_with_retry(&device)
            .await
            .map_err(|e| SyncError::Connection(e.to_string()))?;

        self.notification_handler
            .setup_notifications(sync_char.clone())
            .await?;

        let state = ConnectedPeerState {
            device: device.clone(),
            sync_characteristic: sync_char,
        };
        *self.connected_state.lock().await = Some(state);

        if self.registry.lock().unwrap().set_connected(peer_id, true) {
            self.publish_peers();
        }
        self.events.emit(CoreEvent::PeerConnected {
            id: peer_id.to_string(),
        });
        info!("Peer connected and state stored in the manager.");
        Ok(())
    }

    /// Disconnects from the currently connected peer.
    pub async fn disconnect(&mut self) -> Result<()> {
        let connected_state = {
            let guard = self.connected_state.lock().await;
            guard.clone().ok_or_else(|| anyhow!("No device connected"))?
        };

        let device = connected_state.device.clone();

        self.notification_handler.stop_notifications().await?;
        {
            let mut guard = self.connected_state.lock().await;
            *guard = None;
            info!("Connected state cleared, releasing device and characteristic objects.");
        }
        self.connection_manager.disconnect(&device).await?;

        let id = device.id().to_string();
        if self.registry.lock().unwrap().set_connected(&id, false) {
            self.publish_peers();
        }
        self.events.emit(CoreEvent::PeerDisconnected { id });
        Ok(())
    }

    /// Checks if a peer is currently connected.
    pub async fn is_connected(&self) -> bool {
        let guard = self.connected_state.lock().await;
        if let Some(state) = guard.as_ref() {
            state.device.is_connected().await
        } else {
            false
        }
    }

    /// Returns the ID of the currently connected peer.
    pub async fn connected_peer_id(&self) -> Option<String> {
        let guard = self.connected_state.lock().await;
        guard.as_ref().map(|state| state.device.id().to_string())
    }

    /// Sends the local calendar to a peer. Returns once the transfer
    /// session is running; the outcome arrives through the event sink and
    /// the observable transfer status.
    pub async fn send_calendar(&mut self, peer_id: &str) -> Result<()> {
        if self.transfer_slot.is_active() {
            return Err(SyncError::TransferInFlight.into());
        }

        let entries = self.store.load_entries().await?.unwrap_or_default();
        let payload = CalendarPayload::new(&self.config.device_name, entries);
        // Encoding problems fail fast, before any connection work.
        let session = TransferSession::new(&payload, &self.config)?;
        info!(
            "Sending calendar to {}: {} chunks",
            peer_id,
            session.chunk_count()
        );

        self.connect_peer(peer_id).await?;
        let state = {
            let guard = self.connected_state.lock().await;
            guard.clone().ok_or_else(|| anyhow!("No device connected"))?
        };

        let generation = self.transfer_slot.try_begin(session.cancellation_token())?;
        let writer = BluestChunkWriter::new(state.device.clone(), state.sync_characteristic.clone());

        let slot = self.transfer_slot.clone();
        let events = self.events.clone();
        let registry = self.registry.clone();
        let connection_manager = self.connection_manager.clone();
        let connected_state = self.connected_state.clone();
        let notification_handler = self.notification_handler.clone();
        let config = self.config.clone();
        let device = state.device.clone();

        tokio::spawn(async move {
            session.run(&writer, &slot, &*events).await;

            // Give the peer's final notification cycle time to finish
            // before tearing the link down.
            tokio::time::sleep(Duration::from_millis(config.disconnect_settle_ms)).await;

            let _ = notification_handler.stop_notifications().await;
            *connected_state.lock().await = None;
            if let Err(e) = connection_manager.disconnect(&device).await {
                warn!("Post-transfer disconnect failed: {}", e);
            }

            let id = device.id().to_string();
            let changed = registry.lock().unwrap().set_connected(&id, false);
            if changed {
                let peers = registry.lock().unwrap().sorted_snapshots();
                events.emit(CoreEvent::PeersUpdated { peers });
            }
            events.emit(CoreEvent::PeerDisconnected { id });

            slot.schedule_reset(
                generation,
                Duration::from_secs(config.result_reset_secs),
                events.clone(),
            );
        });

        Ok(())
    }

    /// Aborts the in-flight transfer, if any.
    pub fn cancel_transfer(&self) {
        self.transfer_slot.cancel_active();
    }

    /// Observable progress and outcome of the transfer slot.
    pub fn transfer_status(&self) -> TransferStatus {
        self.transfer_slot.status()
    }

    /// The local calendar entries.
    pub async fn local_entries(&self) -> Result<Vec<CalendarEntry>> {
        Ok(self.store.load_entries().await?.unwrap_or_default())
    }

    /// Validates and inserts an entry, replacing any entry for the same
    /// month, then persists the set.
    pub async fn add_entry(
        &self,
        title: &str,
        location: &str,
        month: u8,
        day: u8,
    ) -> Result<Vec<CalendarEntry>> {
        let new_entry = CalendarEntry::new(title, location, month, day)?;
        let mut entries = self.store.load_entries().await?.unwrap_or_default();
        entry::upsert_entry(&mut entries, new_entry);
        self.store.save_entries(&entries).await?;
        Ok(entries)
    }

    /// Removes the entry for `month`, if present.
    pub async fn remove_entry(&self, month: u8) -> Result<bool> {
        let mut entries = self.store.load_entries().await?.unwrap_or_default();
        let removed = entry::remove_month(&mut entries, month);
        if removed {
            self.store.save_entries(&entries).await?;
        }
        Ok(removed)
    }

    fn publish_peers(&self) {
        let peers = self.registry.lock().unwrap().sorted_snapshots();
        self.events.emit(CoreEvent::PeersUpdated { peers });
    }
}
