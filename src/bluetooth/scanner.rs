//! Peer discovery driver.
//!
//! Two session kinds: a continuous live scan that publishes every update
//! immediately, and a one-shot buffered refresh that collects into the
//! registry's shadow for a fixed window and publishes once, atomically, at
//! the end. A pull-to-refresh therefore never reorders the visible list
//! mid-scan.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use bluest::{Adapter, Device};
use futures_util::StreamExt;
use log::{debug, error, info};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bluetooth::constants::{NO_READING_RSSI, UUID_PRESENCE_SERVICE};
use crate::bluetooth::registry::PeerRegistry;
use crate::events::{CoreEvent, EventSink};

/// Discovery session states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    /// Continuous discovery, published immediately.
    Live,
    /// One-shot discovery into the shadow collection.
    Refresh,
}

pub struct PeerScanner {
    adapter: Adapter,
    registry: Arc<Mutex<PeerRegistry>>,
    devices: Arc<Mutex<HashMap<String, Device>>>,
    events: Arc<dyn EventSink>,
    cancel_token: Arc<CancellationToken>,
    scan_task_handle: Option<JoinHandle<()>>,
    state: Arc<Mutex<ScanState>>,
}

impl PeerScanner {
    pub fn new(
        adapter: Adapter,
        registry: Arc<Mutex<PeerRegistry>>,
        devices: Arc<Mutex<HashMap<String, Device>>>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            adapter,
            registry,
            devices,
            events,
            cancel_token: Arc::new(CancellationToken::new()),
            scan_task_handle: None,
            state: Arc::new(Mutex::new(ScanState::Idle)),
        }
    }

    pub fn state(&self) -> ScanState {
        *self.state.lock().unwrap()
    }

    /// Starts a continuous discovery session. The visible collection starts
    /// over; every discovery event publishes immediately.
    pub async fn start_live(&mut self) -> Result<()> {
        self.start(ScanState::Live, None).await
    }

    /// Starts a one-shot refresh: discovery runs into the shadow collection
    /// for `window`, then merges and publishes atomically.
    pub async fn start_refresh(&mut self, window: Duration) -> Result<()> {
        self.start(ScanState::Refresh, Some(window)).await
    }

    async fn start(&mut self, mode: ScanState, window: Option<Duration>) -> Result<()> {
        if self.scan_task_handle.is_some() {
            self.stop().await?;
        }

        {
            let mut registry = self.registry.lock().unwrap();
            match mode {
                ScanState::Live => registry.clear_published(),
                ScanState::Refresh => registry.begin_refresh(),
                ScanState::Idle => {}
            }
        }
        if mode == ScanState::Live {
            self.devices.lock().unwrap().clear();
        }

        self.cancel_token = Arc::new(CancellationToken::new());
        let cancel_token_for_task = self.cancel_token.clone();
        let adapter_for_task = self.adapter.clone();
        let registry_for_task = self.registry.clone();
        let devices_for_task = self.devices.clone();
        let events_for_task = self.events.clone();
        let state_for_task = self.state.clone();

        *self.state.lock().unwrap() = mode;

        let handle = tokio::spawn(async move {
            Self::internal_scan_task(
                adapter_for_task,
                registry_for_task,
                devices_for_task,
                events_for_task,
                cancel_token_for_task,
                state_for_task,
                window,
            )
            .await;
        });
        self.scan_task_handle = Some(handle);

        self.events.emit(CoreEvent::ScanStarted);
        info!("Peer discovery task started ({:?}).", mode);
        Ok(())
    }

    /// Scans for nearby devices and feeds every advertisement into the
    /// registry until cancelled or, for a refresh, until the window closes.
    async fn internal_scan_task(
        adapter: Adapter,
        registry: Arc<Mutex<PeerRegistry>>,
        devices: Arc<Mutex<HashMap<String, Device>>>,
        events: Arc<dyn EventSink>,
        cancel_token: Arc<CancellationToken>,
        state: Arc<Mutex<ScanState>>,
        window: Option<Duration>,
    ) {
        let mut scan_stream = match adapter.scan(&[]).await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Bluetooth scan unavailable: {}", e);
                events.emit(CoreEvent::DiscoveryStatus {
                    message: format!("Bluetooth unavailable: {}", e),
                });
                let mut registry = registry.lock().unwrap();
                registry.cancel_refresh();
                drop(registry);
                *state.lock().unwrap() = ScanState::Idle;
                return;
            }
        };

        // Live sessions run until cancelled; the deadline only ever fires
        // for a refresh window.
        let deadline = tokio::time::Instant::now()
            + window.unwrap_or(Duration::from_secs(60 * 60 * 24 * 365));

        loop {
            tokio::select! {
                result = scan_stream.next() => {
                    match result {
                        Some(discovered) => {
                            let device = discovered.device;
                            let rssi = discovered.rssi.unwrap_or(NO_READING_RSSI);
                            let id = device.id().to_string();
                            let name = discovered
                                .adv_data
                                .local_name
                                .clone()
                                .or_else(|| device.name().ok());
                            let is_peer_app = discovered
                                .adv_data
                                .services
                                .contains(&UUID_PRESENCE_SERVICE);

                            debug!(
                                "Advertisement from {} ({:?}), RSSI {}, peer app: {}",
                                id, name, rssi, is_peer_app
                            );

                            devices.lock().unwrap().insert(id.clone(), device);
                            let changed = registry.lock().unwrap().on_discovered(
                                &id,
                                name.as_deref(),
                                rssi,
                                is_peer_app,
                                Instant::now(),
                            );
                            if changed {
                                let peers = registry.lock().unwrap().sorted_snapshots();
                                events.emit(CoreEvent::PeersUpdated { peers });
                            }
                        }
                        None => {
                            info!("Bluetooth scan stream has ended.");
                            break;
                        }
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    // Refresh window closed: merge and publish atomically.
                    let peers = {
                        let mut registry = registry.lock().unwrap();
                        registry.complete_refresh(Instant::now());
                        registry.sorted_snapshots()
                    };
                    events.emit(CoreEvent::PeersUpdated { peers });
                    events.emit(CoreEvent::ScanStopped);
                    *state.lock().unwrap() = ScanState::Idle;
                    info!("Buffered refresh complete.");
                    return;
                }
                _ = cancel_token.cancelled() => {
                    break;
                }
            }
        }
        // A refresh that never reached its window must not leave the shadow
        // behind; stop() also does this, but the stream can end on its own.
        registry.lock().unwrap().cancel_refresh();
        *state.lock().unwrap() = ScanState::Idle;
    }

    /// Stops the running session. A live scan publishes what accumulated as
    /// final; a cancelled refresh discards its shadow without publishing.
    pub async fn stop(&mut self) -> Result<()> {
        info!("Stopping peer discovery.");
        let stopped_state = self.state();
        self.cancel_token.cancel();

        if let Some(handle) = self.scan_task_handle.take() {
            match handle.await {
                Ok(()) => info!("Scan task finished after cancellation."),
                Err(e) => {
                    if e.is_cancelled() {
                        info!("Scan task was cancelled successfully.");
                    } else {
                        error!("Scan task finished with an unexpected join error: {:?}", e);
                    }
                }
            }
        }

        match stopped_state {
            ScanState::Live => {
                let peers = self.registry.lock().unwrap().sorted_snapshots();
                self.events.emit(CoreEvent::PeersUpdated { peers });
            }
            ScanState::Refresh => {
                // Never publish stale shadow data.
                self.registry.lock().unwrap().cancel_refresh();
            }
            ScanState::Idle => {}
        }
        *self.state.lock().unwrap() = ScanState::Idle;
        self.events.emit(CoreEvent::ScanStopped);
        Ok(())
    }
}
