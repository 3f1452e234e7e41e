//! Peer connection handling: connect with retry, discover the calendar
//! service, and expose the chunk write seam over the sync characteristic.

use anyhow::{anyhow, Result};
use bluest::{Adapter, Characteristic, Device};
use log::{info, warn};
use std::time::Duration;

use crate::bluetooth::constants::{UUID_CALENDAR_SERVICE, UUID_CALENDAR_SYNC_CHAR};
use crate::transfer::sender::{ChunkSink, SinkError};

/// Connection manager for peer devices.
#[derive(Clone)]
pub struct ConnectionManager {
    adapter: Adapter,
    max_retries: u32,
    retry_delay: u64,
}

impl ConnectionManager {
    pub fn new(adapter: Adapter, max_retries: u32, retry_delay: u64) -> Self {
        Self {
            adapter,
            max_retries,
            retry_delay,
        }
    }

    /// Connects to the peer and resolves its sync characteristic, retrying
    /// transient connection failures a bounded number of times.
    pub async fn connect_with_retry(&self, device: &Device) -> Result<Characteristic> {
        let mut retry_count = 0;
        let mut last_error = None;

        while retry_count < self.max_retries {
            match self.try_connect(device).await {
                Ok(sync_char) => {
                    info!("Successfully connected to peer");
                    return Ok(sync_char);
                }
                Err(e) => {
                    warn!("Connection attempt {} failed: {}", retry_count + 1, e);
                    last_error = Some(e);

                    if retry_count < self.max_retries - 1 {
                        info!("Retrying connection in {} ms...", self.retry_delay);
                        tokio::time::sleep(Duration::from_millis(self.retry_delay)).await;
                    }
                }
            }
            retry_count += 1;
        }

        Err(last_error
            .unwrap_or_else(|| anyhow!("Failed to connect after {} attempts", self.max_retries)))
    }

    /// One connection attempt: link up, then find the calendar service and
    /// its sync characteristic.
    async fn try_connect(&self, device: &Device) -> Result<Characteristic> {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        let id = device.id().to_string();
        info!("Peer details - ID: {}, Name: {:?}", id, name);

        if !device.is_connected().await {
            info!("Initiating connection to {}...", id);
            self.adapter.connect_device(device).await?;
        }

        info!("Connection successful, discovering services...");
        let services = device.services().await?;
        let calendar_service = services
            .iter()
            .find(|s| s.uuid() == UUID_CALENDAR_SERVICE)
            .ok_or_else(|| {
                for service in &services {
                    info!("Available service: {}", service.uuid());
                }
                anyhow!("Calendar service not found: {}", UUID_CALENDAR_SERVICE)
            })?
            .clone();

        info!("Found calendar service: {}", calendar_service.uuid());

        let sync_char = calendar_service
            .characteristics()
            .await?
            .into_iter()
            .find(|c| c.uuid() == UUID_CALENDAR_SYNC_CHAR)
            .ok_or_else(|| {
                anyhow!("Sync characteristic not found: {}", UUID_CALENDAR_SYNC_CHAR)
            })?;

        info!("Found sync characteristic: {}", sync_char.uuid());
        Ok(sync_char)
    }

    /// Disconnect from the peer.
    pub async fn disconnect(&self, device: &Device) -> Result<()> {
        if device.is_connected().await {
            info!("Disconnecting from device {}", device.id());
            self.adapter.disconnect_device(device).await?;
            info!("Successfully disconnected");
        } else {
            info!("Device {} not connected", device.id());
        }
        Ok(())
    }
}

/// Production chunk sink: writes frames to the peer's sync characteristic.
#[derive(Clone)]
pub struct BluestChunkWriter {
    device: Device,
    sync_char: Characteristic,
}

impl BluestChunkWriter {
    pub fn new(device: Device, sync_char: Characteristic) -> Self {
        Self { device, sync_char }
    }
}

#[async_trait::async_trait]
impl ChunkSink for BluestChunkWriter {
    async fn write_chunk(&self, frame: &[u8]) -> Result<(), SinkError> {
        match self.sync_char.write(frame).await {
            Ok(()) => Ok(()),
            Err(e) => {
                // A rejected write on a live link is queue pressure and worth
                // retrying; a dead link is terminal.
                if self.device.is_connected().await {
                    Err(SinkError::transient(e.to_string()))
                } else {
                    Err(SinkError::terminal(format!("link lost: {}", e)))
                }
            }
        }
    }
}
