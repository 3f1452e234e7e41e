use std::path::Path;

use anyhow::Result;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::utils::ensure_directory_exists;

pub const CONFIG_FILE_NAME: &str = "sync_config.json";

/// Tunable timing and identity values for the sync core.
/// Defaults are the values the protocol was tuned with; a config file can
/// override them per device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Human label sent as the payload `sender` field.
    pub device_name: String,

    /// Delay before the first chunk write, in milliseconds.
    pub base_delay_ms: u64,

    /// Delay between consecutive chunk writes, in milliseconds. Paces the
    /// peer's inbound queue.
    pub inter_chunk_delay_ms: u64,

    /// How often a rejected chunk is retried before the session fails.
    pub max_write_retries: u32,

    /// First retry backoff, in milliseconds. Doubles per attempt.
    pub retry_backoff_ms: u64,

    /// Wait after the last chunk before declaring the session sent.
    pub settle_delay_ms: u64,

    /// Wait after the session outcome before disconnecting the link.
    /// Disconnecting earlier risks truncating the final chunk in flight.
    pub disconnect_settle_ms: u64,

    /// Margin added to the computed master timeout, in milliseconds.
    pub master_timeout_margin_ms: u64,

    /// Length of a one-shot buffered refresh scan, in seconds.
    pub refresh_window_secs: u64,

    /// How long a finished transfer's progress/outcome stays observable
    /// before resetting to idle, in seconds.
    pub result_reset_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            device_name: "Calendar Peer".to_string(),
            base_delay_ms: 200,
            inter_chunk_delay_ms: 120,
            max_write_retries: 3,
            retry_backoff_ms: 250,
            settle_delay_ms: 1500,
            disconnect_settle_ms: 2000,
            master_timeout_margin_ms: 5000,
            refresh_window_secs: 3,
            result_reset_secs: 4,
        }
    }
}

impl SyncConfig {
    /// Loads the config from a configuration file, falling back to defaults
    /// when the file does not exist.
    pub async fn load_config<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let file_path = config_dir.as_ref().join(CONFIG_FILE_NAME);

        if !file_path.exists() {
            warn!("Config file not found at {:?}, using default.", file_path);
            return Ok(Self::default());
        }

        let config_json = fs::read_to_string(&file_path).await?;
        let config: Self = serde_json::from_str(&config_json)?;

        info!("Config loaded from {:?}", file_path);
        Ok(config)
    }

    /// Saves the current config to a configuration file.
    pub async fn save_config<P: AsRef<Path>>(&self, config_dir: P) -> Result<()> {
        let config_dir = config_dir.as_ref();
        ensure_directory_exists(config_dir).await?;

        let file_path = config_dir.join(CONFIG_FILE_NAME);
        let config_json = serde_json::to_string_pretty(self)?;
        fs::write(&file_path, config_json).await?;

        info!("Sync config saved to {:?}.", file_path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = SyncConfig::default();
        assert!(cfg.inter_chunk_delay_ms > 0);
        assert!(cfg.max_write_retries >= 1);
        assert!(cfg.refresh_window_secs >= 1);
    }

    #[tokio::test]
    async fn load_save_round_trip() {
        let dir = std::env::temp_dir().join(format!("sync-config-{}", uuid::Uuid::new_v4()));
        let mut cfg = SyncConfig::default();
        cfg.device_name = "Ray's Phone".to_string();
        cfg.inter_chunk_delay_ms = 80;
        cfg.save_config(&dir).await.unwrap();

        let loaded = SyncConfig::load_config(&dir).await.unwrap();
        assert_eq!(loaded.device_name, "Ray's Phone");
        assert_eq!(loaded.inter_chunk_delay_ms, 80);

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn missing_file_falls_back_to_default() {
        let dir = std::env::temp_dir().join(format!("sync-config-{}", uuid::Uuid::new_v4()));
        let loaded = SyncConfig::load_config(&dir).await.unwrap();
        assert_eq!(loaded.device_name, SyncConfig::default().device_name);
    }
}
