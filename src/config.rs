//! Daemon configuration
//!
//! Loaded from an optional JSON file, then overridden by `MEDIAHUB_*`
//! environment variables.

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

use crate::cache::engine::{
    EngineLimits, DEFAULT_DIRECTORY_CAPACITY, DEFAULT_KV_CAPACITY, DEFAULT_TOUCH_DELAY,
};
use crate::cache::{DirectoryAccess, NativeAccess, UnsupportedAccess};

/// Default socket path for IPC with the viewer UI
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/mediahub-cache.sock";

const APP_DIR: &str = "mediahub-cache";

/// Default interval between writes of pending KV access times
const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 30;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheConfig {
    /// Directory holding the KV store
    pub data_dir: PathBuf,
    /// Unix socket the daemon listens on
    pub socket_path: PathBuf,
    /// KV tier capacity in bytes
    pub kv_capacity_bytes: u64,
    /// Nominal directory tier capacity in bytes
    pub directory_capacity_bytes: u64,
    /// Delay before a KV hit refreshes its access time
    pub touch_delay_ms: u64,
    /// How often pending KV access times are written to disk
    pub flush_interval_secs: u64,
    /// Folder offered by the picker when the UI supplies none
    pub default_folder: Option<PathBuf>,
    /// Offer local folders at all; `false` keeps every file in the KV tier
    pub local_folders: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            data_dir: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(APP_DIR),
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            kv_capacity_bytes: DEFAULT_KV_CAPACITY,
            directory_capacity_bytes: DEFAULT_DIRECTORY_CAPACITY,
            touch_delay_ms: DEFAULT_TOUCH_DELAY.as_millis() as u64,
            flush_interval_secs: DEFAULT_FLUSH_INTERVAL_SECS,
            default_folder: None,
            local_folders: true,
        }
    }
}

impl CacheConfig {
    /// Load from the config file (if any) and the environment
    pub fn load() -> Result<Self> {
        let path = match env::var("MEDIAHUB_CACHE_CONFIG") {
            Ok(path) => Some(PathBuf::from(path)),
            Err(_) => dirs::config_dir().map(|d| d.join(APP_DIR).join("config.json")),
        };

        let mut config = match path {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        config.apply_env(|key| env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config = serde_json::from_slice(&bytes)
            .with_context(|| format!("Invalid config file: {:?}", path))?;
        debug!(path = %path.display(), "Loaded config file");
        Ok(config)
    }

    /// Apply overrides from a variable lookup
    fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("MEDIAHUB_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(socket) = lookup("MEDIAHUB_SOCKET") {
            self.socket_path = PathBuf::from(socket);
        }
        if let Some(capacity) = lookup("MEDIAHUB_KV_CAPACITY") {
            self.kv_capacity_bytes = capacity
                .parse()
                .context("Invalid MEDIAHUB_KV_CAPACITY value")?;
        }
        if let Some(delay) = lookup("MEDIAHUB_TOUCH_DELAY_MS") {
            self.touch_delay_ms = delay
                .parse()
                .context("Invalid MEDIAHUB_TOUCH_DELAY_MS value")?;
        }
        if let Some(folder) = lookup("MEDIAHUB_DEFAULT_FOLDER") {
            self.default_folder = Some(PathBuf::from(folder));
        }
        if let Some(enabled) = lookup("MEDIAHUB_LOCAL_FOLDERS") {
            self.local_folders = enabled
                .parse()
                .context("Invalid MEDIAHUB_LOCAL_FOLDERS value (expected true or false)")?;
        }
        Ok(())
    }

    /// Directory capability provider for this platform setup
    pub fn directory_access(&self) -> Arc<dyn DirectoryAccess> {
        if self.local_folders {
            Arc::new(NativeAccess::new(self.default_folder.clone()))
        } else {
            Arc::new(UnsupportedAccess)
        }
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs.max(1))
    }

    pub fn engine_limits(&self) -> EngineLimits {
        EngineLimits {
            kv_capacity: self.kv_capacity_bytes,
            directory_capacity: self.directory_capacity_bytes,
            touch_delay: Duration::from_millis(self.touch_delay_ms),
        }
    }
}
