//! Cache types
//!
//! Records persisted by the KV store and the outcomes returned to viewers.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current time in milliseconds since the epoch
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Metadata for a file cached in the KV tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryMeta {
    /// File path (primary key)
    pub path: String,
    /// Exact byte length of the stored content
    pub size: u64,
    /// When the entry was written, ms since epoch
    pub cached_at: u64,
    /// Last read or write, ms since epoch
    pub last_accessed: u64,
}

/// A file cached in the KV tier, content included
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedEntry {
    pub meta: EntryMeta,
    pub content: Vec<u8>,
}

impl CachedEntry {
    /// Build a fresh entry; size is derived from the content
    pub fn new(path: &str, content: Vec<u8>) -> Self {
        let now = now_millis();
        Self {
            meta: EntryMeta {
                path: path.to_string(),
                size: content.len() as u64,
                cached_at: now,
                last_accessed: now,
            },
            content,
        }
    }
}

/// Which tier the cache routes general files to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    #[default]
    Auto,
    Local,
    IndexedDb,
}

/// Settings singleton stored under the `"main"` key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSettings {
    pub storage_mode: StorageMode,
    #[serde(default)]
    pub local_folder_name: Option<String>,
}

/// Serializable reference to a user-granted directory (`"folderHandle"` key)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryHandle {
    /// Display name shown in the settings UI
    pub name: String,
    /// Absolute path of the chosen directory
    pub path: PathBuf,
}

impl DirectoryHandle {
    pub fn from_path(path: PathBuf) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        Self { name, path }
    }
}

/// Permission state of a directory handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Granted,
    Prompt,
    Denied,
}

/// Result of a cache write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetOutcome {
    Success,
    /// The file needs a local folder and none is active
    NeedLocalFolder,
    Error,
}

/// Result of asking the user for a new directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectOutcome {
    Selected { folder_name: String },
    Cancelled,
    Unsupported,
}

/// A file in the directory tier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryFile {
    pub name: String,
    pub size: u64,
}

/// Hit/miss counters for one tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierCounters {
    pub hits: u64,
    pub misses: u64,
}

/// Aggregated statistics across both tiers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatsSnapshot {
    pub directory_count: u64,
    pub directory_size: u64,
    pub kv_count: u64,
    pub kv_size: u64,
    pub kv_capacity: u64,
    pub directory_capacity: u64,
    pub mode: StorageMode,
    pub folder_name: Option<String>,
    pub capabilities_supported: bool,
    pub directory_counters: TierCounters,
    pub kv_counters: TierCounters,
}
