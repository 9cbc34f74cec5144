//! Tiered Cache Engine
//!
//! Routes each file to the directory tier or the KV tier by format class.
//! Large-format files live only in the directory tier. General files prefer
//! the directory tier when a folder is active and otherwise use the bounded
//! KV tier, which evicts least-recently-accessed entries to stay under its cap.
//!
//! The directory tier has a nominal cap but no automatic eviction: it is the
//! user's own storage, so space there is managed by clearing it manually.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, trace, warn};

use super::directory::{entry_name, DirectoryManager};
use super::errors::CacheResult;
use super::format::is_large_format;
use super::store::KvStore;
use super::types::{now_millis, CacheStatsSnapshot, CachedEntry, SetOutcome, TierCounters};

/// Default KV tier capacity: 2 GiB
pub const DEFAULT_KV_CAPACITY: u64 = 2 * 1024 * 1024 * 1024;

/// Nominal directory tier capacity: 50 GiB (reported, never enforced)
pub const DEFAULT_DIRECTORY_CAPACITY: u64 = 50 * 1024 * 1024 * 1024;

/// Default delay before a KV hit updates its access time
pub const DEFAULT_TOUCH_DELAY: Duration = Duration::from_millis(100);

/// Engine tuning
#[derive(Debug, Clone)]
pub struct EngineLimits {
    pub kv_capacity: u64,
    pub directory_capacity: u64,
    pub touch_delay: Duration,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            kv_capacity: DEFAULT_KV_CAPACITY,
            directory_capacity: DEFAULT_DIRECTORY_CAPACITY,
            touch_delay: DEFAULT_TOUCH_DELAY,
        }
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Counters {
    fn record(&self, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn snapshot(&self) -> TierCounters {
        TierCounters {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// Format-aware get/set across both tiers
pub struct CacheEngine {
    store: Arc<KvStore>,
    directory: Arc<DirectoryManager>,
    limits: EngineLimits,
    directory_counters: Counters,
    kv_counters: Counters,
}

impl CacheEngine {
    pub fn new(store: Arc<KvStore>, directory: Arc<DirectoryManager>, limits: EngineLimits) -> Self {
        Self {
            store,
            directory,
            limits,
            directory_counters: Counters::default(),
            kv_counters: Counters::default(),
        }
    }

    /// Read a file, directory tier first
    pub async fn get(&self, path: &str) -> Option<Vec<u8>> {
        let large = is_large_format(path);

        if self.directory.is_active().await {
            let content = self.directory.read(&entry_name(path)).await;
            self.directory_counters.record(content.is_some());
            if content.is_some() {
                debug!(path = path, "Local folder HIT");
                return content;
            }
        }

        if large {
            trace!(path = path, "Large file not in local folder");
            return None;
        }

        match self.store.get_entry(path).await {
            Ok(Some(entry)) => {
                self.kv_counters.record(true);
                debug!(path = path, size = entry.meta.size, "KV HIT");
                self.schedule_touch(path);
                Some(entry.content)
            }
            Ok(None) => {
                self.kv_counters.record(false);
                debug!(path = path, "Cache MISS");
                None
            }
            Err(e) => {
                self.kv_counters.record(false);
                warn!(path = path, error = %e, "KV read failed, treating as miss");
                None
            }
        }
    }

    /// Best-effort access-time update, detached from the read
    ///
    /// Runs after a delay on the runtime; its failure is discarded on purpose.
    fn schedule_touch(&self, path: &str) {
        let store = Arc::clone(&self.store);
        let path = path.to_string();
        let delay = self.limits.touch_delay;
        let accessed_at = now_millis();

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = store.touch_entry(&path, accessed_at).await {
                trace!(path = %path, error = %e, "Access time update dropped");
            }
        });
    }

    /// Store a file in the tier its format requires
    pub async fn set(&self, path: &str, content: Vec<u8>) -> SetOutcome {
        if is_large_format(path) {
            return self.set_directory_only(path, content).await;
        }

        if self.directory.is_active().await {
            match self.directory.write(&entry_name(path), content.clone()).await {
                Ok(()) => {
                    // The directory copy is authoritative; drop any stale KV copy
                    if let Err(e) = self.store.delete_entry(path).await {
                        trace!(path = path, error = %e, "Could not drop stale KV copy");
                    }
                    return SetOutcome::Success;
                }
                Err(e) if e.is_recoverable() => {
                    warn!(path = path, error = %e, "Local folder write failed, falling back to KV tier");
                }
                Err(e) => {
                    error!(path = path, error = %e, "Local folder unusable, falling back to KV tier");
                }
            }
        }

        self.set_kv(path, content).await
    }

    /// Store raw binary content; directory tier only
    pub async fn set_binary(&self, path: &str, blob: Vec<u8>) -> SetOutcome {
        self.set_directory_only(path, blob).await
    }

    async fn set_directory_only(&self, path: &str, content: Vec<u8>) -> SetOutcome {
        if !self.directory.is_active().await {
            debug!(path = path, "No local folder for large file");
            return SetOutcome::NeedLocalFolder;
        }

        match self.directory.write(&entry_name(path), content).await {
            Ok(()) => SetOutcome::Success,
            Err(e) => {
                warn!(path = path, error = %e, "Local folder write failed for large file");
                SetOutcome::NeedLocalFolder
            }
        }
    }

    async fn set_kv(&self, path: &str, content: Vec<u8>) -> SetOutcome {
        let size = content.len() as u64;

        if let Err(e) = self.ensure_space(size).await {
            warn!(path = path, error = %e, "KV eviction failed");
            return SetOutcome::Error;
        }

        match self.store.put_entry(CachedEntry::new(path, content)).await {
            Ok(()) => {
                debug!(path = path, size = size, "Stored file in KV tier");
                SetOutcome::Success
            }
            Err(e) => {
                warn!(path = path, error = %e, "KV write failed");
                SetOutcome::Error
            }
        }
    }

    /// Evict least-recently-accessed KV entries until `needed` more bytes fit
    ///
    /// Scans first and deletes the marked entries in one pass afterwards.
    /// Returns the number of bytes freed.
    pub async fn ensure_space(&self, needed: u64) -> CacheResult<u64> {
        let cap = self.limits.kv_capacity;
        let (_, total) = self.store.totals().await?;
        if total + needed <= cap {
            return Ok(0);
        }

        let mut projected = total + needed;
        let mut freed = 0u64;
        let mut doomed = Vec::new();
        self.store
            .scan_by_last_accessed(|meta| {
                if projected <= cap {
                    return ControlFlow::Break(());
                }
                projected -= meta.size;
                freed += meta.size;
                doomed.push(meta.path.clone());
                ControlFlow::Continue(())
            })
            .await?;

        if doomed.is_empty() {
            return Ok(0);
        }

        info!(
            evicted = doomed.len(),
            freed_mb = freed / (1024 * 1024),
            max_mb = cap / (1024 * 1024),
            "KV tier over capacity, evicted LRU entries"
        );
        self.store.delete_entries(&doomed).await?;
        Ok(freed)
    }

    /// `file://` URL for a large file in the local folder
    ///
    /// The URL stays valid until the file is removed; callers release it by
    /// dropping it.
    pub async fn get_video_url(&self, path: &str) -> Option<String> {
        let local = self.directory.file_path(&entry_name(path)).await?;
        match url::Url::from_file_path(&local) {
            Ok(url) => Some(url.to_string()),
            Err(()) => {
                warn!(path = %local.display(), "Cannot build file URL");
                None
            }
        }
    }

    /// Remove one path from both tiers
    pub async fn invalidate(&self, path: &str) {
        if let Err(e) = self.directory.remove(&entry_name(path)).await {
            warn!(path = path, error = %e, "Failed to remove file from local folder");
        }
        if let Err(e) = self.store.delete_entry(path).await {
            warn!(path = path, error = %e, "Failed to remove KV entry");
        }
        debug!(path = path, "Invalidated cached file");
    }

    /// Aggregate statistics; enumerates the whole local folder
    pub async fn get_stats(&self) -> CacheStatsSnapshot {
        let mut directory_count = 0;
        let mut directory_size = 0;
        match self.directory.list_all().await {
            Ok(mut listing) => {
                while let Some(file) = listing.next().await {
                    directory_count += 1;
                    directory_size += file.size;
                }
            }
            Err(e) => warn!(error = %e, "Could not list local folder"),
        }

        let (kv_count, kv_size) = self.store.totals().await.unwrap_or_else(|e| {
            warn!(error = %e, "Could not read KV totals");
            (0, 0)
        });

        let settings = self.store.get_settings().await.unwrap_or_default();
        let folder_name = match self.directory.folder_name().await {
            Some(name) => Some(name),
            None => settings.local_folder_name.clone(),
        };

        CacheStatsSnapshot {
            directory_count,
            directory_size,
            kv_count,
            kv_size,
            kv_capacity: self.limits.kv_capacity,
            directory_capacity: self.limits.directory_capacity,
            mode: settings.storage_mode,
            folder_name,
            capabilities_supported: self.directory.is_supported(),
            directory_counters: self.directory_counters.snapshot(),
            kv_counters: self.kv_counters.snapshot(),
        }
    }

    /// Write pending KV access times to disk
    pub async fn flush(&self) -> CacheResult<()> {
        self.store.flush().await
    }

    pub async fn clear_directory_tier(&self) -> CacheResult<()> {
        self.directory.clear().await.map(|_| ())
    }

    pub async fn clear_kv_tier(&self) -> CacheResult<()> {
        self.store.clear_all_entries().await
    }

    /// Clear both tiers; the KV tier is cleared even if the folder fails
    pub async fn clear(&self) -> CacheResult<()> {
        let directory = self.clear_directory_tier().await;
        self.clear_kv_tier().await?;
        directory
    }
}
