//! Cache Facade
//!
//! The one object viewers and the settings UI talk to. Constructed once at
//! startup and shared by reference; every operation runs the lazy,
//! idempotent `init` first.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

use super::access::DirectoryAccess;
use super::directory::DirectoryManager;
use super::engine::{CacheEngine, EngineLimits};
use super::errors::CacheResult;
use super::store::KvStore;
use super::types::{CacheStatsSnapshot, SelectOutcome, SetOutcome};
use crate::config::CacheConfig;

/// Content returned by `get_or_fetch`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    pub content: Vec<u8>,
    /// Outcome of the write-back; `None` when the content came from the cache
    pub write_back: Option<SetOutcome>,
}

/// Cache context shared by all viewers
pub struct MediaCache {
    store: Arc<KvStore>,
    directory: Arc<DirectoryManager>,
    engine: CacheEngine,
    ready: OnceCell<()>,
}

impl MediaCache {
    pub fn new(config: &CacheConfig, access: Arc<dyn DirectoryAccess>) -> Self {
        Self::with_limits(
            KvStore::new(config.data_dir.clone()),
            access,
            config.engine_limits(),
        )
    }

    pub fn with_limits(store: KvStore, access: Arc<dyn DirectoryAccess>, limits: EngineLimits) -> Self {
        let store = Arc::new(store);
        let directory = Arc::new(DirectoryManager::new(access, Arc::clone(&store)));
        let engine = CacheEngine::new(Arc::clone(&store), Arc::clone(&directory), limits);
        Self {
            store,
            directory,
            engine,
            ready: OnceCell::new(),
        }
    }

    /// Open the KV store once; a failure leaves the KV tier inert
    pub async fn init(&self) {
        self.ready
            .get_or_init(|| async {
                match self.store.open().await {
                    Ok(()) => info!(root = %self.store.root().display(), "Media cache ready"),
                    Err(e) => error!(error = %e, "KV tier unavailable, caching degraded"),
                }
            })
            .await;
    }

    pub async fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.init().await;
        self.engine.get(path).await
    }

    /// `get` for text content; non-UTF-8 content reads as a miss
    pub async fn get_text(&self, path: &str) -> Option<String> {
        let content = self.get(path).await?;
        match String::from_utf8(content) {
            Ok(text) => Some(text),
            Err(_) => {
                debug!(path = path, "Cached content is not UTF-8");
                None
            }
        }
    }

    pub async fn set(&self, path: &str, content: impl Into<Vec<u8>>) -> SetOutcome {
        self.init().await;
        self.engine.set(path, content.into()).await
    }

    pub async fn set_binary(&self, path: &str, blob: impl Into<Vec<u8>>) -> SetOutcome {
        self.init().await;
        self.engine.set_binary(path, blob.into()).await
    }

    /// Read-through: serve from cache or run `fetch` and write the result back
    pub async fn get_or_fetch<F, Fut, E>(&self, path: &str, fetch: F) -> Result<Fetched, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<u8>, E>>,
    {
        if let Some(content) = self.get(path).await {
            return Ok(Fetched {
                content,
                write_back: None,
            });
        }

        debug!(path = path, "Cache MISS, fetching");
        let content = fetch().await?;
        let outcome = self.engine.set(path, content.clone()).await;
        Ok(Fetched {
            content,
            write_back: Some(outcome),
        })
    }

    pub async fn get_video_url(&self, path: &str) -> Option<String> {
        self.init().await;
        self.engine.get_video_url(path).await
    }

    pub async fn invalidate(&self, path: &str) {
        self.init().await;
        self.engine.invalidate(path).await;
    }

    /// Ask for a local folder; `false` covers cancel, unsupported and failure
    pub async fn select_local_folder(&self, hint: Option<&str>) -> bool {
        self.init().await;
        match self.directory.request_new_directory(hint).await {
            Ok(SelectOutcome::Selected { folder_name }) => {
                debug!(folder = %folder_name, "Local folder active");
                true
            }
            Ok(SelectOutcome::Cancelled) | Ok(SelectOutcome::Unsupported) => false,
            Err(e) => {
                warn!(error = %e, "Folder selection failed");
                false
            }
        }
    }

    pub async fn try_restore_folder(&self) -> bool {
        self.init().await;
        self.directory.restore_from_last_session().await
    }

    pub async fn disconnect_local_folder(&self) {
        self.init().await;
        self.directory.disconnect().await;
    }

    pub fn is_local_folder_supported(&self) -> bool {
        self.directory.is_supported()
    }

    /// Write pending KV access times to disk
    pub async fn flush(&self) {
        self.init().await;
        if let Err(e) = self.engine.flush().await {
            warn!(error = %e, "Failed to flush KV access times");
        }
    }

    pub async fn get_stats(&self) -> CacheStatsSnapshot {
        self.init().await;
        self.engine.get_stats().await
    }

    pub async fn clear(&self) -> CacheResult<()> {
        self.init().await;
        self.engine.clear().await
    }

    pub async fn clear_indexed_db(&self) -> CacheResult<()> {
        self.init().await;
        self.engine.clear_kv_tier().await
    }

    pub async fn clear_local_folder(&self) -> CacheResult<()> {
        self.init().await;
        self.engine.clear_directory_tier().await
    }
}
