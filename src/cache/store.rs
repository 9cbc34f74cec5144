//! Persistent Key-Value Store
//!
//! On-device store with two collections: cached file content keyed by path,
//! and settings records keyed by fixed ids. Metadata lives in a single
//! versioned index file, content in one blob file per path. Every write goes
//! through a temp file and an atomic rename, and all operations are serialized
//! through one async mutex so no reader observes a half-applied write.
//!
//! Access-time updates stay in memory and reach disk with the next index
//! write or an explicit `flush`.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Write};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use tokio::sync::{Mutex, MutexGuard, OnceCell};
use tracing::{debug, info, trace, warn};

use super::errors::{CacheError, CacheResult};
use super::types::{CacheSettings, CachedEntry, DirectoryHandle, EntryMeta};

/// Current on-disk schema version
pub const SCHEMA_VERSION: u32 = 2;

/// Settings key for the cache settings singleton
pub const SETTINGS_KEY: &str = "main";

/// Settings key for the persisted directory handle
pub const HANDLE_KEY: &str = "folderHandle";

const INDEX_FILE: &str = "store.json";
const BLOB_DIR: &str = "blobs";
/// Prefix of in-flight temp files; cached names are hex digests and never match
const TEMP_PREFIX: &str = ".mediahub-tmp-";

/// Serialized form of the store index
#[derive(Debug, Serialize, Deserialize)]
struct StoreIndex {
    version: u32,
    #[serde(default)]
    entries: BTreeMap<String, EntryMeta>,
    /// Added in schema version 2
    #[serde(default)]
    settings: BTreeMap<String, serde_json::Value>,
}

impl StoreIndex {
    fn empty() -> Self {
        Self {
            version: SCHEMA_VERSION,
            entries: BTreeMap::new(),
            settings: BTreeMap::new(),
        }
    }
}

/// In-memory state of an open store
struct StoreState {
    index: StoreIndex,
    /// Secondary index ordered by (last_accessed, path)
    by_access: BTreeSet<(u64, String)>,
    total_size: u64,
    /// Access times changed since the index was last written
    dirty: bool,
}

impl StoreState {
    fn from_index(index: StoreIndex) -> Self {
        let by_access = index
            .entries
            .values()
            .map(|m| (m.last_accessed, m.path.clone()))
            .collect();
        let total_size = index.entries.values().map(|m| m.size).sum();
        Self {
            index,
            by_access,
            total_size,
            dirty: false,
        }
    }

    fn insert_meta(&mut self, meta: EntryMeta) {
        self.remove_meta(&meta.path);
        self.total_size += meta.size;
        self.by_access.insert((meta.last_accessed, meta.path.clone()));
        self.index.entries.insert(meta.path.clone(), meta);
    }

    fn remove_meta(&mut self, path: &str) -> Option<EntryMeta> {
        let old = self.index.entries.remove(path)?;
        self.by_access.remove(&(old.last_accessed, old.path.clone()));
        self.total_size = self.total_size.saturating_sub(old.size);
        Some(old)
    }
}

/// Durable store backing the KV tier and the cache settings
pub struct KvStore {
    /// Root directory of the store
    root: PathBuf,
    /// Lazily opened state, shared by concurrent openers
    state: OnceCell<Mutex<StoreState>>,
    /// Number of times the on-disk store was actually initialized
    opens: AtomicU32,
}

impl KvStore {
    /// Create a handle to a store rooted at `root`; nothing is touched until `open`
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            state: OnceCell::new(),
            opens: AtomicU32::new(0),
        }
    }

    /// Open the store, creating or migrating it on first use
    ///
    /// Concurrent callers wait on the same initialization.
    pub async fn open(&self) -> CacheResult<()> {
        self.state().await.map(|_| ())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn state(&self) -> CacheResult<MutexGuard<'_, StoreState>> {
        let cell = self
            .state
            .get_or_try_init(|| async { self.load().await.map(Mutex::new) })
            .await?;
        Ok(cell.lock().await)
    }

    async fn load(&self) -> CacheResult<StoreState> {
        self.opens.fetch_add(1, Ordering::SeqCst);

        let blob_dir = self.root.join(BLOB_DIR);
        tokio::fs::create_dir_all(&blob_dir).await.map_err(|e| {
            CacheError::StorageUnavailable(format!("{}: {}", blob_dir.display(), e))
        })?;

        cleanup_temp_files(&self.root).await;
        cleanup_temp_files(&blob_dir).await;

        let index_path = self.root.join(INDEX_FILE);
        let index = match tokio::fs::read(&index_path).await {
            Ok(bytes) => match serde_json::from_slice::<StoreIndex>(&bytes) {
                Ok(index) => index,
                Err(e) => {
                    warn!(error = %e, "Store index is corrupt, starting empty");
                    reset_blob_dir(&blob_dir).await?;
                    StoreIndex::empty()
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => StoreIndex::empty(),
            Err(e) => {
                return Err(CacheError::StorageUnavailable(format!(
                    "{}: {}",
                    index_path.display(),
                    e
                )))
            }
        };

        if index.version > SCHEMA_VERSION {
            return Err(CacheError::StorageUnavailable(format!(
                "store schema {} is newer than supported {}",
                index.version, SCHEMA_VERSION
            )));
        }

        let needs_write = index.version < SCHEMA_VERSION || !index_path.exists();
        let index = migrate(index);
        let state = StoreState::from_index(index);

        if needs_write {
            persist_index(&self.root, &state.index)
                .await
                .map_err(|e| CacheError::StorageUnavailable(e.to_string()))?;
        }

        info!(
            root = %self.root.display(),
            entries = state.index.entries.len(),
            total_mb = state.total_size / (1024 * 1024),
            "KV store opened"
        );

        Ok(state)
    }

    /// Look up a cached entry; a missing entry is `Ok(None)`
    pub async fn get_entry(&self, path: &str) -> CacheResult<Option<CachedEntry>> {
        let mut state = self.state().await?;
        let meta = match state.index.entries.get(path) {
            Some(meta) => meta.clone(),
            None => return Ok(None),
        };

        match tokio::fs::read(self.blob_path(path)).await {
            Ok(content) => Ok(Some(CachedEntry { meta, content })),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(path = path, "Blob missing for indexed entry, dropping it");
                state.remove_meta(path);
                self.persist(&mut state).await?;
                Ok(None)
            }
            Err(e) => Err(CacheError::from_store_io("read blob", e)),
        }
    }

    /// Insert or replace an entry
    ///
    /// If the index cannot be written the entry is dropped entirely, blob
    /// included, so memory never holds an entry the caller saw fail.
    pub async fn put_entry(&self, entry: CachedEntry) -> CacheResult<()> {
        let mut state = self.state().await?;
        let path = entry.meta.path.clone();
        let blob = self.blob_path(&path);
        write_atomic(blob.clone(), entry.content)
            .await
            .map_err(|e| CacheError::from_store_io("write blob", e))?;

        state.insert_meta(entry.meta);
        if let Err(e) = self.persist(&mut state).await {
            state.remove_meta(&path);
            if let Err(remove_err) = tokio::fs::remove_file(&blob).await {
                debug!(path = %path, error = %remove_err, "Could not remove orphaned blob");
            }
            return Err(e);
        }
        trace!(path = %path, "Stored KV entry");
        Ok(())
    }

    /// Update the access time of an entry in memory, if it still exists
    ///
    /// The new time is written with the next index write or `flush`.
    pub async fn touch_entry(&self, path: &str, accessed_at: u64) -> CacheResult<bool> {
        let mut state = self.state().await?;
        let mut meta = match state.index.entries.get(path) {
            Some(meta) => meta.clone(),
            None => return Ok(false),
        };
        meta.last_accessed = accessed_at;
        state.insert_meta(meta);
        state.dirty = true;
        Ok(true)
    }

    /// Write pending access-time updates; a no-op when nothing changed
    pub async fn flush(&self) -> CacheResult<()> {
        let mut state = self.state().await?;
        if !state.dirty {
            return Ok(());
        }
        self.persist(&mut state).await?;
        debug!("Flushed KV access times");
        Ok(())
    }

    pub async fn delete_entry(&self, path: &str) -> CacheResult<()> {
        self.delete_entries(&[path.to_string()]).await
    }

    /// Delete several entries in one transaction
    pub async fn delete_entries(&self, paths: &[String]) -> CacheResult<()> {
        let mut state = self.state().await?;
        let mut removed = 0usize;
        for path in paths {
            if state.remove_meta(path).is_some() {
                removed += 1;
                if let Err(e) = tokio::fs::remove_file(self.blob_path(path)).await {
                    if e.kind() != io::ErrorKind::NotFound {
                        warn!(path = %path, error = %e, "Failed to remove blob");
                    }
                }
            }
        }
        if removed > 0 {
            self.persist(&mut state).await?;
        }
        Ok(())
    }

    /// Remove every cached file entry; settings are kept
    pub async fn clear_all_entries(&self) -> CacheResult<()> {
        let mut state = self.state().await?;
        reset_blob_dir(&self.root.join(BLOB_DIR)).await?;
        state.index.entries.clear();
        state.by_access.clear();
        state.total_size = 0;
        self.persist(&mut state).await?;
        debug!("Cleared all KV entries");
        Ok(())
    }

    /// Walk entry metadata oldest-access first until `visit` breaks
    ///
    /// Runs inside a single transaction; do not call back into the store.
    pub async fn scan_by_last_accessed<F>(&self, mut visit: F) -> CacheResult<()>
    where
        F: FnMut(&EntryMeta) -> ControlFlow<()>,
    {
        let state = self.state().await?;
        for (_, path) in state.by_access.iter() {
            if let Some(meta) = state.index.entries.get(path) {
                if visit(meta).is_break() {
                    break;
                }
            }
        }
        Ok(())
    }

    /// Entry count and aggregate size
    pub async fn totals(&self) -> CacheResult<(u64, u64)> {
        let state = self.state().await?;
        Ok((state.index.entries.len() as u64, state.total_size))
    }

    /// Read the settings singleton, creating the default on first access
    pub async fn get_settings(&self) -> CacheResult<CacheSettings> {
        match self.get_record::<CacheSettings>(SETTINGS_KEY).await? {
            Some(settings) => Ok(settings),
            None => {
                let settings = CacheSettings::default();
                self.put_settings(&settings).await?;
                Ok(settings)
            }
        }
    }

    pub async fn put_settings(&self, settings: &CacheSettings) -> CacheResult<()> {
        self.put_record(SETTINGS_KEY, settings).await
    }

    pub async fn get_handle_record(&self) -> CacheResult<Option<DirectoryHandle>> {
        self.get_record(HANDLE_KEY).await
    }

    pub async fn put_handle_record(&self, handle: &DirectoryHandle) -> CacheResult<()> {
        self.put_record(HANDLE_KEY, handle).await
    }

    async fn get_record<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        let state = self.state().await?;
        match state.index.settings.get(key) {
            Some(value) => match serde_json::from_value(value.clone()) {
                Ok(record) => Ok(Some(record)),
                Err(e) => {
                    warn!(key = key, error = %e, "Ignoring unreadable settings record");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    async fn put_record<T: Serialize>(&self, key: &str, record: &T) -> CacheResult<()> {
        let value = serde_json::to_value(record)?;
        let mut state = self.state().await?;
        let previous = state.index.settings.insert(key.to_string(), value);
        if let Err(e) = self.persist(&mut state).await {
            match previous {
                Some(old) => state.index.settings.insert(key.to_string(), old),
                None => state.index.settings.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    /// Write the index, which also carries any pending access times
    async fn persist(&self, state: &mut StoreState) -> CacheResult<()> {
        persist_index(&self.root, &state.index).await?;
        state.dirty = false;
        Ok(())
    }

    fn blob_path(&self, path: &str) -> PathBuf {
        self.root.join(BLOB_DIR).join(path_digest(path))
    }

    #[cfg(test)]
    pub fn is_open(&self) -> bool {
        self.state.initialized()
    }

    #[cfg(test)]
    pub fn open_count(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }
}

/// Bring an index written by an older schema up to date
fn migrate(mut index: StoreIndex) -> StoreIndex {
    if index.version < 2 {
        // v1 had no settings collection; serde already defaulted it to empty
        info!(from = index.version, to = SCHEMA_VERSION, "Migrating KV store schema");
    }
    index.version = SCHEMA_VERSION;
    index
}

/// Stable, fixed-length hex name for a cached path
pub(crate) fn path_digest(path: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(path.as_bytes());
    hex::encode(hasher.finalize())
}

async fn persist_index(root: &Path, index: &StoreIndex) -> CacheResult<()> {
    let bytes = serde_json::to_vec(index)?;
    write_atomic(root.join(INDEX_FILE), bytes)
        .await
        .map_err(|e| CacheError::from_store_io("write index", e))
}

/// Write a file atomically via a sibling temp file
pub(crate) async fn write_atomic(target: PathBuf, data: Vec<u8>) -> io::Result<()> {
    tokio::task::spawn_blocking(move || {
        let parent = target.parent().unwrap_or(Path::new("/tmp"));
        let mut tmp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(parent)?;
        tmp.write_all(&data)?;
        tmp.as_file().sync_data()?;
        tmp.persist(&target).map_err(|e| e.error)?;
        Ok::<(), io::Error>(())
    })
    .await
    .map_err(io::Error::other)?
}

/// Whether a file name belongs to an in-flight or abandoned atomic write
pub(crate) fn is_temp_file(name: &str) -> bool {
    name.starts_with(TEMP_PREFIX)
}

/// Remove temp files left by interrupted writes
pub(crate) async fn cleanup_temp_files(dir: &Path) {
    let mut read_dir = match tokio::fs::read_dir(dir).await {
        Ok(read_dir) => read_dir,
        Err(_) => return,
    };
    while let Ok(Some(entry)) = read_dir.next_entry().await {
        let path = entry.path();
        if is_temp_file(&entry.file_name().to_string_lossy()) {
            debug!(path = %path.display(), "Removing stale temp file");
            let _ = tokio::fs::remove_file(&path).await;
        }
    }
}

async fn reset_blob_dir(blob_dir: &Path) -> CacheResult<()> {
    match tokio::fs::remove_dir_all(blob_dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(CacheError::from_store_io("clear blobs", e)),
    }
    tokio::fs::create_dir_all(blob_dir)
        .await
        .map_err(|e| CacheError::from_store_io("create blobs", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn entry_at(path: &str, content: &[u8], accessed: u64) -> CachedEntry {
        let mut entry = CachedEntry::new(path, content.to_vec());
        entry.meta.cached_at = accessed;
        entry.meta.last_accessed = accessed;
        entry
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let dir = TempDir::new().unwrap();
        let store = KvStore::new(dir.path().to_path_buf());

        assert!(store.get_entry("/a.txt").await.unwrap().is_none());

        store.put_entry(CachedEntry::new("/a.txt", b"hello".to_vec())).await.unwrap();
        let entry = store.get_entry("/a.txt").await.unwrap().unwrap();
        assert_eq!(entry.content, b"hello");
        assert_eq!(entry.meta.size, 5);
        assert_eq!(store.totals().await.unwrap(), (1, 5));

        store.delete_entry("/a.txt").await.unwrap();
        assert!(store.get_entry("/a.txt").await.unwrap().is_none());
        assert_eq!(store.totals().await.unwrap(), (0, 0));
    }

    #[tokio::test]
    async fn test_upsert_replaces_size() {
        let dir = TempDir::new().unwrap();
        let store = KvStore::new(dir.path().to_path_buf());

        store.put_entry(CachedEntry::new("/a.txt", vec![0; 10])).await.unwrap();
        store.put_entry(CachedEntry::new("/a.txt", vec![0; 3])).await.unwrap();

        assert_eq!(store.totals().await.unwrap(), (1, 3));
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = KvStore::new(dir.path().to_path_buf());
            store.put_entry(CachedEntry::new("/books/a.epub", b"book".to_vec())).await.unwrap();
            store
                .put_settings(&CacheSettings {
                    storage_mode: crate::cache::types::StorageMode::Local,
                    local_folder_name: Some("Media".into()),
                })
                .await
                .unwrap();
        }

        let store = KvStore::new(dir.path().to_path_buf());
        let entry = store.get_entry("/books/a.epub").await.unwrap().unwrap();
        assert_eq!(entry.content, b"book");
        let settings = store.get_settings().await.unwrap();
        assert_eq!(settings.local_folder_name.as_deref(), Some("Media"));
    }

    #[tokio::test]
    async fn test_scan_orders_by_last_accessed_and_stops_early() {
        let dir = TempDir::new().unwrap();
        let store = KvStore::new(dir.path().to_path_buf());
        store.put_entry(entry_at("/c", b"c", 30)).await.unwrap();
        store.put_entry(entry_at("/a", b"a", 10)).await.unwrap();
        store.put_entry(entry_at("/b", b"b", 20)).await.unwrap();

        let mut seen = Vec::new();
        store
            .scan_by_last_accessed(|meta| {
                seen.push(meta.path.clone());
                if seen.len() == 2 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })
            .await
            .unwrap();

        assert_eq!(seen, vec!["/a".to_string(), "/b".to_string()]);
    }

    #[tokio::test]
    async fn test_touch_reorders_scan() {
        let dir = TempDir::new().unwrap();
        let store = KvStore::new(dir.path().to_path_buf());
        store.put_entry(entry_at("/a", b"a", 10)).await.unwrap();
        store.put_entry(entry_at("/b", b"b", 20)).await.unwrap();

        assert!(store.touch_entry("/a", 30).await.unwrap());
        assert!(!store.touch_entry("/missing", 30).await.unwrap());

        let mut first = None;
        store
            .scan_by_last_accessed(|meta| {
                first = Some(meta.path.clone());
                ControlFlow::Break(())
            })
            .await
            .unwrap();
        assert_eq!(first.as_deref(), Some("/b"));
    }

    #[tokio::test]
    async fn test_concurrent_open_initializes_once() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(KvStore::new(dir.path().to_path_buf()));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move { store.open().await }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(store.open_count(), 1);
        assert!(store.is_open());
    }

    #[tokio::test]
    async fn test_settings_created_on_first_access() {
        let dir = TempDir::new().unwrap();
        let store = KvStore::new(dir.path().to_path_buf());

        let settings = store.get_settings().await.unwrap();
        assert_eq!(settings, CacheSettings::default());
        assert!(store.get_handle_record().await.unwrap().is_none());

        let handle = DirectoryHandle::from_path(PathBuf::from("/media/videos"));
        store.put_handle_record(&handle).await.unwrap();
        assert_eq!(store.get_handle_record().await.unwrap(), Some(handle));
    }

    #[tokio::test]
    async fn test_migrates_v1_preserving_entries() {
        let dir = TempDir::new().unwrap();
        let store = KvStore::new(dir.path().to_path_buf());
        store.put_entry(CachedEntry::new("/a.txt", b"hello".to_vec())).await.unwrap();
        drop(store);

        // Rewrite the index as a v1 document without a settings collection
        let index_path = dir.path().join(INDEX_FILE);
        let mut doc: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&index_path).unwrap()).unwrap();
        doc["version"] = serde_json::json!(1);
        doc.as_object_mut().unwrap().remove("settings");
        std::fs::write(&index_path, serde_json::to_vec(&doc).unwrap()).unwrap();

        let store = KvStore::new(dir.path().to_path_buf());
        let entry = store.get_entry("/a.txt").await.unwrap().unwrap();
        assert_eq!(entry.content, b"hello");

        let doc: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&index_path).unwrap()).unwrap();
        assert_eq!(doc["version"], serde_json::json!(SCHEMA_VERSION));
    }

    #[tokio::test]
    async fn test_newer_schema_is_unavailable() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(INDEX_FILE),
            format!(r#"{{"version":{}}}"#, SCHEMA_VERSION + 1),
        )
        .unwrap();

        let store = KvStore::new(dir.path().to_path_buf());
        assert!(matches!(
            store.open().await,
            Err(CacheError::StorageUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_clear_keeps_settings() {
        let dir = TempDir::new().unwrap();
        let store = KvStore::new(dir.path().to_path_buf());
        store.put_entry(CachedEntry::new("/a", b"a".to_vec())).await.unwrap();
        store.get_settings().await.unwrap();

        store.clear_all_entries().await.unwrap();

        assert_eq!(store.totals().await.unwrap(), (0, 0));
        assert!(store.get_entry("/a").await.unwrap().is_none());
        assert_eq!(store.get_settings().await.unwrap(), CacheSettings::default());
    }

    #[tokio::test]
    async fn test_missing_blob_drops_entry() {
        let dir = TempDir::new().unwrap();
        let store = KvStore::new(dir.path().to_path_buf());
        store.put_entry(CachedEntry::new("/a", b"a".to_vec())).await.unwrap();
        std::fs::remove_file(dir.path().join(BLOB_DIR).join(path_digest("/a"))).unwrap();

        assert!(store.get_entry("/a").await.unwrap().is_none());
        assert_eq!(store.totals().await.unwrap(), (0, 0));
    }

    #[tokio::test]
    async fn test_stale_temp_files_removed_on_open() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(BLOB_DIR)).unwrap();
        let stale = dir.path().join(BLOB_DIR).join(format!("{}abc", TEMP_PREFIX));
        std::fs::write(&stale, b"partial").unwrap();
        let blob_with_tmp_look = dir.path().join(BLOB_DIR).join("notes.tmp");
        std::fs::write(&blob_with_tmp_look, b"kept").unwrap();

        let store = KvStore::new(dir.path().to_path_buf());
        store.open().await.unwrap();

        assert!(!stale.exists());
        assert!(blob_with_tmp_look.exists());
    }

    fn indexed_last_accessed(dir: &TempDir, path: &str) -> u64 {
        let doc: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.path().join(INDEX_FILE)).unwrap()).unwrap();
        doc["entries"][path]["lastAccessed"].as_u64().unwrap()
    }

    #[tokio::test]
    async fn test_touch_stays_in_memory_until_flush() {
        let dir = TempDir::new().unwrap();
        let store = KvStore::new(dir.path().to_path_buf());
        store.put_entry(entry_at("/a", b"a", 10)).await.unwrap();

        assert!(store.touch_entry("/a", 99).await.unwrap());
        assert_eq!(indexed_last_accessed(&dir, "/a"), 10);

        store.flush().await.unwrap();
        assert_eq!(indexed_last_accessed(&dir, "/a"), 99);
    }

    #[tokio::test]
    async fn test_pending_touch_written_with_next_put() {
        let dir = TempDir::new().unwrap();
        {
            let store = KvStore::new(dir.path().to_path_buf());
            store.put_entry(entry_at("/a", b"a", 10)).await.unwrap();
            store.touch_entry("/a", 50).await.unwrap();
            store.put_entry(entry_at("/b", b"b", 20)).await.unwrap();
        }

        let store = KvStore::new(dir.path().to_path_buf());
        let entry = store.get_entry("/a").await.unwrap().unwrap();
        assert_eq!(entry.meta.last_accessed, 50);
    }

    /// Replace the index file with a directory so the next index write fails
    fn block_index_writes(dir: &TempDir) {
        let index_path = dir.path().join(INDEX_FILE);
        std::fs::remove_file(&index_path).unwrap();
        std::fs::create_dir(&index_path).unwrap();
        std::fs::write(index_path.join("occupied"), b"x").unwrap();
    }

    #[tokio::test]
    async fn test_failed_index_write_leaves_memory_unchanged() {
        let dir = TempDir::new().unwrap();
        let store = KvStore::new(dir.path().to_path_buf());
        store.put_entry(CachedEntry::new("/a", b"aaa".to_vec())).await.unwrap();
        store.get_settings().await.unwrap();
        block_index_writes(&dir);

        assert!(store.put_entry(CachedEntry::new("/b", b"bb".to_vec())).await.is_err());
        assert_eq!(store.totals().await.unwrap(), (1, 3));
        assert!(store.get_entry("/b").await.unwrap().is_none());
        assert!(!dir.path().join(BLOB_DIR).join(path_digest("/b")).exists());

        let local = CacheSettings {
            storage_mode: crate::cache::types::StorageMode::Local,
            local_folder_name: Some("Media".into()),
        };
        assert!(store.put_settings(&local).await.is_err());
        assert_eq!(store.get_settings().await.unwrap(), CacheSettings::default());
    }
}
