//! Directory Handle Manager
//!
//! Owns the optional user-granted local directory for the session: picking,
//! permission checks, persistence of the handle across sessions, and file
//! I/O scoped to a fixed cache subdirectory inside the chosen folder.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::access::DirectoryAccess;
use super::errors::{CacheError, CacheResult};
use super::format::extension;
use super::store::{cleanup_temp_files, is_temp_file, path_digest, write_atomic, KvStore};
use super::types::{
    CacheSettings, DirectoryFile, DirectoryHandle, PermissionState, SelectOutcome, StorageMode,
};

/// Subdirectory created inside the user's folder; nothing outside it is touched
pub const CACHE_SUBDIR: &str = "MediaHubCache";

/// Longest extension carried over onto a cached file name
const MAX_EXTENSION_LEN: usize = 10;

/// File name used for a cached path inside the cache subdirectory
///
/// The sha1 digest of the full path bounds the name length for any path.
/// Short alphanumeric extensions are kept so `file://` URLs play.
pub fn entry_name(path: &str) -> String {
    let digest = path_digest(path);
    match extension(path) {
        Some(ext)
            if ext.len() <= MAX_EXTENSION_LEN && ext.bytes().all(|b| b.is_ascii_alphanumeric()) =>
        {
            format!("{}.{}", digest, ext)
        }
        _ => digest,
    }
}

/// The live, permission-confirmed directory
#[derive(Debug, Clone)]
struct ActiveDirectory {
    handle: DirectoryHandle,
    cache_dir: PathBuf,
}

/// Manages the session's local directory
pub struct DirectoryManager {
    access: Arc<dyn DirectoryAccess>,
    store: Arc<KvStore>,
    active: RwLock<Option<ActiveDirectory>>,
    /// Serializes folder selection so only one picker runs at a time
    selection: Mutex<()>,
}

impl DirectoryManager {
    pub fn new(access: Arc<dyn DirectoryAccess>, store: Arc<KvStore>) -> Self {
        Self {
            access,
            store,
            active: RwLock::new(None),
            selection: Mutex::new(()),
        }
    }

    pub fn is_supported(&self) -> bool {
        self.access.is_supported()
    }

    pub async fn is_active(&self) -> bool {
        self.active.read().await.is_some()
    }

    /// Display name of the active folder
    pub async fn folder_name(&self) -> Option<String> {
        self.active
            .read()
            .await
            .as_ref()
            .map(|a| a.handle.name.clone())
    }

    /// Let the user pick a new directory and make it the live handle
    ///
    /// A second caller waits for the first picker to finish.
    pub async fn request_new_directory(&self, hint: Option<&str>) -> CacheResult<SelectOutcome> {
        if !self.access.is_supported() {
            return Ok(SelectOutcome::Unsupported);
        }

        let _selecting = self.selection.lock().await;

        let handle = match self.access.pick_directory(hint).await {
            Ok(Some(handle)) => handle,
            Ok(None) => {
                debug!("Folder selection cancelled");
                return Ok(SelectOutcome::Cancelled);
            }
            Err(CacheError::Unsupported) => return Ok(SelectOutcome::Unsupported),
            Err(e) => return Err(e),
        };

        self.activate(handle.clone()).await?;

        if let Err(e) = self.store.put_handle_record(&handle).await {
            warn!(error = %e, "Could not persist folder handle, selection lasts this session only");
        }
        self.save_settings(CacheSettings {
            storage_mode: StorageMode::Local,
            local_folder_name: Some(handle.name.clone()),
        })
        .await;

        info!(folder = %handle.name, path = %handle.path.display(), "Local folder selected");
        Ok(SelectOutcome::Selected {
            folder_name: handle.name,
        })
    }

    /// Re-activate the folder chosen in a previous session
    ///
    /// Prompts at most once, and only when the platform reports `Prompt`.
    pub async fn restore_from_last_session(&self) -> bool {
        let settings = match self.store.get_settings().await {
            Ok(settings) => settings,
            Err(e) => {
                debug!(error = %e, "No settings available for folder restore");
                return false;
            }
        };
        if settings.storage_mode != StorageMode::Local {
            return false;
        }

        let handle = match self.store.get_handle_record().await {
            Ok(Some(handle)) => handle,
            Ok(None) => return false,
            Err(e) => {
                debug!(error = %e, "Could not read folder handle");
                return false;
            }
        };

        let permission = match self.access.query_permission(&handle).await {
            PermissionState::Prompt => {
                debug!(folder = %handle.name, "Requesting folder permission");
                self.access.request_permission(&handle).await
            }
            other => other,
        };

        if permission != PermissionState::Granted {
            info!(folder = %handle.name, "Folder permission not granted, using KV tier");
            return false;
        }

        match self.activate(handle.clone()).await {
            Ok(()) => {
                info!(folder = %handle.name, "Restored local folder from last session");
                true
            }
            Err(e) => {
                warn!(folder = %handle.name, error = %e, "Failed to restore local folder");
                false
            }
        }
    }

    /// Drop the live handle and reset settings; files on disk stay
    pub async fn disconnect(&self) {
        *self.active.write().await = None;
        self.save_settings(CacheSettings::default()).await;
        info!("Local folder disconnected");
    }

    async fn activate(&self, handle: DirectoryHandle) -> CacheResult<()> {
        let cache_dir = handle.path.join(CACHE_SUBDIR);
        tokio::fs::create_dir_all(&cache_dir)
            .await
            .map_err(|e| CacheError::from_directory_io("create cache subdirectory", e))?;
        cleanup_temp_files(&cache_dir).await;

        *self.active.write().await = Some(ActiveDirectory { handle, cache_dir });
        Ok(())
    }

    async fn save_settings(&self, settings: CacheSettings) {
        if let Err(e) = self.store.put_settings(&settings).await {
            warn!(error = %e, "Failed to save cache settings");
        }
    }

    async fn cache_dir(&self) -> Option<PathBuf> {
        self.active.read().await.as_ref().map(|a| a.cache_dir.clone())
    }

    /// Forget the live handle after the platform revoked access mid-session
    async fn revoke(&self) {
        if self.active.write().await.take().is_some() {
            warn!("Local folder permission revoked, falling back to KV tier");
        }
    }

    pub(super) async fn handle_io_error(&self, context: &str, err: io::Error) -> CacheError {
        let err = CacheError::from_directory_io(context, err);
        if matches!(err, CacheError::PermissionRevoked(_)) {
            self.revoke().await;
        }
        err
    }

    /// Write a file into the cache subdirectory
    pub async fn write(&self, name: &str, content: Vec<u8>) -> CacheResult<()> {
        let dir = self
            .cache_dir()
            .await
            .ok_or_else(|| CacheError::DirectoryIo("no local folder active".to_string()))?;

        let size = content.len();
        match write_atomic(dir.join(name), content).await {
            Ok(()) => {
                debug!(name = name, size = size, "Wrote file to local folder");
                Ok(())
            }
            Err(e) => Err(self.handle_io_error(name, e).await),
        }
    }

    /// Read a file from the cache subdirectory; any failure reads as not found
    pub async fn read(&self, name: &str) -> Option<Vec<u8>> {
        let dir = self.cache_dir().await?;
        match tokio::fs::read(dir.join(name)).await {
            Ok(content) => Some(content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                let err = self.handle_io_error(name, e).await;
                debug!(name = name, error = %err, "Local folder read failed");
                None
            }
        }
    }

    /// On-disk location of a cached file, if present
    pub async fn file_path(&self, name: &str) -> Option<PathBuf> {
        let path = self.cache_dir().await?.join(name);
        match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => Some(path),
            _ => None,
        }
    }

    pub async fn remove(&self, name: &str) -> CacheResult<()> {
        let dir = match self.cache_dir().await {
            Some(dir) => dir,
            None => return Ok(()),
        };
        match tokio::fs::remove_file(dir.join(name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.handle_io_error(name, e).await),
        }
    }

    /// Lazily list files in the cache subdirectory
    pub async fn list_all(&self) -> CacheResult<DirectoryListing> {
        let dir = match self.cache_dir().await {
            Some(dir) => dir,
            None => return Ok(DirectoryListing { read_dir: None }),
        };
        match tokio::fs::read_dir(&dir).await {
            Ok(read_dir) => Ok(DirectoryListing {
                read_dir: Some(read_dir),
            }),
            Err(e) => Err(self.handle_io_error("list cache subdirectory", e).await),
        }
    }

    /// Remove every file in the cache subdirectory, returning how many went
    pub async fn clear(&self) -> CacheResult<u64> {
        let mut listing = self.list_all().await?;
        let mut removed = 0;
        while let Some(file) = listing.next().await {
            self.remove(&file.name).await?;
            removed += 1;
        }
        info!(removed = removed, "Cleared local folder cache");
        Ok(removed)
    }
}

/// Lazy listing of cached files; temp files and subdirectories are skipped
pub struct DirectoryListing {
    read_dir: Option<tokio::fs::ReadDir>,
}

impl DirectoryListing {
    pub async fn next(&mut self) -> Option<DirectoryFile> {
        let read_dir = self.read_dir.as_mut()?;
        loop {
            let entry = match read_dir.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => return None,
                Err(e) => {
                    warn!(error = %e, "Local folder listing interrupted");
                    return None;
                }
            };
            let name = entry.file_name().to_string_lossy().to_string();
            if is_temp_file(&name) {
                continue;
            }
            match entry.metadata().await {
                Ok(metadata) if metadata.is_file() => {
                    return Some(DirectoryFile {
                        name,
                        size: metadata.len(),
                    })
                }
                _ => continue,
            }
        }
    }
}
