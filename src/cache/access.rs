//! Directory capability providers
//!
//! The directory tier only talks to the platform through `DirectoryAccess`,
//! so the engine never probes for picker support itself.

use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use super::errors::{CacheError, CacheResult};
use super::types::{DirectoryHandle, PermissionState};

const PROBE_FILE: &str = ".mediahub-permission-probe";

/// Platform access to user-granted directories
#[async_trait]
pub trait DirectoryAccess: Send + Sync {
    /// Whether the platform can offer a directory picker at all
    fn is_supported(&self) -> bool;

    /// Ask the user for a directory
    ///
    /// # Returns
    /// `Ok(None)` when the user cancelled the picker.
    async fn pick_directory(&self, hint: Option<&str>) -> CacheResult<Option<DirectoryHandle>>;

    /// Current permission for a previously granted handle (never prompts)
    async fn query_permission(&self, handle: &DirectoryHandle) -> PermissionState;

    /// Ask the user to re-grant access to a handle
    async fn request_permission(&self, handle: &DirectoryHandle) -> PermissionState;
}

/// Provider for platforms without a directory picker
#[derive(Debug, Default)]
pub struct UnsupportedAccess;

#[async_trait]
impl DirectoryAccess for UnsupportedAccess {
    fn is_supported(&self) -> bool {
        false
    }

    async fn pick_directory(&self, _hint: Option<&str>) -> CacheResult<Option<DirectoryHandle>> {
        Err(CacheError::Unsupported)
    }

    async fn query_permission(&self, _handle: &DirectoryHandle) -> PermissionState {
        PermissionState::Denied
    }

    async fn request_permission(&self, _handle: &DirectoryHandle) -> PermissionState {
        PermissionState::Denied
    }
}

/// Native filesystem provider
///
/// The UI runs the actual dialog and passes the chosen path as the hint.
/// Without a hint the configured default folder is offered; with neither,
/// the selection counts as cancelled.
#[derive(Debug, Default)]
pub struct NativeAccess {
    default_folder: Option<PathBuf>,
}

impl NativeAccess {
    pub fn new(default_folder: Option<PathBuf>) -> Self {
        Self { default_folder }
    }
}

#[async_trait]
impl DirectoryAccess for NativeAccess {
    fn is_supported(&self) -> bool {
        true
    }

    async fn pick_directory(&self, hint: Option<&str>) -> CacheResult<Option<DirectoryHandle>> {
        let chosen = match hint.filter(|h| !h.trim().is_empty()) {
            Some(hint) => PathBuf::from(hint),
            None => match &self.default_folder {
                Some(folder) => folder.clone(),
                None => return Ok(None),
            },
        };

        let metadata = tokio::fs::metadata(&chosen).await.map_err(|e| {
            CacheError::InvalidSelection(format!("{}: {}", chosen.display(), e))
        })?;
        if !metadata.is_dir() {
            return Err(CacheError::InvalidSelection(format!(
                "{} is not a directory",
                chosen.display()
            )));
        }

        let canonical = tokio::fs::canonicalize(&chosen).await;
        Ok(Some(DirectoryHandle::from_path(canonical.unwrap_or(chosen))))
    }

    async fn query_permission(&self, handle: &DirectoryHandle) -> PermissionState {
        match tokio::fs::metadata(&handle.path).await {
            Ok(metadata) if !metadata.is_dir() => PermissionState::Denied,
            Ok(metadata) if metadata.permissions().readonly() => PermissionState::Prompt,
            Ok(_) => PermissionState::Granted,
            Err(e) => {
                debug!(path = %handle.path.display(), error = %e, "Directory handle no longer valid");
                PermissionState::Denied
            }
        }
    }

    async fn request_permission(&self, handle: &DirectoryHandle) -> PermissionState {
        let probe = handle.path.join(PROBE_FILE);
        match probe_write(&probe).await {
            Ok(()) => PermissionState::Granted,
            Err(e) => {
                debug!(path = %handle.path.display(), error = %e, "Write probe failed");
                PermissionState::Denied
            }
        }
    }
}

async fn probe_write(probe: &std::path::Path) -> io::Result<()> {
    tokio::fs::write(probe, b"").await?;
    tokio::fs::remove_file(probe).await
}
