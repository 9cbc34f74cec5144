//! Test doubles for the directory capability

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;

use super::access::DirectoryAccess;
use super::errors::CacheResult;
use super::types::{DirectoryHandle, PermissionState};

/// Provider with fixed permission answers that counts queries and prompts
pub struct ScriptedAccess {
    folder: Option<PathBuf>,
    query: PermissionState,
    request: PermissionState,
    queries: AtomicU32,
    prompts: AtomicU32,
}

impl ScriptedAccess {
    pub fn new(query: PermissionState, request: PermissionState) -> Self {
        Self {
            folder: None,
            query,
            request,
            queries: AtomicU32::new(0),
            prompts: AtomicU32::new(0),
        }
    }

    /// Folder returned by the picker; without one the picker is cancelled
    pub fn with_folder(mut self, folder: PathBuf) -> Self {
        self.folder = Some(folder);
        self
    }

    pub fn queries(&self) -> u32 {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> u32 {
        self.prompts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DirectoryAccess for ScriptedAccess {
    fn is_supported(&self) -> bool {
        true
    }

    async fn pick_directory(&self, _hint: Option<&str>) -> CacheResult<Option<DirectoryHandle>> {
        Ok(self.folder.clone().map(DirectoryHandle::from_path))
    }

    async fn query_permission(&self, _handle: &DirectoryHandle) -> PermissionState {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.query
    }

    async fn request_permission(&self, _handle: &DirectoryHandle) -> PermissionState {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        self.request
    }
}
