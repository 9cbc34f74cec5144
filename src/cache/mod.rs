//! Tiered file cache
//!
//! Caches fetched file content in a user-granted local folder (large and bulk
//! content) or in a bounded on-device KV store (everything else).

pub mod access;
pub mod directory;
pub mod engine;
pub mod errors;
pub mod facade;
pub mod format;
pub mod store;
pub mod types;

#[cfg(test)]
pub mod testing;

pub use access::{DirectoryAccess, NativeAccess, UnsupportedAccess};
pub use errors::CacheResult;
pub use facade::MediaCache;
pub use types::{CacheStatsSnapshot, SetOutcome};
