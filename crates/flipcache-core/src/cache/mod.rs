//! Named, versioned cache stores.
//!
//! This module provides `CacheStorage` (the set of stores for an origin) and
//! `Cache` (one open store mapping request identity to a captured response).
//! Stores live behind the `CacheBackend` trait:
//! - `MemoryBackend`: process-local, used by tests and short-lived hosts
//! - `DiskBackend`: one directory per store, survives restarts
//!
//! `CacheVersion` names the current store; see `worker::activate` for how
//! stale versions are pruned.

pub mod backend;
pub mod disk;
pub mod error;
pub mod store;
pub mod version;

pub use backend::{CacheBackend, CacheEntry, EntryMeta, MemoryBackend};
pub use disk::DiskBackend;
pub use error::{CacheError, StorageError, StorageResult};
pub use store::{Cache, CacheStorage};
pub use version::CacheVersion;
