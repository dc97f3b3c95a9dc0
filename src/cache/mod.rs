//! Named cache stores holding pre-fetched asset snapshots.
//!
//! A store is one generation of cached assets, keyed by absolute URL. Stores
//! are written whole at install time, read on every fetch, and deleted whole
//! when a newer generation activates. The backend is injected through the
//! `CacheStorage` trait so tests can substitute an in-memory fake.

mod asset;
mod storage;

pub use asset::{CachedAsset, ServeSource, ServedResponse};
#[cfg(test)]
pub use storage::MemoryStorage;
pub use storage::{CacheStorage, SqliteStorage};
