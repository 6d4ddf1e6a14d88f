//! Persistent response cache.
//!
//! This module provides the named cache stores the manager reads and writes:
//! - Stores are identified by name (one per deployed version tag)
//! - Entries map a normalized request identity to a stored response
//! - Stores are only ever dropped wholesale, there is no per-entry eviction

mod storage;
mod types;

pub use storage::{CacheStorage, SqliteStorage};
pub use types::{CachedEntry, RequestKey, Resolved, ResponseSource, StoredResponse};
