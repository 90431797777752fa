//! Request caching engine with versioned partitions and offline fallback.
//!
//! This module provides:
//! - Named partitions of stored responses, created on first write
//! - A version registry deciding which partitions are current
//! - A pure classifier choosing network-first or cache-first per request
//! - The cache layer executing both strategies and their fallback chain

mod classify;
mod layer;
mod registry;
mod storage;
mod types;

pub use classify::{Classification, Classifier, ServicePattern, Strategy};
#[cfg(test)]
pub use classify::PartitionRole;
pub use layer::CacheLayer;
pub use registry::VersionRegistry;
pub use storage::{PartitionStore, SqliteStore};
pub use types::{CacheResult, CacheSource, StoredResponse, Unavailable};
