//! Two-tier sample retention
//!
//! `memory` keeps a bounded per-register ring for fast read-back, `sqlite`
//! is the durable time-indexed log, and `hybrid` routes between them and
//! owns the retention sweeper.

pub mod hybrid;
pub mod memory;
pub mod sqlite;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

pub use hybrid::{HybridStore, HybridStoreConfig};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Aggregate statistics for one storage tier
#[derive(Debug, Clone, Default)]
pub struct StorageStats {
    pub total_samples: u64,
    pub samples_by_register: BTreeMap<u16, u64>,
    pub oldest_sample_time: Option<DateTime<Utc>>,
    pub newest_sample_time: Option<DateTime<Utc>>,
    /// Approximate footprint in bytes
    pub storage_size_bytes: u64,
}

/// Combined view over both tiers
#[derive(Debug, Clone, Default)]
pub struct CombinedStorageStats {
    pub memory: StorageStats,
    pub durable: Option<StorageStats>,
}
