//! In-memory ring store
//!
//! Per-register bounded deque with a latest-sample cache baked into the
//! deque tail. One lock protects the whole map; critical sections only push,
//! pop and copy out small vectors.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::mem;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::debug;

use crate::sample::AcquisitionSample;
use crate::storage::StorageStats;

/// Bounded per-register sample store
pub struct MemoryStore {
    samples: Mutex<HashMap<u16, VecDeque<AcquisitionSample>>>,
    max_samples_per_register: usize,
}

impl MemoryStore {
    pub fn new(max_samples_per_register: usize) -> Self {
        debug!("Memory store initialized with max {max_samples_per_register} samples per register");
        Self {
            samples: Mutex::new(HashMap::new()),
            max_samples_per_register,
        }
    }

    pub fn capacity(&self) -> usize {
        self.max_samples_per_register
    }

    /// Append one sample, evicting the oldest entry on overflow.
    pub fn store(&self, sample: &AcquisitionSample) {
        let mut map = self.samples.lock();
        let ring = map.entry(sample.register_address).or_default();
        ring.push_back(sample.clone());
        while ring.len() > self.max_samples_per_register {
            ring.pop_front();
        }
    }

    pub fn store_batch(&self, samples: &[AcquisitionSample]) {
        for sample in samples {
            self.store(sample);
        }
    }

    /// Last `count` samples for a register, newest first. `count == 0`
    /// returns the full history.
    pub fn samples(&self, register_address: u16, count: usize) -> Vec<AcquisitionSample> {
        let map = self.samples.lock();
        let Some(ring) = map.get(&register_address) else {
            return Vec::new();
        };

        let take = if count == 0 { ring.len() } else { count.min(ring.len()) };
        ring.iter().rev().take(take).cloned().collect()
    }

    /// Samples with `start <= timestamp <= end`, newest first.
    pub fn samples_in_range(
        &self,
        register_address: u16,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<AcquisitionSample> {
        let map = self.samples.lock();
        let Some(ring) = map.get(&register_address) else {
            return Vec::new();
        };

        ring.iter()
            .rev()
            .filter(|s| s.timestamp >= start && s.timestamp <= end)
            .cloned()
            .collect()
    }

    pub fn latest(&self, register_address: u16) -> Option<AcquisitionSample> {
        self.samples
            .lock()
            .get(&register_address)
            .and_then(|ring| ring.back().cloned())
    }

    pub fn latest_all(&self) -> BTreeMap<u16, AcquisitionSample> {
        self.samples
            .lock()
            .iter()
            .filter_map(|(addr, ring)| ring.back().map(|s| (*addr, s.clone())))
            .collect()
    }

    /// Clear one register's history, or everything when `None`.
    pub fn clear(&self, register_address: Option<u16>) {
        let mut map = self.samples.lock();
        match register_address {
            Some(addr) => {
                map.remove(&addr);
            },
            None => map.clear(),
        }
    }

    pub fn stats(&self) -> StorageStats {
        let map = self.samples.lock();
        let mut stats = StorageStats::default();

        for (addr, ring) in map.iter() {
            stats.samples_by_register.insert(*addr, ring.len() as u64);
            stats.total_samples += ring.len() as u64;

            if let (Some(front), Some(back)) = (ring.front(), ring.back()) {
                stats.oldest_sample_time = Some(match stats.oldest_sample_time {
                    Some(t) => t.min(front.timestamp),
                    None => front.timestamp,
                });
                stats.newest_sample_time = Some(match stats.newest_sample_time {
                    Some(t) => t.max(back.timestamp),
                    None => back.timestamp,
                });
            }
        }

        stats.storage_size_bytes =
            stats.total_samples * mem::size_of::<AcquisitionSample>() as u64;
        stats
    }
}
