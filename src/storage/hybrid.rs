//! Hybrid store facade
//!
//! Routes writes to both tiers, reads to the fastest one, and owns the
//! background retention sweeper for the durable tier.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::sample::AcquisitionSample;
use crate::storage::{CombinedStorageStats, MemoryStore, SqliteStore};

/// Back-off applied after a failed retention sweep
const SWEEP_ERROR_BACKOFF: Duration = Duration::from_secs(30 * 60);

/// Configuration for the two-tier store
#[derive(Debug, Clone)]
pub struct HybridStoreConfig {
    pub memory_capacity: usize,
    pub enable_durable: bool,
    pub cleanup_interval: Duration,
    pub retention_days: u32,
    pub durable_path: String,
}

impl Default for HybridStoreConfig {
    fn default() -> Self {
        Self {
            memory_capacity: 1_000,
            enable_durable: true,
            cleanup_interval: Duration::from_secs(24 * 60 * 60),
            retention_days: 30,
            durable_path: "data/solarlink.db".to_string(),
        }
    }
}

/// Two-tier retention store
pub struct HybridStore {
    config: HybridStoreConfig,
    memory: MemoryStore,
    durable: Option<Arc<SqliteStore>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    cancel: Mutex<CancellationToken>,
}

impl HybridStore {
    /// Build the store, opening the durable tier when enabled.
    pub async fn new(config: HybridStoreConfig) -> Result<Self> {
        let durable = if config.enable_durable {
            Some(Arc::new(SqliteStore::open(&config.durable_path).await?))
        } else {
            None
        };

        info!(
            "Hybrid store initialized (memory capacity {}, durable {})",
            config.memory_capacity,
            if durable.is_some() { "on" } else { "off" }
        );

        Ok(Self {
            memory: MemoryStore::new(config.memory_capacity),
            durable,
            config,
            sweeper: Mutex::new(None),
            cancel: Mutex::new(CancellationToken::new()),
        })
    }

    /// Store one sample: memory unconditionally, durable when enabled.
    pub async fn store(&self, sample: &AcquisitionSample) -> Result<()> {
        self.memory.store(sample);
        if let Some(durable) = &self.durable {
            durable.store(sample).await?;
        }
        Ok(())
    }

    pub async fn store_batch(&self, samples: &[AcquisitionSample]) -> Result<()> {
        self.memory.store_batch(samples);
        if let Some(durable) = &self.durable {
            durable.store_batch(samples).await?;
        }
        Ok(())
    }

    /// Recent samples from the memory tier, newest first.
    pub fn recent(&self, register_address: u16, count: usize) -> Vec<AcquisitionSample> {
        self.memory.samples(register_address, count)
    }

    /// Historical samples from the durable tier, newest first.
    pub async fn historical(
        &self,
        register_address: u16,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AcquisitionSample>> {
        match &self.durable {
            Some(durable) => durable.samples_in_range(register_address, start, end).await,
            None => Ok(self.memory.samples_in_range(register_address, start, end)),
        }
    }

    /// Latest sample for a register: memory first, durable fallback.
    pub async fn latest(&self, register_address: u16) -> Option<AcquisitionSample> {
        if let Some(sample) = self.memory.latest(register_address) {
            return Some(sample);
        }

        if let Some(durable) = &self.durable {
            match durable.samples(register_address, 1).await {
                Ok(mut samples) => return samples.pop(),
                Err(e) => warn!("Durable latest lookup failed for register {register_address}: {e}"),
            }
        }
        None
    }

    /// Latest sample per register from the memory tier only.
    pub fn latest_all(&self) -> BTreeMap<u16, AcquisitionSample> {
        self.memory.latest_all()
    }

    pub fn clear_memory(&self, register_address: Option<u16>) {
        self.memory.clear(register_address);
    }

    pub fn durable_store(&self) -> Option<Arc<SqliteStore>> {
        self.durable.clone()
    }

    pub async fn stats(&self) -> CombinedStorageStats {
        let durable = match &self.durable {
            Some(store) => match store.stats().await {
                Ok(stats) => Some(stats),
                Err(e) => {
                    warn!("Durable stats query failed: {e}");
                    None
                },
            },
            None => None,
        };

        CombinedStorageStats {
            memory: self.memory.stats(),
            durable,
        }
    }

    /// Start the retention sweeper if the configuration calls for one.
    pub fn start_sweeper(&self) {
        let Some(durable) = self.durable.clone() else {
            debug!("Retention sweeper disabled: durable tier is off");
            return;
        };
        if self.config.retention_days == 0 {
            debug!("Retention sweeper disabled: retention horizon is zero");
            return;
        }

        let mut sweeper = self.sweeper.lock();
        if sweeper.is_some() {
            warn!("Retention sweeper already running");
            return;
        }

        let token = CancellationToken::new();
        *self.cancel.lock() = token.clone();

        let interval = self.config.cleanup_interval;
        let retention_days = self.config.retention_days;

        *sweeper = Some(tokio::spawn(async move {
            info!(
                "Retention sweeper started (interval {:?}, horizon {retention_days} days)",
                interval
            );
            loop {
                let sweep = durable.cleanup(retention_days).await;
                if let Err(e) = &sweep {
                    error!("Retention sweep failed: {e}");
                }

                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(next_sweep_delay(&sweep, interval)) => {},
                }
            }
            info!("Retention sweeper stopped");
        }));
    }

    /// Cooperatively stop the sweeper and wait for it to finish.
    pub async fn stop_sweeper(&self) {
        self.cancel.lock().cancel();
        let handle = self.sweeper.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

/// A successful sweep waits the configured interval; a failed sweep always
/// backs off the full 30 minutes before retrying, regardless of how short
/// the interval is.
fn next_sweep_delay(sweep: &Result<u64>, interval: Duration) -> Duration {
    match sweep {
        Ok(_) => interval,
        Err(_) => SWEEP_ERROR_BACKOFF,
    }
}
