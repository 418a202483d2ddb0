//! Inverter device facade
//!
//! Owns one catalogue, one adapter, one scheduler and one hybrid store, and
//! wires acquired samples into the store through a bounded channel so the
//! polling worker never blocks on storage I/O.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::acquisition::AcquisitionScheduler;
use crate::config::Settings;
use crate::error::{LinkError, Result};
use crate::protocol::adapter::ProtocolAdapter;
use crate::protocol::transport::{HttpTransport, ReqwestTransport};
use crate::registry::{RegisterCatalogue, RegisterConfig};
use crate::sample::{AcquisitionSample, AcquisitionStats, CommunicationStats};
use crate::storage::{CombinedStorageStats, HybridStore, HybridStoreConfig};

/// Capacity of the sample channel between the polling worker and storage
const STORAGE_CHANNEL_CAPACITY: usize = 4_096;

/// Export file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

/// Point-in-time view of the whole engine
#[derive(Debug, Clone)]
pub struct SystemStatus {
    pub is_running: bool,
    pub acquisition: AcquisitionStats,
    pub communication: CommunicationStats,
    pub storage: CombinedStorageStats,
    pub timestamp: DateTime<Utc>,
}

/// Facade over the acquisition engine
pub struct InverterDevice {
    settings: Settings,
    catalogue: Arc<RegisterCatalogue>,
    adapter: Arc<ProtocolAdapter>,
    scheduler: AcquisitionScheduler,
    store: Arc<HybridStore>,
    storage_task: Mutex<Option<JoinHandle<()>>>,
    storage_cancel: CancellationToken,
    running: AtomicBool,
}

impl InverterDevice {
    /// Build the device from validated settings with the production
    /// transport.
    pub async fn new(settings: Settings) -> Result<Self> {
        let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new(
            &settings.api,
            settings.modbus.timeout(),
        )?);
        Self::with_transport(settings, transport).await
    }

    /// Build the device against an arbitrary transport (tests use stubs).
    pub async fn with_transport(
        settings: Settings,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self> {
        settings.validate()?;

        let catalogue = Arc::new(RegisterCatalogue::from_map(settings.register_map()?));
        let adapter = Arc::new(ProtocolAdapter::new(
            transport,
            settings.modbus.clone(),
            settings.api.clone(),
        ));

        let store = Arc::new(
            HybridStore::new(HybridStoreConfig {
                memory_capacity: settings.acquisition.max_samples_per_register,
                enable_durable: settings.storage.enable_persistent_storage,
                cleanup_interval: settings.storage.cleanup_interval(),
                retention_days: settings.storage.data_retention_days,
                durable_path: settings.storage.database_path.clone(),
            })
            .await?,
        );

        if let Some(durable) = store.durable_store() {
            durable.store_register_configs(&catalogue.all()).await?;
        }

        let scheduler = AcquisitionScheduler::new(
            adapter.clone(),
            catalogue.clone(),
            settings.acquisition.clone(),
        );

        let device = Self {
            settings,
            catalogue,
            adapter,
            scheduler,
            store,
            storage_task: Mutex::new(None),
            storage_cancel: CancellationToken::new(),
            running: AtomicBool::new(false),
        };
        device.wire_subscribers();
        device.store.start_sweeper();

        info!("Inverter device initialized");
        Ok(device)
    }

    /// Forward published samples into the store and published errors into
    /// the log, without blocking the polling worker.
    fn wire_subscribers(&self) {
        let (tx, mut rx) = mpsc::channel::<AcquisitionSample>(STORAGE_CHANNEL_CAPACITY);

        self.scheduler.subscribe_sample(move |sample| {
            if tx.try_send(sample.clone()).is_err() {
                warn!(
                    "Storage channel full, dropping sample for register {}",
                    sample.register_address
                );
            }
        });

        self.scheduler.subscribe_error(|message| {
            error!("Acquisition error: {message}");
        });

        let store = self.store.clone();
        let cancel = self.storage_cancel.clone();
        *self.storage_task.lock() = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = rx.recv() => match received {
                        Some(sample) => {
                            if let Err(e) = store.store(&sample).await {
                                error!(
                                    "Failed to store sample for register {}: {e}",
                                    sample.register_address
                                );
                            }
                        },
                        None => break,
                    },
                    _ = cancel.cancelled() => break,
                }
            }
        }));
    }

    /// Run the communication self-test and start background polling.
    pub async fn start_acquisition(&self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            warn!("Inverter device already running");
            return Ok(());
        }

        if !self
            .adapter
            .test_communication(self.settings.acquisition.export_power_register)
            .await
        {
            return Err(LinkError::transport(
                "communication test failed, refusing to start acquisition",
            ));
        }

        self.scheduler.start();
        self.running.store(true, Ordering::SeqCst);
        info!("Inverter device acquisition started");
        Ok(())
    }

    /// Stop background polling. The storage task and sweeper keep running
    /// until `shutdown`.
    pub async fn stop_acquisition(&self) {
        if !self.running.load(Ordering::SeqCst) {
            warn!("Inverter device not running");
            return;
        }

        self.scheduler.stop().await;
        self.running.store(false, Ordering::SeqCst);
        info!("Inverter device acquisition stopped");
    }

    /// Full teardown: polling worker, retention sweeper, storage task.
    pub async fn shutdown(&self) {
        if self.running.load(Ordering::SeqCst) {
            self.stop_acquisition().await;
        }
        self.store.stop_sweeper().await;

        self.storage_cancel.cancel();
        let handle = self.storage_task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        info!("Inverter device shut down");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Cap the power pushed to the grid, as a percentage 0-100.
    pub async fn set_export_power(&self, percent: u8) -> bool {
        if percent > 100 {
            error!("Invalid export power percentage: {percent}% (must be 0-100)");
            return false;
        }

        let register = self.settings.acquisition.export_power_register;
        let ok = self.scheduler.write(register, u16::from(percent)).await;
        if ok {
            info!("Export power set to {percent}%");
        } else {
            error!("Failed to set export power to {percent}%");
        }
        ok
    }

    /// Manual read of every catalogue register; failures are skipped.
    pub async fn current_readings(&self) -> Vec<AcquisitionSample> {
        self.scheduler.read_many(&self.catalogue.addresses()).await
    }

    /// Latest sample for a register (memory tier with durable fallback).
    pub async fn latest(&self, register_address: u16) -> Option<AcquisitionSample> {
        self.store.latest(register_address).await
    }

    /// Recent samples from the memory tier, newest first.
    pub fn recent_samples(&self, register_address: u16, count: usize) -> Vec<AcquisitionSample> {
        self.store.recent(register_address, count)
    }

    /// Historical samples from the durable tier, newest first.
    pub async fn historical(
        &self,
        register_address: u16,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AcquisitionSample>> {
        self.store.historical(register_address, start, end).await
    }

    /// Export a time window from the durable tier. Returns the row count.
    pub async fn export_data(
        &self,
        path: impl AsRef<Path>,
        format: ExportFormat,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<u64> {
        let durable = self
            .store
            .durable_store()
            .ok_or_else(|| LinkError::storage("persistent storage is disabled"))?;

        match format {
            ExportFormat::Csv => durable.export_csv(path, &[], start, end).await,
            ExportFormat::Json => durable.export_json(path, &[], start, end).await,
        }
    }

    pub async fn system_status(&self) -> SystemStatus {
        SystemStatus {
            is_running: self.is_running(),
            acquisition: self.scheduler.statistics(),
            communication: self.adapter.statistics(),
            storage: self.store.stats().await,
            timestamp: Utc::now(),
        }
    }

    /// Insert or replace a register configuration; picked up by the next
    /// polling cycle.
    pub fn set_register_config(&self, address: u16, config: RegisterConfig) -> Result<()> {
        self.catalogue.set(address, config)
    }

    pub fn register_configs(&self) -> BTreeMap<u16, RegisterConfig> {
        self.catalogue.all()
    }

    /// Manual-operation surface (probe reads, writes, ring read-back).
    pub fn scheduler(&self) -> &AcquisitionScheduler {
        &self.scheduler
    }

    pub fn store(&self) -> &HybridStore {
        &self.store
    }
}
