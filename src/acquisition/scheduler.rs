//! Acquisition scheduler
//!
//! Runs the polling cycle on a background worker: snapshots the configured
//! registers, dispatches grouped reads through the adapter, publishes one
//! sample per address per cycle in ascending address order, and never lets a
//! background error terminate the worker.

use std::collections::{BTreeMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::AcquisitionSettings;
use crate::protocol::adapter::ProtocolAdapter;
use crate::protocol::frame::MAX_READ_REGISTERS;
use crate::registry::{RegisterCatalogue, RegisterConfig};
use crate::sample::{AcquisitionSample, AcquisitionStats};

/// Capacity of the scheduler's internal sample ring
pub const SCHEDULER_RING_CAPACITY: usize = 10_000;

/// Subscriber invoked for every published sample, on the polling worker
pub type SampleCallback = Arc<dyn Fn(&AcquisitionSample) + Send + Sync>;
/// Subscriber invoked for every published acquisition error
pub type ErrorCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Worker state machine: idle -> running -> stopping -> idle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Stopping,
}

/// Background polling scheduler
pub struct AcquisitionScheduler {
    ctx: Arc<PollContext>,
    state: Mutex<SchedulerState>,
    worker: Mutex<Option<JoinHandle<()>>>,
    cancel: Mutex<CancellationToken>,
}

struct PollContext {
    adapter: Arc<ProtocolAdapter>,
    catalogue: Arc<RegisterCatalogue>,
    settings: AcquisitionSettings,
    ring: Mutex<VecDeque<AcquisitionSample>>,
    stats: Mutex<AcquisitionStats>,
    sample_callbacks: Mutex<Vec<SampleCallback>>,
    error_callbacks: Mutex<Vec<ErrorCallback>>,
}

impl AcquisitionScheduler {
    pub fn new(
        adapter: Arc<ProtocolAdapter>,
        catalogue: Arc<RegisterCatalogue>,
        settings: AcquisitionSettings,
    ) -> Self {
        info!(
            "Acquisition scheduler initialized with interval {}ms",
            settings.polling_interval_ms
        );
        Self {
            ctx: Arc::new(PollContext {
                adapter,
                catalogue,
                settings,
                ring: Mutex::new(VecDeque::new()),
                stats: Mutex::new(AcquisitionStats::default()),
                sample_callbacks: Mutex::new(Vec::new()),
                error_callbacks: Mutex::new(Vec::new()),
            }),
            state: Mutex::new(SchedulerState::Idle),
            worker: Mutex::new(None),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.lock()
    }

    /// Register a sample subscriber. Invoked on the polling worker; a
    /// panicking subscriber is isolated and logged.
    pub fn subscribe_sample(&self, callback: impl Fn(&AcquisitionSample) + Send + Sync + 'static) {
        self.ctx.sample_callbacks.lock().push(Arc::new(callback));
    }

    /// Register an error subscriber.
    pub fn subscribe_error(&self, callback: impl Fn(&str) + Send + Sync + 'static) {
        self.ctx.error_callbacks.lock().push(Arc::new(callback));
    }

    /// Start the polling worker. No-op with a warning when not idle.
    pub fn start(&self) {
        let mut state = self.state.lock();
        if *state != SchedulerState::Idle {
            warn!("Acquisition scheduler already polling");
            return;
        }

        let token = CancellationToken::new();
        *self.cancel.lock() = token.clone();
        *self.worker.lock() = Some(tokio::spawn(polling_loop(self.ctx.clone(), token)));
        *state = SchedulerState::Running;

        info!("Acquisition scheduler started");
    }

    /// Request cancellation, join the worker, transition back to idle.
    /// No-op when already idle.
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock();
            if *state != SchedulerState::Running {
                debug!("Acquisition scheduler not running");
                return;
            }
            *state = SchedulerState::Stopping;
        }

        self.cancel.lock().cancel();
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        *self.state.lock() = SchedulerState::Idle;
        info!("Acquisition scheduler stopped");
    }

    /// One manual read. Returns `None` on any failure (logged, not raised).
    pub async fn read_single(&self, address: u16) -> Option<AcquisitionSample> {
        match self.ctx.adapter.read_registers(address, 1).await {
            Ok(values) => {
                let raw = *values.first()?;
                let snapshot = self.ctx.catalogue.all();
                Some(self.ctx.build_sample(&snapshot, address, raw))
            },
            Err(e) => {
                error!("Failed to read register {address}: {e}");
                None
            },
        }
    }

    /// Sequential manual reads; failed addresses are skipped.
    pub async fn read_many(&self, addresses: &[u16]) -> Vec<AcquisitionSample> {
        let mut samples = Vec::with_capacity(addresses.len());
        for &address in addresses {
            if let Some(sample) = self.read_single(address).await {
                samples.push(sample);
            }
        }
        samples
    }

    /// One manual write. Returns `false` on any failure (logged, published).
    pub async fn write(&self, address: u16, value: u16) -> bool {
        match self.ctx.adapter.write_register(address, value).await {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to write register {address}: {e}");
                self.ctx.publish_error(&format!("Write to register {address} failed: {e}"));
                false
            },
        }
    }

    /// Last `count` samples from the ring, oldest first.
    pub fn recent(&self, count: usize) -> Vec<AcquisitionSample> {
        let ring = self.ctx.ring.lock();
        let skip = ring.len().saturating_sub(count);
        ring.iter().skip(skip).cloned().collect()
    }

    /// Last `count` samples for one register, oldest first.
    pub fn by_register(&self, address: u16, count: usize) -> Vec<AcquisitionSample> {
        let ring = self.ctx.ring.lock();
        let mut samples: Vec<AcquisitionSample> = ring
            .iter()
            .rev()
            .filter(|s| s.register_address == address)
            .take(count)
            .cloned()
            .collect();
        samples.reverse();
        samples
    }

    pub fn statistics(&self) -> AcquisitionStats {
        self.ctx.stats.lock().clone()
    }

    pub fn reset_statistics(&self) {
        *self.ctx.stats.lock() = AcquisitionStats::default();
    }
}

async fn polling_loop(ctx: Arc<PollContext>, cancel: CancellationToken) {
    info!("Polling loop started");

    loop {
        if cancel.is_cancelled() {
            break;
        }

        ctx.poll_cycle(&cancel).await;

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(ctx.settings.polling_interval()) => {},
        }
    }

    info!("Polling loop stopped");
}

impl PollContext {
    /// One polling cycle over the configured registers.
    async fn poll_cycle(&self, cancel: &CancellationToken) {
        let snapshot = self.catalogue.all();

        let mut addresses: Vec<u16> = snapshot.keys().copied().collect();
        for &address in &self.settings.minimum_registers {
            if !addresses.contains(&address) {
                addresses.push(address);
            }
        }
        addresses.sort_unstable();
        addresses.dedup();

        let mut acquired = 0usize;
        for (start, count) in group_consecutive(&addresses) {
            if cancel.is_cancelled() {
                return;
            }
            acquired += self.poll_group(&snapshot, start, count, cancel).await;
        }

        let mut stats = self.stats.lock();
        stats.total_polls += 1;
        stats.last_poll_time = Some(Utc::now());
        if acquired > 0 {
            stats.successful_polls += 1;
        } else {
            stats.failed_polls += 1;
            stats.last_error = Some("No samples acquired".to_string());
        }
    }

    /// Read one contiguous group, falling back to single reads when the
    /// grouped request fails so one faulty register cannot starve the rest.
    async fn poll_group(
        &self,
        snapshot: &BTreeMap<u16, RegisterConfig>,
        start: u16,
        count: u16,
        cancel: &CancellationToken,
    ) -> usize {
        if count > 1 {
            match self.adapter.read_registers(start, count).await {
                Ok(values) => {
                    for (offset, &raw) in values.iter().enumerate() {
                        let address = start + offset as u16;
                        self.publish_sample(&self.build_sample(snapshot, address, raw));
                    }
                    return values.len();
                },
                Err(e) => {
                    debug!(
                        "Grouped read of {count} registers at {start} failed ({e}), \
                         falling back to single reads"
                    );
                },
            }
        }

        let mut acquired = 0;
        for offset in 0..count {
            if cancel.is_cancelled() {
                break;
            }
            let address = start + offset;
            match self.adapter.read_registers(address, 1).await {
                Ok(values) => {
                    if let Some(&raw) = values.first() {
                        self.publish_sample(&self.build_sample(snapshot, address, raw));
                        acquired += 1;
                    }
                },
                Err(e) => {
                    error!("Failed to read register {address}: {e}");
                    self.publish_error(&format!("Failed to read register {address}: {e}"));
                },
            }
        }
        acquired
    }

    /// Build a sample from the catalogue snapshot; addresses polled without
    /// catalogue metadata fall back to name "Unknown", no unit, gain 1.
    fn build_sample(
        &self,
        snapshot: &BTreeMap<u16, RegisterConfig>,
        address: u16,
        raw: u16,
    ) -> AcquisitionSample {
        match snapshot.get(&address) {
            Some(config) => AcquisitionSample::new(
                Utc::now(),
                address,
                config.name.clone(),
                raw,
                config.gain,
                config.unit.clone(),
            ),
            None => AcquisitionSample::new(Utc::now(), address, "Unknown", raw, 1.0, ""),
        }
    }

    /// Publish to subscribers, then append to the ring.
    fn publish_sample(&self, sample: &AcquisitionSample) {
        let callbacks: Vec<SampleCallback> = self.sample_callbacks.lock().clone();
        for callback in callbacks {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback(sample))) {
                error!("Sample subscriber panicked: {}", panic_message(payload.as_ref()));
            }
        }

        let mut ring = self.ring.lock();
        ring.push_back(sample.clone());
        while ring.len() > SCHEDULER_RING_CAPACITY {
            ring.pop_front();
        }
    }

    fn publish_error(&self, message: &str) {
        let callbacks: Vec<ErrorCallback> = self.error_callbacks.lock().clone();
        for callback in callbacks {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback(message))) {
                error!("Error subscriber panicked: {}", panic_message(payload.as_ref()));
            }
        }
    }
}

/// Merge sorted, deduplicated addresses into contiguous `(start, count)`
/// runs, each capped at the Modbus read limit.
fn group_consecutive(addresses: &[u16]) -> Vec<(u16, u16)> {
    let mut groups = Vec::new();
    let mut iter = addresses.iter().copied();
    let Some(first) = iter.next() else {
        return groups;
    };

    let mut start = first;
    let mut count: u16 = 1;
    for address in iter {
        let next = u32::from(start) + u32::from(count);
        if u32::from(address) == next && count < MAX_READ_REGISTERS {
            count += 1;
        } else {
            groups.push((start, count));
            start = address;
            count = 1;
        }
    }
    groups.push((start, count));
    groups
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
