//! # Solarlink
//!
//! Client-side acquisition engine for a photovoltaic inverter exposed
//! through a cloud gateway that tunnels Modbus-RTU frames inside HTTP+JSON.
//!
//! The pipeline periodically polls a configured set of holding registers,
//! scales raw 16-bit words into engineering units, retains recent samples in
//! a bounded memory ring, persists history to SQLite for later export, and
//! accepts write commands for controllable registers such as the
//! export-power setpoint.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │  Scheduler   │──►│   Adapter    │──►│ Frame codec  │──► HTTP gateway
//! │ (worker task)│   │ (retry/stats)│   │ (RTU + CRC)  │
//! └──────┬───────┘   └──────────────┘   └──────────────┘
//!        │ sample bus
//!        ▼
//! ┌──────────────┐   ┌──────────────┐
//! │ Hybrid store │──►│ Memory ring  │
//! │  (sweeper)   │──►│ SQLite log   │
//! └──────────────┘   └──────────────┘
//! ```

pub mod acquisition;
pub mod config;
pub mod device;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod registry;
pub mod sample;
pub mod storage;

pub use acquisition::{AcquisitionScheduler, SchedulerState};
pub use config::Settings;
pub use device::{ExportFormat, InverterDevice, SystemStatus};
pub use error::{LinkError, Result};
pub use protocol::{HttpResponse, HttpTransport, ModbusResponse, ProtocolAdapter};
pub use registry::{AccessType, RegisterCatalogue, RegisterConfig};
pub use sample::{AcquisitionSample, AcquisitionStats, CommunicationStats};
pub use storage::{HybridStore, HybridStoreConfig, MemoryStore, SqliteStore};

use tracing::error;

/// Wait for shutdown signal (Ctrl+C or SIGTERM on Unix)
pub async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut term_signal = match signal(SignalKind::terminate()) {
            Ok(sig) => Some(sig),
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}. Responding to Ctrl+C only");
                None
            },
        };

        match term_signal {
            Some(ref mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            },
            None => {
                let _ = tokio::signal::ctrl_c().await;
            },
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
