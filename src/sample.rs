//! Sample value object and statistics blocks

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One scaled measurement at a timestamp for one register address.
///
/// Immutable once stored. The timestamp is set when the response is decoded,
/// not when the request was issued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionSample {
    pub timestamp: DateTime<Utc>,
    pub register_address: u16,
    /// Snapshot of the catalogue name at read time
    pub register_name: String,
    pub raw_value: u16,
    pub scaled_value: f64,
    pub unit: String,
}

impl AcquisitionSample {
    /// Build a sample from a raw register word, applying the scaling law.
    pub fn new(
        timestamp: DateTime<Utc>,
        register_address: u16,
        register_name: impl Into<String>,
        raw_value: u16,
        gain: f64,
        unit: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            register_address,
            register_name: register_name.into(),
            raw_value,
            scaled_value: scale_value(raw_value, gain),
            unit: unit.into(),
        }
    }
}

/// Scaling law: gain is a divisor, zero means "no scaling".
pub fn scale_value(raw: u16, gain: f64) -> f64 {
    if gain != 0.0 {
        f64::from(raw) / gain
    } else {
        f64::from(raw)
    }
}

/// Per-adapter communication statistics
#[derive(Debug, Clone, Default)]
pub struct CommunicationStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub retry_attempts: u64,
    pub average_response_time: Duration,
}

impl CommunicationStats {
    pub fn success_rate(&self) -> f64 {
        if self.total_requests > 0 {
            self.successful_requests as f64 / self.total_requests as f64
        } else {
            0.0
        }
    }
}

/// Per-scheduler acquisition statistics
#[derive(Debug, Clone, Default)]
pub struct AcquisitionStats {
    pub total_polls: u64,
    pub successful_polls: u64,
    pub failed_polls: u64,
    pub last_poll_time: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl AcquisitionStats {
    pub fn success_rate(&self) -> f64 {
        if self.total_polls > 0 {
            self.successful_polls as f64 / self.total_polls as f64
        } else {
            0.0
        }
    }
}
