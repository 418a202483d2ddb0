//! Protocol adapter
//!
//! Turns register-level operations into framed HTTP requests against the
//! gateway, applies the retry policy and keeps communication statistics.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{ApiSettings, ModbusSettings};
use crate::error::{LinkError, Result};
use crate::protocol::frame;
use crate::protocol::transport::HttpTransport;
use crate::sample::CommunicationStats;

/// Probe value written during the communication self-test
const SELF_TEST_VALUE: u16 = 50;

/// Modbus-over-HTTP protocol adapter
pub struct ProtocolAdapter {
    transport: Arc<dyn HttpTransport>,
    modbus: ModbusSettings,
    api: ApiSettings,
    stats: Mutex<CommunicationStats>,
}

impl ProtocolAdapter {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        modbus: ModbusSettings,
        api: ApiSettings,
    ) -> Self {
        info!(
            "Protocol adapter initialized with slave address {}",
            modbus.slave_address
        );
        Self {
            transport,
            modbus,
            api,
            stats: Mutex::new(CommunicationStats::default()),
        }
    }

    /// Read `count` holding registers starting at `start_address`.
    pub async fn read_registers(&self, start_address: u16, count: u16) -> Result<Vec<u16>> {
        let request_frame = frame::build_read_frame(self.modbus.slave_address, start_address, count)?;
        debug!("Reading {count} registers starting from address {start_address}");

        let response_frame = self
            .send_request(&self.api.read_endpoint, &request_frame)
            .await?;

        let response = frame::parse_response(&response_frame).map_err(surface_parse_error)?;
        if response.is_error {
            return Err(LinkError::ModbusException {
                code: response.error_code,
            });
        }

        let values = frame::decode_registers(&response.data).map_err(surface_parse_error)?;
        if values.len() != count as usize {
            return Err(LinkError::protocol_mismatch(format!(
                "register count mismatch: expected {count}, got {}",
                values.len()
            )));
        }

        debug!("Successfully read {} registers", values.len());
        Ok(values)
    }

    /// Write a single holding register and verify the echo.
    pub async fn write_register(&self, register_address: u16, value: u16) -> Result<()> {
        let request_frame = frame::build_write_frame(self.modbus.slave_address, register_address, value);
        debug!("Writing value {value} to register {register_address}");

        let response_frame = self
            .send_request(&self.api.write_endpoint, &request_frame)
            .await?;

        let response = frame::parse_response(&response_frame).map_err(surface_parse_error)?;
        if response.is_error {
            return Err(LinkError::ModbusException {
                code: response.error_code,
            });
        }

        // The slave echoes register address and value; require a byte-exact match
        let mut expected = [0u8; 4];
        expected[..2].copy_from_slice(&register_address.to_be_bytes());
        expected[2..].copy_from_slice(&value.to_be_bytes());
        if response.data != expected {
            return Err(LinkError::protocol_mismatch(format!(
                "write echo mismatch: expected {:02X?}, got {:02X?}",
                expected, response.data
            )));
        }

        debug!("Successfully wrote value {value} to register {register_address}");
        Ok(())
    }

    /// Probe the whole read/write path against the inverter.
    ///
    /// Reads two registers from address 0, then writes a test value to the
    /// export-power register and restores the original.
    pub async fn test_communication(&self, export_power_register: u16) -> bool {
        info!("Testing communication with inverter gateway...");

        let probe = async {
            let values = self.read_registers(0, 2).await?;
            debug!("Self-test read returned {} registers", values.len());

            let original = self.read_registers(export_power_register, 1).await?[0];
            debug!("Original export power value: {original}");

            self.write_register(export_power_register, SELF_TEST_VALUE)
                .await?;
            self.write_register(export_power_register, original).await?;
            debug!("Restored original export power value");

            Ok::<(), LinkError>(())
        };

        match probe.await {
            Ok(()) => {
                info!("Communication test completed successfully");
                true
            },
            Err(e) => {
                warn!("Communication test failed: {e}");
                false
            },
        }
    }

    /// Snapshot of the communication statistics.
    pub fn statistics(&self) -> CommunicationStats {
        self.stats.lock().clone()
    }

    pub fn reset_statistics(&self) {
        *self.stats.lock() = CommunicationStats::default();
        debug!("Communication statistics reset");
    }

    /// Send a framed request with retry.
    ///
    /// Transport-level failures (non-2xx status, malformed JSON, absent or
    /// empty `frame` field, connection errors, timeouts) are retried up to
    /// `max_retries` attempts with a fixed inter-attempt delay. Frame parsing
    /// happens in the caller; Modbus exceptions and parse failures are
    /// terminal.
    async fn send_request(&self, endpoint: &str, request_frame: &str) -> Result<String> {
        let payload = serde_json::json!({ "frame": request_frame }).to_string();
        let mut last_error = LinkError::transport("no attempt made");

        for attempt in 0..self.modbus.max_retries {
            if attempt > 0 {
                debug!("Retrying in {}ms...", self.modbus.retry_delay_ms);
                tokio::time::sleep(self.modbus.retry_delay()).await;
            }

            let started = Instant::now();
            match self.try_send(endpoint, &payload).await {
                Ok(response_frame) => {
                    self.record_attempt(true, started.elapsed(), attempt > 0);
                    return Ok(response_frame);
                },
                Err(e) => {
                    self.record_attempt(false, started.elapsed(), attempt > 0);
                    warn!("Request attempt {} failed: {e}", attempt + 1);
                    last_error = e;
                },
            }
        }

        Err(LinkError::transport(format!(
            "request failed after {} attempts, last error: {last_error}",
            self.modbus.max_retries
        )))
    }

    /// One transport attempt: POST the envelope and extract the response frame.
    async fn try_send(&self, endpoint: &str, payload: &str) -> Result<String> {
        let response = self.transport.post(endpoint, payload).await?;

        if !response.is_success() {
            return Err(LinkError::transport(format!(
                "HTTP status {}: {}",
                response.status,
                response.body.trim()
            )));
        }

        let envelope: Value = serde_json::from_str(&response.body)
            .map_err(|e| LinkError::transport(format!("invalid JSON response: {e}")))?;

        match envelope.get("frame").and_then(Value::as_str) {
            Some(response_frame) if !response_frame.is_empty() => Ok(response_frame.to_string()),
            _ => Err(LinkError::transport("missing frame field in response")),
        }
    }

    fn record_attempt(&self, success: bool, elapsed: Duration, was_retry: bool) {
        let mut stats = self.stats.lock();
        stats.total_requests += 1;
        if success {
            stats.successful_requests += 1;
        } else {
            stats.failed_requests += 1;
        }
        if was_retry {
            stats.retry_attempts += 1;
        }

        // Pairwise running mean; adequate for monitoring
        if !elapsed.is_zero() {
            if stats.average_response_time.is_zero() {
                stats.average_response_time = elapsed;
            } else {
                stats.average_response_time = (stats.average_response_time + elapsed) / 2;
            }
        }
    }
}

/// Frame-level parse failures surface as protocol mismatches; everything
/// else passes through untouched.
fn surface_parse_error(err: LinkError) -> LinkError {
    match err {
        LinkError::InvalidFrame(msg) => LinkError::ProtocolMismatch(msg),
        other => other,
    }
}
