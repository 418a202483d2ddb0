//! Shared test doubles: a simulated inverter gateway plus scripted and
//! always-failing transports.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use solarlink::error::Result;
use solarlink::protocol::frame;
use solarlink::{HttpResponse, HttpTransport};

/// Wrap a frame in the gateway's JSON envelope.
pub fn envelope(frame_hex: &str) -> String {
    serde_json::json!({ "frame": frame_hex }).to_string()
}

pub fn ok_response(frame_hex: &str) -> HttpResponse {
    HttpResponse {
        status: 200,
        body: envelope(frame_hex),
        headers: HashMap::new(),
    }
}

pub fn error_response(status: u16) -> HttpResponse {
    HttpResponse {
        status,
        body: "internal error".to_string(),
        headers: HashMap::new(),
    }
}

fn finish_frame(mut bytes: Vec<u8>) -> String {
    let crc = frame::crc16(&bytes);
    bytes.extend_from_slice(&crc.to_le_bytes());
    frame::encode_hex(&bytes)
}

/// Build a read-holding-registers response frame.
pub fn read_response_frame(slave: u8, values: &[u16]) -> String {
    let mut bytes = vec![slave, 0x03, (values.len() * 2) as u8];
    for value in values {
        bytes.extend_from_slice(&value.to_be_bytes());
    }
    finish_frame(bytes)
}

/// Build a write-single-register echo frame.
pub fn write_echo_frame(slave: u8, address: u16, value: u16) -> String {
    let mut bytes = vec![slave, 0x06];
    bytes.extend_from_slice(&address.to_be_bytes());
    bytes.extend_from_slice(&value.to_be_bytes());
    finish_frame(bytes)
}

/// Build an exception response frame.
pub fn exception_frame(slave: u8, function_code: u8, error_code: u8) -> String {
    finish_frame(vec![slave, function_code | 0x80, error_code])
}

/// In-memory inverter gateway speaking the HTTP+JSON envelope.
pub struct SimGateway {
    registers: Mutex<HashMap<u16, u16>>,
    pub requests: AtomicU32,
    /// When set, grouped reads (count > 1) fail with HTTP 500
    pub fail_grouped_reads: AtomicBool,
}

impl Default for SimGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl SimGateway {
    pub fn new() -> Self {
        Self {
            registers: Mutex::new(HashMap::new()),
            requests: AtomicU32::new(0),
            fail_grouped_reads: AtomicBool::new(false),
        }
    }

    pub fn set_register(&self, address: u16, value: u16) {
        self.registers.lock().insert(address, value);
    }

    pub fn register(&self, address: u16) -> u16 {
        self.registers.lock().get(&address).copied().unwrap_or(0)
    }

    pub fn request_count(&self) -> u32 {
        self.requests.load(Ordering::SeqCst)
    }

    fn handle_frame(&self, request_hex: &str) -> std::result::Result<String, u16> {
        let bytes = frame::decode_hex(request_hex).expect("simulator received invalid hex");
        assert!(
            frame::validate_frame(&bytes),
            "simulator received frame with bad CRC"
        );

        let slave = bytes[0];
        match bytes[1] {
            0x03 => {
                let start = u16::from_be_bytes([bytes[2], bytes[3]]);
                let count = u16::from_be_bytes([bytes[4], bytes[5]]);
                if count > 1 && self.fail_grouped_reads.load(Ordering::SeqCst) {
                    return Err(500);
                }
                let registers = self.registers.lock();
                let values: Vec<u16> = (0..count)
                    .map(|offset| {
                        registers
                            .get(&(start + offset))
                            .copied()
                            .unwrap_or_default()
                    })
                    .collect();
                Ok(read_response_frame(slave, &values))
            },
            0x06 => {
                let address = u16::from_be_bytes([bytes[2], bytes[3]]);
                let value = u16::from_be_bytes([bytes[4], bytes[5]]);
                self.registers.lock().insert(address, value);
                // Echo the request back
                Ok(request_hex.to_uppercase())
            },
            fc => Ok(exception_frame(slave, fc, 0x01)),
        }
    }
}

#[async_trait]
impl HttpTransport for SimGateway {
    async fn post(&self, _endpoint: &str, body: &str) -> Result<HttpResponse> {
        self.requests.fetch_add(1, Ordering::SeqCst);

        let value: serde_json::Value = serde_json::from_str(body).expect("request body is JSON");
        let request_frame = value["frame"].as_str().expect("request carries a frame");

        Ok(match self.handle_frame(request_frame) {
            Ok(response_frame) => ok_response(&response_frame),
            Err(status) => error_response(status),
        })
    }

    async fn get(&self, _endpoint: &str) -> Result<HttpResponse> {
        Ok(HttpResponse {
            status: 200,
            body: "{}".to_string(),
            headers: HashMap::new(),
        })
    }
}

/// Transport that always answers with the same HTTP status.
pub struct FailingTransport {
    pub status: u16,
    pub requests: AtomicU32,
}

impl FailingTransport {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            requests: AtomicU32::new(0),
        }
    }

    pub fn request_count(&self) -> u32 {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpTransport for FailingTransport {
    async fn post(&self, _endpoint: &str, _body: &str) -> Result<HttpResponse> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        Ok(error_response(self.status))
    }

    async fn get(&self, _endpoint: &str) -> Result<HttpResponse> {
        Ok(error_response(self.status))
    }
}

/// Transport that replays a fixed response sequence, then returns HTTP 500.
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<HttpResponse>>,
    pub requests: AtomicU32,
}

impl ScriptedTransport {
    pub fn new(responses: Vec<HttpResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: AtomicU32::new(0),
        }
    }

    pub fn request_count(&self) -> u32 {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn post(&self, _endpoint: &str, _body: &str) -> Result<HttpResponse> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| error_response(500)))
    }

    async fn get(&self, _endpoint: &str) -> Result<HttpResponse> {
        Ok(error_response(500))
    }
}
