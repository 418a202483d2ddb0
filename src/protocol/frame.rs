//! Modbus-RTU frame codec
//!
//! Builds request frames, parses response frames and validates their
//! integrity. Frames travel as uppercase hex strings inside the gateway's
//! JSON envelope; the CRC-16 (poly 0xA001, init 0xFFFF) is appended
//! little-endian per the RTU standard.

use tracing::{debug, trace};

use crate::error::{LinkError, Result};

/// Function code for read-holding-registers
pub const READ_HOLDING_REGISTERS: u8 = 0x03;
/// Function code for write-single-register
pub const WRITE_SINGLE_REGISTER: u8 = 0x06;
/// High bit marking an exception response
pub const EXCEPTION_BIT: u8 = 0x80;
/// Maximum registers per read request
pub const MAX_READ_REGISTERS: u16 = 125;
/// Smallest valid RTU frame: slave + function code + 1 data byte + CRC
pub const MIN_FRAME_LEN: usize = 5;

/// Decoded Modbus response frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModbusResponse {
    pub slave_address: u8,
    /// Function code with the exception bit stripped
    pub function_code: u8,
    pub data: Vec<u8>,
    pub is_error: bool,
    /// Zero on success
    pub error_code: u8,
}

/// Calculate the Modbus CRC-16 over `data`.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;

    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc >>= 1;
                crc ^= 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }

    crc
}

/// Encode bytes as uppercase hex.
pub fn encode_hex(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 2);
    for byte in data {
        out.push_str(&format!("{byte:02X}"));
    }
    out
}

/// Decode a hex string (upper or lower case) into bytes.
pub fn decode_hex(hex: &str) -> Result<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return Err(LinkError::invalid_frame("hex string length must be even"));
    }

    let mut bytes = Vec::with_capacity(hex.len() / 2);
    let raw = hex.as_bytes();
    for pair in raw.chunks_exact(2) {
        let high = hex_value(pair[0])?;
        let low = hex_value(pair[1])?;
        bytes.push((high << 4) | low);
    }
    Ok(bytes)
}

fn hex_value(c: u8) -> Result<u8> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        _ => Err(LinkError::invalid_frame(format!(
            "invalid hex character: {:?}",
            c as char
        ))),
    }
}

fn build_frame(slave_address: u8, function_code: u8, data: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(2 + data.len() + 2);
    frame.push(slave_address);
    frame.push(function_code);
    frame.extend_from_slice(data);

    let crc = crc16(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    frame
}

/// Build a read-holding-registers request frame as uppercase hex.
///
/// `count` must be in `1..=125`.
pub fn build_read_frame(slave_address: u8, start_address: u16, count: u16) -> Result<String> {
    if count == 0 || count > MAX_READ_REGISTERS {
        return Err(LinkError::invalid_argument(format!(
            "register count {count} out of range 1..={MAX_READ_REGISTERS}"
        )));
    }

    let mut data = [0u8; 4];
    data[..2].copy_from_slice(&start_address.to_be_bytes());
    data[2..].copy_from_slice(&count.to_be_bytes());

    let frame_hex = encode_hex(&build_frame(slave_address, READ_HOLDING_REGISTERS, &data));
    trace!("Built read frame: {frame_hex}");
    Ok(frame_hex)
}

/// Build a write-single-register request frame as uppercase hex.
pub fn build_write_frame(slave_address: u8, register_address: u16, value: u16) -> String {
    let mut data = [0u8; 4];
    data[..2].copy_from_slice(&register_address.to_be_bytes());
    data[2..].copy_from_slice(&value.to_be_bytes());

    let frame_hex = encode_hex(&build_frame(slave_address, WRITE_SINGLE_REGISTER, &data));
    trace!("Built write frame: {frame_hex}");
    frame_hex
}

/// Validate frame length and CRC.
pub fn validate_frame(frame: &[u8]) -> bool {
    if frame.len() < MIN_FRAME_LEN {
        return false;
    }

    let received = u16::from_le_bytes([frame[frame.len() - 2], frame[frame.len() - 1]]);
    let calculated = crc16(&frame[..frame.len() - 2]);

    if received != calculated {
        debug!("CRC validation failed: received=0x{received:04X}, calculated=0x{calculated:04X}");
        return false;
    }
    true
}

/// Parse a response frame from its hex representation.
pub fn parse_response(frame_hex: &str) -> Result<ModbusResponse> {
    if frame_hex.is_empty() {
        return Err(LinkError::invalid_frame("empty response frame"));
    }

    trace!("Parsing response frame: {frame_hex}");
    let frame = decode_hex(frame_hex)?;

    if frame.len() < MIN_FRAME_LEN {
        return Err(LinkError::invalid_frame(format!(
            "frame too short: {} bytes (minimum {MIN_FRAME_LEN})",
            frame.len()
        )));
    }
    if !validate_frame(&frame) {
        return Err(LinkError::invalid_frame("CRC validation failed"));
    }

    let slave_address = frame[0];
    let function_code = frame[1];

    if function_code & EXCEPTION_BIT != 0 {
        let error_code = frame[2];
        debug!(
            "Modbus exception response: {} (0x{error_code:02X})",
            exception_message(error_code)
        );
        return Ok(ModbusResponse {
            slave_address,
            function_code: function_code & !EXCEPTION_BIT,
            data: Vec::new(),
            is_error: true,
            error_code,
        });
    }

    let data = match function_code {
        READ_HOLDING_REGISTERS => {
            let byte_count = frame[2] as usize;
            if frame.len() < 3 + byte_count + 2 {
                return Err(LinkError::invalid_frame(format!(
                    "frame size {} does not match byte count {byte_count}",
                    frame.len()
                )));
            }
            frame[3..3 + byte_count].to_vec()
        },
        // Write responses echo addr+value; unknown codes are passed through
        _ => frame[2..frame.len() - 2].to_vec(),
    };

    trace!(
        "Parsed response: slave={slave_address}, func=0x{function_code:02X} ({}), data_len={}",
        function_description(function_code),
        data.len()
    );

    Ok(ModbusResponse {
        slave_address,
        function_code,
        data,
        is_error: false,
        error_code: 0,
    })
}

/// Decode big-endian register words from response data.
pub fn decode_registers(data: &[u8]) -> Result<Vec<u16>> {
    if data.len() % 2 != 0 {
        return Err(LinkError::invalid_frame(format!(
            "register data length {} is not even",
            data.len()
        )));
    }

    Ok(data
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect())
}

/// Human-readable name of a function code (exception bit ignored).
pub fn function_description(function_code: u8) -> &'static str {
    match function_code & !EXCEPTION_BIT {
        0x01 => "Read Coils",
        0x02 => "Read Discrete Inputs",
        READ_HOLDING_REGISTERS => "Read Holding Registers",
        0x04 => "Read Input Registers",
        0x05 => "Write Single Coil",
        WRITE_SINGLE_REGISTER => "Write Single Register",
        0x0F => "Write Multiple Coils",
        0x10 => "Write Multiple Registers",
        _ => "Unknown Function",
    }
}

/// Human-readable description of a Modbus exception code.
pub fn exception_message(code: u8) -> &'static str {
    match code {
        0x01 => "Illegal Function",
        0x02 => "Illegal Data Address",
        0x03 => "Illegal Data Value",
        0x04 => "Slave Device Failure",
        0x05 => "Acknowledge",
        0x06 => "Slave Device Busy",
        0x08 => "Memory Parity Error",
        0x0A => "Gateway Path Unavailable",
        0x0B => "Gateway Target Device Failed to Respond",
        _ => "Unknown Error",
    }
}
