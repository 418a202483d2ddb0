//! Modbus-RTU over HTTP protocol stack
//!
//! `frame` builds and parses RTU frames, `transport` carries them inside the
//! HTTP+JSON envelope, `adapter` exposes register-level operations with retry
//! and statistics.

pub mod adapter;
pub mod frame;
pub mod transport;

pub use adapter::ProtocolAdapter;
pub use frame::ModbusResponse;
pub use transport::{HttpResponse, HttpTransport, ReqwestTransport};
