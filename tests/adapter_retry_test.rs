//! Adapter-level integration tests: envelope handling, retry policy and
//! communication statistics against stub transports.

mod common;

use std::sync::Arc;

use solarlink::config::{ApiSettings, ModbusSettings};
use solarlink::{LinkError, ProtocolAdapter};

use common::{
    exception_frame, ok_response, read_response_frame, write_echo_frame, FailingTransport,
    ScriptedTransport, SimGateway,
};

fn fast_modbus() -> ModbusSettings {
    ModbusSettings {
        slave_address: 0x11,
        timeout_ms: 1_000,
        max_retries: 3,
        retry_delay_ms: 10,
    }
}

fn api() -> ApiSettings {
    ApiSettings {
        api_key: "test-key".to_string(),
        ..ApiSettings::default()
    }
}

fn adapter_with<T: solarlink::HttpTransport + 'static>(transport: Arc<T>) -> ProtocolAdapter {
    ProtocolAdapter::new(transport, fast_modbus(), api())
}

#[tokio::test]
async fn test_read_registers_round_trip() {
    let gateway = Arc::new(SimGateway::new());
    gateway.set_register(0, 0x09C4);
    gateway.set_register(1, 0x044E);

    let adapter = adapter_with(gateway.clone());
    let values = adapter.read_registers(0, 2).await.unwrap();
    assert_eq!(values, vec![0x09C4, 0x044E]);

    let stats = adapter.statistics();
    assert_eq!(stats.total_requests, 1);
    assert_eq!(stats.successful_requests, 1);
    assert_eq!(stats.failed_requests, 0);
    assert_eq!(stats.retry_attempts, 0);
}

#[tokio::test]
async fn test_read_count_validation() {
    let adapter = adapter_with(Arc::new(SimGateway::new()));
    assert!(matches!(
        adapter.read_registers(0, 0).await,
        Err(LinkError::InvalidArgument(_))
    ));
    assert!(matches!(
        adapter.read_registers(0, 126).await,
        Err(LinkError::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn test_write_register_updates_gateway() {
    let gateway = Arc::new(SimGateway::new());
    let adapter = adapter_with(gateway.clone());

    adapter.write_register(8, 75).await.unwrap();
    assert_eq!(gateway.register(8), 75);
}

#[tokio::test]
async fn test_retry_exhaustion_statistics() {
    let transport = Arc::new(FailingTransport::new(500));
    let adapter = adapter_with(transport.clone());

    let result = adapter.read_registers(0, 1).await;
    assert!(matches!(result, Err(LinkError::Transport(_))));

    // Exactly max_retries attempts reached the transport
    assert_eq!(transport.request_count(), 3);

    let stats = adapter.statistics();
    assert_eq!(stats.total_requests, 3);
    assert_eq!(stats.failed_requests, 3);
    assert_eq!(stats.successful_requests, 0);
    assert_eq!(stats.retry_attempts, 2);
    assert_eq!(
        stats.total_requests,
        stats.successful_requests + stats.failed_requests
    );
}

#[tokio::test]
async fn test_success_after_transient_failure() {
    let transport = Arc::new(ScriptedTransport::new(vec![
        common::error_response(503),
        ok_response(&read_response_frame(0x11, &[0x1234])),
    ]));
    let adapter = adapter_with(transport.clone());

    let values = adapter.read_registers(0, 1).await.unwrap();
    assert_eq!(values, vec![0x1234]);
    assert_eq!(transport.request_count(), 2);

    let stats = adapter.statistics();
    assert_eq!(stats.total_requests, 2);
    assert_eq!(stats.successful_requests, 1);
    assert_eq!(stats.failed_requests, 1);
    assert_eq!(stats.retry_attempts, 1);
}

#[tokio::test]
async fn test_modbus_exception_is_terminal() {
    let transport = Arc::new(ScriptedTransport::new(vec![ok_response(&exception_frame(
        0x11, 0x03, 0x02,
    ))]));
    let adapter = adapter_with(transport.clone());

    let result = adapter.read_registers(0, 1).await;
    match result {
        Err(LinkError::ModbusException { code }) => assert_eq!(code, 0x02),
        other => panic!("expected ModbusException, got {other:?}"),
    }

    // Exceptions are never retried
    assert_eq!(transport.request_count(), 1);
}

#[tokio::test]
async fn test_missing_frame_field_is_retried() {
    let empty = solarlink::HttpResponse {
        status: 200,
        body: "{}".to_string(),
        headers: Default::default(),
    };
    let transport = Arc::new(ScriptedTransport::new(vec![
        empty.clone(),
        empty.clone(),
        empty,
    ]));
    let adapter = adapter_with(transport.clone());

    let result = adapter.read_registers(0, 1).await;
    assert!(matches!(result, Err(LinkError::Transport(_))));
    assert_eq!(transport.request_count(), 3);
}

#[tokio::test]
async fn test_invalid_json_is_retried() {
    let garbled = solarlink::HttpResponse {
        status: 200,
        body: "not json at all".to_string(),
        headers: Default::default(),
    };
    let transport = Arc::new(ScriptedTransport::new(vec![
        garbled,
        ok_response(&read_response_frame(0x11, &[7])),
    ]));
    let adapter = adapter_with(transport.clone());

    assert_eq!(adapter.read_registers(0, 1).await.unwrap(), vec![7]);
    assert_eq!(transport.request_count(), 2);
}

#[tokio::test]
async fn test_register_count_mismatch() {
    // Gateway answers with one register although two were requested
    let transport = Arc::new(ScriptedTransport::new(vec![ok_response(
        &read_response_frame(0x11, &[1]),
    )]));
    let adapter = adapter_with(transport);

    assert!(matches!(
        adapter.read_registers(0, 2).await,
        Err(LinkError::ProtocolMismatch(_))
    ));
}

#[tokio::test]
async fn test_write_echo_mismatch_rejected() {
    // Echo carries value 0x0065 instead of the written 0x0064
    let transport = Arc::new(ScriptedTransport::new(vec![ok_response(&write_echo_frame(
        0x11, 0x0008, 0x0065,
    ))]));
    let adapter = adapter_with(transport.clone());

    let result = adapter.write_register(0x0008, 0x0064).await;
    assert!(matches!(result, Err(LinkError::ProtocolMismatch(_))));
    assert_eq!(transport.request_count(), 1);
}

#[tokio::test]
async fn test_corrupt_frame_surfaces_as_protocol_mismatch() {
    // Valid envelope, CRC-damaged frame: terminal, never retried
    let transport = Arc::new(ScriptedTransport::new(vec![ok_response(
        "110300000002C69C",
    )]));
    let adapter = adapter_with(transport.clone());

    assert!(matches!(
        adapter.read_registers(0, 2).await,
        Err(LinkError::ProtocolMismatch(_))
    ));
    assert_eq!(transport.request_count(), 1);
}

#[tokio::test]
async fn test_communication_self_test() {
    let gateway = Arc::new(SimGateway::new());
    gateway.set_register(8, 90);

    let adapter = adapter_with(gateway.clone());
    assert!(adapter.test_communication(8).await);

    // Original export-power value restored after the probe write
    assert_eq!(gateway.register(8), 90);
}

#[tokio::test]
async fn test_communication_self_test_fails_on_dead_transport() {
    let adapter = adapter_with(Arc::new(FailingTransport::new(500)));
    assert!(!adapter.test_communication(8).await);
}

#[tokio::test]
async fn test_reset_statistics() {
    let gateway = Arc::new(SimGateway::new());
    let adapter = adapter_with(gateway);

    adapter.read_registers(0, 1).await.unwrap();
    assert_eq!(adapter.statistics().total_requests, 1);

    adapter.reset_statistics();
    let stats = adapter.statistics();
    assert_eq!(stats.total_requests, 0);
    assert_eq!(stats.successful_requests, 0);
}
