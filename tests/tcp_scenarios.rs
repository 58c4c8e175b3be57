//! End-to-end exchanges between the TCP client and an in-process slave

mod common;

use std::time::{Duration, Instant};

use common::{Behavior, TestSlave};
use voltage_modbus_blocking::{
    ErrorKind, ErrorRecoveryMode, ModbusClient, ModbusError, ModbusTcpClient,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn connected_client(slave: &TestSlave) -> ModbusTcpClient {
    init_tracing();
    let mut client = ModbusTcpClient::new_tcp(&slave.host(), slave.port()).unwrap();
    client.set_response_timeout(Duration::from_secs(2)).unwrap();
    client.connect().unwrap();
    client
}

#[test]
fn test_write_then_read_registers() {
    let slave = TestSlave::start(Behavior::Normal);
    let mut client = connected_client(&slave);

    let values: Vec<u16> = (1..=10).collect();
    client.write_multiple_registers(102, &values).unwrap();

    assert_eq!(client.read_holding_registers(102, 10).unwrap(), values);
    assert_eq!(client.read_holding_register(105).unwrap(), 4);
}

#[test]
fn test_write_then_read_bits() {
    let slave = TestSlave::start(Behavior::Normal);
    let mut client = connected_client(&slave);

    let bits = [false, true, false, true];
    client.write_multiple_coils(104, &bits).unwrap();

    assert_eq!(client.read_coils(104, 4).unwrap(), bits.to_vec());
}

#[test]
fn test_single_writes() {
    let slave = TestSlave::start(Behavior::Normal);
    let mut client = connected_client(&slave);

    client.write_single_coil(7, true).unwrap();
    client.write_single_register(8, 0xBEEF).unwrap();

    assert!(slave.with_bank(|bank| bank.coils[7]));
    assert_eq!(client.read_holding_register(8).unwrap(), 0xBEEF);
}

#[test]
fn test_read_only_tables() {
    let slave = TestSlave::start(Behavior::Normal);
    slave.with_bank(|bank| {
        bank.discrete_inputs[3] = true;
        bank.input_registers[20] = 0x1234;
        bank.input_registers[21] = 0x5678;
    });
    let mut client = connected_client(&slave);

    assert_eq!(
        client.read_discrete_inputs(2, 3).unwrap(),
        vec![false, true, false]
    );
    assert_eq!(
        client.read_input_registers(20, 2).unwrap(),
        vec![0x1234, 0x5678]
    );
}

#[test]
fn test_disconnect_then_read_fails_with_state_error() {
    let slave = TestSlave::start(Behavior::Normal);
    let mut client = connected_client(&slave);

    client.disconnect().unwrap();
    assert!(!client.is_connected());

    let err = client.read_holding_register(0).unwrap_err();
    assert_eq!(err, ModbusError::NotConnected);
    assert_eq!(err.kind(), ErrorKind::State);
}

#[test]
fn test_mask_write_register() {
    let slave = TestSlave::start(Behavior::Normal);
    slave.with_bank(|bank| bank.holding_registers[4] = 0x0012);
    let mut client = connected_client(&slave);

    client.mask_write_register(4, 0x00F2, 0x0025).unwrap();
    assert_eq!(client.read_holding_register(4).unwrap(), 0x0017);
}

#[test]
fn test_write_read_registers() {
    let slave = TestSlave::start(Behavior::Normal);
    let mut client = connected_client(&slave);

    let values = client
        .write_read_registers(200, &[11, 22, 33], 199, 5)
        .unwrap();
    assert_eq!(values, vec![0, 11, 22, 33, 0]);
}

#[test]
fn test_exception_from_device() {
    let slave = TestSlave::start(Behavior::Normal);
    let mut client = connected_client(&slave);

    let err = client.read_holding_registers(510, 10).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Exception);
    assert_eq!(err.exception_code(), Some(0x02));

    // The link stays usable after an exception
    assert_eq!(client.read_holding_registers(0, 1).unwrap(), vec![0]);
}

#[test]
fn test_silent_device_times_out() {
    let slave = TestSlave::start(Behavior::Silent);
    let mut client = connected_client(&slave);
    client.set_response_timeout(Duration::from_millis(100)).unwrap();

    let started = Instant::now();
    let err = client.read_holding_registers(0, 1).unwrap_err();

    assert!(err.is_timeout());
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(client.get_stats().timeouts, 1);
}

#[test]
fn test_link_recovery_reconnects() {
    let slave = TestSlave::start(Behavior::DropFirstConnection);
    let mut client = connected_client(&slave);
    client.set_error_recovery(ErrorRecoveryMode::LINK);

    client.write_single_register(1, 42).unwrap();

    assert_eq!(slave.connections(), 2);
    assert_eq!(client.read_holding_register(1).unwrap(), 42);
}

#[test]
fn test_link_failure_without_recovery() {
    let slave = TestSlave::start(Behavior::DropFirstConnection);
    let mut client = connected_client(&slave);

    let err = client.write_single_register(1, 42).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
}

#[test]
fn test_stats_count_traffic() {
    let slave = TestSlave::start(Behavior::Normal);
    let mut client = connected_client(&slave);

    client.read_holding_registers(0, 2).unwrap();
    client.write_single_register(0, 1).unwrap();

    let stats = client.get_stats();
    assert_eq!(stats.requests_sent, 2);
    assert_eq!(stats.responses_received, 2);
    assert_eq!(stats.errors, 0);
    // 12-byte requests; replies of 13 and 12 bytes
    assert_eq!(stats.bytes_sent, 24);
    assert_eq!(stats.bytes_received, 25);
}

#[cfg(unix)]
#[test]
fn test_socket_handle_follows_connection() {
    let slave = TestSlave::start(Behavior::Normal);
    let mut client = connected_client(&slave);

    assert!(client.socket().is_some());
    client.disconnect().unwrap();
    assert!(client.socket().is_none());
}
