//! # Voltage Modbus Blocking - Synchronous Modbus TCP/RTU Master
//!
//! A blocking Modbus master for Modbus TCP (MBAP framing over a socket) and
//! Modbus RTU (slave + PDU + CRC16 over a serial line). Every call performs
//! one request/response exchange on the calling thread.
//!
//! ## Features
//!
//! - **Blocking API**: no runtime, no background threads
//! - **Both framings**: Modbus TCP and Modbus RTU behind one client type
//! - **Typed errors**: transport, timeout, protocol and exception failures are distinct
//! - **Error recovery**: optional reconnect-and-retry and flush-and-retry
//! - **No partial results**: a read returns exactly the requested values or fails
//!
//! ## Supported Function Codes
//!
//! | Code | Function | Client |
//! |------|----------|--------|
//! | 0x01 | Read Coils | ✅ |
//! | 0x02 | Read Discrete Inputs | ✅ |
//! | 0x03 | Read Holding Registers | ✅ |
//! | 0x04 | Read Input Registers | ✅ |
//! | 0x05 | Write Single Coil | ✅ |
//! | 0x06 | Write Single Register | ✅ |
//! | 0x0F | Write Multiple Coils | ✅ |
//! | 0x10 | Write Multiple Registers | ✅ |
//! | 0x11 | Report Slave ID | ✅ |
//! | 0x16 | Mask Write Register | ✅ |
//! | 0x17 | Read/Write Multiple Registers | ✅ |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use voltage_modbus_blocking::{ErrorRecoveryMode, ModbusClient, ModbusResult, ModbusTcpClient};
//!
//! fn main() -> ModbusResult<()> {
//!     let mut client = ModbusTcpClient::new_tcp("127.0.0.1", 502)?;
//!     client.set_response_timeout(Duration::from_secs(1))?;
//!     client.set_error_recovery(ErrorRecoveryMode::LINK | ErrorRecoveryMode::PROTOCOL);
//!     client.connect()?;
//!
//!     client.write_multiple_registers(102, &[1, 2, 3])?;
//!     let values = client.read_holding_registers(102, 3)?;
//!     println!("Read registers: {:?}", values);
//!
//!     client.disconnect()?;
//!     Ok(())
//! }
//! ```

// ============================================================================
// Core modules
// ============================================================================

/// Core error types and result handling
pub mod error;

/// Modbus protocol constants based on official specification
pub mod constants;

/// Stack-allocated PDU and request builders
pub mod pdu;

/// Modbus requests, responses and function codes
pub mod protocol;

/// TCP and RTU framing
pub mod codec;

/// Client, link and serial line settings
pub mod config;

/// Blocking byte transports for TCP sockets and serial ports
pub mod transport;

/// Modbus master implementations
pub mod client;

/// Multi-register value helpers
pub mod bytes;

// ============================================================================
// Re-exports for convenience
// ============================================================================

// === Core client API ===
pub use client::{GenericModbusClient, ModbusClient, ModbusTcpClient};

// === Configuration ===
pub use config::{
    ClientConfig, DataBits, ErrorRecoveryMode, Parity, SerialConfig, StopBits, TcpConfig,
    TimeoutValue,
};

// === Error handling ===
pub use error::{ErrorKind, ModbusError, ModbusResult};

// === Core types ===
pub use bytes::ByteOrder;
pub use protocol::{ModbusException, ModbusFunction, ModbusRequest, ModbusResponse, SlaveId};

// === Framing ===
pub use codec::{crc16, FrameCodec, FrameLength, RtuCodec, TcpCodec};

// === Transport ===
pub use transport::{ModbusTransport, TcpTransport, TransportStats};

// === Protocol limits (commonly needed constants) ===
pub use constants::{
    DEFAULT_TCP_PORT, MAX_PDU_SIZE, MAX_READ_COILS, MAX_READ_REGISTERS, MAX_WRITE_COILS,
    MAX_WRITE_REGISTERS,
};

// === PDU (advanced usage) ===
pub use pdu::{ModbusPdu, PduBuilder};

#[cfg(feature = "rtu")]
pub use client::ModbusRtuClient;

#[cfg(feature = "rtu")]
pub use transport::RtuTransport;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!("Voltage Modbus Blocking v{} - synchronous Modbus TCP/RTU master", VERSION)
}
