//! Error types for the Modbus master
//!
//! Every failure path of an operation produces exactly one [`ModbusError`].
//! Variants group into the families reported by [`ModbusError::kind`]:
//!
//! | Kind | Variants | Effect on the session |
//! |------|----------|-----------------------|
//! | Transport | `Connection`, `Io` | link is suspect, reconnect |
//! | Timeout | `Timeout` | request abandoned, link stays open |
//! | Protocol | `Frame`, `Crc`, `Protocol`, `SlaveMismatch` | exchange corrupted, flush |
//! | Exception | `Exception` | device rejected the request |
//! | State | `NotConnected` | call `connect()` first |
//! | Usage | `InvalidData`, `InvalidFunction`, `Configuration` | caller error |

use std::io;

use thiserror::Error;

use crate::constants::{EINVAL, EIO, EMBBADCRC, EMBBADDATA, EMBBADSLAVE, ENOTCONN, ETIMEDOUT};
use crate::protocol::ModbusException;

/// Result alias used across the crate
pub type ModbusResult<T> = Result<T, ModbusError>;

/// Error family, independent of the concrete variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Socket or serial failure
    Transport,
    /// No (complete) reply within the configured timeouts
    Timeout,
    /// Malformed or mismatched reply
    Protocol,
    /// Exception response from the device
    Exception,
    /// Operation attempted in the wrong connection state
    State,
    /// Invalid argument or configuration
    Usage,
}

/// Modbus master error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModbusError {
    /// Opening or keeping the link failed (refused, reset, closed by peer)
    #[error("Connection error: {message}")]
    Connection {
        message: String,
        os_code: Option<i32>,
    },

    /// Read/write failure on an open link
    #[error("I/O error: {message}")]
    Io {
        message: String,
        os_code: Option<i32>,
    },

    /// Operation issued while the link is closed
    #[error("Not connected")]
    NotConnected,

    /// Reply did not arrive in time
    #[error("Timeout during {operation} after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Frame could not be parsed (length, header fields)
    #[error("Frame error: {message}")]
    Frame { message: String },

    /// RTU checksum mismatch
    #[error("CRC mismatch: calculated 0x{calculated:04X}, received 0x{received:04X}")]
    Crc { calculated: u16, received: u16 },

    /// Well-formed frame that does not answer the request
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Reply came from another slave/unit than the one addressed
    #[error("Response from slave {received}, expected slave {expected}")]
    SlaveMismatch { expected: u8, received: u8 },

    /// Device answered with an exception response
    #[error("Modbus exception 0x{code:02X} on function 0x{function:02X}: {message}")]
    Exception {
        function: u8,
        code: u8,
        message: String,
    },

    /// Invalid argument (empty write, oversized PDU, broadcast read)
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// Function code not supported by this master
    #[error("Invalid function code: 0x{code:02X}")]
    InvalidFunction { code: u8 },

    /// Invalid configuration value
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl ModbusError {
    pub fn connection(message: impl Into<String>) -> Self {
        ModbusError::Connection {
            message: message.into(),
            os_code: None,
        }
    }

    pub fn io(message: impl Into<String>) -> Self {
        ModbusError::Io {
            message: message.into(),
            os_code: None,
        }
    }

    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        ModbusError::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    pub fn frame(message: impl Into<String>) -> Self {
        ModbusError::Frame {
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        ModbusError::Protocol {
            message: message.into(),
        }
    }

    pub fn invalid_data(message: impl Into<String>) -> Self {
        ModbusError::InvalidData {
            message: message.into(),
        }
    }

    pub fn invalid_function(code: u8) -> Self {
        ModbusError::InvalidFunction { code }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        ModbusError::Configuration {
            message: message.into(),
        }
    }

    /// Build an exception error from the raw exception byte
    pub fn exception(function: u8, code: u8) -> Self {
        let message = match ModbusException::from_u8(code) {
            Some(exception) => exception.description().to_string(),
            None => format!("Unknown exception code {}", code),
        };
        ModbusError::Exception {
            function,
            code,
            message,
        }
    }

    /// Wrap an `io::Error` raised while establishing a link
    pub fn from_connect(context: &str, err: &io::Error) -> Self {
        ModbusError::Connection {
            message: format!("{}: {}", context, err),
            os_code: err.raw_os_error(),
        }
    }

    /// Wrap an `io::Error` raised on an open link
    ///
    /// Resets and broken pipes are reported as `Connection` so that link
    /// recovery can pick them up.
    pub fn from_io(context: &str, err: &io::Error) -> Self {
        let message = format!("{}: {}", context, err);
        let os_code = err.raw_os_error();
        match err.kind() {
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof => ModbusError::Connection { message, os_code },
            _ => ModbusError::Io { message, os_code },
        }
    }

    /// Taxonomy family of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            ModbusError::Connection { .. } | ModbusError::Io { .. } => ErrorKind::Transport,
            ModbusError::Timeout { .. } => ErrorKind::Timeout,
            ModbusError::Frame { .. }
            | ModbusError::Crc { .. }
            | ModbusError::Protocol { .. }
            | ModbusError::SlaveMismatch { .. } => ErrorKind::Protocol,
            ModbusError::Exception { .. } => ErrorKind::Exception,
            ModbusError::NotConnected => ErrorKind::State,
            ModbusError::InvalidData { .. }
            | ModbusError::InvalidFunction { .. }
            | ModbusError::Configuration { .. } => ErrorKind::Usage,
        }
    }

    /// Integer error code
    ///
    /// Exceptions report the exception byte itself; everything else uses
    /// the errno-style space defined in [`crate::constants`].
    pub fn code(&self) -> i32 {
        match self {
            ModbusError::Connection { os_code, .. } | ModbusError::Io { os_code, .. } => {
                os_code.unwrap_or(EIO)
            }
            ModbusError::NotConnected => ENOTCONN,
            ModbusError::Timeout { .. } => ETIMEDOUT,
            ModbusError::Crc { .. } => EMBBADCRC,
            ModbusError::Frame { .. } | ModbusError::Protocol { .. } => EMBBADDATA,
            ModbusError::SlaveMismatch { .. } => EMBBADSLAVE,
            ModbusError::Exception { code, .. } => i32::from(*code),
            ModbusError::InvalidData { .. }
            | ModbusError::InvalidFunction { .. }
            | ModbusError::Configuration { .. } => EINVAL,
        }
    }

    /// True when reconnecting may clear the error
    pub fn is_link_failure(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }

    /// True when the reply stream is out of step with the requests
    pub fn is_protocol_violation(&self) -> bool {
        self.kind() == ErrorKind::Protocol
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ModbusError::Timeout { .. })
    }

    /// Exception code, if the device rejected the request
    pub fn exception_code(&self) -> Option<u8> {
        match self {
            ModbusError::Exception { code, .. } => Some(*code),
            _ => None,
        }
    }
}
