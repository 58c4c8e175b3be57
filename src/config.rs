//! Connection and session configuration
//!
//! Everything here is plain data: a [`TcpConfig`] or [`SerialConfig`] says
//! where to connect, a [`ClientConfig`] carries the per-session knobs (slave
//! id, timeouts, debug output, error recovery) that the client consults on
//! every request.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::time::Duration;

use crate::constants::{
    DEFAULT_BYTE_TIMEOUT, DEFAULT_RESPONSE_TIMEOUT, DEFAULT_TCP_PORT, MAX_SLAVE_ID, TCP_SLAVE,
};
use crate::error::{ModbusError, ModbusResult};
use crate::protocol::SlaveId;

// ============================================================================
// Error recovery
// ============================================================================

/// Set of automatic recovery behaviours
///
/// Flags combine with `|`:
///
/// ```rust
/// use voltage_modbus_blocking::ErrorRecoveryMode;
///
/// let mode = ErrorRecoveryMode::LINK | ErrorRecoveryMode::PROTOCOL;
/// assert!(mode.contains(ErrorRecoveryMode::LINK));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ErrorRecoveryMode(u8);

impl ErrorRecoveryMode {
    /// Report every failure to the caller
    pub const NONE: Self = Self(0);
    /// Reconnect after transport failures and retry once
    pub const LINK: Self = Self(1 << 1);
    /// Flush after malformed replies and retry once
    pub const PROTOCOL: Self = Self(1 << 2);

    #[inline]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Build from raw bits, ignoring unknown ones
    #[inline]
    pub const fn from_bits_truncate(bits: u8) -> Self {
        Self(bits & (Self::LINK.0 | Self::PROTOCOL.0))
    }

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for ErrorRecoveryMode {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ErrorRecoveryMode {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for ErrorRecoveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.contains(Self::LINK), self.contains(Self::PROTOCOL)) {
            (false, false) => write!(f, "none"),
            (true, false) => write!(f, "link"),
            (false, true) => write!(f, "protocol"),
            (true, true) => write!(f, "link|protocol"),
        }
    }
}

// ============================================================================
// Timeouts
// ============================================================================

/// Timeout split into whole seconds and microseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TimeoutValue {
    pub secs: u32,
    pub micros: u32,
}

impl TimeoutValue {
    pub const ZERO: Self = Self { secs: 0, micros: 0 };

    /// Split fractional seconds, rounding to the nearest microsecond
    ///
    /// `0.5` becomes `(0, 500_000)` and `1.000001` becomes `(1, 1)`.
    pub fn from_secs_f64(secs: f64) -> ModbusResult<Self> {
        if !secs.is_finite() || secs < 0.0 {
            return Err(ModbusError::configuration(format!(
                "Timeout must be a finite, non-negative number of seconds, got {}",
                secs
            )));
        }
        let total_micros = (secs * 1_000_000.0).round();
        if total_micros > f64::from(u32::MAX) * 1_000_000.0 {
            return Err(ModbusError::configuration(format!(
                "Timeout of {} seconds is too large",
                secs
            )));
        }
        let total_micros = total_micros as u64;
        Ok(Self {
            secs: (total_micros / 1_000_000) as u32,
            micros: (total_micros % 1_000_000) as u32,
        })
    }

    pub fn from_duration(duration: Duration) -> ModbusResult<Self> {
        let secs = u32::try_from(duration.as_secs()).map_err(|_| {
            ModbusError::configuration(format!("Timeout {:?} is too large", duration))
        })?;
        Ok(Self {
            secs,
            micros: duration.subsec_micros(),
        })
    }

    pub fn as_duration(self) -> Duration {
        Duration::from_secs(u64::from(self.secs)) + Duration::from_micros(u64::from(self.micros))
    }

    pub fn as_secs_f64(self) -> f64 {
        f64::from(self.secs) + f64::from(self.micros) / 1_000_000.0
    }

    pub fn is_zero(self) -> bool {
        self.secs == 0 && self.micros == 0
    }
}

impl fmt::Display for TimeoutValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}s", self.secs, self.micros)
    }
}

// ============================================================================
// Session configuration
// ============================================================================

/// Per-session settings consulted on every request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Slave/unit id placed in each request
    pub slave_id: SlaveId,
    /// Wait for the first byte of a reply
    pub response_timeout: TimeoutValue,
    /// Maximum gap between later bytes of a reply; zero reuses the response timeout
    pub byte_timeout: TimeoutValue,
    /// Log every frame sent and received
    pub debug: bool,
    pub error_recovery: ErrorRecoveryMode,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::tcp()
    }
}

impl ClientConfig {
    /// Defaults for Modbus TCP (unit id 0xFF)
    pub fn tcp() -> Self {
        Self {
            slave_id: TCP_SLAVE,
            ..Self::base()
        }
    }

    /// Defaults for Modbus RTU (slave 1)
    pub fn rtu() -> Self {
        Self {
            slave_id: 1,
            ..Self::base()
        }
    }

    fn base() -> Self {
        Self {
            slave_id: TCP_SLAVE,
            response_timeout: TimeoutValue {
                secs: DEFAULT_RESPONSE_TIMEOUT.as_secs() as u32,
                micros: DEFAULT_RESPONSE_TIMEOUT.subsec_micros(),
            },
            byte_timeout: TimeoutValue {
                secs: DEFAULT_BYTE_TIMEOUT.as_secs() as u32,
                micros: DEFAULT_BYTE_TIMEOUT.subsec_micros(),
            },
            debug: false,
            error_recovery: ErrorRecoveryMode::NONE,
        }
    }

    pub fn with_slave_id(mut self, slave_id: SlaveId) -> ModbusResult<Self> {
        validate_slave_id(slave_id)?;
        self.slave_id = slave_id;
        Ok(self)
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> ModbusResult<Self> {
        self.response_timeout = TimeoutValue::from_duration(timeout)?;
        Ok(self)
    }

    pub fn with_byte_timeout(mut self, timeout: Duration) -> ModbusResult<Self> {
        self.byte_timeout = TimeoutValue::from_duration(timeout)?;
        Ok(self)
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_error_recovery(mut self, mode: ErrorRecoveryMode) -> Self {
        self.error_recovery = mode;
        self
    }

    /// Timeout applied to bytes after the first one
    pub fn effective_byte_timeout(&self) -> Duration {
        if self.byte_timeout.is_zero() {
            self.response_timeout.as_duration()
        } else {
            self.byte_timeout.as_duration()
        }
    }
}

/// Check a slave id: broadcast (0), 1-247, or the TCP default 0xFF
pub fn validate_slave_id(slave_id: SlaveId) -> ModbusResult<()> {
    if slave_id <= MAX_SLAVE_ID || slave_id == TCP_SLAVE {
        Ok(())
    } else {
        Err(ModbusError::configuration(format!(
            "Invalid slave id {}: expected 0-{} or {}",
            slave_id, MAX_SLAVE_ID, TCP_SLAVE
        )))
    }
}

// ============================================================================
// TCP
// ============================================================================

/// Modbus TCP endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpConfig {
    /// Host name or IP address
    pub host: String,
    pub port: u16,
}

impl TcpConfig {
    pub fn new(host: impl Into<String>, port: u16) -> ModbusResult<Self> {
        let host = host.into();
        if host.trim().is_empty() {
            return Err(ModbusError::configuration("TCP host must not be empty"));
        }
        Ok(Self { host, port })
    }

    /// Endpoint on the standard port 502
    pub fn with_default_port(host: impl Into<String>) -> ModbusResult<Self> {
        Self::new(host, DEFAULT_TCP_PORT)
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// ============================================================================
// Serial
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Parity {
    None,
    Even,
    Odd,
}

impl Parity {
    /// Parse the conventional single-letter form ('N', 'E', 'O')
    pub fn from_char(c: char) -> ModbusResult<Self> {
        match c.to_ascii_uppercase() {
            'N' => Ok(Parity::None),
            'E' => Ok(Parity::Even),
            'O' => Ok(Parity::Odd),
            _ => Err(ModbusError::configuration(format!(
                "Invalid parity '{}': expected N, E or O",
                c
            ))),
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Parity::None => 'N',
            Parity::Even => 'E',
            Parity::Odd => 'O',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

impl DataBits {
    pub fn from_u8(bits: u8) -> ModbusResult<Self> {
        match bits {
            5 => Ok(DataBits::Five),
            6 => Ok(DataBits::Six),
            7 => Ok(DataBits::Seven),
            8 => Ok(DataBits::Eight),
            _ => Err(ModbusError::configuration(format!(
                "Invalid data bits {}: expected 5-8",
                bits
            ))),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            DataBits::Five => 5,
            DataBits::Six => 6,
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StopBits {
    One,
    Two,
}

impl StopBits {
    pub fn from_u8(bits: u8) -> ModbusResult<Self> {
        match bits {
            1 => Ok(StopBits::One),
            2 => Ok(StopBits::Two),
            _ => Err(ModbusError::configuration(format!(
                "Invalid stop bits {}: expected 1 or 2",
                bits
            ))),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            StopBits::One => 1,
            StopBits::Two => 2,
        }
    }
}

/// Serial line settings for Modbus RTU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    pub device: String,
    pub baud_rate: u32,
    pub parity: Parity,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
}

impl SerialConfig {
    /// Validate and build serial settings
    ///
    /// `parity` is 'N', 'E' or 'O'; `data_bits` 5-8; `stop_bits` 1 or 2.
    pub fn new(
        device: impl Into<String>,
        baud_rate: u32,
        parity: char,
        data_bits: u8,
        stop_bits: u8,
    ) -> ModbusResult<Self> {
        let device = device.into();
        if device.is_empty() {
            return Err(ModbusError::configuration("Serial device must not be empty"));
        }
        if baud_rate == 0 {
            return Err(ModbusError::configuration("Baud rate must be positive"));
        }
        Ok(Self {
            device,
            baud_rate,
            parity: Parity::from_char(parity)?,
            data_bits: DataBits::from_u8(data_bits)?,
            stop_bits: StopBits::from_u8(stop_bits)?,
        })
    }

    /// Bits on the wire per character: start + data + parity + stop
    pub fn bits_per_char(&self) -> u32 {
        let parity = if self.parity == Parity::None { 0 } else { 1 };
        1 + u32::from(self.data_bits.as_u8()) + parity + u32::from(self.stop_bits.as_u8())
    }

    /// Silent interval that delimits RTU frames (3.5 character times)
    ///
    /// Fixed at 1750µs above 19200 baud.
    pub fn frame_gap(&self) -> Duration {
        if self.baud_rate > 19_200 {
            return Duration::from_micros(1_750);
        }
        let char_time_us = u64::from(self.bits_per_char()) * 1_000_000 / u64::from(self.baud_rate);
        Duration::from_micros(char_time_us * 35 / 10)
    }
}

impl fmt::Display for SerialConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}{}{}",
            self.device,
            self.baud_rate,
            self.data_bits.as_u8(),
            self.parity.as_char(),
            self.stop_bits.as_u8()
        )
    }
}

#[cfg(feature = "rtu")]
mod serial_conversions {
    use super::{DataBits, Parity, StopBits};

    impl From<Parity> for serialport::Parity {
        fn from(parity: Parity) -> Self {
            match parity {
                Parity::None => serialport::Parity::None,
                Parity::Even => serialport::Parity::Even,
                Parity::Odd => serialport::Parity::Odd,
            }
        }
    }

    impl From<DataBits> for serialport::DataBits {
        fn from(bits: DataBits) -> Self {
            match bits {
                DataBits::Five => serialport::DataBits::Five,
                DataBits::Six => serialport::DataBits::Six,
                DataBits::Seven => serialport::DataBits::Seven,
                DataBits::Eight => serialport::DataBits::Eight,
            }
        }
    }

    impl From<StopBits> for serialport::StopBits {
        fn from(bits: StopBits) -> Self {
            match bits {
                StopBits::One => serialport::StopBits::One,
                StopBits::Two => serialport::StopBits::Two,
            }
        }
    }
}
