//! Blocking Modbus master
//!
//! Modbus TCP and RTU share the same application layer (PDU) and differ only
//! in framing:
//! - **TCP**: MBAP Header + PDU
//! - **RTU**: Slave ID + PDU + CRC
//!
//! [`GenericModbusClient`] implements every operation once over a
//! [`ModbusTransport`] (moves bytes) and a [`FrameCodec`] (frames them).
//! Each call performs exactly one request/response round trip on the calling
//! thread; nothing runs in the background.
//!
//! # API Naming Convention
//!
//! This library provides a **dual-track API**:
//!
//! | Function Code | Primary Name | Semantic Alias |
//! |---------------|--------------|----------------|
//! | 0x01 | `read_01()` | `read_coils()` |
//! | 0x02 | `read_02()` | `read_discrete_inputs()` |
//! | 0x03 | `read_03()` | `read_holding_registers()` |
//! | 0x04 | `read_04()` | `read_input_registers()` |
//! | 0x05 | `write_05()` | `write_single_coil()` |
//! | 0x06 | `write_06()` | `write_single_register()` |
//! | 0x0F | `write_0f()` | `write_multiple_coils()` |
//! | 0x10 | `write_10()` | `write_multiple_registers()` |
//! | 0x11 | `report_11()` | `report_slave_id()` |
//! | 0x16 | `write_16()` | `mask_write_register()` |
//! | 0x17 | `write_read_17()` | `write_read_registers()` |
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use voltage_modbus_blocking::{ModbusClient, ModbusResult, ModbusTcpClient};
//!
//! fn main() -> ModbusResult<()> {
//!     let mut client = ModbusTcpClient::new_tcp("127.0.0.1", 502)?;
//!     client.set_slave(1)?;
//!     client.connect()?;
//!
//!     let registers = client.read_03(0, 10)?;
//!     println!("Registers: {:?}", registers);
//!
//!     client.write_06(100, 0x1234)?;
//!     client.disconnect()?;
//!     Ok(())
//! }
//! ```
//!
//! # Error recovery
//!
//! With [`ErrorRecoveryMode::LINK`] a transport failure closes the link,
//! reopens it and retries the request once. With
//! [`ErrorRecoveryMode::PROTOCOL`] a malformed or mismatched reply is
//! followed by a pause of one byte timeout, a flush of the link and one
//! retry. Exception responses are never retried.

#[cfg(unix)]
use std::os::fd::{OwnedFd, RawFd};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::codec::{FrameCodec, FrameLength, TcpCodec};
use crate::config::{validate_slave_id, ClientConfig, ErrorRecoveryMode, TcpConfig, TimeoutValue};
use crate::constants::BROADCAST_ADDRESS;
use crate::error::{ModbusError, ModbusResult};
use crate::protocol::{ModbusRequest, ModbusResponse, SlaveId};
use crate::transport::{log_packet, ModbusTransport, TcpTransport, TransportStats};

#[cfg(feature = "rtu")]
use crate::codec::RtuCodec;
#[cfg(feature = "rtu")]
use crate::config::SerialConfig;
#[cfg(feature = "rtu")]
use crate::transport::RtuTransport;

/// Modbus master operations
///
/// Every operation addresses the slave configured on the client and blocks
/// until the reply has been validated or an error occurred. Reads return
/// exactly the requested number of values; no partial results are returned.
///
/// Address and quantity ranges are not checked locally: the device answers
/// out-of-range requests with an exception response.
///
/// # Implemented By
///
/// - [`ModbusTcpClient`] - Modbus TCP client
/// - [`ModbusRtuClient`] - Modbus RTU client (requires `rtu` feature)
/// - [`GenericModbusClient`] - Generic client for custom transports
pub trait ModbusClient {
    /// Read coils (function code 0x01).
    ///
    /// # Arguments
    ///
    /// * `address` - Starting coil address (0-65535)
    /// * `quantity` - Number of coils to read (1-2000)
    fn read_01(&mut self, address: u16, quantity: u16) -> ModbusResult<Vec<bool>>;

    /// Read discrete inputs (function code 0x02).
    fn read_02(&mut self, address: u16, quantity: u16) -> ModbusResult<Vec<bool>>;

    /// Read holding registers (function code 0x03).
    ///
    /// # Arguments
    ///
    /// * `address` - Starting register address (0-65535)
    /// * `quantity` - Number of registers to read (1-125)
    fn read_03(&mut self, address: u16, quantity: u16) -> ModbusResult<Vec<u16>>;

    /// Read input registers (function code 0x04).
    fn read_04(&mut self, address: u16, quantity: u16) -> ModbusResult<Vec<u16>>;

    /// Write single coil (function code 0x05).
    ///
    /// `true` is sent as 0xFF00, `false` as 0x0000.
    fn write_05(&mut self, address: u16, value: bool) -> ModbusResult<()>;

    /// Write single register (function code 0x06).
    fn write_06(&mut self, address: u16, value: u16) -> ModbusResult<()>;

    /// Write multiple coils (function code 0x0F).
    ///
    /// `values` must hold 1-1968 coils.
    fn write_0f(&mut self, address: u16, values: &[bool]) -> ModbusResult<()>;

    /// Write multiple registers (function code 0x10).
    ///
    /// `values` must hold 1-123 registers.
    fn write_10(&mut self, address: u16, values: &[u16]) -> ModbusResult<()>;

    /// Report slave id (function code 0x11).
    ///
    /// Returns the device-specific payload without its byte count.
    fn report_11(&mut self) -> ModbusResult<Vec<u8>>;

    /// Mask write register (function code 0x16).
    ///
    /// The device stores `(current & and_mask) | (or_mask & !and_mask)`.
    fn write_16(&mut self, address: u16, and_mask: u16, or_mask: u16) -> ModbusResult<()>;

    /// Write then read registers in one transaction (function code 0x17).
    ///
    /// The device applies the write before the read. Atomicity with respect
    /// to other masters on the same bus is a property of the device.
    fn write_read_17(
        &mut self,
        write_address: u16,
        values: &[u16],
        read_address: u16,
        read_quantity: u16,
    ) -> ModbusResult<Vec<u16>>;

    /// Whether the link is open
    fn is_connected(&self) -> bool;

    /// Request and byte counters since the client was created
    fn get_stats(&self) -> TransportStats;

    // ===== Semantic name aliases (for readability) =====

    #[inline]
    fn read_coils(&mut self, address: u16, quantity: u16) -> ModbusResult<Vec<bool>> {
        self.read_01(address, quantity)
    }

    #[inline]
    fn read_discrete_inputs(&mut self, address: u16, quantity: u16) -> ModbusResult<Vec<bool>> {
        self.read_02(address, quantity)
    }

    #[inline]
    fn read_holding_registers(&mut self, address: u16, quantity: u16) -> ModbusResult<Vec<u16>> {
        self.read_03(address, quantity)
    }

    /// Read one holding register (function code 0x03, quantity 1)
    fn read_holding_register(&mut self, address: u16) -> ModbusResult<u16> {
        let values = self.read_03(address, 1)?;
        values
            .first()
            .copied()
            .ok_or_else(|| ModbusError::protocol("Empty register reply"))
    }

    #[inline]
    fn read_input_registers(&mut self, address: u16, quantity: u16) -> ModbusResult<Vec<u16>> {
        self.read_04(address, quantity)
    }

    #[inline]
    fn write_single_coil(&mut self, address: u16, value: bool) -> ModbusResult<()> {
        self.write_05(address, value)
    }

    #[inline]
    fn write_single_register(&mut self, address: u16, value: u16) -> ModbusResult<()> {
        self.write_06(address, value)
    }

    #[inline]
    fn write_multiple_coils(&mut self, address: u16, values: &[bool]) -> ModbusResult<()> {
        self.write_0f(address, values)
    }

    #[inline]
    fn write_multiple_registers(&mut self, address: u16, values: &[u16]) -> ModbusResult<()> {
        self.write_10(address, values)
    }

    #[inline]
    fn report_slave_id(&mut self) -> ModbusResult<Vec<u8>> {
        self.report_11()
    }

    #[inline]
    fn mask_write_register(&mut self, address: u16, and_mask: u16, or_mask: u16) -> ModbusResult<()> {
        self.write_16(address, and_mask, or_mask)
    }

    #[inline]
    fn write_read_registers(
        &mut self,
        write_address: u16,
        values: &[u16],
        read_address: u16,
        read_quantity: u16,
    ) -> ModbusResult<Vec<u16>> {
        self.write_read_17(write_address, values, read_address, read_quantity)
    }
}

/// Modbus master over any transport and framing
pub struct GenericModbusClient<T: ModbusTransport, C: FrameCodec> {
    transport: T,
    codec: C,
    config: ClientConfig,
    stats: TransportStats,
}

impl<T: ModbusTransport, C: FrameCodec> GenericModbusClient<T, C> {
    /// Create an unconnected client
    pub fn new(transport: T, codec: C, config: ClientConfig) -> Self {
        Self {
            transport,
            codec,
            config,
            stats: TransportStats::default(),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    // ===== Connection state =====

    /// Open the link; connecting an open client reopens it
    pub fn connect(&mut self) -> ModbusResult<()> {
        if self.transport.is_connected() {
            self.transport.close()?;
        }
        self.transport.open(self.config.response_timeout.as_duration())?;
        debug!("Modbus {} client connected", self.codec.name());
        Ok(())
    }

    /// Close the link; disconnecting a closed client is a no-op
    pub fn disconnect(&mut self) -> ModbusResult<()> {
        self.transport.close()
    }

    /// Discard bytes waiting on the link, returning how many were dropped
    pub fn flush(&mut self) -> ModbusResult<usize> {
        self.ensure_connected()?;
        self.transport.flush()
    }

    // ===== Configuration =====

    /// Slave/unit id addressed by subsequent requests
    ///
    /// Valid ids are 1-247 and 0xFF. Id 0 is accepted only where the framing
    /// supports broadcast (RTU); a TCP unit 0 would wait for a reply that
    /// never comes.
    pub fn set_slave(&mut self, slave_id: SlaveId) -> ModbusResult<()> {
        validate_slave_id(slave_id)?;
        if slave_id == BROADCAST_ADDRESS && !self.codec.is_broadcast(slave_id) {
            return Err(ModbusError::configuration(format!(
                "Slave id 0 is not a broadcast address on Modbus {}",
                self.codec.name()
            )));
        }
        self.config.slave_id = slave_id;
        Ok(())
    }

    pub fn slave(&self) -> SlaveId {
        self.config.slave_id
    }

    /// Log every frame sent and received
    pub fn set_debug(&mut self, debug: bool) {
        self.config.debug = debug;
    }

    pub fn set_response_timeout(&mut self, timeout: Duration) -> ModbusResult<()> {
        self.config.response_timeout = TimeoutValue::from_duration(timeout)?;
        Ok(())
    }

    /// Set the response timeout from fractional seconds
    pub fn set_response_timeout_secs(&mut self, secs: f64) -> ModbusResult<()> {
        self.config.response_timeout = TimeoutValue::from_secs_f64(secs)?;
        Ok(())
    }

    pub fn response_timeout(&self) -> TimeoutValue {
        self.config.response_timeout
    }

    /// Zero reuses the response timeout for the whole reply
    pub fn set_byte_timeout(&mut self, timeout: Duration) -> ModbusResult<()> {
        self.config.byte_timeout = TimeoutValue::from_duration(timeout)?;
        Ok(())
    }

    pub fn set_byte_timeout_secs(&mut self, secs: f64) -> ModbusResult<()> {
        self.config.byte_timeout = TimeoutValue::from_secs_f64(secs)?;
        Ok(())
    }

    pub fn byte_timeout(&self) -> TimeoutValue {
        self.config.byte_timeout
    }

    pub fn set_error_recovery(&mut self, mode: ErrorRecoveryMode) {
        self.config.error_recovery = mode;
    }

    pub fn error_recovery(&self) -> ErrorRecoveryMode {
        self.config.error_recovery
    }

    /// OS handle of the open link, for use with an external poller
    #[cfg(unix)]
    pub fn socket(&self) -> Option<RawFd> {
        self.transport.raw_fd()
    }

    /// Adopt an already open socket or serial descriptor as the link
    #[cfg(unix)]
    pub fn set_socket(&mut self, fd: OwnedFd) -> ModbusResult<()> {
        self.transport.attach_fd(fd)
    }

    // ===== Request execution =====

    /// Send an arbitrary function code and return the reply payload
    ///
    /// The reply goes through the same framing checks as every other
    /// request; exception replies map to [`ModbusError::Exception`].
    pub fn execute_raw(&mut self, function: u8, data: &[u8]) -> ModbusResult<Vec<u8>> {
        let request = ModbusRequest::Raw {
            function,
            data: data.to_vec(),
        };
        let response = self.request(&request)?;
        Ok(response.data().to_vec())
    }

    /// Run one request, applying the configured error recovery
    ///
    /// Returns `None` for RTU broadcast writes, which get no reply.
    pub fn execute(&mut self, request: &ModbusRequest) -> ModbusResult<Option<ModbusResponse>> {
        let result = match self.exchange(request) {
            Err(err) => self.recover(request, err),
            ok => ok,
        };

        if let Err(err) = &result {
            self.stats.errors += 1;
            if err.is_timeout() {
                self.stats.timeouts += 1;
            }
            debug!(
                "Request 0x{:02X} to slave {} failed: {}",
                request.function_code(),
                self.config.slave_id,
                err
            );
        }
        result
    }

    /// Run a request that must be answered
    fn request(&mut self, request: &ModbusRequest) -> ModbusResult<ModbusResponse> {
        self.execute(request)?
            .ok_or_else(|| ModbusError::invalid_data("Broadcast requests get no reply"))
    }

    fn recover(
        &mut self,
        request: &ModbusRequest,
        err: ModbusError,
    ) -> ModbusResult<Option<ModbusResponse>> {
        let mode = self.config.error_recovery;

        if err.is_link_failure() && mode.contains(ErrorRecoveryMode::LINK) {
            warn!("Link failure ({}), reconnecting and retrying once", err);
            self.transport.close()?;
            self.transport.open(self.config.response_timeout.as_duration())?;
            return self.exchange(request);
        }

        if err.is_protocol_violation() && mode.contains(ErrorRecoveryMode::PROTOCOL) {
            warn!("Protocol violation ({}), flushing and retrying once", err);
            thread::sleep(self.config.effective_byte_timeout());
            self.transport.flush()?;
            return self.exchange(request);
        }

        if err.is_timeout() && mode.contains(ErrorRecoveryMode::LINK) {
            // A late reply would otherwise be read as the answer to the next request
            if let Err(flush_err) = self.transport.flush() {
                debug!("Flush after timeout failed: {}", flush_err);
            }
        }

        Err(err)
    }

    /// One encode, send, receive, decode and validate cycle
    fn exchange(&mut self, request: &ModbusRequest) -> ModbusResult<Option<ModbusResponse>> {
        self.ensure_connected()?;

        let slave_id = self.config.slave_id;
        let broadcast = self.codec.is_broadcast(slave_id);
        if broadcast && !request.is_write() {
            return Err(ModbusError::invalid_data(format!(
                "Function 0x{:02X} cannot be broadcast",
                request.function_code()
            )));
        }

        let pdu = request.to_pdu()?;
        let frame = self.codec.encode(slave_id, &pdu);
        if self.config.debug {
            log_packet("send", &frame, self.codec.name(), Some(slave_id));
        }

        self.transport.send(&frame)?;
        self.stats.requests_sent += 1;

        if broadcast {
            debug!("Broadcast 0x{:02X} sent, no reply expected", request.function_code());
            return Ok(None);
        }

        let reply = self.read_frame()?;
        if self.config.debug {
            log_packet("recv", &reply, self.codec.name(), Some(slave_id));
        }
        self.stats.responses_received += 1;

        let response = self
            .codec
            .decode(&reply, slave_id, request.function_code())?;
        response.verify(request)?;
        Ok(Some(response))
    }

    /// Read one reply frame as directed by the codec
    ///
    /// The first byte must arrive within the response timeout, every later
    /// chunk within the byte timeout.
    fn read_frame(&mut self) -> ModbusResult<Vec<u8>> {
        let response_timeout = self.config.response_timeout.as_duration();
        let byte_timeout = self.config.effective_byte_timeout();

        let mut frame = vec![0u8; self.codec.initial_read_len()];
        receive_exact(&mut self.transport, &mut frame, response_timeout, byte_timeout)?;

        match self.codec.remaining_len(&frame)? {
            FrameLength::Exact(remaining) => {
                let start = frame.len();
                frame.resize(start + remaining, 0);
                receive_exact(
                    &mut self.transport,
                    &mut frame[start..],
                    byte_timeout,
                    byte_timeout,
                )?;
            }
            FrameLength::UntilSilence => {
                let mut chunk = [0u8; 64];
                loop {
                    match self.transport.receive(&mut chunk, byte_timeout) {
                        Ok(n) => frame.extend_from_slice(&chunk[..n]),
                        Err(err) if err.is_timeout() => break,
                        Err(err) => return Err(err),
                    }
                    let max_len = self.codec.max_frame_len();
                    if frame.len() > max_len {
                        return Err(ModbusError::frame(format!(
                            "Reply exceeds {} bytes",
                            max_len
                        )));
                    }
                }
            }
        }

        Ok(frame)
    }

    fn ensure_connected(&self) -> ModbusResult<()> {
        if self.transport.is_connected() {
            Ok(())
        } else {
            Err(ModbusError::NotConnected)
        }
    }
}

/// Fill `buf` completely; the first read waits `first_timeout`, later ones `next_timeout`
fn receive_exact<T: ModbusTransport>(
    transport: &mut T,
    buf: &mut [u8],
    first_timeout: Duration,
    next_timeout: Duration,
) -> ModbusResult<()> {
    let mut filled = 0;
    let mut timeout = first_timeout;
    while filled < buf.len() {
        filled += transport.receive(&mut buf[filled..], timeout)?;
        timeout = next_timeout;
    }
    Ok(())
}

impl<T: ModbusTransport, C: FrameCodec> ModbusClient for GenericModbusClient<T, C> {
    fn read_01(&mut self, address: u16, quantity: u16) -> ModbusResult<Vec<bool>> {
        let response = self.request(&ModbusRequest::ReadCoils { address, quantity })?;
        response.parse_bits(quantity)
    }

    fn read_02(&mut self, address: u16, quantity: u16) -> ModbusResult<Vec<bool>> {
        let response = self.request(&ModbusRequest::ReadDiscreteInputs { address, quantity })?;
        response.parse_bits(quantity)
    }

    fn read_03(&mut self, address: u16, quantity: u16) -> ModbusResult<Vec<u16>> {
        let response = self.request(&ModbusRequest::ReadHoldingRegisters { address, quantity })?;
        response.parse_registers(quantity)
    }

    fn read_04(&mut self, address: u16, quantity: u16) -> ModbusResult<Vec<u16>> {
        let response = self.request(&ModbusRequest::ReadInputRegisters { address, quantity })?;
        response.parse_registers(quantity)
    }

    fn write_05(&mut self, address: u16, value: bool) -> ModbusResult<()> {
        self.execute(&ModbusRequest::WriteSingleCoil { address, value })?;
        Ok(())
    }

    fn write_06(&mut self, address: u16, value: u16) -> ModbusResult<()> {
        self.execute(&ModbusRequest::WriteSingleRegister { address, value })?;
        Ok(())
    }

    fn write_0f(&mut self, address: u16, values: &[bool]) -> ModbusResult<()> {
        self.execute(&ModbusRequest::WriteMultipleCoils {
            address,
            values: values.to_vec(),
        })?;
        Ok(())
    }

    fn write_10(&mut self, address: u16, values: &[u16]) -> ModbusResult<()> {
        self.execute(&ModbusRequest::WriteMultipleRegisters {
            address,
            values: values.to_vec(),
        })?;
        Ok(())
    }

    fn report_11(&mut self) -> ModbusResult<Vec<u8>> {
        let response = self.request(&ModbusRequest::ReportSlaveId)?;
        Ok(response.byte_counted_data()?.to_vec())
    }

    fn write_16(&mut self, address: u16, and_mask: u16, or_mask: u16) -> ModbusResult<()> {
        self.execute(&ModbusRequest::MaskWriteRegister {
            address,
            and_mask,
            or_mask,
        })?;
        Ok(())
    }

    fn write_read_17(
        &mut self,
        write_address: u16,
        values: &[u16],
        read_address: u16,
        read_quantity: u16,
    ) -> ModbusResult<Vec<u16>> {
        let response = self.request(&ModbusRequest::ReadWriteMultipleRegisters {
            read_address,
            read_quantity,
            write_address,
            values: values.to_vec(),
        })?;
        response.parse_registers(read_quantity)
    }

    fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    fn get_stats(&self) -> TransportStats {
        self.stats.merged(self.transport.get_stats())
    }
}

impl<T: ModbusTransport, C: FrameCodec> Drop for GenericModbusClient<T, C> {
    fn drop(&mut self) {
        if self.transport.is_connected() {
            if let Err(e) = self.transport.close() {
                debug!("Close on drop failed: {}", e);
            }
        }
    }
}

/// Modbus TCP client
pub type ModbusTcpClient = GenericModbusClient<TcpTransport, TcpCodec>;

impl GenericModbusClient<TcpTransport, TcpCodec> {
    /// Unconnected client for `host:port` with TCP defaults (unit id 0xFF)
    pub fn new_tcp(host: &str, port: u16) -> ModbusResult<Self> {
        Ok(Self::from_tcp_config(
            TcpConfig::new(host, port)?,
            ClientConfig::tcp(),
        ))
    }

    pub fn from_tcp_config(tcp: TcpConfig, config: ClientConfig) -> Self {
        Self::new(TcpTransport::new(tcp), TcpCodec::new(), config)
    }
}

/// Modbus RTU client
#[cfg(feature = "rtu")]
pub type ModbusRtuClient = GenericModbusClient<RtuTransport, RtuCodec>;

#[cfg(feature = "rtu")]
impl GenericModbusClient<RtuTransport, RtuCodec> {
    /// Unconnected client for a serial line with RTU defaults (slave 1)
    ///
    /// `parity` is 'N', 'E' or 'O'.
    pub fn new_rtu(
        device: &str,
        baud_rate: u32,
        parity: char,
        data_bits: u8,
        stop_bits: u8,
    ) -> ModbusResult<Self> {
        let serial = SerialConfig::new(device, baud_rate, parity, data_bits, stop_bits)?;
        Ok(Self::from_serial_config(serial, ClientConfig::rtu()))
    }

    pub fn from_serial_config(serial: SerialConfig, config: ClientConfig) -> Self {
        Self::new(RtuTransport::new(serial), RtuCodec::new(), config)
    }
}
