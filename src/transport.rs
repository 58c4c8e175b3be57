//! Byte-stream transports
//!
//! A transport owns the OS handle (TCP socket or serial port) and moves raw
//! bytes; it knows nothing about Modbus framing. Reads are bounded by an
//! explicit per-call timeout so the client can apply the response timeout to
//! the first byte of a reply and the byte timeout to the rest.
//!
//! | Transport | Handle | Requires |
//! |-----------|--------|----------|
//! | [`TcpTransport`] | `std::net::TcpStream` | - |
//! | [`RtuTransport`] | native serial port | `rtu` feature |

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
#[cfg(unix)]
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::TcpConfig;
use crate::error::{ModbusError, ModbusResult};

/// Shortest read timeout handed to the OS; zero means "block forever" there
const MIN_READ_TIMEOUT: Duration = Duration::from_micros(1);

/// Format raw bytes as hex string for packet logging
pub(crate) fn format_hex_packet(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Log packet with direction and format
pub(crate) fn log_packet(direction: &str, data: &[u8], protocol: &str, slave_id: Option<u8>) {
    let hex_string = format_hex_packet(data);
    match slave_id {
        Some(id) => info!("[MODBUS-{}] {} slave:{} {}", protocol, direction, id, hex_string),
        None => info!("[MODBUS-{}] {} {}", protocol, direction, hex_string),
    }
}

/// Transport layer statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub requests_sent: u64,
    pub responses_received: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

impl TransportStats {
    /// Sum of two counters sets
    pub fn merged(self, other: TransportStats) -> TransportStats {
        TransportStats {
            requests_sent: self.requests_sent + other.requests_sent,
            responses_received: self.responses_received + other.responses_received,
            errors: self.errors + other.errors,
            timeouts: self.timeouts + other.timeouts,
            bytes_sent: self.bytes_sent + other.bytes_sent,
            bytes_received: self.bytes_received + other.bytes_received,
        }
    }
}

/// Blocking byte transport owned by a client
///
/// The handle is released on `close` and when the transport is dropped.
pub trait ModbusTransport: Send {
    /// Open the underlying handle; `timeout` bounds connection establishment
    fn open(&mut self, timeout: Duration) -> ModbusResult<()>;

    /// Release the handle. Closing a closed transport is a no-op.
    fn close(&mut self) -> ModbusResult<()>;

    fn is_connected(&self) -> bool;

    /// Write a complete frame
    fn send(&mut self, data: &[u8]) -> ModbusResult<()>;

    /// Read up to `buf.len()` bytes, waiting at most `timeout` for the first
    ///
    /// Returns the number of bytes read (never zero). A peer that closed the
    /// link yields a `Connection` error, silence yields `Timeout`.
    fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> ModbusResult<usize>;

    /// Drop any bytes already waiting on the link and return how many
    fn flush(&mut self) -> ModbusResult<usize>;

    fn get_stats(&self) -> TransportStats;

    /// OS handle of the open link
    #[cfg(unix)]
    fn raw_fd(&self) -> Option<RawFd>;

    /// Replace the link with an already open handle
    #[cfg(unix)]
    fn attach_fd(&mut self, fd: OwnedFd) -> ModbusResult<()>;
}

// ============================================================================
// TCP
// ============================================================================

/// Modbus TCP transport
pub struct TcpTransport {
    config: TcpConfig,
    stream: Option<TcpStream>,
    stats: TransportStats,
}

impl TcpTransport {
    /// Create a closed transport for `config`
    pub fn new(config: TcpConfig) -> Self {
        Self {
            config,
            stream: None,
            stats: TransportStats::default(),
        }
    }

    pub fn config(&self) -> &TcpConfig {
        &self.config
    }

    fn stream_mut(&mut self) -> ModbusResult<&mut TcpStream> {
        self.stream.as_mut().ok_or(ModbusError::NotConnected)
    }
}

impl ModbusTransport for TcpTransport {
    fn open(&mut self, timeout: Duration) -> ModbusResult<()> {
        self.stream = None;
        let address = self.config.address();
        let candidates = (self.config.host.as_str(), self.config.port)
            .to_socket_addrs()
            .map_err(|e| ModbusError::from_connect(&format!("Failed to resolve {}", address), &e))?;

        let mut last_error = None;
        for candidate in candidates {
            match TcpStream::connect_timeout(&candidate, timeout.max(MIN_READ_TIMEOUT)) {
                Ok(stream) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        warn!("Failed to set TCP_NODELAY on {}: {}", candidate, e);
                    }
                    debug!("Connected to Modbus TCP server at {}", candidate);
                    self.stream = Some(stream);
                    return Ok(());
                }
                Err(e) => {
                    debug!("Connection to {} failed: {}", candidate, e);
                    last_error = Some(e);
                }
            }
        }

        Err(match last_error {
            Some(e) => ModbusError::from_connect(&format!("Failed to connect to {}", address), &e),
            None => ModbusError::connection(format!("No address found for {}", address)),
        })
    }

    fn close(&mut self) -> ModbusResult<()> {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.shutdown(std::net::Shutdown::Both) {
                debug!("TCP shutdown: {}", e);
            }
            debug!("Closed Modbus TCP connection to {}", self.config.address());
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn send(&mut self, data: &[u8]) -> ModbusResult<()> {
        let stream = self.stream_mut()?;
        stream
            .write_all(data)
            .and_then(|_| stream.flush())
            .map_err(|e| ModbusError::from_io("TCP send", &e))?;
        self.stats.bytes_sent += data.len() as u64;
        Ok(())
    }

    fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> ModbusResult<usize> {
        let stream = self.stream_mut()?;
        stream
            .set_read_timeout(Some(timeout.max(MIN_READ_TIMEOUT)))
            .map_err(|e| ModbusError::from_io("TCP set read timeout", &e))?;

        match stream.read(buf) {
            Ok(0) => Err(ModbusError::connection("Connection closed by peer")),
            Ok(n) => {
                self.stats.bytes_received += n as u64;
                Ok(n)
            }
            Err(e) if is_timeout(&e) => Err(ModbusError::timeout(
                "TCP receive",
                timeout.as_millis() as u64,
            )),
            Err(e) => Err(ModbusError::from_io("TCP receive", &e)),
        }
    }

    fn flush(&mut self) -> ModbusResult<usize> {
        let stream = self.stream_mut()?;
        stream
            .set_nonblocking(true)
            .map_err(|e| ModbusError::from_io("TCP flush", &e))?;

        let mut discarded = 0;
        let mut scratch = [0u8; 256];
        let result = loop {
            match stream.read(&mut scratch) {
                Ok(0) => break Ok(()),
                Ok(n) => discarded += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(()),
                Err(e) => break Err(ModbusError::from_io("TCP flush", &e)),
            }
        };

        stream
            .set_nonblocking(false)
            .map_err(|e| ModbusError::from_io("TCP flush", &e))?;
        result?;

        self.stats.bytes_received += discarded as u64;
        if discarded > 0 {
            debug!("Flushed {} stale bytes from TCP link", discarded);
        }
        Ok(discarded)
    }

    fn get_stats(&self) -> TransportStats {
        self.stats
    }

    #[cfg(unix)]
    fn raw_fd(&self) -> Option<RawFd> {
        self.stream.as_ref().map(|s| s.as_raw_fd())
    }

    #[cfg(unix)]
    fn attach_fd(&mut self, fd: OwnedFd) -> ModbusResult<()> {
        let stream = TcpStream::from(fd);
        stream
            .set_nonblocking(false)
            .map_err(|e| ModbusError::from_io("Attach TCP socket", &e))?;
        self.stream = Some(stream);
        Ok(())
    }
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

// ============================================================================
// RTU
// ============================================================================

#[cfg(feature = "rtu")]
pub use rtu::RtuTransport;

#[cfg(feature = "rtu")]
mod rtu {
    use std::io::{self, Read, Write};
    #[cfg(unix)]
    use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
    use std::thread;
    use std::time::{Duration, Instant};

    use serialport::{ClearBuffer, SerialPort};
    use tracing::debug;

    use super::{is_timeout, ModbusTransport, TransportStats, MIN_READ_TIMEOUT};
    use crate::config::SerialConfig;
    use crate::error::{ModbusError, ModbusResult};

    #[cfg(unix)]
    type NativePort = serialport::TTYPort;
    #[cfg(windows)]
    type NativePort = serialport::COMPort;

    fn serial_error(context: &str, err: serialport::Error) -> ModbusError {
        match err.kind() {
            serialport::ErrorKind::NoDevice => {
                ModbusError::connection(format!("{}: {}", context, err))
            }
            serialport::ErrorKind::InvalidInput => {
                ModbusError::configuration(format!("{}: {}", context, err))
            }
            _ => ModbusError::from_io(context, &io::Error::from(err)),
        }
    }

    /// Modbus RTU transport over a serial line
    ///
    /// Consecutive frames are separated by at least the 3.5 character
    /// silent interval derived from the line settings.
    pub struct RtuTransport {
        config: SerialConfig,
        port: Option<NativePort>,
        frame_gap: Duration,
        last_activity: Option<Instant>,
        stats: TransportStats,
    }

    impl RtuTransport {
        /// Create a closed transport for `config`
        pub fn new(config: SerialConfig) -> Self {
            let frame_gap = config.frame_gap();
            Self {
                config,
                port: None,
                frame_gap,
                last_activity: None,
                stats: TransportStats::default(),
            }
        }

        pub fn config(&self) -> &SerialConfig {
            &self.config
        }

        pub fn frame_gap(&self) -> Duration {
            self.frame_gap
        }

        fn port_mut(&mut self) -> ModbusResult<&mut NativePort> {
            self.port.as_mut().ok_or(ModbusError::NotConnected)
        }

        fn wait_frame_gap(&self) {
            if let Some(last) = self.last_activity {
                let elapsed = last.elapsed();
                if elapsed < self.frame_gap {
                    thread::sleep(self.frame_gap - elapsed);
                }
            }
        }
    }

    impl ModbusTransport for RtuTransport {
        fn open(&mut self, timeout: Duration) -> ModbusResult<()> {
            self.port = None;
            let port = serialport::new(self.config.device.as_str(), self.config.baud_rate)
                .data_bits(self.config.data_bits.into())
                .parity(self.config.parity.into())
                .stop_bits(self.config.stop_bits.into())
                .flow_control(serialport::FlowControl::None)
                .timeout(timeout.max(MIN_READ_TIMEOUT))
                .open_native()
                .map_err(|e| {
                    serial_error(
                        &format!("Failed to open serial port {}", self.config.device),
                        e,
                    )
                })?;

            debug!("Opened serial port {}", self.config);
            self.port = Some(port);
            self.last_activity = None;
            Ok(())
        }

        fn close(&mut self) -> ModbusResult<()> {
            if self.port.take().is_some() {
                debug!("Closed serial port {}", self.config.device);
            }
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.port.is_some()
        }

        fn send(&mut self, data: &[u8]) -> ModbusResult<()> {
            self.wait_frame_gap();
            let port = self.port_mut()?;
            port.write_all(data)
                .and_then(|_| port.flush())
                .map_err(|e| ModbusError::from_io("Serial send", &e))?;
            self.last_activity = Some(Instant::now());
            self.stats.bytes_sent += data.len() as u64;
            Ok(())
        }

        fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> ModbusResult<usize> {
            let port = self.port_mut()?;
            port.set_timeout(timeout.max(MIN_READ_TIMEOUT))
                .map_err(|e| serial_error("Serial set timeout", e))?;

            match port.read(buf) {
                Ok(0) => Err(ModbusError::timeout(
                    "Serial receive",
                    timeout.as_millis() as u64,
                )),
                Ok(n) => {
                    self.last_activity = Some(Instant::now());
                    self.stats.bytes_received += n as u64;
                    Ok(n)
                }
                Err(e) if is_timeout(&e) => Err(ModbusError::timeout(
                    "Serial receive",
                    timeout.as_millis() as u64,
                )),
                Err(e) => Err(ModbusError::from_io("Serial receive", &e)),
            }
        }

        fn flush(&mut self) -> ModbusResult<usize> {
            let port = self.port_mut()?;
            let pending = port
                .bytes_to_read()
                .map_err(|e| serial_error("Serial flush", e))?;
            port.clear(ClearBuffer::All)
                .map_err(|e| serial_error("Serial flush", e))?;
            if pending > 0 {
                debug!("Flushed {} stale bytes from serial line", pending);
            }
            Ok(pending as usize)
        }

        fn get_stats(&self) -> TransportStats {
            self.stats
        }

        #[cfg(unix)]
        fn raw_fd(&self) -> Option<RawFd> {
            self.port.as_ref().map(|p| p.as_raw_fd())
        }

        #[cfg(unix)]
        fn attach_fd(&mut self, fd: OwnedFd) -> ModbusResult<()> {
            // SAFETY: ownership of the descriptor moves from `fd` into the port,
            // so it is closed exactly once when the port is dropped.
            let port = unsafe { NativePort::from_raw_fd(fd.into_raw_fd()) };
            self.port = Some(port);
            self.last_activity = None;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_format_hex_packet() {
        assert_eq!(format_hex_packet(&[0x01, 0x03, 0xAB]), "01 03 AB");
        assert_eq!(format_hex_packet(&[]), "");
    }

    #[test]
    fn test_stats_merge() {
        let a = TransportStats {
            requests_sent: 2,
            bytes_sent: 24,
            ..Default::default()
        };
        let b = TransportStats {
            requests_sent: 1,
            timeouts: 1,
            ..Default::default()
        };
        let merged = a.merged(b);
        assert_eq!(merged.requests_sent, 3);
        assert_eq!(merged.timeouts, 1);
        assert_eq!(merged.bytes_sent, 24);
    }

    #[test]
    fn test_closed_transport_is_not_connected() {
        let mut transport = TcpTransport::new(TcpConfig::new("127.0.0.1", 1).unwrap());
        assert!(!transport.is_connected());
        assert_eq!(transport.send(&[0x00]), Err(ModbusError::NotConnected));
        assert!(transport.close().is_ok());
    }

    #[test]
    fn test_tcp_round_trip_and_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut buf = [0u8; 4];
            socket.read_exact(&mut buf).unwrap();
            socket.write_all(&buf).unwrap();
            // Hold the socket open without replying again
            thread::sleep(Duration::from_millis(300));
        });

        let mut transport = TcpTransport::new(TcpConfig::new("127.0.0.1", port).unwrap());
        transport.open(Duration::from_secs(1)).unwrap();
        assert!(transport.is_connected());

        transport.send(&[1, 2, 3, 4]).unwrap();
        let mut buf = [0u8; 4];
        let mut read = 0;
        while read < 4 {
            read += transport
                .receive(&mut buf[read..], Duration::from_secs(1))
                .unwrap();
        }
        assert_eq!(buf, [1, 2, 3, 4]);

        let err = transport
            .receive(&mut buf, Duration::from_millis(50))
            .unwrap_err();
        assert!(err.is_timeout());

        let stats = transport.get_stats();
        assert_eq!(stats.bytes_sent, 4);
        assert_eq!(stats.bytes_received, 4);

        transport.close().unwrap();
        assert!(!transport.is_connected());
        server.join().unwrap();
    }

    #[test]
    fn test_tcp_flush_discards_pending_bytes() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            socket.write_all(&[0xAA; 10]).unwrap();
            let mut buf = [0u8; 1];
            let _ = socket.read(&mut buf);
        });

        let mut transport = TcpTransport::new(TcpConfig::new("127.0.0.1", port).unwrap());
        transport.open(Duration::from_secs(1)).unwrap();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(transport.flush().unwrap(), 10);
        assert_eq!(transport.flush().unwrap(), 0);

        transport.close().unwrap();
        server.join().unwrap();
    }

    #[test]
    fn test_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut transport = TcpTransport::new(TcpConfig::new("127.0.0.1", port).unwrap());
        let err = transport.open(Duration::from_millis(200)).unwrap_err();
        assert!(matches!(err, ModbusError::Connection { .. }));
        assert!(!transport.is_connected());
    }

    #[cfg(unix)]
    #[test]
    fn test_attach_fd() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut buf = [0u8; 2];
            socket.read_exact(&mut buf).unwrap();
            socket.write_all(&buf).unwrap();
        });

        let stream = TcpStream::connect(addr).unwrap();
        let fd = stream.as_raw_fd();
        let mut transport = TcpTransport::new(TcpConfig::new("127.0.0.1", addr.port()).unwrap());
        transport.attach_fd(OwnedFd::from(stream)).unwrap();
        assert_eq!(transport.raw_fd(), Some(fd));

        transport.send(&[7, 8]).unwrap();
        let mut buf = [0u8; 2];
        let mut read = 0;
        while read < 2 {
            read += transport
                .receive(&mut buf[read..], Duration::from_secs(1))
                .unwrap();
        }
        assert_eq!(buf, [7, 8]);
        server.join().unwrap();
    }

    #[cfg(all(feature = "rtu", unix))]
    mod rtu_pty {
        use super::*;
        use crate::client::{ModbusClient, ModbusRtuClient};
        use crate::codec::crc16;
        use crate::config::SerialConfig;
        use serialport::{SerialPort, TTYPort};
        use std::os::fd::{FromRawFd, IntoRawFd};
        use std::time::Instant;

        fn with_crc(body: &[u8]) -> Vec<u8> {
            let mut frame = body.to_vec();
            frame.extend_from_slice(&crc16(body).to_le_bytes());
            frame
        }

        /// Pseudo-terminal pair: the controlling end as an owned fd, the other as the device
        fn pty() -> (OwnedFd, TTYPort) {
            let (controller, mut device) = TTYPort::pair().unwrap();
            device.set_timeout(Duration::from_secs(1)).unwrap();
            // SAFETY: `into_raw_fd` gives up ownership, so the OwnedFd is the only owner
            let fd = unsafe { OwnedFd::from_raw_fd(controller.into_raw_fd()) };
            (fd, device)
        }

        fn attached(fd: OwnedFd) -> RtuTransport {
            let config = SerialConfig::new("/dev/ptmx", 9600, 'N', 8, 1).unwrap();
            let mut transport = RtuTransport::new(config);
            transport.attach_fd(fd).unwrap();
            transport
        }

        #[test]
        fn test_split_reply_and_silence() {
            let (fd, mut device) = pty();
            let mut transport = attached(fd);
            assert!(transport.is_connected());
            assert!(transport.raw_fd().is_some());

            let request = with_crc(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x02]);
            transport.send(&request).unwrap();
            let mut received = vec![0u8; request.len()];
            device.read_exact(&mut received).unwrap();
            assert_eq!(received, request);

            let reply = with_crc(&[0x01, 0x03, 0x04, 0x00, 0x01, 0x00, 0x02]);
            device.write_all(&reply[..3]).unwrap();
            let tail = reply[3..].to_vec();
            let writer = thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                device.write_all(&tail).unwrap();
                device
            });

            let mut buf = vec![0u8; reply.len()];
            let mut read = 0;
            while read < buf.len() {
                read += transport
                    .receive(&mut buf[read..], Duration::from_secs(1))
                    .unwrap();
            }
            assert_eq!(buf, reply);
            let _device = writer.join().unwrap();

            let err = transport
                .receive(&mut buf, Duration::from_millis(50))
                .unwrap_err();
            assert!(err.is_timeout());
            assert!(transport.is_connected());

            let stats = transport.get_stats();
            assert_eq!(stats.bytes_sent, request.len() as u64);
            assert_eq!(stats.bytes_received, reply.len() as u64);
        }

        #[test]
        fn test_flush_drops_pending_bytes() {
            let (fd, mut device) = pty();
            let mut transport = attached(fd);

            device.write_all(&[0xAA, 0xBB, 0xCC]).unwrap();
            thread::sleep(Duration::from_millis(50));
            assert_eq!(transport.flush().unwrap(), 3);

            let mut buf = [0u8; 3];
            let err = transport
                .receive(&mut buf, Duration::from_millis(50))
                .unwrap_err();
            assert!(err.is_timeout());
        }

        #[test]
        fn test_frame_gap_between_sends() {
            let (fd, _device) = pty();
            let mut transport = attached(fd);
            let gap = transport.frame_gap();
            assert!(gap > Duration::ZERO);

            let started = Instant::now();
            transport.send(&[0x01]).unwrap();
            transport.send(&[0x02]).unwrap();
            assert!(started.elapsed() >= gap);
        }

        #[test]
        fn test_client_reads_registers_over_pty() {
            let (fd, mut device) = pty();
            let mut client = ModbusRtuClient::new_rtu("/dev/ptmx", 9600, 'N', 8, 1).unwrap();
            client.set_socket(fd).unwrap();
            assert!(client.is_connected());

            let slave = thread::spawn(move || {
                let mut request = [0u8; 8];
                device.read_exact(&mut request).unwrap();
                let reply = with_crc(&[0x01, 0x03, 0x04, 0x00, 0x01, 0x00, 0x02]);
                device.write_all(&reply[..4]).unwrap();
                thread::sleep(Duration::from_millis(20));
                device.write_all(&reply[4..]).unwrap();
                request
            });

            assert_eq!(client.read_holding_registers(0, 2).unwrap(), vec![1, 2]);
            assert_eq!(
                slave.join().unwrap().to_vec(),
                with_crc(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x02])
            );
        }
    }
}
