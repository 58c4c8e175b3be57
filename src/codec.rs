//! Frame codecs
//!
//! A codec wraps a PDU into an ADU for one transport flavour and validates the
//! framing of the reply. Reading is driven by the codec: the engine reads
//! [`FrameCodec::initial_read_len`] bytes, asks [`FrameCodec::remaining_len`]
//! how much more belongs to the frame, then hands the whole frame to
//! [`FrameCodec::decode`].
//!
//! # TCP (MBAP)
//!
//! ```text
//! | tid (2) | protocol id = 0 (2) | length (2) | unit id (1) | PDU |
//! ```
//!
//! `length` counts the unit id plus the PDU.
//!
//! # RTU
//!
//! ```text
//! | slave (1) | PDU | CRC16 (2, low byte first) |
//! ```

use bytes::{BufMut, BytesMut};
use crc::{Crc, CRC_16_MODBUS};
use tracing::{debug, warn};

use crate::constants::{
    BROADCAST_ADDRESS, EXCEPTION_FLAG, MAX_MBAP_LENGTH, MAX_RTU_FRAME_SIZE, MAX_TCP_FRAME_SIZE,
    MBAP_HEADER_LEN, MODBUS_PROTOCOL_ID, RTU_CRC_LEN, RTU_HEADER_LEN,
};
use crate::error::{ModbusError, ModbusResult};
use crate::pdu::ModbusPdu;
use crate::protocol::{ModbusFunction, ModbusResponse, SlaveId};

const CRC_MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// CRC-16/MODBUS (poly 0xA001 reflected, init 0xFFFF)
#[inline]
pub fn crc16(data: &[u8]) -> u16 {
    CRC_MODBUS.checksum(data)
}

/// How many more bytes belong to the frame being read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameLength {
    /// Exactly this many bytes remain
    Exact(usize),
    /// Length is not derivable from the header; read until the line is silent
    UntilSilence,
}

/// ADU framing for one transport flavour
pub trait FrameCodec: Send {
    /// Short tag used in packet logs ("TCP", "RTU")
    fn name(&self) -> &'static str;

    /// Wrap `pdu` for `slave_id`
    fn encode(&mut self, slave_id: SlaveId, pdu: &ModbusPdu) -> BytesMut;

    /// Bytes to read before the frame length can be determined
    fn initial_read_len(&self) -> usize;

    /// Remaining bytes after the `head` returned by the initial read
    fn remaining_len(&self, head: &[u8]) -> ModbusResult<FrameLength>;

    /// Validate the framing of a complete reply and extract its PDU
    fn decode(
        &self,
        frame: &[u8],
        slave_id: SlaveId,
        function: u8,
    ) -> ModbusResult<ModbusResponse>;

    /// Largest complete reply frame this framing allows
    fn max_frame_len(&self) -> usize;

    /// Whether `slave_id` addresses every device without a reply
    fn is_broadcast(&self, _slave_id: SlaveId) -> bool {
        false
    }
}

// ============================================================================
// TCP
// ============================================================================

/// MBAP framing with a per-request transaction id
#[derive(Debug, Clone)]
pub struct TcpCodec {
    transaction_id: u16,
}

impl Default for TcpCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpCodec {
    pub fn new() -> Self {
        Self { transaction_id: 0 }
    }

    /// Transaction id of the last encoded request
    pub fn transaction_id(&self) -> u16 {
        self.transaction_id
    }

    fn next_transaction_id(&mut self) -> u16 {
        self.transaction_id = self.transaction_id.wrapping_add(1);
        if self.transaction_id == 0 {
            self.transaction_id = 1;
        }
        self.transaction_id
    }
}

impl FrameCodec for TcpCodec {
    fn name(&self) -> &'static str {
        "TCP"
    }

    fn encode(&mut self, slave_id: SlaveId, pdu: &ModbusPdu) -> BytesMut {
        let transaction_id = self.next_transaction_id();
        let mut frame = BytesMut::with_capacity(MBAP_HEADER_LEN + pdu.len());
        frame.put_u16(transaction_id);
        frame.put_u16(MODBUS_PROTOCOL_ID);
        frame.put_u16((pdu.len() + 1) as u16);
        frame.put_u8(slave_id);
        frame.put_slice(pdu.as_slice());
        frame
    }

    fn initial_read_len(&self) -> usize {
        MBAP_HEADER_LEN
    }

    fn max_frame_len(&self) -> usize {
        MAX_TCP_FRAME_SIZE
    }

    fn remaining_len(&self, head: &[u8]) -> ModbusResult<FrameLength> {
        if head.len() < MBAP_HEADER_LEN {
            return Err(ModbusError::frame(format!(
                "MBAP header too short: {} bytes",
                head.len()
            )));
        }
        let length = usize::from(u16::from_be_bytes([head[4], head[5]]));
        if !(2..=MAX_MBAP_LENGTH).contains(&length) {
            return Err(ModbusError::frame(format!(
                "Invalid MBAP length field: {}",
                length
            )));
        }
        Ok(FrameLength::Exact(length - 1))
    }

    fn decode(
        &self,
        frame: &[u8],
        slave_id: SlaveId,
        function: u8,
    ) -> ModbusResult<ModbusResponse> {
        if frame.len() < MBAP_HEADER_LEN + 1 {
            return Err(ModbusError::frame(format!(
                "TCP frame too short: {} bytes",
                frame.len()
            )));
        }

        let transaction_id = u16::from_be_bytes([frame[0], frame[1]]);
        let protocol_id = u16::from_be_bytes([frame[2], frame[3]]);
        let length = usize::from(u16::from_be_bytes([frame[4], frame[5]]));
        let unit_id = frame[6];

        if transaction_id != self.transaction_id {
            warn!(
                "Transaction id mismatch: expected {}, got {}",
                self.transaction_id, transaction_id
            );
            return Err(ModbusError::protocol(format!(
                "Transaction id mismatch: expected {}, got {}",
                self.transaction_id, transaction_id
            )));
        }
        if protocol_id != MODBUS_PROTOCOL_ID {
            return Err(ModbusError::frame(format!(
                "Invalid protocol id: {}",
                protocol_id
            )));
        }
        if length + MBAP_HEADER_LEN - 1 != frame.len() {
            return Err(ModbusError::frame(format!(
                "MBAP length {} does not match frame of {} bytes",
                length,
                frame.len()
            )));
        }
        if unit_id != slave_id {
            return Err(ModbusError::SlaveMismatch {
                expected: slave_id,
                received: unit_id,
            });
        }

        let pdu = ModbusPdu::from_slice(&frame[MBAP_HEADER_LEN..])?;
        ModbusResponse::from_pdu(unit_id, pdu, function)
    }
}

// ============================================================================
// RTU
// ============================================================================

/// Serial framing: slave address, PDU, CRC16
#[derive(Debug, Clone, Default)]
pub struct RtuCodec;

impl RtuCodec {
    pub fn new() -> Self {
        Self
    }
}

impl FrameCodec for RtuCodec {
    fn name(&self) -> &'static str {
        "RTU"
    }

    fn encode(&mut self, slave_id: SlaveId, pdu: &ModbusPdu) -> BytesMut {
        let mut frame = BytesMut::with_capacity(RTU_HEADER_LEN + pdu.len() + RTU_CRC_LEN);
        frame.put_u8(slave_id);
        frame.put_slice(pdu.as_slice());
        let crc = crc16(&frame);
        frame.put_u16_le(crc);
        frame
    }

    /// Slave, function code and the first payload byte
    fn initial_read_len(&self) -> usize {
        RTU_HEADER_LEN + 2
    }

    fn max_frame_len(&self) -> usize {
        MAX_RTU_FRAME_SIZE
    }

    fn remaining_len(&self, head: &[u8]) -> ModbusResult<FrameLength> {
        let (function, meta) = match head {
            [_, function, meta, ..] => (*function, *meta),
            _ => {
                return Err(ModbusError::frame(format!(
                    "RTU header too short: {} bytes",
                    head.len()
                )))
            }
        };

        if function & EXCEPTION_FLAG != 0 {
            return Ok(FrameLength::Exact(RTU_CRC_LEN));
        }

        let function = match ModbusFunction::from_u8(function) {
            Ok(function) => function,
            Err(_) => {
                debug!("RTU reply for function 0x{:02X}, reading until silence", function);
                return Ok(FrameLength::UntilSilence);
            }
        };

        let payload_rest = if function.has_byte_count() {
            usize::from(meta)
        } else {
            match function.fixed_response_len() {
                Some(len) => len - 1,
                None => return Ok(FrameLength::UntilSilence),
            }
        };
        Ok(FrameLength::Exact(payload_rest + RTU_CRC_LEN))
    }

    fn decode(
        &self,
        frame: &[u8],
        slave_id: SlaveId,
        function: u8,
    ) -> ModbusResult<ModbusResponse> {
        if frame.len() < RTU_HEADER_LEN + 1 + RTU_CRC_LEN {
            return Err(ModbusError::frame(format!(
                "RTU frame too short: {} bytes",
                frame.len()
            )));
        }
        if frame.len() > MAX_RTU_FRAME_SIZE {
            return Err(ModbusError::frame(format!(
                "RTU frame too large: {} bytes",
                frame.len()
            )));
        }

        let (body, crc_bytes) = frame.split_at(frame.len() - RTU_CRC_LEN);
        let received = u16::from_le_bytes([crc_bytes[0], crc_bytes[1]]);
        let calculated = crc16(body);
        if received != calculated {
            return Err(ModbusError::Crc {
                calculated,
                received,
            });
        }

        let address = body[0];
        if address != slave_id {
            return Err(ModbusError::SlaveMismatch {
                expected: slave_id,
                received: address,
            });
        }

        let pdu = ModbusPdu::from_slice(&body[RTU_HEADER_LEN..])?;
        ModbusResponse::from_pdu(address, pdu, function)
    }

    fn is_broadcast(&self, slave_id: SlaveId) -> bool {
        slave_id == BROADCAST_ADDRESS
    }
}
