//! Modbus protocol definitions
//!
//! Function codes, exception codes, and the transport-independent request and
//! response types. A [`ModbusRequest`] knows how to build its PDU; a
//! [`ModbusResponse`] knows how to check itself against the request that
//! produced it and how to hand back the typed payload.

use std::fmt;

use crate::constants::{
    COIL_OFF, COIL_ON, EXCEPTION_FLAG, FC_MASK_WRITE_REGISTER, FC_READ_COILS,
    FC_READ_DISCRETE_INPUTS, FC_READ_HOLDING_REGISTERS, FC_READ_INPUT_REGISTERS,
    FC_READ_WRITE_MULTIPLE_REGISTERS, FC_REPORT_SLAVE_ID, FC_WRITE_MULTIPLE_COILS,
    FC_WRITE_MULTIPLE_REGISTERS, FC_WRITE_SINGLE_COIL, FC_WRITE_SINGLE_REGISTER,
};
use crate::error::{ModbusError, ModbusResult};
#[cfg(test)]
use crate::pdu::pack_bits;
use crate::pdu::{unpack_bits, ModbusPdu, PduBuilder};

/// Modbus slave/unit identifier (1-247, 0 = RTU broadcast, 0xFF = TCP)
pub type SlaveId = u8;

/// Modbus function codes supported by this master
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ModbusFunction {
    ReadCoils = FC_READ_COILS,
    ReadDiscreteInputs = FC_READ_DISCRETE_INPUTS,
    ReadHoldingRegisters = FC_READ_HOLDING_REGISTERS,
    ReadInputRegisters = FC_READ_INPUT_REGISTERS,
    WriteSingleCoil = FC_WRITE_SINGLE_COIL,
    WriteSingleRegister = FC_WRITE_SINGLE_REGISTER,
    WriteMultipleCoils = FC_WRITE_MULTIPLE_COILS,
    WriteMultipleRegisters = FC_WRITE_MULTIPLE_REGISTERS,
    ReportSlaveId = FC_REPORT_SLAVE_ID,
    MaskWriteRegister = FC_MASK_WRITE_REGISTER,
    ReadWriteMultipleRegisters = FC_READ_WRITE_MULTIPLE_REGISTERS,
}

impl ModbusFunction {
    pub fn from_u8(value: u8) -> ModbusResult<Self> {
        match value {
            FC_READ_COILS => Ok(ModbusFunction::ReadCoils),
            FC_READ_DISCRETE_INPUTS => Ok(ModbusFunction::ReadDiscreteInputs),
            FC_READ_HOLDING_REGISTERS => Ok(ModbusFunction::ReadHoldingRegisters),
            FC_READ_INPUT_REGISTERS => Ok(ModbusFunction::ReadInputRegisters),
            FC_WRITE_SINGLE_COIL => Ok(ModbusFunction::WriteSingleCoil),
            FC_WRITE_SINGLE_REGISTER => Ok(ModbusFunction::WriteSingleRegister),
            FC_WRITE_MULTIPLE_COILS => Ok(ModbusFunction::WriteMultipleCoils),
            FC_WRITE_MULTIPLE_REGISTERS => Ok(ModbusFunction::WriteMultipleRegisters),
            FC_REPORT_SLAVE_ID => Ok(ModbusFunction::ReportSlaveId),
            FC_MASK_WRITE_REGISTER => Ok(ModbusFunction::MaskWriteRegister),
            FC_READ_WRITE_MULTIPLE_REGISTERS => Ok(ModbusFunction::ReadWriteMultipleRegisters),
            _ => Err(ModbusError::invalid_function(value)),
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Functions whose reply carries a leading byte count
    pub fn has_byte_count(self) -> bool {
        matches!(
            self,
            ModbusFunction::ReadCoils
                | ModbusFunction::ReadDiscreteInputs
                | ModbusFunction::ReadHoldingRegisters
                | ModbusFunction::ReadInputRegisters
                | ModbusFunction::ReportSlaveId
                | ModbusFunction::ReadWriteMultipleRegisters
        )
    }

    /// Fixed reply payload length (after the function code), if any
    pub fn fixed_response_len(self) -> Option<usize> {
        match self {
            ModbusFunction::WriteSingleCoil
            | ModbusFunction::WriteSingleRegister
            | ModbusFunction::WriteMultipleCoils
            | ModbusFunction::WriteMultipleRegisters => Some(4),
            ModbusFunction::MaskWriteRegister => Some(6),
            _ => None,
        }
    }
}

impl fmt::Display for ModbusFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (0x{:02X})",
            ModbusPdu::function_code_description(self.to_u8()),
            self.to_u8()
        )
    }
}

/// Standard Modbus exception codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ModbusException {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    ServerDeviceFailure = 0x04,
    Acknowledge = 0x05,
    ServerDeviceBusy = 0x06,
    NegativeAcknowledge = 0x07,
    MemoryParityError = 0x08,
    GatewayPathUnavailable = 0x0A,
    GatewayTargetDeviceFailedToRespond = 0x0B,
}

impl ModbusException {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(ModbusException::IllegalFunction),
            0x02 => Some(ModbusException::IllegalDataAddress),
            0x03 => Some(ModbusException::IllegalDataValue),
            0x04 => Some(ModbusException::ServerDeviceFailure),
            0x05 => Some(ModbusException::Acknowledge),
            0x06 => Some(ModbusException::ServerDeviceBusy),
            0x07 => Some(ModbusException::NegativeAcknowledge),
            0x08 => Some(ModbusException::MemoryParityError),
            0x0A => Some(ModbusException::GatewayPathUnavailable),
            0x0B => Some(ModbusException::GatewayTargetDeviceFailedToRespond),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Get human-readable description
    pub fn description(self) -> &'static str {
        match self {
            ModbusException::IllegalFunction => "Illegal function",
            ModbusException::IllegalDataAddress => "Illegal data address",
            ModbusException::IllegalDataValue => "Illegal data value",
            ModbusException::ServerDeviceFailure => "Slave device or server failure",
            ModbusException::Acknowledge => "Acknowledge",
            ModbusException::ServerDeviceBusy => "Slave device or server is busy",
            ModbusException::NegativeAcknowledge => "Negative acknowledge",
            ModbusException::MemoryParityError => "Memory parity error",
            ModbusException::GatewayPathUnavailable => "Gateway path unavailable",
            ModbusException::GatewayTargetDeviceFailedToRespond => {
                "Target device failed to respond"
            }
        }
    }
}

impl fmt::Display for ModbusException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Modbus Exception 0x{:02X}: {}", self.to_u8(), self.description())
    }
}

/// One protocol operation, built per call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModbusRequest {
    ReadCoils {
        address: u16,
        quantity: u16,
    },
    ReadDiscreteInputs {
        address: u16,
        quantity: u16,
    },
    ReadHoldingRegisters {
        address: u16,
        quantity: u16,
    },
    ReadInputRegisters {
        address: u16,
        quantity: u16,
    },
    WriteSingleCoil {
        address: u16,
        value: bool,
    },
    WriteSingleRegister {
        address: u16,
        value: u16,
    },
    WriteMultipleCoils {
        address: u16,
        values: Vec<bool>,
    },
    WriteMultipleRegisters {
        address: u16,
        values: Vec<u16>,
    },
    ReportSlaveId,
    MaskWriteRegister {
        address: u16,
        and_mask: u16,
        or_mask: u16,
    },
    /// Write `values` at `write_address`, then read `read_quantity` registers
    ReadWriteMultipleRegisters {
        read_address: u16,
        read_quantity: u16,
        write_address: u16,
        values: Vec<u16>,
    },
    /// Arbitrary function code and payload
    Raw { function: u8, data: Vec<u8> },
}

impl ModbusRequest {
    pub fn function_code(&self) -> u8 {
        match self {
            ModbusRequest::ReadCoils { .. } => FC_READ_COILS,
            ModbusRequest::ReadDiscreteInputs { .. } => FC_READ_DISCRETE_INPUTS,
            ModbusRequest::ReadHoldingRegisters { .. } => FC_READ_HOLDING_REGISTERS,
            ModbusRequest::ReadInputRegisters { .. } => FC_READ_INPUT_REGISTERS,
            ModbusRequest::WriteSingleCoil { .. } => FC_WRITE_SINGLE_COIL,
            ModbusRequest::WriteSingleRegister { .. } => FC_WRITE_SINGLE_REGISTER,
            ModbusRequest::WriteMultipleCoils { .. } => FC_WRITE_MULTIPLE_COILS,
            ModbusRequest::WriteMultipleRegisters { .. } => FC_WRITE_MULTIPLE_REGISTERS,
            ModbusRequest::ReportSlaveId => FC_REPORT_SLAVE_ID,
            ModbusRequest::MaskWriteRegister { .. } => FC_MASK_WRITE_REGISTER,
            ModbusRequest::ReadWriteMultipleRegisters { .. } => FC_READ_WRITE_MULTIPLE_REGISTERS,
            ModbusRequest::Raw { function, .. } => *function,
        }
    }

    /// True for requests that only modify the device (valid as broadcast)
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            ModbusRequest::WriteSingleCoil { .. }
                | ModbusRequest::WriteSingleRegister { .. }
                | ModbusRequest::WriteMultipleCoils { .. }
                | ModbusRequest::WriteMultipleRegisters { .. }
                | ModbusRequest::MaskWriteRegister { .. }
        )
    }

    /// Encode the request PDU
    pub fn to_pdu(&self) -> ModbusResult<ModbusPdu> {
        match self {
            ModbusRequest::ReadCoils { address, quantity }
            | ModbusRequest::ReadDiscreteInputs { address, quantity }
            | ModbusRequest::ReadHoldingRegisters { address, quantity }
            | ModbusRequest::ReadInputRegisters { address, quantity } => {
                PduBuilder::build_read_request(self.function_code(), *address, *quantity)
            }
            ModbusRequest::WriteSingleCoil { address, value } => {
                PduBuilder::build_write_single_coil(*address, *value)
            }
            ModbusRequest::WriteSingleRegister { address, value } => {
                PduBuilder::build_write_single_register(*address, *value)
            }
            ModbusRequest::WriteMultipleCoils { address, values } => {
                PduBuilder::build_write_multiple_coils(*address, values)
            }
            ModbusRequest::WriteMultipleRegisters { address, values } => {
                PduBuilder::build_write_multiple_registers(*address, values)
            }
            ModbusRequest::ReportSlaveId => PduBuilder::build_report_slave_id(),
            ModbusRequest::MaskWriteRegister {
                address,
                and_mask,
                or_mask,
            } => PduBuilder::build_mask_write_register(*address, *and_mask, *or_mask),
            ModbusRequest::ReadWriteMultipleRegisters {
                read_address,
                read_quantity,
                write_address,
                values,
            } => PduBuilder::build_read_write_multiple_registers(
                *read_address,
                *read_quantity,
                *write_address,
                values,
            ),
            ModbusRequest::Raw { function, data } => {
                if function & EXCEPTION_FLAG != 0 || *function == 0 {
                    return Err(ModbusError::invalid_function(*function));
                }
                Ok(PduBuilder::new().function_code(*function)?.data(data)?.build())
            }
        }
    }
}

/// Decoded reply to a [`ModbusRequest`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModbusResponse {
    pub slave_id: SlaveId,
    pdu: ModbusPdu,
}

impl ModbusResponse {
    /// Wrap a response PDU, mapping exception replies to errors
    ///
    /// The function code must be `expected_function` or
    /// `expected_function | 0x80`; anything else is a protocol error.
    pub fn from_pdu(slave_id: SlaveId, pdu: ModbusPdu, expected_function: u8) -> ModbusResult<Self> {
        let function = pdu
            .function_code()
            .ok_or_else(|| ModbusError::frame("Empty response PDU"))?;

        if function == expected_function | EXCEPTION_FLAG {
            let code = pdu
                .exception_code()
                .ok_or_else(|| ModbusError::frame("Exception response without code"))?;
            return Err(ModbusError::exception(expected_function, code));
        }

        if function != expected_function {
            return Err(ModbusError::protocol(format!(
                "Function code mismatch: expected 0x{:02X}, got 0x{:02X}",
                expected_function, function
            )));
        }

        Ok(Self { slave_id, pdu })
    }

    pub fn function_code(&self) -> u8 {
        self.pdu.function_code().unwrap_or(0)
    }

    pub fn pdu(&self) -> &ModbusPdu {
        &self.pdu
    }

    /// Payload after the function code
    pub fn data(&self) -> &[u8] {
        self.pdu.payload()
    }

    /// Check that this reply answers `request`
    ///
    /// Reads must carry exactly the bytes implied by the requested quantity;
    /// writes must echo what was written.
    pub fn verify(&self, request: &ModbusRequest) -> ModbusResult<()> {
        match request {
            ModbusRequest::ReadCoils { quantity, .. }
            | ModbusRequest::ReadDiscreteInputs { quantity, .. } => {
                self.expect_byte_count(usize::from(*quantity).div_ceil(8))
            }
            ModbusRequest::ReadHoldingRegisters { quantity, .. }
            | ModbusRequest::ReadInputRegisters { quantity, .. } => {
                self.expect_byte_count(usize::from(*quantity) * 2)
            }
            ModbusRequest::ReadWriteMultipleRegisters { read_quantity, .. } => {
                self.expect_byte_count(usize::from(*read_quantity) * 2)
            }
            ModbusRequest::ReportSlaveId => self.byte_counted_data().map(|_| ()),
            ModbusRequest::WriteSingleCoil { address, value } => {
                let coil = if *value { COIL_ON } else { COIL_OFF };
                self.expect_echo(&[*address, coil])
            }
            ModbusRequest::WriteSingleRegister { address, value } => {
                self.expect_echo(&[*address, *value])
            }
            ModbusRequest::WriteMultipleCoils { address, values } => {
                self.expect_echo(&[*address, values.len() as u16])
            }
            ModbusRequest::WriteMultipleRegisters { address, values } => {
                self.expect_echo(&[*address, values.len() as u16])
            }
            ModbusRequest::MaskWriteRegister {
                address,
                and_mask,
                or_mask,
            } => self.expect_echo(&[*address, *and_mask, *or_mask]),
            ModbusRequest::Raw { .. } => Ok(()),
        }
    }

    /// Unpack exactly `count` bits (FC01/FC02)
    pub fn parse_bits(&self, count: u16) -> ModbusResult<Vec<bool>> {
        unpack_bits(self.byte_counted_data()?, usize::from(count))
    }

    /// Decode exactly `count` registers (FC03/FC04/FC23)
    pub fn parse_registers(&self, count: u16) -> ModbusResult<Vec<u16>> {
        let data = self.byte_counted_data()?;
        let count = usize::from(count);
        if data.len() != count * 2 {
            return Err(ModbusError::protocol(format!(
                "Register data length {} does not match {} registers",
                data.len(),
                count
            )));
        }
        Ok(data
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect())
    }

    /// Data following the byte count field
    pub fn byte_counted_data(&self) -> ModbusResult<&[u8]> {
        let data = self.data();
        let (&byte_count, rest) = data
            .split_first()
            .ok_or_else(|| ModbusError::frame("Response without byte count"))?;
        if rest.len() != usize::from(byte_count) {
            return Err(ModbusError::protocol(format!(
                "Byte count {} does not match {} data bytes",
                byte_count,
                rest.len()
            )));
        }
        Ok(rest)
    }

    fn expect_byte_count(&self, expected: usize) -> ModbusResult<()> {
        let data = self.byte_counted_data()?;
        if data.len() != expected {
            return Err(ModbusError::protocol(format!(
                "Unexpected byte count: expected {}, got {}",
                expected,
                data.len()
            )));
        }
        Ok(())
    }

    fn expect_echo(&self, fields: &[u16]) -> ModbusResult<()> {
        let expected: Vec<u8> = fields.iter().flat_map(|v| v.to_be_bytes()).collect();
        if self.data() != expected.as_slice() {
            return Err(ModbusError::protocol(format!(
                "Write echo mismatch for function 0x{:02X}: sent {:02X?}, got {:02X?}",
                self.function_code(),
                expected,
                self.data()
            )));
        }
        Ok(())
    }
}

/// Reply a compliant device would send for `request`
///
/// `registers` and `bits` supply read data; writes are echoed.
#[cfg(test)]
pub(crate) fn response_pdu_for(
    request: &ModbusRequest,
    registers: &[u16],
    bits: &[bool],
) -> ModbusResult<ModbusPdu> {
    let mut pdu = ModbusPdu::new();
    pdu.push(request.function_code())?;
    match request {
        ModbusRequest::ReadCoils { .. } | ModbusRequest::ReadDiscreteInputs { .. } => {
            let packed = pack_bits(bits);
            pdu.push(packed.len() as u8)?;
            pdu.extend(&packed)?;
        }
        ModbusRequest::ReadHoldingRegisters { .. }
        | ModbusRequest::ReadInputRegisters { .. }
        | ModbusRequest::ReadWriteMultipleRegisters { .. } => {
            pdu.push((registers.len() * 2) as u8)?;
            for &value in registers {
                pdu.push_u16(value)?;
            }
        }
        ModbusRequest::MaskWriteRegister { .. } => {
            pdu.extend(&request.to_pdu()?.payload()[..6])?;
        }
        ModbusRequest::ReportSlaveId | ModbusRequest::Raw { .. } => {
            return Err(ModbusError::invalid_data("No canned reply for this request"));
        }
        _ => {
            pdu.extend(&request.to_pdu()?.payload()[..4])?;
        }
    }
    Ok(pdu)
}
