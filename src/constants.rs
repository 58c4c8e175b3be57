//! Modbus protocol constants based on official specification
//!
//! These constants are derived from the official Modbus specification:
//! - Maximum PDU size: 253 bytes (inherited from RS485 ADU limit of 256 bytes)
//! - Register/coil limits are calculated to fit within the PDU size constraint
//!
//! The error code space at the bottom mirrors the numbering used by the C
//! Modbus stacks so that codes can be compared across implementations.

use std::time::Duration;

// ============================================================================
// Frame Size Constants
// ============================================================================

/// Modbus MBAP header length for TCP
/// Format: Transaction ID(2) + Protocol ID(2) + Length(2) + Unit ID(1) = 7 bytes
pub const MBAP_HEADER_LEN: usize = 7;

/// Modbus TCP protocol identifier (always zero)
pub const MODBUS_PROTOCOL_ID: u16 = 0;

/// RTU header length (slave address)
pub const RTU_HEADER_LEN: usize = 1;

/// RTU trailer length (CRC16, little-endian)
pub const RTU_CRC_LEN: usize = 2;

/// Maximum PDU (Protocol Data Unit) size per Modbus specification
/// This is the fundamental limit inherited from RS485 implementation:
/// RS485 ADU (256 bytes) - Slave Address (1 byte) - CRC (2 bytes) = 253 bytes
pub const MAX_PDU_SIZE: usize = 253;

/// Maximum MBAP length field value (Unit ID + PDU)
/// = 1 (Unit ID) + 253 (Max PDU) = 254 bytes
pub const MAX_MBAP_LENGTH: usize = 1 + MAX_PDU_SIZE;

/// Maximum RTU ADU size (slave + PDU + CRC)
pub const MAX_RTU_FRAME_SIZE: usize = RTU_HEADER_LEN + MAX_PDU_SIZE + RTU_CRC_LEN;

/// Maximum TCP ADU size (MBAP without unit id + MBAP length)
pub const MAX_TCP_FRAME_SIZE: usize = MBAP_HEADER_LEN - 1 + MAX_MBAP_LENGTH;

// ============================================================================
// Register Operation Limits
// ============================================================================

/// Maximum number of registers for FC03/FC04 (Read Holding/Input Registers)
///
/// Response PDU: FC(1) + Byte Count(1) + N × 2 ≤ 253 → N ≤ 125
pub const MAX_READ_REGISTERS: usize = 125;

/// Maximum number of registers for FC16 (Write Multiple Registers)
///
/// Request PDU: FC(1) + Addr(2) + Qty(2) + Byte Count(1) + N × 2 ≤ 253 → N ≤ 123
pub const MAX_WRITE_REGISTERS: usize = 123;

/// Maximum number of registers written by FC23 (Read/Write Multiple Registers)
///
/// Request PDU: FC(1) + RAddr(2) + RQty(2) + WAddr(2) + WQty(2) + Byte Count(1) + N × 2 ≤ 253
pub const MAX_WR_WRITE_REGISTERS: usize = 121;

/// Maximum number of registers read by FC23
pub const MAX_WR_READ_REGISTERS: usize = 125;

// ============================================================================
// Coil Operation Limits
// ============================================================================

/// Maximum number of coils for FC01/FC02 (Read Coils/Discrete Inputs)
pub const MAX_READ_COILS: usize = 2000;

/// Maximum number of coils for FC15 (Write Multiple Coils)
pub const MAX_WRITE_COILS: usize = 1968;

// ============================================================================
// Modbus Function Codes
// ============================================================================

/// Read Coils (FC01)
pub const FC_READ_COILS: u8 = 0x01;

/// Read Discrete Inputs (FC02)
pub const FC_READ_DISCRETE_INPUTS: u8 = 0x02;

/// Read Holding Registers (FC03)
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;

/// Read Input Registers (FC04)
pub const FC_READ_INPUT_REGISTERS: u8 = 0x04;

/// Write Single Coil (FC05)
pub const FC_WRITE_SINGLE_COIL: u8 = 0x05;

/// Write Single Register (FC06)
pub const FC_WRITE_SINGLE_REGISTER: u8 = 0x06;

/// Write Multiple Coils (FC15)
pub const FC_WRITE_MULTIPLE_COILS: u8 = 0x0F;

/// Write Multiple Registers (FC16)
pub const FC_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;

/// Report Server ID (FC17)
pub const FC_REPORT_SLAVE_ID: u8 = 0x11;

/// Mask Write Register (FC22)
pub const FC_MASK_WRITE_REGISTER: u8 = 0x16;

/// Read/Write Multiple Registers (FC23)
pub const FC_READ_WRITE_MULTIPLE_REGISTERS: u8 = 0x17;

/// Bit set on the function code of an exception response
pub const EXCEPTION_FLAG: u8 = 0x80;

/// Coil ON value for FC05
pub const COIL_ON: u16 = 0xFF00;

/// Coil OFF value for FC05
pub const COIL_OFF: u16 = 0x0000;

// ============================================================================
// Modbus Exception Codes
// ============================================================================

/// Illegal Function
pub const EXCEPTION_ILLEGAL_FUNCTION: u8 = 0x01;

/// Illegal Data Address
pub const EXCEPTION_ILLEGAL_DATA_ADDRESS: u8 = 0x02;

/// Illegal Data Value
pub const EXCEPTION_ILLEGAL_DATA_VALUE: u8 = 0x03;

/// Server Device Failure
pub const EXCEPTION_SERVER_DEVICE_FAILURE: u8 = 0x04;

/// Acknowledge
pub const EXCEPTION_ACKNOWLEDGE: u8 = 0x05;

/// Server Device Busy
pub const EXCEPTION_SERVER_DEVICE_BUSY: u8 = 0x06;

/// Negative Acknowledge
pub const EXCEPTION_NEGATIVE_ACKNOWLEDGE: u8 = 0x07;

/// Memory Parity Error
pub const EXCEPTION_MEMORY_PARITY_ERROR: u8 = 0x08;

/// Gateway Path Unavailable
pub const EXCEPTION_GATEWAY_PATH_UNAVAILABLE: u8 = 0x0A;

/// Gateway Target Device Failed to Respond
pub const EXCEPTION_GATEWAY_TARGET_FAILED: u8 = 0x0B;

// ============================================================================
// Addressing
// ============================================================================

/// RTU broadcast address: writes are sent without waiting for a reply
pub const BROADCAST_ADDRESS: u8 = 0;

/// Highest addressable RTU slave
pub const MAX_SLAVE_ID: u8 = 247;

/// Unit id used on TCP when the server is not a gateway
pub const TCP_SLAVE: u8 = 0xFF;

/// Modbus TCP default port
pub const DEFAULT_TCP_PORT: u16 = 502;

// ============================================================================
// Timeouts
// ============================================================================

/// Default wait for the first byte of a reply
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(500);

/// Default maximum gap between two bytes of the same reply
pub const DEFAULT_BYTE_TIMEOUT: Duration = Duration::from_millis(500);

// ============================================================================
// Error Code Space
// ============================================================================

/// Base of the private error number range
pub const MODBUS_ENOBASE: i32 = 112_345_678;

/// Invalid CRC
pub const EMBBADCRC: i32 = MODBUS_ENOBASE + 12;

/// Invalid data in response
pub const EMBBADDATA: i32 = MODBUS_ENOBASE + 13;

/// Response not from requested slave
pub const EMBBADSLAVE: i32 = MODBUS_ENOBASE + 17;

/// Generic I/O error
pub const EIO: i32 = 5;

/// Invalid argument
pub const EINVAL: i32 = 22;

/// Transport endpoint is not connected
pub const ENOTCONN: i32 = 107;

/// Connection timed out
pub const ETIMEDOUT: i32 = 110;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_size_constants() {
        assert_eq!(MBAP_HEADER_LEN, 7);
        assert_eq!(MAX_PDU_SIZE, 253);
        assert_eq!(MAX_MBAP_LENGTH, 254);
        assert_eq!(MAX_RTU_FRAME_SIZE, 256);
        assert_eq!(MAX_TCP_FRAME_SIZE, 260);
    }

    #[test]
    fn test_register_limits() {
        let read_pdu_size = 1 + 1 + (MAX_READ_REGISTERS * 2);
        assert!(read_pdu_size <= MAX_PDU_SIZE);

        let write_pdu_size = 1 + 2 + 2 + 1 + (MAX_WRITE_REGISTERS * 2);
        assert!(write_pdu_size <= MAX_PDU_SIZE);

        let wr_pdu_size = 1 + 2 + 2 + 2 + 2 + 1 + (MAX_WR_WRITE_REGISTERS * 2);
        assert!(wr_pdu_size <= MAX_PDU_SIZE);
    }

    #[test]
    fn test_coil_limits() {
        let read_coil_pdu = 1 + 1 + MAX_READ_COILS.div_ceil(8);
        assert!(read_coil_pdu <= MAX_PDU_SIZE);

        let write_coil_pdu = 1 + 2 + 2 + 1 + MAX_WRITE_COILS.div_ceil(8);
        assert!(write_coil_pdu <= MAX_PDU_SIZE);
    }

    #[test]
    fn test_exception_function_codes() {
        assert_eq!(FC_READ_HOLDING_REGISTERS | EXCEPTION_FLAG, 0x83);
        assert_eq!(FC_READ_WRITE_MULTIPLE_REGISTERS | EXCEPTION_FLAG, 0x97);
    }
}
