//! # Register value helpers
//!
//! 32-bit values (integers and IEEE-754 floats) span two 16-bit registers.
//! Devices disagree on the byte layout, so every helper takes a [`ByteOrder`]
//! in ABCD notation, where A is the most significant byte of the value.
//!
//! For `0x12345678` held in registers `[r0, r1]`:
//!
//! | Order | r0 | r1 |
//! |-------|----|----|
//! | `Abcd` | `0x1234` | `0x5678` |
//! | `Dcba` | `0x7856` | `0x3412` |
//! | `Badc` | `0x3412` | `0x7856` |
//! | `Cdab` | `0x5678` | `0x1234` |

use std::fmt;
use std::str::FromStr;

use crate::error::{ModbusError, ModbusResult};

/// Layout of a 32-bit value across two registers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ByteOrder {
    /// Big-endian, most significant word first
    #[default]
    Abcd,
    /// Little-endian, least significant word first with swapped bytes
    Dcba,
    /// Big-endian words with bytes swapped inside each register
    Badc,
    /// Big-endian bytes with the two words swapped
    Cdab,
}

impl ByteOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            ByteOrder::Abcd => "ABCD",
            ByteOrder::Dcba => "DCBA",
            ByteOrder::Badc => "BADC",
            ByteOrder::Cdab => "CDAB",
        }
    }

    /// Big-endian bytes of the value to register pair
    fn pack(self, bytes: [u8; 4]) -> [u16; 2] {
        let [a, b, c, d] = bytes;
        let (r0, r1) = match self {
            ByteOrder::Abcd => ([a, b], [c, d]),
            ByteOrder::Dcba => ([d, c], [b, a]),
            ByteOrder::Badc => ([b, a], [d, c]),
            ByteOrder::Cdab => ([c, d], [a, b]),
        };
        [u16::from_be_bytes(r0), u16::from_be_bytes(r1)]
    }

    /// Register pair back to big-endian bytes of the value
    fn unpack(self, regs: [u16; 2]) -> [u8; 4] {
        let [p, q] = regs[0].to_be_bytes();
        let [r, s] = regs[1].to_be_bytes();
        match self {
            ByteOrder::Abcd => [p, q, r, s],
            ByteOrder::Dcba => [s, r, q, p],
            ByteOrder::Badc => [q, p, s, r],
            ByteOrder::Cdab => [r, s, p, q],
        }
    }
}

impl FromStr for ByteOrder {
    type Err = ModbusError;

    /// Accepts the four-letter names, case-insensitively, with optional '-'
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '-')
            .map(|c| c.to_ascii_uppercase())
            .collect();
        match normalized.as_str() {
            "ABCD" | "BE" => Ok(ByteOrder::Abcd),
            "DCBA" | "LE" => Ok(ByteOrder::Dcba),
            "BADC" => Ok(ByteOrder::Badc),
            "CDAB" => Ok(ByteOrder::Cdab),
            _ => Err(ModbusError::configuration(format!(
                "Unknown byte order '{}'",
                s
            ))),
        }
    }
}

impl fmt::Display for ByteOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn pair(regs: &[u16], index: usize) -> ModbusResult<[u16; 2]> {
    match regs.get(index..index + 2) {
        Some(&[r0, r1]) => Ok([r0, r1]),
        _ => Err(ModbusError::invalid_data(format!(
            "Need two registers at index {}, have {}",
            index,
            regs.len()
        ))),
    }
}

/// Read a u32 from `regs[index..index + 2]`
pub fn get_u32(regs: &[u16], index: usize, order: ByteOrder) -> ModbusResult<u32> {
    Ok(u32::from_be_bytes(order.unpack(pair(regs, index)?)))
}

pub fn get_i32(regs: &[u16], index: usize, order: ByteOrder) -> ModbusResult<i32> {
    Ok(get_u32(regs, index, order)? as i32)
}

/// Read an IEEE-754 single from `regs[index..index + 2]`
pub fn get_f32(regs: &[u16], index: usize, order: ByteOrder) -> ModbusResult<f32> {
    Ok(f32::from_bits(get_u32(regs, index, order)?))
}

pub fn u32_to_regs(value: u32, order: ByteOrder) -> [u16; 2] {
    order.pack(value.to_be_bytes())
}

pub fn i32_to_regs(value: i32, order: ByteOrder) -> [u16; 2] {
    u32_to_regs(value as u32, order)
}

pub fn f32_to_regs(value: f32, order: ByteOrder) -> [u16; 2] {
    u32_to_regs(value.to_bits(), order)
}

/// Store `value` into `regs[index..index + 2]`
pub fn set_f32(regs: &mut [u16], index: usize, value: f32, order: ByteOrder) -> ModbusResult<()> {
    set_u32(regs, index, value.to_bits(), order)
}

pub fn set_u32(regs: &mut [u16], index: usize, value: u32, order: ByteOrder) -> ModbusResult<()> {
    let len = regs.len();
    let slot = regs.get_mut(index..index + 2).ok_or_else(|| {
        ModbusError::invalid_data(format!(
            "Need two registers at index {}, have {}",
            index, len
        ))
    })?;
    slot.copy_from_slice(&u32_to_regs(value, order));
    Ok(())
}

/// Split a u32 into (high, low) words
#[inline]
pub fn split_u32(value: u32) -> (u16, u16) {
    ((value >> 16) as u16, value as u16)
}

/// Join (high, low) words into a u32
#[inline]
pub fn join_u32(high: u16, low: u16) -> u32 {
    (u32::from(high) << 16) | u32::from(low)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_layouts() {
        let value = 0x1234_5678;
        assert_eq!(u32_to_regs(value, ByteOrder::Abcd), [0x1234, 0x5678]);
        assert_eq!(u32_to_regs(value, ByteOrder::Dcba), [0x7856, 0x3412]);
        assert_eq!(u32_to_regs(value, ByteOrder::Badc), [0x3412, 0x7856]);
        assert_eq!(u32_to_regs(value, ByteOrder::Cdab), [0x5678, 0x1234]);
    }

    #[test]
    fn test_float_from_registers() {
        // 123456.0f32 = 0x47F12000
        let regs = [0x0020, 0xF147];
        assert_eq!(get_f32(&regs, 0, ByteOrder::Dcba).unwrap(), 123456.0);
        let regs = [0x47F1, 0x2000];
        assert_eq!(get_f32(&regs, 0, ByteOrder::Abcd).unwrap(), 123456.0);
    }

    #[test]
    fn test_set_and_get_at_offset() {
        let mut regs = [0u16; 4];
        set_f32(&mut regs, 1, -2.75, ByteOrder::Cdab).unwrap();
        assert_eq!(regs[0], 0);
        assert_eq!(regs[3], 0);
        assert_eq!(get_f32(&regs, 1, ByteOrder::Cdab).unwrap(), -2.75);
        assert_eq!(get_i32(&i32_to_regs(-5, ByteOrder::Abcd), 0, ByteOrder::Abcd).unwrap(), -5);
    }

    #[test]
    fn test_out_of_range_index() {
        let mut regs = [0u16; 2];
        assert!(get_u32(&regs, 1, ByteOrder::Abcd).is_err());
        assert!(set_u32(&mut regs, 1, 0, ByteOrder::Abcd).is_err());
    }

    #[test]
    fn test_parse_byte_order() {
        assert_eq!("cd-ab".parse::<ByteOrder>().unwrap(), ByteOrder::Cdab);
        assert_eq!("ABCD".parse::<ByteOrder>().unwrap(), ByteOrder::Abcd);
        assert!("XYZW".parse::<ByteOrder>().is_err());
        assert_eq!(ByteOrder::Badc.to_string(), "BADC");
    }

    #[test]
    fn test_split_join() {
        assert_eq!(split_u32(0xDEAD_BEEF), (0xDEAD, 0xBEEF));
        assert_eq!(join_u32(0xDEAD, 0xBEEF), 0xDEAD_BEEF);
    }

    proptest! {
        #[test]
        fn prop_every_order_is_reversible(value in any::<u32>()) {
            for order in [ByteOrder::Abcd, ByteOrder::Dcba, ByteOrder::Badc, ByteOrder::Cdab] {
                let regs = u32_to_regs(value, order);
                prop_assert_eq!(get_u32(&regs, 0, order).unwrap(), value);
            }
        }
    }
}
