//! CRC-16/Modbus checksum
//!
//! Polynomial 0xA001 (reflected 0x8005), initial value 0xFFFF, transmitted
//! low byte first.

use crc::{Crc, CRC_16_MODBUS};

use crate::constants::CRC_SIZE;

const CRC_MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Compute the Modbus CRC of `data`.
#[inline]
pub fn compute(data: &[u8]) -> u16 {
    CRC_MODBUS.checksum(data)
}

/// CRC carried in the last two bytes of `frame`, if it has any.
#[inline]
pub fn received(frame: &[u8]) -> Option<u16> {
    if frame.len() < CRC_SIZE {
        return None;
    }
    let n = frame.len();
    Some(u16::from_le_bytes([frame[n - 2], frame[n - 1]]))
}

/// Verify the trailing CRC of a complete frame.
///
/// Frames too short to hold at least one byte of body plus the CRC never
/// verify.
pub fn verify(frame: &[u8]) -> bool {
    if frame.len() <= CRC_SIZE {
        return false;
    }
    let body = &frame[..frame.len() - CRC_SIZE];
    received(frame) == Some(compute(body))
}

/// Append the CRC of everything currently in `frame`.
pub fn append(frame: &mut Vec<u8>) {
    let crc = compute(frame);
    frame.extend_from_slice(&crc.to_le_bytes());
}
