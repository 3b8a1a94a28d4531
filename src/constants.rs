//! Modbus RTU protocol constants
//!
//! Frame sizes here are whole RTU frames (slave address and CRC included),
//! which is what the frame assembler measures against the receive buffer.

// ============================================================================
// Frame Layout
// ============================================================================

/// Offset of the slave address byte.
pub const ADDRESS_OFFSET: usize = 0;

/// Offset of the function code byte.
pub const FUNCTION_OFFSET: usize = 1;

/// Offset of the exception code in an exception response, and of the byte
/// count in a read response.
pub const EXCEPTION_CODE_OFFSET: usize = 2;
pub const BYTE_COUNT_OFFSET: usize = 2;

/// CRC trailer length (low byte first).
pub const CRC_SIZE: usize = 2;

/// Bytes of a read response that are not register data:
/// Address(1) + Function(1) + Byte Count(1) + CRC(2)
pub const READ_RESPONSE_OVERHEAD: usize = 5;

/// Exception response: Address(1) + Function(1) + Exception Code(1) + CRC(2)
pub const EXCEPTION_FRAME_LEN: usize = 5;

/// Shortest normal (non-exception) response that can be classified:
/// a read response carrying one register.
pub const MIN_RESPONSE_LEN: usize = 7;

/// Write Multiple Registers echo:
/// Address(1) + Function(1) + Register(2) + Count(2) + CRC(2)
pub const WRITE_RESPONSE_LEN: usize = 8;

/// Read request: Address(1) + Function(1) + Register(2) + Count(2) + CRC(2)
pub const READ_REQUEST_LEN: usize = 8;

/// Bit set in the function code of an exception response.
pub const EXCEPTION_FLAG: u8 = 0x80;

/// Maximum RTU frame size (RS485 ADU limit).
pub const MAX_RTU_FRAME_SIZE: usize = 256;

// ============================================================================
// Register Operation Limits
// ============================================================================

/// Maximum registers for FC03: (253 - 2) / 2 = 125
pub const MAX_READ_REGISTERS: u16 = 125;

/// Maximum registers for FC16: (253 - 6) / 2 = 123
pub const MAX_WRITE_REGISTERS: u16 = 123;

// ============================================================================
// Modbus Function Codes
// ============================================================================

/// Read Holding Registers (FC03)
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;

/// Write Multiple Registers (FC16)
pub const FC_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;

// ============================================================================
// Modbus Exception Codes
// ============================================================================

pub const EXCEPTION_ILLEGAL_FUNCTION: u8 = 0x01;
pub const EXCEPTION_ILLEGAL_DATA_ADDRESS: u8 = 0x02;
pub const EXCEPTION_ILLEGAL_DATA_VALUE: u8 = 0x03;
pub const EXCEPTION_SERVER_DEVICE_FAILURE: u8 = 0x04;
pub const EXCEPTION_ACKNOWLEDGE: u8 = 0x05;
pub const EXCEPTION_SERVER_DEVICE_BUSY: u8 = 0x06;
pub const EXCEPTION_MEMORY_PARITY_ERROR: u8 = 0x08;
pub const EXCEPTION_GATEWAY_PATH_UNAVAILABLE: u8 = 0x0A;
pub const EXCEPTION_GATEWAY_TARGET_FAILED: u8 = 0x0B;
