//! Master request types and RTU frame encoding
//!
//! A [`ModbusRequest`] names a register and an operation; [`FrameBuilder`]
//! turns it into the exact bytes put on the wire, CRC included.

use tracing::debug;

use crate::constants::{
    FC_READ_HOLDING_REGISTERS, FC_WRITE_MULTIPLE_REGISTERS, MAX_READ_REGISTERS,
    MAX_RTU_FRAME_SIZE, MAX_WRITE_REGISTERS,
};
use crate::crc;
use crate::error::{ModbusError, ModbusResult};

/// Operation carried by a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestKind {
    /// Read `count` holding registers (FC03).
    Read { count: u16 },
    /// Write `count` registers from raw big-endian `data` (FC16).
    Write { count: u16, data: Vec<u8> },
}

/// One master request: a starting register and what to do with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModbusRequest {
    pub register: u16,
    pub kind: RequestKind,
}

impl ModbusRequest {
    /// Read `count` registers starting at `register`.
    pub fn read(register: u16, count: u16) -> Self {
        Self {
            register,
            kind: RequestKind::Read { count },
        }
    }

    /// Write `count` registers from raw bytes.
    ///
    /// The byte length is checked against `count` when the request is
    /// encoded, not here.
    pub fn write(register: u16, count: u16, data: impl Into<Vec<u8>>) -> Self {
        Self {
            register,
            kind: RequestKind::Write {
                count,
                data: data.into(),
            },
        }
    }

    /// Write 16-bit words, encoded big-endian.
    pub fn write_words(register: u16, values: &[u16]) -> Self {
        let data: Vec<u8> = values.iter().flat_map(|v| v.to_be_bytes()).collect();
        Self::write(register, values.len() as u16, data)
    }

    /// Function code this request is sent with.
    pub fn function_code(&self) -> u8 {
        match self.kind {
            RequestKind::Read { .. } => FC_READ_HOLDING_REGISTERS,
            RequestKind::Write { .. } => FC_WRITE_MULTIPLE_REGISTERS,
        }
    }

    /// Number of registers addressed.
    pub fn count(&self) -> u16 {
        match self.kind {
            RequestKind::Read { count } | RequestKind::Write { count, .. } => count,
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(self.kind, RequestKind::Write { .. })
    }

    /// Check the request against protocol limits.
    pub fn validate(&self) -> ModbusResult<()> {
        match &self.kind {
            RequestKind::Read { count } => {
                if *count == 0 || *count > MAX_READ_REGISTERS {
                    return Err(ModbusError::validation(format!(
                        "read count {} for register {:04x} outside 1..={}",
                        count, self.register, MAX_READ_REGISTERS
                    )));
                }
            }
            RequestKind::Write { count, data } => {
                if data.is_empty() {
                    return Err(ModbusError::validation(format!(
                        "empty write payload for register {:04x}",
                        self.register
                    )));
                }
                if data.len() != *count as usize * 2 {
                    return Err(ModbusError::validation(format!(
                        "write payload is {} bytes but {} registers need {}",
                        data.len(),
                        count,
                        *count as usize * 2
                    )));
                }
                if *count > MAX_WRITE_REGISTERS {
                    return Err(ModbusError::validation(format!(
                        "write count {} exceeds {}",
                        count, MAX_WRITE_REGISTERS
                    )));
                }
            }
        }
        Ok(())
    }

    /// Validate and encode as a complete RTU frame for `slave_address`.
    pub fn encode(&self, slave_address: u8) -> ModbusResult<Vec<u8>> {
        self.validate()?;

        let builder = FrameBuilder::new(slave_address)
            .function_code(self.function_code())
            .word(self.register)
            .word(self.count());

        let frame = match &self.kind {
            RequestKind::Read { .. } => builder.build(),
            RequestKind::Write { data, .. } => builder.byte(data.len() as u8).data(data).build(),
        };

        if frame.len() > MAX_RTU_FRAME_SIZE {
            return Err(ModbusError::validation(format!(
                "frame of {} bytes exceeds {}",
                frame.len(),
                MAX_RTU_FRAME_SIZE
            )));
        }
        Ok(frame)
    }
}

/// RTU frame builder - fluent API
///
/// Collects address, function and body bytes; `build` appends the CRC.
pub struct FrameBuilder {
    frame: Vec<u8>,
}

impl FrameBuilder {
    /// Start a frame addressed to `slave_address`
    #[inline]
    pub fn new(slave_address: u8) -> Self {
        let mut frame = Vec::with_capacity(16);
        frame.push(slave_address);
        Self { frame }
    }

    #[inline]
    pub fn function_code(mut self, fc: u8) -> Self {
        self.frame.push(fc);
        self
    }

    /// Add a big-endian 16-bit word
    #[inline]
    pub fn word(mut self, value: u16) -> Self {
        self.frame.extend_from_slice(&value.to_be_bytes());
        self
    }

    #[inline]
    pub fn byte(mut self, b: u8) -> Self {
        self.frame.push(b);
        self
    }

    #[inline]
    pub fn data(mut self, data: &[u8]) -> Self {
        self.frame.extend_from_slice(data);
        self
    }

    /// Append the CRC and return the frame bytes
    pub fn build(mut self) -> Vec<u8> {
        crc::append(&mut self.frame);
        debug!(
            "RTU frame built: slave={:02X} FC={:02X} total_len={}",
            self.frame[0],
            self.frame.get(1).copied().unwrap_or(0),
            self.frame.len()
        );
        self.frame
    }
}
