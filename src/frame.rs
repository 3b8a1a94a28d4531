//! Incremental RTU frame assembler
//!
//! RTU has no frame delimiter. Frame length is inferred from the function
//! code and, for read responses, the embedded byte count, so extraction has
//! to tolerate partially arrived frames and resynchronize after any byte it
//! cannot place.
//!
//! [`try_extract_frame`] consumes the head of a [`BytesMut`] and yields at
//! most one frame per call:
//!
//! | Buffer head | Result |
//! |-------------|--------|
//! | empty / incomplete frame | [`Extraction::NeedMoreData`] (nothing consumed) |
//! | wrong slave address | [`Extraction::FramingError`] (one byte consumed) |
//! | unsupported function | [`Extraction::FramingError`] (one byte consumed) |
//! | complete frame, CRC ok | [`Extraction::Frame`] |
//! | complete frame, CRC bad | [`Extraction::CrcError`] |
//!
//! After a framing error the caller is expected to clear the remainder of
//! the buffer.

use bytes::{Buf, Bytes, BytesMut};

use crate::constants::{
    ADDRESS_OFFSET, BYTE_COUNT_OFFSET, CRC_SIZE, EXCEPTION_CODE_OFFSET, EXCEPTION_FLAG,
    EXCEPTION_FRAME_LEN, FC_READ_HOLDING_REGISTERS, FC_WRITE_MULTIPLE_REGISTERS,
    FUNCTION_OFFSET, MIN_RESPONSE_LEN, READ_RESPONSE_OVERHEAD, WRITE_RESPONSE_LEN,
};
use crate::crc;

/// Response shape, decided by the function code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    ReadResponse,
    WriteResponse,
    Exception,
}

/// One complete response frame popped from the receive buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtuFrame {
    bytes: Bytes,
    kind: FrameKind,
}

impl RtuFrame {
    fn new(bytes: Bytes, kind: FrameKind) -> Self {
        Self { bytes, kind }
    }

    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    pub fn address(&self) -> u8 {
        self.bytes[ADDRESS_OFFSET]
    }

    /// Raw function code, exception flag included.
    pub fn function_code(&self) -> u8 {
        self.bytes[FUNCTION_OFFSET]
    }

    pub fn is_exception(&self) -> bool {
        self.kind == FrameKind::Exception
    }

    pub fn exception_code(&self) -> Option<u8> {
        if self.is_exception() {
            Some(self.bytes[EXCEPTION_CODE_OFFSET])
        } else {
            None
        }
    }

    /// Body bytes between the header and the CRC.
    ///
    /// - read response: the register data (byte count excluded)
    /// - write response: the echoed register and count
    /// - exception: the exception code
    pub fn payload(&self) -> &[u8] {
        let end = self.bytes.len() - CRC_SIZE;
        match self.kind {
            FrameKind::ReadResponse => &self.bytes[BYTE_COUNT_OFFSET + 1..end],
            FrameKind::WriteResponse | FrameKind::Exception => &self.bytes[FUNCTION_OFFSET + 1..end],
        }
    }

    /// Complete frame bytes, CRC included.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Why the head of the buffer could not start a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingReason {
    AddressMismatch { expected: u8 },
    UnsupportedFunction(u8),
}

impl std::fmt::Display for FramingReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AddressMismatch { expected } => {
                write!(f, "slave address mismatch (expected {:02x})", expected)
            }
            Self::UnsupportedFunction(fc) => write!(f, "unsupported function code {:02x}", fc),
        }
    }
}

/// Result of one extraction attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    /// Buffer holds no complete frame yet.
    NeedMoreData,
    /// A complete frame with a valid CRC.
    Frame(RtuFrame),
    /// A complete frame whose CRC does not match.
    CrcError {
        frame: RtuFrame,
        expected: u16,
        actual: u16,
    },
    /// The head byte was discarded; the remainder should be cleared.
    FramingError { discarded: u8, reason: FramingReason },
}

/// Try to pop one frame from the head of `buffer`.
pub fn try_extract_frame(buffer: &mut BytesMut, expected_address: u8) -> Extraction {
    if buffer.is_empty() {
        return Extraction::NeedMoreData;
    }

    let address = buffer[ADDRESS_OFFSET];
    if address != expected_address {
        buffer.advance(1);
        return Extraction::FramingError {
            discarded: address,
            reason: FramingReason::AddressMismatch {
                expected: expected_address,
            },
        };
    }

    if buffer.len() < EXCEPTION_FRAME_LEN {
        return Extraction::NeedMoreData;
    }

    let function = buffer[FUNCTION_OFFSET];
    if function & EXCEPTION_FLAG != 0 {
        return pop_frame(buffer, EXCEPTION_FRAME_LEN, FrameKind::Exception);
    }

    if buffer.len() < MIN_RESPONSE_LEN {
        return Extraction::NeedMoreData;
    }

    match function {
        FC_READ_HOLDING_REGISTERS => {
            let frame_len = buffer[BYTE_COUNT_OFFSET] as usize + READ_RESPONSE_OVERHEAD;
            if buffer.len() < frame_len {
                return Extraction::NeedMoreData;
            }
            pop_frame(buffer, frame_len, FrameKind::ReadResponse)
        }
        FC_WRITE_MULTIPLE_REGISTERS => {
            if buffer.len() < WRITE_RESPONSE_LEN {
                return Extraction::NeedMoreData;
            }
            pop_frame(buffer, WRITE_RESPONSE_LEN, FrameKind::WriteResponse)
        }
        other => {
            buffer.advance(1);
            Extraction::FramingError {
                discarded: address,
                reason: FramingReason::UnsupportedFunction(other),
            }
        }
    }
}

fn pop_frame(buffer: &mut BytesMut, len: usize, kind: FrameKind) -> Extraction {
    let bytes = buffer.split_to(len).freeze();
    let body = &bytes[..len - CRC_SIZE];
    let expected = crc::compute(body);
    let actual = u16::from_le_bytes([bytes[len - 2], bytes[len - 1]]);
    let frame = RtuFrame::new(bytes, kind);

    if expected == actual {
        Extraction::Frame(frame)
    } else {
        Extraction::CrcError {
            frame,
            expected,
            actual,
        }
    }
}
