//! Error types for the Modbus RTU master
//!
//! Every transaction outcome other than success maps to exactly one
//! [`ModbusError`] variant. Communication failures (framing, CRC, timeout,
//! exception) are recovered at single-transaction granularity; only
//! [`ModbusError::TransportInit`] is fatal.

use thiserror::Error;

use crate::constants;

/// Result alias used throughout the crate.
pub type ModbusResult<T> = Result<T, ModbusError>;

/// Modbus exception codes a slave can return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModbusException {
    IllegalFunction,
    IllegalDataAddress,
    IllegalDataValue,
    ServerDeviceFailure,
    Acknowledge,
    ServerDeviceBusy,
    MemoryParityError,
    GatewayPathUnavailable,
    GatewayTargetFailed,
    /// Code outside the standard table.
    Other(u8),
}

impl ModbusException {
    pub fn from_code(code: u8) -> Self {
        match code {
            constants::EXCEPTION_ILLEGAL_FUNCTION => Self::IllegalFunction,
            constants::EXCEPTION_ILLEGAL_DATA_ADDRESS => Self::IllegalDataAddress,
            constants::EXCEPTION_ILLEGAL_DATA_VALUE => Self::IllegalDataValue,
            constants::EXCEPTION_SERVER_DEVICE_FAILURE => Self::ServerDeviceFailure,
            constants::EXCEPTION_ACKNOWLEDGE => Self::Acknowledge,
            constants::EXCEPTION_SERVER_DEVICE_BUSY => Self::ServerDeviceBusy,
            constants::EXCEPTION_MEMORY_PARITY_ERROR => Self::MemoryParityError,
            constants::EXCEPTION_GATEWAY_PATH_UNAVAILABLE => Self::GatewayPathUnavailable,
            constants::EXCEPTION_GATEWAY_TARGET_FAILED => Self::GatewayTargetFailed,
            other => Self::Other(other),
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            Self::IllegalFunction => constants::EXCEPTION_ILLEGAL_FUNCTION,
            Self::IllegalDataAddress => constants::EXCEPTION_ILLEGAL_DATA_ADDRESS,
            Self::IllegalDataValue => constants::EXCEPTION_ILLEGAL_DATA_VALUE,
            Self::ServerDeviceFailure => constants::EXCEPTION_SERVER_DEVICE_FAILURE,
            Self::Acknowledge => constants::EXCEPTION_ACKNOWLEDGE,
            Self::ServerDeviceBusy => constants::EXCEPTION_SERVER_DEVICE_BUSY,
            Self::MemoryParityError => constants::EXCEPTION_MEMORY_PARITY_ERROR,
            Self::GatewayPathUnavailable => constants::EXCEPTION_GATEWAY_PATH_UNAVAILABLE,
            Self::GatewayTargetFailed => constants::EXCEPTION_GATEWAY_TARGET_FAILED,
            Self::Other(code) => *code,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::IllegalFunction => "Illegal Function",
            Self::IllegalDataAddress => "Illegal Data Address",
            Self::IllegalDataValue => "Illegal Data Value",
            Self::ServerDeviceFailure => "Server Device Failure",
            Self::Acknowledge => "Acknowledge",
            Self::ServerDeviceBusy => "Server Device Busy",
            Self::MemoryParityError => "Memory Parity Error",
            Self::GatewayPathUnavailable => "Gateway Path Unavailable",
            Self::GatewayTargetFailed => "Gateway Target Device Failed to Respond",
            Self::Other(_) => "Unknown Exception",
        }
    }
}

impl std::fmt::Display for ModbusException {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (0x{:02X})", self.description(), self.code())
    }
}

/// Outcome taxonomy of a single Modbus transaction.
#[derive(Debug, Error)]
pub enum ModbusError {
    /// Address mismatch, unrecognized or unexpected function code.
    #[error("Framing error: {message}")]
    Framing { message: String },

    /// Structurally complete frame whose checksum does not match.
    #[error("CRC mismatch: calculated 0x{expected:04X}, received 0x{actual:04X}")]
    Crc { expected: u16, actual: u16 },

    /// No classifiable frame arrived within the response budget.
    #[error("Timeout waiting for response to register {register:04x} after {timeout_ms} ms ({buffered} bytes buffered)")]
    Timeout {
        register: u16,
        timeout_ms: u64,
        buffered: usize,
    },

    /// The slave answered with a Modbus exception response.
    #[error("Modbus exception for function 0x{function:02X}: {exception}")]
    Exception {
        function: u8,
        exception: ModbusException,
    },

    /// Request rejected before transmission.
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Cooperative shutdown observed; not a communication failure.
    #[error("Master is stopping")]
    Stopping,

    /// Transport could not be opened.
    #[error("Transport initialization failed: {message}")]
    TransportInit { message: String },

    /// Writing to an opened transport failed.
    #[error("I/O error: {message}")]
    Io { message: String },
}

impl ModbusError {
    pub fn framing(message: impl Into<String>) -> Self {
        Self::Framing {
            message: message.into(),
        }
    }

    pub fn crc(expected: u16, actual: u16) -> Self {
        Self::Crc { expected, actual }
    }

    pub fn timeout(register: u16, timeout_ms: u64, buffered: usize) -> Self {
        Self::Timeout {
            register,
            timeout_ms,
            buffered,
        }
    }

    pub fn exception(function: u8, code: u8) -> Self {
        Self::Exception {
            function,
            exception: ModbusException::from_code(code),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn transport_init(message: impl Into<String>) -> Self {
        Self::TransportInit {
            message: message.into(),
        }
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Whether this outcome is counted in the communication statistics.
    pub fn is_communication_failure(&self) -> bool {
        matches!(
            self,
            Self::Framing { .. } | Self::Crc { .. } | Self::Timeout { .. } | Self::Exception { .. }
        )
    }

    /// Whether the owning component should terminate.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::TransportInit { .. })
    }
}

impl From<std::io::Error> for ModbusError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}
