//! # genlink - Modbus RTU link to a generator controller
//!
//! The communication core of a generator-monitoring daemon: a Modbus RTU
//! master that talks to one controller over a serial line or a
//! serial-over-TCP gateway, keeps the last value read from every register,
//! and counts what happened on the wire.
//!
//! ## Features
//!
//! - **Single in flight**: any number of tasks share one master; requests
//!   never interleave on the wire
//! - **Self-synchronizing framing**: frame length inferred from the function
//!   code, one-byte resync after garbage
//! - **Bounded waits**: response budget scaled to the baud rate, prompt
//!   cooperative shutdown
//! - **Register cache**: last-known value per register as hex
//! - **Comm statistics**: packets, CRC errors, timeouts, exceptions, latency
//!
//! ## Supported Function Codes
//!
//! | Code | Function |
//! |------|----------|
//! | 0x03 | Read Holding Registers |
//! | 0x10 | Write Multiple Registers |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use genlink::{MasterConfig, ModbusMaster, ModbusResult};
//!
//! #[tokio::main]
//! async fn main() -> ModbusResult<()> {
//!     let address = "192.168.1.40:8899".parse().unwrap();
//!     let master = ModbusMaster::connect_tcp(address, MasterConfig::default()).await?;
//!
//!     let value = master.read_registers(0x0001, 1).await?;
//!     println!("register 0001 = {}", value);
//!     println!("{}", master.comm_stats());
//!
//!     master.close().await?;
//!     Ok(())
//! }
//! ```

// ============================================================================
// Core modules
// ============================================================================

/// Core error types and result handling
pub mod error;

/// Modbus RTU protocol constants
pub mod constants;

/// CRC-16/Modbus
pub mod crc;

/// Request encoding
pub mod request;

/// Incremental response frame assembler
pub mod frame;

/// Receive buffer shared with the transport reader
pub mod buffer;

/// Serial and TCP byte transports
pub mod transport;

/// Master timing and addressing configuration
pub mod config;

/// Last-known register values
pub mod cache;

/// Communication counters and derived metrics
pub mod stats;

/// Transaction engine
pub mod master;

/// Packet trace helpers
pub mod utils;

// ============================================================================
// Re-exports for convenience
// ============================================================================

pub use tokio;

// === Core API ===
pub use master::{ModbusMaster, TransactionResponse};

// === Error handling ===
pub use error::{ModbusError, ModbusException, ModbusResult};

// === Core types ===
pub use buffer::RxBuffer;
pub use cache::RegisterCache;
pub use config::MasterConfig;
pub use frame::{try_extract_frame, Extraction, FrameKind, RtuFrame};
pub use request::{ModbusRequest, RequestKind};
pub use stats::CommStats;

// === Transports ===
pub use transport::{ByteTransport, LinkKind, TcpLinkTransport};

#[cfg(feature = "rtu")]
pub use transport::{SerialLinkTransport, SerialSettings};

// === Protocol limits ===
pub use constants::{MAX_READ_REGISTERS, MAX_RTU_FRAME_SIZE, MAX_WRITE_REGISTERS};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!("genlink v{} - Modbus RTU master for generator controllers", VERSION)
}
