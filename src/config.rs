//! # Master Configuration
//!
//! Timing and addressing parameters for [`ModbusMaster`](crate::ModbusMaster).
//!
//! ## Response timeout
//!
//! On a serial link the budget scales with the bit rate: the time to move
//! two short frames (10 characters of 10 bits each, one each way) plus a
//! fixed guard interval for controller latency and scheduling jitter. At
//! 9600 baud that is about 21 ms of line time plus the 3 s guard.
//!
//! A TCP-tunnelled link has no meaningful bit rate, so it uses its own
//! fixed budget.

use std::time::Duration;

use crate::transport::LinkKind;

/// Default slave address of the generator controller.
pub const DEFAULT_SLAVE_ADDRESS: u8 = 0x9D;

/// Default wait between receive-buffer polls (milliseconds).
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 10;

/// Default wait between polls in reduced-CPU mode (milliseconds).
pub const DEFAULT_REDUCED_CPU_POLL_INTERVAL_MS: u64 = 30;

/// Default guard added to the serial line time (milliseconds).
pub const DEFAULT_GUARD_INTERVAL_MS: u64 = 3000;

/// Default response budget for TCP-tunnelled links (milliseconds).
pub const DEFAULT_TCP_TIMEOUT_MS: u64 = 5000;

/// Characters per frame assumed by the serial budget.
const BUDGET_CHARS_PER_FRAME: u64 = 10;

/// Bits per character on the wire (start + 8 data + stop).
const BITS_PER_CHAR: u64 = 10;

/// Request and response.
const BUDGET_FRAMES: u64 = 2;

/// Master configuration.
///
/// # Example
///
/// ```rust
/// use genlink::MasterConfig;
/// use genlink::transport::LinkKind;
/// use std::time::Duration;
///
/// let config = MasterConfig::new()
///     .with_slave_address(0x9D)
///     .with_reduced_cpu(true)
///     .with_tcp_timeout(Duration::from_secs(8));
///
/// assert_eq!(config.poll_quantum(), Duration::from_millis(30));
/// assert_eq!(config.response_timeout(LinkKind::Tcp), Duration::from_secs(8));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MasterConfig {
    /// Slave address requests are sent to and responses must carry.
    pub slave_address: u8,
    /// Sleep between receive-buffer polls.
    pub poll_interval: Duration,
    /// Sleep between polls when `reduced_cpu` is set.
    pub reduced_cpu_poll_interval: Duration,
    /// Trade response latency for fewer wakeups on constrained hosts.
    pub reduced_cpu: bool,
    /// Fixed part of the serial response budget.
    pub guard_interval: Duration,
    /// Response budget for TCP-tunnelled links.
    pub tcp_timeout: Duration,
    /// Log every request and response frame as hex.
    pub packet_logging: bool,
}

impl MasterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_slave_address(mut self, address: u8) -> Self {
        self.slave_address = address;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_reduced_cpu_poll_interval(mut self, interval: Duration) -> Self {
        self.reduced_cpu_poll_interval = interval;
        self
    }

    pub fn with_reduced_cpu(mut self, enabled: bool) -> Self {
        self.reduced_cpu = enabled;
        self
    }

    pub fn with_guard_interval(mut self, guard: Duration) -> Self {
        self.guard_interval = guard;
        self
    }

    pub fn with_tcp_timeout(mut self, timeout: Duration) -> Self {
        self.tcp_timeout = timeout;
        self
    }

    pub fn with_packet_logging(mut self, enabled: bool) -> Self {
        self.packet_logging = enabled;
        self
    }

    /// Sleep applied before each receive-buffer poll.
    pub fn poll_quantum(&self) -> Duration {
        if self.reduced_cpu {
            self.reduced_cpu_poll_interval
        } else {
            self.poll_interval
        }
    }

    /// Response budget for a transaction on `link`.
    pub fn response_timeout(&self, link: LinkKind) -> Duration {
        match link {
            LinkKind::Serial { baud_rate } => {
                serial_line_time(baud_rate).saturating_add(self.guard_interval)
            }
            LinkKind::Tcp => self.tcp_timeout,
        }
    }
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            slave_address: DEFAULT_SLAVE_ADDRESS,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            reduced_cpu_poll_interval: Duration::from_millis(DEFAULT_REDUCED_CPU_POLL_INTERVAL_MS),
            reduced_cpu: false,
            guard_interval: Duration::from_millis(DEFAULT_GUARD_INTERVAL_MS),
            tcp_timeout: Duration::from_millis(DEFAULT_TCP_TIMEOUT_MS),
            packet_logging: false,
        }
    }
}

/// Line time for one request and one response of a short frame.
fn serial_line_time(baud_rate: u32) -> Duration {
    if baud_rate == 0 {
        return Duration::ZERO;
    }
    let bits = BITS_PER_CHAR * BUDGET_CHARS_PER_FRAME * BUDGET_FRAMES;
    Duration::from_micros(bits * 1_000_000 / baud_rate as u64)
}

// ============================================================================
// Tests
// ============================================================================
