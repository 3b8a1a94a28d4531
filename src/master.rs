//! # Modbus RTU master
//!
//! [`ModbusMaster`] runs one request/response exchange at a time against a
//! single slave. Any number of tasks may share it behind an `Arc`; the
//! transaction lock serializes them from "encode request" through
//! "classify response", so request bytes never interleave on the wire.
//!
//! RTU responses do not echo the register that was read, so a reply is
//! matched to its request by shape: the byte count of a read, the echoed
//! register and count of a write. Bytes left over from an earlier exchange
//! are dropped before each request goes out, and a reply arriving after its
//! own timeout is rejected unless it happens to have the same shape.
//!
//! ## Transaction outcome
//!
//! | Outcome | Counted as | Buffer |
//! |---------|-----------|--------|
//! | matching frame | rx, latency sample | leftovers dropped |
//! | exception frame | rx, exception | cleared |
//! | CRC mismatch | CRC error | cleared |
//! | wrong address / unknown function | discarded byte | cleared |
//! | valid frame of the wrong function or shape | rx | cleared |
//! | no frame within budget | timeout | cleared |
//! | stop signal | nothing | cleared |
//! | invalid request | nothing | untouched, nothing sent |
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use genlink::{MasterConfig, ModbusMaster, ModbusResult};
//!
//! # async fn example() -> ModbusResult<()> {
//! let master = Arc::new(
//!     ModbusMaster::connect_tcp("192.168.1.40:8899".parse().unwrap(), MasterConfig::default()).await?,
//! );
//!
//! let poller = master.clone();
//! tokio::spawn(async move {
//!     while !poller.is_stopping() {
//!         let _ = poller.read_registers(0x0001, 1).await;
//!     }
//! });
//!
//! println!("{:?}", master.register("0001"));
//! println!("{}", master.comm_stats());
//! master.close().await?;
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::buffer::RxBuffer;
use crate::cache::{hex_value, RegisterCache};
use crate::config::MasterConfig;
use crate::constants::EXCEPTION_FLAG;
use crate::error::{ModbusError, ModbusResult};
use crate::frame::{Extraction, RtuFrame};
use crate::request::{ModbusRequest, RequestKind};
use crate::stats::{CommStats, StatsRecorder};
use crate::transport::{ByteTransport, LinkKind, TcpLinkTransport};
use crate::utils::{format_hex_packet, log_packet};

/// Successful transaction result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionResponse {
    frame: RtuFrame,
    round_trip: Duration,
}

impl TransactionResponse {
    pub fn frame(&self) -> &RtuFrame {
        &self.frame
    }

    /// Register data for a read, register and count echo for a write.
    pub fn payload(&self) -> &[u8] {
        self.frame.payload()
    }

    /// Payload as lower-case hex, the form stored in the register cache.
    pub fn value(&self) -> String {
        hex_value(self.frame.payload())
    }

    /// Payload decoded as big-endian 16-bit words.
    pub fn words(&self) -> Vec<u16> {
        self.frame
            .payload()
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect()
    }

    /// Time from request written to response extracted.
    pub fn round_trip(&self) -> Duration {
        self.round_trip
    }
}

/// Payload a matching response must carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResponseShape {
    /// Read: exactly this many data bytes.
    Registers { byte_count: usize },
    /// Write: the request's register and count echoed back.
    Echo { register: u16, count: u16 },
}

impl ResponseShape {
    fn of(request: &ModbusRequest) -> Self {
        match request.kind {
            RequestKind::Read { count } => Self::Registers {
                byte_count: count as usize * 2,
            },
            RequestKind::Write { count, .. } => Self::Echo {
                register: request.register,
                count,
            },
        }
    }

    fn matches(&self, payload: &[u8]) -> bool {
        match *self {
            Self::Registers { byte_count } => payload.len() == byte_count,
            Self::Echo { register, count } => {
                let [reg_hi, reg_lo] = register.to_be_bytes();
                let [cnt_hi, cnt_lo] = count.to_be_bytes();
                payload == [reg_hi, reg_lo, cnt_hi, cnt_lo].as_slice()
            }
        }
    }
}

impl std::fmt::Display for ResponseShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Registers { byte_count } => write!(f, "{} data bytes", byte_count),
            Self::Echo { register, count } => {
                write!(f, "echo of register {:04x} count {}", register, count)
            }
        }
    }
}

/// In-flight state of one transaction, owned by the lock holder.
struct PendingTransaction<'a> {
    request: &'a ModbusRequest,
    shape: ResponseShape,
    sent_at: Instant,
    timeout: Duration,
}

impl<'a> PendingTransaction<'a> {
    fn new(request: &'a ModbusRequest, timeout: Duration) -> Self {
        Self {
            request,
            shape: ResponseShape::of(request),
            sent_at: Instant::now(),
            timeout,
        }
    }

    fn register(&self) -> u16 {
        self.request.register
    }

    /// Function code a matching response must carry.
    fn expected_function(&self) -> u8 {
        self.request.function_code()
    }

    fn elapsed(&self) -> Duration {
        self.sent_at.elapsed()
    }

    fn expired(&self) -> bool {
        self.elapsed() > self.timeout
    }
}

/// Single-in-flight Modbus RTU master with register cache and statistics.
pub struct ModbusMaster<T: ByteTransport> {
    link: Mutex<T>,
    rx: RxBuffer,
    link_kind: LinkKind,
    config: MasterConfig,
    packet_logging: AtomicBool,
    cache: RegisterCache,
    stats: StatsRecorder,
    stop: CancellationToken,
}

impl<T: ByteTransport> ModbusMaster<T> {
    pub fn new(transport: T, config: MasterConfig) -> Self {
        let rx = transport.rx_buffer().clone();
        let link_kind = transport.link_kind();
        debug!(
            "Modbus master for slave {:02x} on {:?}, response timeout {:?}",
            config.slave_address,
            link_kind,
            config.response_timeout(link_kind)
        );

        Self {
            link: Mutex::new(transport),
            rx,
            link_kind,
            packet_logging: AtomicBool::new(config.packet_logging),
            config,
            cache: RegisterCache::new(),
            stats: StatsRecorder::new(),
            stop: CancellationToken::new(),
        }
    }

    /// Share an existing stop signal, typically the process-wide one.
    pub fn with_stop_token(mut self, token: CancellationToken) -> Self {
        self.stop = token;
        self
    }

    /// Run one transaction.
    ///
    /// With `update_cache` set, a successful response's payload is stored
    /// under the request's register before the transaction lock is released.
    pub async fn execute(
        &self,
        request: &ModbusRequest,
        update_cache: bool,
    ) -> ModbusResult<TransactionResponse> {
        if self.is_stopping() {
            return Err(ModbusError::Stopping);
        }

        let frame = request.encode(self.config.slave_address).map_err(|e| {
            warn!("Rejected request for register {:04x}: {}", request.register, e);
            e
        })?;

        let mut link = self.link.lock().await;
        if self.is_stopping() {
            return Err(ModbusError::Stopping);
        }

        let response = self.transact(&mut link, request, &frame).await?;
        if update_cache {
            self.cache.update(request.register, response.value());
        }
        Ok(response)
    }

    async fn transact(
        &self,
        link: &mut T,
        request: &ModbusRequest,
        frame: &[u8],
    ) -> ModbusResult<TransactionResponse> {
        let slave = self.config.slave_address;
        let quantum = self.config.poll_quantum();

        let stale = self.rx.clear();
        if stale > 0 {
            debug!("Dropped {} stale bytes before request", stale);
        }
        if self.packet_logging() {
            log_packet("send", frame, Some(slave));
        }
        if let Err(e) = link.write(frame).await {
            self.rx.clear();
            warn!("Write failed for register {:04x}: {}", request.register, e);
            return Err(e);
        }
        self.stats.record_tx();
        let pending = PendingTransaction::new(request, self.response_timeout());

        loop {
            tokio::select! {
                () = self.stop.cancelled() => {
                    self.rx.clear();
                    debug!("Transaction for register {:04x} abandoned: stopping", pending.register());
                    return Err(ModbusError::Stopping);
                }
                () = tokio::time::sleep(quantum) => {}
            }

            match self.rx.extract_frame(slave) {
                Extraction::NeedMoreData => {}
                Extraction::Frame(response) => return self.classify(&pending, response),
                Extraction::CrcError {
                    frame,
                    expected,
                    actual,
                } => {
                    self.stats.record_crc_error();
                    self.rx.clear();
                    warn!(
                        "CRC error for register {:04x}: {}",
                        pending.register(),
                        format_hex_packet(frame.as_bytes())
                    );
                    return Err(ModbusError::crc(expected, actual));
                }
                Extraction::FramingError { discarded, reason } => {
                    let dropped = self.rx.clear();
                    warn!(
                        "Framing error for register {:04x}: {} (dropped {:02x} and {} more bytes)",
                        pending.register(),
                        reason,
                        discarded,
                        dropped
                    );
                    return Err(ModbusError::framing(reason.to_string()));
                }
            }

            if pending.expired() {
                self.stats.record_timeout();
                let contents = self.rx.contents();
                self.rx.clear();
                warn!(
                    "Timeout for register {:04x} after {:?}, buffer: [{}]",
                    pending.register(),
                    pending.timeout,
                    format_hex_packet(&contents)
                );
                return Err(ModbusError::timeout(
                    pending.register(),
                    pending.timeout.as_millis() as u64,
                    contents.len(),
                ));
            }
        }
    }

    fn classify(
        &self,
        pending: &PendingTransaction<'_>,
        response: RtuFrame,
    ) -> ModbusResult<TransactionResponse> {
        let round_trip = pending.elapsed();
        if self.packet_logging() {
            log_packet("recv", response.as_bytes(), Some(response.address()));
        }

        if let Some(code) = response.exception_code() {
            self.stats.record_rx(None);
            self.stats.record_exception();
            self.rx.clear();
            let err = ModbusError::exception(response.function_code() & !EXCEPTION_FLAG, code);
            warn!("Register {:04x}: {}", pending.register(), err);
            return Err(err);
        }

        if response.function_code() != pending.expected_function() {
            self.stats.record_rx(None);
            self.rx.clear();
            warn!(
                "Register {:04x}: response function {:02x} does not match request {:02x}",
                pending.register(),
                response.function_code(),
                pending.expected_function()
            );
            return Err(ModbusError::framing(format!(
                "unexpected function code {:02x} (expected {:02x})",
                response.function_code(),
                pending.expected_function()
            )));
        }

        if !pending.shape.matches(response.payload()) {
            self.stats.record_rx(None);
            self.rx.clear();
            warn!(
                "Register {:04x}: response does not match request, expected {}: {}",
                pending.register(),
                pending.shape,
                format_hex_packet(response.as_bytes())
            );
            return Err(ModbusError::framing(format!(
                "response payload does not match request (expected {})",
                pending.shape
            )));
        }

        self.stats.record_rx(Some(round_trip));
        let leftover = self.rx.clear();
        if leftover > 0 {
            debug!("Dropped {} trailing bytes after response", leftover);
        }
        debug!(
            "Register {:04x} answered in {:?}: {}",
            pending.register(),
            round_trip,
            format_hex_packet(response.as_bytes())
        );

        Ok(TransactionResponse {
            frame: response,
            round_trip,
        })
    }

    /// Read `count` registers and cache the result; returns the hex value.
    pub async fn read_registers(&self, register: u16, count: u16) -> ModbusResult<String> {
        let response = self
            .execute(&ModbusRequest::read(register, count), true)
            .await?;
        Ok(response.value())
    }

    /// Read `count` registers without touching the cache.
    pub async fn read_register_value(&self, register: u16, count: u16) -> ModbusResult<String> {
        let response = self
            .execute(&ModbusRequest::read(register, count), false)
            .await?;
        Ok(response.value())
    }

    /// Write `count` registers from raw big-endian bytes.
    pub async fn write_registers(
        &self,
        register: u16,
        count: u16,
        data: impl Into<Vec<u8>>,
    ) -> ModbusResult<()> {
        self.execute(&ModbusRequest::write(register, count, data), false)
            .await?;
        Ok(())
    }

    /// Drop whatever is sitting in the receive buffer.
    pub async fn flush(&self) -> ModbusResult<()> {
        let _link = self.link.lock().await;
        let dropped = self.rx.clear();
        if dropped > 0 {
            debug!("Flushed {} bytes from receive buffer", dropped);
        }
        Ok(())
    }

    /// Raise the stop signal, wait for the in-flight transaction to end and
    /// close the transport.
    pub async fn close(&self) -> ModbusResult<()> {
        self.stop.cancel();
        let mut link = self.link.lock().await;
        link.close().await?;
        info!("Modbus master closed");
        Ok(())
    }

    pub fn is_stopping(&self) -> bool {
        self.stop.is_cancelled()
    }

    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Cached value of a register, by hex address.
    pub fn register(&self, register: &str) -> Option<String> {
        self.cache.get(register)
    }

    pub fn register_cache(&self) -> &RegisterCache {
        &self.cache
    }

    pub fn comm_stats(&self) -> CommStats {
        self.stats
            .snapshot(self.rx.discarded_bytes(), self.rx.restarts())
    }

    /// Zero every counter and restart the measurement window.
    ///
    /// The register cache is kept.
    pub async fn reset_comm_stats(&self) {
        let _link = self.link.lock().await;
        self.stats.reset();
        self.rx.reset_counters();
        info!("Communication stats reset");
    }

    pub fn set_packet_logging(&self, enabled: bool) {
        self.packet_logging.store(enabled, Ordering::Relaxed);
    }

    pub fn packet_logging(&self) -> bool {
        self.packet_logging.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> &MasterConfig {
        &self.config
    }

    pub fn link_kind(&self) -> LinkKind {
        self.link_kind
    }

    /// Response budget applied to every transaction.
    pub fn response_timeout(&self) -> Duration {
        self.config.response_timeout(self.link_kind)
    }
}

impl ModbusMaster<TcpLinkTransport> {
    /// Connect to a serial-over-TCP gateway.
    pub async fn connect_tcp(address: SocketAddr, config: MasterConfig) -> ModbusResult<Self> {
        let transport = TcpLinkTransport::connect(address).await?;
        Ok(Self::new(transport, config))
    }
}

#[cfg(feature = "rtu")]
impl ModbusMaster<crate::transport::SerialLinkTransport> {
    /// Open a serial port directly.
    pub fn open_serial(
        settings: crate::transport::SerialSettings,
        config: MasterConfig,
    ) -> ModbusResult<Self> {
        let transport = crate::transport::SerialLinkTransport::open(settings)?;
        Ok(Self::new(transport, config))
    }
}
