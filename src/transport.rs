//! # Byte transports
//!
//! The master never reads from a socket or serial port itself. A transport
//! owns the link, runs a reader task that appends everything received to a
//! shared [`RxBuffer`], and exposes a plain `write` for request frames.
//!
//! ## Provided transports
//!
//! - [`TcpLinkTransport`] - Modbus RTU framing tunnelled through a TCP
//!   serial gateway
//! - [`SerialLinkTransport`] - direct serial port (requires the `rtu` feature)
//!
//! Both reopen the link when the reader hits EOF or an I/O error and count
//! each successful reopen as a link restart.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use genlink::transport::{ByteTransport, TcpLinkTransport};
//! use genlink::ModbusRequest;
//!
//! # async fn example() -> genlink::ModbusResult<()> {
//! let mut transport = TcpLinkTransport::connect("192.168.1.40:8899".parse().unwrap()).await?;
//! let frame = ModbusRequest::read(0x0001, 1).encode(0x9D)?;
//! transport.write(&frame).await?;
//! println!("buffered: {}", transport.rx_buffer().len());
//! transport.close().await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::buffer::RxBuffer;
use crate::constants::MAX_RTU_FRAME_SIZE;
use crate::error::{ModbusError, ModbusResult};

/// Delay between attempts to reopen a dropped link.
pub const LINK_RESTART_DELAY: Duration = Duration::from_secs(1);

/// Physical nature of the link, used to pick the response timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// Direct serial line at the given bit rate.
    Serial { baud_rate: u32 },
    /// RTU frames carried over a TCP stream.
    Tcp,
}

/// Byte sink/source consumed by the master.
///
/// Implementations must append every received byte to the buffer returned by
/// [`rx_buffer`](Self::rx_buffer); the master only ever reads through it.
pub trait ByteTransport: Send + Sync {
    /// Write one complete request frame.
    fn write(&mut self, frame: &[u8]) -> impl Future<Output = ModbusResult<()>> + Send;

    /// Receive buffer fed by this transport.
    fn rx_buffer(&self) -> &RxBuffer;

    fn link_kind(&self) -> LinkKind;

    /// Stop the reader and release the link.
    fn close(&mut self) -> impl Future<Output = ModbusResult<()>> + Send;
}

/// Writer half plus reader task shared by the concrete transports.
struct Link<W> {
    writer: Arc<Mutex<Option<W>>>,
    rx: RxBuffer,
    shutdown: CancellationToken,
    reader: Option<JoinHandle<()>>,
    label: &'static str,
}

impl<W> Link<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    fn spawn<R, F, Fut>(reader: R, writer: W, reopen: F, label: &'static str) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = io::Result<(R, W)>> + Send + 'static,
    {
        let rx = RxBuffer::new();
        let writer = Arc::new(Mutex::new(Some(writer)));
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run_reader(
            reader,
            writer.clone(),
            rx.clone(),
            shutdown.clone(),
            reopen,
            label,
        ));

        Self {
            writer,
            rx,
            shutdown,
            reader: Some(task),
            label,
        }
    }

    async fn write(&self, frame: &[u8]) -> ModbusResult<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| ModbusError::io(format!("{} link is down", self.label)))?;

        writer
            .write_all(frame)
            .await
            .map_err(|e| ModbusError::io(format!("{} write failed: {}", self.label, e)))?;
        writer
            .flush()
            .await
            .map_err(|e| ModbusError::io(format!("{} flush failed: {}", self.label, e)))?;
        Ok(())
    }

    async fn close(&mut self) -> ModbusResult<()> {
        self.shutdown.cancel();
        if let Some(task) = self.reader.take() {
            let _ = task.await;
        }
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        info!("{} link closed", self.label);
        Ok(())
    }
}

impl<W> Drop for Link<W> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Append everything read to `rx`; reopen the link on EOF or error.
///
/// Both halves of a dead link are dropped before the first reopen attempt,
/// so a serial port is closed before it is opened again.
async fn run_reader<R, W, F, Fut>(
    reader: R,
    writer: Arc<Mutex<Option<W>>>,
    rx: RxBuffer,
    shutdown: CancellationToken,
    reopen: F,
    label: &'static str,
) where
    R: AsyncRead + Unpin + Send,
    W: Send,
    F: Fn() -> Fut,
    Fut: Future<Output = io::Result<(R, W)>>,
{
    let mut chunk = [0u8; MAX_RTU_FRAME_SIZE];
    let mut reader = Some(reader);

    loop {
        if let Some(active) = reader.as_mut() {
            let read = tokio::select! {
                () = shutdown.cancelled() => return,
                read = active.read(&mut chunk) => read,
            };

            match read {
                Ok(0) => warn!("{} link closed by peer", label),
                Ok(n) => {
                    rx.append(&chunk[..n]);
                    continue;
                }
                Err(e) => warn!("{} read error: {}", label, e),
            }

            reader = None;
            *writer.lock().await = None;
        }

        tokio::select! {
            () = shutdown.cancelled() => return,
            () = tokio::time::sleep(LINK_RESTART_DELAY) => {}
        }

        match reopen().await {
            Ok((new_reader, new_writer)) => {
                reader = Some(new_reader);
                *writer.lock().await = Some(new_writer);
                rx.record_restart();
                info!("{} link restarted", label);
            }
            Err(e) => warn!("{} reopen failed: {}", label, e),
        }
    }
}

// ============================================================================
// TCP tunnel
// ============================================================================

/// RTU over a TCP serial gateway.
pub struct TcpLinkTransport {
    pub address: SocketAddr,
    link: Link<OwnedWriteHalf>,
}

impl TcpLinkTransport {
    /// Connect to the gateway; failure is a [`ModbusError::TransportInit`].
    pub async fn connect(address: SocketAddr) -> ModbusResult<Self> {
        let stream = TcpStream::connect(address).await.map_err(|e| {
            ModbusError::transport_init(format!("Failed to connect to {}: {}", address, e))
        })?;
        set_nodelay(&stream, address);
        let (reader, writer) = stream.into_split();
        info!("Connected to serial gateway at {}", address);

        let reopen = move || async move {
            let stream = TcpStream::connect(address).await?;
            set_nodelay(&stream, address);
            Ok(stream.into_split())
        };

        Ok(Self {
            address,
            link: Link::spawn(reader, writer, reopen, "TCP"),
        })
    }
}

/// Request frames are small; a failure here only costs latency.
fn set_nodelay(stream: &TcpStream, address: SocketAddr) {
    if let Err(e) = stream.set_nodelay(true) {
        warn!("TCP_NODELAY not set for {}: {}", address, e);
    }
}

impl ByteTransport for TcpLinkTransport {
    async fn write(&mut self, frame: &[u8]) -> ModbusResult<()> {
        self.link.write(frame).await
    }

    fn rx_buffer(&self) -> &RxBuffer {
        &self.link.rx
    }

    fn link_kind(&self) -> LinkKind {
        LinkKind::Tcp
    }

    async fn close(&mut self) -> ModbusResult<()> {
        self.link.close().await
    }
}

// ============================================================================
// Serial port
// ============================================================================

/// Serial line parameters.
#[cfg(feature = "rtu")]
#[derive(Debug, Clone)]
pub struct SerialSettings {
    pub port: String,
    pub baud_rate: u32,
    pub data_bits: tokio_serial::DataBits,
    pub parity: tokio_serial::Parity,
    pub stop_bits: tokio_serial::StopBits,
}

#[cfg(feature = "rtu")]
impl SerialSettings {
    /// 8 data bits, no parity, one stop bit.
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            data_bits: tokio_serial::DataBits::Eight,
            parity: tokio_serial::Parity::None,
            stop_bits: tokio_serial::StopBits::One,
        }
    }

    pub fn with_parity(mut self, parity: tokio_serial::Parity) -> Self {
        self.parity = parity;
        self
    }

    pub fn with_stop_bits(mut self, stop_bits: tokio_serial::StopBits) -> Self {
        self.stop_bits = stop_bits;
        self
    }

    fn open(&self) -> io::Result<tokio_serial::SerialStream> {
        let builder = tokio_serial::new(&self.port, self.baud_rate)
            .data_bits(self.data_bits)
            .parity(self.parity)
            .stop_bits(self.stop_bits);
        tokio_serial::SerialStream::open(&builder).map_err(io::Error::other)
    }
}

/// Direct serial port transport.
#[cfg(feature = "rtu")]
pub struct SerialLinkTransport {
    settings: SerialSettings,
    link: Link<tokio::io::WriteHalf<tokio_serial::SerialStream>>,
}

#[cfg(feature = "rtu")]
impl SerialLinkTransport {
    /// Open the port; failure is a [`ModbusError::TransportInit`].
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(settings: SerialSettings) -> ModbusResult<Self> {
        let port = settings.open().map_err(|e| {
            ModbusError::transport_init(format!(
                "Failed to open serial port {}: {}",
                settings.port, e
            ))
        })?;
        let (reader, writer) = tokio::io::split(port);
        info!(
            "Opened serial port {} at {} baud",
            settings.port, settings.baud_rate
        );

        let reopen_settings = settings.clone();
        let reopen = move || {
            let settings = reopen_settings.clone();
            async move { settings.open().map(tokio::io::split) }
        };

        Ok(Self {
            link: Link::spawn(reader, writer, reopen, "RTU"),
            settings,
        })
    }

    pub fn settings(&self) -> &SerialSettings {
        &self.settings
    }
}

#[cfg(feature = "rtu")]
impl ByteTransport for SerialLinkTransport {
    async fn write(&mut self, frame: &[u8]) -> ModbusResult<()> {
        self.link.write(frame).await
    }

    fn rx_buffer(&self) -> &RxBuffer {
        &self.link.rx
    }

    fn link_kind(&self) -> LinkKind {
        LinkKind::Serial {
            baud_rate: self.settings.baud_rate,
        }
    }

    async fn close(&mut self) -> ModbusResult<()> {
        self.link.close().await
    }
}
