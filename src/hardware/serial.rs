// src/hardware/serial.rs - Byte-level link to the board
use async_trait::async_trait;
use serial2_tokio::SerialPort;
use std::io;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

/// Raw byte transport the link worker drives.
///
/// `read_available` waits at most one poll window and returns `Ok(0)` when
/// nothing arrived, so the caller can run its timeout check between reads.
#[async_trait]
pub trait SerialChannel: Send {
    async fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    async fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;
}

/// Any async byte stream, e.g. one end of `tokio::io::duplex` wired to the simulator.
pub struct StreamChannel<T> {
    io: T,
    poll: Duration,
}

impl<T> StreamChannel<T> {
    pub fn new(io: T, poll: Duration) -> Self {
        Self { io, poll }
    }
}

#[async_trait]
impl<T> SerialChannel for StreamChannel<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match timeout(self.poll, self.io.read(buf)).await {
            Err(_) => Ok(0),
            Ok(Ok(0)) => Err(io::Error::new(io::ErrorKind::UnexpectedEof, "stream closed by peer")),
            Ok(result) => result,
        }
    }

    async fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.io.write_all(bytes).await?;
        self.io.flush().await
    }
}

/// A real serial device opened through serial2-tokio.
pub struct SerialPortChannel {
    port: SerialPort,
    poll: Duration,
}

impl SerialPortChannel {
    pub fn new(port: SerialPort, poll: Duration) -> Self {
        Self { port, poll }
    }
}

#[async_trait]
impl SerialChannel for SerialPortChannel {
    async fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match timeout(self.poll, self.port.read(buf)).await {
            Err(_) => Ok(0),
            Ok(result) => result,
        }
    }

    async fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.port.write_all(bytes).await
    }
}

/// Open `path` at `baud` (8N1, no flow control) and drop anything left in the driver buffers.
pub fn open_serial_port(path: impl AsRef<Path>, baud: u32, poll: Duration) -> io::Result<SerialPortChannel> {
    let path = path.as_ref();
    let port = SerialPort::open(path, baud)?;
    if let Err(e) = port.discard_buffers() {
        tracing::debug!("Could not discard stale serial buffers on {}: {}", path.display(), e);
    }
    tracing::info!("Opened serial port {} @ {} baud", path.display(), baud);
    Ok(SerialPortChannel::new(port, poll))
}

/// Serial device paths present on this host.
pub fn available_ports() -> Vec<String> {
    match SerialPort::available_ports() {
        Ok(paths) => paths.iter().map(|p| p.display().to_string()).collect(),
        Err(_) => vec![],
    }
}
