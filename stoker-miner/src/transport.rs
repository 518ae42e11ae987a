//! Byte transport to the hash chain.
//!
//! The chain is a dumb byte pipe: no framing help, no flow control. The
//! codec layer above owns resynchronization; this layer only moves bytes and
//! maps receive timeouts to `Ok(0)` so the caller can tell "no traffic" from
//! an actual failure.
//!
//! Send and receive are separate traits because the pipeline splits them
//! across two tasks: the producer writes work while the consumer sits in a
//! long blocking read.

use async_trait::async_trait;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio_serial::{SerialPortBuilderExt, SerialStream};

/// Baud rate the chips listen at after reset.
pub const CHAIN_BAUD: u32 = 115_200;

/// Link rate after the baud-divider register write during bring-up.
pub const FAST_CHAIN_BAUD: u32 = 1_000_000;

#[async_trait]
pub trait TransportTx: Send {
    async fn send(&mut self, frame: &[u8]) -> io::Result<usize>;
    async fn flush(&mut self) -> io::Result<()>;
}

#[async_trait]
pub trait TransportRx: Send {
    /// Read whatever is available within `timeout`. `Ok(0)` means the
    /// timeout elapsed with no traffic, the expected steady state.
    async fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize>;
}

/// Full-duplex transport, splittable into independent halves.
pub trait Transport: TransportTx + TransportRx {
    type Tx: TransportTx;
    type Rx: TransportRx;

    fn split(self) -> (Self::Tx, Self::Rx);
}

pub struct SerialTransport {
    port: SerialStream,
}

impl SerialTransport {
    pub fn open(path: &str, baud: u32) -> tokio_serial::Result<Self> {
        let port = tokio_serial::new(path, baud).open_native_async()?;
        Ok(SerialTransport { port })
    }
}

#[async_trait]
impl TransportTx for SerialTransport {
    async fn send(&mut self, frame: &[u8]) -> io::Result<usize> {
        self.port.write_all(frame).await?;
        Ok(frame.len())
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.port.flush().await
    }
}

#[async_trait]
impl TransportRx for SerialTransport {
    async fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        match tokio::time::timeout(timeout, self.port.read(buf)).await {
            Ok(read) => read,
            Err(_elapsed) => Ok(0),
        }
    }
}

impl Transport for SerialTransport {
    type Tx = SerialTx;
    type Rx = SerialRx;

    fn split(self) -> (SerialTx, SerialRx) {
        let (read, write) = tokio::io::split(self.port);
        (SerialTx { inner: write }, SerialRx { inner: read })
    }
}

pub struct SerialTx {
    inner: WriteHalf<SerialStream>,
}

#[async_trait]
impl TransportTx for SerialTx {
    async fn send(&mut self, frame: &[u8]) -> io::Result<usize> {
        self.inner.write_all(frame).await?;
        Ok(frame.len())
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.inner.flush().await
    }
}

pub struct SerialRx {
    inner: ReadHalf<SerialStream>,
}

#[async_trait]
impl TransportRx for SerialRx {
    async fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        match tokio::time::timeout(timeout, self.inner.read(buf)).await {
            Ok(read) => read,
            Err(_elapsed) => Ok(0),
        }
    }
}
