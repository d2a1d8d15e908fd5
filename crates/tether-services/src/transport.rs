//! Byte transports underneath connectors and peer sessions.
//!
//! Frames are newline-delimited. `receive` hands back one frame without its
//! terminator; `send` expects the caller to have encoded the terminator.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf,
    WriteHalf,
};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::Mutex;

use tether_core::{Error, Result};

/// Longest accepted frame, terminator excluded.
pub const DEFAULT_MAX_FRAME_LEN: usize = 1024 * 1024;

#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    async fn send(&self, frame: Bytes) -> Result<()>;

    /// Wait for the next frame. `None` means the remote end closed the stream.
    async fn receive(&self) -> Result<Option<Bytes>>;

    fn is_connected(&self) -> bool;
}

/// [`Transport`] over any tokio byte stream: TCP sockets, serial devices
/// opened as streams, in-memory duplex pipes.
pub struct StreamTransport<S> {
    reader: Mutex<BufReader<ReadHalf<S>>>,
    writer: Mutex<WriteHalf<S>>,
    connected: AtomicBool,
    max_frame_len: usize,
}

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Wrap an already established stream. It starts out connected.
    pub fn new(stream: S) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: Mutex::new(BufReader::new(reader)),
            writer: Mutex::new(writer),
            connected: AtomicBool::new(true),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    /// Lines longer than `max_frame_len` bytes are skipped, not buffered.
    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len.max(1);
        self
    }

    /// Consume the rest of an overlong line. Returns false at end of stream.
    async fn skip_line(&self, reader: &mut BufReader<ReadHalf<S>>) -> Result<bool> {
        loop {
            let (used, done) = {
                let available = reader.fill_buf().await.map_err(|e| self.fail(e))?;
                if available.is_empty() {
                    return Ok(false);
                }
                match available.iter().position(|b| *b == b'\n') {
                    Some(pos) => (pos + 1, true),
                    None => (available.len(), false),
                }
            };
            reader.consume(used);
            if done {
                return Ok(true);
            }
        }
    }

    fn fail(&self, e: std::io::Error) -> Error {
        self.connected.store(false, Ordering::Release);
        Error::Io(e)
    }
}

impl StreamTransport<TcpStream> {
    pub async fn dial(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream))
    }
}

#[async_trait]
impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// A stream cannot be re-established once closed.
    async fn connect(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(Error::Transport("stream already closed".into()))
        }
    }

    async fn disconnect(&self) -> Result<()> {
        if !self.connected.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        self.writer.lock().await.shutdown().await?;
        Ok(())
    }

    async fn send(&self, frame: Bytes) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::Transport("stream not connected".into()));
        }
        let mut writer = self.writer.lock().await;
        writer.write_all(&frame).await.map_err(|e| self.fail(e))?;
        writer.flush().await.map_err(|e| self.fail(e))?;
        Ok(())
    }

    async fn receive(&self) -> Result<Option<Bytes>> {
        let mut reader = self.reader.lock().await;
        let limit = self.max_frame_len as u64 + 1;
        loop {
            let mut buf = Vec::new();
            let n = (&mut *reader)
                .take(limit)
                .read_until(b'\n', &mut buf)
                .await
                .map_err(|e| self.fail(e))?;
            if n == 0 {
                self.connected.store(false, Ordering::Release);
                return Ok(None);
            }
            if buf.last() != Some(&b'\n') && buf.len() > self.max_frame_len {
                tracing::warn!(limit = self.max_frame_len, "frame too long, skipping line");
                if !self.skip_line(&mut reader).await? {
                    self.connected.store(false, Ordering::Release);
                    return Ok(None);
                }
                continue;
            }
            while matches!(buf.last(), Some(b'\n' | b'\r')) {
                buf.pop();
            }
            return Ok(Some(Bytes::from(buf)));
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}
