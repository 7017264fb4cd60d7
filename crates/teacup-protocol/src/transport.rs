//! Line Transport
//!
//! Newline-delimited frames over any byte stream. Each side of a connection
//! is split into a [`FrameReader`] and a [`FrameWriter`] sharing one close
//! token, so closing the writer also interrupts a read parked on the other
//! half with [`TransportError::Closed`].

use std::string::FromUtf8Error;

use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf,
};
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport closed locally")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] FromUtf8Error),
}

impl TransportError {
    /// True when the failure was caused by our own close rather than the peer
    pub fn is_benign(&self) -> bool {
        match self {
            TransportError::Closed => true,
            TransportError::Io(e) => e.kind() == std::io::ErrorKind::NotConnected,
            TransportError::InvalidUtf8(_) => false,
        }
    }
}

/// Reading half of a line transport
pub struct FrameReader<R> {
    inner: BufReader<R>,
    buf: Vec<u8>,
    closed: CancellationToken,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R, closed: CancellationToken) -> Self {
        Self {
            inner: BufReader::new(reader),
            buf: Vec::new(),
            closed,
        }
    }

    /// Read the next frame as raw bytes, without its line terminator.
    ///
    /// Returns `Ok(None)` once the peer has closed the stream. A trailing
    /// unterminated line is still returned as a frame before that. The bytes
    /// are not required to be UTF-8.
    pub async fn read_bytes(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        self.buf.clear();

        let n = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(TransportError::Closed),
            res = self.inner.read_until(b'\n', &mut self.buf) => res?,
        };

        if n == 0 {
            return Ok(None);
        }

        if self.buf.last() == Some(&b'\n') {
            self.buf.pop();
            if self.buf.last() == Some(&b'\r') {
                self.buf.pop();
            }
        }

        Ok(Some(std::mem::take(&mut self.buf)))
    }

    /// Read the next frame as text
    pub async fn read_frame(&mut self) -> Result<Option<String>, TransportError> {
        match self.read_bytes().await? {
            Some(bytes) => Ok(Some(String::from_utf8(bytes)?)),
            None => Ok(None),
        }
    }
}

/// Writing half of a line transport
pub struct FrameWriter<W> {
    inner: W,
    closed: CancellationToken,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W, closed: CancellationToken) -> Self {
        Self { inner: writer, closed }
    }

    /// Write one frame plus `\n` and flush before returning
    pub async fn write_frame(&mut self, frame: impl AsRef<[u8]>) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        self.inner.write_all(frame.as_ref()).await?;
        self.inner.write_all(b"\n").await?;
        self.inner.flush().await?;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Close both halves. Only the first call has any effect.
    pub async fn close(&mut self) {
        if self.is_closed() {
            return;
        }
        self.closed.cancel();
        let _ = self.inner.shutdown().await;
    }
}

/// Split a byte stream into a reader/writer pair tied to `closed`
pub fn split<S>(
    stream: S,
    closed: CancellationToken,
) -> (FrameReader<ReadHalf<S>>, FrameWriter<WriteHalf<S>>)
where
    S: AsyncRead + AsyncWrite,
{
    let (r, w) = tokio::io::split(stream);
    (
        FrameReader::new(r, closed.clone()),
        FrameWriter::new(w, closed),
    )
}
