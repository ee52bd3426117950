//! Length-prefixed framing over async byte streams.
//!
//! Every encoded unit (header or body) travels as one frame:
//!
//! ```text
//! ┌────────────┬─────────────────┐
//! │ Length     │ Payload         │
//! │ 4 bytes BE │ `length` bytes  │
//! └────────────┴─────────────────┘
//! ```
//!
//! The payload bytes are opaque to this layer; the negotiated codec gives
//! them meaning. [`FrameReader::discard_frame`] reads and drops a frame
//! without materializing it, which is how a receiver skips the body of an
//! errored or unmatched response while keeping the stream aligned.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::codec::CodecKind;
use crate::error::{Result, RpcError};
use crate::protocol::Header;

/// Size of the length prefix in bytes.
pub const LEN_PREFIX_SIZE: usize = 4;

/// Default maximum frame payload size (16 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Reads length-prefixed frames from an async stream.
pub struct FrameReader<R> {
    inner: R,
    max_frame_size: u32,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wrap a stream with the default frame size limit.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Wrap a stream with a custom frame size limit.
    pub fn with_max_frame_size(inner: R, max_frame_size: u32) -> Self {
        Self {
            inner,
            max_frame_size,
        }
    }

    /// Read one complete frame payload.
    ///
    /// An end-of-stream before or inside the frame surfaces as an I/O error
    /// (`UnexpectedEof`); callers treat it as connection termination.
    pub async fn read_frame(&mut self) -> Result<Bytes> {
        let len = self.read_len().await?;
        let mut buf = vec![0u8; len as usize];
        self.inner.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    /// Read one frame and drop its payload without materializing it.
    pub async fn discard_frame(&mut self) -> Result<()> {
        let len = self.read_len().await?;
        let mut remaining = len as usize;
        let mut scratch = [0u8; 4096];
        while remaining > 0 {
            let want = scratch.len().min(remaining);
            let n = self.inner.read(&mut scratch[..want]).await?;
            if n == 0 {
                return Err(RpcError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "stream ended inside discarded frame",
                )));
            }
            remaining -= n;
        }
        Ok(())
    }

    async fn read_len(&mut self) -> Result<u32> {
        let len = self.inner.read_u32().await?;
        if len > self.max_frame_size {
            return Err(RpcError::Protocol(format!(
                "frame size {} exceeds maximum {}",
                len, self.max_frame_size
            )));
        }
        Ok(len)
    }
}

/// Writes length-prefixed frames to an async stream.
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Wrap a stream.
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Write one frame. Does not flush.
    pub async fn write_frame(&mut self, payload: &[u8]) -> Result<()> {
        let len = u32::try_from(payload.len())
            .map_err(|_| RpcError::Protocol("frame payload exceeds u32 length".to_string()))?;
        self.inner.write_u32(len).await?;
        self.inner.write_all(payload).await?;
        Ok(())
    }

    /// Write one complete message: header frame, then body frame, then flush.
    ///
    /// The header is encoded first; an encoding failure aborts before any
    /// byte of the message reaches the stream. Callers that share a stream
    /// must hold their write lock across this whole call so the pair never
    /// interleaves with another message.
    pub async fn write_message(
        &mut self,
        codec: CodecKind,
        header: &Header,
        body: &[u8],
    ) -> Result<()> {
        let header_bytes = codec.encode(header)?;
        self.write_frame(&header_bytes).await?;
        self.write_frame(body).await?;
        self.flush().await
    }

    /// Flush buffered bytes to the stream.
    pub async fn flush(&mut self) -> Result<()> {
        self.inner.flush().await?;
        Ok(())
    }

    /// Shut down the write side of the stream.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}
