//! Length-prefixed framing for byte streams

use crate::TransportError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

/// Maximum frame size (16MB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Largest slice handed to the writer in one call
pub const MAX_WRITE_CHUNK: usize = 0x10000;

/// Frame codec: a 4-byte big-endian length followed by the payload
pub struct FrameCodec {
    /// Read buffer for incoming data
    read_buf: BytesMut,
    /// Maximum frame size allowed
    max_frame_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    /// Create a new frame codec with default settings
    pub fn new() -> Self {
        Self::with_max_frame_size(MAX_FRAME_SIZE)
    }

    /// Create a new frame codec with custom max frame size
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            read_buf: BytesMut::with_capacity(8192),
            max_frame_size,
        }
    }

    /// Encode a payload with its length prefix
    pub fn encode_frame(&self, payload: &[u8]) -> Result<Bytes, TransportError> {
        if payload.len() > self.max_frame_size {
            return Err(TransportError::FrameTooLarge {
                size: payload.len(),
                max: self.max_frame_size,
            });
        }

        let mut buf = BytesMut::with_capacity(4 + payload.len());
        buf.put_u32(payload.len() as u32);
        buf.put_slice(payload);
        Ok(buf.freeze())
    }

    /// Write a frame, splitting it into bounded writes
    pub async fn write_frame<W>(&self, writer: &mut W, payload: &[u8]) -> Result<(), TransportError>
    where
        W: AsyncWrite + Unpin,
    {
        let encoded = self.encode_frame(payload)?;
        for chunk in encoded.chunks(MAX_WRITE_CHUNK) {
            writer.write_all(chunk).await?;
        }
        writer.flush().await?;
        Ok(())
    }

    /// Read a frame, waiting as long as it takes.
    ///
    /// Returns `None` on a clean end of stream between frames.
    pub async fn read_frame<R>(&mut self, reader: &mut R) -> Result<Option<Bytes>, TransportError>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            if let Some(frame) = self.try_decode_frame()? {
                return Ok(Some(frame));
            }

            let mut temp_buf = [0u8; 8192];
            let n = reader.read(&mut temp_buf).await?;

            if n == 0 {
                if self.read_buf.is_empty() {
                    return Ok(None);
                }
                return Err(TransportError::ChannelBroken);
            }

            self.read_buf.extend_from_slice(&temp_buf[..n]);
        }
    }

    /// Return a frame only if one can be assembled from bytes that are
    /// already available, never waiting on the reader.
    ///
    /// End of stream is reported as [`TransportError::ChannelBroken`].
    pub async fn poll_frame<R>(&mut self, reader: &mut R) -> Result<Option<Bytes>, TransportError>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            if let Some(frame) = self.try_decode_frame()? {
                return Ok(Some(frame));
            }

            let mut temp_buf = [0u8; 8192];
            match timeout(Duration::ZERO, reader.read(&mut temp_buf)).await {
                Err(_) => return Ok(None),
                Ok(Ok(0)) => return Err(TransportError::ChannelBroken),
                Ok(Ok(n)) => self.read_buf.extend_from_slice(&temp_buf[..n]),
                Ok(Err(e)) => return Err(e.into()),
            }
        }
    }

    /// Try to decode a frame from the internal buffer
    pub fn try_decode_frame(&mut self) -> Result<Option<Bytes>, TransportError> {
        if self.read_buf.len() < 4 {
            return Ok(None);
        }

        let frame_len = (&self.read_buf[..4]).get_u32() as usize;

        if frame_len > self.max_frame_size {
            return Err(TransportError::FrameTooLarge {
                size: frame_len,
                max: self.max_frame_size,
            });
        }

        if self.read_buf.len() < 4 + frame_len {
            return Ok(None);
        }

        self.read_buf.advance(4);
        Ok(Some(self.read_buf.split_to(frame_len).freeze()))
    }

    /// Get the current buffer size
    pub fn buffer_size(&self) -> usize {
        self.read_buf.len()
    }
}
