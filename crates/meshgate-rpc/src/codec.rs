//! Length-prefixed framing
//!
//! Each frame is a 4-byte big-endian length followed by that many bytes of
//! JSON. Frames above the configured limit are rejected before the body is
//! read.

use crate::error::{RpcError, RpcResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Default frame size limit (1 MiB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Largest body the 4-byte length prefix can describe
const MAX_ENCODABLE_FRAME_SIZE: usize = u32::MAX as usize;

/// Frame reader and writer with a size limit
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl FrameCodec {
    /// Create a codec accepting frames of at most `max_frame_size` bytes.
    ///
    /// Limits above what the length prefix can encode are clamped to it.
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            max_frame_size: max_frame_size.min(MAX_ENCODABLE_FRAME_SIZE),
        }
    }

    /// Configured frame size limit
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Write one frame and flush
    pub async fn write_frame<W>(&self, writer: &mut W, data: &[u8]) -> RpcResult<()>
    where
        W: AsyncWrite + Unpin,
    {
        if data.len() > self.max_frame_size {
            return Err(RpcError::FrameTooLarge {
                len: data.len(),
                max: self.max_frame_size,
            });
        }
        let len = data.len() as u32;
        writer.write_all(&len.to_be_bytes()).await?;
        writer.write_all(data).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Read one frame.
    ///
    /// Returns `Ok(None)` when the peer closed the stream on a frame
    /// boundary, and [`RpcError::ConnectionClosed`] when it closed mid-frame.
    pub async fn read_frame<R>(&self, reader: &mut R) -> RpcResult<Option<Vec<u8>>>
    where
        R: AsyncRead + Unpin,
    {
        let mut len_bytes = [0u8; 4];
        let mut filled = 0;
        while filled < len_bytes.len() {
            let n = reader.read(&mut len_bytes[filled..]).await?;
            if n == 0 {
                return if filled == 0 {
                    Ok(None)
                } else {
                    Err(RpcError::ConnectionClosed)
                };
            }
            filled += n;
        }

        let len = u32::from_be_bytes(len_bytes) as usize;
        if len > self.max_frame_size {
            return Err(RpcError::FrameTooLarge {
                len,
                max: self.max_frame_size,
            });
        }

        let mut data = vec![0u8; len];
        reader.read_exact(&mut data).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                RpcError::ConnectionClosed
            } else {
                RpcError::Io(e)
            }
        })?;
        Ok(Some(data))
    }

    /// Serialize `message` as JSON and write it as one frame
    pub async fn write_message<W, T>(&self, writer: &mut W, message: &T) -> RpcResult<()>
    where
        W: AsyncWrite + Unpin,
        T: Serialize,
    {
        let body = serde_json::to_vec(message)?;
        self.write_frame(writer, &body).await
    }

    /// Read one frame and decode it as JSON
    pub async fn read_message<R, T>(&self, reader: &mut R) -> RpcResult<Option<T>>
    where
        R: AsyncRead + Unpin,
        T: DeserializeOwned,
    {
        match self.read_frame(reader).await? {
            Some(body) => Ok(Some(serde_json::from_slice(&body)?)),
            None => Ok(None),
        }
    }
}
