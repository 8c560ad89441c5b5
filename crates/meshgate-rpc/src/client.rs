//! RPC client for a single stream

use crate::codec::FrameCodec;
use crate::error::{RpcError, RpcResult};
use crate::message::{RpcRequest, RpcResponse};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

/// Issues calls over one stream, one at a time
#[derive(Debug)]
pub struct RpcClient<S> {
    stream: S,
    codec: FrameCodec,
    next_id: u64,
}

impl<S> RpcClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap a connected stream
    pub fn new(stream: S) -> Self {
        Self::with_codec(stream, FrameCodec::default())
    }

    /// Wrap a connected stream using `codec` for framing
    pub fn with_codec(stream: S, codec: FrameCodec) -> Self {
        Self {
            stream,
            codec,
            next_id: 0,
        }
    }

    /// Call `method` (`Service.Method`) and decode its result
    pub async fn call<P, R>(&mut self, method: &str, params: &P) -> RpcResult<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let id = self.next_id;
        self.next_id += 1;

        let request = RpcRequest {
            id,
            method: method.to_string(),
            params: serde_json::to_value(params)?,
        };
        self.codec.write_message(&mut self.stream, &request).await?;

        let response: RpcResponse = self
            .codec
            .read_message(&mut self.stream)
            .await?
            .ok_or(RpcError::ConnectionClosed)?;
        if response.id != id {
            return Err(RpcError::UnexpectedResponse {
                expected: id,
                actual: response.id,
            });
        }
        if let Some(error) = response.error {
            return Err(RpcError::Remote(error));
        }
        Ok(serde_json::from_value(
            response.result.unwrap_or(Value::Null),
        )?)
    }

    /// Shut down the write half and release the stream
    pub async fn close(mut self) -> RpcResult<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}
