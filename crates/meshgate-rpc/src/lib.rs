//! Call/response RPC over async byte streams
//!
//! Requests name a `Service.Method`, carry JSON parameters and are matched to
//! responses by id. Services export their operations through explicit
//! [`DispatchTable`]s; nothing is discovered at runtime.

pub mod client;
pub mod codec;
pub mod dispatch;
pub mod error;
pub mod message;
pub mod server;

pub use client::RpcClient;
pub use codec::{FrameCodec, DEFAULT_MAX_FRAME_SIZE};
pub use dispatch::{DispatchTable, HandlerFuture, MethodHandler, RpcService};
pub use error::{RegistrationError, RpcError, RpcResult};
pub use message::{RpcRequest, RpcResponse};
pub use server::RpcServer;
