//! RPC server
//!
//! One server holds the dispatch tables registered with it and serves them
//! over a single byte stream. Calls on a stream are handled in order; callers
//! that need concurrency open more streams.

use crate::codec::FrameCodec;
use crate::dispatch::{MethodHandler, RpcService};
use crate::error::{RegistrationError, RpcError, RpcResult};
use crate::message::{RpcRequest, RpcResponse};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

/// Dispatches framed requests to registered services
#[derive(Default)]
pub struct RpcServer {
    services: HashMap<String, BTreeMap<String, MethodHandler>>,
    codec: FrameCodec,
}

impl RpcServer {
    /// Create a server with no services and the default frame limit
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a server using `codec` for framing
    pub fn with_codec(codec: FrameCodec) -> Self {
        Self {
            services: HashMap::new(),
            codec,
        }
    }

    /// Register `service` under the name carried by its dispatch table
    pub fn register(&mut self, service: Arc<dyn RpcService>) -> Result<(), RegistrationError> {
        let (name, methods) = service.dispatch_table().into_parts();
        if name.is_empty() || name.contains('.') {
            return Err(RegistrationError::InvalidServiceName(name));
        }
        if methods.is_empty() {
            return Err(RegistrationError::NoMethods(name));
        }
        if self.services.contains_key(&name) {
            return Err(RegistrationError::DuplicateService(name));
        }
        self.services.insert(name, methods);
        Ok(())
    }

    /// Fully qualified names of every registered method, sorted
    pub fn methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .services
            .iter()
            .flat_map(|(service, methods)| {
                methods.keys().map(move |method| format!("{service}.{method}"))
            })
            .collect();
        names.sort();
        names
    }

    /// Serve requests from `stream` until the peer closes it.
    ///
    /// A clean close on a frame boundary returns `Ok(())`. Framing and decode
    /// failures end the connection with an error; handler failures are sent
    /// back to the caller and the connection stays up.
    pub async fn serve_conn<S>(&self, mut stream: S) -> RpcResult<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            let request: RpcRequest = match self.codec.read_message(&mut stream).await? {
                Some(request) => request,
                None => return Ok(()),
            };
            let response = self.dispatch(request).await;
            self.codec.write_message(&mut stream, &response).await?;
        }
    }

    async fn dispatch(&self, request: RpcRequest) -> RpcResponse {
        let RpcRequest { id, method, params } = request;
        let Some(handler) = self.lookup(&method) else {
            debug!(%method, "unknown rpc method");
            return RpcResponse::err(id, RpcError::UnknownMethod(method).to_string());
        };

        debug!(%method, id, "rpc call");
        match handler(params).await {
            Ok(result) => RpcResponse::ok(id, result),
            Err(RpcError::Remote(message)) => RpcResponse::err(id, message),
            Err(e) => RpcResponse::err(id, e.to_string()),
        }
    }

    fn lookup(&self, qualified: &str) -> Option<MethodHandler> {
        let (service, method) = qualified.rsplit_once('.')?;
        self.services.get(service)?.get(method).cloned()
    }
}

impl std::fmt::Debug for RpcServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcServer")
            .field("methods", &self.methods())
            .field("codec", &self.codec)
            .finish()
    }
}
