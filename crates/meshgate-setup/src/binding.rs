//! Per-connection RPC servers
//!
//! Every admitted stream gets its own [`RpcServer`] with a freshly built
//! gateway registered on it. Nothing about dispatch is shared between
//! connections except the transport manager behind the gateway.

use crate::error::SetupError;
use crate::gateway::TransportGateway;
use crate::manager::TransportManager;
use crate::stats::ServiceStats;
use meshgate_core::OverlayStream;
use meshgate_rpc::{FrameCodec, RpcServer, RpcService};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

/// Builds the service object bound to each new connection
pub type GatewayFactory = Arc<dyn Fn() -> Arc<dyn RpcService> + Send + Sync>;

/// Spawns one RPC server per admitted connection
#[derive(Clone)]
pub struct RpcBinder {
    make_gateway: GatewayFactory,
    codec: FrameCodec,
    stats: Arc<ServiceStats>,
    span: Span,
}

impl RpcBinder {
    /// Binder that serves a [`TransportGateway`] over `manager`
    pub fn new(manager: Arc<dyn TransportManager>, stats: Arc<ServiceStats>, span: Span) -> Self {
        let make_gateway: GatewayFactory = Arc::new(move || {
            let gateway: Arc<dyn RpcService> = Arc::new(TransportGateway::new(manager.clone()));
            gateway
        });
        Self::with_factory(make_gateway, stats, span)
    }

    /// Binder that serves whatever `make_gateway` builds
    pub fn with_factory(make_gateway: GatewayFactory, stats: Arc<ServiceStats>, span: Span) -> Self {
        Self {
            make_gateway,
            codec: FrameCodec::default(),
            stats,
            span,
        }
    }

    /// Use `codec` for framing on future connections
    pub fn with_codec(mut self, codec: FrameCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Serve `stream` in a background task until the peer closes it.
    ///
    /// If the gateway cannot be registered the stream is closed instead of
    /// being served.
    pub fn bind<S: OverlayStream>(&self, stream: S) -> JoinHandle<()> {
        let peer = stream.remote_peer();
        let gateway = (self.make_gateway)();
        let codec = self.codec;
        let stats = self.stats.clone();
        let span = info_span!(parent: &self.span, "rpc_conn", peer = %peer);

        tokio::spawn(
            async move {
                let mut server = RpcServer::with_codec(codec);
                if let Err(e) = server.register(gateway) {
                    stats.record_registration_failure();
                    let err = SetupError::Registration(e);
                    error!(error = %err, "closing connection without serving");
                    if let Err(e) = stream.close().await {
                        warn!(error = %e, "failed to close stream");
                    }
                    return;
                }

                let _active = stats.server_started();
                info!("serving rpc");
                match server.serve_conn(stream).await {
                    Ok(()) => debug!("peer closed rpc connection"),
                    Err(e) => debug!(error = %e, "rpc connection ended"),
                }
            }
            .instrument(span),
        )
    }
}

impl std::fmt::Debug for RpcBinder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcBinder")
            .field("codec", &self.codec)
            .finish_non_exhaustive()
    }
}
