//! Transport setup service
//!
//! Ties the pieces together: join the overlay, listen on the well-known
//! transport-setup port and run the connection gate until the caller
//! cancels.

use crate::binding::RpcBinder;
use crate::config::SetupConfig;
use crate::error::{Result, SetupError};
use crate::gate::ConnectionGate;
use crate::manager::TransportManager;
use crate::session::{OverlaySession, SessionState};
use crate::stats::{ServiceStats, StatsSnapshot};
use meshgate_core::{
    CancellationToken, DiscoveryClient, NodeKeys, OverlayClient, OverlayConfig, OverlayConnector,
    OverlayListener, PeerIdentity, TrustList,
};
use std::sync::Arc;
use tracing::{info, warn, Instrument, Span};

/// Overlay port the transport-setup listener binds to
pub const TRANSPORT_SETUP_PORT: u16 = 47;

/// Everything needed to start a [`TransportSetupService`]
pub struct SetupParams {
    /// Node key pair
    pub keys: NodeKeys,
    /// Discovery service endpoint, `http://` or `https://`
    pub discovery: String,
    /// Minimum overlay sessions before the node counts as connected
    pub min_sessions: usize,
    /// Peers allowed to call the gateway
    pub trust_list: TrustList,
    /// Manager whose operations the gateway exposes
    pub manager: Arc<dyn TransportManager>,
    /// Parent span for everything the service logs
    pub logger: Span,
}

impl SetupParams {
    /// Parameters from a validated configuration
    pub fn from_config(
        config: &SetupConfig,
        manager: Arc<dyn TransportManager>,
        logger: Span,
    ) -> Result<Self> {
        Ok(Self {
            keys: config.node_keys()?,
            discovery: config.overlay.discovery.clone(),
            min_sessions: config.overlay_config().min_sessions,
            trust_list: config.trust_list(),
            manager,
            logger,
        })
    }
}

impl std::fmt::Debug for SetupParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SetupParams")
            .field("peer", &self.keys.public())
            .field("discovery", &self.discovery)
            .field("min_sessions", &self.min_sessions)
            .field("trust_list", &self.trust_list)
            .finish_non_exhaustive()
    }
}

/// Trusted-peer transport-setup listener
pub struct TransportSetupService<C: OverlayClient> {
    session: OverlaySession<C>,
    gate: ConnectionGate,
    stats: Arc<ServiceStats>,
    span: Span,
}

impl<C: OverlayClient> TransportSetupService<C> {
    /// Join the overlay and prepare the gate.
    ///
    /// Fails with [`SetupError::Discovery`] if the endpoint is unusable and
    /// with [`SetupError::Connection`] if `cancel` fires before the overlay
    /// client is ready.
    pub async fn initialize<K>(
        connector: &K,
        params: SetupParams,
        cancel: &CancellationToken,
    ) -> Result<Self>
    where
        K: OverlayConnector<Client = C>,
    {
        let SetupParams {
            keys,
            discovery,
            min_sessions,
            trust_list,
            manager,
            logger,
        } = params;

        let span = logger;
        let discovery = DiscoveryClient::new(discovery).map_err(SetupError::Discovery)?;
        span.in_scope(|| {
            info!(
                peer = %keys.public(),
                discovery = discovery.endpoint(),
                trusted = trust_list.len(),
                "initializing transport setup"
            )
        });

        let session = OverlaySession::connect(
            connector,
            keys,
            discovery,
            OverlayConfig { min_sessions },
            cancel,
            &span,
        )
        .await?;

        let stats = ServiceStats::new();
        let binder = RpcBinder::new(manager, stats.clone(), span.clone());
        let gate = ConnectionGate::new(Arc::new(trust_list), binder, stats.clone(), span.clone());

        Ok(Self {
            session,
            gate,
            stats,
            span,
        })
    }

    /// Listen on [`TRANSPORT_SETUP_PORT`] and serve trusted peers.
    ///
    /// Returns once the listener is closed, which happens when `cancel`
    /// fires. Connections already being served are left running. If `cancel`
    /// has fired before the port is bound this returns `Ok(())` without
    /// listening.
    pub async fn serve(&self, cancel: &CancellationToken) -> Result<()> {
        let listener = match self.session.client().listen(TRANSPORT_SETUP_PORT).await {
            Ok(listener) => listener,
            Err(e) if cancel.is_cancelled() => {
                self.span
                    .in_scope(|| info!(error = %e, "cancelled before listening"));
                return Ok(());
            }
            Err(source) => {
                return Err(SetupError::Listen {
                    port: TRANSPORT_SETUP_PORT,
                    source,
                })
            }
        };
        let listener = Arc::new(listener);
        self.span
            .in_scope(|| info!(port = TRANSPORT_SETUP_PORT, "listening for transport setup"));

        let closer = {
            let listener = listener.clone();
            let cancel = cancel.clone();
            tokio::spawn(
                async move {
                    cancel.cancelled().await;
                    if let Err(e) = listener.close().await {
                        warn!(error = %e, "failed to close listener");
                    }
                }
                .instrument(self.span.clone()),
            )
        };

        self.gate.run(listener.as_ref()).await;
        closer.abort();
        Ok(())
    }

    /// Counters for the accept loop and per-connection servers
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Identity the service is reachable under
    pub fn local_identity(&self) -> PeerIdentity {
        self.session.local_identity()
    }

    /// Peers allowed to call the gateway
    pub fn trust_list(&self) -> &TrustList {
        self.gate.trust_list()
    }

    /// Lifecycle state of the overlay session
    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    /// Stop the overlay background loop
    pub fn shutdown(mut self) {
        self.session.teardown();
        self.span
            .in_scope(|| info!(stats = ?self.stats.snapshot(), "transport setup stopped"));
    }
}

impl<C: OverlayClient> std::fmt::Debug for TransportSetupService<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSetupService")
            .field("session", &self.session)
            .field("stats", &self.stats.snapshot())
            .finish_non_exhaustive()
    }
}
