//! Overlay session
//!
//! Joins the overlay network: builds the client, starts its background
//! loop and waits until it is ready. Cancellation wins over readiness when
//! both are observable at once.

use crate::error::{Result, SetupError};
use meshgate_core::{
    CancellationToken, DiscoveryClient, NodeKeys, OverlayClient, OverlayConfig, OverlayConnector,
    PeerIdentity,
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument, Span};

/// Lifecycle of an [`OverlaySession`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Background loop running, waiting for readiness
    Connecting,
    /// Client is ready to listen
    Ready,
    /// Cancelled before readiness or torn down
    Failed,
}

/// A ready overlay client and the background task keeping it alive
pub struct OverlaySession<C: OverlayClient> {
    client: Arc<C>,
    background: Option<JoinHandle<()>>,
    state: SessionState,
}

impl<C: OverlayClient> OverlaySession<C> {
    /// Build a client and wait until it is ready or `cancel` fires.
    ///
    /// On cancellation the background loop is stopped and
    /// [`SetupError::Connection`] is returned.
    pub async fn connect<K>(
        connector: &K,
        keys: NodeKeys,
        discovery: DiscoveryClient,
        config: OverlayConfig,
        cancel: &CancellationToken,
        span: &Span,
    ) -> Result<Self>
    where
        K: OverlayConnector<Client = C>,
    {
        let client = Arc::new(connector.new_client(keys, discovery, config));
        let background = client.serve_background(cancel.clone());
        let mut session = Self {
            client,
            background: Some(background),
            state: SessionState::Connecting,
        };

        let peer = session.client.local_identity();
        let wait = async {
            debug!(%peer, min_sessions = config.min_sessions, "waiting for overlay readiness");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => false,
                _ = session.client.ready() => true,
            }
        }
        .instrument(span.clone());

        if wait.await {
            session.state = SessionState::Ready;
            span.in_scope(|| info!(%peer, "overlay client ready"));
            Ok(session)
        } else {
            session.teardown();
            span.in_scope(|| warn!(%peer, "cancelled before overlay client became ready"));
            Err(SetupError::Connection)
        }
    }

    /// Stop the background loop
    pub fn teardown(&mut self) {
        if let Some(background) = self.background.take() {
            background.abort();
        }
        self.state = SessionState::Failed;
    }

    /// The overlay client
    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Identity the client is registered under
    pub fn local_identity(&self) -> PeerIdentity {
        self.client.local_identity()
    }

    /// Whether the background loop is still running
    pub fn is_background_running(&self) -> bool {
        self.background
            .as_ref()
            .is_some_and(|background| !background.is_finished())
    }
}

impl<C: OverlayClient> std::fmt::Debug for OverlaySession<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlaySession")
            .field("peer", &self.client.local_identity())
            .field("state", &self.state)
            .finish()
    }
}

impl<C: OverlayClient> Drop for OverlaySession<C> {
    fn drop(&mut self) {
        if let Some(background) = self.background.take() {
            background.abort();
        }
    }
}
