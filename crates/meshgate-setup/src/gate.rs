//! Connection gate
//!
//! Accept loop of the transport-setup listener. Each accepted stream is
//! checked against the trust list: trusted peers are handed to the
//! [`RpcBinder`], everyone else is closed without an RPC server ever being
//! created for them.

use crate::binding::RpcBinder;
use crate::error::{Result, SetupError};
use crate::stats::ServiceStats;
use meshgate_core::{OverlayListener, OverlayStream, PeerIdentity, TrustList};
use std::sync::Arc;
use tracing::{debug, error, info, warn, Instrument, Span};

/// What the gate did with one accepted stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Peer is trusted; an RPC server was started for the stream
    Admitted,
    /// Peer is not trusted; the stream was closed
    Rejected,
}

/// Accept loop guarding the transport-setup port
#[derive(Debug, Clone)]
pub struct ConnectionGate {
    trust: Arc<TrustList>,
    binder: RpcBinder,
    stats: Arc<ServiceStats>,
    span: Span,
}

impl ConnectionGate {
    /// Create a gate admitting only peers in `trust`
    pub fn new(
        trust: Arc<TrustList>,
        binder: RpcBinder,
        stats: Arc<ServiceStats>,
        span: Span,
    ) -> Self {
        Self {
            trust,
            binder,
            stats,
            span,
        }
    }

    /// Trust list consulted on every accept
    pub fn trust_list(&self) -> &TrustList {
        &self.trust
    }

    /// Authorize `peer`
    pub fn check(&self, peer: &PeerIdentity) -> Result<()> {
        if self.trust.contains(peer) {
            Ok(())
        } else {
            Err(SetupError::UntrustedPeer(*peer))
        }
    }

    /// Serve or close a single accepted stream
    pub async fn admit<S: OverlayStream>(&self, stream: S) -> GateDecision {
        let peer = stream.remote_peer();
        match self.check(&peer) {
            Ok(()) => {
                self.stats.record_accepted();
                debug!(%peer, "accepted connection from trusted peer");
                self.binder.bind(stream);
                GateDecision::Admitted
            }
            Err(e) => {
                self.stats.record_rejected();
                info!(%peer, reason = %e, "rejecting connection");
                if let Err(e) = stream.close().await {
                    warn!(%peer, error = %e, "failed to close rejected stream");
                }
                GateDecision::Rejected
            }
        }
    }

    /// Accept streams from `listener` until it reports it is closed.
    ///
    /// Any other accept failure is logged and the loop keeps going.
    pub async fn run<L: OverlayListener>(&self, listener: &L) {
        async {
            loop {
                let stream = match listener.accept_stream().await {
                    Ok(stream) => stream,
                    Err(e) if e.is_listener_closed() => {
                        info!("listener closed; stopping accept loop");
                        break;
                    }
                    Err(e) => {
                        self.stats.record_accept_error();
                        error!(error = %SetupError::Accept(e), "accept failed");
                        continue;
                    }
                };
                self.admit(stream).await;
            }
        }
        .instrument(self.span.clone())
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::InMemoryTransportManager;
    use assert_matches::assert_matches;
    use meshgate_core::{
        CancellationToken, DiscoveryClient, MemoryOverlay, NodeKeys, OverlayClient, OverlayConfig,
        OverlayConnector,
    };
    use tokio::io::AsyncReadExt;

    fn peer(byte: u8) -> PeerIdentity {
        PeerIdentity::from_bytes([byte; 32])
    }

    fn gate(trusted: &[PeerIdentity]) -> ConnectionGate {
        let stats = ServiceStats::new();
        let manager = Arc::new(InMemoryTransportManager::new(peer(0)));
        let binder = RpcBinder::new(manager, stats.clone(), Span::none());
        ConnectionGate::new(
            Arc::new(trusted.iter().copied().collect()),
            binder,
            stats,
            Span::none(),
        )
    }

    #[test]
    fn test_check_uses_trust_list() {
        let gate = gate(&[peer(1), peer(2)]);
        assert!(gate.check(&peer(1)).is_ok());
        assert!(gate.check(&peer(2)).is_ok());
        assert_matches!(gate.check(&peer(3)), Err(SetupError::UntrustedPeer(p)) if p == peer(3));
    }

    #[test]
    fn test_empty_trust_list_rejects_everyone() {
        let gate = gate(&[]);
        assert!(gate.trust_list().is_empty());
        assert!(gate.check(&peer(1)).is_err());
    }

    #[tokio::test]
    async fn test_admit_decides_by_remote_identity() {
        let overlay = MemoryOverlay::new(1);
        let relay = overlay.new_client(
            NodeKeys::generate(),
            DiscoveryClient::new("http://discovery.test").unwrap(),
            OverlayConfig::default(),
        );
        let _background = relay.serve_background(CancellationToken::new());
        relay.ready().await;
        let listener = relay.listen(9).await.unwrap();
        let gate = gate(&[peer(1)]);

        let _trusted_end = overlay.dial(peer(1), relay.local_identity(), 9).unwrap();
        let accepted = listener.accept_stream().await.unwrap();
        assert_eq!(gate.admit(accepted).await, GateDecision::Admitted);

        let mut untrusted_end = overlay.dial(peer(2), relay.local_identity(), 9).unwrap();
        let accepted = listener.accept_stream().await.unwrap();
        assert_eq!(gate.admit(accepted).await, GateDecision::Rejected);

        let mut buf = [0u8; 8];
        assert_eq!(untrusted_end.read(&mut buf).await.unwrap(), 0);
    }
}
