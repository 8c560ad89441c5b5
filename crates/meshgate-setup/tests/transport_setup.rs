//! End-to-end behaviour of the transport-setup listener over the in-memory
//! overlay: trust enforcement, per-connection servers, accept-loop liveness,
//! startup cancellation and shutdown.

use assert_matches::assert_matches;
use async_trait::async_trait;
use meshgate_core::{
    CancellationToken, DiscoveryClient, MemoryClient, MemoryOverlay, MemoryStream, NodeKeys,
    OverlayClient, OverlayConfig, OverlayConnector, OverlayError, OverlayListener, PeerIdentity,
    TrustList,
};
use meshgate_rpc::{DispatchTable, FrameCodec, RpcError, RpcService};
use meshgate_setup::{
    ConnectionGate, GatewayClient, GatewayFactory, InMemoryTransportManager, ManagerError,
    RpcBinder, ServiceStats, SessionState, SetupError, SetupParams, StatsSnapshot,
    TransportEntry, TransportManager, TransportSetupService, TRANSPORT_SETUP_PORT,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::Span;
use uuid::Uuid;

const WAIT: Duration = Duration::from_secs(5);
const DISCOVERY: &str = "http://discovery.test";

fn discovery() -> DiscoveryClient {
    DiscoveryClient::new(DISCOVERY).unwrap()
}

fn params(
    keys: NodeKeys,
    trusted: &[PeerIdentity],
    manager: Arc<dyn TransportManager>,
) -> SetupParams {
    SetupParams {
        keys,
        discovery: DISCOVERY.to_string(),
        min_sessions: 1,
        trust_list: TrustList::new(trusted.iter().copied()),
        manager,
        logger: Span::none(),
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn wait_for_stats(
    service: &TransportSetupService<MemoryClient>,
    condition: impl Fn(&StatsSnapshot) -> bool,
) {
    wait_until(|| condition(&service.stats())).await;
}

/// Expect the remote end to close the stream without sending anything
async fn assert_closed_by_remote(stream: &mut MemoryStream) {
    let mut buf = [0u8; 16];
    let read = timeout(WAIT, stream.read(&mut buf)).await.unwrap();
    assert_matches!(read, Ok(0));
}

struct Node {
    service: Arc<TransportSetupService<MemoryClient>>,
    manager: Arc<dyn TransportManager>,
    cancel: CancellationToken,
    serving: JoinHandle<meshgate_setup::Result<()>>,
}

impl Node {
    fn peer(&self) -> PeerIdentity {
        self.service.local_identity()
    }
}

async fn start_node(overlay: &MemoryOverlay, trusted: &[PeerIdentity]) -> Node {
    let keys = NodeKeys::generate();
    let manager = Arc::new(InMemoryTransportManager::new(keys.public()));
    start_node_with(overlay, trusted, keys, manager).await
}

async fn start_node_with(
    overlay: &MemoryOverlay,
    trusted: &[PeerIdentity],
    keys: NodeKeys,
    manager: Arc<dyn TransportManager>,
) -> Node {
    let cancel = CancellationToken::new();

    let service =
        TransportSetupService::initialize(overlay, params(keys, trusted, manager.clone()), &cancel)
            .await
            .unwrap();
    let service = Arc::new(service);

    let serving = {
        let service = service.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { service.serve(&cancel).await })
    };

    let peer = service.local_identity();
    wait_until(|| overlay.is_listening(&peer, TRANSPORT_SETUP_PORT)).await;

    Node {
        service,
        manager,
        cancel,
        serving,
    }
}

#[tokio::test]
async fn test_untrusted_peer_is_closed_without_a_server() {
    let overlay = MemoryOverlay::new(1);
    let trusted_a = NodeKeys::generate().public();
    let untrusted_c = NodeKeys::generate().public();
    let node = start_node(&overlay, &[trusted_a]).await;

    let mut stream = overlay
        .dial(untrusted_c, node.peer(), TRANSPORT_SETUP_PORT)
        .unwrap();
    assert_closed_by_remote(&mut stream).await;

    wait_for_stats(&node.service, |s| s.rejected == 1).await;
    let stats = node.service.stats();
    assert_eq!(stats.accepted, 0);
    assert_eq!(stats.servers_started, 0);
    assert_eq!(stats.registration_failures, 0);
}

#[tokio::test]
async fn test_trusted_peer_reaches_gateway() {
    let overlay = MemoryOverlay::new(1);
    let trusted_a = NodeKeys::generate().public();
    let remote_b = NodeKeys::generate().public();
    let node = start_node(&overlay, &[trusted_a]).await;

    let stream = overlay
        .dial(trusted_a, node.peer(), TRANSPORT_SETUP_PORT)
        .unwrap();
    let mut client = GatewayClient::new(stream);

    let added = client.add_transport(remote_b, "dmsg").await.unwrap();
    assert_eq!(added.local, node.peer());
    assert_eq!(added.remote, remote_b);

    let listed = client.get_transports().await.unwrap();
    assert_eq!(listed, vec![added.clone()]);
    assert_eq!(node.manager.transports().await.len(), 1);

    assert!(client.remove_transport(added.id).await.unwrap());
    assert!(node.manager.transports().await.is_empty());

    let stats = node.service.stats();
    assert_eq!(stats.accepted, 1);
    assert_eq!(stats.servers_started, 1);
    assert_eq!(stats.rejected, 0);
}

#[tokio::test]
async fn test_each_connection_gets_its_own_server() {
    let overlay = MemoryOverlay::new(1);
    let trusted_a = NodeKeys::generate().public();
    let trusted_b = NodeKeys::generate().public();
    let remote = NodeKeys::generate().public();
    let node = start_node(&overlay, &[trusted_a, trusted_b]).await;

    let mut first = GatewayClient::new(
        overlay
            .dial(trusted_a, node.peer(), TRANSPORT_SETUP_PORT)
            .unwrap(),
    );
    let second_stream = overlay
        .dial(trusted_a, node.peer(), TRANSPORT_SETUP_PORT)
        .unwrap();
    let mut second = GatewayClient::new(second_stream);
    let mut third = GatewayClient::new(
        overlay
            .dial(trusted_b, node.peer(), TRANSPORT_SETUP_PORT)
            .unwrap(),
    );

    wait_for_stats(&node.service, |s| s.servers_active == 3).await;

    // Closing one connection leaves the others serving
    first.close().await.unwrap();
    wait_for_stats(&node.service, |s| s.servers_active == 2).await;

    let added = second.add_transport(remote, "stcpr").await.unwrap();
    let seen_by_b = third.get_transports().await.unwrap();
    assert_eq!(seen_by_b, vec![added]);
    assert_eq!(node.service.stats().servers_started, 3);
}

#[tokio::test]
async fn test_cancel_stops_accepting_but_keeps_live_connections() {
    let overlay = MemoryOverlay::new(1);
    let trusted_a = NodeKeys::generate().public();
    let node = start_node(&overlay, &[trusted_a]).await;

    let mut client = GatewayClient::new(
        overlay
            .dial(trusted_a, node.peer(), TRANSPORT_SETUP_PORT)
            .unwrap(),
    );
    wait_for_stats(&node.service, |s| s.servers_active == 1).await;

    node.cancel.cancel();
    let result = timeout(WAIT, node.serving).await.unwrap().unwrap();
    assert!(result.is_ok());
    assert!(!overlay.is_listening(&node.service.local_identity(), TRANSPORT_SETUP_PORT));

    assert_matches!(
        overlay.dial(trusted_a, node.service.local_identity(), TRANSPORT_SETUP_PORT),
        Err(OverlayError::PeerUnreachable { .. })
    );

    assert!(client.get_transports().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_initialize_fails_when_cancelled_before_ready() {
    // No discovery servers, so the client can never reach one session
    let overlay = MemoryOverlay::new(0);
    let keys = NodeKeys::generate();
    let peer = keys.public();
    let manager = Arc::new(InMemoryTransportManager::new(peer));
    let cancel = CancellationToken::new();

    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        })
    };

    let result = TransportSetupService::initialize(&overlay, params(keys, &[], manager), &cancel)
        .await;
    assert_matches!(result, Err(SetupError::Connection));
    canceller.await.unwrap();

    wait_until(|| !overlay.is_online(&peer)).await;
    assert!(!overlay.is_listening(&peer, TRANSPORT_SETUP_PORT));
}

#[tokio::test]
async fn test_ready_and_cancelled_prefers_cancellation() {
    let overlay = MemoryOverlay::new(1);
    let keys = NodeKeys::generate();
    let manager = Arc::new(InMemoryTransportManager::new(keys.public()));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = TransportSetupService::initialize(&overlay, params(keys, &[], manager), &cancel)
        .await;
    assert_matches!(result, Err(SetupError::Connection));
}

#[tokio::test]
async fn test_serve_reports_listen_failure() {
    let overlay = MemoryOverlay::new(1);
    let keys = NodeKeys::generate();
    let peer = keys.public();
    let cancel = CancellationToken::new();

    // Something else already owns the port under this identity
    let squatter = overlay.new_client(keys.clone(), discovery(), OverlayConfig::default());
    let background = squatter.serve_background(cancel.clone());
    squatter.ready().await;
    let _held = squatter.listen(TRANSPORT_SETUP_PORT).await.unwrap();

    let manager = Arc::new(InMemoryTransportManager::new(peer));
    let service = TransportSetupService::initialize(&overlay, params(keys, &[], manager), &cancel)
        .await
        .unwrap();
    assert_eq!(service.session_state(), SessionState::Ready);

    let err = service.serve(&cancel).await.unwrap_err();
    assert!(err.is_fatal());
    assert_matches!(
        err,
        SetupError::Listen {
            port: TRANSPORT_SETUP_PORT,
            source: OverlayError::PortInUse(TRANSPORT_SETUP_PORT)
        }
    );

    service.shutdown();
    background.abort();
}

#[tokio::test]
async fn test_serve_after_cancel_ends_cleanly() {
    let overlay = MemoryOverlay::new(1);
    let keys = NodeKeys::generate();
    let peer = keys.public();
    let manager = Arc::new(InMemoryTransportManager::new(peer));
    let cancel = CancellationToken::new();

    let service = TransportSetupService::initialize(&overlay, params(keys, &[], manager), &cancel)
        .await
        .unwrap();

    // Cancelling stops the overlay loop, so the node is offline by the time
    // serve tries to bind
    cancel.cancel();
    wait_until(|| !overlay.is_online(&peer)).await;

    let result = timeout(WAIT, service.serve(&cancel)).await.unwrap();
    assert!(result.is_ok());
    assert!(!overlay.is_listening(&peer, TRANSPORT_SETUP_PORT));
    assert_eq!(service.stats(), StatsSnapshot::default());
}

#[tokio::test]
async fn test_initialize_rejects_bad_discovery_endpoint() {
    let overlay = MemoryOverlay::new(1);
    let keys = NodeKeys::generate();
    let peer = keys.public();
    let manager = Arc::new(InMemoryTransportManager::new(peer));
    let mut params = params(keys, &[], manager);
    params.discovery = "discovery.test".to_string();

    let result =
        TransportSetupService::initialize(&overlay, params, &CancellationToken::new()).await;
    assert_matches!(
        result,
        Err(SetupError::Discovery(OverlayError::InvalidDiscovery(_)))
    );
    assert!(!overlay.is_online(&peer));
}

/// Delegates to an in-memory manager but holds every save for a while
struct SlowManager {
    inner: InMemoryTransportManager,
    save_started: Arc<Notify>,
    delay: Duration,
}

#[async_trait]
impl TransportManager for SlowManager {
    fn local_identity(&self) -> PeerIdentity {
        self.inner.local_identity()
    }

    async fn save_transport(
        &self,
        remote: PeerIdentity,
        transport_type: &str,
    ) -> Result<TransportEntry, ManagerError> {
        self.save_started.notify_one();
        tokio::time::sleep(self.delay).await;
        self.inner.save_transport(remote, transport_type).await
    }

    async fn delete_transport(&self, id: Uuid) -> Result<(), ManagerError> {
        self.inner.delete_transport(id).await
    }

    async fn transports(&self) -> Vec<TransportEntry> {
        self.inner.transports().await
    }
}

#[tokio::test]
async fn test_dropping_one_connection_spares_in_flight_calls_on_another() {
    let overlay = MemoryOverlay::new(1);
    let trusted_a = NodeKeys::generate().public();
    let trusted_b = NodeKeys::generate().public();
    let remote = NodeKeys::generate().public();

    let keys = NodeKeys::generate();
    let save_started = Arc::new(Notify::new());
    let manager = Arc::new(SlowManager {
        inner: InMemoryTransportManager::new(keys.public()),
        save_started: save_started.clone(),
        delay: Duration::from_millis(200),
    });
    let node = start_node_with(&overlay, &[trusted_a, trusted_b], keys, manager).await;

    let conn_a = overlay
        .dial(trusted_a, node.peer(), TRANSPORT_SETUP_PORT)
        .unwrap();
    let mut client_b = GatewayClient::new(
        overlay
            .dial(trusted_b, node.peer(), TRANSPORT_SETUP_PORT)
            .unwrap(),
    );
    wait_for_stats(&node.service, |s| s.servers_active == 2).await;

    let pending = tokio::spawn(async move { client_b.add_transport(remote, "dmsg").await });
    timeout(WAIT, save_started.notified()).await.unwrap();

    // Drop A without a clean shutdown while B's call is still running
    drop(conn_a);
    wait_for_stats(&node.service, |s| s.servers_active == 1).await;

    let added = timeout(WAIT, pending).await.unwrap().unwrap().unwrap();
    assert_eq!(added.remote, remote);
    assert_eq!(node.manager.transports().await.len(), 1);
    assert_eq!(node.service.stats().servers_active, 1);
}

/// Listener replaying a fixed sequence of accept results, then closing
struct ScriptedListener {
    script: Mutex<VecDeque<Result<MemoryStream, OverlayError>>>,
}

impl ScriptedListener {
    fn new(script: Vec<Result<MemoryStream, OverlayError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
        }
    }
}

#[async_trait]
impl OverlayListener for ScriptedListener {
    type Stream = MemoryStream;

    async fn accept_stream(&self) -> Result<MemoryStream, OverlayError> {
        let next = self.script.lock().pop_front();
        next.unwrap_or(Err(OverlayError::ListenerClosed))
    }

    async fn close(&self) -> Result<(), OverlayError> {
        self.script.lock().clear();
        Ok(())
    }
}

/// A relay node that hands out accepted in-memory streams for scripting
struct Relay {
    overlay: MemoryOverlay,
    client: MemoryClient,
    listener: meshgate_core::MemoryListener,
    _background: JoinHandle<()>,
}

impl Relay {
    async fn new() -> Self {
        let overlay = MemoryOverlay::new(1);
        let client = overlay.new_client(NodeKeys::generate(), discovery(), OverlayConfig::default());
        let background = client.serve_background(CancellationToken::new());
        client.ready().await;
        let listener = client.listen(9).await.unwrap();
        Self {
            overlay,
            client,
            listener,
            _background: background,
        }
    }

    /// Returns (accepted end seen as coming from `from`, dialer end)
    async fn pair(&self, from: PeerIdentity) -> (MemoryStream, MemoryStream) {
        let dialer = self
            .overlay
            .dial(from, self.client.local_identity(), 9)
            .unwrap();
        let accepted = self.listener.accept_stream().await.unwrap();
        (accepted, dialer)
    }
}

fn gate_for(trusted: &[PeerIdentity], stats: Arc<ServiceStats>) -> ConnectionGate {
    let manager = Arc::new(InMemoryTransportManager::new(NodeKeys::generate().public()));
    let binder = RpcBinder::new(manager, stats.clone(), Span::none());
    ConnectionGate::new(
        Arc::new(TrustList::new(trusted.iter().copied())),
        binder,
        stats,
        Span::none(),
    )
}

#[tokio::test]
async fn test_accept_errors_do_not_stop_the_loop() {
    let relay = Relay::new().await;
    let trusted_a = NodeKeys::generate().public();
    let untrusted_c = NodeKeys::generate().public();
    let (from_a, dialer_a) = relay.pair(trusted_a).await;
    let (from_c, mut dialer_c) = relay.pair(untrusted_c).await;

    let listener = ScriptedListener::new(vec![
        Err(OverlayError::Io(std::io::Error::other("reset"))),
        Err(OverlayError::NotReady),
        Ok(from_a),
        Err(OverlayError::PeerUnreachable {
            peer: trusted_a,
            port: TRANSPORT_SETUP_PORT,
        }),
        Ok(from_c),
    ]);

    let stats = ServiceStats::new();
    let gate = gate_for(&[trusted_a], stats.clone());
    timeout(WAIT, gate.run(&listener)).await.unwrap();

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.accept_errors, 3);
    assert_eq!(snapshot.accepted, 1);
    assert_eq!(snapshot.rejected, 1);

    // The trusted connection is served after the loop has ended
    let mut client = GatewayClient::new(dialer_a);
    assert!(client.get_transports().await.unwrap().is_empty());
    assert_closed_by_remote(&mut dialer_c).await;
}

#[tokio::test]
async fn test_listener_closed_ends_loop_immediately() {
    let listener = ScriptedListener::new(vec![Err(OverlayError::ListenerClosed)]);
    let stats = ServiceStats::new();
    let gate = gate_for(&[], stats.clone());
    timeout(WAIT, gate.run(&listener)).await.unwrap();
    assert_eq!(stats.snapshot(), StatsSnapshot::default());
}

struct EmptyService;

impl RpcService for EmptyService {
    fn dispatch_table(self: Arc<Self>) -> DispatchTable {
        DispatchTable::new("Empty")
    }
}

#[tokio::test]
async fn test_registration_failure_closes_connection() {
    let relay = Relay::new().await;
    let trusted_a = NodeKeys::generate().public();
    let (accepted, mut dialer) = relay.pair(trusted_a).await;

    let stats = ServiceStats::new();
    let factory: GatewayFactory = Arc::new(|| {
        let service: Arc<dyn RpcService> = Arc::new(EmptyService);
        service
    });
    let binder = RpcBinder::with_factory(factory, stats.clone(), Span::none());

    binder.bind(accepted).await.unwrap();
    assert_closed_by_remote(&mut dialer).await;

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.registration_failures, 1);
    assert_eq!(snapshot.servers_started, 0);
}

#[tokio::test]
async fn test_binder_enforces_configured_frame_limit() {
    let relay = Relay::new().await;
    let trusted_a = NodeKeys::generate().public();
    let (small_accepted, small_dialer) = relay.pair(trusted_a).await;
    let (large_accepted, large_dialer) = relay.pair(trusted_a).await;

    let stats = ServiceStats::new();
    let manager = Arc::new(InMemoryTransportManager::new(NodeKeys::generate().public()));
    let binder =
        RpcBinder::new(manager, stats.clone(), Span::none()).with_codec(FrameCodec::new(256));
    binder.bind(small_accepted);
    let oversized = binder.bind(large_accepted);

    let mut client = GatewayClient::new(small_dialer);
    assert!(client.get_transports().await.unwrap().is_empty());

    let mut client = GatewayClient::new(large_dialer);
    let transport_type = "x".repeat(1024);
    let result = client.add_transport(trusted_a, &transport_type).await;
    assert_matches!(result, Err(RpcError::ConnectionClosed));
    timeout(WAIT, oversized).await.unwrap().unwrap();
}

mod trust_properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn admission_matches_membership(
            trusted in proptest::collection::vec(any::<[u8; 32]>(), 0..8),
            candidate in any::<[u8; 32]>(),
        ) {
            let trusted: Vec<PeerIdentity> =
                trusted.into_iter().map(PeerIdentity::from_bytes).collect();
            let candidate = PeerIdentity::from_bytes(candidate);
            let gate = gate_for(&trusted, ServiceStats::new());

            for peer in &trusted {
                prop_assert!(gate.check(peer).is_ok());
            }
            prop_assert_eq!(gate.check(&candidate).is_ok(), trusted.contains(&candidate));
        }
    }
}
