//! In-Memory Overlay Network
//!
//! Process-local implementation of the overlay contract for tests, local
//! smoke runs and simulation. Streams are `tokio::io::duplex` pairs and the
//! remote identity is whatever the dialer claims, so this network provides no
//! authentication of its own.

use crate::cancel::CancellationToken;
use crate::identity::{NodeKeys, PeerIdentity};
use crate::overlay::{
    DiscoveryClient, OverlayClient, OverlayConfig, OverlayConnector, OverlayError,
    OverlayListener, OverlayStream,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Buffer size of each direction of an in-memory stream
const STREAM_BUFFER_SIZE: usize = 64 * 1024;

/// Shared in-memory overlay network
///
/// Cloning yields another handle onto the same network.
#[derive(Debug, Clone)]
pub struct MemoryOverlay {
    network: Arc<MemoryNetwork>,
}

#[derive(Debug)]
struct MemoryNetwork {
    /// Simulated number of discovery servers a client can hold sessions with
    available_sessions: usize,
    state: Mutex<NetworkState>,
    next_listener_id: AtomicU64,
}

#[derive(Debug, Default)]
struct NetworkState {
    online: HashSet<PeerIdentity>,
    listeners: HashMap<(PeerIdentity, u16), ListenerSlot>,
}

#[derive(Debug)]
struct ListenerSlot {
    listener_id: u64,
    incoming: mpsc::UnboundedSender<MemoryStream>,
}

impl MemoryOverlay {
    /// Create a network offering `available_sessions` server sessions
    pub fn new(available_sessions: usize) -> Self {
        Self {
            network: Arc::new(MemoryNetwork {
                available_sessions,
                state: Mutex::new(NetworkState::default()),
                next_listener_id: AtomicU64::new(0),
            }),
        }
    }

    /// Whether `peer` currently has a running background loop
    pub fn is_online(&self, peer: &PeerIdentity) -> bool {
        self.network.state.lock().online.contains(peer)
    }

    /// Whether `peer` has an open listener on `port`
    pub fn is_listening(&self, peer: &PeerIdentity, port: u16) -> bool {
        self.network.state.lock().listeners.contains_key(&(*peer, port))
    }

    /// Open a stream from `from` to the listener of `to` on `port`
    ///
    /// The accepting side observes `from` as the remote identity.
    pub fn dial(
        &self,
        from: PeerIdentity,
        to: PeerIdentity,
        port: u16,
    ) -> Result<MemoryStream, OverlayError> {
        let state = self.network.state.lock();
        let slot = state
            .listeners
            .get(&(to, port))
            .ok_or(OverlayError::PeerUnreachable { peer: to, port })?;

        let (local, remote) = tokio::io::duplex(STREAM_BUFFER_SIZE);
        slot.incoming
            .send(MemoryStream {
                inner: remote,
                remote_peer: from,
            })
            .map_err(|_| OverlayError::PeerUnreachable { peer: to, port })?;

        Ok(MemoryStream {
            inner: local,
            remote_peer: to,
        })
    }
}

impl MemoryNetwork {
    fn go_online(&self, peer: PeerIdentity) {
        self.state.lock().online.insert(peer);
    }

    fn go_offline(&self, peer: &PeerIdentity) {
        let mut state = self.state.lock();
        state.online.remove(peer);
        // Dropping the senders ends every pending accept on this node
        state.listeners.retain(|(owner, _), _| owner != peer);
    }

    fn bind(
        &self,
        peer: PeerIdentity,
        port: u16,
    ) -> Result<(u64, mpsc::UnboundedReceiver<MemoryStream>), OverlayError> {
        let mut state = self.state.lock();
        if !state.online.contains(&peer) {
            return Err(OverlayError::NotReady);
        }
        if state.listeners.contains_key(&(peer, port)) {
            return Err(OverlayError::PortInUse(port));
        }
        let listener_id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        let (incoming, rx) = mpsc::unbounded_channel();
        state.listeners.insert(
            (peer, port),
            ListenerSlot {
                listener_id,
                incoming,
            },
        );
        Ok((listener_id, rx))
    }

    fn unbind(&self, peer: PeerIdentity, port: u16, listener_id: u64) {
        let mut state = self.state.lock();
        if state
            .listeners
            .get(&(peer, port))
            .is_some_and(|slot| slot.listener_id == listener_id)
        {
            state.listeners.remove(&(peer, port));
        }
    }
}

impl OverlayConnector for MemoryOverlay {
    type Client = MemoryClient;

    fn new_client(
        &self,
        keys: NodeKeys,
        discovery: DiscoveryClient,
        config: OverlayConfig,
    ) -> MemoryClient {
        let (ready_tx, _ready_rx) = watch::channel(false);
        MemoryClient {
            identity: keys.public(),
            discovery,
            config,
            network: self.network.clone(),
            ready_tx: Arc::new(ready_tx),
        }
    }
}

/// Client handle onto a [`MemoryOverlay`]
#[derive(Debug, Clone)]
pub struct MemoryClient {
    identity: PeerIdentity,
    discovery: DiscoveryClient,
    config: OverlayConfig,
    network: Arc<MemoryNetwork>,
    ready_tx: Arc<watch::Sender<bool>>,
}

impl MemoryClient {
    /// Discovery endpoint the client was built with
    pub fn discovery(&self) -> &DiscoveryClient {
        &self.discovery
    }

    /// Open a stream to `peer` on `port` under this client's identity
    pub fn dial(&self, peer: PeerIdentity, port: u16) -> Result<MemoryStream, OverlayError> {
        MemoryOverlay {
            network: self.network.clone(),
        }
        .dial(self.identity, peer, port)
    }
}

/// Takes the node offline when the background loop ends or is aborted
struct Presence {
    network: Arc<MemoryNetwork>,
    identity: PeerIdentity,
    ready_tx: Arc<watch::Sender<bool>>,
}

impl Drop for Presence {
    fn drop(&mut self) {
        self.ready_tx.send_replace(false);
        self.network.go_offline(&self.identity);
        debug!(peer = %self.identity, "memory overlay client offline");
    }
}

#[async_trait]
impl OverlayClient for MemoryClient {
    type Listener = MemoryListener;

    fn local_identity(&self) -> PeerIdentity {
        self.identity
    }

    fn serve_background(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let network = self.network.clone();
        let identity = self.identity;
        let ready_tx = self.ready_tx.clone();
        let min_sessions = self.config.min_sessions;

        tokio::spawn(async move {
            network.go_online(identity);
            let _presence = Presence {
                network: network.clone(),
                identity,
                ready_tx: ready_tx.clone(),
            };

            if network.available_sessions >= min_sessions {
                ready_tx.send_replace(true);
                debug!(peer = %identity, sessions = network.available_sessions, "memory overlay client ready");
            } else {
                warn!(
                    peer = %identity,
                    available = network.available_sessions,
                    required = min_sessions,
                    "not enough overlay sessions; client will not become ready"
                );
            }

            cancel.cancelled().await;
        })
    }

    async fn ready(&self) {
        let mut ready_rx = self.ready_tx.subscribe();
        loop {
            if *ready_rx.borrow_and_update() {
                return;
            }
            if ready_rx.changed().await.is_err() {
                return;
            }
        }
    }

    async fn listen(&self, port: u16) -> Result<MemoryListener, OverlayError> {
        let (listener_id, incoming) = self.network.bind(self.identity, port)?;
        Ok(MemoryListener {
            owner: self.identity,
            port,
            listener_id,
            network: self.network.clone(),
            incoming: tokio::sync::Mutex::new(incoming),
            closed: CancellationToken::new(),
        })
    }
}

/// Listener bound on a [`MemoryOverlay`]
#[derive(Debug)]
pub struct MemoryListener {
    owner: PeerIdentity,
    port: u16,
    listener_id: u64,
    network: Arc<MemoryNetwork>,
    incoming: tokio::sync::Mutex<mpsc::UnboundedReceiver<MemoryStream>>,
    closed: CancellationToken,
}

#[async_trait]
impl OverlayListener for MemoryListener {
    type Stream = MemoryStream;

    async fn accept_stream(&self) -> Result<MemoryStream, OverlayError> {
        if self.closed.is_cancelled() {
            return Err(OverlayError::ListenerClosed);
        }
        let mut incoming = self.incoming.lock().await;
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(OverlayError::ListenerClosed),
            stream = incoming.recv() => stream.ok_or(OverlayError::ListenerClosed),
        }
    }

    async fn close(&self) -> Result<(), OverlayError> {
        if self.closed.is_cancelled() {
            return Err(OverlayError::ListenerClosed);
        }
        self.closed.cancel();
        self.network.unbind(self.owner, self.port, self.listener_id);
        Ok(())
    }
}

impl Drop for MemoryListener {
    fn drop(&mut self) {
        self.network.unbind(self.owner, self.port, self.listener_id);
    }
}

/// One end of an in-memory overlay stream
#[derive(Debug)]
pub struct MemoryStream {
    inner: DuplexStream,
    remote_peer: PeerIdentity,
}

impl OverlayStream for MemoryStream {
    fn remote_peer(&self) -> PeerIdentity {
        self.remote_peer
    }
}

impl AsyncRead for MemoryStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for MemoryStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
