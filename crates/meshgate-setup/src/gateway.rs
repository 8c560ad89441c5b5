//! Transport gateway
//!
//! Adapter exposing selected [`TransportManager`] operations as the
//! `TransportGateway` RPC service. A fresh gateway is bound to every accepted
//! connection; all of them share the same manager.

use crate::manager::{ManagerError, TransportEntry, TransportManager};
use meshgate_core::PeerIdentity;
use meshgate_rpc::{DispatchTable, RpcClient, RpcResult, RpcService};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use uuid::Uuid;

/// Service name the gateway registers under
pub const GATEWAY_SERVICE: &str = "TransportGateway";

/// Upper bound on a single `AddTransport` call
pub const ADD_TRANSPORT_TIMEOUT: Duration = Duration::from_secs(20);

/// Parameters of `AddTransport`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportRequest {
    /// Remote edge of the transport
    pub remote_pk: PeerIdentity,
    /// Transport type, e.g. `dmsg`
    pub transport_type: String,
}

/// Parameters of `RemoveTransport`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UuidRequest {
    /// Transport id
    pub id: Uuid,
}

/// Transport description returned to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportResponse {
    /// Transport id
    pub id: Uuid,
    /// Local edge
    pub local: PeerIdentity,
    /// Remote edge
    pub remote: PeerIdentity,
    /// Transport type
    pub transport_type: String,
    /// Whether the transport is up
    pub is_up: bool,
}

impl From<TransportEntry> for TransportResponse {
    fn from(entry: TransportEntry) -> Self {
        Self {
            id: entry.id,
            local: entry.local,
            remote: entry.remote,
            transport_type: entry.transport_type,
            is_up: entry.is_up,
        }
    }
}

/// Boolean result wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoolResponse {
    /// Outcome
    pub result: bool,
}

/// Errors returned by gateway operations
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Manager rejected the operation
    #[error(transparent)]
    Manager(#[from] ManagerError),

    /// Manager did not answer in time
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
}

/// RPC-facing adapter over a shared [`TransportManager`]
#[derive(Clone)]
pub struct TransportGateway {
    manager: Arc<dyn TransportManager>,
}

impl TransportGateway {
    /// Bind a gateway to `manager`
    pub fn new(manager: Arc<dyn TransportManager>) -> Self {
        Self { manager }
    }

    /// Create (or fetch) a transport from the local node to `remote_pk`
    pub async fn add_transport(
        &self,
        request: TransportRequest,
    ) -> Result<TransportResponse, GatewayError> {
        let save = self
            .manager
            .save_transport(request.remote_pk, &request.transport_type);
        let entry = tokio::time::timeout(ADD_TRANSPORT_TIMEOUT, save)
            .await
            .map_err(|_| GatewayError::Timeout(ADD_TRANSPORT_TIMEOUT))??;
        Ok(entry.into())
    }

    /// Remove the transport with `id`
    pub async fn remove_transport(&self, request: UuidRequest) -> Result<BoolResponse, GatewayError> {
        self.manager.delete_transport(request.id).await?;
        Ok(BoolResponse { result: true })
    }

    /// List all transports of the local node
    pub async fn get_transports(&self) -> Result<Vec<TransportResponse>, GatewayError> {
        Ok(self
            .manager
            .transports()
            .await
            .into_iter()
            .map(TransportResponse::from)
            .collect())
    }
}

impl std::fmt::Debug for TransportGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportGateway")
            .field("local", &self.manager.local_identity())
            .finish()
    }
}

impl RpcService for TransportGateway {
    fn dispatch_table(self: Arc<Self>) -> DispatchTable {
        let add = self.clone();
        let remove = self.clone();
        let list = self;
        DispatchTable::new(GATEWAY_SERVICE)
            .method("AddTransport", move |request: TransportRequest| {
                let gateway = add.clone();
                async move { gateway.add_transport(request).await }
            })
            .method("RemoveTransport", move |request: UuidRequest| {
                let gateway = remove.clone();
                async move { gateway.remove_transport(request).await }
            })
            .method("GetTransports", move |_: ()| {
                let gateway = list.clone();
                async move { gateway.get_transports().await }
            })
    }
}

/// Typed client for a served gateway
#[derive(Debug)]
pub struct GatewayClient<S> {
    rpc: RpcClient<S>,
}

impl<S> GatewayClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap a stream connected to a transport-setup node
    pub fn new(stream: S) -> Self {
        Self {
            rpc: RpcClient::new(stream),
        }
    }

    /// Call `TransportGateway.AddTransport`
    pub async fn add_transport(
        &mut self,
        remote_pk: PeerIdentity,
        transport_type: &str,
    ) -> RpcResult<TransportResponse> {
        let request = TransportRequest {
            remote_pk,
            transport_type: transport_type.to_string(),
        };
        self.rpc
            .call(&format!("{GATEWAY_SERVICE}.AddTransport"), &request)
            .await
    }

    /// Call `TransportGateway.RemoveTransport`
    pub async fn remove_transport(&mut self, id: Uuid) -> RpcResult<bool> {
        let response: BoolResponse = self
            .rpc
            .call(
                &format!("{GATEWAY_SERVICE}.RemoveTransport"),
                &UuidRequest { id },
            )
            .await?;
        Ok(response.result)
    }

    /// Call `TransportGateway.GetTransports`
    pub async fn get_transports(&mut self) -> RpcResult<Vec<TransportResponse>> {
        self.rpc
            .call(&format!("{GATEWAY_SERVICE}.GetTransports"), &())
            .await
    }

    /// Close the connection
    pub async fn close(self) -> RpcResult<()> {
        self.rpc.close().await
    }
}
