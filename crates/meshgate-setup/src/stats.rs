//! Counters describing accept-loop and per-connection activity.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Live counters shared by the gate and the per-connection servers
#[derive(Debug, Default)]
pub struct ServiceStats {
    accepted: AtomicU64,
    rejected: AtomicU64,
    accept_errors: AtomicU64,
    registration_failures: AtomicU64,
    servers_started: AtomicU64,
    servers_active: AtomicU64,
}

/// Point-in-time copy of [`ServiceStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Connections from trusted peers handed to an RPC server
    pub accepted: u64,
    /// Connections closed because the peer was not trusted
    pub rejected: u64,
    /// Transient accept failures
    pub accept_errors: u64,
    /// Connections closed because the gateway could not be registered
    pub registration_failures: u64,
    /// RPC servers that began serving
    pub servers_started: u64,
    /// RPC servers currently serving
    pub servers_active: u64,
}

impl ServiceStats {
    /// Fresh zeroed counters
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_accept_error(&self) {
        self.accept_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_registration_failure(&self) {
        self.registration_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Mark one server as serving until the returned guard drops
    pub(crate) fn server_started(self: &Arc<Self>) -> ActiveServer {
        self.servers_started.fetch_add(1, Ordering::Relaxed);
        self.servers_active.fetch_add(1, Ordering::Relaxed);
        ActiveServer {
            stats: self.clone(),
        }
    }

    /// Read every counter
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            accept_errors: self.accept_errors.load(Ordering::Relaxed),
            registration_failures: self.registration_failures.load(Ordering::Relaxed),
            servers_started: self.servers_started.load(Ordering::Relaxed),
            servers_active: self.servers_active.load(Ordering::Relaxed),
        }
    }
}

/// Decrements the active-server count on drop
#[derive(Debug)]
pub(crate) struct ActiveServer {
    stats: Arc<ServiceStats>,
}

impl Drop for ActiveServer {
    fn drop(&mut self) {
        self.stats.servers_active.fetch_sub(1, Ordering::Relaxed);
    }
}
