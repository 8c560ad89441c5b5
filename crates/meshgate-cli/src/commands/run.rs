//! Run the transport-setup node
//!
//! The node joins a process-local overlay. Readiness, trust checks and the
//! gateway behave exactly as they would on a real network, which makes this
//! useful for smoke-testing a configuration.

use anyhow::{Context, Result};
use clap::Args;
use meshgate_core::{CancellationToken, MemoryOverlay};
use meshgate_setup::{
    InMemoryTransportManager, SetupConfig, SetupParams, TransportManager, TransportSetupService,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, info_span, warn};

/// Options for `meshgate run`
#[derive(Args)]
pub struct RunCommand {
    /// Overlay sessions the local network offers; defaults to the configured sessions_count
    #[arg(long)]
    pub available_sessions: Option<usize>,
}

/// Start the node and serve until Ctrl+C
pub async fn handle_run_command(cmd: RunCommand, config_path: &Path) -> Result<()> {
    let config = SetupConfig::load(config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;

    let keys = config.node_keys()?;
    let available = cmd
        .available_sessions
        .unwrap_or(config.overlay.sessions_count);
    let overlay = MemoryOverlay::new(available);
    let manager: Arc<dyn TransportManager> = Arc::new(InMemoryTransportManager::new(keys.public()));
    let logger = info_span!("transport_setup", peer = %keys.public());
    let params = SetupParams::from_config(&config, manager, logger)?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("interrupt received, shutting down"),
                Err(e) => warn!(error = %e, "failed to listen for Ctrl+C; shutting down"),
            }
            cancel.cancel();
        });
    }

    info!("Running transport setup. Press Ctrl+C to stop.");
    let service = TransportSetupService::initialize(&overlay, params, &cancel).await?;
    service.serve(&cancel).await?;

    let stats = service.stats();
    info!(
        accepted = stats.accepted,
        rejected = stats.rejected,
        accept_errors = stats.accept_errors,
        "listener stopped"
    );
    service.shutdown();
    Ok(())
}
