//! Key generation

use anyhow::{Context, Result};
use clap::Args;
use meshgate_core::{NodeKeys, PeerIdentity};
use meshgate_setup::SetupConfig;

/// Generate a fresh node identity
#[derive(Args)]
pub struct KeygenCommand {
    /// Discovery endpoint written into the generated config
    #[arg(long, default_value = "http://127.0.0.1:9090")]
    pub discovery: String,

    /// Trusted peer public key (repeatable)
    #[arg(long = "trust")]
    pub trusted: Vec<PeerIdentity>,
}

/// Render a config for a new identity
pub fn render_config(keys: &NodeKeys, cmd: &KeygenCommand) -> Result<String> {
    let mut config = SetupConfig::new(keys, cmd.discovery.clone());
    config.transport_setup.trusted_nodes = cmd.trusted.clone();
    config.validate().context("generated config is invalid")?;
    Ok(config.to_toml_string()?)
}

/// Print a new key pair as a ready-to-use config file
pub fn handle_keygen_command(cmd: KeygenCommand) -> Result<()> {
    let keys = NodeKeys::generate();
    let rendered = render_config(&keys, &cmd)?;
    eprintln!("public key: {}", keys.public());
    println!("{rendered}");
    Ok(())
}
