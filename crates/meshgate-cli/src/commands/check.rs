//! Config validation

use anyhow::{Context, Result};
use meshgate_setup::{SetupConfig, TRANSPORT_SETUP_PORT};
use std::path::Path;

/// Load the config and describe what the node would run with
pub fn describe(path: &Path) -> Result<serde_json::Value> {
    let config = SetupConfig::load(path)
        .with_context(|| format!("invalid config {}", path.display()))?;
    let keys = config.node_keys()?;
    let trusted: Vec<String> = config.trust_list().iter().map(|p| p.to_hex()).collect();

    Ok(serde_json::json!({
        "public_key": keys.public().to_hex(),
        "discovery": config.discovery_client()?.endpoint(),
        "sessions_count": config.overlay.sessions_count,
        "port": TRANSPORT_SETUP_PORT,
        "trusted_nodes": trusted,
    }))
}

/// Print the resolved configuration as JSON
pub fn handle_check_command(path: &Path) -> Result<()> {
    let summary = describe(path)?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshgate_core::NodeKeys;
    use std::io::Write;

    #[test]
    fn test_describe_valid_config() {
        let keys = NodeKeys::generate();
        let trusted = NodeKeys::generate().public();
        let mut config = SetupConfig::new(&keys, "http://disc.example/");
        config.transport_setup.trusted_nodes.push(trusted);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(config.to_toml_string().unwrap().as_bytes())
            .unwrap();

        let summary = describe(file.path()).unwrap();
        assert_eq!(summary["public_key"], keys.public().to_hex());
        assert_eq!(summary["discovery"], "http://disc.example");
        assert_eq!(summary["port"], 47);
        assert_eq!(summary["trusted_nodes"][0], trusted.to_hex());
    }

    #[test]
    fn test_describe_rejects_garbage() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"not = [valid").unwrap();
        assert!(describe(file.path()).is_err());
    }
}
