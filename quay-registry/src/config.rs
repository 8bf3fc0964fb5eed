//! Registry configuration: a JSON file on disk, overridable by CLI flags.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Registry startup configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Listen port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// How often, in milliseconds, the registry re-broadcasts the in-sync
    /// set to known brokers while no leader is registered.
    #[serde(default = "default_leader_wait_ms")]
    pub leader_wait_ms: u64,
}

const fn default_port() -> u16 {
    quay_core::DEFAULT_REGISTRY_PORT
}

const fn default_leader_wait_ms() -> u64 {
    quay_core::LEADER_WAIT_MS
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            leader_wait_ms: default_leader_wait_ms(),
        }
    }
}

impl RegistryConfig {
    /// Load a config file, failing fast if it is missing or malformed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or does not parse as a
    /// valid [`RegistryConfig`].
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| anyhow::anyhow!("reading config {}: {err}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|err| anyhow::anyhow!("parsing config {}: {err}", path.display()))?;
        Ok(config)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_empty_object_with_defaults() {
        let config: RegistryConfig = serde_json::from_str("{}").expect("parse");
        assert_eq!(config.port, quay_core::DEFAULT_REGISTRY_PORT);
        assert_eq!(config.leader_wait_ms, quay_core::LEADER_WAIT_MS);
    }
}
