//! Broker configuration: a JSON file on disk, overridable by CLI flags.
//!
//! Mirrors the original implementation's single-level JSON config file,
//! generalized to a typed `serde` struct per topic of the ambient stack.

use std::path::{Path, PathBuf};

use quay_runtime::CircuitBreakerConfig;
use serde::{Deserialize, Serialize};

/// Which role this broker starts in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Registers as the leader directly.
    Leader,
    /// Discovers the leader via the registry and follows it.
    Follower,
}

/// Broker startup configuration, loaded from a JSON file and overridable by
/// CLI flags (see `main.rs`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Starting role.
    pub role: Role,
    /// The registry's `host:port`.
    pub register: String,
    /// Directory holding this broker's `<topic>.ocp` log files.
    pub log_dir: PathBuf,
    /// Host this broker advertises and binds to.
    pub host: String,
    /// Port this broker advertises and binds to.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Whether `publish` waits for every in-sync follower to ACK before
    /// replying to the producer. Defaults to `true` (wait-then-ack); see
    /// the design notes on the source's ambiguity here.
    #[serde(default = "default_wait_for_followers")]
    pub wait_for_followers: bool,
    /// Circuit breaker guarding the registry link.
    #[serde(default)]
    pub registry_link_breaker: BreakerConfigDto,
}

const fn default_port() -> u16 {
    quay_core::DEFAULT_BROKER_PORT
}

const fn default_wait_for_followers() -> bool {
    true
}

/// A JSON-friendly mirror of [`CircuitBreakerConfig`] (which holds
/// non-`Deserialize` `Duration`s via millisecond fields instead).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfigDto {
    /// See [`CircuitBreakerConfig::failure_threshold`].
    pub failure_threshold: usize,
    /// Cooldown before probing a down link again, in milliseconds.
    pub timeout_ms: u64,
    /// See [`CircuitBreakerConfig::success_threshold`].
    pub success_threshold: usize,
}

impl Default for BreakerConfigDto {
    fn default() -> Self {
        let defaults = CircuitBreakerConfig::default();
        Self {
            failure_threshold: defaults.failure_threshold,
            timeout_ms: u64::try_from(defaults.timeout.as_millis()).unwrap_or(u64::MAX),
            success_threshold: defaults.success_threshold,
        }
    }
}

impl From<BreakerConfigDto> for CircuitBreakerConfig {
    fn from(dto: BreakerConfigDto) -> Self {
        CircuitBreakerConfig::builder()
            .failure_threshold(dto.failure_threshold)
            .timeout(std::time::Duration::from_millis(dto.timeout_ms))
            .success_threshold(dto.success_threshold)
            .build()
    }
}

impl BrokerConfig {
    /// Load a config file, failing fast (fatal per the protocol's exit code
    /// contract) if it is missing, malformed, or missing a required field.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or does not parse as a
    /// valid [`BrokerConfig`].
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| anyhow::anyhow!("reading config {}: {err}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|err| anyhow::anyhow!("parsing config {}: {err}", path.display()))?;
        Ok(config)
    }

    /// This broker's dialable `host:port`.
    #[must_use]
    pub fn hostport(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_json() {
        let json = r#"{"role":"follower","register":"r:12345","log_dir":"/tmp/x","host":"b1"}"#;
        let config: BrokerConfig = serde_json::from_str(json).expect("parse");
        assert_eq!(config.role, Role::Follower);
        assert_eq!(config.port, quay_core::DEFAULT_BROKER_PORT);
        assert!(config.wait_for_followers);
    }

    #[test]
    fn hostport_formats_host_and_port() {
        let config = BrokerConfig {
            role: Role::Leader,
            register: "r:12345".into(),
            log_dir: "/tmp".into(),
            host: "b1".into(),
            port: 5050,
            wait_for_followers: true,
            registry_link_breaker: BreakerConfigDto::default(),
        };
        assert_eq!(config.hostport(), "b1:5050");
    }
}
