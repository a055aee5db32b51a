use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

use crate::signaling::WorkerConfig;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub enable_tracing: bool,
    pub gateway: GatewayConfig,
    /// PostgreSQL connection URL; in-memory store when absent
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default)]
    pub signaling: SignalingConfig,
    #[serde(default)]
    pub worker: RecoveryWorkerConfig,
    /// Control plane to register with on startup
    #[serde(default)]
    pub control_plane: Option<ControlPlaneConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SignalingConfig {
    /// Lease holder identity of this instance; random when unset
    #[serde(default)]
    pub runtime_id: Option<String>,
    pub lease_duration_ms: u64,
    /// `<destinationType>-<FLOWTYPE>` keys; empty accepts everything
    #[serde(default)]
    pub allowed_transfer_types: Vec<String>,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            runtime_id: None,
            lease_duration_ms: 60_000,
            allowed_transfer_types: Vec::new(),
        }
    }
}

impl SignalingConfig {
    pub fn lease_duration(&self) -> Duration {
        Duration::from_millis(self.lease_duration_ms)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RecoveryWorkerConfig {
    pub enabled: bool,
    pub scan_interval_secs: u64,
    pub stale_threshold_secs: u64,
    pub batch_size: usize,
}

impl Default for RecoveryWorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scan_interval_secs: 30,
            stale_threshold_secs: 60,
            batch_size: 100,
        }
    }
}

impl From<&RecoveryWorkerConfig> for WorkerConfig {
    fn from(c: &RecoveryWorkerConfig) -> Self {
        WorkerConfig {
            scan_interval: Duration::from_secs(c.scan_interval_secs),
            stale_threshold: Duration::from_secs(c.stale_threshold_secs),
            batch_size: c.batch_size,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ControlPlaneConfig {
    /// Base URL of the control plane's data plane management API
    pub url: String,
    pub data_plane_id: String,
    /// URL under which the control plane can reach this data plane
    pub public_url: String,
    #[serde(default)]
    pub allowed_source_types: Vec<String>,
}

impl AppConfig {
    pub fn load(env: &str) -> Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        Self::from_yaml(&content).with_context(|| format!("Failed to parse {}", config_path))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
log_level: info
log_dir: ./logs
log_file: dataplane.log
use_json: false
rotation: daily
enable_tracing: false
gateway:
  host: 0.0.0.0
  port: 8080
"#;

    #[test]
    fn test_minimal_config_defaults() {
        let config = AppConfig::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.gateway.port, 8080);
        assert!(config.postgres_url.is_none());
        assert!(config.control_plane.is_none());
        assert_eq!(config.signaling.lease_duration(), Duration::from_secs(60));
        assert!(config.signaling.allowed_transfer_types.is_empty());
        assert!(config.worker.enabled);
    }

    #[test]
    fn test_full_config() {
        let yaml = format!(
            "{}{}",
            MINIMAL,
            r#"
postgres_url: postgres://dp:dp@localhost:5432/dataplane
signaling:
  runtime_id: dp-1
  lease_duration_ms: 5000
  allowed_transfer_types: [HttpData-PUSH, HttpData-PULL]
worker:
  enabled: false
  scan_interval_secs: 5
  stale_threshold_secs: 10
  batch_size: 20
control_plane:
  url: http://localhost:19192/control
  data_plane_id: dp-1
  public_url: http://localhost:8080
"#
        );
        let config = AppConfig::from_yaml(&yaml).unwrap();
        assert_eq!(config.signaling.runtime_id.as_deref(), Some("dp-1"));
        assert_eq!(config.signaling.allowed_transfer_types.len(), 2);

        let worker = WorkerConfig::from(&config.worker);
        assert_eq!(worker.scan_interval, Duration::from_secs(5));
        assert_eq!(worker.batch_size, 20);

        let cp = config.control_plane.unwrap();
        assert_eq!(cp.data_plane_id, "dp-1");
        assert!(cp.allowed_source_types.is_empty());
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(AppConfig::load("does-not-exist").is_err());
    }
}
