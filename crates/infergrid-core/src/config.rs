//! inferd.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct InferConfig {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub reconcile: ReconcileSettings,
    #[serde(default)]
    pub pipeline: PipelineSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// API listen port.
    pub port: u16,
    /// Data directory for the embedded store and sealing key.
    pub data_dir: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            port: 8090,
            data_dir: "/var/lib/infergrid".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileSettings {
    /// Seconds between reconciliation cycles.
    pub interval_secs: u64,
    /// Deployments synced concurrently per batch.
    pub batch_size: usize,
    /// Seconds after which an active-sync lock is considered stale.
    pub stale_lock_secs: u64,
    /// Seconds before a FAILED deployment becomes due for retry.
    pub failed_retry_secs: u64,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            batch_size: 5,
            stale_lock_secs: 1800,
            failed_retry_secs: 24 * 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Seconds between transfer/quantization status polls.
    pub poll_interval_secs: u64,
    /// Overall model-transfer deadline in hours.
    pub transfer_deadline_hours: u64,
    /// Overall quantization deadline in hours.
    pub quantization_deadline_hours: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            transfer_deadline_hours: 24,
            quantization_deadline_hours: 5,
        }
    }
}

impl InferConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: InferConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = InferConfig::default();
        assert_eq!(config.daemon.port, 8090);
        assert_eq!(config.reconcile.failed_retry_secs, 86_400);
        assert_eq!(config.pipeline.transfer_deadline_hours, 24);
        assert_eq!(config.pipeline.quantization_deadline_hours, 5);
    }

    #[test]
    fn parses_partial_toml() {
        let toml = r#"
            [daemon]
            port = 9000
            data_dir = "/tmp/ig"

            [reconcile]
            interval_secs = 60
            batch_size = 10
            stale_lock_secs = 600
            failed_retry_secs = 3600
        "#;
        let config: InferConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.daemon.port, 9000);
        assert_eq!(config.reconcile.batch_size, 10);
        // Missing [pipeline] section takes defaults.
        assert_eq!(config.pipeline.poll_interval_secs, 30);
    }

    #[test]
    fn round_trips_through_toml() {
        let config = InferConfig::default();
        let s = config.to_toml_string().unwrap();
        let back: InferConfig = toml::from_str(&s).unwrap();
        assert_eq!(back.daemon.port, config.daemon.port);
    }
}
