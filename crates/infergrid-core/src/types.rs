//! Domain types shared across InferGrid crates.
//!
//! These shapes describe deployment intent (what to run, where) and the
//! cluster configuration handed to the platform layer. Persisted rows
//! (deployments, workers, benchmarks) live in `infergrid-state`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Identifier of a registered cluster.
pub type ClusterId = String;

// ── Cluster ───────────────────────────────────────────────────────

/// Container platform variant, resolved by a live probe per operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Kubernetes,
    Openshift,
}

impl Platform {
    pub fn label(&self) -> &'static str {
        match self {
            Platform::Kubernetes => "kubernetes",
            Platform::Openshift => "openshift",
        }
    }
}

/// Kubeconfig-shaped cluster access configuration.
///
/// Stored age-encrypted in the cluster table; unsealed per activity and
/// dropped when the activity returns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterConfig {
    /// API server URL (e.g. `https://10.0.0.1:6443`).
    pub server: String,
    /// Bearer token for the API server.
    pub token: String,
    /// Externally reachable ingress base URL for deployed endpoints.
    pub ingress_url: String,
    /// Declared platform. The probe is authoritative; this is a hint
    /// only used when a caller asks for the record without probing.
    pub platform: Option<Platform>,
}

// ── Deployment intent ─────────────────────────────────────────────

/// Device compute class, used by the ETA estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Cpu,
    Gpu,
}

/// One serving device on a node: the runtime image plus its shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceSpec {
    pub name: String,
    pub image: String,
    pub replica: u32,
    /// Memory request, e.g. `"16Gi"`.
    pub memory: String,
    #[serde(rename = "type")]
    pub device_type: DeviceType,
    /// Tensor-parallel size for multi-device serving.
    pub tp_size: u32,
    /// Max concurrent requests per replica.
    pub concurrency: u32,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub envs: HashMap<String, String>,
}

/// A target node and the devices to place on it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeSpec {
    pub name: String,
    pub devices: Vec<DeviceSpec>,
}

/// Where the model weights come from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelSpec {
    pub name: String,
    /// Parameter count, e.g. `7_000_000_000` for a 7B model.
    pub size_params: u64,
    /// Source/provider name, e.g. `HUGGING_FACE`, `OPENAI`, `URL`.
    pub provider: Option<String>,
    /// Credential reference for gated sources.
    pub credential_id: Option<String>,
    /// Source URI for `URL`/`DISK` providers.
    pub uri: Option<String>,
}

/// Cloud endpoints are proxied; local models are deployed onto a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployType {
    Cloud,
    Local,
}

/// Providers served by a hosted API rather than a cluster deployment.
pub const CLOUD_PROVIDERS: [&str; 6] = [
    "OPENAI",
    "ANTHROPIC",
    "AZURE_OPENAI",
    "BEDROCK",
    "COHERE",
    "GROQ",
];

/// Sources that resolve to weights we deploy ourselves.
pub const LOCAL_SOURCES: [&str; 3] = ["HUGGING_FACE", "URL", "DISK"];

/// Classify a deployment as cloud-proxied or locally deployed.
///
/// Explicit allow-lists over `provider`, then `credential_id`; anything
/// unrecognized (or absent) falls back to local.
pub fn classify_deploy_type(provider: Option<&str>, credential_id: Option<&str>) -> DeployType {
    let is_cloud = |s: &str| CLOUD_PROVIDERS.contains(&s.trim().to_uppercase().as_str());
    let is_local = |s: &str| LOCAL_SOURCES.contains(&s.trim().to_uppercase().as_str());

    if let Some(p) = provider {
        if is_cloud(p) {
            return DeployType::Cloud;
        }
        if is_local(p) {
            return DeployType::Local;
        }
    }
    if let Some(c) = credential_id {
        if is_cloud(c) {
            return DeployType::Cloud;
        }
    }
    DeployType::Local
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cloud_providers_classify_as_cloud() {
        for p in CLOUD_PROVIDERS {
            assert_eq!(classify_deploy_type(Some(p), None), DeployType::Cloud);
        }
    }

    #[test]
    fn local_sources_classify_as_local() {
        for p in LOCAL_SOURCES {
            assert_eq!(classify_deploy_type(Some(p), None), DeployType::Local);
        }
    }

    #[test]
    fn classification_is_case_insensitive() {
        assert_eq!(
            classify_deploy_type(Some("openai"), None),
            DeployType::Cloud
        );
        assert_eq!(
            classify_deploy_type(Some(" hugging_face "), None),
            DeployType::Local
        );
    }

    #[test]
    fn credential_id_is_consulted_when_provider_is_unknown() {
        assert_eq!(
            classify_deploy_type(None, Some("BEDROCK")),
            DeployType::Cloud
        );
        assert_eq!(
            classify_deploy_type(Some("custom"), Some("GROQ")),
            DeployType::Cloud
        );
    }

    #[test]
    fn neither_given_falls_back_to_local() {
        assert_eq!(classify_deploy_type(None, None), DeployType::Local);
        assert_eq!(
            classify_deploy_type(Some("something-else"), None),
            DeployType::Local
        );
    }

    #[test]
    fn device_spec_round_trips_with_type_rename() {
        let device = DeviceSpec {
            name: "gpu0".to_string(),
            image: "vllm:latest".to_string(),
            replica: 2,
            memory: "16Gi".to_string(),
            device_type: DeviceType::Gpu,
            tp_size: 2,
            concurrency: 8,
            args: vec!["--max-model-len=4096".to_string()],
            envs: HashMap::new(),
        };
        let json = serde_json::to_value(&device).unwrap();
        assert_eq!(json["type"], "gpu");
        let back: DeviceSpec = serde_json::from_value(json).unwrap();
        assert_eq!(back, device);
    }
}
