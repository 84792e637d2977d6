//! Result types returned by cluster platform operations.

use serde::{Deserialize, Serialize};

/// Node readiness as reported by the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Ready,
    NotReady,
    Unknown,
}

/// A device (accelerator or CPU slot) visible on a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    /// Fraction of device time in use, when a metrics source is wired.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utilization: Option<f64>,
}

/// One cluster node with its capacity summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
    pub status: NodeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    pub gpu_count: u32,
    pub devices: Vec<DeviceInfo>,
}

/// A running pod belonging to a deployment namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LivePod {
    pub name: String,
    pub node_name: String,
    pub device_name: String,
    /// Raw phase string, e.g. `Running` or `CrashLoopBackOff`.
    pub status: String,
    pub restarts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<u64>,
}

/// Readiness verdict for a deployed namespace. Produced after bounded
/// retries inside the handler; unreadiness is an outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointReadiness {
    Ready,
    #[default]
    Pending,
    IngressFailed,
    EndpointsFailed,
}

/// Full status probe of a deployment namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentProbe {
    pub readiness: EndpointReadiness,
    pub pods: Vec<LivePod>,
    /// Serving URLs, populated once ingress is admitted.
    pub endpoints: Vec<String>,
}

/// Progress of an in-cluster model transfer job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TransferStatus {
    InProgress {
        #[serde(skip_serializing_if = "Option::is_none")]
        percent: Option<f64>,
    },
    Completed,
    Failed {
        message: String,
    },
}

/// Status of a batch job (quantization, adapter load).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Succeeded,
    Failed { message: String },
}
