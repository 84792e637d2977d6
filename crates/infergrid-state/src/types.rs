//! Persisted row types for the InferGrid state store.

use infergrid_core::Platform;
use serde::{Deserialize, Serialize};

// ── Deployment ────────────────────────────────────────────────────

/// Lifecycle status of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Pending,
    Ready,
    IngressFailed,
    EndpointsFailed,
    Failed,
    /// Terminal: the reconciler never retries an errored deployment.
    Error,
}

impl DeploymentStatus {
    /// Error is the only terminal state from the reconciler's view.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentStatus::Error)
    }
}

/// One provisioned model-serving deployment.
///
/// Created when a pipeline reaches the transfer step; status is written
/// by the pipeline and the reconciliation scheduler; deleted (with its
/// worker rows) by the delete-deployment workflow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Deployment {
    pub cluster_id: String,
    pub namespace: String,
    pub status: DeploymentStatus,
    /// Unix timestamp (seconds) of the last live status check.
    pub last_status_check: u64,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Deployment {
    /// Composite key for the deployments table.
    pub fn table_key(&self) -> String {
        deployment_key(&self.cluster_id, &self.namespace)
    }
}

/// Build a deployments table key.
pub fn deployment_key(cluster_id: &str, namespace: &str) -> String {
    format!("{cluster_id}/{namespace}")
}

// ── WorkerInfo ────────────────────────────────────────────────────

/// One live pod inside a deployment, as last observed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerInfo {
    pub cluster_id: String,
    pub namespace: String,
    pub name: String,
    pub node_name: String,
    pub device_name: String,
    /// Utilization fraction (0.0–1.0) from the metrics collaborator.
    pub utilization: Option<f64>,
    pub status: String,
    /// Parent deployment status at the last sync.
    pub deployment_status: DeploymentStatus,
    pub created: u64,
    pub last_restart: Option<u64>,
    pub last_updated: u64,
}

impl WorkerInfo {
    /// Composite key for the workers table.
    pub fn table_key(&self) -> String {
        worker_key(&self.cluster_id, &self.namespace, &self.name)
    }
}

/// Build a workers table key.
pub fn worker_key(cluster_id: &str, namespace: &str, name: &str) -> String {
    format!("{cluster_id}/{namespace}:{name}")
}

// ── Cluster ───────────────────────────────────────────────────────

/// A registered target cluster. The access config is stored sealed
/// (age-encrypted); only the platform hint and ingress URL are plain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterRecord {
    pub id: String,
    pub sealed_config: Vec<u8>,
    pub platform: Option<Platform>,
    pub ingress_url: Option<String>,
}

// ── Benchmark ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BenchmarkStatus {
    Processing,
    Success,
    Failed,
}

/// Measured figures for one benchmark run. 1:1 with its benchmark row
/// and cascade-deleted with it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BenchmarkResult {
    pub tokens_per_second: f64,
    pub latency_p50_ms: f64,
    pub latency_p99_ms: f64,
    pub concurrency: u32,
}

/// A performance-benchmark run attached to a pipeline execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Benchmark {
    pub id: String,
    pub cluster_id: String,
    pub namespace: String,
    pub status: BenchmarkStatus,
    pub result: Option<BenchmarkResult>,
    pub created_at: u64,
}
