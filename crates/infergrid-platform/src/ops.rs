//! The per-platform capability interface.

use async_trait::async_trait;

use infergrid_core::{ClusterConfig, ModelSpec, NodeSpec, Platform};

use crate::error::PlatformResult;
use crate::types::{DeploymentProbe, JobStatus, NodeInfo, NodeStatus, TransferStatus};

/// Everything InferGrid needs from a cluster, regardless of variant.
///
/// Implementations are stateless with respect to the cluster: every
/// method takes the full `ClusterConfig` so a single handler instance
/// can serve any number of clusters of its platform.
#[async_trait]
pub trait ClusterHandler: Send + Sync {
    /// Which platform variant this handler drives.
    fn platform(&self) -> Platform;

    /// Cheap liveness check against the API server.
    async fn verify_connection(&self, config: &ClusterConfig) -> PlatformResult<()>;

    /// Creates the namespace (or project) a deployment lives in.
    /// Idempotent: an existing namespace is success.
    async fn initial_setup(&self, config: &ClusterConfig, namespace: &str) -> PlatformResult<()>;

    async fn get_node_info(&self, config: &ClusterConfig) -> PlatformResult<Vec<NodeInfo>>;

    async fn get_node_status(
        &self,
        config: &ClusterConfig,
        node: &str,
    ) -> PlatformResult<NodeStatus>;

    /// Rolls out the inference runtime for every node/device pair.
    async fn deploy_runtime(
        &self,
        config: &ClusterConfig,
        namespace: &str,
        nodes: &[NodeSpec],
    ) -> PlatformResult<()>;

    /// Probes serving readiness (ingress or route admission plus
    /// endpoint population) with bounded in-handler retries, and lists
    /// the namespace's live pods.
    async fn get_deployment_status(
        &self,
        config: &ClusterConfig,
        namespace: &str,
    ) -> PlatformResult<DeploymentProbe>;

    /// Starts the in-cluster model download/copy job.
    async fn transfer_model(
        &self,
        config: &ClusterConfig,
        namespace: &str,
        model: &ModelSpec,
    ) -> PlatformResult<()>;

    async fn get_model_transfer_status(
        &self,
        config: &ClusterConfig,
        namespace: &str,
    ) -> PlatformResult<TransferStatus>;

    /// Tears down the namespace and everything in it. Idempotent.
    async fn delete_namespace(
        &self,
        config: &ClusterConfig,
        namespace: &str,
    ) -> PlatformResult<()>;

    async fn delete_pod(
        &self,
        config: &ClusterConfig,
        namespace: &str,
        pod: &str,
    ) -> PlatformResult<()>;

    async fn get_pod_status(
        &self,
        config: &ClusterConfig,
        namespace: &str,
        pod: &str,
    ) -> PlatformResult<String>;

    async fn get_pod_logs(
        &self,
        config: &ClusterConfig,
        namespace: &str,
        pod: &str,
        tail: Option<u32>,
    ) -> PlatformResult<String>;

    async fn deploy_quantization_job(
        &self,
        config: &ClusterConfig,
        namespace: &str,
        model: &ModelSpec,
    ) -> PlatformResult<()>;

    async fn get_quantization_status(
        &self,
        config: &ClusterConfig,
        namespace: &str,
    ) -> PlatformResult<JobStatus>;

    async fn get_adapter_status(
        &self,
        config: &ClusterConfig,
        namespace: &str,
        adapter: &str,
    ) -> PlatformResult<JobStatus>;

    /// Lists the API surfaces the deployed runtime serves, e.g.
    /// `chat`, `completions`, `embeddings`.
    async fn identify_supported_endpoints(
        &self,
        config: &ClusterConfig,
        namespace: &str,
    ) -> PlatformResult<Vec<String>>;
}
