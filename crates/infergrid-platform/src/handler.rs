//! The deployment-facing entry point over the platform handlers.
//!
//! [`DeploymentHandler`] owns the cluster-config lifecycle: configs
//! rest sealed in the state store and are opened here, per operation,
//! with the plaintext dropped as soon as the call returns. Handler
//! selection goes through a [`HandlerResolver`] so tests and the
//! simulator can bypass the live platform probe.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use infergrid_core::{ClusterConfig, ConfigSealer, ModelSpec, NodeSpec, Platform};
use infergrid_state::StateStore;

use crate::api::ClusterApi;
use crate::error::{PlatformError, PlatformResult};
use crate::kubernetes::KubernetesHandler;
use crate::metrics::MetricsSource;
use crate::openshift::OpenShiftHandler;
use crate::ops::ClusterHandler;
use crate::probe::detect_platform;
use crate::types::{DeploymentProbe, JobStatus, NodeInfo, NodeStatus, TransferStatus};

/// Picks the [`ClusterHandler`] for a config. Called once per
/// operation; resolvers must not cache verdicts across calls.
#[async_trait]
pub trait HandlerResolver: Send + Sync {
    async fn resolve(&self, config: &ClusterConfig) -> PlatformResult<Arc<dyn ClusterHandler>>;
}

/// Probes the live API group list and constructs the matching handler.
pub struct ProbeResolver {
    api: Arc<dyn ClusterApi>,
}

impl ProbeResolver {
    pub fn new(api: Arc<dyn ClusterApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl HandlerResolver for ProbeResolver {
    async fn resolve(&self, config: &ClusterConfig) -> PlatformResult<Arc<dyn ClusterHandler>> {
        match detect_platform(self.api.as_ref(), config).await? {
            Platform::Openshift => Ok(Arc::new(OpenShiftHandler::new(self.api.clone()))),
            Platform::Kubernetes => Ok(Arc::new(KubernetesHandler::new(self.api.clone()))),
        }
    }
}

/// Always answers with the same handler. Used for the simulator and
/// for tests that pin a platform.
pub struct FixedResolver(pub Arc<dyn ClusterHandler>);

#[async_trait]
impl HandlerResolver for FixedResolver {
    async fn resolve(&self, _config: &ClusterConfig) -> PlatformResult<Arc<dyn ClusterHandler>> {
        Ok(self.0.clone())
    }
}

/// Store-backed facade the activities and reconciler call into.
pub struct DeploymentHandler {
    store: StateStore,
    sealer: Arc<ConfigSealer>,
    resolver: Arc<dyn HandlerResolver>,
    metrics: Option<Arc<dyn MetricsSource>>,
}

impl DeploymentHandler {
    pub fn new(
        store: StateStore,
        sealer: Arc<ConfigSealer>,
        resolver: Arc<dyn HandlerResolver>,
    ) -> Self {
        Self {
            store,
            sealer,
            resolver,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSource>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Opens the sealed config and resolves a handler for it. The
    /// returned config is the only plaintext copy; callers let it drop
    /// with the operation.
    async fn resolve(
        &self,
        cluster_id: &str,
    ) -> PlatformResult<(ClusterConfig, Arc<dyn ClusterHandler>)> {
        let record = self
            .store
            .get_cluster(cluster_id)?
            .ok_or_else(|| PlatformError::Configuration(format!("unknown cluster {cluster_id}")))?;
        let config = self.sealer.open(&record.sealed_config)?;
        let handler = self.resolver.resolve(&config).await?;
        Ok((config, handler))
    }

    pub async fn verify_connection(&self, cluster_id: &str) -> PlatformResult<Platform> {
        let (config, handler) = self.resolve(cluster_id).await?;
        handler.verify_connection(&config).await?;
        Ok(handler.platform())
    }

    pub async fn setup_namespace(&self, cluster_id: &str, namespace: &str) -> PlatformResult<()> {
        let (config, handler) = self.resolve(cluster_id).await?;
        handler.initial_setup(&config, namespace).await
    }

    /// Node inventory, enriched with device utilization when a metrics
    /// source is configured. Metrics failures degrade to bare info.
    pub async fn node_info(&self, cluster_id: &str) -> PlatformResult<Vec<NodeInfo>> {
        let (config, handler) = self.resolve(cluster_id).await?;
        let mut nodes = handler.get_node_info(&config).await?;
        if let Some(metrics) = &self.metrics {
            match metrics.device_utilization(&config).await {
                Ok(table) => {
                    for node in &mut nodes {
                        for device in &mut node.devices {
                            let key = (node.name.clone(), device.name.clone());
                            device.utilization = table.get(&key).copied();
                        }
                    }
                }
                Err(e) => warn!(cluster_id, error = %e, "metrics enrichment skipped"),
            }
        }
        Ok(nodes)
    }

    pub async fn node_status(&self, cluster_id: &str, node: &str) -> PlatformResult<NodeStatus> {
        let (config, handler) = self.resolve(cluster_id).await?;
        handler.get_node_status(&config, node).await
    }

    pub async fn deploy_runtime(
        &self,
        cluster_id: &str,
        namespace: &str,
        nodes: &[NodeSpec],
    ) -> PlatformResult<()> {
        let (config, handler) = self.resolve(cluster_id).await?;
        handler.deploy_runtime(&config, namespace, nodes).await
    }

    pub async fn deployment_status(
        &self,
        cluster_id: &str,
        namespace: &str,
    ) -> PlatformResult<DeploymentProbe> {
        let (config, handler) = self.resolve(cluster_id).await?;
        handler.get_deployment_status(&config, namespace).await
    }

    pub async fn transfer_model(
        &self,
        cluster_id: &str,
        namespace: &str,
        model: &ModelSpec,
    ) -> PlatformResult<()> {
        let (config, handler) = self.resolve(cluster_id).await?;
        handler.transfer_model(&config, namespace, model).await
    }

    pub async fn transfer_status(
        &self,
        cluster_id: &str,
        namespace: &str,
    ) -> PlatformResult<TransferStatus> {
        let (config, handler) = self.resolve(cluster_id).await?;
        handler.get_model_transfer_status(&config, namespace).await
    }

    pub async fn delete_namespace(&self, cluster_id: &str, namespace: &str) -> PlatformResult<()> {
        let (config, handler) = self.resolve(cluster_id).await?;
        handler.delete_namespace(&config, namespace).await
    }

    pub async fn delete_pod(
        &self,
        cluster_id: &str,
        namespace: &str,
        pod: &str,
    ) -> PlatformResult<()> {
        let (config, handler) = self.resolve(cluster_id).await?;
        handler.delete_pod(&config, namespace, pod).await
    }

    pub async fn pod_status(
        &self,
        cluster_id: &str,
        namespace: &str,
        pod: &str,
    ) -> PlatformResult<String> {
        let (config, handler) = self.resolve(cluster_id).await?;
        handler.get_pod_status(&config, namespace, pod).await
    }

    pub async fn pod_logs(
        &self,
        cluster_id: &str,
        namespace: &str,
        pod: &str,
        tail: Option<u32>,
    ) -> PlatformResult<String> {
        let (config, handler) = self.resolve(cluster_id).await?;
        handler.get_pod_logs(&config, namespace, pod, tail).await
    }

    pub async fn deploy_quantization_job(
        &self,
        cluster_id: &str,
        namespace: &str,
        model: &ModelSpec,
    ) -> PlatformResult<()> {
        let (config, handler) = self.resolve(cluster_id).await?;
        handler
            .deploy_quantization_job(&config, namespace, model)
            .await
    }

    pub async fn quantization_status(
        &self,
        cluster_id: &str,
        namespace: &str,
    ) -> PlatformResult<JobStatus> {
        let (config, handler) = self.resolve(cluster_id).await?;
        handler.get_quantization_status(&config, namespace).await
    }

    pub async fn adapter_status(
        &self,
        cluster_id: &str,
        namespace: &str,
        adapter: &str,
    ) -> PlatformResult<JobStatus> {
        let (config, handler) = self.resolve(cluster_id).await?;
        handler.get_adapter_status(&config, namespace, adapter).await
    }

    pub async fn supported_endpoints(
        &self,
        cluster_id: &str,
        namespace: &str,
    ) -> PlatformResult<Vec<String>> {
        let (config, handler) = self.resolve(cluster_id).await?;
        handler
            .identify_supported_endpoints(&config, namespace)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimCluster;
    use crate::types::{DeviceInfo, NodeStatus};
    use infergrid_state::ClusterRecord;
    use std::collections::HashMap;

    fn seed(sim: Arc<SimCluster>) -> (DeploymentHandler, StateStore) {
        let store = StateStore::open_in_memory().unwrap();
        let sealer = Arc::new(ConfigSealer::generate());
        let config = ClusterConfig {
            server: "http://sim:6443".to_string(),
            token: "secret-token".to_string(),
            ingress_url: "http://sim.local".to_string(),
            platform: None,
        };
        let sealed = sealer.seal(&config).unwrap();
        store
            .put_cluster(&ClusterRecord {
                id: "c1".to_string(),
                sealed_config: sealed,
                platform: None,
                ingress_url: Some(config.ingress_url.clone()),
            })
            .unwrap();
        let handler =
            DeploymentHandler::new(store.clone(), sealer, Arc::new(FixedResolver(sim)));
        (handler, store)
    }

    #[tokio::test]
    async fn verify_connection_reports_platform() {
        let sim = Arc::new(SimCluster::new());
        let (handler, _store) = seed(sim);
        let platform = handler.verify_connection("c1").await.unwrap();
        assert_eq!(platform, Platform::Kubernetes);
    }

    #[tokio::test]
    async fn unknown_cluster_is_configuration_error() {
        let sim = Arc::new(SimCluster::new());
        let (handler, _store) = seed(sim);
        let err = handler.verify_connection("nope").await.unwrap_err();
        assert!(matches!(err, PlatformError::Configuration(_)));
    }

    #[tokio::test]
    async fn cluster_row_never_stores_plaintext_token() {
        let sim = Arc::new(SimCluster::new());
        let (_handler, store) = seed(sim);
        let record = store.get_cluster("c1").unwrap().unwrap();
        let raw = String::from_utf8_lossy(&record.sealed_config).into_owned();
        assert!(!raw.contains("secret-token"));
    }

    #[tokio::test]
    async fn node_info_is_enriched_by_metrics() {
        let sim = Arc::new(SimCluster::new());
        sim.set_nodes(vec![NodeInfo {
            name: "node-a".to_string(),
            status: NodeStatus::Ready,
            cpu: None,
            memory: None,
            gpu_count: 1,
            devices: vec![DeviceInfo {
                name: "gpu-0".to_string(),
                utilization: None,
            }],
        }]);
        let (handler, _store) = seed(sim);
        let mut table = HashMap::new();
        table.insert(("node-a".to_string(), "gpu-0".to_string()), 0.42);
        let handler = handler.with_metrics(Arc::new(crate::metrics::StaticMetrics::new(table)));

        let nodes = handler.node_info("c1").await.unwrap();
        assert_eq!(nodes[0].devices[0].utilization, Some(0.42));
    }
}
