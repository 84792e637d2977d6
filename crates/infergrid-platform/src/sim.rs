//! In-memory cluster simulator.
//!
//! Drives the whole stack without a real cluster: the daemon's `--sim`
//! mode and most pipeline/reconciler tests run against this. State
//! transitions that a real cluster performs asynchronously (transfer
//! completion, pod phase changes) are exposed as setter knobs.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use infergrid_core::{ClusterConfig, ModelSpec, NodeSpec, Platform};

use crate::error::{PlatformError, PlatformResult};
use crate::ops::ClusterHandler;
use crate::types::{
    DeploymentProbe, EndpointReadiness, JobStatus, LivePod, NodeInfo, NodeStatus, TransferStatus,
};

#[derive(Default)]
struct SimNamespace {
    pods: Vec<LivePod>,
    endpoints: Vec<String>,
    readiness: EndpointReadiness,
    transfer: Option<TransferStatus>,
    quantization: Option<JobStatus>,
    adapters: HashMap<String, JobStatus>,
}

#[derive(Default)]
struct SimState {
    namespaces: HashMap<String, SimNamespace>,
    nodes: Vec<NodeInfo>,
    unreachable: bool,
    /// Every delete_namespace call, including repeats. Tests assert on
    /// this to prove cleanup runs exactly once.
    namespace_deletions: Vec<String>,
}

pub struct SimCluster {
    platform: Platform,
    state: Mutex<SimState>,
}

impl SimCluster {
    pub fn new() -> Self {
        Self::with_platform(Platform::Kubernetes)
    }

    pub fn with_platform(platform: Platform) -> Self {
        Self {
            platform,
            state: Mutex::new(SimState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Makes every subsequent operation fail with a connection error.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    pub fn set_nodes(&self, nodes: Vec<NodeInfo>) {
        self.lock().nodes = nodes;
    }

    pub fn set_readiness(&self, namespace: &str, readiness: EndpointReadiness) {
        let mut state = self.lock();
        let ns = state.namespaces.entry(namespace.to_string()).or_default();
        ns.readiness = readiness;
        if readiness == EndpointReadiness::Ready {
            ns.endpoints = vec![format!("http://sim.local/{namespace}/v1")];
        }
    }

    pub fn set_transfer_status(&self, namespace: &str, status: TransferStatus) {
        self.lock()
            .namespaces
            .entry(namespace.to_string())
            .or_default()
            .transfer = Some(status);
    }

    pub fn set_quantization_status(&self, namespace: &str, status: JobStatus) {
        self.lock()
            .namespaces
            .entry(namespace.to_string())
            .or_default()
            .quantization = Some(status);
    }

    pub fn set_adapter_status(&self, namespace: &str, adapter: &str, status: JobStatus) {
        self.lock()
            .namespaces
            .entry(namespace.to_string())
            .or_default()
            .adapters
            .insert(adapter.to_string(), status);
    }

    pub fn set_pods(&self, namespace: &str, pods: Vec<LivePod>) {
        self.lock()
            .namespaces
            .entry(namespace.to_string())
            .or_default()
            .pods = pods;
    }

    pub fn has_namespace(&self, namespace: &str) -> bool {
        self.lock().namespaces.contains_key(namespace)
    }

    /// Deletion calls observed so far, repeats included.
    pub fn namespace_deletions(&self) -> Vec<String> {
        self.lock().namespace_deletions.clone()
    }

    fn check_reachable(&self) -> PlatformResult<()> {
        if self.lock().unreachable {
            Err(PlatformError::Connection("simulated outage".to_string()))
        } else {
            Ok(())
        }
    }
}

impl Default for SimCluster {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClusterHandler for SimCluster {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn verify_connection(&self, _config: &ClusterConfig) -> PlatformResult<()> {
        self.check_reachable()
    }

    async fn initial_setup(&self, _config: &ClusterConfig, namespace: &str) -> PlatformResult<()> {
        self.check_reachable()?;
        self.lock()
            .namespaces
            .entry(namespace.to_string())
            .or_default();
        Ok(())
    }

    async fn get_node_info(&self, _config: &ClusterConfig) -> PlatformResult<Vec<NodeInfo>> {
        self.check_reachable()?;
        Ok(self.lock().nodes.clone())
    }

    async fn get_node_status(
        &self,
        _config: &ClusterConfig,
        node: &str,
    ) -> PlatformResult<NodeStatus> {
        self.check_reachable()?;
        self.lock()
            .nodes
            .iter()
            .find(|n| n.name == node)
            .map(|n| n.status)
            .ok_or_else(|| PlatformError::NotFound(format!("node {node}")))
    }

    async fn deploy_runtime(
        &self,
        _config: &ClusterConfig,
        namespace: &str,
        nodes: &[NodeSpec],
    ) -> PlatformResult<()> {
        self.check_reachable()?;
        let mut state = self.lock();
        let ns = state
            .namespaces
            .get_mut(namespace)
            .ok_or_else(|| PlatformError::NotFound(format!("namespace {namespace}")))?;
        ns.pods.clear();
        for node in nodes {
            for device in &node.devices {
                for replica in 0..device.replica {
                    ns.pods.push(LivePod {
                        name: format!("{}-{}-{replica}", node.name, device.name),
                        node_name: node.name.clone(),
                        device_name: device.name.clone(),
                        status: "Running".to_string(),
                        restarts: 0,
                        started_at: None,
                    });
                }
            }
        }
        Ok(())
    }

    async fn get_deployment_status(
        &self,
        _config: &ClusterConfig,
        namespace: &str,
    ) -> PlatformResult<DeploymentProbe> {
        self.check_reachable()?;
        let state = self.lock();
        let ns = state
            .namespaces
            .get(namespace)
            .ok_or_else(|| PlatformError::NotFound(format!("namespace {namespace}")))?;
        Ok(DeploymentProbe {
            readiness: ns.readiness,
            pods: ns.pods.clone(),
            endpoints: ns.endpoints.clone(),
        })
    }

    async fn transfer_model(
        &self,
        _config: &ClusterConfig,
        namespace: &str,
        _model: &ModelSpec,
    ) -> PlatformResult<()> {
        self.check_reachable()?;
        let mut state = self.lock();
        let ns = state
            .namespaces
            .get_mut(namespace)
            .ok_or_else(|| PlatformError::NotFound(format!("namespace {namespace}")))?;
        if ns.transfer.is_none() {
            ns.transfer = Some(TransferStatus::InProgress { percent: None });
        }
        Ok(())
    }

    async fn get_model_transfer_status(
        &self,
        _config: &ClusterConfig,
        namespace: &str,
    ) -> PlatformResult<TransferStatus> {
        self.check_reachable()?;
        self.lock()
            .namespaces
            .get(namespace)
            .and_then(|ns| ns.transfer.clone())
            .ok_or_else(|| PlatformError::NotFound(format!("transfer in {namespace}")))
    }

    async fn delete_namespace(
        &self,
        _config: &ClusterConfig,
        namespace: &str,
    ) -> PlatformResult<()> {
        self.check_reachable()?;
        let mut state = self.lock();
        state.namespace_deletions.push(namespace.to_string());
        state.namespaces.remove(namespace);
        Ok(())
    }

    async fn delete_pod(
        &self,
        _config: &ClusterConfig,
        namespace: &str,
        pod: &str,
    ) -> PlatformResult<()> {
        self.check_reachable()?;
        let mut state = self.lock();
        if let Some(ns) = state.namespaces.get_mut(namespace) {
            ns.pods.retain(|p| p.name != pod);
        }
        Ok(())
    }

    async fn get_pod_status(
        &self,
        _config: &ClusterConfig,
        namespace: &str,
        pod: &str,
    ) -> PlatformResult<String> {
        self.check_reachable()?;
        self.lock()
            .namespaces
            .get(namespace)
            .and_then(|ns| ns.pods.iter().find(|p| p.name == pod))
            .map(|p| p.status.clone())
            .ok_or_else(|| PlatformError::NotFound(format!("pod {pod}")))
    }

    async fn get_pod_logs(
        &self,
        _config: &ClusterConfig,
        namespace: &str,
        pod: &str,
        _tail: Option<u32>,
    ) -> PlatformResult<String> {
        self.check_reachable()?;
        Ok(format!("simulated logs for {namespace}/{pod}\n"))
    }

    async fn deploy_quantization_job(
        &self,
        _config: &ClusterConfig,
        namespace: &str,
        _model: &ModelSpec,
    ) -> PlatformResult<()> {
        self.check_reachable()?;
        let mut state = self.lock();
        let ns = state
            .namespaces
            .get_mut(namespace)
            .ok_or_else(|| PlatformError::NotFound(format!("namespace {namespace}")))?;
        if ns.quantization.is_none() {
            ns.quantization = Some(JobStatus::Running);
        }
        Ok(())
    }

    async fn get_quantization_status(
        &self,
        _config: &ClusterConfig,
        namespace: &str,
    ) -> PlatformResult<JobStatus> {
        self.check_reachable()?;
        self.lock()
            .namespaces
            .get(namespace)
            .and_then(|ns| ns.quantization.clone())
            .ok_or_else(|| PlatformError::NotFound(format!("quantization in {namespace}")))
    }

    async fn get_adapter_status(
        &self,
        _config: &ClusterConfig,
        namespace: &str,
        adapter: &str,
    ) -> PlatformResult<JobStatus> {
        self.check_reachable()?;
        self.lock()
            .namespaces
            .get(namespace)
            .and_then(|ns| ns.adapters.get(adapter).cloned())
            .ok_or_else(|| PlatformError::NotFound(format!("adapter {adapter}")))
    }

    async fn identify_supported_endpoints(
        &self,
        _config: &ClusterConfig,
        namespace: &str,
    ) -> PlatformResult<Vec<String>> {
        self.check_reachable()?;
        let state = self.lock();
        if !state.namespaces.contains_key(namespace) {
            return Err(PlatformError::NotFound(format!("namespace {namespace}")));
        }
        Ok(vec!["chat".to_string(), "completions".to_string()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use infergrid_core::DeviceSpec;

    fn config() -> ClusterConfig {
        ClusterConfig {
            server: "http://sim:6443".to_string(),
            token: "t".to_string(),
            ingress_url: "http://sim.local".to_string(),
            platform: Some(Platform::Kubernetes),
        }
    }

    fn one_node(replica: u32) -> Vec<NodeSpec> {
        vec![NodeSpec {
            name: "node-a".to_string(),
            devices: vec![DeviceSpec {
                name: "gpu-0".to_string(),
                image: "runtime:latest".to_string(),
                replica,
                memory: "16Gi".to_string(),
                device_type: infergrid_core::DeviceType::Gpu,
                tp_size: 1,
                concurrency: 8,
                args: vec![],
                envs: Default::default(),
            }],
        }]
    }

    #[tokio::test]
    async fn deploy_creates_one_pod_per_replica() {
        let sim = SimCluster::new();
        let cfg = config();
        sim.initial_setup(&cfg, "ns1").await.unwrap();
        sim.deploy_runtime(&cfg, "ns1", &one_node(3)).await.unwrap();
        let probe = sim.get_deployment_status(&cfg, "ns1").await.unwrap();
        assert_eq!(probe.pods.len(), 3);
        assert_eq!(probe.readiness, EndpointReadiness::Pending);
    }

    #[tokio::test]
    async fn deletions_are_recorded_per_call() {
        let sim = SimCluster::new();
        let cfg = config();
        sim.initial_setup(&cfg, "ns1").await.unwrap();
        sim.delete_namespace(&cfg, "ns1").await.unwrap();
        sim.delete_namespace(&cfg, "ns1").await.unwrap();
        assert_eq!(sim.namespace_deletions(), vec!["ns1", "ns1"]);
        assert!(!sim.has_namespace("ns1"));
    }

    #[tokio::test]
    async fn outage_turns_every_call_into_connection_error() {
        let sim = SimCluster::new();
        let cfg = config();
        sim.set_unreachable(true);
        let err = sim.verify_connection(&cfg).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn transfer_status_follows_knob() {
        let sim = SimCluster::new();
        let cfg = config();
        sim.initial_setup(&cfg, "ns1").await.unwrap();
        let model = ModelSpec {
            name: "m".to_string(),
            size_params: 7_000_000_000,
            provider: Some("HUGGING_FACE".to_string()),
            credential_id: None,
            uri: None,
        };
        sim.transfer_model(&cfg, "ns1", &model).await.unwrap();
        assert_eq!(
            sim.get_model_transfer_status(&cfg, "ns1").await.unwrap(),
            TransferStatus::InProgress { percent: None }
        );
        sim.set_transfer_status("ns1", TransferStatus::Completed);
        assert_eq!(
            sim.get_model_transfer_status(&cfg, "ns1").await.unwrap(),
            TransferStatus::Completed
        );
    }
}
