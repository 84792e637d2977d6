//! Kubernetes implementation of [`ClusterHandler`].
//!
//! Talks the plain Kubernetes REST API through a [`ClusterApi`]
//! transport. Readiness is judged on Ingress admission plus Endpoints
//! population. The OpenShift variant reuses most of this and swaps the
//! namespace and ingress handling.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, info};

use infergrid_core::{ClusterConfig, DeviceSpec, DeviceType, ModelSpec, NodeSpec, Platform};

use crate::api::ClusterApi;
use crate::error::{PlatformError, PlatformResult};
use crate::ops::ClusterHandler;
use crate::types::{
    DeploymentProbe, DeviceInfo, EndpointReadiness, JobStatus, LivePod, NodeInfo, NodeStatus,
    TransferStatus,
};

const TRANSFER_JOB: &str = "model-transfer";
const QUANTIZE_JOB: &str = "model-quantize";
const DEFAULT_READINESS_ATTEMPTS: u32 = 10;
const DEFAULT_READINESS_INTERVAL: Duration = Duration::from_secs(6);

pub struct KubernetesHandler {
    api: Arc<dyn ClusterApi>,
    readiness_attempts: u32,
    readiness_interval: Duration,
}

impl KubernetesHandler {
    pub fn new(api: Arc<dyn ClusterApi>) -> Self {
        Self {
            api,
            readiness_attempts: DEFAULT_READINESS_ATTEMPTS,
            readiness_interval: DEFAULT_READINESS_INTERVAL,
        }
    }

    pub fn with_readiness(mut self, attempts: u32, interval: Duration) -> Self {
        self.readiness_attempts = attempts;
        self.readiness_interval = interval;
        self
    }

    pub(crate) fn api(&self) -> &Arc<dyn ClusterApi> {
        &self.api
    }

    pub(crate) fn readiness_attempts(&self) -> u32 {
        self.readiness_attempts
    }

    pub(crate) fn readiness_interval(&self) -> Duration {
        self.readiness_interval
    }

    async fn ingress_admitted(
        &self,
        config: &ClusterConfig,
        namespace: &str,
    ) -> PlatformResult<bool> {
        let path = format!("/apis/networking.k8s.io/v1/namespaces/{namespace}/ingresses");
        let doc = self.api.get_json(config, &path).await?;
        let Some(items) = doc["items"].as_array() else {
            return Ok(false);
        };
        // Admitted once the controller has published a load balancer
        // address for at least one ingress.
        Ok(items.iter().any(|ingress| {
            ingress["status"]["loadBalancer"]["ingress"]
                .as_array()
                .is_some_and(|lbs| !lbs.is_empty())
        }))
    }

    pub(crate) async fn endpoints_populated(
        &self,
        config: &ClusterConfig,
        namespace: &str,
    ) -> PlatformResult<bool> {
        let path = format!("/api/v1/namespaces/{namespace}/endpoints");
        let doc = self.api.get_json(config, &path).await?;
        let Some(items) = doc["items"].as_array() else {
            return Ok(false);
        };
        Ok(items.iter().any(|ep| {
            ep["subsets"].as_array().is_some_and(|subsets| {
                subsets.iter().any(|subset| {
                    subset["addresses"]
                        .as_array()
                        .is_some_and(|addrs| !addrs.is_empty())
                })
            })
        }))
    }

    pub(crate) async fn list_pods(
        &self,
        config: &ClusterConfig,
        namespace: &str,
    ) -> PlatformResult<Vec<LivePod>> {
        let path = format!("/api/v1/namespaces/{namespace}/pods");
        let doc = self.api.get_json(config, &path).await?;
        Ok(parse_pods(&doc))
    }

    pub(crate) fn serving_endpoints(config: &ClusterConfig, namespace: &str) -> Vec<String> {
        let base = config.ingress_url.trim_end_matches('/');
        vec![format!("{base}/{namespace}/v1")]
    }
}

#[async_trait]
impl ClusterHandler for KubernetesHandler {
    fn platform(&self) -> Platform {
        Platform::Kubernetes
    }

    async fn verify_connection(&self, config: &ClusterConfig) -> PlatformResult<()> {
        self.api.get_json(config, "/version").await?;
        Ok(())
    }

    async fn initial_setup(&self, config: &ClusterConfig, namespace: &str) -> PlatformResult<()> {
        let body = json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": { "name": namespace },
        });
        self.api
            .post_json(config, "/api/v1/namespaces", &body)
            .await?;
        info!(namespace, "namespace ready");
        Ok(())
    }

    async fn get_node_info(&self, config: &ClusterConfig) -> PlatformResult<Vec<NodeInfo>> {
        let doc = self.api.get_json(config, "/api/v1/nodes").await?;
        Ok(parse_nodes(&doc))
    }

    async fn get_node_status(
        &self,
        config: &ClusterConfig,
        node: &str,
    ) -> PlatformResult<NodeStatus> {
        let nodes = self.get_node_info(config).await?;
        nodes
            .into_iter()
            .find(|n| n.name == node)
            .map(|n| n.status)
            .ok_or_else(|| PlatformError::NotFound(format!("node {node}")))
    }

    async fn deploy_runtime(
        &self,
        config: &ClusterConfig,
        namespace: &str,
        nodes: &[NodeSpec],
    ) -> PlatformResult<()> {
        for node in nodes {
            for device in &node.devices {
                let name = workload_name(&node.name, &device.name);
                let manifest = runtime_deployment_manifest(namespace, &name, node, device);
                let path = format!("/apis/apps/v1/namespaces/{namespace}/deployments");
                self.api.post_json(config, &path, &manifest).await?;

                let service = runtime_service_manifest(namespace, &name, device);
                let path = format!("/api/v1/namespaces/{namespace}/services");
                self.api.post_json(config, &path, &service).await?;
                debug!(namespace, workload = %name, "runtime workload applied");
            }
        }
        Ok(())
    }

    async fn get_deployment_status(
        &self,
        config: &ClusterConfig,
        namespace: &str,
    ) -> PlatformResult<DeploymentProbe> {
        let mut ingress_ok = false;
        for attempt in 0..self.readiness_attempts {
            if self.ingress_admitted(config, namespace).await? {
                ingress_ok = true;
                break;
            }
            debug!(namespace, attempt, "ingress not admitted yet");
            tokio::time::sleep(self.readiness_interval).await;
        }
        let pods = self.list_pods(config, namespace).await?;
        if !ingress_ok {
            return Ok(DeploymentProbe {
                readiness: EndpointReadiness::IngressFailed,
                pods,
                endpoints: Vec::new(),
            });
        }

        let mut endpoints_ok = false;
        for attempt in 0..self.readiness_attempts {
            if self.endpoints_populated(config, namespace).await? {
                endpoints_ok = true;
                break;
            }
            debug!(namespace, attempt, "endpoints not populated yet");
            tokio::time::sleep(self.readiness_interval).await;
        }
        let pods = self.list_pods(config, namespace).await?;
        if !endpoints_ok {
            return Ok(DeploymentProbe {
                readiness: EndpointReadiness::EndpointsFailed,
                pods,
                endpoints: Vec::new(),
            });
        }

        Ok(DeploymentProbe {
            readiness: EndpointReadiness::Ready,
            pods,
            endpoints: Self::serving_endpoints(config, namespace),
        })
    }

    async fn transfer_model(
        &self,
        config: &ClusterConfig,
        namespace: &str,
        model: &ModelSpec,
    ) -> PlatformResult<()> {
        let manifest = transfer_job_manifest(namespace, model);
        let path = format!("/apis/batch/v1/namespaces/{namespace}/jobs");
        self.api.post_json(config, &path, &manifest).await?;
        info!(namespace, model = %model.name, "model transfer started");
        Ok(())
    }

    async fn get_model_transfer_status(
        &self,
        config: &ClusterConfig,
        namespace: &str,
    ) -> PlatformResult<TransferStatus> {
        let path = format!("/apis/batch/v1/namespaces/{namespace}/jobs/{TRANSFER_JOB}");
        let doc = self.api.get_json(config, &path).await?;
        Ok(match job_status(&doc) {
            JobStatus::Succeeded => TransferStatus::Completed,
            JobStatus::Failed { message } => TransferStatus::Failed { message },
            JobStatus::Running => TransferStatus::InProgress {
                percent: transfer_percent(&doc),
            },
        })
    }

    async fn delete_namespace(
        &self,
        config: &ClusterConfig,
        namespace: &str,
    ) -> PlatformResult<()> {
        let path = format!("/api/v1/namespaces/{namespace}");
        self.api.delete(config, &path).await?;
        info!(namespace, "namespace deleted");
        Ok(())
    }

    async fn delete_pod(
        &self,
        config: &ClusterConfig,
        namespace: &str,
        pod: &str,
    ) -> PlatformResult<()> {
        let path = format!("/api/v1/namespaces/{namespace}/pods/{pod}");
        self.api.delete(config, &path).await?;
        Ok(())
    }

    async fn get_pod_status(
        &self,
        config: &ClusterConfig,
        namespace: &str,
        pod: &str,
    ) -> PlatformResult<String> {
        let path = format!("/api/v1/namespaces/{namespace}/pods/{pod}");
        let doc = self.api.get_json(config, &path).await?;
        Ok(doc["status"]["phase"]
            .as_str()
            .unwrap_or("Unknown")
            .to_string())
    }

    async fn get_pod_logs(
        &self,
        config: &ClusterConfig,
        namespace: &str,
        pod: &str,
        tail: Option<u32>,
    ) -> PlatformResult<String> {
        let mut path = format!("/api/v1/namespaces/{namespace}/pods/{pod}/log");
        if let Some(lines) = tail {
            path.push_str(&format!("?tailLines={lines}"));
        }
        self.api.get_text(config, &path).await
    }

    async fn deploy_quantization_job(
        &self,
        config: &ClusterConfig,
        namespace: &str,
        model: &ModelSpec,
    ) -> PlatformResult<()> {
        let manifest = quantize_job_manifest(namespace, model);
        let path = format!("/apis/batch/v1/namespaces/{namespace}/jobs");
        self.api.post_json(config, &path, &manifest).await?;
        info!(namespace, model = %model.name, "quantization started");
        Ok(())
    }

    async fn get_quantization_status(
        &self,
        config: &ClusterConfig,
        namespace: &str,
    ) -> PlatformResult<JobStatus> {
        let path = format!("/apis/batch/v1/namespaces/{namespace}/jobs/{QUANTIZE_JOB}");
        let doc = self.api.get_json(config, &path).await?;
        Ok(job_status(&doc))
    }

    async fn get_adapter_status(
        &self,
        config: &ClusterConfig,
        namespace: &str,
        adapter: &str,
    ) -> PlatformResult<JobStatus> {
        let path = format!("/apis/batch/v1/namespaces/{namespace}/jobs/adapter-{adapter}");
        let doc = self.api.get_json(config, &path).await?;
        Ok(job_status(&doc))
    }

    async fn identify_supported_endpoints(
        &self,
        config: &ClusterConfig,
        namespace: &str,
    ) -> PlatformResult<Vec<String>> {
        let path = format!("/api/v1/namespaces/{namespace}/services");
        let doc = self.api.get_json(config, &path).await?;
        Ok(supported_endpoints(&doc))
    }
}

/// `{node}-{device}` lowered to a DNS-safe workload name.
pub(crate) fn workload_name(node: &str, device: &str) -> String {
    let mut name = format!("{node}-{device}").to_lowercase();
    name.retain(|c| c.is_ascii_alphanumeric() || c == '-');
    name
}

fn runtime_deployment_manifest(
    namespace: &str,
    name: &str,
    node: &NodeSpec,
    device: &DeviceSpec,
) -> Value {
    let mut env: Vec<Value> = device
        .envs
        .iter()
        .map(|(k, v)| json!({"name": k, "value": v}))
        .collect();
    env.push(json!({"name": "TP_SIZE", "value": device.tp_size.to_string()}));
    env.push(json!({"name": "MAX_CONCURRENCY", "value": device.concurrency.to_string()}));

    let mut resources = json!({"limits": {"memory": device.memory}});
    if device.device_type == DeviceType::Gpu {
        resources["limits"]["nvidia.com/gpu"] = json!(device.tp_size.to_string());
    }

    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "labels": { "app": name, "managed-by": "infergrid" },
        },
        "spec": {
            "replicas": device.replica,
            "selector": { "matchLabels": { "app": name } },
            "template": {
                "metadata": { "labels": { "app": name, "managed-by": "infergrid" } },
                "spec": {
                    "nodeSelector": { "kubernetes.io/hostname": node.name },
                    "containers": [{
                        "name": "runtime",
                        "image": device.image,
                        "args": device.args,
                        "env": env,
                        "resources": resources,
                    }],
                },
            },
        },
    })
}

fn runtime_service_manifest(namespace: &str, name: &str, device: &DeviceSpec) -> Value {
    let port_name = match device.device_type {
        DeviceType::Gpu => "http-chat",
        DeviceType::Cpu => "http-completions",
    };
    json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": { "name": name, "namespace": namespace },
        "spec": {
            "selector": { "app": name },
            "ports": [{ "name": port_name, "port": 8000, "targetPort": 8000 }],
        },
    })
}

fn transfer_job_manifest(namespace: &str, model: &ModelSpec) -> Value {
    json!({
        "apiVersion": "batch/v1",
        "kind": "Job",
        "metadata": { "name": TRANSFER_JOB, "namespace": namespace },
        "spec": {
            "backoffLimit": 2,
            "template": {
                "spec": {
                    "restartPolicy": "Never",
                    "containers": [{
                        "name": "transfer",
                        "image": "infergrid/model-transfer:latest",
                        "env": [
                            {"name": "MODEL_NAME", "value": model.name},
                            {"name": "MODEL_PROVIDER", "value": model.provider.clone().unwrap_or_default()},
                            {"name": "MODEL_URI", "value": model.uri.clone().unwrap_or_default()},
                        ],
                    }],
                },
            },
        },
    })
}

fn quantize_job_manifest(namespace: &str, model: &ModelSpec) -> Value {
    json!({
        "apiVersion": "batch/v1",
        "kind": "Job",
        "metadata": { "name": QUANTIZE_JOB, "namespace": namespace },
        "spec": {
            "backoffLimit": 1,
            "template": {
                "spec": {
                    "restartPolicy": "Never",
                    "containers": [{
                        "name": "quantize",
                        "image": "infergrid/model-quantize:latest",
                        "env": [{"name": "MODEL_NAME", "value": model.name}],
                    }],
                },
            },
        },
    })
}

pub(crate) fn job_status(job: &Value) -> JobStatus {
    let status = &job["status"];
    if status["succeeded"].as_u64().unwrap_or(0) > 0 {
        return JobStatus::Succeeded;
    }
    if status["failed"].as_u64().unwrap_or(0) > 0 {
        let message = status["conditions"]
            .as_array()
            .and_then(|conds| conds.iter().find(|c| c["type"] == "Failed"))
            .and_then(|c| c["message"].as_str())
            .unwrap_or("job failed")
            .to_string();
        return JobStatus::Failed { message };
    }
    JobStatus::Running
}

fn transfer_percent(job: &Value) -> Option<f64> {
    job["metadata"]["annotations"]["infergrid.io/transfer-percent"]
        .as_str()
        .and_then(|s| s.parse().ok())
}

pub(crate) fn parse_nodes(doc: &Value) -> Vec<NodeInfo> {
    let Some(items) = doc["items"].as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|node| {
            let name = node["metadata"]["name"].as_str()?.to_string();
            let status = node["status"]["conditions"]
                .as_array()
                .and_then(|conds| conds.iter().find(|c| c["type"] == "Ready"))
                .map(|c| match c["status"].as_str() {
                    Some("True") => NodeStatus::Ready,
                    Some("False") => NodeStatus::NotReady,
                    _ => NodeStatus::Unknown,
                })
                .unwrap_or(NodeStatus::Unknown);
            let capacity = &node["status"]["capacity"];
            let gpu_count = capacity["nvidia.com/gpu"]
                .as_str()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);
            let devices = (0..gpu_count)
                .map(|i| DeviceInfo {
                    name: format!("gpu-{i}"),
                    utilization: None,
                })
                .collect();
            Some(NodeInfo {
                name,
                status,
                cpu: capacity["cpu"].as_str().map(str::to_string),
                memory: capacity["memory"].as_str().map(str::to_string),
                gpu_count,
                devices,
            })
        })
        .collect()
}

pub(crate) fn parse_pods(doc: &Value) -> Vec<LivePod> {
    let Some(items) = doc["items"].as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|pod| {
            let name = pod["metadata"]["name"].as_str()?.to_string();
            let restarts = pod["status"]["containerStatuses"]
                .as_array()
                .map(|cs| {
                    cs.iter()
                        .map(|c| c["restartCount"].as_u64().unwrap_or(0) as u32)
                        .sum()
                })
                .unwrap_or(0);
            Some(LivePod {
                name,
                node_name: pod["spec"]["nodeName"].as_str().unwrap_or("").to_string(),
                device_name: pod["metadata"]["labels"]["app"]
                    .as_str()
                    .unwrap_or("")
                    .to_string(),
                status: pod["status"]["phase"]
                    .as_str()
                    .unwrap_or("Unknown")
                    .to_string(),
                restarts,
                started_at: None,
            })
        })
        .collect()
}

pub(crate) fn supported_endpoints(services: &Value) -> Vec<String> {
    let Some(items) = services["items"].as_array() else {
        return Vec::new();
    };
    let mut endpoints: Vec<String> = items
        .iter()
        .flat_map(|svc| {
            svc["spec"]["ports"]
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(|port| {
                    port["name"]
                        .as_str()
                        .and_then(|name| name.strip_prefix("http-"))
                        .map(str::to_string)
                })
        })
        .collect();
    endpoints.sort();
    endpoints.dedup();
    endpoints
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn workload_names_are_dns_safe() {
        assert_eq!(workload_name("Node_A", "gpu-0"), "nodea-gpu-0");
    }

    #[test]
    fn parses_node_list_with_gpus() {
        let doc = json!({"items": [{
            "metadata": {"name": "gpu-node-1"},
            "status": {
                "conditions": [{"type": "Ready", "status": "True"}],
                "capacity": {"cpu": "64", "memory": "512Gi", "nvidia.com/gpu": "4"},
            },
        }]});
        let nodes = parse_nodes(&doc);
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].status, NodeStatus::Ready);
        assert_eq!(nodes[0].gpu_count, 4);
        assert_eq!(nodes[0].devices.len(), 4);
    }

    #[test]
    fn job_status_reads_counters() {
        assert_eq!(
            job_status(&json!({"status": {"succeeded": 1}})),
            JobStatus::Succeeded
        );
        assert_eq!(
            job_status(&json!({"status": {"active": 1}})),
            JobStatus::Running
        );
        let failed = job_status(&json!({"status": {
            "failed": 1,
            "conditions": [{"type": "Failed", "message": "out of disk"}],
        }}));
        assert_eq!(
            failed,
            JobStatus::Failed {
                message: "out of disk".to_string()
            }
        );
    }

    #[test]
    fn endpoint_names_come_from_service_ports() {
        let doc = json!({"items": [
            {"spec": {"ports": [{"name": "http-chat"}, {"name": "metrics"}]}},
            {"spec": {"ports": [{"name": "http-completions"}]}},
        ]});
        assert_eq!(supported_endpoints(&doc), vec!["chat", "completions"]);
    }
}
