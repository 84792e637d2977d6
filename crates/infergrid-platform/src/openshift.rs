//! OpenShift implementation of [`ClusterHandler`].
//!
//! Same REST surface as Kubernetes for workloads and jobs, but
//! namespaces are created through project requests and serving
//! readiness is judged on Route admission instead of Ingress status.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info};

use infergrid_core::{ClusterConfig, ModelSpec, NodeSpec, Platform};

use crate::api::ClusterApi;
use crate::error::PlatformResult;
use crate::kubernetes::KubernetesHandler;
use crate::ops::ClusterHandler;
use crate::types::{
    DeploymentProbe, EndpointReadiness, JobStatus, NodeInfo, NodeStatus, TransferStatus,
};

pub struct OpenShiftHandler {
    inner: KubernetesHandler,
}

impl OpenShiftHandler {
    pub fn new(api: Arc<dyn ClusterApi>) -> Self {
        Self {
            inner: KubernetesHandler::new(api),
        }
    }

    pub fn with_readiness(mut self, attempts: u32, interval: Duration) -> Self {
        self.inner = self.inner.with_readiness(attempts, interval);
        self
    }

    async fn route_admitted(
        &self,
        config: &ClusterConfig,
        namespace: &str,
    ) -> PlatformResult<bool> {
        let path = format!("/apis/route.openshift.io/v1/namespaces/{namespace}/routes");
        let doc = self.inner.api().get_json(config, &path).await?;
        let Some(items) = doc["items"].as_array() else {
            return Ok(false);
        };
        Ok(items.iter().any(|route| {
            route["status"]["ingress"].as_array().is_some_and(|ings| {
                ings.iter().any(|ing| {
                    ing["conditions"].as_array().is_some_and(|conds| {
                        conds
                            .iter()
                            .any(|c| c["type"] == "Admitted" && c["status"] == "True")
                    })
                })
            })
        }))
    }
}

#[async_trait]
impl ClusterHandler for OpenShiftHandler {
    fn platform(&self) -> Platform {
        Platform::Openshift
    }

    async fn verify_connection(&self, config: &ClusterConfig) -> PlatformResult<()> {
        self.inner.verify_connection(config).await
    }

    async fn initial_setup(&self, config: &ClusterConfig, namespace: &str) -> PlatformResult<()> {
        let body = json!({
            "apiVersion": "project.openshift.io/v1",
            "kind": "ProjectRequest",
            "metadata": { "name": namespace },
        });
        self.inner
            .api()
            .post_json(config, "/apis/project.openshift.io/v1/projectrequests", &body)
            .await?;
        info!(namespace, "project ready");
        Ok(())
    }

    async fn get_node_info(&self, config: &ClusterConfig) -> PlatformResult<Vec<NodeInfo>> {
        self.inner.get_node_info(config).await
    }

    async fn get_node_status(
        &self,
        config: &ClusterConfig,
        node: &str,
    ) -> PlatformResult<NodeStatus> {
        self.inner.get_node_status(config, node).await
    }

    async fn deploy_runtime(
        &self,
        config: &ClusterConfig,
        namespace: &str,
        nodes: &[NodeSpec],
    ) -> PlatformResult<()> {
        self.inner.deploy_runtime(config, namespace, nodes).await
    }

    async fn get_deployment_status(
        &self,
        config: &ClusterConfig,
        namespace: &str,
    ) -> PlatformResult<DeploymentProbe> {
        let mut route_ok = false;
        for attempt in 0..self.inner.readiness_attempts() {
            if self.route_admitted(config, namespace).await? {
                route_ok = true;
                break;
            }
            debug!(namespace, attempt, "route not admitted yet");
            tokio::time::sleep(self.inner.readiness_interval()).await;
        }
        let pods = self.inner.list_pods(config, namespace).await?;
        if !route_ok {
            return Ok(DeploymentProbe {
                readiness: EndpointReadiness::IngressFailed,
                pods,
                endpoints: Vec::new(),
            });
        }

        let mut endpoints_ok = false;
        for attempt in 0..self.inner.readiness_attempts() {
            if self.inner.endpoints_populated(config, namespace).await? {
                endpoints_ok = true;
                break;
            }
            debug!(namespace, attempt, "endpoints not populated yet");
            tokio::time::sleep(self.inner.readiness_interval()).await;
        }
        let pods = self.inner.list_pods(config, namespace).await?;
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
            endpoints: KubernetesHandler::serving_endpoints(config, namespace),
        })
    }

    async fn transfer_model(
        &self,
        config: &ClusterConfig,
        namespace: &str,
        model: &ModelSpec,
    ) -> PlatformResult<()> {
        self.inner.transfer_model(config, namespace, model).await
    }

    async fn get_model_transfer_status(
        &self,
        config: &ClusterConfig,
        namespace: &str,
    ) -> PlatformResult<TransferStatus> {
        self.inner.get_model_transfer_status(config, namespace).await
    }

    async fn delete_namespace(
        &self,
        config: &ClusterConfig,
        namespace: &str,
    ) -> PlatformResult<()> {
        self.inner.delete_namespace(config, namespace).await
    }

    async fn delete_pod(
        &self,
        config: &ClusterConfig,
        namespace: &str,
        pod: &str,
    ) -> PlatformResult<()> {
        self.inner.delete_pod(config, namespace, pod).await
    }

    async fn get_pod_status(
        &self,
        config: &ClusterConfig,
        namespace: &str,
        pod: &str,
    ) -> PlatformResult<String> {
        self.inner.get_pod_status(config, namespace, pod).await
    }

    async fn get_pod_logs(
        &self,
        config: &ClusterConfig,
        namespace: &str,
        pod: &str,
        tail: Option<u32>,
    ) -> PlatformResult<String> {
        self.inner.get_pod_logs(config, namespace, pod, tail).await
    }

    async fn deploy_quantization_job(
        &self,
        config: &ClusterConfig,
        namespace: &str,
        model: &ModelSpec,
    ) -> PlatformResult<()> {
        self.inner
            .deploy_quantization_job(config, namespace, model)
            .await
    }

    async fn get_quantization_status(
        &self,
        config: &ClusterConfig,
        namespace: &str,
    ) -> PlatformResult<JobStatus> {
        self.inner.get_quantization_status(config, namespace).await
    }

    async fn get_adapter_status(
        &self,
        config: &ClusterConfig,
        namespace: &str,
        adapter: &str,
    ) -> PlatformResult<JobStatus> {
        self.inner
            .get_adapter_status(config, namespace, adapter)
            .await
    }

    async fn identify_supported_endpoints(
        &self,
        config: &ClusterConfig,
        namespace: &str,
    ) -> PlatformResult<Vec<String>> {
        self.inner
            .identify_supported_endpoints(config, namespace)
            .await
    }
}
