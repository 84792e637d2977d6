//! Activity implementations and registration.
//!
//! All pipeline I/O lives here: workflows call these by name through
//! the engine, which memoizes every outcome. Each activity parses its
//! JSON input, does one unit of work against the store, the platform
//! handler, or the publisher, and maps anticipated failures into
//! retryable/terminal activity failures.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use infergrid_core::{ModelSpec, NodeSpec, merge_deploy_config};
use infergrid_engine::{ActivityFailure, Engine};
use infergrid_notify::{EventStatus, Notification, Publisher};
use infergrid_platform::{DeploymentHandler, EndpointReadiness, PlatformError};
use infergrid_state::{
    Benchmark, BenchmarkResult, BenchmarkStatus, Deployment, DeploymentStatus, StateError,
    StateStore,
};

use crate::error::PipelineError;

/// Everything the activities touch. One instance shared by all
/// registered closures.
pub struct PipelineDeps {
    pub store: StateStore,
    pub handler: Arc<DeploymentHandler>,
    pub publisher: Publisher,
    pub benchmark: Arc<dyn BenchmarkRunner>,
}

/// Seam for the performance benchmark, which the pipeline treats as an
/// opaque collaborator.
#[async_trait]
pub trait BenchmarkRunner: Send + Sync {
    async fn run(
        &self,
        cluster_id: &str,
        namespace: &str,
        model: &ModelSpec,
    ) -> Result<BenchmarkResult, PipelineError>;
}

/// Deterministic figures derived from the model shape. Used by the
/// simulator mode and tests.
pub struct SyntheticBenchmark;

#[async_trait]
impl BenchmarkRunner for SyntheticBenchmark {
    async fn run(
        &self,
        _cluster_id: &str,
        _namespace: &str,
        model: &ModelSpec,
    ) -> Result<BenchmarkResult, PipelineError> {
        let billions = (model.size_params / 1_000_000_000).max(1) as f64;
        Ok(BenchmarkResult {
            tokens_per_second: 400.0 / billions,
            latency_p50_ms: 20.0 * billions,
            latency_p99_ms: 55.0 * billions,
            concurrency: 8,
        })
    }
}

pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn platform_failure(e: PlatformError) -> ActivityFailure {
    if e.is_retryable() {
        ActivityFailure::Retryable(e.to_string())
    } else {
        ActivityFailure::Terminal(e.to_string())
    }
}

fn state_failure(e: StateError) -> ActivityFailure {
    match e {
        StateError::NotFound(_) => ActivityFailure::Terminal(e.to_string()),
        other => ActivityFailure::Retryable(other.to_string()),
    }
}

fn parse<T: serde::de::DeserializeOwned>(input: Value) -> Result<T, ActivityFailure> {
    serde_json::from_value(input).map_err(|e| ActivityFailure::Terminal(format!("bad input: {e}")))
}

fn encode<T: Serialize>(value: &T) -> Result<Value, ActivityFailure> {
    serde_json::to_value(value).map_err(|e| ActivityFailure::Terminal(format!("bad output: {e}")))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClusterArgs {
    pub cluster_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NamespaceArgs {
    pub cluster_id: String,
    pub namespace: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeployConfigArgs {
    pub namespace: String,
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub add_worker: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TransferArgs {
    pub cluster_id: String,
    pub namespace: String,
    pub model: ModelSpec,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeployArgs {
    pub cluster_id: String,
    pub namespace: String,
    pub nodes: Vec<NodeSpec>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PublishArgs {
    pub topic: Option<String>,
    pub event: String,
    pub status: EventStatus,
    pub title: String,
    pub message: String,
    pub result: Option<Value>,
}

/// Blob key for the merged deploy-config snapshot of a namespace.
pub fn deploy_config_key(namespace: &str) -> String {
    format!("deploy_config_{namespace}")
}

/// Registers every pipeline activity on the engine.
pub fn register_activities(engine: &Engine, deps: &Arc<PipelineDeps>) {
    let d = deps.clone();
    engine.register_activity("verify_cluster_connection", move |input| {
        let d = d.clone();
        async move {
            let args: ClusterArgs = parse(input)?;
            let platform = d
                .handler
                .verify_connection(&args.cluster_id)
                .await
                .map_err(platform_failure)?;
            Ok(json!({ "platform": platform.label() }))
        }
    });

    let d = deps.clone();
    engine.register_activity("setup_namespace", move |input| {
        let d = d.clone();
        async move {
            let args: NamespaceArgs = parse(input)?;
            d.handler
                .setup_namespace(&args.cluster_id, &args.namespace)
                .await
                .map_err(platform_failure)?;
            Ok(Value::Null)
        }
    });

    let d = deps.clone();
    engine.register_activity("create_deployment_row", move |input| {
        let d = d.clone();
        async move {
            let args: NamespaceArgs = parse(input)?;
            // Idempotent under retry and add-worker re-runs: an
            // existing row is left alone.
            let existing = d
                .store
                .get_deployment(&args.cluster_id, &args.namespace)
                .map_err(state_failure)?;
            if existing.is_none() {
                let now = now_secs();
                d.store
                    .put_deployment(&Deployment {
                        cluster_id: args.cluster_id,
                        namespace: args.namespace,
                        status: DeploymentStatus::Pending,
                        last_status_check: now,
                        created_at: now,
                        updated_at: now,
                    })
                    .map_err(state_failure)?;
            }
            Ok(Value::Null)
        }
    });

    let d = deps.clone();
    engine.register_activity("merge_deploy_config", move |input| {
        let d = d.clone();
        async move {
            let args: DeployConfigArgs = parse(input)?;
            let key = deploy_config_key(&args.namespace);
            let existing: Vec<NodeSpec> = match d.store.get_blob(&key).map_err(state_failure)? {
                Some(value) => serde_json::from_value(value)
                    .map_err(|e| ActivityFailure::Terminal(format!("corrupt snapshot: {e}")))?,
                None => Vec::new(),
            };
            let merged = if args.add_worker {
                merge_deploy_config(&existing, &args.nodes)
            } else {
                args.nodes
            };
            let snapshot = encode(&merged)?;
            d.store.save_blob(&key, &snapshot).map_err(state_failure)?;
            Ok(snapshot)
        }
    });

    let d = deps.clone();
    engine.register_activity("transfer_model", move |input| {
        let d = d.clone();
        async move {
            let args: TransferArgs = parse(input)?;
            d.handler
                .transfer_model(&args.cluster_id, &args.namespace, &args.model)
                .await
                .map_err(platform_failure)?;
            Ok(Value::Null)
        }
    });

    let d = deps.clone();
    engine.register_activity("check_transfer_status", move |input| {
        let d = d.clone();
        async move {
            let args: NamespaceArgs = parse(input)?;
            let status = d
                .handler
                .transfer_status(&args.cluster_id, &args.namespace)
                .await
                .map_err(platform_failure)?;
            encode(&status)
        }
    });

    let d = deps.clone();
    engine.register_activity("start_quantization", move |input| {
        let d = d.clone();
        async move {
            let args: TransferArgs = parse(input)?;
            d.handler
                .deploy_quantization_job(&args.cluster_id, &args.namespace, &args.model)
                .await
                .map_err(platform_failure)?;
            Ok(Value::Null)
        }
    });

    let d = deps.clone();
    engine.register_activity("check_quantization_status", move |input| {
        let d = d.clone();
        async move {
            let args: NamespaceArgs = parse(input)?;
            let status = d
                .handler
                .quantization_status(&args.cluster_id, &args.namespace)
                .await
                .map_err(platform_failure)?;
            encode(&status)
        }
    });

    let d = deps.clone();
    engine.register_activity("deploy_runtime", move |input| {
        let d = d.clone();
        async move {
            let args: DeployArgs = parse(input)?;
            d.handler
                .deploy_runtime(&args.cluster_id, &args.namespace, &args.nodes)
                .await
                .map_err(platform_failure)?;
            Ok(Value::Null)
        }
    });

    let d = deps.clone();
    engine.register_activity("check_deployment_status", move |input| {
        let d = d.clone();
        async move {
            let args: NamespaceArgs = parse(input)?;
            let probe = d
                .handler
                .deployment_status(&args.cluster_id, &args.namespace)
                .await
                .map_err(platform_failure)?;
            let status = match probe.readiness {
                EndpointReadiness::Ready => DeploymentStatus::Ready,
                EndpointReadiness::Pending => DeploymentStatus::Pending,
                EndpointReadiness::IngressFailed => DeploymentStatus::IngressFailed,
                EndpointReadiness::EndpointsFailed => DeploymentStatus::EndpointsFailed,
            };
            d.store
                .update_deployment_status(
                    &args.cluster_id,
                    &args.namespace,
                    status,
                    now_secs(),
                    false,
                )
                .map_err(state_failure)?;
            encode(&probe)
        }
    });

    let d = deps.clone();
    engine.register_activity("run_benchmark", move |input| {
        let d = d.clone();
        async move {
            let args: TransferArgs = parse(input)?;
            let id = uuid::Uuid::new_v4().to_string();
            let mut row = Benchmark {
                id: id.clone(),
                cluster_id: args.cluster_id.clone(),
                namespace: args.namespace.clone(),
                status: BenchmarkStatus::Processing,
                result: None,
                created_at: now_secs(),
            };
            d.store.put_benchmark(&row).map_err(state_failure)?;
            match d
                .benchmark
                .run(&args.cluster_id, &args.namespace, &args.model)
                .await
            {
                Ok(result) => {
                    row.status = BenchmarkStatus::Success;
                    row.result = Some(result);
                    d.store.put_benchmark(&row).map_err(state_failure)?;
                    encode(&row)
                }
                Err(e) => {
                    row.status = BenchmarkStatus::Failed;
                    d.store.put_benchmark(&row).map_err(state_failure)?;
                    Err(ActivityFailure::Terminal(e.to_string()))
                }
            }
        }
    });

    let d = deps.clone();
    engine.register_activity("record_results", move |input| {
        let d = d.clone();
        async move {
            let args: NamespaceArgs = parse(input)?;
            let endpoints = d
                .handler
                .supported_endpoints(&args.cluster_id, &args.namespace)
                .await
                .map_err(platform_failure)?;
            Ok(json!({ "endpoints": endpoints }))
        }
    });

    let d = deps.clone();
    engine.register_activity("publish_notification", move |input| {
        let d = d.clone();
        async move {
            let args: PublishArgs = parse(input)?;
            d.publisher
                .publish(
                    args.topic.as_deref(),
                    Notification {
                        event: args.event,
                        status: args.status,
                        title: args.title,
                        message: args.message,
                        result: args.result,
                    },
                )
                .await;
            Ok(Value::Null)
        }
    });

    let d = deps.clone();
    engine.register_activity("cleanup_namespace", move |input| {
        let d = d.clone();
        async move {
            let args: NamespaceArgs = parse(input)?;
            d.handler
                .delete_namespace(&args.cluster_id, &args.namespace)
                .await
                .map_err(platform_failure)?;
            d.store
                .delete_deployment(&args.cluster_id, &args.namespace)
                .map_err(state_failure)?;
            d.store
                .delete_blob(&deploy_config_key(&args.namespace))
                .map_err(state_failure)?;
            info!(
                cluster = %args.cluster_id,
                namespace = %args.namespace,
                "namespace cleaned up"
            );
            Ok(Value::Null)
        }
    });

    engine.register_activity("current_time", |_input| async move {
        Ok(json!(now_secs() * 1000))
    });
}
