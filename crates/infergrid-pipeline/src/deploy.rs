//! The deployment pipeline workflow.
//!
//! Six steps in fixed order, each announced with a recomputed ETA.
//! The terminated flag is checked before and after every
//! side-effecting step; whichever checkpoint sees it first deletes the
//! namespace this run created (add-worker runs never clean up, their
//! namespace pre-existed) and ends the instance as TERMINATED. Step
//! failures publish a FAILED notification and stop the pipeline;
//! individual activities have already retried per their policies.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use infergrid_core::{DeployType, ModelSpec, NodeSpec, classify_deploy_type};
use infergrid_engine::{Outcome, RetryPolicy, Workflow, WorkflowCtx, WorkflowFailure};
use infergrid_notify::EventStatus;
use infergrid_platform::{DeploymentProbe, EndpointReadiness};

use crate::eta;

/// Input document for a `deploy_pipeline` instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineInput {
    pub cluster_id: String,
    pub namespace: String,
    pub model: ModelSpec,
    pub nodes: Vec<NodeSpec>,
    /// Adding capacity to an existing deployment: merge the device
    /// list into the stored snapshot, skip namespace creation and any
    /// cleanup.
    #[serde(default)]
    pub add_worker: bool,
    /// Run a quantization job after the transfer completes.
    #[serde(default)]
    pub quantize: bool,
    /// Notification topic override; defaults to the instance id.
    #[serde(default)]
    pub target_topic: Option<String>,
    /// Display name for notification titles; defaults to the model name.
    #[serde(default)]
    pub target_name: Option<String>,
}

impl PipelineInput {
    fn display_name(&self) -> &str {
        self.target_name.as_deref().unwrap_or(&self.model.name)
    }
}

pub struct DeployPipeline;

impl DeployPipeline {
    async fn publish(
        &self,
        ctx: &mut WorkflowCtx,
        input: &PipelineInput,
        event: &str,
        status: EventStatus,
        title: &str,
        message: &str,
        result: Option<Value>,
    ) -> Result<(), WorkflowFailure> {
        let topic = input
            .target_topic
            .clone()
            .unwrap_or_else(|| ctx.instance_id().to_string());
        ctx.call_activity_with(
            "publish_notification",
            json!({
                "topic": topic,
                "event": event,
                "status": status,
                "title": title,
                "message": message,
                "result": result,
            }),
            &RetryPolicy::none(),
        )
        .await?;
        Ok(())
    }

    /// Announces a step with its freshly computed remaining ETA.
    async fn announce(
        &self,
        ctx: &mut WorkflowCtx,
        input: &PipelineInput,
        step: &str,
    ) -> Result<(), WorkflowFailure> {
        let device = eta::dominant_device(&input.nodes);
        let minutes = eta::estimate_minutes(step, input.model.size_params, device);
        self.publish(
            ctx,
            input,
            step,
            EventStatus::Running,
            &format!("Deploying {}", input.display_name()),
            "",
            Some(json!({ "eta_minutes": minutes, "step": step })),
        )
        .await
    }

    /// Cancellation checkpoint. When the flag is set this cleans up
    /// (at most once, because it immediately ends the instance) and
    /// finishes as TERMINATED.
    async fn cancel_checkpoint(
        &self,
        ctx: &mut WorkflowCtx,
        input: &PipelineInput,
        namespace_created: bool,
    ) -> Result<(), WorkflowFailure> {
        if !ctx.is_terminated() {
            return Ok(());
        }
        if namespace_created && !input.add_worker {
            ctx.call_activity(
                "cleanup_namespace",
                json!({ "cluster_id": input.cluster_id, "namespace": input.namespace }),
            )
            .await?;
        }
        self.publish(
            ctx,
            input,
            "deployment_cancelled",
            EventStatus::Failed,
            &format!("Deployment of {} cancelled", input.display_name()),
            "deployment cancelled by request",
            None,
        )
        .await?;
        Err(WorkflowFailure::Terminated)
    }

    /// Publishes the step failure and converts it into the pipeline's
    /// terminal error.
    async fn fail_step(
        &self,
        ctx: &mut WorkflowCtx,
        input: &PipelineInput,
        step: &str,
        error: WorkflowFailure,
    ) -> WorkflowFailure {
        if matches!(error, WorkflowFailure::Terminated) {
            return error;
        }
        let message = error.to_string();
        if let Err(publish_err) = self
            .publish(
                ctx,
                input,
                step,
                EventStatus::Failed,
                &format!("Deployment of {} failed", input.display_name()),
                &message,
                None,
            )
            .await
        {
            return publish_err;
        }
        WorkflowFailure::Failed(format!("{step}: {message}"))
    }

    /// Runs a poller child; on failure the namespace this run created
    /// is torn down before the error surfaces.
    async fn run_poller(
        &self,
        ctx: &mut WorkflowCtx,
        input: &PipelineInput,
        poller: &str,
        namespace_created: bool,
    ) -> Result<(), WorkflowFailure> {
        let args = json!({ "cluster_id": input.cluster_id, "namespace": input.namespace });
        match ctx.call_child(poller, args).await {
            Ok(_) => Ok(()),
            Err(e) => {
                if ctx.is_terminated() {
                    self.cancel_checkpoint(ctx, input, namespace_created).await?;
                    return Err(WorkflowFailure::Terminated);
                }
                if namespace_created && !input.add_worker {
                    ctx.call_activity(
                        "cleanup_namespace",
                        json!({ "cluster_id": input.cluster_id, "namespace": input.namespace }),
                    )
                    .await?;
                }
                Err(e)
            }
        }
    }
}

#[async_trait]
impl Workflow for DeployPipeline {
    async fn run(&self, ctx: &mut WorkflowCtx) -> Result<Outcome, WorkflowFailure> {
        let input: PipelineInput = serde_json::from_value(ctx.input().clone())
            .map_err(|e| WorkflowFailure::Failed(format!("invalid pipeline input: {e}")))?;
        let namespace_args =
            json!({ "cluster_id": input.cluster_id, "namespace": input.namespace });
        let deploy_type = classify_deploy_type(
            input.model.provider.as_deref(),
            input.model.credential_id.as_deref(),
        );
        let mut namespace_created = false;

        // Step 1: verify the cluster answers at all.
        let step = "verify_cluster_connection";
        self.announce(ctx, &input, step).await?;
        self.cancel_checkpoint(ctx, &input, namespace_created).await?;
        let connect_policy = RetryPolicy::default()
            .with_max_attempts(5)
            .with_overall_timeout(Duration::from_secs(300));
        if let Err(e) = ctx
            .call_activity_with(step, json!({ "cluster_id": input.cluster_id }), &connect_policy)
            .await
        {
            return Err(self.fail_step(ctx, &input, step, e).await);
        }
        self.cancel_checkpoint(ctx, &input, namespace_created).await?;

        // Step 2: namespace, deployment row, config snapshot, transfer.
        let step = "transfer_model_to_cluster";
        self.announce(ctx, &input, step).await?;
        self.cancel_checkpoint(ctx, &input, namespace_created).await?;
        if !input.add_worker {
            if let Err(e) = ctx
                .call_activity("setup_namespace", namespace_args.clone())
                .await
            {
                return Err(self.fail_step(ctx, &input, step, e).await);
            }
            namespace_created = true;
        }
        self.cancel_checkpoint(ctx, &input, namespace_created).await?;
        if let Err(e) = ctx
            .call_activity("create_deployment_row", namespace_args.clone())
            .await
        {
            return Err(self.fail_step(ctx, &input, step, e).await);
        }
        let merged = match ctx
            .call_activity(
                "merge_deploy_config",
                json!({
                    "namespace": input.namespace,
                    "nodes": input.nodes,
                    "add_worker": input.add_worker,
                }),
            )
            .await
        {
            Ok(snapshot) => snapshot,
            Err(e) => return Err(self.fail_step(ctx, &input, step, e).await),
        };
        if deploy_type == DeployType::Local {
            if let Err(e) = ctx
                .call_activity(
                    "transfer_model",
                    json!({
                        "cluster_id": input.cluster_id,
                        "namespace": input.namespace,
                        "model": input.model,
                    }),
                )
                .await
            {
                return Err(self.fail_step(ctx, &input, step, e).await);
            }
            self.cancel_checkpoint(ctx, &input, namespace_created).await?;
            if let Err(e) = self
                .run_poller(ctx, &input, "transfer_poller", namespace_created)
                .await
            {
                return Err(self.fail_step(ctx, &input, step, e).await);
            }
        }
        if input.quantize {
            if let Err(e) = ctx
                .call_activity(
                    "start_quantization",
                    json!({
                        "cluster_id": input.cluster_id,
                        "namespace": input.namespace,
                        "model": input.model,
                    }),
                )
                .await
            {
                return Err(self.fail_step(ctx, &input, step, e).await);
            }
            if let Err(e) = self
                .run_poller(ctx, &input, "quantization_poller", namespace_created)
                .await
            {
                return Err(self.fail_step(ctx, &input, step, e).await);
            }
        }
        self.cancel_checkpoint(ctx, &input, namespace_created).await?;

        // Step 3: roll out the runtime per node/device.
        let step = "deploy_to_engine";
        self.announce(ctx, &input, step).await?;
        self.cancel_checkpoint(ctx, &input, namespace_created).await?;
        if let Err(e) = ctx
            .call_activity(
                "deploy_runtime",
                json!({
                    "cluster_id": input.cluster_id,
                    "namespace": input.namespace,
                    "nodes": merged,
                }),
            )
            .await
        {
            return Err(self.fail_step(ctx, &input, step, e).await);
        }
        self.cancel_checkpoint(ctx, &input, namespace_created).await?;

        // Step 4: serving readiness.
        let step = "verify_deployment_status";
        self.announce(ctx, &input, step).await?;
        self.cancel_checkpoint(ctx, &input, namespace_created).await?;
        let probe: DeploymentProbe = match ctx
            .call_activity("check_deployment_status", namespace_args.clone())
            .await
        {
            Ok(value) => serde_json::from_value(value)
                .map_err(|e| WorkflowFailure::Failed(format!("unreadable probe: {e}")))?,
            Err(e) => return Err(self.fail_step(ctx, &input, step, e).await),
        };
        if probe.readiness != EndpointReadiness::Ready {
            let reason = match probe.readiness {
                EndpointReadiness::IngressFailed => "ingress was never admitted",
                EndpointReadiness::EndpointsFailed => "endpoints never populated",
                _ => "deployment did not become ready",
            };
            let e = WorkflowFailure::Failed(reason.to_string());
            return Err(self.fail_step(ctx, &input, step, e).await);
        }
        self.cancel_checkpoint(ctx, &input, namespace_created).await?;

        // Step 5: performance benchmark.
        let step = "run_performance_benchmark";
        self.announce(ctx, &input, step).await?;
        self.cancel_checkpoint(ctx, &input, namespace_created).await?;
        let benchmark = match ctx
            .call_activity(
                "run_benchmark",
                json!({
                    "cluster_id": input.cluster_id,
                    "namespace": input.namespace,
                    "model": input.model,
                }),
            )
            .await
        {
            Ok(row) => row,
            Err(e) => return Err(self.fail_step(ctx, &input, step, e).await),
        };
        self.cancel_checkpoint(ctx, &input, namespace_created).await?;

        // Step 6: results.
        let step = "results";
        self.announce(ctx, &input, step).await?;
        let results = match ctx
            .call_activity("record_results", namespace_args.clone())
            .await
        {
            Ok(value) => value,
            Err(e) => return Err(self.fail_step(ctx, &input, step, e).await),
        };
        let output = json!({
            "cluster_id": input.cluster_id,
            "namespace": input.namespace,
            "endpoints": results["endpoints"],
            "benchmark": benchmark["result"],
        });
        self.publish(
            ctx,
            &input,
            "results",
            EventStatus::Completed,
            &format!("{} deployed", input.display_name()),
            "",
            Some(output.clone()),
        )
        .await?;
        Ok(Outcome::Completed(output))
    }
}
