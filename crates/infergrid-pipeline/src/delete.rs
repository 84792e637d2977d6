//! The delete-deployment workflow.
//!
//! Small but durable: namespace teardown, the row cascade and the blob
//! cleanup all happen in one memoized activity, so a crash mid-delete
//! resumes instead of leaving a half-removed deployment.

use async_trait::async_trait;
use serde_json::json;

use infergrid_engine::{Outcome, RetryPolicy, Workflow, WorkflowCtx, WorkflowFailure};
use infergrid_notify::EventStatus;

pub struct DeleteDeployment;

#[async_trait]
impl Workflow for DeleteDeployment {
    async fn run(&self, ctx: &mut WorkflowCtx) -> Result<Outcome, WorkflowFailure> {
        let input = ctx.input().clone();
        let namespace = input["namespace"].as_str().unwrap_or("").to_string();
        let topic = input["target_topic"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| ctx.instance_id().to_string());

        ctx.call_activity_with(
            "publish_notification",
            json!({
                "topic": topic,
                "event": "delete_deployment",
                "status": EventStatus::Started,
                "title": format!("Deleting {namespace}"),
                "message": "",
                "result": null,
            }),
            &RetryPolicy::none(),
        )
        .await?;

        ctx.call_activity("cleanup_namespace", input.clone()).await?;

        ctx.call_activity_with(
            "publish_notification",
            json!({
                "topic": topic,
                "event": "delete_deployment",
                "status": EventStatus::Completed,
                "title": format!("Deleted {namespace}"),
                "message": "",
                "result": null,
            }),
            &RetryPolicy::none(),
        )
        .await?;

        Ok(Outcome::Completed(json!({ "deleted": namespace })))
    }
}
