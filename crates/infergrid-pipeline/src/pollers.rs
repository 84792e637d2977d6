//! Status pollers for long-running cluster jobs.
//!
//! A poller is a child workflow that races a completion event against
//! a poll timer, checks the job status when the timer wins, and hops
//! through continue-as-new to keep its history bounded. The overall
//! deadline is enforced against `workflow_start_time`, which survives
//! the hops.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use infergrid_core::config::PipelineSettings;
use infergrid_engine::{Outcome, Workflow, WorkflowCtx, WorkflowFailure};
use infergrid_platform::{JobStatus, TransferStatus};

/// Poll iterations per continue-as-new hop.
const HOP_ITERATIONS: u32 = 20;

pub(crate) enum PollVerdict {
    Done,
    Pending,
    Failed(String),
}

fn classify_transfer(value: &Value) -> PollVerdict {
    match serde_json::from_value::<TransferStatus>(value.clone()) {
        Ok(TransferStatus::Completed) => PollVerdict::Done,
        Ok(TransferStatus::InProgress { .. }) => PollVerdict::Pending,
        Ok(TransferStatus::Failed { message }) => PollVerdict::Failed(message),
        Err(e) => PollVerdict::Failed(format!("unreadable transfer status: {e}")),
    }
}

fn classify_quantization(value: &Value) -> PollVerdict {
    match serde_json::from_value::<JobStatus>(value.clone()) {
        Ok(JobStatus::Succeeded) => PollVerdict::Done,
        Ok(JobStatus::Running) => PollVerdict::Pending,
        Ok(JobStatus::Failed { message }) => PollVerdict::Failed(message),
        Err(e) => PollVerdict::Failed(format!("unreadable job status: {e}")),
    }
}

/// One poller definition; instantiated for transfers and quantization.
pub struct Poller {
    job: &'static str,
    check_activity: &'static str,
    event_name: &'static str,
    poll_interval: Duration,
    deadline: Duration,
    classify: fn(&Value) -> PollVerdict,
}

impl Poller {
    /// Model transfer: 24 hour budget by default.
    pub fn transfer(settings: &PipelineSettings) -> Self {
        Self {
            job: "model transfer",
            check_activity: "check_transfer_status",
            event_name: "transfer_completed",
            poll_interval: Duration::from_secs(settings.poll_interval_secs),
            deadline: Duration::from_secs(settings.transfer_deadline_hours * 3600),
            classify: classify_transfer,
        }
    }

    /// Quantization job: 5 hour budget by default.
    pub fn quantization(settings: &PipelineSettings) -> Self {
        Self {
            job: "quantization",
            check_activity: "check_quantization_status",
            event_name: "quantization_completed",
            poll_interval: Duration::from_secs(settings.poll_interval_secs),
            deadline: Duration::from_secs(settings.quantization_deadline_hours * 3600),
            classify: classify_quantization,
        }
    }
}

#[async_trait]
impl Workflow for Poller {
    async fn run(&self, ctx: &mut WorkflowCtx) -> Result<Outcome, WorkflowFailure> {
        let args = ctx.input().clone();
        for _ in 0..HOP_ITERATIONS {
            if ctx.is_terminated() {
                return Err(WorkflowFailure::Terminated);
            }
            // The completion event short-circuits the poll timer.
            if ctx
                .wait_event(self.event_name, self.poll_interval)
                .await?
                .is_some()
            {
                return Ok(Outcome::Completed(Value::String("completed".to_string())));
            }
            if ctx.is_terminated() {
                return Err(WorkflowFailure::Terminated);
            }
            let status = ctx.call_activity(self.check_activity, args.clone()).await?;
            match (self.classify)(&status) {
                PollVerdict::Done => {
                    return Ok(Outcome::Completed(Value::String("completed".to_string())));
                }
                PollVerdict::Failed(message) => {
                    return Err(WorkflowFailure::Failed(format!(
                        "{} failed: {message}",
                        self.job
                    )));
                }
                PollVerdict::Pending => {}
            }
        }

        // Wall clock through an activity keeps replay deterministic.
        let now_ms = ctx
            .call_activity("current_time", Value::Null)
            .await?
            .as_u64()
            .unwrap_or(0);
        let elapsed = Duration::from_millis(now_ms.saturating_sub(ctx.workflow_start_time()));
        if elapsed >= self.deadline {
            return Err(WorkflowFailure::Failed(format!(
                "{} deadline of {:?} exceeded",
                self.job, self.deadline
            )));
        }
        Ok(Outcome::ContinueAsNew(args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn transfer_statuses_classify_correctly() {
        assert!(matches!(
            classify_transfer(&json!({"state": "completed"})),
            PollVerdict::Done
        ));
        assert!(matches!(
            classify_transfer(&json!({"state": "in_progress", "percent": 40.0})),
            PollVerdict::Pending
        ));
        match classify_transfer(&json!({"state": "failed", "message": "disk full"})) {
            PollVerdict::Failed(message) => assert_eq!(message, "disk full"),
            _ => panic!("expected failure verdict"),
        }
    }

    #[test]
    fn quantization_statuses_classify_correctly() {
        assert!(matches!(
            classify_quantization(&json!({"state": "succeeded"})),
            PollVerdict::Done
        ));
        assert!(matches!(
            classify_quantization(&json!({"state": "running"})),
            PollVerdict::Pending
        ));
    }
}
