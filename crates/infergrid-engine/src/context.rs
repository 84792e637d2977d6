//! The workflow execution context.
//!
//! Workflow code only touches side effects through this type, which
//! gives every effectful step memoized, replay-safe semantics: on a
//! fresh run the step executes and its outcome is appended to the
//! persisted history; on replay the recorded outcome is returned
//! without re-executing anything. The cursor advances positionally,
//! so workflow code must take the same steps in the same order given
//! the same input and history.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::engine::{EngineInner, EventMsg};
use crate::error::{ActivityError, ActivityFailure, EngineError, WorkflowFailure};
use crate::history::HistoryEvent;
use crate::policy::RetryPolicy;

/// How a workflow run ends when it does not fail.
#[derive(Debug)]
pub enum Outcome {
    Completed(Value),
    /// Restart the instance with fresh history and this input. The
    /// workflow start time is preserved across the hop.
    ContinueAsNew(Value),
}

/// A deterministic workflow definition, registered by name.
#[async_trait]
pub trait Workflow: Send + Sync {
    async fn run(&self, ctx: &mut WorkflowCtx) -> Result<Outcome, WorkflowFailure>;
}

pub struct WorkflowCtx {
    pub(crate) engine: Arc<EngineInner>,
    pub(crate) instance_id: String,
    pub(crate) input: Value,
    pub(crate) started_at_ms: u64,
    pub(crate) history: Vec<HistoryEvent>,
    pub(crate) cursor: usize,
    pub(crate) events_rx: mpsc::UnboundedReceiver<EventMsg>,
    pub(crate) pending_events: Vec<EventMsg>,
    pub(crate) terminated: watch::Receiver<bool>,
}

impl WorkflowCtx {
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn input(&self) -> &Value {
        &self.input
    }

    /// Epoch millis of the first run of this instance. Survives
    /// continue-as-new, which is what makes wall-clock deadlines
    /// (e.g. "give up after 24 hours") enforceable from workflow code.
    pub fn workflow_start_time(&self) -> u64 {
        self.started_at_ms
    }

    /// Whether the current step is being replayed from history.
    pub fn is_replaying(&self) -> bool {
        self.cursor < self.history.len()
    }

    /// Cooperative cancellation flag. Workflow code is expected to
    /// check this between side effects and run its cleanup path.
    pub fn is_terminated(&self) -> bool {
        *self.terminated.borrow()
    }

    /// Pops the next recorded event if we are replaying, verifying it
    /// matches the step the workflow is about to take.
    fn replay_next(&mut self, expected: &str) -> Result<Option<HistoryEvent>, WorkflowFailure> {
        if self.cursor >= self.history.len() {
            return Ok(None);
        }
        let event = self.history[self.cursor].clone();
        let recorded = event.kind();
        if recorded != expected {
            return Err(WorkflowFailure::Engine(EngineError::HistoryDivergence {
                step: self.cursor,
                expected: expected.to_string(),
                recorded,
            }));
        }
        self.cursor += 1;
        Ok(Some(event))
    }

    fn record(&mut self, event: HistoryEvent) -> Result<(), WorkflowFailure> {
        self.history.push(event);
        self.cursor = self.history.len();
        self.engine
            .persist_history(&self.instance_id, &self.history)
            .map_err(WorkflowFailure::Engine)
    }

    /// Calls an activity with the default retry policy.
    pub async fn call_activity(&mut self, name: &str, input: Value) -> Result<Value, WorkflowFailure> {
        self.call_activity_with(name, input, &RetryPolicy::default())
            .await
    }

    /// Calls an activity, retrying per `policy`. The final outcome,
    /// success or exhausted error, is memoized; retries themselves are
    /// not history events.
    pub async fn call_activity_with(
        &mut self,
        name: &str,
        input: Value,
        policy: &RetryPolicy,
    ) -> Result<Value, WorkflowFailure> {
        let expected = format!("activity:{name}");
        if let Some(HistoryEvent::Activity { outcome, .. }) = self.replay_next(&expected)? {
            return outcome.map_err(|error| WorkflowFailure::Activity {
                name: name.to_string(),
                error,
            });
        }

        let func = self
            .engine
            .activity(name)
            .map_err(WorkflowFailure::Engine)?;
        let started = Instant::now();
        let mut attempt = 0u32;
        let outcome: Result<Value, ActivityError> = loop {
            attempt += 1;
            match func(input.clone()).await {
                Ok(value) => break Ok(value),
                Err(ActivityFailure::Terminal(message)) => {
                    break Err(ActivityError {
                        message,
                        retryable: false,
                        attempts: attempt,
                    });
                }
                Err(ActivityFailure::Retryable(message)) => {
                    let out_of_attempts = attempt >= policy.max_attempts;
                    let out_of_budget = policy
                        .overall_timeout
                        .is_some_and(|t| started.elapsed() >= t);
                    if out_of_attempts || out_of_budget {
                        break Err(ActivityError {
                            message,
                            retryable: true,
                            attempts: attempt,
                        });
                    }
                    let delay = policy.delay_for(attempt);
                    warn!(
                        instance = %self.instance_id,
                        activity = name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "activity failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        };

        self.record(HistoryEvent::Activity {
            name: name.to_string(),
            outcome: outcome.clone(),
        })?;
        outcome.map_err(|error| WorkflowFailure::Activity {
            name: name.to_string(),
            error,
        })
    }

    /// Durable timer. Replays instantly; a live timer is cut short by
    /// termination so the workflow can get to its cleanup path.
    pub async fn schedule_timer(&mut self, duration: Duration) -> Result<(), WorkflowFailure> {
        if self.replay_next("timer")?.is_some() {
            return Ok(());
        }
        let mut terminated = self.terminated.clone();
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = wait_for_termination(&mut terminated) => {
                debug!(instance = %self.instance_id, "timer interrupted by termination");
            }
        }
        self.record(HistoryEvent::Timer {
            millis: duration.as_millis() as u64,
        })
    }

    /// Waits for a named external event, racing it against a timer.
    /// `Ok(Some(payload))` when the event wins, `Ok(None)` when the
    /// timer does. Events with other names arriving meanwhile are
    /// buffered for later waits. Termination also ends the wait.
    pub async fn wait_event(
        &mut self,
        name: &str,
        timeout: Duration,
    ) -> Result<Option<Value>, WorkflowFailure> {
        let expected = format!("event:{name}");
        if let Some(HistoryEvent::Event {
            received, payload, ..
        }) = self.replay_next(&expected)?
        {
            return Ok(if received {
                Some(payload.unwrap_or(Value::Null))
            } else {
                None
            });
        }

        // An event may have arrived while we were doing other steps.
        if let Some(pos) = self.pending_events.iter().position(|e| e.name == name) {
            let msg = self.pending_events.remove(pos);
            return self.finish_event_wait(name, true, msg.payload);
        }

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        let mut terminated = self.terminated.clone();
        loop {
            tokio::select! {
                _ = &mut deadline => {
                    return self.finish_event_wait(name, false, None);
                }
                _ = wait_for_termination(&mut terminated) => {
                    return self.finish_event_wait(name, false, None);
                }
                msg = self.events_rx.recv() => match msg {
                    Some(msg) if msg.name == name => {
                        return self.finish_event_wait(name, true, msg.payload);
                    }
                    Some(msg) => self.pending_events.push(msg),
                    // Sender gone: only the timer can end the wait now.
                    None => {
                        tokio::select! {
                            _ = &mut deadline => {}
                            _ = wait_for_termination(&mut terminated) => {}
                        }
                        return self.finish_event_wait(name, false, None);
                    }
                },
            }
        }
    }

    fn finish_event_wait(
        &mut self,
        name: &str,
        received: bool,
        payload: Option<Value>,
    ) -> Result<Option<Value>, WorkflowFailure> {
        if received {
            self.engine
                .consume_event(&self.instance_id, name)
                .map_err(WorkflowFailure::Engine)?;
        }
        self.record(HistoryEvent::Event {
            name: name.to_string(),
            received,
            payload: payload.clone(),
        })?;
        Ok(if received {
            Some(payload.unwrap_or(Value::Null))
        } else {
            None
        })
    }

    /// Runs a child workflow to completion and memoizes its outcome.
    /// The child id is derived from the parent id and step position,
    /// so replay lines up with the original execution.
    pub async fn call_child(
        &mut self,
        workflow: &str,
        input: Value,
    ) -> Result<Value, WorkflowFailure> {
        let expected = format!("child:{workflow}");
        if let Some(HistoryEvent::Child { outcome, .. }) = self.replay_next(&expected)? {
            return outcome.map_err(WorkflowFailure::Failed);
        }

        let child_id = format!("{}:{}", self.instance_id, self.cursor);
        let engine = self.engine.clone();
        let result = engine
            .run_child(
                workflow,
                &child_id,
                input.clone(),
                self.terminated.clone(),
            )
            .await;
        let outcome: Result<Value, String> = match result {
            Ok(value) => Ok(value),
            Err(e) => Err(e.to_string()),
        };
        self.record(HistoryEvent::Child {
            workflow: workflow.to_string(),
            instance_id: child_id,
            outcome: outcome.clone(),
        })?;
        outcome.map_err(WorkflowFailure::Failed)
    }
}

/// Resolves once the termination flag flips to true.
pub(crate) async fn wait_for_termination(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender dropped without terminating; never resolve.
            std::future::pending::<()>().await;
        }
    }
}
