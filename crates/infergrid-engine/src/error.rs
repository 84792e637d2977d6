//! Engine error taxonomy.
//!
//! Three layers with different audiences: [`ActivityFailure`] is what
//! activity code returns (retryable or terminal), [`ActivityError`] is
//! the serializable record of an exhausted call as stored in history,
//! and [`WorkflowFailure`] is what a workflow run ends with.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Returned by activity implementations.
#[derive(Debug, Error)]
pub enum ActivityFailure {
    /// Transient; the engine retries per the call's policy.
    #[error("{0}")]
    Retryable(String),
    /// No retry could succeed; fails the call immediately.
    #[error("{0}")]
    Terminal(String),
}

/// Final error of an activity call, as memoized in history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{message}")]
pub struct ActivityError {
    pub message: String,
    /// Whether the failure was still retryable when attempts ran out.
    pub retryable: bool,
    pub attempts: u32,
}

/// Terminal outcome of a workflow run.
#[derive(Debug, Error)]
pub enum WorkflowFailure {
    #[error("activity {name} failed: {error}")]
    Activity {
        name: String,
        #[source]
        error: ActivityError,
    },
    /// The instance was cancelled and has finished its cleanup.
    #[error("workflow terminated")]
    Terminated,
    #[error("{0}")]
    Failed(String),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Infrastructure errors (storage, registration, serialization).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("state store error: {0}")]
    State(#[from] infergrid_state::StateError),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("no workflow registered as {0}")]
    UnknownWorkflow(String),
    #[error("no activity registered as {0}")]
    UnknownActivity(String),
    #[error("instance {0} already exists")]
    DuplicateInstance(String),
    #[error("instance {0} not found")]
    InstanceNotFound(String),
    /// Replay found a history event that does not match the step the
    /// workflow is executing. The workflow code is non-deterministic
    /// or changed incompatibly under a live instance.
    #[error("history divergence at step {step}: expected {expected}, recorded {recorded}")]
    HistoryDivergence {
        step: usize,
        expected: String,
        recorded: String,
    },
}
