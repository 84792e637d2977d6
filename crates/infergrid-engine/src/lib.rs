//! infergrid-engine — a durable, replay-safe workflow engine.
//!
//! Workflows are deterministic async functions over a [`WorkflowCtx`].
//! Every effectful step (activity call, timer, external event, child
//! workflow) is memoized into a persisted history; when an instance is
//! re-run after a crash, completed steps replay from history without
//! re-executing their side effects, and execution resumes at the first
//! unrecorded step. Activities carry retry policies; workflows can
//! loop forever via continue-as-new without unbounded history growth.
//!
//! Cancellation is cooperative: terminate sets a flag the workflow
//! polls between steps, giving it the chance to run compensating
//! cleanup before it finishes with `Terminated` status.

pub mod context;
pub mod engine;
pub mod error;
pub mod history;
pub mod policy;

pub use context::{Outcome, Workflow, WorkflowCtx};
pub use engine::{Engine, WorkflowState, WorkflowStatus};
pub use error::{ActivityError, ActivityFailure, EngineError, WorkflowFailure};
pub use history::HistoryEvent;
pub use policy::RetryPolicy;
