//! Engine runtime: registration, scheduling, event routing, recovery.
//!
//! Instance state lives in three store blobs keyed by instance id:
//! a status record (survives completion, queryable), the step history
//! (deleted on finalize), and a buffer of raised-but-unconsumed
//! events. Recovery scans for RUNNING status records and re-runs the
//! instances; replay over the persisted history makes that safe.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use infergrid_state::StateStore;

use crate::context::{Outcome, Workflow, WorkflowCtx};
use crate::error::{ActivityFailure, EngineError, WorkflowFailure};
use crate::history::HistoryEvent;

/// Blob key prefix for instance status records.
pub const STATUS_PREFIX: &str = "wf_status_";
const HISTORY_PREFIX: &str = "wf_history_";
const EVENTS_PREFIX: &str = "wf_events_";

fn status_key(id: &str) -> String {
    format!("{STATUS_PREFIX}{id}")
}

fn history_key(id: &str) -> String {
    format!("{HISTORY_PREFIX}{id}")
}

fn events_key(id: &str) -> String {
    format!("{EVENTS_PREFIX}{id}")
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    Running,
    Completed,
    Failed,
    Terminated,
}

impl WorkflowStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WorkflowStatus::Running)
    }
}

/// Queryable status record of a workflow instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub instance_id: String,
    pub workflow: String,
    pub status: WorkflowStatus,
    pub input: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at_ms: u64,
    pub updated_at_ms: u64,
}

/// An event raised against an instance, buffered until consumed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct EventMsg {
    pub name: String,
    pub payload: Option<Value>,
}

type ActivityFn =
    Arc<dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<Value, ActivityFailure>> + Send>> + Send + Sync>;

struct InstanceHandle {
    event_tx: mpsc::UnboundedSender<EventMsg>,
    terminate: Arc<watch::Sender<bool>>,
    join: Option<JoinHandle<()>>,
}

pub(crate) struct EngineInner {
    store: StateStore,
    activities: RwLock<HashMap<String, ActivityFn>>,
    workflows: RwLock<HashMap<String, Arc<dyn Workflow>>>,
    running: Mutex<HashMap<String, InstanceHandle>>,
}

impl EngineInner {
    fn lock_running(&self) -> std::sync::MutexGuard<'_, HashMap<String, InstanceHandle>> {
        match self.running.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub(crate) fn activity(&self, name: &str) -> Result<ActivityFn, EngineError> {
        let activities = match self.activities.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        activities
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownActivity(name.to_string()))
    }

    fn workflow(&self, name: &str) -> Result<Arc<dyn Workflow>, EngineError> {
        let workflows = match self.workflows.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        workflows
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownWorkflow(name.to_string()))
    }

    pub(crate) fn persist_history(
        &self,
        instance_id: &str,
        history: &[HistoryEvent],
    ) -> Result<(), EngineError> {
        let value = serde_json::to_value(history)?;
        self.store.save_blob(&history_key(instance_id), &value)?;
        Ok(())
    }

    fn load_history(&self, instance_id: &str) -> Result<Vec<HistoryEvent>, EngineError> {
        match self.store.get_blob(&history_key(instance_id))? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(Vec::new()),
        }
    }

    fn persist_state(&self, state: &WorkflowState) -> Result<(), EngineError> {
        let value = serde_json::to_value(state)?;
        self.store.save_blob(&status_key(&state.instance_id), &value)?;
        Ok(())
    }

    fn load_state(&self, instance_id: &str) -> Result<Option<WorkflowState>, EngineError> {
        match self.store.get_blob(&status_key(instance_id))? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    fn load_events(&self, instance_id: &str) -> Result<Vec<EventMsg>, EngineError> {
        match self.store.get_blob(&events_key(instance_id))? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(Vec::new()),
        }
    }

    fn append_event(&self, instance_id: &str, msg: &EventMsg) -> Result<(), EngineError> {
        let mut events = self.load_events(instance_id)?;
        events.push(msg.clone());
        let value = serde_json::to_value(&events)?;
        self.store.save_blob(&events_key(instance_id), &value)?;
        Ok(())
    }

    /// Drops the first buffered event with the given name. Called when
    /// a wait consumes it, so recovery does not re-deliver.
    pub(crate) fn consume_event(&self, instance_id: &str, name: &str) -> Result<(), EngineError> {
        let mut events = self.load_events(instance_id)?;
        if let Some(pos) = events.iter().position(|e| e.name == name) {
            events.remove(pos);
            let value = serde_json::to_value(&events)?;
            self.store.save_blob(&events_key(instance_id), &value)?;
        }
        Ok(())
    }

    fn finalize(
        &self,
        instance_id: &str,
        status: WorkflowStatus,
        output: Option<Value>,
        error_text: Option<String>,
    ) {
        match self.load_state(instance_id) {
            Ok(Some(mut state)) => {
                state.status = status;
                state.output = output;
                state.error = error_text;
                state.updated_at_ms = now_ms();
                if let Err(e) = self.persist_state(&state) {
                    error!(instance = instance_id, error = %e, "failed to persist final state");
                }
            }
            Ok(None) => error!(instance = instance_id, "finalizing instance with no state"),
            Err(e) => error!(instance = instance_id, error = %e, "failed to load state for finalize"),
        }
        let _ = self.store.delete_blob(&history_key(instance_id));
        let _ = self.store.delete_blob(&events_key(instance_id));
        self.lock_running().remove(instance_id);
    }

    /// Runs an instance to its terminal state, looping on
    /// continue-as-new. Boxed because child workflows recurse into it.
    fn run_instance(
        self: Arc<Self>,
        workflow_name: String,
        instance_id: String,
        mut input: Value,
        started_at_ms: u64,
        terminated: watch::Receiver<bool>,
        mut events_rx: mpsc::UnboundedReceiver<EventMsg>,
    ) -> Pin<Box<dyn Future<Output = Result<Value, WorkflowFailure>> + Send>> {
        Box::pin(async move {
            let mut pending_events = Vec::new();
            loop {
                let definition = match self.workflow(&workflow_name) {
                    Ok(wf) => wf,
                    Err(e) => {
                        self.finalize(&instance_id, WorkflowStatus::Failed, None, Some(e.to_string()));
                        return Err(WorkflowFailure::Engine(e));
                    }
                };
                let history = match self.load_history(&instance_id) {
                    Ok(history) => history,
                    Err(e) => {
                        self.finalize(&instance_id, WorkflowStatus::Failed, None, Some(e.to_string()));
                        return Err(WorkflowFailure::Engine(e));
                    }
                };
                if !history.is_empty() {
                    debug!(instance = %instance_id, steps = history.len(), "replaying history");
                }

                let mut ctx = WorkflowCtx {
                    engine: self.clone(),
                    instance_id: instance_id.clone(),
                    input: input.clone(),
                    started_at_ms,
                    history,
                    cursor: 0,
                    events_rx,
                    pending_events,
                    terminated: terminated.clone(),
                };
                let result = definition.run(&mut ctx).await;
                let was_terminated = ctx.is_terminated();
                events_rx = ctx.events_rx;
                pending_events = ctx.pending_events;

                match result {
                    Ok(Outcome::Completed(output)) => {
                        let status = if was_terminated {
                            WorkflowStatus::Terminated
                        } else {
                            WorkflowStatus::Completed
                        };
                        self.finalize(&instance_id, status, Some(output.clone()), None);
                        return Ok(output);
                    }
                    Ok(Outcome::ContinueAsNew(next_input)) => {
                        if let Err(e) = self.store.delete_blob(&history_key(&instance_id)) {
                            self.finalize(
                                &instance_id,
                                WorkflowStatus::Failed,
                                None,
                                Some(e.to_string()),
                            );
                            return Err(WorkflowFailure::Engine(e.into()));
                        }
                        if let Ok(Some(mut state)) = self.load_state(&instance_id) {
                            state.input = next_input.clone();
                            state.updated_at_ms = now_ms();
                            if let Err(e) = self.persist_state(&state) {
                                error!(instance = %instance_id, error = %e, "continue-as-new persist failed");
                            }
                        }
                        debug!(instance = %instance_id, "continuing as new");
                        input = next_input;
                    }
                    Err(WorkflowFailure::Terminated) => {
                        self.finalize(&instance_id, WorkflowStatus::Terminated, None, None);
                        return Err(WorkflowFailure::Terminated);
                    }
                    Err(e) => {
                        self.finalize(&instance_id, WorkflowStatus::Failed, None, Some(e.to_string()));
                        return Err(e);
                    }
                }
            }
        })
    }

    /// Runs a child workflow inline, sharing the parent's termination
    /// flag so cancelling the parent cancels the whole tree.
    pub(crate) async fn run_child(
        self: &Arc<Self>,
        workflow: &str,
        child_id: &str,
        input: Value,
        terminated: watch::Receiver<bool>,
    ) -> Result<Value, WorkflowFailure> {
        // A child finished before a parent crash replays from its
        // final status record rather than re-running.
        if let Some(state) = self.load_state(child_id)? {
            if state.status.is_terminal() {
                return match state.status {
                    WorkflowStatus::Completed => Ok(state.output.unwrap_or(Value::Null)),
                    WorkflowStatus::Terminated => Err(WorkflowFailure::Terminated),
                    _ => Err(WorkflowFailure::Failed(
                        state.error.unwrap_or_else(|| "child failed".to_string()),
                    )),
                };
            }
            // RUNNING from a previous run: resume over its history.
            let (event_tx, events_rx) = mpsc::unbounded_channel();
            for msg in self.load_events(child_id)? {
                let _ = event_tx.send(msg);
            }
            let child_flag = self.register_handle(child_id, event_tx, &terminated);
            return self
                .clone()
                .run_instance(
                    state.workflow,
                    child_id.to_string(),
                    state.input,
                    state.started_at_ms,
                    child_flag,
                    events_rx,
                )
                .await;
        }

        let state = WorkflowState {
            instance_id: child_id.to_string(),
            workflow: workflow.to_string(),
            status: WorkflowStatus::Running,
            input: input.clone(),
            output: None,
            error: None,
            started_at_ms: now_ms(),
            updated_at_ms: now_ms(),
        };
        self.persist_state(&state)?;
        let (event_tx, events_rx) = mpsc::unbounded_channel();
        let child_flag = self.register_handle(child_id, event_tx, &terminated);
        self.clone()
            .run_instance(
                workflow.to_string(),
                child_id.to_string(),
                input,
                state.started_at_ms,
                child_flag,
                events_rx,
            )
            .await
    }

    /// Registers an event-routing handle for a child, which runs
    /// inline in the parent task and so carries no join handle. The
    /// returned flag is the child's own termination channel, kept in
    /// sync with the parent's so cancelling the parent cancels the
    /// whole tree while the child stays addressable by id.
    fn register_handle(
        &self,
        instance_id: &str,
        event_tx: mpsc::UnboundedSender<EventMsg>,
        parent_flag: &watch::Receiver<bool>,
    ) -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(*parent_flag.borrow());
        let tx = Arc::new(tx);
        let mut parent = parent_flag.clone();
        let follower = tx.clone();
        tokio::spawn(async move {
            loop {
                if *parent.borrow() {
                    let _ = follower.send(true);
                    return;
                }
                if parent.changed().await.is_err() {
                    return;
                }
            }
        });
        self.lock_running().insert(
            instance_id.to_string(),
            InstanceHandle {
                event_tx,
                terminate: tx,
                join: None,
            },
        );
        rx
    }
}

/// The durable workflow engine. Cheap to clone via internal Arc.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub fn new(store: StateStore) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                store,
                activities: RwLock::new(HashMap::new()),
                workflows: RwLock::new(HashMap::new()),
                running: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn register_activity<F, Fut>(&self, name: &str, func: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ActivityFailure>> + Send + 'static,
    {
        let boxed: ActivityFn = Arc::new(move |input| Box::pin(func(input)));
        let mut activities = match self.inner.activities.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        activities.insert(name.to_string(), boxed);
    }

    pub fn register_workflow(&self, name: &str, workflow: Arc<dyn Workflow>) {
        let mut workflows = match self.inner.workflows.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        workflows.insert(name.to_string(), workflow);
    }

    /// Starts a new instance. Ids are caller-chosen and unique for the
    /// lifetime of the store; re-scheduling an existing id is refused.
    pub fn schedule(
        &self,
        workflow: &str,
        instance_id: &str,
        input: Value,
    ) -> Result<(), EngineError> {
        if self.inner.load_state(instance_id)?.is_some() {
            return Err(EngineError::DuplicateInstance(instance_id.to_string()));
        }
        self.inner.workflow(workflow)?;
        let state = WorkflowState {
            instance_id: instance_id.to_string(),
            workflow: workflow.to_string(),
            status: WorkflowStatus::Running,
            input: input.clone(),
            output: None,
            error: None,
            started_at_ms: now_ms(),
            updated_at_ms: now_ms(),
        };
        self.inner.persist_state(&state)?;
        self.spawn(state, input);
        info!(instance = instance_id, workflow, "workflow scheduled");
        Ok(())
    }

    fn spawn(&self, state: WorkflowState, input: Value) {
        let (terminate_tx, terminate_rx) = watch::channel(false);
        let (event_tx, events_rx) = mpsc::unbounded_channel();
        // Re-deliver events raised before a restart.
        if let Ok(buffered) = self.inner.load_events(&state.instance_id) {
            for msg in buffered {
                let _ = event_tx.send(msg);
            }
        }
        let inner = self.inner.clone();
        let instance_id = state.instance_id.clone();
        let join = tokio::spawn(async move {
            let result = inner
                .clone()
                .run_instance(
                    state.workflow,
                    state.instance_id,
                    input,
                    state.started_at_ms,
                    terminate_rx,
                    events_rx,
                )
                .await;
            if let Err(e) = result {
                debug!(error = %e, "workflow instance ended with failure");
            }
        });
        self.inner.lock_running().insert(
            instance_id,
            InstanceHandle {
                event_tx,
                terminate: Arc::new(terminate_tx),
                join: Some(join),
            },
        );
    }

    pub fn status(&self, instance_id: &str) -> Result<Option<WorkflowState>, EngineError> {
        self.inner.load_state(instance_id)
    }

    /// Delivers an external event. Buffered durably, then pushed to
    /// the live instance if one is running. Raising against a finished
    /// instance is a no-op.
    pub fn raise_event(
        &self,
        instance_id: &str,
        name: &str,
        payload: Option<Value>,
    ) -> Result<(), EngineError> {
        let state = self
            .inner
            .load_state(instance_id)?
            .ok_or_else(|| EngineError::InstanceNotFound(instance_id.to_string()))?;
        if state.status.is_terminal() {
            debug!(instance = instance_id, event = name, "event for finished instance ignored");
            return Ok(());
        }
        let msg = EventMsg {
            name: name.to_string(),
            payload,
        };
        self.inner.append_event(instance_id, &msg)?;
        if let Some(handle) = self.inner.lock_running().get(instance_id) {
            let _ = handle.event_tx.send(msg);
        }
        Ok(())
    }

    /// Requests cooperative cancellation. The instance keeps running
    /// until its workflow notices the flag and finishes its cleanup.
    pub fn terminate(&self, instance_id: &str) -> Result<(), EngineError> {
        if let Some(handle) = self.inner.lock_running().get(instance_id) {
            let _ = handle.terminate.send(true);
            info!(instance = instance_id, "termination requested");
            return Ok(());
        }
        match self.inner.load_state(instance_id)? {
            Some(state) if !state.status.is_terminal() => {
                // Not running in this process (crashed, unrecovered):
                // mark it terminated directly.
                self.inner
                    .finalize(instance_id, WorkflowStatus::Terminated, None, None);
                Ok(())
            }
            Some(_) => Ok(()),
            None => Err(EngineError::InstanceNotFound(instance_id.to_string())),
        }
    }

    /// Re-runs every instance left RUNNING by a previous process.
    /// Child instances (ids carry a `:` separator) are skipped; their
    /// parents resume them. Returns the resumed top-level ids.
    pub fn recover(&self) -> Result<Vec<String>, EngineError> {
        let mut resumed = Vec::new();
        for key in self.inner.store.list_blob_keys(STATUS_PREFIX)? {
            let Some(instance_id) = key.strip_prefix(STATUS_PREFIX) else {
                continue;
            };
            if instance_id.contains(':') {
                continue;
            }
            if self.inner.lock_running().contains_key(instance_id) {
                continue;
            }
            let Some(state) = self.inner.load_state(instance_id)? else {
                continue;
            };
            if state.status.is_terminal() {
                continue;
            }
            info!(instance = instance_id, workflow = %state.workflow, "recovering instance");
            let input = state.input.clone();
            self.spawn(state, input);
            resumed.push(instance_id.to_string());
        }
        Ok(resumed)
    }

    /// Polls until the instance reaches a terminal status.
    pub async fn wait(
        &self,
        instance_id: &str,
        timeout: Duration,
    ) -> Result<WorkflowState, EngineError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(state) = self.status(instance_id)? {
                if state.status.is_terminal() {
                    return Ok(state);
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(EngineError::InstanceNotFound(format!(
                    "{instance_id} still running after {timeout:?}"
                )));
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Aborts all running instance tasks. State is already durable;
    /// the next process recovers them.
    pub fn shutdown(&self) {
        let mut running = self.inner.lock_running();
        for (id, handle) in running.drain() {
            if let Some(join) = handle.join {
                debug!(instance = %id, "aborting instance task");
                join.abort();
            }
        }
    }
}
