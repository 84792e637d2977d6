//! The fleet reconciliation scheduler.
//!
//! Each cycle selects the deployments due for a status sync, locks
//! them in the persisted sync state, probes them through the
//! deployment handler in fixed-size concurrent batches, and diffs the
//! live worker list against the stored rows. Locks are saved before a
//! batch executes and released per entry as each sync finishes, so a
//! crash mid-batch leaves at worst a stale lock that the next cycle
//! drops.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use infergrid_core::config::ReconcileSettings;
use infergrid_notify::{EventStatus, Publisher, notification};
use infergrid_platform::{DeploymentHandler, EndpointReadiness, LivePod};
use infergrid_state::{
    Deployment, DeploymentStatus, StateStore, WorkerInfo, deployment_key,
};

use crate::error::ReconcileError;
use crate::sync_state::{SYNC_STATE_KEY, SyncState};

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Deployments considered due this cycle.
    pub total: usize,
    pub updated: usize,
    pub failed: usize,
    /// Skipped because another sync already held their lock.
    pub skipped: usize,
    pub batch_size: usize,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub struct Reconciler {
    store: StateStore,
    handler: Arc<DeploymentHandler>,
    publisher: Publisher,
    settings: ReconcileSettings,
}

impl Reconciler {
    pub fn new(
        store: StateStore,
        handler: Arc<DeploymentHandler>,
        publisher: Publisher,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            store,
            handler,
            publisher,
            settings,
        }
    }

    fn load_sync_state(&self) -> SyncState {
        match self.store.get_blob(SYNC_STATE_KEY) {
            Ok(Some(value)) => match serde_json::from_value(value) {
                Ok(state) => state,
                Err(e) => {
                    warn!(error = %e, "corrupt sync state, starting empty");
                    SyncState::default()
                }
            },
            Ok(None) => SyncState::default(),
            // Locking degrades to in-memory for this cycle.
            Err(e) => {
                warn!(error = %e, "sync state unreadable, locking degrades to this cycle");
                SyncState::default()
            }
        }
    }

    fn save_sync_state(&self, state: &SyncState) {
        match serde_json::to_value(state) {
            Ok(value) => {
                if let Err(e) = self.store.save_blob(SYNC_STATE_KEY, &value) {
                    warn!(error = %e, "failed to persist sync state");
                }
            }
            Err(e) => warn!(error = %e, "failed to encode sync state"),
        }
    }

    /// Deployments due for a sync this cycle.
    fn select_due(&self, rows: &[Deployment], now: u64) -> Vec<Deployment> {
        rows.iter()
            .filter(|row| {
                if row.status.is_terminal() {
                    return false;
                }
                if row.status == DeploymentStatus::Failed {
                    // Failed deployments re-enter after the retry window.
                    return now.saturating_sub(row.last_status_check)
                        > self.settings.failed_retry_secs;
                }
                true
            })
            .cloned()
            .collect()
    }

    /// Runs one full reconciliation pass. Never fails: store and
    /// per-deployment errors are absorbed into the report.
    pub async fn run_cycle(&self) -> CycleReport {
        let now = now_secs();
        let mut state = self.load_sync_state();
        let dropped = state.drop_stale_locks(now, self.settings.stale_lock_secs);
        if dropped > 0 {
            info!(dropped, "dropped stale sync locks");
        }

        let rows = match self.store.list_deployments() {
            Ok(rows) => rows,
            Err(e) => {
                error!(error = %e, "cannot list deployments, skipping cycle");
                return CycleReport {
                    batch_size: self.settings.batch_size,
                    ..CycleReport::default()
                };
            }
        };
        let due = self.select_due(&rows, now);
        let mut report = CycleReport {
            total: due.len(),
            batch_size: self.settings.batch_size,
            ..CycleReport::default()
        };

        let (locked, skipped): (Vec<_>, Vec<_>) = due
            .into_iter()
            .partition(|row| !state.active_syncs.contains_key(&row.table_key()));
        report.skipped = skipped.len();
        for row in &skipped {
            debug!(key = %row.table_key(), "sync already in flight, skipping");
        }

        for batch in locked.chunks(self.settings.batch_size.max(1)) {
            // Locks go to disk before any sync in the batch starts.
            for row in batch {
                state.active_syncs.insert(row.table_key(), now);
            }
            self.save_sync_state(&state);

            let mut set = JoinSet::new();
            for row in batch {
                let store = self.store.clone();
                let handler = self.handler.clone();
                let publisher = self.publisher.clone();
                let row = row.clone();
                let first_sync = !state.seen_before(&row.table_key());
                set.spawn(async move {
                    let key = row.table_key();
                    let result =
                        sync_deployment(&store, &handler, &publisher, &row, first_sync, now).await;
                    (key, result)
                });
            }

            while let Some(joined) = set.join_next().await {
                let (key, result) = match joined {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!(error = %e, "sync task panicked");
                        report.failed += 1;
                        continue;
                    }
                };
                // Release this entry's lock regardless of outcome.
                state.active_syncs.remove(&key);
                match result {
                    Ok(()) => {
                        report.updated += 1;
                        state.last_sync_times.insert(key.clone(), now);
                        state.failed_deployments.remove(&key);
                    }
                    Err(e) => {
                        warn!(key = %key, error = %e, "deployment sync failed");
                        report.failed += 1;
                        state.failed_deployments.insert(key.clone(), e.to_string());
                        mark_failed(&self.store, &key, now);
                    }
                }
                self.save_sync_state(&state);
            }
        }

        info!(
            total = report.total,
            updated = report.updated,
            failed = report.failed,
            skipped = report.skipped,
            "reconciliation cycle done"
        );
        report
    }

    /// Interval loop for the daemon. Stops when the shutdown flag
    /// flips.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.settings.interval_secs.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_cycle().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("reconciler stopping");
                        return;
                    }
                }
            }
        }
    }
}

/// Marks a deployment Failed after a sync error so the retry window
/// applies. Best effort.
fn mark_failed(store: &StateStore, key: &str, now: u64) {
    let Some((cluster_id, namespace)) = key.split_once('/') else {
        return;
    };
    if let Err(e) =
        store.update_deployment_status(cluster_id, namespace, DeploymentStatus::Failed, now, false)
    {
        warn!(key, error = %e, "could not mark deployment failed");
    }
}

fn readiness_to_status(readiness: EndpointReadiness) -> DeploymentStatus {
    match readiness {
        EndpointReadiness::Ready => DeploymentStatus::Ready,
        EndpointReadiness::Pending => DeploymentStatus::Pending,
        EndpointReadiness::IngressFailed => DeploymentStatus::IngressFailed,
        EndpointReadiness::EndpointsFailed => DeploymentStatus::EndpointsFailed,
    }
}

/// Syncs one deployment: probe live status, apply it to the row, diff
/// the live pods against the stored worker rows, and notify when
/// something observable changed.
async fn sync_deployment(
    store: &StateStore,
    handler: &DeploymentHandler,
    publisher: &Publisher,
    row: &Deployment,
    first_sync: bool,
    now: u64,
) -> Result<(), ReconcileError> {
    let probe = handler
        .deployment_status(&row.cluster_id, &row.namespace)
        .await?;
    let probed_status = readiness_to_status(probe.readiness);
    // A refused Ready -> Pending regression keeps the stored status.
    let applied = store.update_deployment_status(
        &row.cluster_id,
        &row.namespace,
        probed_status,
        now,
        false,
    )?;
    let effective_status = if applied { probed_status } else { row.status };
    let status_changed = applied && probed_status != row.status;

    let stored = store.list_workers(&row.cluster_id, &row.namespace)?;
    let replica_changed = probe.pods.len() != stored.len();

    for pod in &probe.pods {
        let existing = stored.iter().find(|w| w.name == pod.name);
        store.put_worker(&worker_row(row, pod, existing, effective_status, now))?;
    }
    for gone in stored
        .iter()
        .filter(|w| !probe.pods.iter().any(|p| p.name == w.name))
    {
        store.delete_worker(&gone.cluster_id, &gone.namespace, &gone.name)?;
    }

    if status_changed || replica_changed || first_sync {
        let status = match effective_status {
            DeploymentStatus::Ready => EventStatus::Completed,
            DeploymentStatus::Pending => EventStatus::Running,
            _ => EventStatus::Failed,
        };
        publisher
            .publish(
                None,
                notification(
                    "deployment_sync",
                    status,
                    &format!("{} status", deployment_key(&row.cluster_id, &row.namespace)),
                    "",
                    Some(json!({
                        "status": effective_status,
                        "replicas": probe.pods.len(),
                    })),
                ),
            )
            .await;
    }
    Ok(())
}

fn worker_row(
    row: &Deployment,
    pod: &LivePod,
    existing: Option<&WorkerInfo>,
    deployment_status: DeploymentStatus,
    now: u64,
) -> WorkerInfo {
    let restarted = existing.is_some_and(|w| w.status != pod.status) && pod.restarts > 0;
    WorkerInfo {
        cluster_id: row.cluster_id.clone(),
        namespace: row.namespace.clone(),
        name: pod.name.clone(),
        node_name: pod.node_name.clone(),
        device_name: pod.device_name.clone(),
        utilization: existing.and_then(|w| w.utilization),
        status: pod.status.clone(),
        deployment_status,
        created: existing.map(|w| w.created).unwrap_or(now),
        last_restart: if restarted {
            Some(now)
        } else {
            existing.and_then(|w| w.last_restart)
        },
        last_updated: now,
    }
}
