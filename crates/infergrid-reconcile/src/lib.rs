//! infergrid-reconcile — periodic fleet reconciliation.
//!
//! Keeps stored deployment and worker rows in step with what the
//! clusters actually run. Batched, locked, and idempotent: a cycle
//! over an unchanged fleet writes the same rows and emits nothing.

pub mod error;
pub mod scheduler;
pub mod sync_state;

pub use error::ReconcileError;
pub use scheduler::{CycleReport, Reconciler};
pub use sync_state::{SYNC_STATE_KEY, SyncState};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde_json::json;

    use infergrid_core::config::ReconcileSettings;
    use infergrid_core::{ClusterConfig, ConfigSealer, Platform};
    use infergrid_notify::{BroadcastPublisher, NoopPublisher};
    use infergrid_platform::{
        DeploymentHandler, EndpointReadiness, FixedResolver, LivePod, SimCluster,
    };
    use infergrid_state::{ClusterRecord, Deployment, DeploymentStatus, StateStore};

    const DAY_SECS: u64 = 24 * 3600;

    fn now_secs() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    fn settings() -> ReconcileSettings {
        ReconcileSettings {
            interval_secs: 300,
            batch_size: 5,
            stale_lock_secs: 1800,
            failed_retry_secs: DAY_SECS,
        }
    }

    struct Harness {
        store: StateStore,
        sim: Arc<SimCluster>,
        publisher: Arc<BroadcastPublisher>,
        reconciler: Reconciler,
    }

    fn harness() -> Harness {
        let store = StateStore::open_in_memory().unwrap();
        let sealer = Arc::new(ConfigSealer::generate());
        let config = ClusterConfig {
            server: "http://sim:6443".to_string(),
            token: "tok".to_string(),
            ingress_url: "http://sim.local".to_string(),
            platform: Some(Platform::Kubernetes),
        };
        store
            .put_cluster(&ClusterRecord {
                id: "c1".to_string(),
                sealed_config: sealer.seal(&config).unwrap(),
                platform: Some(Platform::Kubernetes),
                ingress_url: Some(config.ingress_url.clone()),
            })
            .unwrap();
        let sim = Arc::new(SimCluster::new());
        let handler = Arc::new(DeploymentHandler::new(
            store.clone(),
            sealer,
            Arc::new(FixedResolver(sim.clone())),
        ));
        let publisher = Arc::new(BroadcastPublisher::new(256));
        let reconciler = Reconciler::new(
            store.clone(),
            handler,
            publisher.clone(),
            settings(),
        );
        Harness {
            store,
            sim,
            publisher,
            reconciler,
        }
    }

    fn seed_deployment(h: &Harness, namespace: &str, status: DeploymentStatus, checked_at: u64) {
        h.store
            .put_deployment(&Deployment {
                cluster_id: "c1".to_string(),
                namespace: namespace.to_string(),
                status,
                last_status_check: checked_at,
                created_at: checked_at,
                updated_at: checked_at,
            })
            .unwrap();
    }

    fn pod(name: &str) -> LivePod {
        LivePod {
            name: name.to_string(),
            node_name: "node-a".to_string(),
            device_name: "gpu-0".to_string(),
            status: "Running".to_string(),
            restarts: 0,
            started_at: None,
        }
    }

    #[tokio::test]
    async fn cycle_syncs_status_and_workers() {
        let h = harness();
        seed_deployment(&h, "ns1", DeploymentStatus::Pending, now_secs());
        h.sim.set_readiness("ns1", EndpointReadiness::Ready);
        h.sim.set_pods("ns1", vec![pod("pod-1"), pod("pod-2")]);

        let report = h.reconciler.run_cycle().await;
        assert_eq!(report.total, 1);
        assert_eq!(report.updated, 1);
        assert_eq!(report.failed, 0);

        let row = h.store.get_deployment("c1", "ns1").unwrap().unwrap();
        assert_eq!(row.status, DeploymentStatus::Ready);
        let workers = h.store.list_workers("c1", "ns1").unwrap();
        assert_eq!(workers.len(), 2);
    }

    #[tokio::test]
    async fn repeat_cycles_are_idempotent_and_quiet() {
        let h = harness();
        seed_deployment(&h, "ns1", DeploymentStatus::Pending, now_secs());
        h.sim.set_readiness("ns1", EndpointReadiness::Ready);
        h.sim.set_pods("ns1", vec![pod("pod-1")]);

        h.reconciler.run_cycle().await;
        let workers_first = h.store.list_workers("c1", "ns1").unwrap();

        // Drain everything published so far, then go again.
        let mut rx = h.publisher.subscribe();
        let report = h.reconciler.run_cycle().await;
        assert_eq!(report.updated, 1);
        let workers_second = h.store.list_workers("c1", "ns1").unwrap();
        assert_eq!(workers_first.len(), workers_second.len());
        // Nothing changed, so nothing was published.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn held_locks_skip_and_stale_locks_recover() {
        let h = harness();
        seed_deployment(&h, "ns1", DeploymentStatus::Pending, now_secs());
        h.sim.set_readiness("ns1", EndpointReadiness::Ready);
        h.sim.set_pods("ns1", vec![pod("pod-1")]);

        // Fresh lock held by "another" cycle.
        let mut state = SyncState::default();
        state.active_syncs.insert("c1/ns1".to_string(), now_secs());
        h.store
            .save_blob(SYNC_STATE_KEY, &serde_json::to_value(&state).unwrap())
            .unwrap();
        let report = h.reconciler.run_cycle().await;
        assert_eq!(report.skipped, 1);
        assert_eq!(report.updated, 0);

        // Same lock, but acquired beyond the stale window.
        let mut state = SyncState::default();
        state
            .active_syncs
            .insert("c1/ns1".to_string(), now_secs() - 3600);
        h.store
            .save_blob(SYNC_STATE_KEY, &serde_json::to_value(&state).unwrap())
            .unwrap();
        let report = h.reconciler.run_cycle().await;
        assert_eq!(report.skipped, 0);
        assert_eq!(report.updated, 1);
    }

    #[tokio::test]
    async fn failed_deployments_respect_the_retry_window() {
        let h = harness();
        h.sim.set_readiness("ns-old", EndpointReadiness::Ready);
        h.sim.set_pods("ns-old", vec![pod("pod-1")]);
        // Failed 23h59m ago: still inside the window, not retried.
        seed_deployment(
            &h,
            "ns-recent",
            DeploymentStatus::Failed,
            now_secs() - (DAY_SECS - 60),
        );
        // Failed 24h01m ago: retried.
        seed_deployment(
            &h,
            "ns-old",
            DeploymentStatus::Failed,
            now_secs() - (DAY_SECS + 60),
        );

        let report = h.reconciler.run_cycle().await;
        assert_eq!(report.total, 1);
        assert_eq!(report.updated, 1);
        let recent = h.store.get_deployment("c1", "ns-recent").unwrap().unwrap();
        assert_eq!(recent.status, DeploymentStatus::Failed);
        let old = h.store.get_deployment("c1", "ns-old").unwrap().unwrap();
        assert_eq!(old.status, DeploymentStatus::Ready);
    }

    #[tokio::test]
    async fn one_broken_deployment_does_not_poison_the_batch() {
        let h = harness();
        seed_deployment(&h, "ns-good", DeploymentStatus::Pending, now_secs());
        h.sim.set_readiness("ns-good", EndpointReadiness::Ready);
        h.sim.set_pods("ns-good", vec![pod("pod-1")]);
        // ns-bad has a row but no namespace in the cluster.
        seed_deployment(&h, "ns-bad", DeploymentStatus::Pending, now_secs());

        let report = h.reconciler.run_cycle().await;
        assert_eq!(report.total, 2);
        assert_eq!(report.updated, 1);
        assert_eq!(report.failed, 1);

        let good = h.store.get_deployment("c1", "ns-good").unwrap().unwrap();
        assert_eq!(good.status, DeploymentStatus::Ready);
        let bad = h.store.get_deployment("c1", "ns-bad").unwrap().unwrap();
        assert_eq!(bad.status, DeploymentStatus::Failed);

        let state: SyncState = serde_json::from_value(
            h.store.get_blob(SYNC_STATE_KEY).unwrap().unwrap(),
        )
        .unwrap();
        assert!(state.failed_deployments.contains_key("c1/ns-bad"));
        assert!(state.active_syncs.is_empty(), "all locks released");
    }

    #[tokio::test]
    async fn ready_rows_do_not_regress_to_pending() {
        let h = harness();
        seed_deployment(&h, "ns1", DeploymentStatus::Ready, now_secs());
        // Cluster answers but readiness is only Pending.
        h.sim.set_transfer_status("ns1", infergrid_platform::TransferStatus::Completed);
        h.sim.set_pods("ns1", vec![pod("pod-1")]);

        h.reconciler.run_cycle().await;
        let row = h.store.get_deployment("c1", "ns1").unwrap().unwrap();
        assert_eq!(row.status, DeploymentStatus::Ready);
    }

    #[tokio::test]
    async fn vanished_workers_are_deleted() {
        let h = harness();
        seed_deployment(&h, "ns1", DeploymentStatus::Pending, now_secs());
        h.sim.set_readiness("ns1", EndpointReadiness::Ready);
        h.sim.set_pods("ns1", vec![pod("pod-1"), pod("pod-2")]);
        h.reconciler.run_cycle().await;
        assert_eq!(h.store.list_workers("c1", "ns1").unwrap().len(), 2);

        h.sim.set_pods("ns1", vec![pod("pod-2")]);
        h.reconciler.run_cycle().await;
        let workers = h.store.list_workers("c1", "ns1").unwrap();
        assert_eq!(workers.len(), 1);
        assert_eq!(workers[0].name, "pod-2");
    }

    #[tokio::test]
    async fn sync_state_store_failure_degrades_to_empty() {
        let h = harness();
        // Garbage under the sentinel key must not break the cycle.
        h.store
            .save_blob(SYNC_STATE_KEY, &json!("not an object"))
            .unwrap();
        seed_deployment(&h, "ns1", DeploymentStatus::Pending, now_secs());
        h.sim.set_readiness("ns1", EndpointReadiness::Ready);
        h.sim.set_pods("ns1", vec![pod("pod-1")]);

        let report = h.reconciler.run_cycle().await;
        assert_eq!(report.updated, 1);
    }

    #[tokio::test]
    async fn noop_publisher_works_for_headless_cycles() {
        let store = StateStore::open_in_memory().unwrap();
        let sealer = Arc::new(ConfigSealer::generate());
        let sim = Arc::new(SimCluster::new());
        let handler = Arc::new(DeploymentHandler::new(
            store.clone(),
            sealer,
            Arc::new(FixedResolver(sim)),
        ));
        let reconciler =
            Reconciler::new(store, handler, Arc::new(NoopPublisher), settings());
        let report = reconciler.run_cycle().await;
        assert_eq!(report, CycleReport {
            batch_size: 5,
            ..CycleReport::default()
        });
    }
}
