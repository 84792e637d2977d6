//! infergrid-pipeline — the model deployment pipeline.
//!
//! Ties the workflow engine to the platform layer: the six-step deploy
//! pipeline, the transfer and quantization pollers, the
//! delete-deployment workflow, the ETA estimator and all activity
//! implementations.

pub mod activities;
pub mod delete;
pub mod deploy;
pub mod error;
pub mod eta;
pub mod pollers;

use std::sync::Arc;

use infergrid_core::config::PipelineSettings;
use infergrid_engine::Engine;

pub use activities::{BenchmarkRunner, PipelineDeps, SyntheticBenchmark, deploy_config_key};
pub use delete::DeleteDeployment;
pub use deploy::{DeployPipeline, PipelineInput};
pub use error::PipelineError;
pub use pollers::Poller;

/// Registered workflow names.
pub const DEPLOY_PIPELINE: &str = "deploy_pipeline";
pub const TRANSFER_POLLER: &str = "transfer_poller";
pub const QUANTIZATION_POLLER: &str = "quantization_poller";
pub const DELETE_DEPLOYMENT: &str = "delete_deployment";

/// Registers all pipeline activities and workflows on the engine.
pub fn register(engine: &Engine, deps: &Arc<PipelineDeps>, settings: &PipelineSettings) {
    activities::register_activities(engine, deps);
    engine.register_workflow(DEPLOY_PIPELINE, Arc::new(DeployPipeline));
    engine.register_workflow(TRANSFER_POLLER, Arc::new(Poller::transfer(settings)));
    engine.register_workflow(QUANTIZATION_POLLER, Arc::new(Poller::quantization(settings)));
    engine.register_workflow(DELETE_DEPLOYMENT, Arc::new(DeleteDeployment));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;

    use infergrid_core::{
        ClusterConfig, ConfigSealer, DeviceSpec, DeviceType, ModelSpec, NodeSpec, Platform,
    };
    use infergrid_engine::WorkflowStatus;
    use infergrid_notify::{BroadcastPublisher, NoopPublisher};
    use infergrid_platform::{
        ClusterHandler, DeploymentHandler, EndpointReadiness, FixedResolver, SimCluster,
        TransferStatus,
    };
    use infergrid_state::{
        ClusterRecord, Deployment, DeploymentStatus, StateStore, WorkerInfo,
    };

    struct Harness {
        engine: Engine,
        store: StateStore,
        sim: Arc<SimCluster>,
        publisher: Arc<BroadcastPublisher>,
    }

    fn settings(poll_secs: u64) -> PipelineSettings {
        PipelineSettings {
            poll_interval_secs: poll_secs,
            transfer_deadline_hours: 24,
            quantization_deadline_hours: 5,
        }
    }

    fn harness(poll_secs: u64) -> Harness {
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
        let deps = Arc::new(PipelineDeps {
            store: store.clone(),
            handler,
            publisher: publisher.clone(),
            benchmark: Arc::new(SyntheticBenchmark),
        });
        let engine = Engine::new(store.clone());
        register(&engine, &deps, &settings(poll_secs));
        Harness {
            engine,
            store,
            sim,
            publisher,
        }
    }

    fn local_model() -> ModelSpec {
        ModelSpec {
            name: "llama-7b".to_string(),
            size_params: 7_000_000_000,
            provider: Some("HUGGING_FACE".to_string()),
            credential_id: None,
            uri: Some("hf://meta/llama-7b".to_string()),
        }
    }

    fn cpu_nodes(replica: u32) -> Vec<NodeSpec> {
        vec![NodeSpec {
            name: "node-a".to_string(),
            devices: vec![DeviceSpec {
                name: "cpu-0".to_string(),
                image: "runtime:latest".to_string(),
                replica,
                memory: "32Gi".to_string(),
                device_type: DeviceType::Cpu,
                tp_size: 1,
                concurrency: 8,
                args: vec![],
                envs: Default::default(),
            }],
        }]
    }

    fn input(add_worker: bool) -> serde_json::Value {
        serde_json::to_value(PipelineInput {
            cluster_id: "c1".to_string(),
            namespace: "ns1".to_string(),
            model: local_model(),
            nodes: cpu_nodes(2),
            add_worker,
            quantize: false,
            target_topic: None,
            target_name: None,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn happy_path_deploys_and_reports_results() {
        let h = harness(0);
        // The cluster finishes the transfer and admits ingress on its
        // own in this scenario.
        h.sim.set_transfer_status("ns1", TransferStatus::Completed);
        h.sim.set_readiness("ns1", EndpointReadiness::Ready);

        h.engine
            .schedule(DEPLOY_PIPELINE, "wf-1", input(false))
            .unwrap();
        let state = h.engine.wait("wf-1", Duration::from_secs(10)).await.unwrap();
        assert_eq!(state.status, WorkflowStatus::Completed, "{:?}", state.error);

        let output = state.output.unwrap();
        assert_eq!(output["endpoints"], json!(["chat", "completions"]));
        assert!(output["benchmark"]["tokens_per_second"].is_number());

        let row = h.store.get_deployment("c1", "ns1").unwrap().unwrap();
        assert_eq!(row.status, DeploymentStatus::Ready);
        // Deploy-config snapshot persisted for later add-worker runs.
        assert!(h.store.get_blob(&deploy_config_key("ns1")).unwrap().is_some());
    }

    #[tokio::test]
    async fn notifications_carry_the_pinned_eta() {
        let h = harness(0);
        h.sim.set_transfer_status("ns1", TransferStatus::Completed);
        h.sim.set_readiness("ns1", EndpointReadiness::Ready);
        let mut rx = h.publisher.subscribe();

        h.engine
            .schedule(DEPLOY_PIPELINE, "wf-1", input(false))
            .unwrap();
        h.engine.wait("wf-1", Duration::from_secs(10)).await.unwrap();

        let mut transfer_eta = None;
        while let Ok(envelope) = rx.try_recv() {
            if envelope.notification.event == "transfer_model_to_cluster" {
                let result = envelope.notification.result.unwrap();
                transfer_eta = result["eta_minutes"].as_u64();
            }
        }
        // 7B parameters on CPU at the transfer step.
        assert_eq!(transfer_eta, Some(48));
    }

    #[tokio::test]
    async fn caller_chosen_topic_routes_notifications() {
        let h = harness(0);
        h.sim.set_transfer_status("ns1", TransferStatus::Completed);
        h.sim.set_readiness("ns1", EndpointReadiness::Ready);
        let mut rx = h.publisher.subscribe();

        let mut doc = input(false);
        doc["target_topic"] = json!("ui-session-9");
        doc["target_name"] = json!("Llama 7B (staging)");
        h.engine.schedule(DEPLOY_PIPELINE, "wf-1", doc).unwrap();
        h.engine.wait("wf-1", Duration::from_secs(10)).await.unwrap();

        let mut saw_any = false;
        while let Ok(envelope) = rx.try_recv() {
            saw_any = true;
            assert_eq!(envelope.topic.as_deref(), Some("ui-session-9"));
            assert!(envelope.notification.title.contains("Llama 7B (staging)"));
        }
        assert!(saw_any);
    }

    #[tokio::test]
    async fn cloud_models_skip_the_transfer() {
        let h = harness(0);
        h.sim.set_readiness("ns1", EndpointReadiness::Ready);
        let mut doc = input(false);
        doc["model"]["provider"] = json!("OPENAI");
        doc["model"]["credential_id"] = json!("cred-1");

        h.engine.schedule(DEPLOY_PIPELINE, "wf-1", doc).unwrap();
        let state = h.engine.wait("wf-1", Duration::from_secs(10)).await.unwrap();
        assert_eq!(state.status, WorkflowStatus::Completed, "{:?}", state.error);
        // No transfer job was ever started in the cluster.
        assert!(
            h.sim
                .get_model_transfer_status(&dummy_config(), "ns1")
                .await
                .is_err()
        );
    }

    fn dummy_config() -> ClusterConfig {
        ClusterConfig {
            server: "http://sim:6443".to_string(),
            token: "tok".to_string(),
            ingress_url: "http://sim.local".to_string(),
            platform: Some(Platform::Kubernetes),
        }
    }

    #[tokio::test]
    async fn cancellation_mid_transfer_cleans_up_exactly_once() {
        // Long poll interval parks the pipeline inside the poller.
        let h = harness(3600);
        h.engine
            .schedule(DEPLOY_PIPELINE, "wf-1", input(false))
            .unwrap();
        // Let it reach the transfer wait.
        tokio::time::sleep(Duration::from_millis(300)).await;
        h.engine.terminate("wf-1").unwrap();

        let state = h.engine.wait("wf-1", Duration::from_secs(10)).await.unwrap();
        assert_eq!(state.status, WorkflowStatus::Terminated);
        assert_eq!(h.sim.namespace_deletions(), vec!["ns1"]);
        // The cascade removed the deployment row.
        assert!(h.store.get_deployment("c1", "ns1").unwrap().is_none());
    }

    #[tokio::test]
    async fn add_worker_merges_replicas_and_never_cleans_up() {
        let h = harness(0);
        // Existing deployment: namespace, row, snapshot with 2 replicas.
        h.sim.set_transfer_status("ns1", TransferStatus::Completed);
        h.sim.set_readiness("ns1", EndpointReadiness::Ready);
        h.store
            .put_deployment(&Deployment {
                cluster_id: "c1".to_string(),
                namespace: "ns1".to_string(),
                status: DeploymentStatus::Ready,
                last_status_check: 0,
                created_at: 0,
                updated_at: 0,
            })
            .unwrap();
        h.store
            .save_blob(
                &deploy_config_key("ns1"),
                &serde_json::to_value(cpu_nodes(2)).unwrap(),
            )
            .unwrap();

        let mut doc = input(true);
        doc["nodes"][0]["devices"][0]["replica"] = json!(1);
        h.engine.schedule(DEPLOY_PIPELINE, "wf-1", doc).unwrap();
        let state = h.engine.wait("wf-1", Duration::from_secs(10)).await.unwrap();
        assert_eq!(state.status, WorkflowStatus::Completed, "{:?}", state.error);

        let snapshot: Vec<NodeSpec> = serde_json::from_value(
            h.store.get_blob(&deploy_config_key("ns1")).unwrap().unwrap(),
        )
        .unwrap();
        assert_eq!(snapshot[0].devices[0].replica, 3);
        assert!(h.sim.namespace_deletions().is_empty());
    }

    #[tokio::test]
    async fn unready_endpoints_fail_the_pipeline_without_cleanup() {
        let h = harness(0);
        h.sim.set_transfer_status("ns1", TransferStatus::Completed);
        // Readiness stays Pending.

        h.engine
            .schedule(DEPLOY_PIPELINE, "wf-1", input(false))
            .unwrap();
        let state = h.engine.wait("wf-1", Duration::from_secs(10)).await.unwrap();
        assert_eq!(state.status, WorkflowStatus::Failed);
        assert!(state.error.unwrap().contains("verify_deployment_status"));
        // Failure is not cancellation: the namespace stays for triage.
        assert!(h.sim.namespace_deletions().is_empty());
        let row = h.store.get_deployment("c1", "ns1").unwrap().unwrap();
        assert_eq!(row.status, DeploymentStatus::Pending);
    }

    #[tokio::test]
    async fn delete_workflow_cascades_rows_and_blobs() {
        let h = harness(0);
        h.sim.set_readiness("ns1", EndpointReadiness::Ready);
        h.store
            .put_deployment(&Deployment {
                cluster_id: "c1".to_string(),
                namespace: "ns1".to_string(),
                status: DeploymentStatus::Ready,
                last_status_check: 0,
                created_at: 0,
                updated_at: 0,
            })
            .unwrap();
        h.store
            .put_worker(&WorkerInfo {
                cluster_id: "c1".to_string(),
                namespace: "ns1".to_string(),
                name: "pod-1".to_string(),
                node_name: "node-a".to_string(),
                device_name: "cpu-0".to_string(),
                utilization: None,
                status: "Running".to_string(),
                deployment_status: DeploymentStatus::Ready,
                created: 0,
                last_restart: None,
                last_updated: 0,
            })
            .unwrap();
        h.store
            .save_blob(&deploy_config_key("ns1"), &json!([]))
            .unwrap();

        h.engine
            .schedule(
                DELETE_DEPLOYMENT,
                "wf-del",
                json!({"cluster_id": "c1", "namespace": "ns1"}),
            )
            .unwrap();
        let state = h
            .engine
            .wait("wf-del", Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(state.status, WorkflowStatus::Completed, "{:?}", state.error);

        assert!(h.store.get_deployment("c1", "ns1").unwrap().is_none());
        assert!(h.store.list_workers("c1", "ns1").unwrap().is_empty());
        assert!(h.store.get_blob(&deploy_config_key("ns1")).unwrap().is_none());
        assert_eq!(h.sim.namespace_deletions(), vec!["ns1"]);
    }

    #[tokio::test]
    async fn noop_publisher_satisfies_the_publisher_seam() {
        // Compile-level check that tests can run without broadcast.
        let publisher: infergrid_notify::Publisher = Arc::new(NoopPublisher);
        publisher
            .publish(
                None,
                infergrid_notify::notification(
                    "x",
                    infergrid_notify::EventStatus::Completed,
                    "",
                    "",
                    None,
                ),
            )
            .await;
    }
}
