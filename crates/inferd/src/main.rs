//! inferd — the InferGrid daemon.
//!
//! Single binary that assembles all InferGrid subsystems:
//! - State store (redb)
//! - Workflow engine (with recovery of interrupted instances)
//! - Deployment pipeline workflows
//! - Reconciliation scheduler
//! - REST API
//!
//! # Usage
//!
//! ```text
//! inferd --port 8090 --data-dir /var/lib/infergrid
//! inferd --sim            # in-memory store + simulated cluster
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;
use tracing::info;

use infergrid_core::config::InferConfig;
use infergrid_core::{ClusterConfig, ConfigSealer, Platform};
use infergrid_engine::Engine;
use infergrid_notify::BroadcastPublisher;
use infergrid_pipeline::{PipelineDeps, SyntheticBenchmark};
use infergrid_platform::{
    DeploymentHandler, FixedResolver, HandlerResolver, HttpClusterApi, ProbeResolver, SimCluster,
};
use infergrid_reconcile::Reconciler;
use infergrid_state::{ClusterRecord, StateStore};

#[derive(Parser)]
#[command(name = "inferd", about = "InferGrid deployment orchestrator daemon")]
struct Cli {
    /// Path to inferd.toml. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides the config file).
    #[arg(long)]
    port: Option<u16>,

    /// Data directory for persistent state (overrides the config file).
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Run against an in-memory simulated cluster instead of real ones.
    #[arg(long)]
    sim: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,inferd=debug,infergrid=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => InferConfig::from_file(path)?,
        None => InferConfig::default(),
    };
    if let Some(port) = cli.port {
        config.daemon.port = port;
    }
    if let Some(dir) = &cli.data_dir {
        config.daemon.data_dir = dir.display().to_string();
    }

    run(config, cli.sim).await
}

async fn run(config: InferConfig, sim: bool) -> anyhow::Result<()> {
    info!(sim, "InferGrid daemon starting");

    // ── State store + sealing key ──────────────────────────────

    let (store, sealer) = if sim {
        (StateStore::open_in_memory()?, ConfigSealer::generate())
    } else {
        let data_dir = PathBuf::from(&config.daemon.data_dir);
        std::fs::create_dir_all(&data_dir)?;
        let store = StateStore::open(&data_dir.join("infergrid.redb"))?;
        let sealer = ConfigSealer::load_or_generate(&data_dir.join("sealing.key"))?;
        info!(dir = %data_dir.display(), "state store opened");
        (store, sealer)
    };
    let sealer = Arc::new(sealer);

    // ── Platform layer ─────────────────────────────────────────

    let resolver: Arc<dyn HandlerResolver> = if sim {
        let cluster = Arc::new(SimCluster::new());
        seed_sim_cluster(&store, &sealer)?;
        info!("simulated cluster registered as \"sim\"");
        Arc::new(FixedResolver(cluster))
    } else {
        Arc::new(ProbeResolver::new(Arc::new(HttpClusterApi::new())))
    };
    let handler = Arc::new(DeploymentHandler::new(
        store.clone(),
        sealer.clone(),
        resolver,
    ));

    // ── Notifications ──────────────────────────────────────────

    let publisher: infergrid_notify::Publisher = Arc::new(BroadcastPublisher::new(1024));

    // ── Workflow engine + pipeline ─────────────────────────────

    let engine = Engine::new(store.clone());
    let deps = Arc::new(PipelineDeps {
        store: store.clone(),
        handler: handler.clone(),
        publisher: publisher.clone(),
        benchmark: Arc::new(SyntheticBenchmark),
    });
    infergrid_pipeline::register(&engine, &deps, &config.pipeline);

    let resumed = engine.recover()?;
    if !resumed.is_empty() {
        info!(count = resumed.len(), "resumed interrupted workflows");
    }

    // ── Reconciliation scheduler ───────────────────────────────

    let reconciler = Arc::new(Reconciler::new(
        store.clone(),
        handler,
        publisher,
        config.reconcile.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reconcile_handle = tokio::spawn(reconciler.clone().run(shutdown_rx));
    info!(
        interval = config.reconcile.interval_secs,
        "reconciliation scheduler started"
    );

    // ── API server ─────────────────────────────────────────────

    let router = infergrid_api::build_router(infergrid_api::ApiState {
        store,
        engine: engine.clone(),
        reconciler,
    });
    let addr = SocketAddr::from(([0, 0, 0, 0], config.daemon.port));
    info!(%addr, "API server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    let _ = reconcile_handle.await;
    engine.shutdown();

    info!("InferGrid daemon stopped");
    Ok(())
}

/// Register the simulated cluster so deploys work out of the box.
fn seed_sim_cluster(store: &StateStore, sealer: &ConfigSealer) -> anyhow::Result<()> {
    let config = ClusterConfig {
        server: "http://sim.local:6443".to_string(),
        token: "sim-token".to_string(),
        ingress_url: "http://sim.local".to_string(),
        platform: Some(Platform::Kubernetes),
    };
    store.put_cluster(&ClusterRecord {
        id: "sim".to_string(),
        sealed_config: sealer.seal(&config)?,
        platform: Some(Platform::Kubernetes),
        ingress_url: Some(config.ingress_url.clone()),
    })?;
    Ok(())
}
