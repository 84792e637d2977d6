//! infergrid-api — REST API for InferGrid.
//!
//! Axum route handlers over the workflow engine, the state store and
//! the reconciliation scheduler.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/workflows` | Schedule a workflow |
//! | GET | `/api/v1/workflows/{id}` | Get workflow status |
//! | POST | `/api/v1/workflows/{id}/terminate` | Request termination |
//! | POST | `/api/v1/workflows/{id}/events/{name}` | Raise an external event |
//! | POST | `/api/v1/sync` | Run a reconciliation cycle now |
//! | GET | `/api/v1/deployments` | List all deployments |
//! | GET | `/api/v1/deployments/{cluster}/{ns}` | Get one deployment |
//! | GET | `/api/v1/deployments/{cluster}/{ns}/workers` | List its workers |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

use infergrid_engine::Engine;
use infergrid_reconcile::Reconciler;
use infergrid_state::StateStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub engine: Engine,
    pub reconciler: Arc<Reconciler>,
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/workflows", post(handlers::schedule_workflow))
        .route("/workflows/{id}", get(handlers::get_workflow))
        .route("/workflows/{id}/terminate", post(handlers::terminate_workflow))
        .route("/workflows/{id}/events/{name}", post(handlers::raise_workflow_event))
        .route("/sync", post(handlers::run_sync))
        .route("/deployments", get(handlers::list_deployments))
        .route("/deployments/{cluster}/{ns}", get(handlers::get_deployment))
        .route(
            "/deployments/{cluster}/{ns}/workers",
            get(handlers::list_workers),
        )
        .with_state(state);

    Router::new().nest("/api/v1", api_routes)
}
