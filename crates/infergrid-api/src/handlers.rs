//! REST API handlers.
//!
//! Each handler talks to the engine, the state store or the reconciler
//! and returns JSON responses.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::{Value, json};
use uuid::Uuid;

use infergrid_engine::EngineError;
use infergrid_pipeline::{DEPLOY_PIPELINE, PipelineInput, eta};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn engine_error_status(e: &EngineError) -> StatusCode {
    match e {
        EngineError::UnknownWorkflow(_) => StatusCode::BAD_REQUEST,
        EngineError::InstanceNotFound(_) => StatusCode::NOT_FOUND,
        EngineError::DuplicateInstance(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// ── Workflows ──────────────────────────────────────────────────

/// Schedule request body.
#[derive(serde::Deserialize)]
pub struct ScheduleRequest {
    pub workflow_name: String,
    pub input: Value,
    /// Notification topic the caller wants progress published to.
    #[serde(default)]
    pub target_topic: Option<String>,
    /// Display name used in notification titles.
    #[serde(default)]
    pub target_name: Option<String>,
}

/// POST /api/v1/workflows
pub async fn schedule_workflow(
    State(state): State<ApiState>,
    Json(req): Json<ScheduleRequest>,
) -> impl IntoResponse {
    let workflow_id = Uuid::new_v4().to_string();

    // Notification targeting rides inside the workflow input.
    let mut input = req.input;
    if let Value::Object(map) = &mut input {
        if let Some(topic) = &req.target_topic {
            map.insert("target_topic".to_string(), json!(topic));
        }
        if let Some(name) = &req.target_name {
            map.insert("target_name".to_string(), json!(name));
        }
    }

    // Deploy requests get the step list and an up-front ETA so the
    // caller can render progress before the first notification lands.
    let (steps, eta_minutes) = if req.workflow_name == DEPLOY_PIPELINE {
        match serde_json::from_value::<PipelineInput>(input.clone()) {
            Ok(input) => {
                let device = eta::dominant_device(&input.nodes);
                let minutes =
                    eta::estimate_minutes(eta::STEP_ORDER[0], input.model.size_params, device);
                (eta::STEP_ORDER.to_vec(), Some(minutes))
            }
            Err(e) => {
                return error_response(
                    &format!("invalid deploy input: {e}"),
                    StatusCode::BAD_REQUEST,
                )
                .into_response();
            }
        }
    } else {
        (Vec::new(), None)
    };

    match state
        .engine
        .schedule(&req.workflow_name, &workflow_id, input)
    {
        Ok(()) => (
            StatusCode::CREATED,
            ApiResponse::ok(json!({
                "workflow_id": workflow_id,
                "status": "RUNNING",
                "steps": steps,
                "eta_minutes": eta_minutes,
            })),
        )
            .into_response(),
        Err(e) => error_response(&e.to_string(), engine_error_status(&e)).into_response(),
    }
}

/// GET /api/v1/workflows/:id
pub async fn get_workflow(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.engine.status(&id) {
        Ok(Some(wf)) => ApiResponse::ok(wf).into_response(),
        Ok(None) => error_response("workflow not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// POST /api/v1/workflows/:id/terminate
pub async fn terminate_workflow(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.engine.terminate(&id) {
        Ok(()) => ApiResponse::ok(json!({ "workflow_id": id, "status": "TERMINATING" }))
            .into_response(),
        Err(e) => error_response(&e.to_string(), engine_error_status(&e)).into_response(),
    }
}

/// POST /api/v1/workflows/:id/events/:name
pub async fn raise_workflow_event(
    State(state): State<ApiState>,
    Path((id, name)): Path<(String, String)>,
    payload: Option<Json<Value>>,
) -> impl IntoResponse {
    let payload = payload.map(|Json(v)| v);
    match state.engine.raise_event(&id, &name, payload) {
        Ok(()) => ApiResponse::ok(json!({ "workflow_id": id, "event": name })).into_response(),
        Err(e) => error_response(&e.to_string(), engine_error_status(&e)).into_response(),
    }
}

// ── Reconciliation ─────────────────────────────────────────────

/// POST /api/v1/sync
pub async fn run_sync(State(state): State<ApiState>) -> impl IntoResponse {
    let report = state.reconciler.run_cycle().await;
    ApiResponse::ok(report)
}

// ── Deployments ────────────────────────────────────────────────

/// GET /api/v1/deployments
pub async fn list_deployments(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.list_deployments() {
        Ok(rows) => ApiResponse::ok(rows).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// GET /api/v1/deployments/:cluster/:ns
pub async fn get_deployment(
    State(state): State<ApiState>,
    Path((cluster, ns)): Path<(String, String)>,
) -> impl IntoResponse {
    match state.store.get_deployment(&cluster, &ns) {
        Ok(Some(row)) => ApiResponse::ok(row).into_response(),
        Ok(None) => error_response("deployment not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// GET /api/v1/deployments/:cluster/:ns/workers
pub async fn list_workers(
    State(state): State<ApiState>,
    Path((cluster, ns)): Path<(String, String)>,
) -> impl IntoResponse {
    match state.store.list_workers(&cluster, &ns) {
        Ok(workers) => ApiResponse::ok(workers).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}
