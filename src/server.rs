use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::agent::build_agents;
use crate::agent::model::ModelClient;
use crate::config::AppConfig;
use crate::controller::{human_input_signal, Controller};
use crate::critique::{CritiqueInterpreter, KeywordInterpreter, StructuredInterpreter};
use crate::runs::RunRegistry;
use crate::sandbox::LocalSandbox;
use crate::state::store::{FileStore, MemoryStore, StateStore};
use crate::state::{RunStatus, WorkflowState};
use crate::steps::{MemoryStepRunner, StepRunner};

pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn StateStore>,
    pub steps: Arc<dyn StepRunner>,
    pub controller: Arc<Controller>,
    pub runs: Arc<RunRegistry>,
}

impl AppState {
    pub async fn new(config: AppConfig) -> crate::error::Result<Self> {
        let store: Arc<dyn StateStore> = match &config.store.data_dir {
            Some(dir) => Arc::new(FileStore::new(dir.clone()).await?),
            None => Arc::new(MemoryStore::new()),
        };
        let steps: Arc<dyn StepRunner> = Arc::new(MemoryStepRunner::new());
        let sandbox = Arc::new(LocalSandbox::new(&config.sandbox));

        let client = Arc::new(ModelClient::new(
            config.api_key(),
            &config.model.model,
            config.model.max_tokens,
        ));
        let agents = build_agents(client, config.model.max_turns);

        let interpreter: Arc<dyn CritiqueInterpreter> = if config.workflow.structured_critique {
            Arc::new(StructuredInterpreter::new())
        } else {
            Arc::new(KeywordInterpreter)
        };

        let controller = Arc::new(Controller::new(
            Arc::clone(&store),
            Arc::clone(&steps),
            sandbox,
            agents,
            interpreter,
            config.workflow.clone(),
            config.sandbox.clone(),
        ));

        Ok(Self {
            config,
            store,
            steps,
            controller,
            runs: Arc::new(RunRegistry::new()),
        })
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/runs", get(list_runs).post(create_run))
        .route("/runs/:run_id", get(get_run))
        .route("/runs/:run_id/input", post(post_human_input))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
pub struct CreateRunRequest {
    pub task_description: String,
    #[serde(default)]
    pub run_id: Option<String>,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

async fn create_run(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateRunRequest>,
) -> Response {
    if request.task_description.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "task_description must not be empty");
    }

    let run_id = request
        .run_id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let workflow_state = match state.store.get(&run_id).await {
        Ok(Some(existing)) => {
            // Terminal runs are archived; return what happened rather
            // than starting over under the same id.
            if existing.status.is_terminal() {
                return (StatusCode::OK, Json(existing)).into_response();
            }
            if state.runs.is_active(&run_id).await {
                return error_response(
                    StatusCode::CONFLICT,
                    format!("Run {run_id} is already executing with status {}", existing.status),
                );
            }
            // Parked (e.g. by a shutdown) and not executing: resume it.
            tracing::info!(run_id = %run_id, status = %existing.status, "Resuming parked run");
            existing
        }
        Ok(None) => {
            let fresh = WorkflowState::new(&run_id, request.task_description.trim());
            if let Err(e) = state.store.set(&run_id, &fresh).await {
                tracing::error!(run_id = %run_id, error = %e, "Failed to persist new run");
                return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
            }
            fresh
        }
        Err(e) => {
            tracing::error!(run_id = %run_id, error = %e, "Store lookup failed");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    };

    if let Err(e) =
        RunRegistry::spawn(&state.runs, &run_id, Arc::clone(&state.controller)).await
    {
        tracing::error!(run_id = %run_id, error = %e, "Failed to spawn run");
        return error_response(StatusCode::CONFLICT, e.to_string());
    }

    tracing::info!(run_id = %run_id, "Run accepted");
    (StatusCode::ACCEPTED, Json(workflow_state)).into_response()
}

async fn list_runs(State(state): State<Arc<AppState>>) -> Response {
    match state.store.list_run_ids().await {
        Ok(run_ids) => (StatusCode::OK, Json(json!({ "run_ids": run_ids }))).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Run listing failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn get_run(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> Response {
    match state.store.get(&run_id).await {
        Ok(Some(workflow_state)) => (StatusCode::OK, Json(workflow_state)).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, format!("Unknown run: {run_id}")),
        Err(e) => {
            tracing::error!(run_id = %run_id, error = %e, "Store lookup failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn post_human_input(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
    Json(payload): Json<serde_json::Value>,
) -> Response {
    let workflow_state = match state.store.get(&run_id).await {
        Ok(Some(s)) => s,
        Ok(None) => return error_response(StatusCode::NOT_FOUND, format!("Unknown run: {run_id}")),
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };

    if workflow_state.status != RunStatus::NeedsHumanInput {
        return error_response(
            StatusCode::CONFLICT,
            format!(
                "Run {run_id} is not awaiting human input (status {})",
                workflow_state.status
            ),
        );
    }

    if let Err(e) = state.steps.signal(&human_input_signal(&run_id), payload).await {
        tracing::error!(run_id = %run_id, error = %e, "Failed to deliver human input");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }

    tracing::info!(run_id = %run_id, "Human input delivered");
    (StatusCode::ACCEPTED, Json(json!({ "delivered": true }))).into_response()
}
