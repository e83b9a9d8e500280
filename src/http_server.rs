//! HTTP server implementation using Axum.

use crate::error::EngineError;
use crate::runner::ExecutionResult;
use crate::state::AppState;
use crate::store::AssignmentSummary;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

// Request/Response types
#[derive(Deserialize)]
struct CreateAssignmentRequest {
    assignment_name: String,
    language: String,
    #[serde(default)]
    requirements: Vec<String>,
}

#[derive(Serialize)]
struct CreateAssignmentResponse {
    message: String,
    assignment_name: String,
    language: String,
    requirements: Vec<String>,
}

#[derive(Deserialize)]
struct ExecuteRequest {
    assignment_name: String,
    code: String,
}

#[derive(Serialize)]
struct ListResponse {
    assignments: Vec<AssignmentSummary>,
}

/// Engine error rendered as `{"detail": ...}` with a matching status code.
struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngineError::Validation(_) => StatusCode::BAD_REQUEST,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self.0, "Request failed");
        }
        (status, Json(json!({ "detail": self.0.to_string() }))).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/create/assignment", post(create_assignment))
        .route("/execute/code", post(execute_code))
        .route("/delete/assignment/:name", delete(delete_assignment))
        .route("/list/assignments", get(list_assignments))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP server on the given port with the provided state.
pub async fn run_server(port: u16, state: AppState) -> std::io::Result<()> {
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({ "message": "Code Execution API is running" }))
}

async fn health() -> &'static str {
    "OK"
}

async fn create_assignment(
    State(state): State<AppState>,
    Json(req): Json<CreateAssignmentRequest>,
) -> Result<Json<CreateAssignmentResponse>, ApiError> {
    let created = state
        .manager
        .create(&req.assignment_name, &req.language, req.requirements)
        .await?;

    Ok(Json(CreateAssignmentResponse {
        message: format!("Assignment '{}' created successfully", created.name),
        assignment_name: created.name,
        language: created.language.to_string(),
        requirements: created.requirements,
    }))
}

async fn execute_code(
    State(state): State<AppState>,
    Json(req): Json<ExecuteRequest>,
) -> Result<Json<ExecutionResult>, ApiError> {
    let result = state.manager.execute(&req.assignment_name, &req.code).await?;
    Ok(Json(result))
}

async fn delete_assignment(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.manager.delete(&name).await?;
    Ok(Json(json!({ "message": format!("Assignment '{}' deleted successfully", name) })))
}

async fn list_assignments(State(state): State<AppState>) -> Result<Json<ListResponse>, ApiError> {
    let assignments = state.manager.list()?;
    Ok(Json(ListResponse { assignments }))
}
