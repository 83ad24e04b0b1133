//! HTTP surface for the provisioning pipeline.
//!
//! Thin transport over [`Pipeline`]: each route triggers one orchestrator
//! operation and reports `{"message": ...}` on success or `{"error": ...}`
//! with a matching status code on failure.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Json;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use pgforge_core::artifact::ArtifactKind;
use pgforge_core::pipeline::{Pipeline, PipelineError};
use pgforge_core::request::ProvisioningRequest;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

pub struct AppError {
    status: StatusCode,
    message: String,
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        let status = match &err {
            PipelineError::Request(_) => StatusCode::BAD_REQUEST,
            PipelineError::Stage(_) => StatusCode::CONFLICT,
            PipelineError::ToolFailed { .. } | PipelineError::Parse(_) => StatusCode::BAD_GATEWAY,
            PipelineError::Template(_) | PipelineError::Persistence(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(pipeline: Arc<Pipeline>) -> Router {
    Router::new()
        .route("/generate", post(generate))
        .route("/terraform/apply", post(terraform_apply))
        .route("/ansible/generate", post(ansible_generate))
        .route("/ansible/run", post(ansible_run))
        .route("/status", get(status))
        .layer(CorsLayer::permissive())
        .with_state(pipeline)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run_serve(
    pipeline: Arc<Pipeline>,
    bind: &str,
    port: u16,
    cancel: CancellationToken,
) -> Result<()> {
    let app = build_router(pipeline);
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    tracing::info!("pgforge serve listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel))
        .await?;
    tracing::info!("pgforge serve shut down");
    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
    // Kill any in-flight external tool before the server stops.
    cancel.cancel();
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

fn message(text: &str) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "message": text }))
}

async fn generate(
    State(pipeline): State<Arc<Pipeline>>,
    Json(request): Json<ProvisioningRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    pipeline.generate(&request).await?;
    Ok(message(
        "Terraform and Ansible configurations generated successfully!",
    ))
}

async fn terraform_apply(
    State(pipeline): State<Arc<Pipeline>>,
) -> Result<Json<serde_json::Value>, AppError> {
    pipeline.apply().await?;
    Ok(message("Terraform applied successfully!"))
}

async fn ansible_generate(
    State(pipeline): State<Arc<Pipeline>>,
) -> Result<Json<serde_json::Value>, AppError> {
    pipeline.generate_inventory().await?;
    Ok(message("Ansible inventory generated successfully!"))
}

async fn ansible_run(
    State(pipeline): State<Arc<Pipeline>>,
) -> Result<Json<serde_json::Value>, AppError> {
    pipeline.run_config().await?;
    Ok(message("Ansible playbook executed successfully!"))
}

async fn status(State(pipeline): State<Arc<Pipeline>>) -> Json<serde_json::Value> {
    let store = pipeline.store();
    Json(serde_json::json!({
        "stage": pipeline.stage().await.as_str(),
        "workspace": store.root().display().to_string(),
        "artifacts": {
            "infra": store.exists(ArtifactKind::InfraDefinition),
            "playbook": store.exists(ArtifactKind::ConfigPlaybook),
            "inventory": store.exists(ArtifactKind::HostInventory),
        },
    }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
