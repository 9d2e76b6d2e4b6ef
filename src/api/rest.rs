//! REST API Handlers
//!
//! Read-only endpoints over the controller's status store.

use crate::controller::{DeploymentRecord, StatusStore};
use crate::drain::NodeReport;
use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::debug;

// =============================================================================
// Response Types
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentListResponse {
    pub deployments: Vec<DeploymentRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatusResponse {
    pub name: String,
    #[serde(flatten)]
    pub report: NodeReport,
}

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorResponse {
    pub error: String,
    pub message: String,
}

// =============================================================================
// REST Router
// =============================================================================

/// REST API router builder
pub struct RestRouter {
    status: Arc<StatusStore>,
}

impl RestRouter {
    pub fn new(status: Arc<StatusStore>) -> Self {
        Self { status }
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        let state = AppState {
            status: self.status,
        };

        Router::new()
            .route("/v1/deployments", get(list_deployments))
            .route("/v1/deployments/:name", get(get_deployment))
            .route("/v1/nodes", get(list_nodes))
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}

#[derive(Clone)]
struct AppState {
    status: Arc<StatusStore>,
}

// =============================================================================
// Handlers
// =============================================================================

async fn list_deployments(State(state): State<AppState>) -> impl IntoResponse {
    Json(DeploymentListResponse {
        deployments: state.status.deployments(),
    })
}

async fn get_deployment(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    debug!(deployment = %name, "Status lookup");
    match state.status.deployment(&name) {
        Some(record) => (StatusCode::OK, Json(record)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ApiErrorResponse {
                error: "not_found".into(),
                message: format!("Deployment {} has not been reconciled", name),
            }),
        )
            .into_response(),
    }
}

async fn list_nodes(State(state): State<AppState>) -> impl IntoResponse {
    let nodes: Vec<NodeStatusResponse> = state
        .status
        .nodes()
        .into_iter()
        .map(|(name, report)| NodeStatusResponse { name, report })
        .collect();
    Json(nodes)
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Ready once the first pass has been recorded
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    if state.status.is_ready() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "no pass completed yet")
    }
}
