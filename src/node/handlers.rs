use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::trace::TraceLayer;

use super::state::NodeState;

#[derive(Serialize)]
struct ExpertList {
    experts: Vec<String>,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Health check endpoint
pub async fn health() -> impl IntoResponse {
    StatusCode::OK
}

/// Node description endpoint
pub async fn info(State(state): State<NodeState>) -> impl IntoResponse {
    Json(state.info.as_ref().clone())
}

/// Hosted expert uids
pub async fn list_experts(State(state): State<NodeState>) -> impl IntoResponse {
    Json(ExpertList {
        experts: state.expert_uids(),
    })
}

/// Single expert backend
pub async fn get_expert(
    State(state): State<NodeState>,
    Path(uid): Path<String>,
) -> impl IntoResponse {
    match state.expert(&uid) {
        Some(backend) => (StatusCode::OK, Json(backend.clone())).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorBody {
                error: format!("expert '{}' is not hosted here", uid),
            }),
        )
            .into_response(),
    }
}

/// Create the Axum router. At most `num_handlers` requests are served at once.
pub fn create_router(state: NodeState) -> Router {
    let num_handlers = state.info.num_handlers.max(1);
    Router::new()
        .route("/health", get(health))
        .route("/info", get(info))
        .route("/experts", get(list_experts))
        .route("/experts/{uid}", get(get_expert))
        .with_state(state)
        .layer(GlobalConcurrencyLimitLayer::new(num_handlers))
        .layer(TraceLayer::new_for_http())
}
