//! HTTP surface: the deploy endpoint and a health check.
//!
//! Each request runs its job inline and answers when the job reaches a
//! terminal state. Jobs for different tasks run concurrently on the tokio
//! runtime; the orchestrator serializes jobs that share a repository.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::job::DeployResponse;
use crate::pipeline::Deployer;

/// Build the axum router around a deployer.
pub fn router(deployer: Arc<Deployer>) -> Router {
    Router::new()
        .route("/deploy-endpoint", post(deploy))
        // Path used by the first version of the service.
        .route("/api/deploy", post(deploy))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(deployer)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy" }))
}

/// The body is taken as untyped JSON: the secret is checked before the
/// job schema is applied.
async fn deploy(
    State(deployer): State<Arc<Deployer>>,
    body: Result<Json<serde_json::Value>, JsonRejection>,
) -> Response {
    let body = match body {
        Ok(Json(body)) => body,
        Err(rejection) => {
            tracing::warn!(error = %rejection.body_text(), "rejecting unparseable deploy request");
            let resp = DeployResponse::error("invalid_request", rejection.body_text());
            return (rejection.status(), Json(resp)).into_response();
        }
    };

    match deployer.run_request(body).await {
        Ok(outcome) => (StatusCode::OK, Json(outcome.into_response())).into_response(),
        Err(e) => {
            let resp = DeployResponse::error(e.kind(), e.to_string());
            (e.status_code(), Json(resp)).into_response()
        }
    }
}
