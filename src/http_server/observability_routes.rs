//! Observability HTTP Routes
//!
//! `GET /healthz` is always served. `GET /metrics` sits behind the
//! kill-switch with the rules routes.

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use crate::service::RulesService;

pub fn health_routes() -> Router<Arc<RulesService>> {
    Router::new().route("/healthz", get(health_handler))
}

pub fn metrics_routes() -> Router<Arc<RulesService>> {
    Router::new().route("/metrics", get(metrics_handler))
}

async fn health_handler(State(service): State<Arc<RulesService>>) -> impl IntoResponse {
    let health = tokio::task::spawn_blocking(move || service.health()).await;
    match health {
        Ok(health) => Json(serde_json::to_value(health).unwrap_or_default()),
        Err(_) => Json(serde_json::json!({ "status": "degraded" })),
    }
}

async fn metrics_handler(State(service): State<Arc<RulesService>>) -> impl IntoResponse {
    Json(service.metrics().to_json())
}
