//! Rules HTTP Routes
//!
//! - `POST /facts:load` replaces a session's fact window
//! - `POST /query` reads one whitelisted output predicate
//!
//! Work runs on the blocking pool under the evaluation budget. When the
//! budget runs out the request's cancel token is tripped and the client gets
//! `Timeout`; a panic in the work becomes `Internal`. Both are logged with
//! a per-request id.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use uuid::Uuid;

use super::errors::ApiError;
use crate::eval::CancelToken;
use crate::observability::{log_event, Event};
use crate::service::{LoadFactsRequest, QueryRequest, RulesService, ServiceError, ServiceResult};

pub const LOAD_ACTION: &str = "facts:load";

pub fn rules_routes() -> Router<Arc<RulesService>> {
    Router::new()
        .route("/query", post(query_handler))
        .route("/:action", post(action_handler))
}

/// Refuses every request while the kill-switch is off.
pub async fn kill_switch(
    State(service): State<Arc<RulesService>>,
    request: Request,
    next: Next,
) -> Response {
    if !service.is_enabled() {
        log_event(Event::KillSwitchRefused, &[("path", request.uri().path())]);
        return ApiError(ServiceError::Disabled).into_response();
    }
    next.run(request).await
}

async fn action_handler(
    State(service): State<Arc<RulesService>>,
    Path(action): Path<String>,
    body: Result<Json<LoadFactsRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    if action != LOAD_ACTION {
        return Ok((
            axum::http::StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("unknown action '{}'", action) })),
        )
            .into_response());
    }
    let Json(req) = body?;
    let outcome = run_blocking(service, move |svc, cancel| svc.load_facts(&req, cancel)).await?;
    Ok(Json(outcome).into_response())
}

async fn query_handler(
    State(service): State<Arc<RulesService>>,
    body: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = body?;
    let response = run_blocking(service, move |svc, cancel| svc.query(&req, cancel)).await?;
    Ok(Json(response).into_response())
}

async fn run_blocking<T, F>(service: Arc<RulesService>, work: F) -> ServiceResult<T>
where
    T: Send + 'static,
    F: FnOnce(&RulesService, &CancelToken) -> ServiceResult<T> + Send + 'static,
{
    let request_id = Uuid::new_v4().to_string();
    let budget = service.config().eval_budget();
    let cancel = CancelToken::with_timeout(budget);
    let token = cancel.clone();
    let task = tokio::task::spawn_blocking(move || work(&service, &token));

    match tokio::time::timeout(budget, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => {
            let reason = join_err.to_string();
            log_event(
                Event::RequestFailed,
                &[("request_id", &request_id), ("reason", &reason)],
            );
            Err(ServiceError::internal(format!("request task failed: {}", reason)))
        }
        Err(_) => {
            cancel.cancel();
            log_event(
                Event::EvalCancelled,
                &[
                    ("request_id", &request_id),
                    ("budget_ms", &budget.as_millis().to_string()),
                ],
            );
            Err(ServiceError::Timeout)
        }
    }
}
