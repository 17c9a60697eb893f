//! HTTP API Tests
//!
//! Drives the axum router in-process with `tower::ServiceExt::oneshot`.
//!
//! Test Categories:
//! 1. Kill-switch
//! 2. Load and query round trip
//! 3. Error statuses and bodies
//! 4. Body limits

use std::path::PathBuf;
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use rulesbrain::config::ServiceConfig;
use rulesbrain::http_server::HttpServer;
use rulesbrain::service::RulesService;

fn app(enabled: bool, max_facts: usize) -> (Arc<RulesService>, Router) {
    app_with(ServiceConfig {
        enabled,
        window_max_facts: max_facts,
        ..ServiceConfig::default()
    })
}

fn app_with(config: ServiceConfig) -> (Arc<RulesService>, Router) {
    let config = ServiceConfig {
        rules_dir: PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("rules"),
        ..config
    };
    let service = Arc::new(RulesService::new(config));
    let router = HttpServer::new(Arc::clone(&service)).router();
    (service, router)
}

async fn send(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    let response = router.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

fn load_body(hash: &str, facts: Value) -> Value {
    json!({ "ruleset_hash": hash, "facts": facts, "as_of": 1_700_000_000 })
}

fn phash_facts() -> Value {
    json!([
        {"pred": "img_phash", "args": ["c1", "F00DBABE", 42]},
        {"pred": "img_phash", "args": ["c2", "F00DBABC", 42]}
    ])
}

// =============================================================================
// KILL-SWITCH
// =============================================================================

/// Test: with the kill-switch off, healthz answers and everything else is 503.
#[tokio::test]
async fn test_disabled_service() {
    let (_service, router) = app(false, 100);

    let (status, body) = send(&router, Method::GET, "/healthz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["enabled"], false);
    assert_eq!(body["status"], "ok");

    let (status, body) = send(
        &router,
        Method::POST,
        "/query",
        Some(json!({"predicate": "valid_card", "args": []})),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["kind"], "Disabled");

    let (status, _) = send(&router, Method::POST, "/facts:load", Some(load_body("x", json!([])))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let (status, _) = send(&router, Method::GET, "/metrics", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

// =============================================================================
// ROUND TRIP
// =============================================================================

/// Test: load facts, query with explain, and see the counters move.
#[tokio::test]
async fn test_load_and_query() {
    let (service, router) = app(true, 100);
    let hash = service.ruleset_hash().unwrap();

    let (status, body) = send(&router, Method::POST, "/facts:load", Some(load_body(&hash, phash_facts()))).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["admitted"], 2);
    assert_eq!(body["ruleset_hash"], hash.as_str());
    assert_eq!(body["session"], "default");

    let (status, body) = send(
        &router,
        Method::POST,
        "/query",
        Some(json!({"predicate": "duplicate_of", "args": ["c1", "_"], "explain": true})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["rows"], json!([["c1", "c2"]]));

    let provenance = &body["provenance"][0];
    assert_eq!(provenance["rule_id"], "duplicates.dl#1");
    assert_eq!(provenance["facts"][0]["ref"], 0);
    assert_eq!(provenance["facts"][1]["ref"], 1);
    assert_eq!(provenance["facts"][1]["args"][1], "F00DBABC");

    let (status, metrics) = send(&router, Method::GET, "/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(metrics["facts_loaded"], 2);
    assert_eq!(metrics["queries_evaluated"], 1);

    let (_, health) = send(&router, Method::GET, "/healthz", None).await;
    assert_eq!(health["ruleset_hash"], hash.as_str());
    assert_eq!(health["sessions"], 1);
}

/// Test: without explain the response has no provenance key.
#[tokio::test]
async fn test_query_without_explain() {
    let (service, router) = app(true, 100);
    let hash = service.ruleset_hash().unwrap();
    send(&router, Method::POST, "/facts:load", Some(load_body(&hash, phash_facts()))).await;

    let (status, body) = send(
        &router,
        Method::POST,
        "/query",
        Some(json!({"predicate": "duplicate_of", "args": []})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.get("provenance").is_none());
    assert!(body["ms_eval"].is_u64());
}

// =============================================================================
// ERRORS
// =============================================================================

/// Test: a stale ruleset hash is a conflict naming the current hash.
#[tokio::test]
async fn test_ruleset_mismatch() {
    let (service, router) = app(true, 100);
    let (status, body) = send(&router, Method::POST, "/facts:load", Some(load_body("stale", phash_facts()))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "RulesetMismatch");
    assert!(body["error"].as_str().unwrap().contains(&service.ruleset_hash().unwrap()));
}

/// Test: oversize batches are refused before anything else.
#[tokio::test]
async fn test_window_exceeded() {
    let (_service, router) = app(true, 1);
    let (status, body) = send(&router, Method::POST, "/facts:load", Some(load_body("stale", phash_facts()))).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["kind"], "WindowExceeded");
    assert_eq!(body["code"], "RB_WINDOW_EXCEEDED");
}

/// Test: unknown predicates are 400, wrong shapes 422.
#[tokio::test]
async fn test_validation_statuses() {
    let (service, router) = app(true, 100);
    let hash = service.ruleset_hash().unwrap();

    let facts = json!([{"pred": "secret_table", "args": ["c1"]}]);
    let (status, body) = send(&router, Method::POST, "/facts:load", Some(load_body(&hash, facts))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "UnknownPredicate");

    let facts = json!([{"pred": "img_phash", "args": ["c1", "F00DBABE", "42"]}]);
    let (status, body) = send(&router, Method::POST, "/facts:load", Some(load_body(&hash, facts))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["kind"], "ShapeMismatch");

    let (status, body) = send(&router, Method::POST, "/facts:load", Some(json!({"facts": []}))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["kind"], "ShapeMismatch");
}

/// Test: querying a session that was never loaded is 404.
#[tokio::test]
async fn test_unknown_session() {
    let (_service, router) = app(true, 100);
    let (status, body) = send(
        &router,
        Method::POST,
        "/query",
        Some(json!({"predicate": "valid_card", "session": "nobody"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "WindowNotLoaded");
}

/// Test: an unknown pricing strategy is 400.
#[tokio::test]
async fn test_strategy_unknown() {
    let (service, router) = app(true, 100);
    let hash = service.ruleset_hash().unwrap();
    send(&router, Method::POST, "/facts:load", Some(load_body(&hash, json!([])))).await;

    let (status, body) = send(
        &router,
        Method::POST,
        "/query",
        Some(json!({"predicate": "price_for", "args": ["c1", "median", "_"]})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "StrategyUnknown");
}

/// Test: actions other than facts:load are not routed.
#[tokio::test]
async fn test_unknown_action() {
    let (_service, router) = app(true, 100);
    let (status, _) = send(&router, Method::POST, "/facts:purge", Some(json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// =============================================================================
// BODY LIMITS
// =============================================================================

fn sku_facts(count: usize) -> Value {
    let facts: Vec<Value> = (0..count)
        .map(|i| {
            json!({
                "pred": "map_id_to_sku",
                "args": [format!("card-{:036}", i), format!("sku-{:036}", i)]
            })
        })
        .collect();
    Value::Array(facts)
}

/// Test: a window filled to the default cap fits in one request, even though
/// the body is larger than axum's stock 2 MiB limit.
#[tokio::test]
async fn test_full_window_loads() {
    let config = ServiceConfig::default();
    let max = config.window_max_facts;
    let (service, router) = app_with(ServiceConfig {
        enabled: true,
        eval_budget_ms: 30_000,
        ..config
    });
    let body = load_body(&service.ruleset_hash().unwrap(), sku_facts(max));
    assert!(body.to_string().len() > 2 * 1024 * 1024);

    let (status, body) = send(&router, Method::POST, "/facts:load", Some(body)).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["admitted"], max);
}

/// Test: a body over the configured limit is 413, not a shape error.
#[tokio::test]
async fn test_body_over_limit() {
    let (service, router) = app_with(ServiceConfig {
        enabled: true,
        max_body_bytes: Some(1024),
        ..ServiceConfig::default()
    });
    let body = load_body(&service.ruleset_hash().unwrap(), sku_facts(50));
    assert!(body.to_string().len() > 1024);

    let (status, body) = send(&router, Method::POST, "/facts:load", Some(body)).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["kind"], "PayloadTooLarge");
    assert_eq!(body["code"], "RB_PAYLOAD_TOO_LARGE");
    assert_eq!(service.metrics().snapshot().facts_loaded, 0);
}
