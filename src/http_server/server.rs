//! # HTTP Server
//!
//! Combines the health, metrics and rules routers into one axum app.
//! Request bodies on the gated routes are capped by `ServiceConfig::body_limit`,
//! which is sized to fit a full fact window.

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::{middleware, Router};
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use super::config::HttpServerConfig;
use super::observability_routes::{health_routes, metrics_routes};
use super::rules_routes::{kill_switch, rules_routes};
use crate::observability::{log_event, Event};
use crate::service::RulesService;

pub struct HttpServer {
    config: HttpServerConfig,
    router: Router,
}

impl HttpServer {
    /// Serves `service` on its configured address.
    pub fn new(service: Arc<RulesService>) -> Self {
        let config = service.config().http.clone();
        Self::with_config(config, service)
    }

    pub fn with_config(config: HttpServerConfig, service: Arc<RulesService>) -> Self {
        let router = build_router(&config, service);
        Self { config, router }
    }

    pub fn config(&self) -> &HttpServerConfig {
        &self.config
    }

    /// The app router, for driving requests in tests
    pub fn router(self) -> Router {
        self.router
    }

    /// Binds and serves until ctrl-c.
    pub async fn start(self) -> Result<(), std::io::Error> {
        let addr = self
            .config
            .socket_addr()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

        let listener = TcpListener::bind(addr).await?;
        log_event(Event::Serving, &[("addr", &addr.to_string())]);

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await
    }
}

/// Builds the router. Everything except `/healthz` sits behind the kill-switch.
pub fn build_router(config: &HttpServerConfig, service: Arc<RulesService>) -> Router {
    let cors = if config.cors_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = config
            .cors_origins
            .iter()
            .filter_map(|s| s.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    };

    let gated = Router::new()
        .merge(metrics_routes())
        .merge(rules_routes())
        .layer(DefaultBodyLimit::max(service.config().body_limit()))
        .route_layer(middleware::from_fn_with_state(Arc::clone(&service), kill_switch));

    Router::new()
        .merge(health_routes())
        .merge(gated)
        .layer(cors)
        .with_state(service)
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
