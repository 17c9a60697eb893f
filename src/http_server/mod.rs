//! # HTTP Server Module
//!
//! # Endpoints
//!
//! - `GET /healthz` - Health check, always served
//! - `GET /metrics` - Counters and per-predicate latency
//! - `POST /facts:load` - Load a fact window
//! - `POST /query` - Query an output predicate

pub mod config;
mod errors;
pub mod observability_routes;
pub mod rules_routes;
pub mod server;

pub use config::HttpServerConfig;
pub use errors::{ApiError, ErrorBody};
pub use server::{build_router, HttpServer};
