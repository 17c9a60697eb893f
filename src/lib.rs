//! rulesbrain - deterministic rule evaluation over card facts
//!
//! A client loads a bounded window of facts tagged with the current ruleset
//! hash, then queries whitelisted output predicates of the materialized model.

pub mod analysis;
pub mod cli;
pub mod config;
pub mod domain;
pub mod eval;
pub mod http_server;
pub mod model;
pub mod observability;
pub mod ruleset;
pub mod service;
pub mod store;
