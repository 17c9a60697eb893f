//! Query Evaluator
//!
//! Principles:
//! - Materialize once per fact window; queries only read
//! - Deterministic: same program, facts and parameters give the same rows,
//!   in the same order, with the same provenance
//! - Cooperative cancellation between rules, rounds and batches of rows

mod builtins;
mod cancel;
mod errors;
mod evaluator;
mod provenance;
mod query;
mod relation;

use std::collections::HashMap;

pub use builtins::{compare, eval_expr, Builtin};
pub use cancel::CancelToken;
pub use errors::{EvalError, EvalResult};
pub use evaluator::{evaluate, Model};
pub use provenance::{merge_facts, Origin, Provenance, ProvenanceRecord};
pub use query::{run_query, QueryPattern, QueryResult};
pub use relation::{Candidates, Relation, RowId};

use crate::model::Value;

/// Runtime parameter bindings (`$name`)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    values: HashMap<String, Value>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
