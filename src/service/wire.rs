//! Request and response bodies

use serde::{Deserialize, Serialize};

use crate::model::{FactRef, Value};
use crate::store::FactInput;

/// `POST /facts:load`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadFactsRequest {
    /// Hash of the ruleset the client built its facts for
    pub ruleset_hash: String,
    #[serde(default)]
    pub facts: Vec<FactInput>,
    #[serde(default)]
    pub session: Option<String>,
    /// Evaluation time in unix seconds; defaults to the current time
    #[serde(default)]
    pub as_of: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadOutcome {
    pub admitted: usize,
    pub ruleset_hash: String,
    pub session: String,
    /// Tuples derived by the rules
    pub derived: usize,
    pub ms_eval: u64,
}

/// `POST /query`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub predicate: String,
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub explain: bool,
    #[serde(default)]
    pub session: Option<String>,
}

impl QueryRequest {
    pub fn new(predicate: impl Into<String>, args: Vec<serde_json::Value>) -> Self {
        Self {
            predicate: predicate.into(),
            args,
            limit: None,
            explain: false,
            session: None,
        }
    }
}

/// An input fact cited by an explanation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CitedFact {
    #[serde(rename = "ref")]
    pub fact_ref: FactRef,
    pub pred: String,
    pub args: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Explanation {
    pub rule_id: String,
    pub facts: Vec<CitedFact>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResponse {
    pub rows: Vec<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Vec<Explanation>>,
    pub ms_eval: u64,
}

/// `GET /healthz`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub version: &'static str,
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ruleset_hash: Option<String>,
    pub programs_cached: usize,
    pub sessions: usize,
}
