//! Queries over a materialized model

use std::sync::Arc;

use super::errors::{EvalError, EvalResult};
use super::evaluator::Model;
use super::provenance::{Origin, ProvenanceRecord};
use crate::model::Value;

/// Typed argument pattern for one output predicate
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPattern {
    pub predicate: String,
    /// `None` matches any value
    pub args: Vec<Option<Value>>,
    /// `None` or `Some(0)` returns every match
    pub limit: Option<usize>,
    pub explain: bool,
}

impl QueryPattern {
    pub fn new(predicate: impl Into<String>, args: Vec<Option<Value>>) -> Self {
        Self {
            predicate: predicate.into(),
            args,
            limit: None,
            explain: false,
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn explain(mut self) -> Self {
        self.explain = true;
        self
    }

    fn matches(&self, row: &[Value]) -> bool {
        self.args
            .iter()
            .zip(row)
            .all(|(want, have)| want.as_ref().map_or(true, |w| w == have))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    /// Matching rows in insertion order
    pub rows: Vec<Arc<[Value]>>,
    /// One record per row when explain was requested
    pub provenance: Option<Vec<ProvenanceRecord>>,
}

/// Filters the materialized relation of `pattern.predicate`.
pub fn run_query(model: &Model, pattern: &QueryPattern) -> EvalResult<QueryResult> {
    let program = model.program();
    let pred = program.pred_id(&pattern.predicate).ok_or_else(|| {
        EvalError::Internal(format!("unknown predicate '{}'", pattern.predicate))
    })?;
    let relation = model.relation(pred);

    if pattern.args.len() != relation.arity() {
        return Err(EvalError::Internal(format!(
            "pattern for '{}' has {} arguments, expected {}",
            pattern.predicate,
            pattern.args.len(),
            relation.arity()
        )));
    }

    let limit = pattern.limit.filter(|&n| n > 0).unwrap_or(usize::MAX);
    let hits: Vec<usize> = relation
        .rows()
        .iter()
        .enumerate()
        .filter(|(_, row)| pattern.matches(row))
        .map(|(id, _)| id)
        .take(limit)
        .collect();

    let provenance = pattern.explain.then(|| {
        hits.iter()
            .map(|&id| match relation.origin(id) {
                Origin::Derived(p) => ProvenanceRecord {
                    rule_id: program.rules()[p.rule].id.clone(),
                    facts: p.facts.to_vec(),
                },
                Origin::Fact(r) => ProvenanceRecord {
                    rule_id: "fact".to_string(),
                    facts: vec![*r],
                },
            })
            .collect()
    });

    Ok(QueryResult {
        rows: hits.iter().map(|&id| Arc::clone(relation.row(id))).collect(),
        provenance,
    })
}
