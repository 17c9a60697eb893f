//! Stratification
//!
//! Each strongly connected component of the dependency graph becomes one
//! stratum. Strata are evaluated in emission order, so every negated or
//! aggregated predicate is complete before anything reads it.

use serde::Serialize;

use super::graph::DependencyGraph;
use super::program::PredId;
use crate::ruleset::{CompileError, CompileResult};

/// What stratification needs to know about a rule
#[derive(Debug, Clone, Copy)]
pub struct RuleSummary<'a> {
    pub id: &'a str,
    pub head: PredId,
    pub aggregate: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stratum {
    /// Predicates defined in this stratum, ascending
    pub preds: Vec<PredId>,
    /// Rule indexes in declaration order
    pub rules: Vec<usize>,
    /// More than one predicate, or a predicate that depends on itself
    pub recursive: bool,
}

/// Splits the graph into strata and rejects unstratifiable programs.
pub fn stratify(
    graph: &DependencyGraph,
    rules: &[RuleSummary<'_>],
    names: &[String],
) -> CompileResult<Vec<Stratum>> {
    let components = graph.sccs();

    let mut component_of = vec![usize::MAX; names.len()];
    for (c, preds) in components.iter().enumerate() {
        for &p in preds {
            component_of[p] = c;
        }
    }

    let mut strata = Vec::with_capacity(components.len());
    for (c, preds) in components.into_iter().enumerate() {
        let recursive = preds.len() > 1 || preds.iter().any(|&p| graph.has_self_loop(p));

        for &p in &preds {
            if let Some(edge) = graph
                .edges(p)
                .iter()
                .find(|e| e.negative && component_of[e.to] == c)
            {
                let mut cycle: Vec<String> = preds.iter().map(|&q| names[q].clone()).collect();
                cycle.sort();
                return Err(CompileError::NegativeCycle {
                    rule: rules[edge.rule].id.to_string(),
                    negated: names[edge.to].clone(),
                    cycle,
                });
            }
        }

        let stratum_rules: Vec<usize> = rules
            .iter()
            .enumerate()
            .filter(|(_, r)| component_of[r.head] == c)
            .map(|(i, _)| i)
            .collect();

        if recursive {
            if let Some(&i) = stratum_rules.iter().find(|&&i| rules[i].aggregate) {
                return Err(CompileError::AggregateInRecursion {
                    rule: rules[i].id.to_string(),
                    predicate: names[rules[i].head].clone(),
                });
            }
        }

        strata.push(Stratum {
            preds,
            rules: stratum_rules,
            recursive,
        });
    }

    Ok(strata)
}
