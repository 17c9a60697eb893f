//! Windowed fact store
//!
//! A window is built in one step from a client batch and never changes
//! afterwards. Admission is all-or-nothing: the size cap is checked first,
//! then every fact is validated, and only a fully valid batch becomes a window.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::errors::{StoreResult, WindowError};
use crate::analysis::{Program, ValidationError, Whitelist};
use crate::model::{Fact, FactRef};

/// A fact as submitted over the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactInput {
    pub pred: String,
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
}

impl FactInput {
    pub fn new(pred: impl Into<String>, args: Vec<serde_json::Value>) -> Self {
        Self {
            pred: pred.into(),
            args,
        }
    }
}

/// Domain-specific checks applied after shape validation.
pub trait FactPolicy: Send + Sync {
    fn check(&self, fact: &Fact) -> Result<(), ValidationError>;
}

/// Accepts every well-shaped fact.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl FactPolicy for AcceptAll {
    fn check(&self, _fact: &Fact) -> Result<(), ValidationError> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct FactWindow {
    ruleset_hash: String,
    facts: Vec<Fact>,
    client_facts: usize,
    by_predicate: BTreeMap<String, Vec<FactRef>>,
}

impl FactWindow {
    /// Validates a client batch against `program` and builds a window.
    pub fn admit(
        program: &Program,
        batch: &[FactInput],
        max_facts: usize,
        policy: &dyn FactPolicy,
    ) -> StoreResult<Self> {
        if batch.len() > max_facts {
            return Err(WindowError::WindowExceeded {
                count: batch.len(),
                max: max_facts,
            });
        }

        let whitelist = Whitelist::new(program);
        let facts = batch
            .iter()
            .enumerate()
            .map(|(index, input)| {
                whitelist
                    .fact(&input.pred, &input.args)
                    .and_then(|fact| policy.check(&fact).map(|_| fact))
                    .map_err(|source| WindowError::Invalid { index, source })
            })
            .collect::<StoreResult<Vec<_>>>()?;

        let mut window = Self {
            ruleset_hash: program.hash().to_string(),
            client_facts: facts.len(),
            facts: Vec::with_capacity(facts.len()),
            by_predicate: BTreeMap::new(),
        };
        for fact in facts {
            window.push(fact);
        }
        Ok(window)
    }

    fn push(&mut self, fact: Fact) {
        let r = self.facts.len() as FactRef;
        self.by_predicate.entry(fact.pred.clone()).or_default().push(r);
        self.facts.push(fact);
    }

    /// Appends server-side facts after the client facts. They are not
    /// counted against the cap.
    pub fn append_ambient(&mut self, facts: impl IntoIterator<Item = Fact>) {
        for fact in facts {
            self.push(fact);
        }
    }

    pub fn ruleset_hash(&self) -> &str {
        &self.ruleset_hash
    }

    /// All facts; a fact's position is its `FactRef`.
    pub fn facts(&self) -> &[Fact] {
        &self.facts
    }

    pub fn fact(&self, r: FactRef) -> Option<&Fact> {
        self.facts.get(r as usize)
    }

    /// Number of client-submitted facts
    pub fn client_len(&self) -> usize {
        self.client_facts
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    pub fn facts_for<'a>(&'a self, pred: &str) -> impl Iterator<Item = &'a Fact> + 'a {
        self.by_predicate
            .get(pred)
            .into_iter()
            .flatten()
            .map(move |&r| &self.facts[r as usize])
    }

    /// Fact count per predicate
    pub fn counts(&self) -> BTreeMap<&str, usize> {
        self.by_predicate
            .iter()
            .map(|(pred, refs)| (pred.as_str(), refs.len()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::CompileOptions;
    use crate::model::Value;
    use crate::ruleset::{RuleFile, RulesetSource};
    use serde_json::json;

    fn program() -> Program {
        RulesetSource::from_files(vec![RuleFile::new(
            "a.dl",
            "input seen(card: id, n: number).\noutput hit(card: id).\nhit(C) :- seen(C, _).",
        )])
        .compile(&CompileOptions::default())
        .unwrap()
    }

    fn seen(card: &str, n: f64) -> FactInput {
        FactInput::new("seen", vec![json!(card), json!(n)])
    }

    struct NoNegatives;

    impl FactPolicy for NoNegatives {
        fn check(&self, fact: &Fact) -> Result<(), ValidationError> {
            match fact.args.get(1).and_then(Value::as_number) {
                Some(n) if n < 0.0 => Err(ValidationError::invalid(&fact.pred, "n", "negative")),
                _ => Ok(()),
            }
        }
    }

    #[test]
    fn test_cap_is_inclusive() {
        let program = program();
        let batch = vec![seen("c1", 1.0), seen("c2", 2.0)];

        let window = FactWindow::admit(&program, &batch, 2, &AcceptAll).unwrap();
        assert_eq!(window.client_len(), 2);

        let err = FactWindow::admit(&program, &batch, 1, &AcceptAll).unwrap_err();
        assert_eq!(err, WindowError::WindowExceeded { count: 2, max: 1 });
    }

    #[test]
    fn test_cap_checked_before_validation() {
        let program = program();
        let batch = vec![FactInput::new("bogus", vec![]), seen("c1", 1.0)];
        let err = FactWindow::admit(&program, &batch, 1, &AcceptAll).unwrap_err();
        assert_eq!(err.code(), "RB_WINDOW_EXCEEDED");
    }

    #[test]
    fn test_one_invalid_fact_rejects_batch() {
        let program = program();
        let batch = vec![seen("c1", 1.0), seen("c2", -1.0)];
        let err = FactWindow::admit(&program, &batch, 10, &NoNegatives).unwrap_err();
        match err {
            WindowError::Invalid { index, source } => {
                assert_eq!(index, 1);
                assert!(matches!(source, ValidationError::InvalidValue { .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_ambient_facts_follow_client_facts() {
        let program = program();
        let mut window = FactWindow::admit(&program, &[seen("c1", 1.0)], 1, &AcceptAll).unwrap();
        window.append_ambient([Fact::new("seen", vec![Value::id("c9"), Value::Num(0.0)])]);

        assert_eq!(window.client_len(), 1);
        assert_eq!(window.len(), 2);
        assert_eq!(window.fact(1).unwrap().args[0], Value::id("c9"));
        assert_eq!(window.facts_for("seen").count(), 2);
        assert_eq!(window.counts().get("seen"), Some(&2));
        assert_eq!(window.ruleset_hash(), program.hash());
    }

    #[test]
    fn test_duplicates_are_kept_in_window() {
        let program = program();
        let window =
            FactWindow::admit(&program, &[seen("c1", 1.0), seen("c1", 1.0)], 5, &AcceptAll).unwrap();
        assert_eq!(window.len(), 2);
    }
}
