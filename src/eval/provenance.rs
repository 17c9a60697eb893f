//! Derivation provenance
//!
//! Each stored tuple remembers how it first entered its relation. For
//! derived tuples that is the rule and the window positions of every input
//! fact it transitively depends on. Later derivations of the same tuple are
//! ignored.

use std::sync::Arc;

use serde::Serialize;

use crate::model::FactRef;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    /// Rule index in the program
    pub rule: usize,
    /// Sorted, without duplicates
    pub facts: Arc<[FactRef]>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    Fact(FactRef),
    Derived(Provenance),
}

impl Origin {
    /// Input facts this tuple rests on
    pub fn facts(&self) -> &[FactRef] {
        match self {
            Origin::Fact(r) => std::slice::from_ref(r),
            Origin::Derived(p) => &p.facts,
        }
    }
}

/// Merges fact sets into one sorted set.
pub fn merge_facts<'a, I>(sets: I) -> Arc<[FactRef]>
where
    I: IntoIterator<Item = &'a [FactRef]>,
{
    let mut all: Vec<FactRef> = sets.into_iter().flatten().copied().collect();
    all.sort_unstable();
    all.dedup();
    all.into()
}

/// Explanation returned for one query row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvenanceRecord {
    pub rule_id: String,
    pub facts: Vec<FactRef>,
}
