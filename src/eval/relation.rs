//! In-memory relations
//!
//! Rows are append-only and keep insertion order. A row id is its position,
//! so the rows added during a fixpoint round form a contiguous range. Hash
//! indexes are declared up front and maintained on every insert.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use super::provenance::Origin;
use crate::model::Value;

pub type RowId = usize;

type Index = HashMap<Vec<Value>, Vec<RowId>>;

#[derive(Debug, Clone)]
pub struct Relation {
    arity: usize,
    rows: Vec<Arc<[Value]>>,
    origins: Vec<Origin>,
    seen: HashMap<Arc<[Value]>, RowId>,
    indexes: HashMap<Vec<usize>, Index>,
}

impl Relation {
    /// Creates an empty relation with hash indexes on each column set.
    pub fn new(arity: usize, index_cols: &[Vec<usize>]) -> Self {
        Self {
            arity,
            rows: Vec::new(),
            origins: Vec::new(),
            seen: HashMap::new(),
            indexes: index_cols
                .iter()
                .map(|cols| (cols.clone(), Index::new()))
                .collect(),
        }
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, id: RowId) -> &Arc<[Value]> {
        &self.rows[id]
    }

    pub fn origin(&self, id: RowId) -> &Origin {
        &self.origins[id]
    }

    pub fn rows(&self) -> &[Arc<[Value]>] {
        &self.rows
    }

    pub fn contains(&self, row: &[Value]) -> bool {
        self.seen.contains_key(row)
    }

    /// Adds a row. Returns false, keeping the first origin, when it is
    /// already present.
    pub fn insert(&mut self, row: Vec<Value>, origin: Origin) -> bool {
        if self.seen.contains_key(row.as_slice()) {
            return false;
        }

        let id = self.rows.len();
        let row: Arc<[Value]> = row.into();
        for (cols, index) in self.indexes.iter_mut() {
            let key: Vec<Value> = cols.iter().map(|&c| row[c].clone()).collect();
            index.entry(key).or_default().push(id);
        }
        self.seen.insert(Arc::clone(&row), id);
        self.rows.push(row);
        self.origins.push(origin);
        true
    }

    /// Rows whose `cols` equal `key`, restricted to ids in `window`,
    /// in insertion order.
    ///
    /// Empty `cols` scans; a key over every column is a direct lookup.
    /// Column sets without a declared index fall back to a filtered scan.
    pub fn candidates<'a>(&'a self, cols: &'a [usize], key: &'a [Value], window: Range<RowId>) -> Candidates<'a> {
        let window = window.start..window.end.min(self.rows.len());

        if cols.is_empty() {
            return Candidates::Range(window);
        }
        if cols.len() == self.arity && cols.iter().enumerate().all(|(i, &c)| i == c) {
            let hit = self.seen.get(key).copied().filter(|id| window.contains(id));
            return Candidates::One(hit);
        }
        match self.indexes.get(cols) {
            Some(index) => Candidates::Ids {
                ids: index.get(key).map(Vec::as_slice).unwrap_or(&[]).iter(),
                window,
            },
            None => Candidates::Scan {
                relation: self,
                cols,
                key,
                next: window.start,
                end: window.end,
            },
        }
    }
}

/// Iterator over matching row ids
pub enum Candidates<'a> {
    Range(Range<RowId>),
    One(Option<RowId>),
    Ids {
        ids: std::slice::Iter<'a, RowId>,
        window: Range<RowId>,
    },
    Scan {
        relation: &'a Relation,
        cols: &'a [usize],
        key: &'a [Value],
        next: RowId,
        end: RowId,
    },
}

impl Iterator for Candidates<'_> {
    type Item = RowId;

    fn next(&mut self) -> Option<RowId> {
        match self {
            Candidates::Range(range) => range.next(),
            Candidates::One(hit) => hit.take(),
            Candidates::Ids { ids, window } => ids.by_ref().copied().find(|id| window.contains(id)),
            Candidates::Scan {
                relation,
                cols,
                key,
                next,
                end,
            } => {
                while *next < *end {
                    let id = *next;
                    *next += 1;
                    let row = &relation.rows[id];
                    if cols.iter().zip(key.iter()).all(|(&c, k)| &row[c] == k) {
                        return Some(id);
                    }
                }
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rel() -> Relation {
        let mut r = Relation::new(2, &[vec![1]]);
        r.insert(vec![Value::id("a"), Value::Num(1.0)], Origin::Fact(0));
        r.insert(vec![Value::id("b"), Value::Num(2.0)], Origin::Fact(1));
        r.insert(vec![Value::id("c"), Value::Num(1.0)], Origin::Fact(2));
        r
    }

    #[test]
    fn test_duplicates_keep_first_origin() {
        let mut r = rel();
        assert!(!r.insert(vec![Value::id("a"), Value::Num(1.0)], Origin::Fact(9)));
        assert_eq!(r.len(), 3);
        assert_eq!(r.origin(0), &Origin::Fact(0));
    }

    #[test]
    fn test_index_lookup_in_insertion_order() {
        let r = rel();
        let key = [Value::Num(1.0)];
        let ids: Vec<_> = r.candidates(&[1], &key, 0..r.len()).collect();
        assert_eq!(ids, vec![0, 2]);
    }

    #[test]
    fn test_window_restricts_rows() {
        let r = rel();
        let key = [Value::Num(1.0)];
        let ids: Vec<_> = r.candidates(&[1], &key, 1..3).collect();
        assert_eq!(ids, vec![2]);
        let all: Vec<_> = r.candidates(&[], &[], 1..10).collect();
        assert_eq!(all, vec![1, 2]);
    }

    #[test]
    fn test_full_key_and_unindexed_scan() {
        let r = rel();
        let key = [Value::id("b"), Value::Num(2.0)];
        assert_eq!(r.candidates(&[0, 1], &key, 0..3).collect::<Vec<_>>(), vec![1]);
        assert_eq!(r.candidates(&[0, 1], &key, 2..3).count(), 0);

        let key = [Value::id("c")];
        assert_eq!(r.candidates(&[0], &key, 0..3).collect::<Vec<_>>(), vec![2]);
    }
}
