//! Session registry
//!
//! Each session name maps to the latest loaded window and its model. Loading
//! replaces the whole entry at once; readers holding the previous `Arc` keep
//! a consistent view until they drop it.
//!
//! The registry holds at most `capacity` sessions. Loading a new name into a
//! full registry evicts the least recently loaded session.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};

use super::window::FactWindow;
use crate::eval::Model;

pub const DEFAULT_SESSION: &str = "default";

#[derive(Debug)]
pub struct Session {
    pub name: String,
    pub window: FactWindow,
    pub model: Model,
    pub loaded_at: DateTime<Utc>,
}

/// What an install displaced
#[derive(Debug, Default)]
pub struct Replaced {
    /// The previous session of the same name
    pub previous: Option<Arc<Session>>,
    /// A different session dropped to stay within capacity
    pub evicted: Option<Arc<Session>>,
}

#[derive(Debug, Default)]
struct Slots {
    /// name -> (load sequence number, session)
    entries: HashMap<String, (u64, Arc<Session>)>,
    next_seq: u64,
}

#[derive(Debug)]
pub struct SessionRegistry {
    slots: RwLock<Slots>,
    capacity: usize,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::with_capacity(usize::MAX)
    }
}

impl SessionRegistry {
    /// Unbounded registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding at most `capacity` sessions (at least one).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: RwLock::new(Slots::default()),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn get(&self, name: &str) -> Option<Arc<Session>> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots.entries.get(name).map(|(_, session)| Arc::clone(session))
    }

    /// Installs `session`. A new name in a full registry first evicts the
    /// least recently loaded session.
    pub fn replace(&self, session: Session) -> Replaced {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);

        let mut evicted = None;
        if !slots.entries.contains_key(&session.name) && slots.entries.len() >= self.capacity {
            let oldest = slots
                .entries
                .iter()
                .min_by_key(|(_, (seq, _))| *seq)
                .map(|(name, _)| name.clone());
            if let Some(name) = oldest {
                evicted = slots.entries.remove(&name).map(|(_, s)| s);
            }
        }

        let seq = slots.next_seq;
        slots.next_seq += 1;
        let previous = slots
            .entries
            .insert(session.name.clone(), (seq, Arc::new(session)))
            .map(|(_, s)| s);

        Replaced { previous, evicted }
    }

    pub fn len(&self) -> usize {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn names(&self) -> Vec<String> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = slots.entries.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::CompileOptions;
    use crate::eval::{evaluate, CancelToken, Params};
    use crate::ruleset::{RuleFile, RulesetSource};
    use crate::store::{AcceptAll, FactInput};
    use serde_json::json;

    fn session(name: &str, cards: &[&str]) -> Session {
        let program = Arc::new(
            RulesetSource::from_files(vec![RuleFile::new(
                "a.dl",
                "input seen(card: id).\noutput hit(card: id).\nhit(C) :- seen(C).",
            )])
            .compile(&CompileOptions::default())
            .unwrap(),
        );
        let batch: Vec<FactInput> = cards
            .iter()
            .map(|c| FactInput::new("seen", vec![json!(c)]))
            .collect();
        let window = FactWindow::admit(&program, &batch, 100, &AcceptAll).unwrap();
        let model = evaluate(program, window.facts(), &Params::new(), &CancelToken::new()).unwrap();
        Session {
            name: name.to_string(),
            window,
            model,
            loaded_at: Utc::now(),
        }
    }

    #[test]
    fn test_replace_on_load() {
        let registry = SessionRegistry::new();
        assert!(registry.replace(session(DEFAULT_SESSION, &["c1"])).previous.is_none());

        let held = registry.get(DEFAULT_SESSION).unwrap();
        let replaced = registry.replace(session(DEFAULT_SESSION, &["c2", "c3"]));
        assert!(replaced.evicted.is_none());
        let old = replaced.previous.unwrap();

        assert!(Arc::ptr_eq(&held, &old));
        assert_eq!(held.window.len(), 1);
        assert_eq!(registry.get(DEFAULT_SESSION).unwrap().window.len(), 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_sessions_are_independent() {
        let registry = SessionRegistry::new();
        registry.replace(session("a", &["c1"]));
        registry.replace(session("b", &["c2"]));
        assert_eq!(registry.names(), vec!["a".to_string(), "b".to_string()]);
        assert!(registry.get("c").is_none());
    }

    #[test]
    fn test_capacity_evicts_least_recently_loaded() {
        let registry = SessionRegistry::with_capacity(2);
        registry.replace(session("a", &["c1"]));
        registry.replace(session("b", &["c2"]));
        // reloading "a" makes "b" the oldest
        assert!(registry.replace(session("a", &["c3"])).evicted.is_none());

        let replaced = registry.replace(session("c", &["c4"]));
        assert_eq!(replaced.evicted.map(|s| s.name.clone()), Some("b".to_string()));
        assert!(replaced.previous.is_none());
        assert_eq!(registry.names(), vec!["a".to_string(), "c".to_string()]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_zero_capacity_keeps_one() {
        let registry = SessionRegistry::with_capacity(0);
        registry.replace(session("a", &["c1"]));
        registry.replace(session("b", &["c2"]));
        assert_eq!(registry.names(), vec!["b".to_string()]);
    }
}
