//! Compiled program cache
//!
//! Entries are added once per ruleset hash and never removed. Each hash has
//! its own slot mutex, so concurrent first requests for the same hash compile
//! once while other hashes proceed independently. Failed compilations leave
//! the slot empty and the next caller retries.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, TryLockError};

use super::errors::CompileResult;
use crate::analysis::Program;

type Slot = Arc<Mutex<Option<Arc<Program>>>>;

/// Process-wide store of compiled programs keyed by ruleset hash.
pub trait ProgramCache: Send + Sync {
    /// Returns the cached program for `hash`, running `compile` at most once
    /// per hash across all concurrent callers.
    fn get_or_compile(
        &self,
        hash: &str,
        compile: &mut dyn FnMut() -> CompileResult<Program>,
    ) -> CompileResult<Arc<Program>>;

    /// Returns an already compiled program without compiling.
    fn get(&self, hash: &str) -> Option<Arc<Program>>;

    /// Number of compiled programs held
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of times a compile closure actually ran
    fn compilations(&self) -> u64;
}

/// In-memory cache used by the service.
#[derive(Default)]
pub struct InMemoryProgramCache {
    slots: Mutex<HashMap<String, Slot>>,
    compilations: AtomicU64,
}

impl InMemoryProgramCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, hash: &str) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(hash.to_string()).or_default())
    }

    fn peek(slot: &Slot) -> Option<Arc<Program>> {
        match slot.try_lock() {
            Ok(guard) => guard.clone(),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().clone(),
            Err(TryLockError::WouldBlock) => None,
        }
    }
}

impl ProgramCache for InMemoryProgramCache {
    fn get_or_compile(
        &self,
        hash: &str,
        compile: &mut dyn FnMut() -> CompileResult<Program>,
    ) -> CompileResult<Arc<Program>> {
        let slot = self.slot(hash);
        let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(program) = guard.as_ref() {
            return Ok(Arc::clone(program));
        }

        self.compilations.fetch_add(1, Ordering::Relaxed);
        let program = Arc::new(compile()?);
        *guard = Some(Arc::clone(&program));
        Ok(program)
    }

    fn get(&self, hash: &str) -> Option<Arc<Program>> {
        let slot = {
            let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.get(hash).cloned()
        };
        slot.as_ref().and_then(Self::peek)
    }

    fn len(&self) -> usize {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.values().filter(|s| Self::peek(s).is_some()).count()
    }

    fn compilations(&self) -> u64 {
        self.compilations.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ruleset::{CompileError, RuleFile, RulesetSource};
    use crate::analysis::CompileOptions;

    fn source() -> RulesetSource {
        RulesetSource::from_files(vec![RuleFile::new(
            "a.dl",
            "output p(x: id).\np(\"a\").",
        )])
    }

    #[test]
    fn test_compiles_once_per_hash() {
        let cache = InMemoryProgramCache::new();
        let src = source();

        let first = cache
            .get_or_compile(src.hash(), &mut || src.compile(&CompileOptions::default()))
            .unwrap();
        let second = cache
            .get_or_compile(src.hash(), &mut || src.compile(&CompileOptions::default()))
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.compilations(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(src.hash()).is_some());
    }

    #[test]
    fn test_failures_are_not_cached() {
        let cache = InMemoryProgramCache::new();
        let err = cache
            .get_or_compile("h", &mut || Err(CompileError::EmptyRuleset("x".into())))
            .unwrap_err();
        assert_eq!(err.code(), "RB_COMPILE_EMPTY_RULESET");
        assert_eq!(cache.len(), 0);
        assert!(cache.get("h").is_none());

        let src = source();
        cache
            .get_or_compile("h", &mut || src.compile(&CompileOptions::default()))
            .unwrap();
        assert_eq!(cache.compilations(), 2);
        assert_eq!(cache.len(), 1);
    }
}
