//! Evaluation Control Tests
//!
//! Test Categories:
//! 1. Single-flight program compilation
//! 2. Cancellation and deadlines
//! 3. Provenance determinism

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use rulesbrain::analysis::Program;
use rulesbrain::domain::DomainPack;
use rulesbrain::eval::{evaluate, run_query, CancelToken, EvalError, Params, QueryPattern};
use rulesbrain::model::{Fact, Value};
use rulesbrain::ruleset::{InMemoryProgramCache, ProgramCache, RuleFile, RulesetSource};

const PATH_RULES: &str = "input edge(a: id, b: id).\n\
                          output path(a: id, b: id).\n\
                          path(X, Y) :- edge(X, Y).\n\
                          path(X, Z) :- path(X, Y), edge(Y, Z).";

fn source(content: &str) -> RulesetSource {
    RulesetSource::from_files(vec![RuleFile::new("path.dl", content)])
}

fn program(content: &str) -> Arc<Program> {
    Arc::new(source(content).compile(&DomainPack::compile_options()).unwrap())
}

fn chain(n: usize) -> Vec<Fact> {
    (0..n)
        .map(|i| {
            Fact::new(
                "edge",
                vec![Value::id(format!("n{}", i)), Value::id(format!("n{}", i + 1))],
            )
        })
        .collect()
}

// =============================================================================
// SINGLE-FLIGHT COMPILATION
// =============================================================================

/// Test: concurrent first requests for one hash compile exactly once.
#[test]
fn test_concurrent_compiles_run_once() {
    const THREADS: usize = 8;
    let cache = Arc::new(InMemoryProgramCache::new());
    let barrier = Arc::new(Barrier::new(THREADS));
    let src = source(PATH_RULES);

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            let src = src.clone();
            thread::spawn(move || {
                barrier.wait();
                cache
                    .get_or_compile(src.hash(), &mut || {
                        thread::sleep(Duration::from_millis(20));
                        src.compile(&DomainPack::compile_options())
                    })
                    .unwrap()
            })
        })
        .collect();

    let programs: Vec<Arc<Program>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(cache.compilations(), 1);
    assert_eq!(cache.len(), 1);
    assert!(programs.iter().all(|p| Arc::ptr_eq(p, &programs[0])));
}

/// Test: a failed compile is not cached; the next caller retries.
#[test]
fn test_failed_compile_retries() {
    let cache = InMemoryProgramCache::new();
    let bad = source("output p(x: id).\np(X) :- q(X).");

    assert!(cache
        .get_or_compile(bad.hash(), &mut || bad.compile(&DomainPack::compile_options()))
        .is_err());
    assert!(cache.get(bad.hash()).is_none());
    assert!(cache
        .get_or_compile(bad.hash(), &mut || bad.compile(&DomainPack::compile_options()))
        .is_err());
    assert_eq!(cache.compilations(), 2);
    assert!(cache.is_empty());
}

// =============================================================================
// CANCELLATION
// =============================================================================

/// Test: a cancelled token stops evaluation.
#[test]
fn test_cancelled_evaluation() {
    let cancel = CancelToken::new();
    cancel.cancel();
    let err = evaluate(program(PATH_RULES), &chain(10), &Params::new(), &cancel).unwrap_err();
    assert_eq!(err, EvalError::Cancelled);
}

/// Test: a passed deadline reports DeadlineExceeded.
#[test]
fn test_deadline_exceeded() {
    let cancel = CancelToken::with_deadline(Instant::now() - Duration::from_millis(1));
    let err = evaluate(program(PATH_RULES), &chain(10), &Params::new(), &cancel).unwrap_err();
    assert_eq!(err, EvalError::DeadlineExceeded);
}

/// Test: cancelling from another thread stops a long fixpoint.
#[test]
fn test_cancel_from_other_thread() {
    let prog = program(PATH_RULES);
    let facts = chain(400);
    let cancel = CancelToken::new();

    let remote = cancel.clone();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(5));
        remote.cancel();
    });

    let result = evaluate(prog, &facts, &Params::new(), &cancel);
    canceller.join().unwrap();

    // a fast machine may finish first; anything else must be a cancellation
    if let Err(err) = result {
        assert_eq!(err, EvalError::Cancelled);
    }
}

// =============================================================================
// PROVENANCE
// =============================================================================

/// Test: explanations are identical across runs and cite window positions.
#[test]
fn test_provenance_is_deterministic() {
    let prog = program(PATH_RULES);
    let facts = chain(4);
    let pattern = QueryPattern::new("path", vec![Some(Value::id("n0")), Some(Value::id("n4"))]).explain();

    let explain = || {
        let model = evaluate(Arc::clone(&prog), &facts, &Params::new(), &CancelToken::new()).unwrap();
        run_query(&model, &pattern).unwrap().provenance.unwrap()
    };

    let first = explain();
    assert_eq!(first, explain());
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].rule_id, "path.dl#2");
    assert_eq!(first[0].facts, vec![0, 1, 2, 3]);
}

/// Test: the limit caps rows, in insertion order.
#[test]
fn test_query_limit() {
    let model = evaluate(program(PATH_RULES), &chain(3), &Params::new(), &CancelToken::new()).unwrap();

    let all = run_query(&model, &QueryPattern::new("path", vec![None, None])).unwrap();
    assert_eq!(all.rows.len(), 6);

    let two = run_query(&model, &QueryPattern::new("path", vec![None, None]).limit(2)).unwrap();
    assert_eq!(two.rows, all.rows[..2].to_vec());
}
