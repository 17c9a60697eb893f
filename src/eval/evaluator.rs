//! Stratified semi-naive evaluation
//!
//! Strata run in order. A non-recursive stratum evaluates each rule once. A
//! recursive stratum first evaluates every rule over full relations, then
//! repeats with one recursive body atom at a time restricted to the rows the
//! previous round added, until a round adds nothing.
//!
//! Tuples derived during a round are buffered and committed at its end, so
//! every rule in a round reads the same relation state. Provenance is the
//! first derivation: earliest round, then rule order, then enumeration order.

use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::sync::Arc;

use super::builtins::{compare, eval_expr};
use super::cancel::CancelToken;
use super::errors::{EvalError, EvalResult};
use super::provenance::{merge_facts, Origin, Provenance};
use super::relation::{Relation, RowId};
use super::Params;
use crate::analysis::{ArgMatch, AtomPlan, CompiledRule, HeadSlot, KeyPart, PredId, Program, Step};
use crate::model::{AggFunc, Fact, FactRef, Value};

/// Cancellation is polled once per this many candidate rows.
const CHECK_INTERVAL: u64 = 1024;

const FULL: Range<RowId> = 0..usize::MAX;

/// Materialized relations for one fact window
#[derive(Debug, Clone)]
pub struct Model {
    program: Arc<Program>,
    relations: Vec<Relation>,
    rounds: u32,
    derived: usize,
}

impl Model {
    pub fn program(&self) -> &Arc<Program> {
        &self.program
    }

    pub fn relation(&self, pred: PredId) -> &Relation {
        &self.relations[pred]
    }

    pub fn relation_by_name(&self, name: &str) -> Option<&Relation> {
        self.program.pred_id(name).map(|id| &self.relations[id])
    }

    /// Fixpoint rounds run across all strata
    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    /// Number of derived tuples
    pub fn derived(&self) -> usize {
        self.derived
    }
}

/// Evaluates `program` over `facts`. A fact's position in the slice is its
/// `FactRef`.
pub fn evaluate(
    program: Arc<Program>,
    facts: &[Fact],
    params: &Params,
    cancel: &CancelToken,
) -> EvalResult<Model> {
    let params = resolve_params(&program, params)?;

    let relations = program
        .predicates()
        .iter()
        .enumerate()
        .map(|(id, p)| Relation::new(p.arity, program.indexes(id)))
        .collect();

    let mut evaluator = Evaluator {
        program: Arc::clone(&program),
        params,
        cancel,
        relations,
        rounds: 0,
        derived: 0,
    };

    evaluator.load_facts(facts)?;
    for stratum in 0..program.strata().len() {
        cancel.check()?;
        evaluator.eval_stratum(stratum)?;
    }

    Ok(Model {
        program,
        relations: evaluator.relations,
        rounds: evaluator.rounds,
        derived: evaluator.derived,
    })
}

fn resolve_params(program: &Program, params: &Params) -> EvalResult<Vec<Value>> {
    program
        .params()
        .iter()
        .map(|name| {
            params
                .get(name)
                .cloned()
                .ok_or_else(|| EvalError::MissingParam(name.clone()))
        })
        .collect()
}

struct Evaluator<'a> {
    program: Arc<Program>,
    params: Vec<Value>,
    cancel: &'a CancelToken,
    relations: Vec<Relation>,
    rounds: u32,
    derived: usize,
}

/// Tuples derived in the current round, in derivation order
#[derive(Default)]
struct Pending {
    rows: Vec<(PredId, Vec<Value>, Provenance)>,
    seen: HashSet<(PredId, Vec<Value>)>,
}

impl Pending {
    fn offer(&mut self, relations: &[Relation], pred: PredId, row: &[Value]) -> bool {
        !relations[pred].contains(row) && self.seen.insert((pred, row.to_vec()))
    }
}

impl Evaluator<'_> {
    fn load_facts(&mut self, facts: &[Fact]) -> EvalResult<()> {
        for (i, fact) in facts.iter().enumerate() {
            let pred = self
                .program
                .pred_id(&fact.pred)
                .filter(|&p| self.program.predicate(p).is_input())
                .ok_or_else(|| {
                    EvalError::Internal(format!("fact for undeclared input '{}'", fact.pred))
                })?;
            if self.relations[pred].arity() != fact.arity() {
                return Err(EvalError::Internal(format!(
                    "fact {} has arity {}, expected {}",
                    fact,
                    fact.arity(),
                    self.relations[pred].arity()
                )));
            }
            let fact_ref = FactRef::try_from(i)
                .map_err(|_| EvalError::Internal("fact window too large".to_string()))?;
            self.relations[pred].insert(fact.args.clone(), Origin::Fact(fact_ref));
        }
        Ok(())
    }

    fn eval_stratum(&mut self, index: usize) -> EvalResult<()> {
        let program = Arc::clone(&self.program);
        let stratum = &program.strata()[index];

        let mut pending = Pending::default();
        for &r in &stratum.rules {
            self.cancel.check()?;
            let rule = &program.rules()[r];
            let windows = vec![FULL; rule.steps.len()];
            self.eval_rule(r, &windows, &mut pending)?;
        }
        self.rounds += 1;
        let mut delta = self.commit(pending);

        if !stratum.recursive {
            return Ok(());
        }

        while delta.values().any(|d| !d.is_empty()) {
            self.cancel.check()?;
            let mut pending = Pending::default();

            for &r in &stratum.rules {
                let rule = &program.rules()[r];
                for (k, &step) in rule.recursive_atoms.iter().enumerate() {
                    let Some(d) = delta.get(&join_pred(rule, step)).filter(|d| !d.is_empty()) else {
                        continue;
                    };
                    self.cancel.check()?;

                    let mut windows = vec![FULL; rule.steps.len()];
                    for (j, &other) in rule.recursive_atoms.iter().enumerate() {
                        if j < k {
                            let start = delta
                                .get(&join_pred(rule, other))
                                .map_or(usize::MAX, |o| o.start);
                            windows[other] = 0..start;
                        }
                    }
                    windows[step] = d.clone();
                    self.eval_rule(r, &windows, &mut pending)?;
                }
            }

            self.rounds += 1;
            delta = self.commit(pending);
        }
        Ok(())
    }

    /// Inserts buffered tuples and returns the new row range per predicate.
    fn commit(&mut self, pending: Pending) -> HashMap<PredId, Range<RowId>> {
        let mut delta: HashMap<PredId, Range<RowId>> = HashMap::new();
        for (pred, row, provenance) in pending.rows {
            let relation = &mut self.relations[pred];
            let start = relation.len();
            if relation.insert(row, Origin::Derived(provenance)) {
                self.derived += 1;
                delta.entry(pred).or_insert(start..start).end = start + 1;
            }
        }
        delta
    }

    fn eval_rule(&self, r: usize, windows: &[Range<RowId>], pending: &mut Pending) -> EvalResult<()> {
        let rule = &self.program.rules()[r];
        if rule.is_aggregate() {
            return self.eval_aggregate(r, rule, pending);
        }

        let relations = &self.relations;
        let params = &self.params;
        let sink = |slots: &[Option<Value>], used: &[(PredId, RowId)]| -> EvalResult<()> {
            let Some(row) = head_row(&rule.head_terms, slots, params) else {
                return Ok(());
            };
            if pending.offer(relations, rule.head, &row) {
                let facts = merge_facts(used.iter().map(|&(p, id)| relations[p].origin(id).facts()));
                pending.rows.push((rule.head, row, Provenance { rule: r, facts }));
            }
            Ok(())
        };

        Binder::new(rule, relations, params, windows, self.cancel, sink).run(0)
    }

    fn eval_aggregate(&self, r: usize, rule: &CompiledRule, pending: &mut Pending) -> EvalResult<()> {
        let relations = &self.relations;
        let params = &self.params;
        let windows = vec![FULL; rule.steps.len()];

        let mut distinct: HashSet<Vec<Option<Value>>> = HashSet::new();
        let mut bindings: Vec<(Vec<Option<Value>>, Arc<[FactRef]>)> = Vec::new();
        let sink = |slots: &[Option<Value>], used: &[(PredId, RowId)]| -> EvalResult<()> {
            if distinct.insert(slots.to_vec()) {
                let facts = merge_facts(used.iter().map(|&(p, id)| relations[p].origin(id).facts()));
                bindings.push((slots.to_vec(), facts));
            }
            Ok(())
        };
        Binder::new(rule, relations, params, &windows, self.cancel, sink).run(0)?;

        let mut groups: Vec<Group> = Vec::new();
        let mut group_of: HashMap<Vec<Value>, usize> = HashMap::new();

        for (slots, facts) in &bindings {
            let key: Option<Vec<Value>> = rule
                .head_terms
                .iter()
                .filter_map(|h| match h {
                    HeadSlot::Value(part) => Some(resolve(part, slots, params)),
                    HeadSlot::Agg { .. } => None,
                })
                .collect();
            let Some(key) = key else { continue };

            let g = *group_of.entry(key.clone()).or_insert_with(|| {
                groups.push(Group::new(key, &rule.head_terms));
                groups.len() - 1
            });
            groups[g].add(&rule.head_terms, slots, facts);
        }

        for group in groups {
            let Some((row, facts)) = group.finish(&rule.head_terms) else {
                continue;
            };
            if pending.offer(relations, rule.head, &row) {
                pending.rows.push((rule.head, row, Provenance { rule: r, facts }));
            }
        }
        Ok(())
    }
}

fn join_pred(rule: &CompiledRule, step: usize) -> PredId {
    match &rule.steps[step] {
        Step::Join(plan) | Step::Negate(plan) => plan.pred,
        _ => usize::MAX,
    }
}

fn resolve(part: &KeyPart, slots: &[Option<Value>], params: &[Value]) -> Option<Value> {
    match part {
        KeyPart::Const(v) => Some(v.clone()),
        KeyPart::Slot(s) => slots.get(*s)?.clone(),
        KeyPart::Param(p) => params.get(*p).cloned(),
    }
}

fn head_row(head: &[HeadSlot], slots: &[Option<Value>], params: &[Value]) -> Option<Vec<Value>> {
    head.iter()
        .map(|h| match h {
            HeadSlot::Value(part) => resolve(part, slots, params),
            HeadSlot::Agg { .. } => None,
        })
        .collect()
}

/// Depth-first enumeration of the bindings that satisfy a rule body
struct Binder<'a, F> {
    steps: &'a [Step],
    relations: &'a [Relation],
    params: &'a [Value],
    windows: &'a [Range<RowId>],
    cancel: &'a CancelToken,
    ticks: u64,
    slots: Vec<Option<Value>>,
    used: Vec<(PredId, RowId)>,
    sink: F,
}

impl<'a, F> Binder<'a, F>
where
    F: FnMut(&[Option<Value>], &[(PredId, RowId)]) -> EvalResult<()>,
{
    fn new(
        rule: &'a CompiledRule,
        relations: &'a [Relation],
        params: &'a [Value],
        windows: &'a [Range<RowId>],
        cancel: &'a CancelToken,
        sink: F,
    ) -> Self {
        Self {
            steps: &rule.steps,
            relations,
            params,
            windows,
            cancel,
            ticks: 0,
            slots: vec![None; rule.slots.len()],
            used: Vec::new(),
            sink,
        }
    }

    fn tick(&mut self) -> EvalResult<()> {
        self.ticks += 1;
        if self.ticks % CHECK_INTERVAL == 0 {
            self.cancel.check()?;
        }
        Ok(())
    }

    fn key(&self, plan: &AtomPlan) -> Option<Vec<Value>> {
        plan.key
            .iter()
            .map(|part| resolve(part, &self.slots, self.params))
            .collect()
    }

    fn bind_row(&mut self, plan: &AtomPlan, row: &[Value]) -> bool {
        for (col, matched) in plan.args.iter().enumerate() {
            match *matched {
                ArgMatch::Bind(slot) => self.slots[slot] = Some(row[col].clone()),
                ArgMatch::Check(slot) => {
                    if self.slots[slot].as_ref() != Some(&row[col]) {
                        return false;
                    }
                }
                ArgMatch::Key | ArgMatch::Skip => {}
            }
        }
        true
    }

    fn run(&mut self, i: usize) -> EvalResult<()> {
        let steps = self.steps;
        let Some(step) = steps.get(i) else {
            return (self.sink)(&self.slots, &self.used);
        };

        match step {
            Step::Join(plan) => {
                let Some(key) = self.key(plan) else {
                    return Ok(());
                };
                let relations = self.relations;
                let relation = &relations[plan.pred];
                let window = self.windows.get(i).cloned().unwrap_or(FULL);
                for id in relation.candidates(&plan.cols, &key, window) {
                    self.tick()?;
                    if !self.bind_row(plan, relation.row(id)) {
                        continue;
                    }
                    self.used.push((plan.pred, id));
                    self.run(i + 1)?;
                    self.used.pop();
                }
                Ok(())
            }
            Step::Negate(plan) => {
                let Some(key) = self.key(plan) else {
                    return Ok(());
                };
                let relation = &self.relations[plan.pred];
                if relation.candidates(&plan.cols, &key, FULL).next().is_some() {
                    return Ok(());
                }
                self.run(i + 1)
            }
            Step::Filter { op, lhs, rhs } => {
                let lhs = eval_expr(lhs, &self.slots, self.params);
                let rhs = eval_expr(rhs, &self.slots, self.params);
                match (lhs, rhs) {
                    (Some(a), Some(b)) if compare(*op, &a, &b) => self.run(i + 1),
                    _ => Ok(()),
                }
            }
            Step::Assign { slot, expr } => match eval_expr(expr, &self.slots, self.params) {
                Some(value) => {
                    self.slots[*slot] = Some(value);
                    self.run(i + 1)
                }
                None => Ok(()),
            },
        }
    }
}

enum Acc {
    Count(u64),
    CountDistinct(HashSet<Value>),
    Sum(f64),
    Min(Option<f64>),
    Max(Option<f64>),
    Avg { total: f64, n: u64 },
}

impl Acc {
    fn new(func: AggFunc, has_var: bool) -> Self {
        match func {
            AggFunc::Count if has_var => Acc::CountDistinct(HashSet::new()),
            AggFunc::Count => Acc::Count(0),
            AggFunc::Sum => Acc::Sum(0.0),
            AggFunc::Min => Acc::Min(None),
            AggFunc::Max => Acc::Max(None),
            AggFunc::Avg => Acc::Avg { total: 0.0, n: 0 },
        }
    }

    fn add(&mut self, value: Option<&Value>) {
        let number = value.and_then(Value::as_number);
        match self {
            Acc::Count(n) => *n += 1,
            Acc::CountDistinct(set) => {
                if let Some(v) = value {
                    set.insert(v.clone());
                }
            }
            Acc::Sum(total) => *total += number.unwrap_or(0.0),
            Acc::Min(m) => {
                if let Some(x) = number {
                    *m = Some(m.map_or(x, |cur| cur.min(x)));
                }
            }
            Acc::Max(m) => {
                if let Some(x) = number {
                    *m = Some(m.map_or(x, |cur| cur.max(x)));
                }
            }
            Acc::Avg { total, n } => {
                if let Some(x) = number {
                    *total += x;
                    *n += 1;
                }
            }
        }
    }

    fn finish(&self) -> Option<Value> {
        match self {
            Acc::Count(n) => Value::num(*n as f64),
            Acc::CountDistinct(set) => Value::num(set.len() as f64),
            Acc::Sum(total) => Value::num(*total),
            Acc::Min(m) | Acc::Max(m) => m.and_then(Value::num),
            Acc::Avg { total, n } if *n > 0 => Value::num(total / *n as f64),
            Acc::Avg { .. } => None,
        }
    }
}

/// One aggregation group: the non-aggregate head values plus accumulators
struct Group {
    key: Vec<Value>,
    accs: Vec<Acc>,
    facts: Vec<FactRef>,
}

impl Group {
    fn new(key: Vec<Value>, head: &[HeadSlot]) -> Self {
        let accs = head
            .iter()
            .filter_map(|h| match h {
                HeadSlot::Agg { func, slot } => Some(Acc::new(*func, slot.is_some())),
                HeadSlot::Value(_) => None,
            })
            .collect();
        Self {
            key,
            accs,
            facts: Vec::new(),
        }
    }

    fn add(&mut self, head: &[HeadSlot], slots: &[Option<Value>], facts: &[FactRef]) {
        let aggs = head.iter().filter_map(|h| match h {
            HeadSlot::Agg { slot, .. } => Some(slot),
            HeadSlot::Value(_) => None,
        });
        for (acc, slot) in self.accs.iter_mut().zip(aggs) {
            acc.add(slot.and_then(|s| slots.get(s)?.as_ref()));
        }
        self.facts.extend_from_slice(facts);
    }

    fn finish(self, head: &[HeadSlot]) -> Option<(Vec<Value>, Arc<[FactRef]>)> {
        let mut keys = self.key.into_iter();
        let mut accs = self.accs.iter();
        let row = head
            .iter()
            .map(|h| match h {
                HeadSlot::Value(_) => keys.next(),
                HeadSlot::Agg { .. } => accs.next()?.finish(),
            })
            .collect::<Option<Vec<_>>>()?;
        Some((row, merge_facts([self.facts.as_slice()])))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::CompileOptions;
    use crate::ruleset::{RuleFile, RulesetSource};

    fn program(src: &str, params: &[&str]) -> Arc<Program> {
        Arc::new(
            RulesetSource::from_files(vec![RuleFile::new("t.dl", src)])
                .compile(&CompileOptions::with_params(params.iter().copied()))
                .unwrap(),
        )
    }

    fn rows(model: &Model, pred: &str) -> Vec<Vec<Value>> {
        model
            .relation_by_name(pred)
            .unwrap()
            .rows()
            .iter()
            .map(|r| r.to_vec())
            .collect()
    }

    fn edge(a: &str, b: &str) -> Fact {
        Fact::new("edge", vec![Value::id(a), Value::id(b)])
    }

    const PATH: &str = "input edge(a: id, b: id).\n\
                        output path(a: id, b: id).\n\
                        path(X, Y) :- edge(X, Y).\n\
                        path(X, Z) :- path(X, Y), edge(Y, Z).";

    #[test]
    fn test_transitive_closure() {
        let facts = vec![edge("a", "b"), edge("b", "c"), edge("c", "d")];
        let model = evaluate(program(PATH, &[]), &facts, &Params::new(), &CancelToken::new()).unwrap();

        let path = rows(&model, "path");
        assert_eq!(path.len(), 6);
        assert!(path.contains(&vec![Value::id("a"), Value::id("d")]));
        assert_eq!(model.derived(), 6);
    }

    #[test]
    fn test_cyclic_graph_terminates() {
        let facts = vec![edge("a", "b"), edge("b", "a")];
        let model = evaluate(program(PATH, &[]), &facts, &Params::new(), &CancelToken::new()).unwrap();
        assert_eq!(rows(&model, "path").len(), 4);
    }

    #[test]
    fn test_provenance_is_transitive() {
        let facts = vec![edge("a", "b"), edge("x", "y"), edge("b", "c")];
        let model = evaluate(program(PATH, &[]), &facts, &Params::new(), &CancelToken::new()).unwrap();

        let path = model.relation_by_name("path").unwrap();
        let id = path
            .rows()
            .iter()
            .position(|r| r[..] == [Value::id("a"), Value::id("c")])
            .unwrap();
        match path.origin(id) {
            Origin::Derived(p) => {
                assert_eq!(p.rule, 1);
                assert_eq!(&*p.facts, &[0, 2]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_negation_uses_lower_stratum() {
        let src = "input n(v: number).\n\
                   output big(v: number).\n\
                   small(V) :- n(V), V < 10.\n\
                   big(V) :- n(V), !small(V).";
        let facts = vec![
            Fact::new("n", vec![Value::Num(3.0)]),
            Fact::new("n", vec![Value::Num(30.0)]),
        ];
        let model = evaluate(program(src, &[]), &facts, &Params::new(), &CancelToken::new()).unwrap();
        assert_eq!(rows(&model, "big"), vec![vec![Value::Num(30.0)]]);
    }

    #[test]
    fn test_aggregates_over_distinct_bindings() {
        let src = "input obs(k: string, v: string, p: number).\n\
                   output stats(k: string, n: number, s: number, lo: number, hi: number, mean: number).\n\
                   stats(K, count(), sum(P), min(P), max(P), avg(P)) :- obs(K, _, P).";
        let facts = vec![
            Fact::new("obs", vec![Value::str("s1"), Value::str("a"), Value::Num(2.0)]),
            Fact::new("obs", vec![Value::str("s1"), Value::str("b"), Value::Num(4.0)]),
            Fact::new("obs", vec![Value::str("s1"), Value::str("c"), Value::Num(4.0)]),
        ];
        let model = evaluate(program(src, &[]), &facts, &Params::new(), &CancelToken::new()).unwrap();

        // `_` is not part of the binding, so the two 4.0 rows collapse.
        assert_eq!(
            rows(&model, "stats"),
            vec![vec![
                Value::str("s1"),
                Value::Num(2.0),
                Value::Num(6.0),
                Value::Num(2.0),
                Value::Num(4.0),
                Value::Num(3.0),
            ]]
        );
    }

    #[test]
    fn test_params_and_missing_param() {
        let src = "input n(v: number).\noutput over(v: number).\nover(V) :- n(V), V > $min.";
        let prog = program(src, &["min"]);
        let facts = vec![
            Fact::new("n", vec![Value::Num(1.0)]),
            Fact::new("n", vec![Value::Num(5.0)]),
        ];

        let err = evaluate(Arc::clone(&prog), &facts, &Params::new(), &CancelToken::new()).unwrap_err();
        assert_eq!(err, EvalError::MissingParam("min".into()));

        let params = Params::new().with("min", Value::Num(2.0));
        let model = evaluate(prog, &facts, &params, &CancelToken::new()).unwrap();
        assert_eq!(rows(&model, "over"), vec![vec![Value::Num(5.0)]]);
    }

    #[test]
    fn test_cancelled_token_stops_evaluation() {
        let token = CancelToken::new();
        token.cancel();
        let err = evaluate(program(PATH, &[]), &[edge("a", "b")], &Params::new(), &token).unwrap_err();
        assert_eq!(err, EvalError::Cancelled);
    }

    #[test]
    fn test_unknown_fact_predicate_is_internal() {
        let err = evaluate(
            program(PATH, &[]),
            &[Fact::new("path", vec![Value::id("a"), Value::id("b")])],
            &Params::new(),
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, EvalError::Internal(_)));
    }

    #[test]
    fn test_ground_rules_are_facts() {
        let src = "output w(v: string, n: number).\nw(\"a\", 1).\nw(\"a\", 1).";
        let model = evaluate(program(src, &[]), &[], &Params::new(), &CancelToken::new()).unwrap();
        assert_eq!(rows(&model, "w").len(), 1);
        match model.relation_by_name("w").unwrap().origin(0) {
            Origin::Derived(p) => {
                assert_eq!(p.rule, 0);
                assert!(p.facts.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
