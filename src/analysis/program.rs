//! Compiled programs
//!
//! `compile` runs every static check over the parsed rule files and lowers
//! each rule into a join plan. A `Program` is immutable and keyed by the
//! ruleset hash it was compiled from.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use super::graph::{DependencyGraph, Edge};
use super::safety::plan_rule;
use super::stratify::{stratify, RuleSummary, Stratum};
use crate::eval::Builtin;
use crate::model::{
    AggFunc, Atom, CmpOp, Decl, Expr, HeadTerm, Literal, Role, Rule, SourcePos, SourceUnit, Term,
    Value, ValueType,
};
use crate::ruleset::{CompileError, CompileResult};

/// Dense predicate identifier, valid within one `Program`
pub type PredId = usize;

#[derive(Debug, Clone)]
pub struct Predicate {
    pub name: String,
    pub arity: usize,
    pub decl: Option<Decl>,
    /// Some rule has this predicate as its head
    pub derived: bool,
}

impl Predicate {
    pub fn role(&self) -> Option<Role> {
        self.decl.as_ref().map(|d| d.role)
    }

    pub fn is_input(&self) -> bool {
        self.role() == Some(Role::Input)
    }

    pub fn column_type(&self, col: usize) -> Option<ValueType> {
        self.decl.as_ref()?.columns.get(col).map(|c| c.ty)
    }
}

/// Source of one join key column
#[derive(Debug, Clone, PartialEq)]
pub enum KeyPart {
    Const(Value),
    Slot(usize),
    /// Index into `Program::params`
    Param(usize),
}

/// What to do with one column of a matched row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgMatch {
    /// Already matched by the index lookup
    Key,
    /// First occurrence of a variable: bind the slot
    Bind(usize),
    /// Repeated variable within the same atom
    Check(usize),
    Skip,
}

/// Lookup plan for a body atom
#[derive(Debug, Clone, PartialEq)]
pub struct AtomPlan {
    pub pred: PredId,
    /// Bound columns, ascending; empty means a full scan
    pub cols: Vec<usize>,
    pub key: Vec<KeyPart>,
    pub args: Vec<ArgMatch>,
}

/// Compiled expression
#[derive(Debug, Clone, PartialEq)]
pub enum CExpr {
    Const(Value),
    Slot(usize),
    Param(usize),
    Call { func: Builtin, args: Vec<CExpr> },
    Binary {
        op: crate::model::ArithOp,
        lhs: Box<CExpr>,
        rhs: Box<CExpr>,
    },
    Neg(Box<CExpr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Join(AtomPlan),
    /// Succeeds when no row matches
    Negate(AtomPlan),
    Filter { op: CmpOp, lhs: CExpr, rhs: CExpr },
    Assign { slot: usize, expr: CExpr },
}

#[derive(Debug, Clone, PartialEq)]
pub enum HeadSlot {
    Value(KeyPart),
    Agg { func: AggFunc, slot: Option<usize> },
}

#[derive(Debug, Clone)]
pub struct CompiledRule {
    /// `<file>#<n>`, n counting clauses from 1 within the file
    pub id: String,
    pub head: PredId,
    pub head_terms: Vec<HeadSlot>,
    pub steps: Vec<Step>,
    /// Variable name per binding slot
    pub slots: Vec<String>,
    /// Join steps over predicates of the rule's own stratum
    pub recursive_atoms: Vec<usize>,
    pub stratum: usize,
    pub pos: SourcePos,
}

impl CompiledRule {
    pub fn is_aggregate(&self) -> bool {
        self.head_terms
            .iter()
            .any(|h| matches!(h, HeadSlot::Agg { .. }))
    }
}

/// Static inputs to compilation beyond the rule files themselves
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Parameter names rules may reference as `$name`
    pub known_params: BTreeSet<String>,
}

impl CompileOptions {
    pub fn with_params<I, S>(params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            known_params: params.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Program {
    hash: String,
    predicates: Vec<Predicate>,
    by_name: HashMap<String, PredId>,
    rules: Vec<CompiledRule>,
    strata: Vec<Stratum>,
    params: Vec<String>,
    indexes: Vec<Vec<Vec<usize>>>,
}

/// Printable overview used by `rulesbrain check`
#[derive(Debug, Clone, Serialize)]
pub struct ProgramSummary {
    pub ruleset_hash: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub rules: usize,
    pub params: Vec<String>,
    pub strata: Vec<StratumSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StratumSummary {
    pub predicates: Vec<String>,
    pub rules: Vec<String>,
    pub recursive: bool,
}

impl Program {
    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn predicate(&self, id: PredId) -> &Predicate {
        &self.predicates[id]
    }

    pub fn pred_id(&self, name: &str) -> Option<PredId> {
        self.by_name.get(name).copied()
    }

    pub fn decl(&self, name: &str) -> Option<&Decl> {
        self.pred_id(name)
            .and_then(|id| self.predicates[id].decl.as_ref())
    }

    pub fn inputs(&self) -> impl Iterator<Item = &Decl> {
        self.decls_with(Role::Input)
    }

    pub fn outputs(&self) -> impl Iterator<Item = &Decl> {
        self.decls_with(Role::Output)
    }

    fn decls_with(&self, role: Role) -> impl Iterator<Item = &Decl> {
        self.predicates
            .iter()
            .filter_map(|p| p.decl.as_ref())
            .filter(move |d| d.role == role)
    }

    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    pub fn strata(&self) -> &[Stratum] {
        &self.strata
    }

    /// Parameter names in slot order
    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// Column sets that need a hash index on `pred`
    pub fn indexes(&self, pred: PredId) -> &[Vec<usize>] {
        &self.indexes[pred]
    }

    pub fn summary(&self) -> ProgramSummary {
        let names = |preds: &[PredId]| -> Vec<String> {
            preds
                .iter()
                .map(|&p| self.predicates[p].name.clone())
                .collect()
        };
        ProgramSummary {
            ruleset_hash: self.hash.clone(),
            inputs: self.inputs().map(|d| d.pred.clone()).collect(),
            outputs: self.outputs().map(|d| d.pred.clone()).collect(),
            rules: self.rules.len(),
            params: self.params.clone(),
            strata: self
                .strata
                .iter()
                .map(|s| StratumSummary {
                    predicates: names(&s.preds),
                    rules: s.rules.iter().map(|&r| self.rules[r].id.clone()).collect(),
                    recursive: s.recursive,
                })
                .collect(),
        }
    }
}

/// Compiles parsed rule files into a program.
///
/// Units must already be in declaration order (sorted by file name).
pub fn compile(hash: &str, units: &[SourceUnit], options: &CompileOptions) -> CompileResult<Program> {
    let mut table = PredicateTable::default();

    for unit in units {
        for decl in &unit.decls {
            table.declare(decl)?;
        }
    }

    let mut rules: Vec<(String, Rule)> = Vec::new();
    for unit in units {
        for (n, rule) in unit.rules.iter().enumerate() {
            rules.push((format!("{}#{}", unit.file, n + 1), rule.clone()));
        }
    }

    for (id, rule) in &rules {
        let head = table.intern(&rule.head.pred, rule.head.args.len(), id)?;
        if table.preds[head].is_input() {
            return Err(CompileError::DerivedInput {
                rule: id.clone(),
                predicate: rule.head.pred.clone(),
            });
        }
        table.preds[head].derived = true;
        for atom in body_atoms(rule) {
            table.intern(&atom.pred, atom.args.len(), id)?;
        }
    }

    for (id, rule) in &rules {
        for atom in body_atoms(rule) {
            let pred = &table.preds[table.by_name[&atom.pred]];
            if !pred.derived && !pred.is_input() {
                return Err(CompileError::UndefinedPredicate {
                    rule: id.clone(),
                    predicate: atom.pred.clone(),
                });
            }
        }
    }

    if let Some(pred) = table
        .preds
        .iter()
        .find(|p| p.role() == Some(Role::Output) && !p.derived)
    {
        return Err(CompileError::UnderivedOutput(pred.name.clone()));
    }

    for (id, rule) in &mut rules {
        retype_constants(rule, id, &table)?;
        check_calls(rule, id, &options.known_params)?;
    }

    let params: Vec<String> = rules
        .iter()
        .flat_map(|(_, r)| rule_params(r))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let pred_count = table.preds.len();
    let mut nodes: Vec<PredId> = (0..pred_count).filter(|&p| table.preds[p].derived).collect();
    nodes.sort_by(|&a, &b| table.preds[a].name.cmp(&table.preds[b].name));

    let mut graph = DependencyGraph::new(nodes, pred_count);
    for (i, (_, rule)) in rules.iter().enumerate() {
        let from = table.by_name[&rule.head.pred];
        let aggregate = rule.head.has_aggregate();
        for lit in &rule.body {
            let (atom, negative) = match lit {
                Literal::Pos(a) => (a, false),
                Literal::Neg(a) => (a, true),
                Literal::Cmp { .. } => continue,
            };
            let to = table.by_name[&atom.pred];
            if table.preds[to].derived {
                graph.add_edge(
                    from,
                    Edge {
                        to,
                        negative,
                        aggregate,
                        rule: i,
                    },
                );
            }
        }
    }

    let summaries: Vec<RuleSummary<'_>> = rules
        .iter()
        .map(|(id, rule)| RuleSummary {
            id,
            head: table.by_name[&rule.head.pred],
            aggregate: rule.head.has_aggregate(),
        })
        .collect();
    let names: Vec<String> = table.preds.iter().map(|p| p.name.clone()).collect();
    let strata = stratify(&graph, &summaries, &names)?;

    let mut stratum_of = vec![usize::MAX; pred_count];
    for (s, stratum) in strata.iter().enumerate() {
        for &p in &stratum.preds {
            stratum_of[p] = s;
        }
    }

    let mut compiled = Vec::with_capacity(rules.len());
    let mut indexes: Vec<Vec<Vec<usize>>> = vec![Vec::new(); pred_count];

    for (id, rule) in rules {
        let head = table.by_name[&rule.head.pred];
        let stratum = stratum_of[head];
        let plan = plan_rule(&rule, &id, &table.by_name, &params)?;

        let mut recursive_atoms = Vec::new();
        for (i, step) in plan.steps.iter().enumerate() {
            match step {
                Step::Join(atom) | Step::Negate(atom) => {
                    let arity = table.preds[atom.pred].arity;
                    if !atom.cols.is_empty()
                        && atom.cols.len() < arity
                        && !indexes[atom.pred].contains(&atom.cols)
                    {
                        indexes[atom.pred].push(atom.cols.clone());
                    }
                    if matches!(step, Step::Join(_)) && stratum_of[atom.pred] == stratum {
                        recursive_atoms.push(i);
                    }
                }
                Step::Assign { slot, .. } if strata[stratum].recursive => {
                    return Err(CompileError::ValueInvention {
                        rule: id,
                        predicate: rule.head.pred.clone(),
                        variable: plan.slots[*slot].clone(),
                    });
                }
                _ => {}
            }
        }

        compiled.push(CompiledRule {
            id,
            head,
            head_terms: plan.head,
            steps: plan.steps,
            slots: plan.slots,
            recursive_atoms,
            stratum,
            pos: rule.pos,
        });
    }

    Ok(Program {
        hash: hash.to_string(),
        predicates: table.preds,
        by_name: table.by_name,
        rules: compiled,
        strata,
        params,
        indexes,
    })
}

#[derive(Default)]
struct PredicateTable {
    preds: Vec<Predicate>,
    by_name: HashMap<String, PredId>,
}

impl PredicateTable {
    fn declare(&mut self, decl: &Decl) -> CompileResult<()> {
        if self.by_name.contains_key(&decl.pred) {
            return Err(CompileError::DuplicateDeclaration {
                pos: decl.pos.clone(),
                predicate: decl.pred.clone(),
            });
        }
        self.by_name.insert(decl.pred.clone(), self.preds.len());
        self.preds.push(Predicate {
            name: decl.pred.clone(),
            arity: decl.arity(),
            decl: Some(decl.clone()),
            derived: false,
        });
        Ok(())
    }

    fn intern(&mut self, name: &str, arity: usize, at: &str) -> CompileResult<PredId> {
        if let Some(&id) = self.by_name.get(name) {
            let expected = self.preds[id].arity;
            if expected != arity {
                return Err(CompileError::ArityMismatch {
                    at: at.to_string(),
                    predicate: name.to_string(),
                    expected,
                    found: arity,
                });
            }
            return Ok(id);
        }
        let id = self.preds.len();
        self.by_name.insert(name.to_string(), id);
        self.preds.push(Predicate {
            name: name.to_string(),
            arity,
            decl: None,
            derived: false,
        });
        Ok(id)
    }
}

fn body_atoms(rule: &Rule) -> impl Iterator<Item = &Atom> {
    rule.body.iter().filter_map(|lit| match lit {
        Literal::Pos(a) | Literal::Neg(a) => Some(a),
        Literal::Cmp { .. } => None,
    })
}

fn check_constant(
    value: &mut Value,
    expected: ValueType,
    at: &str,
    pred: &Predicate,
    col: usize,
) -> CompileResult<()> {
    if expected == ValueType::Id && matches!(value, Value::Str(_)) {
        *value = value.clone().into_id();
        return Ok(());
    }
    if value.value_type() == expected {
        return Ok(());
    }
    Err(CompileError::ConstantType {
        at: at.to_string(),
        predicate: pred.name.clone(),
        column: column_name(pred, col),
        expected: expected.type_name().to_string(),
        found: value.value_type().type_name().to_string(),
    })
}

fn column_name(pred: &Predicate, col: usize) -> String {
    pred.decl
        .as_ref()
        .and_then(|d| d.columns.get(col))
        .map(|c| c.name.clone())
        .unwrap_or_else(|| col.to_string())
}

/// Makes constants match their declared column types. String constants in
/// `id` columns become identifiers; anything else must already match.
fn retype_constants(rule: &mut Rule, id: &str, table: &PredicateTable) -> CompileResult<()> {
    let head = &table.preds[table.by_name[&rule.head.pred]];
    for (col, arg) in rule.head.args.iter_mut().enumerate() {
        let Some(expected) = head.column_type(col) else {
            continue;
        };
        match arg {
            HeadTerm::Term(Term::Const(value)) => check_constant(value, expected, id, head, col)?,
            HeadTerm::Agg { .. } if expected != ValueType::Number => {
                return Err(CompileError::ConstantType {
                    at: id.to_string(),
                    predicate: head.name.clone(),
                    column: column_name(head, col),
                    expected: expected.type_name().to_string(),
                    found: ValueType::Number.type_name().to_string(),
                });
            }
            _ => {}
        }
    }

    for lit in &mut rule.body {
        let atom = match lit {
            Literal::Pos(a) | Literal::Neg(a) => a,
            Literal::Cmp { .. } => continue,
        };
        let pred = &table.preds[table.by_name[&atom.pred]];
        for (col, arg) in atom.args.iter_mut().enumerate() {
            if let (Some(expected), Term::Const(value)) = (pred.column_type(col), arg) {
                check_constant(value, expected, id, pred, col)?;
            }
        }
    }
    Ok(())
}

fn rule_params(rule: &Rule) -> Vec<String> {
    let mut out = Vec::new();
    for arg in &rule.head.args {
        if let HeadTerm::Term(Term::Param(p)) = arg {
            out.push(p.clone());
        }
    }
    for lit in &rule.body {
        match lit {
            Literal::Pos(a) | Literal::Neg(a) => {
                for arg in &a.args {
                    if let Term::Param(p) = arg {
                        out.push(p.clone());
                    }
                }
            }
            Literal::Cmp { lhs, rhs, .. } => {
                expr_params(lhs, &mut out);
                expr_params(rhs, &mut out);
            }
        }
    }
    out
}

fn expr_params(expr: &Expr, out: &mut Vec<String>) {
    match expr {
        Expr::Term(Term::Param(p)) => out.push(p.clone()),
        Expr::Term(_) => {}
        Expr::Call { args, .. } => args.iter().for_each(|a| expr_params(a, out)),
        Expr::Binary { lhs, rhs, .. } => {
            expr_params(lhs, out);
            expr_params(rhs, out);
        }
        Expr::Neg(inner) => expr_params(inner, out),
    }
}

fn check_calls(rule: &Rule, id: &str, known: &BTreeSet<String>) -> CompileResult<()> {
    if let Some(param) = rule_params(rule).into_iter().find(|p| !known.contains(p)) {
        return Err(CompileError::UnknownParam {
            rule: id.to_string(),
            param,
        });
    }

    fn walk(expr: &Expr, id: &str) -> CompileResult<()> {
        match expr {
            Expr::Term(_) => Ok(()),
            Expr::Call { name, args } => {
                match Builtin::resolve(name) {
                    Some(b) if b.arity() == args.len() => {}
                    _ => {
                        return Err(CompileError::UnknownFunction {
                            rule: id.to_string(),
                            name: name.clone(),
                            arity: args.len(),
                        })
                    }
                }
                args.iter().try_for_each(|a| walk(a, id))
            }
            Expr::Binary { lhs, rhs, .. } => {
                walk(lhs, id)?;
                walk(rhs, id)
            }
            Expr::Neg(inner) => walk(inner, id),
        }
    }

    for lit in &rule.body {
        if let Literal::Cmp { lhs, rhs, .. } = lit {
            walk(lhs, id)?;
            walk(rhs, id)?;
        }
    }
    Ok(())
}
