//! Range restriction and join planning
//!
//! Body literals are scheduled greedily. Whenever a negation, comparison or
//! assignment has all its inputs bound it runs next, in written order.
//! Otherwise the next positive atom joins and binds its variables. A rule
//! whose remaining literals can never become ready is unsafe.

use std::collections::HashMap;

use super::program::{ArgMatch, AtomPlan, CExpr, HeadSlot, KeyPart, PredId, Step};
use crate::eval::Builtin;
use crate::model::{Atom, CmpOp, Expr, HeadTerm, Literal, Rule, Term};
use crate::ruleset::{CompileError, CompileResult};

/// Lowered form of one rule
#[derive(Debug, Clone)]
pub struct RulePlan {
    pub steps: Vec<Step>,
    pub slots: Vec<String>,
    pub head: Vec<HeadSlot>,
}

/// Plans `rule`. Predicates and parameters must already be validated.
pub fn plan_rule(
    rule: &Rule,
    rule_id: &str,
    pred_ids: &HashMap<String, PredId>,
    params: &[String],
) -> CompileResult<RulePlan> {
    let mut planner = Planner {
        rule_id,
        pred_ids,
        params,
        slots: Vec::new(),
        bound: HashMap::new(),
    };

    let mut pending: Vec<&Literal> = rule.body.iter().collect();
    let mut steps = Vec::with_capacity(pending.len());

    while !pending.is_empty() {
        if let Some(i) = pending.iter().position(|lit| planner.is_ready(lit)) {
            let lit = pending.remove(i);
            steps.push(planner.lower(lit)?);
            continue;
        }
        if let Some(i) = pending.iter().position(|lit| matches!(lit, Literal::Pos(_))) {
            if let Literal::Pos(atom) = pending.remove(i) {
                steps.push(Step::Join(planner.atom(atom)?));
            }
            continue;
        }
        return Err(planner.stuck(pending[0]));
    }

    let head = rule
        .head
        .args
        .iter()
        .map(|arg| planner.head_slot(arg))
        .collect::<CompileResult<Vec<_>>>()?;

    Ok(RulePlan {
        steps,
        slots: planner.slots,
        head,
    })
}

struct Planner<'a> {
    rule_id: &'a str,
    pred_ids: &'a HashMap<String, PredId>,
    params: &'a [String],
    slots: Vec<String>,
    bound: HashMap<String, usize>,
}

impl Planner<'_> {
    fn is_bound(&self, var: &str) -> bool {
        self.bound.contains_key(var)
    }

    fn expr_bound(&self, expr: &Expr) -> bool {
        let mut vars = Vec::new();
        expr.vars(&mut vars);
        vars.iter().all(|v| self.is_bound(v))
    }

    /// Variable to assign when `lhs = rhs` can bind exactly one side
    fn assignment_target<'e>(&self, lhs: &'e Expr, rhs: &'e Expr) -> Option<(&'e str, &'e Expr)> {
        if let Some(var) = lhs.as_var() {
            if !self.is_bound(var) && self.expr_bound(rhs) {
                return Some((var, rhs));
            }
        }
        if let Some(var) = rhs.as_var() {
            if !self.is_bound(var) && self.expr_bound(lhs) {
                return Some((var, lhs));
            }
        }
        None
    }

    fn is_ready(&self, lit: &Literal) -> bool {
        match lit {
            Literal::Pos(_) => false,
            Literal::Neg(atom) => atom.vars().all(|v| self.is_bound(v)),
            Literal::Cmp { op, lhs, rhs } => {
                (self.expr_bound(lhs) && self.expr_bound(rhs))
                    || (*op == CmpOp::Eq && self.assignment_target(lhs, rhs).is_some())
            }
        }
    }

    fn lower(&mut self, lit: &Literal) -> CompileResult<Step> {
        match lit {
            Literal::Pos(atom) => Ok(Step::Join(self.atom(atom)?)),
            Literal::Neg(atom) => Ok(Step::Negate(self.atom(atom)?)),
            Literal::Cmp { op, lhs, rhs } => {
                if self.expr_bound(lhs) && self.expr_bound(rhs) {
                    return Ok(Step::Filter {
                        op: *op,
                        lhs: self.expr(lhs)?,
                        rhs: self.expr(rhs)?,
                    });
                }
                match self.assignment_target(lhs, rhs) {
                    Some((var, source)) => {
                        let expr = self.expr(source)?;
                        let slot = self.bind(var);
                        Ok(Step::Assign { slot, expr })
                    }
                    None => Err(self.stuck(lit)),
                }
            }
        }
    }

    fn bind(&mut self, var: &str) -> usize {
        let slot = self.slots.len();
        self.slots.push(var.to_string());
        self.bound.insert(var.to_string(), slot);
        slot
    }

    fn param(&self, name: &str) -> CompileResult<usize> {
        self.params
            .binary_search_by(|p| p.as_str().cmp(name))
            .map_err(|_| CompileError::UnknownParam {
                rule: self.rule_id.to_string(),
                param: name.to_string(),
            })
    }

    fn atom(&mut self, atom: &Atom) -> CompileResult<AtomPlan> {
        let pred = self.pred_ids.get(&atom.pred).copied().ok_or_else(|| {
            CompileError::UndefinedPredicate {
                rule: self.rule_id.to_string(),
                predicate: atom.pred.clone(),
            }
        })?;

        let mut plan = AtomPlan {
            pred,
            cols: Vec::new(),
            key: Vec::new(),
            args: Vec::with_capacity(atom.args.len()),
        };
        let mut local: HashMap<&str, usize> = HashMap::new();

        for (col, term) in atom.args.iter().enumerate() {
            let matched = match term {
                Term::Var(v) => {
                    if let Some(&slot) = local.get(v.as_str()) {
                        ArgMatch::Check(slot)
                    } else if let Some(&slot) = self.bound.get(v) {
                        plan.cols.push(col);
                        plan.key.push(KeyPart::Slot(slot));
                        ArgMatch::Key
                    } else {
                        let slot = self.bind(v);
                        local.insert(v, slot);
                        ArgMatch::Bind(slot)
                    }
                }
                Term::Wildcard => ArgMatch::Skip,
                Term::Const(value) => {
                    plan.cols.push(col);
                    plan.key.push(KeyPart::Const(value.clone()));
                    ArgMatch::Key
                }
                Term::Param(name) => {
                    plan.cols.push(col);
                    plan.key.push(KeyPart::Param(self.param(name)?));
                    ArgMatch::Key
                }
            };
            plan.args.push(matched);
        }

        Ok(plan)
    }

    fn expr(&self, expr: &Expr) -> CompileResult<CExpr> {
        Ok(match expr {
            Expr::Term(Term::Var(v)) => match self.bound.get(v) {
                Some(&slot) => CExpr::Slot(slot),
                None => {
                    return Err(CompileError::unsafe_rule(
                        self.rule_id,
                        v.as_str(),
                        "is used before it is bound",
                    ))
                }
            },
            Expr::Term(Term::Wildcard) => {
                return Err(CompileError::unsafe_rule(
                    self.rule_id,
                    "_",
                    "cannot be used in an expression",
                ))
            }
            Expr::Term(Term::Const(value)) => CExpr::Const(value.clone()),
            Expr::Term(Term::Param(name)) => CExpr::Param(self.param(name)?),
            Expr::Call { name, args } => {
                let func = Builtin::resolve(name).ok_or_else(|| CompileError::UnknownFunction {
                    rule: self.rule_id.to_string(),
                    name: name.clone(),
                    arity: args.len(),
                })?;
                CExpr::Call {
                    func,
                    args: args
                        .iter()
                        .map(|a| self.expr(a))
                        .collect::<CompileResult<Vec<_>>>()?,
                }
            }
            Expr::Binary { op, lhs, rhs } => CExpr::Binary {
                op: *op,
                lhs: Box::new(self.expr(lhs)?),
                rhs: Box::new(self.expr(rhs)?),
            },
            Expr::Neg(inner) => CExpr::Neg(Box::new(self.expr(inner)?)),
        })
    }

    fn head_slot(&self, arg: &HeadTerm) -> CompileResult<HeadSlot> {
        Ok(match arg {
            HeadTerm::Term(Term::Var(v)) => match self.bound.get(v) {
                Some(&slot) => HeadSlot::Value(KeyPart::Slot(slot)),
                None => {
                    return Err(CompileError::unsafe_rule(
                        self.rule_id,
                        v.as_str(),
                        "appears in the head but is never bound in the body",
                    ))
                }
            },
            HeadTerm::Term(Term::Wildcard) => {
                return Err(CompileError::unsafe_rule(
                    self.rule_id,
                    "_",
                    "cannot appear in a rule head",
                ))
            }
            HeadTerm::Term(Term::Const(value)) => HeadSlot::Value(KeyPart::Const(value.clone())),
            HeadTerm::Term(Term::Param(name)) => HeadSlot::Value(KeyPart::Param(self.param(name)?)),
            HeadTerm::Agg { func, var: None } => HeadSlot::Agg {
                func: *func,
                slot: None,
            },
            HeadTerm::Agg {
                func,
                var: Some(v),
            } => match self.bound.get(v) {
                Some(&slot) => HeadSlot::Agg {
                    func: *func,
                    slot: Some(slot),
                },
                None => {
                    return Err(CompileError::unsafe_rule(
                        self.rule_id,
                        v.as_str(),
                        "is aggregated but never bound in the body",
                    ))
                }
            },
        })
    }

    fn stuck(&self, lit: &Literal) -> CompileError {
        let (vars, reason) = match lit {
            Literal::Neg(atom) => (
                atom.vars().collect::<Vec<_>>(),
                "appears in a negated atom but is never bound by a positive atom",
            ),
            Literal::Cmp { lhs, rhs, .. } => {
                let mut vars = Vec::new();
                lhs.vars(&mut vars);
                rhs.vars(&mut vars);
                (
                    vars,
                    "appears in a comparison but is never bound by a positive atom or assignment",
                )
            }
            Literal::Pos(atom) => (atom.vars().collect(), "cannot be bound"),
        };
        let var = vars
            .into_iter()
            .find(|v| !self.is_bound(v))
            .unwrap_or("_");
        CompileError::unsafe_rule(self.rule_id, var, reason)
    }
}
