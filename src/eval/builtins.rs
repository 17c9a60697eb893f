//! Builtin functions and expression evaluation
//!
//! Evaluation is partial: a type mismatch, a malformed hash, division by zero
//! or any other non-finite result yields `None`, which makes the enclosing
//! comparison or assignment fail for that binding.

use crate::analysis::CExpr;
use crate::domain::{duplicates, pricing};
use crate::model::{ArithOp, CmpOp, Value};

/// Functions callable from rule bodies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    /// `hamming(hex, hex)`: differing bits between two 64-bit hashes
    Hamming,
    /// `decay(observed_at, now, half_life_days)`
    Decay,
    Abs,
}

impl Builtin {
    pub fn resolve(name: &str) -> Option<Self> {
        match name {
            "hamming" => Some(Builtin::Hamming),
            "decay" => Some(Builtin::Decay),
            "abs" => Some(Builtin::Abs),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Builtin::Hamming => "hamming",
            Builtin::Decay => "decay",
            Builtin::Abs => "abs",
        }
    }

    pub fn arity(&self) -> usize {
        match self {
            Builtin::Hamming => 2,
            Builtin::Decay => 3,
            Builtin::Abs => 1,
        }
    }

    pub fn call(&self, args: &[Value]) -> Option<Value> {
        match (self, args) {
            (Builtin::Hamming, [a, b]) => {
                let bits = duplicates::hamming_hex(a.as_text()?, b.as_text()?)?;
                Some(Value::Num(f64::from(bits)))
            }
            (Builtin::Decay, [ts, now, half]) => Value::num(pricing::decay(
                ts.as_number()?,
                now.as_number()?,
                half.as_number()?,
            )),
            (Builtin::Abs, [x]) => Some(Value::Num(x.as_number()?.abs())),
            _ => None,
        }
    }
}

/// Evaluates a compiled expression against a partial binding.
pub fn eval_expr(expr: &CExpr, slots: &[Option<Value>], params: &[Value]) -> Option<Value> {
    match expr {
        CExpr::Const(value) => Some(value.clone()),
        CExpr::Slot(i) => slots.get(*i)?.clone(),
        CExpr::Param(i) => params.get(*i).cloned(),
        CExpr::Neg(inner) => Value::num(-eval_expr(inner, slots, params)?.as_number()?),
        CExpr::Binary { op, lhs, rhs } => {
            let a = eval_expr(lhs, slots, params)?.as_number()?;
            let b = eval_expr(rhs, slots, params)?.as_number()?;
            let result = match op {
                ArithOp::Add => a + b,
                ArithOp::Sub => a - b,
                ArithOp::Mul => a * b,
                ArithOp::Div => a / b,
            };
            Value::num(result)
        }
        CExpr::Call { func, args } => {
            let values = args
                .iter()
                .map(|a| eval_expr(a, slots, params))
                .collect::<Option<Vec<_>>>()?;
            func.call(&values)
        }
    }
}

/// Applies a comparison. Ordering across value variants is always false.
pub fn compare(op: CmpOp, lhs: &Value, rhs: &Value) -> bool {
    use std::cmp::Ordering::*;
    match op {
        CmpOp::Eq => lhs == rhs,
        CmpOp::Ne => lhs != rhs,
        CmpOp::Lt => lhs.compare(rhs) == Some(Less),
        CmpOp::Le => matches!(lhs.compare(rhs), Some(Less | Equal)),
        CmpOp::Gt => lhs.compare(rhs) == Some(Greater),
        CmpOp::Ge => matches!(lhs.compare(rhs), Some(Greater | Equal)),
    }
}
