//! Fact/Rule model
//!
//! Typed values, ground facts, and the rule-source AST shared by the
//! parser, analyzer, and evaluator.

mod atom;
mod rule;
mod value;

pub use atom::{Fact, FactRef};
pub use rule::{
    AggFunc, ArithOp, Atom, CmpOp, Column, Decl, Expr, Head, HeadTerm, Literal, Role, Rule,
    SourcePos, SourceUnit, Term,
};
pub use value::{Value, ValueType};
