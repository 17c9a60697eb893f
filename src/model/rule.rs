//! Rule source AST
//!
//! This is the parsed, not yet analyzed, form of a rule file. The analyzer
//! turns it into a compiled `Program`.

use std::fmt;
use std::sync::Arc;

use super::value::{Value, ValueType};

/// Location of a construct in a rule file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePos {
    pub file: Arc<str>,
    pub line: u32,
    pub col: u32,
}

impl fmt::Display for SourcePos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.col)
    }
}

/// Simple argument terms
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Var(String),
    /// `_`
    Wildcard,
    Const(Value),
    /// `$name`, bound at evaluation time
    Param(String),
}

impl Term {
    pub fn var_name(&self) -> Option<&str> {
        match self {
            Term::Var(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Var(name) => write!(f, "{}", name),
            Term::Wildcard => write!(f, "_"),
            Term::Const(value) => write!(f, "{}", value),
            Term::Param(name) => write!(f, "${}", name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }
}

/// Expressions usable in comparisons and assignments
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Term(Term),
    Call { name: String, args: Vec<Expr> },
    Binary { op: ArithOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Neg(Box<Expr>),
}

impl Expr {
    /// Collects the named variables of the expression, in order of appearance.
    pub fn vars<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Term(Term::Var(name)) => out.push(name),
            Expr::Term(_) => {}
            Expr::Call { args, .. } => args.iter().for_each(|a| a.vars(out)),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.vars(out);
                rhs.vars(out);
            }
            Expr::Neg(inner) => inner.vars(out),
        }
    }

    /// Returns the variable name when the expression is a bare variable.
    pub fn as_var(&self) -> Option<&str> {
        match self {
            Expr::Term(Term::Var(name)) => Some(name),
            _ => None,
        }
    }
}

/// `pred(args...)`
#[derive(Debug, Clone, PartialEq)]
pub struct Atom {
    pub pred: String,
    pub args: Vec<Term>,
}

impl Atom {
    pub fn vars(&self) -> impl Iterator<Item = &str> {
        self.args.iter().filter_map(Term::var_name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Pos(Atom),
    /// `!pred(args...)`
    Neg(Atom),
    Cmp { op: CmpOp, lhs: Expr, rhs: Expr },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFunc {
    Count,
    Sum,
    Min,
    Max,
    Avg,
}

impl AggFunc {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "count" => Some(AggFunc::Count),
            "sum" => Some(AggFunc::Sum),
            "min" => Some(AggFunc::Min),
            "max" => Some(AggFunc::Max),
            "avg" => Some(AggFunc::Avg),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AggFunc::Count => "count",
            AggFunc::Sum => "sum",
            AggFunc::Min => "min",
            AggFunc::Max => "max",
            AggFunc::Avg => "avg",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HeadTerm {
    Term(Term),
    /// `sum(X)`, `count()`, ...
    Agg { func: AggFunc, var: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Head {
    pub pred: String,
    pub args: Vec<HeadTerm>,
}

impl Head {
    pub fn has_aggregate(&self) -> bool {
        self.args.iter().any(|a| matches!(a, HeadTerm::Agg { .. }))
    }
}

/// A clause `head :- body.`; an empty body makes it a ground program fact.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub head: Head,
    pub body: Vec<Literal>,
    pub pos: SourcePos,
}

/// `input` predicates are client-supplied facts, `output` predicates are queryable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Input,
    Output,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Input => "input",
            Role::Output => "output",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub ty: ValueType,
}

/// `input ocr_field(card: id, field: string, ...).`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decl {
    pub role: Role,
    pub pred: String,
    pub columns: Vec<Column>,
    pub pos: SourcePos,
}

impl Decl {
    pub fn arity(&self) -> usize {
        self.columns.len()
    }

    /// Column types in order
    pub fn signature(&self) -> Vec<ValueType> {
        self.columns.iter().map(|c| c.ty).collect()
    }
}

/// Everything parsed from one rule file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceUnit {
    pub file: String,
    pub decls: Vec<Decl>,
    pub rules: Vec<Rule>,
}
