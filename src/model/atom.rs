//! Ground facts and fact references

use std::fmt;

use serde::Serialize;

use super::value::Value;

/// Position of a fact inside its fact window.
///
/// Client facts occupy the first positions in submission order; ambient facts
/// contributed by the domain pack follow them.
pub type FactRef = u32;

/// An extensional fact: `predicate(args...)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Fact {
    pub pred: String,
    pub args: Vec<Value>,
}

impl Fact {
    pub fn new(pred: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            pred: pred.into(),
            args,
        }
    }

    pub fn arity(&self) -> usize {
        self.args.len()
    }
}

impl fmt::Display for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.pred)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", arg)?;
        }
        write!(f, ")")
    }
}
