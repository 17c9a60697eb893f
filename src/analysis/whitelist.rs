//! Whitelist and shape validation
//!
//! Facts may only name `input` predicates and queries only `output`
//! predicates. JSON arguments are converted to typed values by the declared
//! column type; nothing is coerced.

use serde::Serialize;
use thiserror::Error;

use super::program::Program;
use crate::model::{Decl, Fact, Role, Value, ValueType};

/// Argument that matches anything in a query pattern
pub const WILDCARD: &str = "_";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("predicate '{predicate}' is not an allowed {} predicate", .role.as_str())]
    UnknownPredicate { predicate: String, role: Role },

    #[error("'{predicate}' takes {expected} arguments, got {found}")]
    ArityMismatch {
        predicate: String,
        expected: usize,
        found: usize,
    },

    #[error("argument '{column}' of '{predicate}' must be {expected}, got {found}")]
    TypeMismatch {
        predicate: String,
        column: String,
        expected: ValueType,
        found: &'static str,
    },

    #[error("argument '{column}' of '{predicate}' is invalid: {reason}")]
    InvalidValue {
        predicate: String,
        column: String,
        reason: String,
    },
}

impl ValidationError {
    pub fn invalid(
        predicate: impl Into<String>,
        column: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        ValidationError::InvalidValue {
            predicate: predicate.into(),
            column: column.into(),
            reason: reason.into(),
        }
    }

    /// Whether the predicate itself was refused, as opposed to its arguments
    pub fn is_unknown_predicate(&self) -> bool {
        matches!(self, ValidationError::UnknownPredicate { .. })
    }
}

/// JSON type name for error messages
pub fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// A validated query predicate and argument pattern
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryShape {
    pub predicate: String,
    /// `None` is a wildcard
    pub args: Vec<Option<Value>>,
}

/// Validates client-supplied facts and queries against a program's declarations.
pub struct Whitelist<'a> {
    program: &'a Program,
}

impl<'a> Whitelist<'a> {
    pub fn new(program: &'a Program) -> Self {
        Self { program }
    }

    fn decl(&self, predicate: &str, role: Role) -> Result<&'a Decl, ValidationError> {
        self.program
            .decl(predicate)
            .filter(|d| d.role == role)
            .ok_or_else(|| ValidationError::UnknownPredicate {
                predicate: predicate.to_string(),
                role,
            })
    }

    /// Validates one fact and converts it to typed values.
    pub fn fact(&self, predicate: &str, args: &[serde_json::Value]) -> Result<Fact, ValidationError> {
        let decl = self.decl(predicate, Role::Input)?;
        check_arity(decl, args.len())?;

        let values = decl
            .columns
            .iter()
            .zip(args)
            .map(|(col, arg)| convert(decl, &col.name, col.ty, arg))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Fact::new(predicate, values))
    }

    /// Validates a query pattern. Empty `args` means every argument is a
    /// wildcard; the string `"_"` is a wildcard in any position.
    pub fn query(&self, predicate: &str, args: &[serde_json::Value]) -> Result<QueryShape, ValidationError> {
        let decl = self.decl(predicate, Role::Output)?;

        if args.is_empty() {
            return Ok(QueryShape {
                predicate: predicate.to_string(),
                args: vec![None; decl.arity()],
            });
        }
        check_arity(decl, args.len())?;

        let pattern = decl
            .columns
            .iter()
            .zip(args)
            .map(|(col, arg)| match arg {
                serde_json::Value::String(s) if s == WILDCARD => Ok(None),
                _ => convert(decl, &col.name, col.ty, arg).map(Some),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(QueryShape {
            predicate: predicate.to_string(),
            args: pattern,
        })
    }
}

fn check_arity(decl: &Decl, found: usize) -> Result<(), ValidationError> {
    if decl.arity() != found {
        return Err(ValidationError::ArityMismatch {
            predicate: decl.pred.clone(),
            expected: decl.arity(),
            found,
        });
    }
    Ok(())
}

fn convert(
    decl: &Decl,
    column: &str,
    ty: ValueType,
    arg: &serde_json::Value,
) -> Result<Value, ValidationError> {
    let converted = match (ty, arg) {
        (ValueType::Id, serde_json::Value::String(s)) => Some(Value::id(s)),
        (ValueType::String, serde_json::Value::String(s)) => Some(Value::str(s)),
        (ValueType::Number, serde_json::Value::Number(n)) => n.as_f64().and_then(Value::num),
        _ => None,
    };
    converted.ok_or_else(|| ValidationError::TypeMismatch {
        predicate: decl.pred.clone(),
        column: column.to_string(),
        expected: ty,
        found: json_type_name(arg),
    })
}
