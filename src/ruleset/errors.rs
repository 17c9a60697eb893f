//! Ruleset error types
//!
//! Error codes:
//! - RB_COMPILE_SYNTAX
//! - RB_COMPILE_EMPTY_RULESET
//! - RB_COMPILE_NEGATIVE_CYCLE
//! - RB_COMPILE_AGGREGATE_IN_RECURSION
//! - RB_COMPILE_VALUE_INVENTION
//! - RB_COMPILE_UNSAFE_RULE
//! - RB_COMPILE_UNDEFINED_PREDICATE
//! - RB_COMPILE_ARITY_MISMATCH
//! - RB_COMPILE_DERIVED_INPUT
//! - RB_COMPILE_UNDERIVED_OUTPUT
//! - RB_COMPILE_DUPLICATE_DECLARATION
//! - RB_COMPILE_CONSTANT_TYPE
//! - RB_COMPILE_UNKNOWN_PARAM
//! - RB_COMPILE_UNKNOWN_FUNCTION
//! - RB_COMPILE_CONTRACT
//!
//! Any of these blocks the whole program; nothing is served from a ruleset
//! that failed to compile.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::model::SourcePos;

/// Result type for compilation
pub type CompileResult<T> = Result<T, CompileError>;

/// Result type for ruleset loading
pub type RulesetResult<T> = Result<T, RulesetError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error("{pos}: syntax error: {message}")]
    Syntax { pos: SourcePos, message: String },

    #[error("no rule files (*.dl) found in {0}")]
    EmptyRuleset(String),

    #[error("recursion through negation: rule {rule} negates '{negated}' inside the cycle {{{}}}", .cycle.join(", "))]
    NegativeCycle {
        rule: String,
        negated: String,
        cycle: Vec<String>,
    },

    #[error("rule {rule} aggregates into '{predicate}', which is recursive")]
    AggregateInRecursion { rule: String, predicate: String },

    #[error("rule {rule} computes '{variable}' inside the recursive predicate '{predicate}'")]
    ValueInvention {
        rule: String,
        predicate: String,
        variable: String,
    },

    #[error("rule {rule} is unsafe: variable '{variable}' {reason}")]
    UnsafeRule {
        rule: String,
        variable: String,
        reason: String,
    },

    #[error("rule {rule} uses '{predicate}', which is neither an input nor derived by any rule")]
    UndefinedPredicate { rule: String, predicate: String },

    #[error("{at}: '{predicate}' used with {found} arguments, expected {expected}")]
    ArityMismatch {
        at: String,
        predicate: String,
        expected: usize,
        found: usize,
    },

    #[error("rule {rule} derives '{predicate}', which is declared as input")]
    DerivedInput { rule: String, predicate: String },

    #[error("output '{0}' is not derived by any rule")]
    UnderivedOutput(String),

    #[error("{pos}: '{predicate}' is declared more than once")]
    DuplicateDeclaration { pos: SourcePos, predicate: String },

    #[error("{at}: argument '{column}' of '{predicate}' expects {expected}, got {found}")]
    ConstantType {
        at: String,
        predicate: String,
        column: String,
        expected: String,
        found: String,
    },

    #[error("rule {rule} references unknown parameter '${param}'")]
    UnknownParam { rule: String, param: String },

    #[error("rule {rule} calls unknown function '{name}/{arity}'")]
    UnknownFunction {
        rule: String,
        name: String,
        arity: usize,
    },

    #[error("ruleset contract violated for '{predicate}': {reason}")]
    Contract { predicate: String, reason: String },
}

impl CompileError {
    pub fn syntax(pos: SourcePos, message: impl Into<String>) -> Self {
        CompileError::Syntax {
            pos,
            message: message.into(),
        }
    }

    pub fn unsafe_rule(
        rule: impl Into<String>,
        variable: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        CompileError::UnsafeRule {
            rule: rule.into(),
            variable: variable.into(),
            reason: reason.into(),
        }
    }

    pub fn contract(predicate: impl Into<String>, reason: impl Into<String>) -> Self {
        CompileError::Contract {
            predicate: predicate.into(),
            reason: reason.into(),
        }
    }

    /// Returns the string code for this error
    pub fn code(&self) -> &'static str {
        match self {
            CompileError::Syntax { .. } => "RB_COMPILE_SYNTAX",
            CompileError::EmptyRuleset(_) => "RB_COMPILE_EMPTY_RULESET",
            CompileError::NegativeCycle { .. } => "RB_COMPILE_NEGATIVE_CYCLE",
            CompileError::AggregateInRecursion { .. } => "RB_COMPILE_AGGREGATE_IN_RECURSION",
            CompileError::ValueInvention { .. } => "RB_COMPILE_VALUE_INVENTION",
            CompileError::UnsafeRule { .. } => "RB_COMPILE_UNSAFE_RULE",
            CompileError::UndefinedPredicate { .. } => "RB_COMPILE_UNDEFINED_PREDICATE",
            CompileError::ArityMismatch { .. } => "RB_COMPILE_ARITY_MISMATCH",
            CompileError::DerivedInput { .. } => "RB_COMPILE_DERIVED_INPUT",
            CompileError::UnderivedOutput(_) => "RB_COMPILE_UNDERIVED_OUTPUT",
            CompileError::DuplicateDeclaration { .. } => "RB_COMPILE_DUPLICATE_DECLARATION",
            CompileError::ConstantType { .. } => "RB_COMPILE_CONSTANT_TYPE",
            CompileError::UnknownParam { .. } => "RB_COMPILE_UNKNOWN_PARAM",
            CompileError::UnknownFunction { .. } => "RB_COMPILE_UNKNOWN_FUNCTION",
            CompileError::Contract { .. } => "RB_COMPILE_CONTRACT",
        }
    }
}

/// Failure to obtain a compiled program from the rules directory.
///
/// I/O failures are internal faults; compile failures are reported to
/// callers as `CompileError`.
#[derive(Debug, Error)]
pub enum RulesetError {
    #[error("failed to read rules from {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Compile(#[from] CompileError),
}

impl RulesetError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        RulesetError::Io {
            path: path.into(),
            source,
        }
    }
}
