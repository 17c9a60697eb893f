//! Evaluation errors
//!
//! Error codes:
//! - RB_EVAL_CANCELLED
//! - RB_EVAL_DEADLINE_EXCEEDED
//! - RB_EVAL_MISSING_PARAM
//! - RB_EVAL_INTERNAL

use thiserror::Error;

pub type EvalResult<T> = Result<T, EvalError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("evaluation cancelled")]
    Cancelled,

    #[error("evaluation exceeded its deadline")]
    DeadlineExceeded,

    #[error("parameter '${0}' is not bound")]
    MissingParam(String),

    #[error("internal evaluation error: {0}")]
    Internal(String),
}

impl EvalError {
    pub fn code(&self) -> &'static str {
        match self {
            EvalError::Cancelled => "RB_EVAL_CANCELLED",
            EvalError::DeadlineExceeded => "RB_EVAL_DEADLINE_EXCEEDED",
            EvalError::MissingParam(_) => "RB_EVAL_MISSING_PARAM",
            EvalError::Internal(_) => "RB_EVAL_INTERNAL",
        }
    }
}
