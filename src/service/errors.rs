//! Service errors
//!
//! Every failure a client can see has a stable kind, an HTTP status and a
//! code. Internal faults carry their detail for the log.

use thiserror::Error;

use crate::analysis::ValidationError;
use crate::domain::DomainError;
use crate::eval::EvalError;
use crate::ruleset::{CompileError, RulesetError};
use crate::store::WindowError;

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ServiceError {
    #[error("rules brain is disabled")]
    Disabled,

    #[error("{0}")]
    UnknownPredicate(String),

    #[error("{0}")]
    ShapeMismatch(String),

    #[error("fact window holds at most {max} facts, got {count}")]
    WindowExceeded { count: usize, max: usize },

    /// The request body was larger than the configured limit
    #[error("{0}")]
    PayloadTooLarge(String),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("unknown pricing strategy '{0}'")]
    StrategyUnknown(String),

    #[error("facts were built for ruleset {given}, current ruleset is {current}")]
    RulesetMismatch { given: String, current: String },

    #[error("no facts loaded in session '{0}'")]
    WindowNotLoaded(String),

    #[error("evaluation exceeded its time budget")]
    Timeout,

    #[error("evaluation cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn internal(message: impl Into<String>) -> Self {
        ServiceError::Internal(message.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::Disabled => "Disabled",
            ServiceError::UnknownPredicate(_) => "UnknownPredicate",
            ServiceError::ShapeMismatch(_) => "ShapeMismatch",
            ServiceError::WindowExceeded { .. } => "WindowExceeded",
            ServiceError::PayloadTooLarge(_) => "PayloadTooLarge",
            ServiceError::Compile(_) => "CompileError",
            ServiceError::StrategyUnknown(_) => "StrategyUnknown",
            ServiceError::RulesetMismatch { .. } => "RulesetMismatch",
            ServiceError::WindowNotLoaded(_) => "WindowNotLoaded",
            ServiceError::Timeout => "Timeout",
            ServiceError::Cancelled => "Cancelled",
            ServiceError::Internal(_) => "Internal",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            ServiceError::Disabled => 503,
            ServiceError::UnknownPredicate(_) | ServiceError::StrategyUnknown(_) => 400,
            ServiceError::WindowNotLoaded(_) => 404,
            ServiceError::RulesetMismatch { .. } => 409,
            ServiceError::WindowExceeded { .. } | ServiceError::PayloadTooLarge(_) => 413,
            ServiceError::ShapeMismatch(_) => 422,
            ServiceError::Timeout | ServiceError::Cancelled => 504,
            ServiceError::Compile(_) | ServiceError::Internal(_) => 500,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Disabled => "RB_DISABLED",
            ServiceError::UnknownPredicate(_) => "RB_UNKNOWN_PREDICATE",
            ServiceError::ShapeMismatch(_) => "RB_SHAPE_MISMATCH",
            ServiceError::WindowExceeded { .. } => "RB_WINDOW_EXCEEDED",
            ServiceError::PayloadTooLarge(_) => "RB_PAYLOAD_TOO_LARGE",
            ServiceError::Compile(e) => e.code(),
            ServiceError::StrategyUnknown(_) => "RB_STRATEGY_UNKNOWN",
            ServiceError::RulesetMismatch { .. } => "RB_RULESET_MISMATCH",
            ServiceError::WindowNotLoaded(_) => "RB_WINDOW_NOT_LOADED",
            ServiceError::Timeout => "RB_TIMEOUT",
            ServiceError::Cancelled => "RB_CANCELLED",
            ServiceError::Internal(_) => "RB_INTERNAL",
        }
    }

    /// Faults the client could not have caused
    pub fn is_internal(&self) -> bool {
        self.status_code() >= 500 && !matches!(self, ServiceError::Timeout | ServiceError::Cancelled)
    }
}

impl From<ValidationError> for ServiceError {
    fn from(err: ValidationError) -> Self {
        if err.is_unknown_predicate() {
            ServiceError::UnknownPredicate(err.to_string())
        } else {
            ServiceError::ShapeMismatch(err.to_string())
        }
    }
}

impl From<WindowError> for ServiceError {
    fn from(err: WindowError) -> Self {
        match err {
            WindowError::WindowExceeded { count, max } => ServiceError::WindowExceeded { count, max },
            WindowError::Invalid { index, source } => match ServiceError::from(source) {
                ServiceError::UnknownPredicate(msg) => {
                    ServiceError::UnknownPredicate(format!("fact #{}: {}", index, msg))
                }
                ServiceError::ShapeMismatch(msg) => {
                    ServiceError::ShapeMismatch(format!("fact #{}: {}", index, msg))
                }
                other => other,
            },
        }
    }
}

impl From<RulesetError> for ServiceError {
    fn from(err: RulesetError) -> Self {
        match err {
            RulesetError::Compile(e) => ServiceError::Compile(e),
            io @ RulesetError::Io { .. } => ServiceError::Internal(io.to_string()),
        }
    }
}

impl From<EvalError> for ServiceError {
    fn from(err: EvalError) -> Self {
        match err {
            EvalError::Cancelled => ServiceError::Cancelled,
            EvalError::DeadlineExceeded => ServiceError::Timeout,
            other => ServiceError::Internal(other.to_string()),
        }
    }
}

impl From<DomainError> for ServiceError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::StrategyUnknown(name) => ServiceError::StrategyUnknown(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Role;

    #[test]
    fn test_status_codes() {
        assert_eq!(ServiceError::Disabled.status_code(), 503);
        assert_eq!(ServiceError::UnknownPredicate("x".into()).status_code(), 400);
        assert_eq!(ServiceError::ShapeMismatch("x".into()).status_code(), 422);
        assert_eq!(ServiceError::WindowExceeded { count: 2, max: 1 }.status_code(), 413);
        assert_eq!(ServiceError::PayloadTooLarge("x".into()).status_code(), 413);
        assert_eq!(ServiceError::StrategyUnknown("x".into()).status_code(), 400);
        assert_eq!(ServiceError::WindowNotLoaded("default".into()).status_code(), 404);
        assert_eq!(ServiceError::Timeout.status_code(), 504);
        assert_eq!(
            ServiceError::RulesetMismatch {
                given: "a".into(),
                current: "b".into()
            }
            .status_code(),
            409
        );
    }

    #[test]
    fn test_compile_error_keeps_code() {
        let err = ServiceError::from(CompileError::EmptyRuleset("rules".into()));
        assert_eq!(err.kind(), "CompileError");
        assert_eq!(err.code(), "RB_COMPILE_EMPTY_RULESET");
        assert_eq!(err.status_code(), 500);
        assert!(err.is_internal());
    }

    #[test]
    fn test_window_errors_map_by_cause() {
        let unknown = WindowError::Invalid {
            index: 3,
            source: ValidationError::UnknownPredicate {
                predicate: "bogus".into(),
                role: Role::Input,
            },
        };
        match ServiceError::from(unknown) {
            ServiceError::UnknownPredicate(msg) => assert!(msg.starts_with("fact #3")),
            other => panic!("unexpected {:?}", other),
        }

        let shape = WindowError::Invalid {
            index: 0,
            source: ValidationError::ArityMismatch {
                predicate: "seen".into(),
                expected: 1,
                found: 2,
            },
        };
        assert_eq!(ServiceError::from(shape).kind(), "ShapeMismatch");
    }

    #[test]
    fn test_eval_errors() {
        assert_eq!(ServiceError::from(EvalError::DeadlineExceeded), ServiceError::Timeout);
        assert_eq!(ServiceError::from(EvalError::Cancelled), ServiceError::Cancelled);
        assert!(!ServiceError::Timeout.is_internal());
        assert_eq!(
            ServiceError::from(EvalError::MissingParam("now".into())).kind(),
            "Internal"
        );
    }
}
