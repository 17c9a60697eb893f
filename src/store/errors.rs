//! Fact window errors
//!
//! Error codes:
//! - RB_WINDOW_EXCEEDED
//! - RB_WINDOW_INVALID_FACT

use thiserror::Error;

use crate::analysis::ValidationError;

pub type StoreResult<T> = Result<T, WindowError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum WindowError {
    #[error("fact window holds at most {max} facts, got {count}")]
    WindowExceeded { count: usize, max: usize },

    /// The fact at `index` failed validation; nothing from the batch was kept.
    #[error("fact #{index}: {source}")]
    Invalid {
        index: usize,
        #[source]
        source: ValidationError,
    },
}

impl WindowError {
    pub fn code(&self) -> &'static str {
        match self {
            WindowError::WindowExceeded { .. } => "RB_WINDOW_EXCEEDED",
            WindowError::Invalid { .. } => "RB_WINDOW_INVALID_FACT",
        }
    }
}
