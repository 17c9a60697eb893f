//! Cooperative cancellation

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::errors::{EvalError, EvalResult};

/// Shared cancel flag with an optional deadline.
///
/// Clones observe the same flag, so a request handler can trip a token that a
/// blocking evaluation thread is polling.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: Some(deadline),
        }
    }

    pub fn with_timeout(budget: Duration) -> Self {
        Self::with_deadline(Instant::now() + budget)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fails once the token is cancelled or its deadline has passed.
    pub fn check(&self) -> EvalResult<()> {
        if self.is_cancelled() {
            return Err(EvalError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(EvalError::DeadlineExceeded),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_flag() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(token.check().is_ok());
        other.cancel();
        assert_eq!(token.check(), Err(EvalError::Cancelled));
    }

    #[test]
    fn test_deadline() {
        let token = CancelToken::with_deadline(Instant::now());
        assert_eq!(token.check(), Err(EvalError::DeadlineExceeded));
        assert!(CancelToken::with_timeout(Duration::from_secs(60)).check().is_ok());
    }
}
