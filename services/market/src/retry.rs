//! Bounded retry of optimistic units of work

use tracing::{debug, warn};
use types::errors::MarketError;

use crate::store::CommitError;

/// Run `attempt` until it commits, fails for good, or has conflicted
/// `1 + max_retries` times
///
/// Each attempt must start from fresh reads: a conflict means some row it
/// read has since been committed by someone else.
pub(crate) fn with_retry<T>(
    operation: &'static str,
    max_retries: u32,
    mut attempt: impl FnMut() -> Result<T, CommitError>,
) -> Result<T, MarketError> {
    let attempts = max_retries.saturating_add(1);
    for n in 1..=attempts {
        match attempt() {
            Ok(value) => return Ok(value),
            Err(CommitError::Fatal(err)) => return Err(err),
            Err(CommitError::Conflict { expected, found }) => {
                debug!(operation, attempt = n, expected, found, "Version conflict, retrying");
                std::thread::yield_now();
            }
        }
    }
    warn!(operation, attempts, "Giving up after repeated version conflicts");
    Err(MarketError::ConcurrencyConflict { attempts })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_returns_first_success() {
        let mut calls = 0;
        let result = with_retry("test", 5, || {
            calls += 1;
            if calls < 3 {
                Err(CommitError::Conflict { expected: 1, found: 2 })
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result, Ok(3));
    }

    #[test]
    fn test_fatal_errors_are_not_retried() {
        let mut calls = 0;
        let result: Result<(), _> = with_retry("test", 5, || {
            calls += 1;
            Err(CommitError::Fatal(MarketError::SelfTrade))
        });
        assert_eq!(result, Err(MarketError::SelfTrade));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_conflicts_exhaust_budget() {
        let mut calls = 0;
        let result: Result<(), _> = with_retry("test", 5, || {
            calls += 1;
            Err(CommitError::Conflict { expected: 1, found: 2 })
        });
        assert_eq!(result, Err(MarketError::ConcurrencyConflict { attempts: 6 }));
        assert_eq!(calls, 6);
    }
}
