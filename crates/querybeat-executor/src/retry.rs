use std::time::Duration;

use querybeat_core::{QueryPayload, RetryPolicy};

use crate::error::ExecutionError;

/// Result of one attempt, as seen by the retry controller.
#[derive(Debug, Clone)]
pub enum AttemptOutcome {
    Success(QueryPayload),
    /// A recoverable failure; the task's policy decides what happens next.
    Retry(ExecutionError),
    /// Finalize now, whatever the policy says.
    Failure(ExecutionError),
}

impl From<Result<QueryPayload, ExecutionError>> for AttemptOutcome {
    fn from(result: Result<QueryPayload, ExecutionError>) -> Self {
        match result {
            Ok(payload) => AttemptOutcome::Success(payload),
            Err(e) if e.is_recoverable() => AttemptOutcome::Retry(e),
            Err(e) => AttemptOutcome::Failure(e),
        }
    }
}

/// What to do with an execution after a recoverable failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Record RETRY with `retry_count` and run again after `delay`.
    Reenqueue { retry_count: u32, delay: Duration },
    /// The budget is spent: record FAILURE.
    Finalize,
}

/// Bounded, fixed-delay retry. No jitter, no backoff growth.
#[derive(Debug, Clone, Copy)]
pub struct RetryController;

impl RetryController {
    /// `retry_count` is the count already on the record for this execution.
    pub fn decide(policy: &RetryPolicy, retry_count: u32) -> RetryDecision {
        let next = retry_count.saturating_add(1);
        if next <= policy.max_retries {
            RetryDecision::Reenqueue {
                retry_count: next,
                delay: policy.delay(),
            }
        } else {
            RetryDecision::Finalize
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use querybeat_core::ValidationError;

    #[test]
    fn retries_until_budget_is_spent() {
        let policy = RetryPolicy::new(2, Duration::from_millis(250));
        assert_eq!(
            RetryController::decide(&policy, 0),
            RetryDecision::Reenqueue {
                retry_count: 1,
                delay: Duration::from_millis(250)
            }
        );
        assert_eq!(
            RetryController::decide(&policy, 1),
            RetryDecision::Reenqueue {
                retry_count: 2,
                delay: Duration::from_millis(250)
            }
        );
        assert_eq!(RetryController::decide(&policy, 2), RetryDecision::Finalize);
    }

    #[test]
    fn zero_retries_finalizes_first_failure() {
        assert_eq!(
            RetryController::decide(&RetryPolicy::no_retry(), 0),
            RetryDecision::Finalize
        );
    }

    #[test]
    fn outcome_from_result() {
        let ok: Result<QueryPayload, ExecutionError> = Ok(QueryPayload::default());
        assert!(matches!(AttemptOutcome::from(ok), AttemptOutcome::Success(_)));

        let refused = Err(ExecutionError::Connection("refused".into()));
        assert!(matches!(AttemptOutcome::from(refused), AttemptOutcome::Retry(_)));

        let invalid = Err(ExecutionError::Validation(ValidationError::NotReadOnly));
        assert!(matches!(AttemptOutcome::from(invalid), AttemptOutcome::Failure(_)));
    }
}
