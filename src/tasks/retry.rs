use serde::{Deserialize, Serialize};

use crate::tasks::error::TaskError;

/// How often, and on which failure kinds, a deferred task is retried.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub retries: u32,
    /// Failure kinds that trigger a retry. Empty retries every failure.
    #[serde(default)]
    pub retry_on: Vec<String>,
}

impl RetryPolicy {
    pub fn new(retries: u32) -> Self {
        Self {
            retries,
            retry_on: Vec::new(),
        }
    }

    pub fn on(mut self, kind: impl Into<String>) -> Self {
        self.retry_on.push(kind.into());
        self
    }

    /// Whether `error` is eligible for retry, ignoring the remaining count.
    pub fn matches(&self, error: &TaskError) -> bool {
        self.retry_on.is_empty() || self.retry_on.iter().any(|k| k == error.kind())
    }
}

/// Countdown before the next background attempt: doubles each time, at least 1s.
pub fn next_countdown(current_secs: u64) -> u64 {
    current_secs.saturating_mul(2).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_retries_everything() {
        let policy = RetryPolicy::new(2);
        assert!(policy.matches(&TaskError::failed("Anything", "x")));
        assert!(policy.matches(&TaskError::TimedOut(5)));
    }

    #[test]
    fn filter_limits_retry_to_named_kinds() {
        let policy = RetryPolicy::new(2).on("TransientError");
        assert!(policy.matches(&TaskError::failed("TransientError", "flaky")));
        assert!(!policy.matches(&TaskError::failed("ValueError", "bad")));
    }

    #[test]
    fn countdown_doubles_from_one() {
        assert_eq!(next_countdown(0), 1);
        assert_eq!(next_countdown(1), 2);
        assert_eq!(next_countdown(4), 8);
    }
}
