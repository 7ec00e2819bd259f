//! Declarative retry policy keyed by [`ErrorKind`]

use std::time::Duration;

use crate::error::ErrorKind;

/// What a worker should do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for the backoff, then retry the same candidate
    Retry(Duration),
    /// Pause the whole worker, slow the rate limiter, then retry
    Cooldown(Duration),
    /// Never retried; skip the candidate
    Skip,
    /// Retry budget spent; skip the candidate and count it as exhausted
    GiveUp,
    /// Terminate the worker
    Abort,
}

/// Pure retry policy. Performs no I/O and holds no per-candidate state.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum retries per candidate (not counting the first attempt)
    pub retry_limit: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Worker-level pause after a rate-limited response
    pub cooldown: Duration,
    /// Consecutive exhausted candidates before the worker escalates to fatal
    pub max_exhausted: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_limit: 3,
            backoff_base: Duration::from_secs(2),
            backoff_max: Duration::from_secs(30),
            cooldown: Duration::from_secs(60),
            max_exhausted: 3,
        }
    }
}

impl RetryPolicy {
    /// Decide how to proceed after a failure of `kind`, given how many retries
    /// the candidate has already consumed.
    pub fn should_retry(&self, kind: ErrorKind, retries: u32) -> RetryDecision {
        match kind {
            ErrorKind::ExtractionMismatch => RetryDecision::Skip,
            ErrorKind::Fatal => RetryDecision::Abort,
            _ if retries >= self.retry_limit => RetryDecision::GiveUp,
            ErrorKind::TransientNetwork => RetryDecision::Retry(self.backoff(retries + 1)),
            ErrorKind::RateLimited => RetryDecision::Cooldown(self.cooldown),
        }
    }

    /// Exponential backoff: `base * 2^(attempt - 1)`, capped at `backoff_max`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff_base
            .saturating_mul(factor)
            .min(self.backoff_max)
    }

    /// Whether `streak` consecutive exhausted candidates warrant terminating the worker
    pub fn exhausted_is_fatal(&self, streak: u32) -> bool {
        streak >= self.max_exhausted.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            retry_limit: 3,
            backoff_base: Duration::from_secs(2),
            backoff_max: Duration::from_secs(10),
            cooldown: Duration::from_secs(30),
            max_exhausted: 2,
        }
    }

    #[test]
    fn backoff_exponential() {
        let p = policy();
        assert_eq!(p.backoff(1), Duration::from_secs(2));
        assert_eq!(p.backoff(2), Duration::from_secs(4));
        assert_eq!(p.backoff(3), Duration::from_secs(8));
        assert_eq!(p.backoff(4), Duration::from_secs(10));
        assert_eq!(p.backoff(40), Duration::from_secs(10));
    }

    #[test]
    fn transient_retries_until_limit() {
        let p = policy();
        assert_eq!(
            p.should_retry(ErrorKind::TransientNetwork, 0),
            RetryDecision::Retry(Duration::from_secs(2))
        );
        assert_eq!(
            p.should_retry(ErrorKind::TransientNetwork, 2),
            RetryDecision::Retry(Duration::from_secs(8))
        );
        assert_eq!(
            p.should_retry(ErrorKind::TransientNetwork, 3),
            RetryDecision::GiveUp
        );
    }

    #[test]
    fn rate_limited_cools_down() {
        let p = policy();
        assert_eq!(
            p.should_retry(ErrorKind::RateLimited, 0),
            RetryDecision::Cooldown(Duration::from_secs(30))
        );
        assert_eq!(p.should_retry(ErrorKind::RateLimited, 3), RetryDecision::GiveUp);
    }

    #[test]
    fn mismatch_never_retried() {
        let p = policy();
        assert_eq!(p.should_retry(ErrorKind::ExtractionMismatch, 0), RetryDecision::Skip);
    }

    #[test]
    fn fatal_aborts() {
        assert_eq!(policy().should_retry(ErrorKind::Fatal, 0), RetryDecision::Abort);
    }

    #[test]
    fn zero_retry_limit_gives_up_immediately() {
        let p = RetryPolicy {
            retry_limit: 0,
            ..policy()
        };
        assert_eq!(
            p.should_retry(ErrorKind::TransientNetwork, 0),
            RetryDecision::GiveUp
        );
    }

    #[test]
    fn exhausted_threshold() {
        let p = policy();
        assert!(!p.exhausted_is_fatal(1));
        assert!(p.exhausted_is_fatal(2));
    }

    #[test]
    fn never_more_retries_than_limit() {
        let p = policy();
        let mut retries = 0;
        while let RetryDecision::Retry(_) | RetryDecision::Cooldown(_) =
            p.should_retry(ErrorKind::TransientNetwork, retries)
        {
            retries += 1;
        }
        assert_eq!(retries, p.retry_limit);
    }
}
