use backoff::backoff::Backoff;
use metrics::counter;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::config::UNLIMITED_RETRIES;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryLimit {
    Limited(u32),
    Unlimited,
}

impl RetryLimit {
    /// Maps the configured integer onto a limit. Only `-1` means unlimited;
    /// `Config::validate` rejects other negatives before this is reached.
    pub fn from_setting(value: i64) -> Self {
        if value == UNLIMITED_RETRIES {
            RetryLimit::Unlimited
        } else {
            RetryLimit::Limited(u32::try_from(value.max(0)).unwrap_or(u32::MAX))
        }
    }
}

/// Counts down consecutive transport failures. The pause between attempts
/// is constant; there is no growth.
#[derive(Debug, Clone)]
pub struct RetryBudget {
    limit: RetryLimit,
    remaining: u32,
    pause: Duration,
}

impl RetryBudget {
    pub fn new(limit: RetryLimit, pause: Duration) -> Self {
        let remaining = match limit {
            RetryLimit::Limited(n) => n,
            RetryLimit::Unlimited => u32::MAX,
        };
        Self {
            limit,
            remaining,
            pause,
        }
    }

    pub fn limit(&self) -> RetryLimit {
        self.limit
    }

    /// Retries still available, `None` when unlimited.
    pub fn remaining(&self) -> Option<u32> {
        match self.limit {
            RetryLimit::Limited(_) => Some(self.remaining),
            RetryLimit::Unlimited => None,
        }
    }

    /// Retries spent since the last reset.
    pub fn consumed(&self) -> u32 {
        match self.limit {
            RetryLimit::Limited(n) => n - self.remaining,
            RetryLimit::Unlimited => u32::MAX - self.remaining,
        }
    }
}

impl Backoff for RetryBudget {
    fn reset(&mut self) {
        *self = RetryBudget::new(self.limit, self.pause);
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        match self.limit {
            RetryLimit::Unlimited => {
                // Keep counting for logs; wrap instead of running dry.
                self.remaining = self.remaining.checked_sub(1).unwrap_or(u32::MAX);
                Some(self.pause)
            }
            RetryLimit::Limited(_) if self.remaining == 0 => None,
            RetryLimit::Limited(_) => {
                self.remaining -= 1;
                Some(self.pause)
            }
        }
    }
}

/// Runs `operation`, resubmitting it unchanged after each retryable failure
/// while the shared budget lasts. Success resets the budget; fatal errors
/// pass straight through.
pub async fn retry_with_budget<F, Fut, T>(
    budget: &Mutex<RetryBudget>,
    operation: F,
    operation_name: &str,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    loop {
        match operation().await {
            Ok(result) => {
                let mut budget = budget.lock().unwrap_or_else(PoisonError::into_inner);
                if budget.consumed() > 0 {
                    debug!(
                        operation = operation_name,
                        retries = budget.consumed(),
                        "Operation succeeded after retries"
                    );
                }
                budget.reset();
                return Ok(result);
            }
            Err(e) if e.is_retryable() => {
                let (next, attempt) = {
                    let mut budget = budget.lock().unwrap_or_else(PoisonError::into_inner);
                    let next = budget.next_backoff();
                    (next, budget.consumed())
                };

                match next {
                    Some(pause) => {
                        counter!("harvester_retries_total", "operation" => operation_name.to_string())
                            .increment(1);
                        warn!(
                            operation = operation_name,
                            attempt,
                            error = %e,
                            "ERROR: retrying..."
                        );
                        if !pause.is_zero() {
                            tokio::time::sleep(pause).await;
                        }
                    }
                    None => {
                        error!(
                            operation = operation_name,
                            attempts = attempt,
                            error = %e,
                            "exit due to request failure"
                        );
                        return Err(Error::RetriesExhausted {
                            operation: operation_name.to_string(),
                            attempts: attempt,
                            last_error: e.to_string(),
                        });
                    }
                }
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> Error {
        Error::Status {
            url: "https://example.test/streams/poll".into(),
            status: 502,
        }
    }

    /// Fails the first `failures` calls with a transient error.
    async fn flaky(calls: &AtomicU32, failures: u32) -> Result<u32> {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        if n < failures {
            Err(transient())
        } else {
            Ok(n)
        }
    }

    #[test]
    fn sentinel_maps_to_unlimited() {
        assert_eq!(RetryLimit::from_setting(-1), RetryLimit::Unlimited);
        assert_eq!(RetryLimit::from_setting(0), RetryLimit::Limited(0));
        assert_eq!(RetryLimit::from_setting(5), RetryLimit::Limited(5));
    }

    #[test]
    fn reset_restores_full_budget() {
        let mut budget = RetryBudget::new(RetryLimit::Limited(2), Duration::ZERO);
        assert!(budget.next_backoff().is_some());
        assert!(budget.next_backoff().is_some());
        assert!(budget.next_backoff().is_none());
        budget.reset();
        assert_eq!(budget.remaining(), Some(2));
        assert_eq!(budget.consumed(), 0);
    }

    #[test]
    fn unlimited_budget_never_runs_dry() {
        let mut budget = RetryBudget::new(RetryLimit::Unlimited, Duration::ZERO);
        for _ in 0..10_000 {
            assert!(budget.next_backoff().is_some());
        }
        assert_eq!(budget.remaining(), None);
    }

    #[tokio::test]
    async fn tolerates_exactly_budget_failures() {
        let budget = Mutex::new(RetryBudget::new(RetryLimit::Limited(3), Duration::ZERO));
        let calls = AtomicU32::new(0);

        let result = retry_with_budget(&budget, || flaky(&calls, 3), "poll").await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn one_failure_past_budget_is_fatal() {
        let budget = Mutex::new(RetryBudget::new(RetryLimit::Limited(3), Duration::ZERO));
        let calls = AtomicU32::new(0);

        let err = retry_with_budget(&budget, || flaky(&calls, 4), "poll")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn success_resets_shared_budget() {
        let budget = Mutex::new(RetryBudget::new(RetryLimit::Limited(2), Duration::ZERO));

        let calls = AtomicU32::new(0);
        retry_with_budget(&budget, || flaky(&calls, 2), "first")
            .await
            .unwrap();

        // A second cycle gets the full budget again.
        let calls = AtomicU32::new(0);
        retry_with_budget(&budget, || flaky(&calls, 2), "second")
            .await
            .unwrap();
        assert_eq!(budget.lock().unwrap().remaining(), Some(2));
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let budget = Mutex::new(RetryBudget::new(RetryLimit::Limited(5), Duration::ZERO));
        let calls = AtomicU32::new(0);

        let err = retry_with_budget(
            &budget,
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Error::Protocol("unexpected shape".into()))
            },
            "poll",
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Protocol(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(budget.lock().unwrap().remaining(), Some(5));
    }

    proptest! {
        #[test]
        fn limited_budget_grants_exactly_limit_retries(limit in 0u32..200) {
            let mut budget = RetryBudget::new(RetryLimit::Limited(limit), Duration::ZERO);
            let mut granted = 0;
            while budget.next_backoff().is_some() {
                granted += 1;
            }
            prop_assert_eq!(granted, limit);
            prop_assert_eq!(budget.consumed(), limit);
        }
    }
}
