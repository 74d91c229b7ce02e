//! Bounded retry for camera acquisition and frame reads.
//!
//! Acquisition is a small state machine: open, verify with a live read, and on
//! failure wait and try again until the attempt budget runs out. Reads use a
//! consecutive-failure budget that resets on every success.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RetryError<E: std::fmt::Display> {
    #[error("gave up after {attempts} attempt(s): {last}")]
    Exhausted { attempts: u32, last: E },
    #[error("cancelled before a device could be acquired")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Run `open` then `verify` until both succeed or the attempts are used up.
    ///
    /// `keep_going` is checked before every attempt and before every pause so
    /// a caller shutting down is not held for the whole schedule.
    pub fn acquire<T, E, O, V, K>(
        &self,
        mut open: O,
        mut verify: V,
        keep_going: K,
    ) -> Result<T, RetryError<E>>
    where
        E: std::fmt::Display,
        O: FnMut(u32) -> Result<T, E>,
        V: FnMut(&mut T) -> Result<(), E>,
        K: Fn() -> bool,
    {
        let attempts = self.attempts.max(1);
        let mut last = None;

        for attempt in 1..=attempts {
            if !keep_going() {
                return Err(RetryError::Cancelled);
            }

            let result = open(attempt).and_then(|mut handle| {
                verify(&mut handle)?;
                Ok(handle)
            });

            match result {
                Ok(handle) => {
                    if attempt > 1 {
                        tracing::info!(attempt, "device acquired after retry");
                    }
                    return Ok(handle);
                }
                Err(e) => {
                    tracing::warn!(attempt, attempts, error = %e, "device acquisition failed");
                    last = Some(e);
                }
            }

            if attempt < attempts {
                if !keep_going() {
                    return Err(RetryError::Cancelled);
                }
                std::thread::sleep(self.delay);
            }
        }

        match last {
            Some(last) => Err(RetryError::Exhausted { attempts, last }),
            None => Err(RetryError::Cancelled),
        }
    }
}

/// Counts consecutive failures against a fixed limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureBudget {
    limit: u32,
    consecutive: u32,
}

impl FailureBudget {
    pub fn new(limit: u32) -> Self {
        Self {
            limit: limit.max(1),
            consecutive: 0,
        }
    }

    /// Record a failure. Returns `true` once the budget is spent.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive += 1;
        self.consecutive >= self.limit
    }

    pub fn record_success(&mut self) {
        self.consecutive = 0;
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn quick(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_succeeds_first_try() {
        let got: Result<u32, RetryError<String>> =
            quick(3).acquire(|n| Ok(n), |_| Ok(()), || true);
        assert_eq!(got.unwrap(), 1);
    }

    #[test]
    fn test_gives_up_after_attempts() {
        let opens = Cell::new(0);
        let got: Result<(), RetryError<String>> = quick(3).acquire(
            |n| {
                opens.set(opens.get() + 1);
                Err(format!("busy {n}"))
            },
            |_| Ok(()),
            || true,
        );
        assert_eq!(opens.get(), 3);
        match got {
            Err(RetryError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert_eq!(last, "busy 3");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_verification_failure_retries() {
        let got: Result<u32, RetryError<String>> = quick(3).acquire(
            |n| Ok(n),
            |n| if *n < 2 { Err("no frame".into()) } else { Ok(()) },
            || true,
        );
        assert_eq!(got.unwrap(), 2);
    }

    #[test]
    fn test_cancelled_before_start() {
        let got: Result<(), RetryError<String>> = quick(3).acquire(|_| Ok(()), |_| Ok(()), || false);
        assert!(matches!(got, Err(RetryError::Cancelled)));
    }

    #[test]
    fn test_failure_budget() {
        let mut budget = FailureBudget::new(3);
        assert!(!budget.record_failure());
        assert!(!budget.record_failure());
        budget.record_success();
        assert_eq!(budget.consecutive(), 0);
        assert!(!budget.record_failure());
        assert!(!budget.record_failure());
        assert!(budget.record_failure());
    }
}
