use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Fixed-delay bounded retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub attempts: u32,
    pub delay_ms: u64,
}

impl RetryPolicy {
    pub const fn new(attempts: u32, delay_ms: u64) -> Self {
        Self { attempts, delay_ms }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Run `op` until it succeeds or attempts are exhausted; the last
    /// error is returned.
    pub fn run<T, E, F>(&self, label: &str, mut op: F) -> Result<T, E>
    where
        E: std::fmt::Display,
        F: FnMut() -> Result<T, E>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Ok(v) => return Ok(v),
                Err(e) if attempt < attempts => {
                    tracing::warn!(call = label, attempt, attempts, error = %e, "retrying");
                    std::thread::sleep(self.delay());
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_succeeds_after_transient_failures() {
        let policy = RetryPolicy::new(3, 0);
        let mut calls = 0;
        let out: Result<u32, String> = policy.run("op", || {
            calls += 1;
            if calls < 3 {
                Err(format!("fail {calls}"))
            } else {
                Ok(calls)
            }
        });
        assert_eq!(out, Ok(3));
    }

    #[test]
    fn test_returns_last_error_when_exhausted() {
        let policy = RetryPolicy::new(2, 0);
        let mut calls = 0;
        let out: Result<(), String> = policy.run("op", || {
            calls += 1;
            Err(format!("fail {calls}"))
        });
        assert_eq!(out, Err("fail 2".to_string()));
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_zero_attempts_still_runs_once() {
        let policy = RetryPolicy::new(0, 0);
        let mut calls = 0;
        let _: Result<(), &str> = policy.run("op", || {
            calls += 1;
            Err("x")
        });
        assert_eq!(calls, 1);
    }
}
