use std::time::Duration;

/// Fixed-delay retry schedule for the upstream fetch loop.
///
/// `max_attempts` bounds application-level failures only: transport errors
/// retry without limit on `retry_delay`, and rate-limit waits use
/// `rate_limit_delay` without consuming the budget.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub rate_limit_delay: Duration,
}

impl RetryPolicy {
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.max_attempts >= 1, "max_attempts must be >= 1");
        anyhow::ensure!(
            self.rate_limit_delay >= self.retry_delay,
            "rate_limit_delay must be >= retry_delay"
        );
        Ok(())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_secs(5),
            rate_limit_delay: Duration::from_secs(10),
        }
    }
}
