//! Retry bounds and backoff delays.

use std::time::Duration;

use super::ApiError;

/// Default number of attempts per request.
/// 5 attempts give a person time to drop in a fresh capture during auth churn.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default backoff time unit
pub const DEFAULT_BACKOFF_UNIT: Duration = Duration::from_secs(1);

/// Default cap on the auth backoff exponent (2^6 = 64 units).
/// Above the default retry bound, so defaults back off by exactly 2^attempt.
pub const DEFAULT_MAX_AUTH_EXPONENT: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per logical request, including the first. At least 1.
    pub max_retries: u32,
    /// One backoff "time unit".
    pub unit: Duration,
    /// Largest exponent used for auth backoff.
    pub max_auth_exponent: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            unit: DEFAULT_BACKOFF_UNIT,
            max_auth_exponent: DEFAULT_MAX_AUTH_EXPONENT,
        }
    }
}

impl RetryPolicy {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.max_retries < 1 {
            return Err(ApiError::InvalidConfig(
                "max_retries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Delay after a 401 on `attempt` (1-indexed): `2^attempt` units.
    pub fn auth_backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(self.max_auth_exponent).min(31);
        self.unit.saturating_mul(1u32 << exponent)
    }

    /// Delay after a 5xx or transport failure: one unit regardless of attempt.
    pub fn transient_backoff(&self) -> Duration {
        self.unit
    }
}

/// Attempt bookkeeping for one logical request.
#[derive(Debug, Default)]
pub(crate) struct RetryState {
    pub attempt: u32,
    pub total_backoff: Duration,
}

impl RetryState {
    /// Start the next attempt and return its 1-indexed number
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempt += 1;
        self.attempt
    }

    pub async fn back_off(&mut self, delay: Duration) {
        self.total_backoff += delay;
        tokio::time::sleep(delay).await;
    }
}
