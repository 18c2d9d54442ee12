//! Delay calculations and retry policy.
//!
//! All intervals the server drives are computed here so the agent only
//! decides *which* delay applies, never how it is derived.

use std::ops::RangeInclusive;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::config;
use crate::domain::ConfigError;

/// Jitter added to the computed mining claim time
pub const CLAIM_JITTER_MINUTES: RangeInclusive<u32> = 1..=10;

/// Backoff while a mining session is still in progress
pub const MINING_RETRY_MINUTES: RangeInclusive<u32> = 10..=30;

/// Spacing between spins under the spread policy
pub const SPIN_INTERVAL_MINUTES: RangeInclusive<u32> = 1..=10;

/// Jitter added on top of the next streak timestamp
pub const STREAK_JITTER_MINUTES: RangeInclusive<u32> = 1..=10;

/// Pause after every spin under the burst policy
pub const BURST_SPIN_PAUSE: Duration = Duration::from_secs(5);

/// Pause after every activity claim
pub const ACTIVITY_CLAIM_PAUSE: Duration = Duration::from_secs(10);

const MILLIS_PER_MINUTE: f64 = 60_000.0;

/// Uniform integer in `range`, inclusive on both ends
pub fn random_minutes(range: RangeInclusive<u32>) -> u32 {
    rand::thread_rng().gen_range(range)
}

/// Minutes until the next mining claim: `(amount / rate) * 60 + jitter`.
///
/// A non-positive or non-finite rate yields just the jitter.
#[must_use]
pub fn next_claim_minutes(amount: f64, rate: f64, jitter_minutes: u32) -> f64 {
    let accrual = if rate > 0.0 && rate.is_finite() && amount.is_finite() {
        (amount / rate).max(0.0) * 60.0
    } else {
        0.0
    };
    accrual + f64::from(jitter_minutes)
}

/// Convert fractional minutes to a duration, `minutes * 60 * 1000` ms
#[must_use]
pub fn minutes_to_duration(minutes: f64) -> Duration {
    if !minutes.is_finite() || minutes <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_millis((minutes * MILLIS_PER_MINUTE).round() as u64)
}

/// Whole minutes as a duration
#[must_use]
pub fn whole_minutes(minutes: u32) -> Duration {
    Duration::from_secs(u64::from(minutes) * 60)
}

/// Time from `now` until `next_streak_at + jitter`, never negative
#[must_use]
pub fn until_next_streak(
    next_streak_at: DateTime<Utc>,
    jitter_minutes: u32,
    now: DateTime<Utc>,
) -> Duration {
    let target = next_streak_at + chrono::Duration::minutes(i64::from(jitter_minutes));
    (target - now).to_std().unwrap_or(Duration::ZERO)
}

/// Fixed delays and ceilings for recoverable failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Wait before repeating a call whose connection was reset
    pub connection_reset_delay: Duration,
    /// Consecutive resets tolerated per job; `None` retries forever
    pub max_connection_retries: Option<u32>,
    /// Wait before re-authenticating after an `Unauthorized` reply
    pub reauth_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            connection_reset_delay: Duration::from_secs(60),
            max_connection_retries: Some(30),
            reauth_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Load the policy from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let delay_secs = config::parse_var("CONNECTION_RETRY_DELAY_SECS", 60u64)?;
        let limit = config::parse_var("CONNECTION_RETRY_LIMIT", 30u32)?;
        let reauth_secs = config::parse_var("REAUTH_DELAY_SECS", 60u64)?;
        Ok(Self {
            connection_reset_delay: Duration::from_secs(delay_secs),
            max_connection_retries: (limit > 0).then_some(limit),
            reauth_delay: Duration::from_secs(reauth_secs),
        })
    }

    /// Whether a job that has already been retried `attempt` times may retry again
    #[must_use]
    pub fn allows_retry(&self, attempt: u32) -> bool {
        self.max_connection_retries
            .is_none_or(|limit| attempt < limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_next_claim_minutes_formula() {
        // 120 / 40 = 3 hours = 180 minutes, plus 5 minutes jitter
        assert_eq!(next_claim_minutes(120.0, 40.0, 5), 185.0);
        assert_eq!(minutes_to_duration(185.0), Duration::from_millis(11_100_000));
    }

    #[test]
    fn test_next_claim_monotonic_in_amount() {
        let mut previous = next_claim_minutes(0.0, 10.0, 1);
        for amount in [1.0, 5.0, 50.0, 500.0] {
            let current = next_claim_minutes(amount, 10.0, 1);
            assert!(current > previous);
            previous = current;
        }
    }

    #[test]
    fn test_next_claim_inversely_monotonic_in_rate() {
        let mut previous = next_claim_minutes(100.0, 1.0, 1);
        for rate in [2.0, 5.0, 25.0, 100.0] {
            let current = next_claim_minutes(100.0, rate, 1);
            assert!(current < previous);
            previous = current;
        }
    }

    #[test]
    fn test_next_claim_zero_rate_is_jitter_only() {
        assert_eq!(next_claim_minutes(100.0, 0.0, 7), 7.0);
        assert_eq!(next_claim_minutes(f64::NAN, 3.0, 2), 2.0);
    }

    #[test]
    fn test_minutes_to_duration_fractional_and_negative() {
        assert_eq!(minutes_to_duration(2.5), Duration::from_millis(150_000));
        assert_eq!(minutes_to_duration(-3.0), Duration::ZERO);
        assert_eq!(minutes_to_duration(f64::INFINITY), Duration::ZERO);
    }

    #[test]
    fn test_random_minutes_within_bounds() {
        for _ in 0..500 {
            let m = random_minutes(MINING_RETRY_MINUTES);
            assert!((10..=30).contains(&m));
            let ms = whole_minutes(m).as_millis();
            assert!((600_000..=1_800_000).contains(&ms));
        }
    }

    #[test]
    fn test_until_next_streak() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let streak = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        assert_eq!(
            until_next_streak(streak, 3, now),
            Duration::from_secs(2 * 3600 + 3 * 60)
        );
    }

    #[test]
    fn test_until_next_streak_in_past_is_zero() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let streak = Utc.with_ymd_and_hms(2024, 4, 30, 10, 0, 0).unwrap();
        assert_eq!(until_next_streak(streak, 10, now), Duration::ZERO);
    }

    #[test]
    fn test_retry_policy_ceiling() {
        let policy = RetryPolicy {
            max_connection_retries: Some(2),
            ..Default::default()
        };
        assert!(policy.allows_retry(0));
        assert!(policy.allows_retry(1));
        assert!(!policy.allows_retry(2));

        let unlimited = RetryPolicy {
            max_connection_retries: None,
            ..Default::default()
        };
        assert!(unlimited.allows_retry(u32::MAX));
    }

    #[test]
    fn test_retry_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.connection_reset_delay, Duration::from_secs(60));
        assert_eq!(policy.reauth_delay, Duration::from_millis(60_000));
        assert_eq!(policy.max_connection_retries, Some(30));
    }
}
