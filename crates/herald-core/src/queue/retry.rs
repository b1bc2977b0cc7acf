//! Retry policy: decides backoff delays.

use serde::{Deserialize, Serialize};

/// Delay before a failed event becomes eligible again.
///
/// `retry_count` passed to `next_delay` is the count *after* the failure was
/// recorded, so the first retry uses `retry_count = 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum RetryPolicy {
    /// delay = base * retry_count
    Linear { base_delay_secs: u64 },

    /// delay = min(base * multiplier^(retry_count - 1), max_delay)
    Exponential {
        base_delay_secs: u64,
        multiplier: f64,
        max_delay_secs: u64,
    },
}

impl Default for RetryPolicy {
    /// Five minutes per attempt: 5m, 10m, 15m, ...
    fn default() -> Self {
        RetryPolicy::Linear {
            base_delay_secs: 300,
        }
    }
}

impl RetryPolicy {
    pub fn linear(base_delay_secs: u64) -> Self {
        RetryPolicy::Linear { base_delay_secs }
    }

    pub fn exponential(base_delay_secs: u64, multiplier: f64, max_delay_secs: u64) -> Self {
        RetryPolicy::Exponential {
            base_delay_secs,
            multiplier,
            max_delay_secs,
        }
    }

    pub fn next_delay(&self, retry_count: u32) -> chrono::Duration {
        let attempt = retry_count.max(1);
        let secs = match *self {
            RetryPolicy::Linear { base_delay_secs } => {
                base_delay_secs.saturating_mul(u64::from(attempt))
            }
            RetryPolicy::Exponential {
                base_delay_secs,
                multiplier,
                max_delay_secs,
            } => {
                let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
                let raw = base_delay_secs as f64 * multiplier.powi(exponent);
                if raw.is_finite() && raw < max_delay_secs as f64 {
                    raw as u64
                } else {
                    max_delay_secs
                }
            }
        };
        let secs = i64::try_from(secs).unwrap_or(i64::MAX).min(i64::MAX / 1_000);
        chrono::Duration::seconds(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn default_policy_is_five_minutes_linear() {
        assert_eq!(RetryPolicy::default(), RetryPolicy::linear(300));
    }

    #[rstest]
    #[case(1, 5)]
    #[case(2, 10)]
    #[case(3, 15)]
    fn linear_backoff_grows_per_attempt(#[case] retry_count: u32, #[case] minutes: i64) {
        let policy = RetryPolicy::default();
        assert_eq!(policy.next_delay(retry_count), chrono::Duration::minutes(minutes));
    }

    #[test]
    fn exponential_backoff_increases_until_capped() {
        let policy = RetryPolicy::exponential(2, 2.0, 10);

        let d1 = policy.next_delay(1);
        let d2 = policy.next_delay(2);
        let d3 = policy.next_delay(3);
        let d4 = policy.next_delay(4);

        assert_eq!(d1, chrono::Duration::seconds(2));
        assert_eq!(d2, chrono::Duration::seconds(4));
        assert_eq!(d3, chrono::Duration::seconds(8));
        assert_eq!(d4, chrono::Duration::seconds(10));
        assert_eq!(policy.next_delay(200), chrono::Duration::seconds(10));
    }

    #[test]
    fn zero_is_treated_as_first_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.next_delay(0), policy.next_delay(1));
    }

    #[test]
    fn deserializes_from_tagged_config() {
        let policy: RetryPolicy = serde_json::from_value(serde_json::json!({
            "strategy": "exponential",
            "base_delay_secs": 30,
            "multiplier": 2.0,
            "max_delay_secs": 3600,
        }))
        .unwrap();
        assert_eq!(policy, RetryPolicy::exponential(30, 2.0, 3600));
    }
}
