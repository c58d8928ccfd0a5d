//! Exponential backoff with jitter for transient delivery failures (spec
//! §4.6 "Retry policy": base 30 s, factor 2, jitter ±25%, up to a bounded
//! attempt count and total deadline).

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

const BASE: Duration = Duration::from_secs(30);
const FACTOR: u32 = 2;
const JITTER_FRACTION: f64 = 0.25;

/// Delay before the next attempt, given how many attempts have already been
/// made (the record's `delivery_attempts` after the failing one is
/// recorded). `attempts_made = 1` is the delay before the second attempt.
pub fn backoff_duration(attempts_made: u32) -> Duration {
    let exponent = attempts_made.saturating_sub(1).min(16);
    let base_secs = BASE.as_secs_f64() * (FACTOR as f64).powi(exponent as i32);
    let jitter = rand::rng().random_range(-JITTER_FRACTION..=JITTER_FRACTION);
    let jittered = (base_secs * (1.0 + jitter)).max(0.0);
    Duration::from_secs_f64(jittered)
}

/// Whether a transient failure should be retried at all: the attempt count
/// hasn't hit the configured cap and the total deadline (measured from the
/// record's creation) hasn't passed.
pub fn should_retry(
    attempts_made: u32,
    max_attempts: u32,
    created_at: DateTime<Utc>,
    deadline: Duration,
    now: DateTime<Utc>,
) -> bool {
    if attempts_made >= max_attempts {
        return false;
    }
    let elapsed = (now - created_at).to_std().unwrap_or(Duration::ZERO);
    elapsed < deadline
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially_within_jitter_bounds() {
        for attempts in 1..=5 {
            let delay = backoff_duration(attempts);
            let base = BASE.as_secs_f64() * 2f64.powi((attempts - 1) as i32);
            let lower = base * 0.75;
            let upper = base * 1.25;
            let secs = delay.as_secs_f64();
            assert!(secs >= lower - 0.001 && secs <= upper + 0.001, "attempt {attempts}: {secs} not in [{lower}, {upper}]");
        }
    }

    #[test]
    fn stops_retrying_once_attempt_cap_reached() {
        let now = Utc::now();
        assert!(!should_retry(5, 5, now, Duration::from_secs(48 * 3600), now));
        assert!(should_retry(4, 5, now, Duration::from_secs(48 * 3600), now));
    }

    #[test]
    fn stops_retrying_once_deadline_elapsed() {
        let created = Utc::now() - chrono::Duration::hours(49);
        let now = Utc::now();
        assert!(!should_retry(1, 5, created, Duration::from_secs(48 * 3600), now));
    }
}
