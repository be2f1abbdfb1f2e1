//! Exponential backoff for failed jobs.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Retry schedule for failed job attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts allowed before a job is dead-lettered.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(3600),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt after `attempts` failed attempts.
    ///
    /// `base * 2^(attempts - 1)`, capped at `max_delay`.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// When the next attempt may run, or `None` once attempts are exhausted.
    pub fn next_attempt_at(&self, attempts: u32, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if attempts >= self.max_attempts {
            return None;
        }

        let delay = chrono::Duration::from_std(self.backoff(attempts)).unwrap_or(chrono::Duration::MAX);
        Some(now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_backoff_doubles_until_cap() {
        let p = policy();
        assert_eq!(p.backoff(1), Duration::from_secs(10));
        assert_eq!(p.backoff(2), Duration::from_secs(20));
        assert_eq!(p.backoff(3), Duration::from_secs(40));
        assert_eq!(p.backoff(4), Duration::from_secs(60));
        assert_eq!(p.backoff(40), Duration::from_secs(60));
    }

    #[test]
    fn test_next_attempt_stops_at_max_attempts() {
        let p = policy();
        let now = Utc::now();

        assert_eq!(
            p.next_attempt_at(1, now),
            Some(now + chrono::Duration::seconds(10))
        );
        assert!(p.next_attempt_at(3, now).is_some());
        assert_eq!(p.next_attempt_at(4, now), None);
        assert_eq!(p.next_attempt_at(5, now), None);
    }
}
