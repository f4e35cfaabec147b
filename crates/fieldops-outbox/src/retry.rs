//! Retry policy: eligibility, exponential backoff with jitter, dead-lettering.
//!
//! The computed `next_retry_at` is persisted with the event, so the backoff
//! window still holds after a cold start.

use crate::SubmitError;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::time::Duration;

/// Default retry budget before an event is dead-lettered.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Upper bound applied to a server-supplied `Retry-After`.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

/// Retry and backoff configuration.
///
/// Backoff follows `base * 2^(retry_count - 1)` capped at `backoff_max`,
/// plus up to `jitter_ratio` of that delay at random:
/// - 1st retry: 2s
/// - 2nd retry: 4s
/// - 3rd retry: 8s
/// - ... up to 300s max
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Failed attempts after which an event is dead-lettered.
    pub max_retries: u32,
    /// Base duration for exponential backoff.
    pub backoff_base: Duration,
    /// Maximum backoff before jitter.
    pub backoff_max: Duration,
    /// Fraction of the backoff added as random jitter (0.0 disables jitter).
    pub jitter_ratio: f64,
    /// Minimum delay after an HTTP 429.
    pub rate_limit_floor: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base: Duration::from_secs(2),
            backoff_max: Duration::from_secs(300),
            jitter_ratio: 0.2,
            rate_limit_floor: Duration::from_secs(60),
        }
    }
}

/// Why an event left the automatic delivery path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadLetterReason {
    /// `retry_count` reached `max_retries`.
    RetryExhausted,
    /// The backend rejected the event outright (404, malformed payload).
    PermanentRejection,
}

/// Outcome of applying the policy to a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Stay Pending; do not attempt again before `next_retry_at`.
    Retry {
        retry_count: u32,
        next_retry_at: DateTime<Utc>,
    },
    /// Withdraw from automatic delivery.
    DeadLetter {
        retry_count: u32,
        reason: DeadLetterReason,
    },
}

impl RetryPolicy {
    /// A policy with no backoff and no jitter. Every Pending event is due on
    /// every pass; only the retry budget applies.
    pub fn immediate() -> Self {
        Self {
            backoff_base: Duration::ZERO,
            backoff_max: Duration::ZERO,
            jitter_ratio: 0.0,
            rate_limit_floor: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Whether an event with this many failed attempts may be attempted again.
    pub fn is_retryable(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }

    /// Exponential backoff for a retry count, without jitter.
    pub fn compute_backoff(&self, retry_count: u32) -> chrono::Duration {
        if retry_count == 0 {
            return chrono::Duration::zero();
        }

        let base_ms = self.backoff_base.as_millis() as u64;
        let max_ms = self.backoff_max.as_millis() as u64;
        let shift = retry_count.saturating_sub(1);
        let multiplier = 1u64.checked_shl(shift).unwrap_or(u64::MAX);
        let delay_ms = base_ms.saturating_mul(multiplier).min(max_ms);

        chrono::Duration::milliseconds(delay_ms as i64)
    }

    /// Earliest time the next attempt may happen: backoff plus random jitter.
    pub fn next_retry_at(&self, retry_count: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        let backoff = self.compute_backoff(retry_count);
        now + backoff + self.jitter(backoff)
    }

    /// Like [`next_retry_at`](Self::next_retry_at) but honoring a 429: at least
    /// the rate-limit floor, and at least the server's `Retry-After`.
    pub fn rate_limited_retry_at(
        &self,
        retry_count: u32,
        retry_after: Option<Duration>,
        now: DateTime<Utc>,
    ) -> DateTime<Utc> {
        let floor = to_chrono(self.rate_limit_floor);
        let server = retry_after
            .map(|after| to_chrono(after.min(MAX_RETRY_AFTER)))
            .unwrap_or_else(chrono::Duration::zero);
        let backoff = self.compute_backoff(retry_count).max(floor).max(server);
        now + backoff + self.jitter(backoff)
    }

    /// Whether an event is eligible for an attempt at `now`.
    pub fn is_due(&self, next_retry_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match next_retry_at {
            Some(at) => now >= at,
            None => true,
        }
    }

    /// Decide what happens to an event after a failed attempt.
    ///
    /// `previous_retry_count` is the count before this attempt. Auth failures
    /// are handled by the queue and never reach the policy.
    pub fn on_failure(
        &self,
        previous_retry_count: u32,
        error: &SubmitError,
        now: DateTime<Utc>,
    ) -> RetryDecision {
        let retry_count = previous_retry_count.saturating_add(1);

        match error {
            SubmitError::Permanent { .. } => RetryDecision::DeadLetter {
                retry_count,
                reason: DeadLetterReason::PermanentRejection,
            },
            _ if !self.is_retryable(retry_count) => RetryDecision::DeadLetter {
                retry_count,
                reason: DeadLetterReason::RetryExhausted,
            },
            SubmitError::Transient {
                rate_limited: true,
                retry_after,
                ..
            } => RetryDecision::Retry {
                retry_count,
                next_retry_at: self.rate_limited_retry_at(retry_count, *retry_after, now),
            },
            _ => RetryDecision::Retry {
                retry_count,
                next_retry_at: self.next_retry_at(retry_count, now),
            },
        }
    }

    fn jitter(&self, backoff: chrono::Duration) -> chrono::Duration {
        let max_jitter_ms = (backoff.num_milliseconds() as f64 * self.jitter_ratio.max(0.0)) as i64;
        if max_jitter_ms <= 0 {
            return chrono::Duration::zero();
        }
        chrono::Duration::milliseconds(rand::thread_rng().gen_range(0..=max_jitter_ms))
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero())
}
