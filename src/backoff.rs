//! Exponential backoff between retry attempts.

use std::time::Duration;

use rand::Rng;

/// Default base delay; attempt `n` waits `base * 2^n`.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Default ceiling for a single delay.
pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Delay schedule applied between failed attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    /// Upper bound for any single delay. `None` lets delays grow unbounded.
    pub cap: Option<Duration>,
    /// Randomise each delay within `[delay / 2, delay]`.
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: DEFAULT_BACKOFF_BASE,
            cap: Some(DEFAULT_BACKOFF_CAP),
            jitter: false,
        }
    }
}

impl BackoffPolicy {
    /// Plain `base * 2^n` with no cap and no jitter.
    pub fn unbounded(base: Duration) -> Self {
        Self {
            base,
            cap: None,
            jitter: false,
        }
    }

    /// No waiting at all between attempts.
    pub fn none() -> Self {
        Self::unbounded(Duration::ZERO)
    }

    /// Delay to wait after failed attempt `attempt` (1-based) before the next one.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let base_ms = as_millis_u64(self.base);
        if base_ms == 0 {
            return Duration::ZERO;
        }
        let multiplier = 1_u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let mut delay_ms = base_ms.saturating_mul(multiplier);
        if let Some(cap) = self.cap {
            delay_ms = delay_ms.min(as_millis_u64(cap));
        }
        if self.jitter && delay_ms > 1 {
            let floor = delay_ms / 2;
            delay_ms = rand::thread_rng().gen_range(floor..=delay_ms);
        }
        Duration::from_millis(delay_ms)
    }
}

fn as_millis_u64(duration: Duration) -> u64 {
    duration.as_millis().min(u64::MAX as u128) as u64
}
