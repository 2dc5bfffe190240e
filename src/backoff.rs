//! Bounded exponential backoff for polls and push reconnects.

use std::time::Duration;

/// Doubling delay, capped.
///
/// The first retry after a failure waits `base`; each further consecutive
/// failure doubles the wait until `cap` is reached.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    failures: u32,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap: cap.max(base),
            failures: 0,
        }
    }

    /// Delay to wait now, given the failures recorded so far.
    pub fn current(&self) -> Duration {
        if self.failures == 0 {
            return self.base;
        }
        // 2^(failures-1) * base, capped
        let shift = (self.failures - 1).min(20);
        let factor = 1u32.checked_shl(shift).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// Record a failure and return the delay before the next attempt.
    pub fn fail(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        self.current()
    }

    /// Record a success; the next delay is `base` again.
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn cap(&self) -> Duration {
        self.cap
    }
}
