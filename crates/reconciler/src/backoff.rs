//! Exponential backoff for failed sync passes.

use std::time::Duration;

/// Doubling delay starting at `start`, capped at `ceiling`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub start: Duration,
    pub ceiling: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            start: Duration::from_secs(5),
            ceiling: Duration::from_secs(300),
        }
    }
}

impl Backoff {
    pub const fn new(start: Duration, ceiling: Duration) -> Self {
        Self { start, ceiling }
    }

    /// Delay before the attempt following `retries` earlier failures.
    pub fn delay(&self, retries: u32) -> Duration {
        let factor = 2_u32.checked_pow(retries).unwrap_or(u32::MAX);
        self.start
            .checked_mul(factor)
            .map_or(self.ceiling, |d| d.min(self.ceiling))
    }
}
