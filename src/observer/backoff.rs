use std::time::Duration;

/// Exponential backoff: `initial * multiplier^(attempt - 1)`, capped at `max`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(1000),
            max: Duration::from_millis(30_000),
            multiplier: 2,
        }
    }
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, multiplier: u32) -> Self {
        Self {
            initial,
            max,
            multiplier: multiplier.max(1),
        }
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1);
        let factor = self.multiplier.checked_pow(exp).unwrap_or(u32::MAX);
        self.initial
            .checked_mul(factor)
            .unwrap_or(self.max)
            .min(self.max)
    }
}
