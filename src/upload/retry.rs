use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Exponential backoff policy for failed transfer attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay after the first failed attempt
    pub base: Duration,
    /// Backoff ceiling
    pub max: Duration,
    /// Spread delays by up to 12.5% to avoid synchronized retries
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(60),
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after `attempt` failures: base doubles per
    /// attempt and is capped at the ceiling. Attempt 0 means no wait.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let multiplier = 2u32.saturating_pow(attempt.saturating_sub(1));
        let delay = self.base.saturating_mul(multiplier);
        let delay = std::cmp::min(delay, self.max);

        if self.jitter {
            delay.saturating_add(jitter_for(delay))
        } else {
            delay
        }
    }
}

/// Up to delay/8 of extra wait, spread by the clock's subsecond nanos.
fn jitter_for(delay: Duration) -> Duration {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0) as u64;
    let spread = (delay / 8).as_nanos() as u64;
    if spread == 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos(spread * (nanos % 1000) / 1000)
}
