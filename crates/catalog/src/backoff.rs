use std::time::Duration;

/// Retry schedule for failed chunks: `min(base * 2^n, cap)` where `n` is
/// the chunk's retry count after the failing attempt.
#[derive(Debug, Clone, Copy)]
pub struct RetryBackoff {
    pub base: Duration,
    pub cap: Duration,
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(10),
            cap: Duration::from_secs(600),
        }
    }
}

impl RetryBackoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap: if cap.is_zero() { base } else { cap },
        }
    }

    pub fn delay(&self, retry_count: u32) -> Duration {
        if self.base.is_zero() {
            return Duration::ZERO;
        }
        let factor = 1u128 << retry_count.min(16);
        let delay_ms = self.base.as_millis().saturating_mul(factor);
        Duration::from_millis(delay_ms.min(self.cap.as_millis()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_from_base_and_caps() {
        let backoff = RetryBackoff::default();
        assert_eq!(backoff.delay(0), Duration::from_secs(10));
        assert_eq!(backoff.delay(1), Duration::from_secs(20));
        assert_eq!(backoff.delay(2), Duration::from_secs(40));
        assert_eq!(backoff.delay(6), Duration::from_secs(600));
        assert_eq!(backoff.delay(12), Duration::from_secs(600));
    }
}
