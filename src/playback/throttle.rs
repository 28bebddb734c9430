/// Minimum wall-clock gap between progress-driven history writes.
pub const PERSIST_INTERVAL_MS: i64 = 4_000;

/// Rate guard over event timestamps. The progress source decides how often
/// it fires; this decides how often that turns into a write.
#[derive(Debug, Clone)]
pub struct WriteThrottle {
    interval_ms: i64,
    last_write_ms: Option<i64>,
}

impl WriteThrottle {
    pub fn new(interval_ms: i64) -> Self {
        Self {
            interval_ms,
            last_write_ms: None,
        }
    }

    pub fn ready(&self, now_ms: i64) -> bool {
        match self.last_write_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= self.interval_ms,
        }
    }

    /// Notes a write at `now_ms`, whatever triggered it.
    pub fn mark(&mut self, now_ms: i64) {
        self.last_write_ms = Some(now_ms);
    }

    pub fn reset(&mut self) {
        self.last_write_ms = None;
    }
}

impl Default for WriteThrottle {
    fn default() -> Self {
        Self::new(PERSIST_INTERVAL_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_event_is_always_ready() {
        assert!(WriteThrottle::default().ready(0));
    }

    #[test]
    fn opens_again_after_the_interval() {
        let mut throttle = WriteThrottle::default();
        throttle.mark(10_000);
        assert!(!throttle.ready(10_500));
        assert!(!throttle.ready(13_999));
        assert!(throttle.ready(14_000));

        throttle.reset();
        assert!(throttle.ready(10_001));
    }
}
