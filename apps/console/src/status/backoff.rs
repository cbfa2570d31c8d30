use std::time::Duration;

/// Exponential delay with jitter between retries, capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    base_ms: u64,
    max_ms: u64,
    current_ms: u64,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        let base_ms = (base.as_millis() as u64).max(1);
        Self {
            base_ms,
            max_ms: (max.as_millis() as u64).max(base_ms),
            current_ms: base_ms,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay_ms = self.current_ms;
        let jitter = rand::random::<u64>() % delay_ms.max(1);
        self.current_ms = (self.current_ms * 2).min(self.max_ms);
        Duration::from_millis((delay_ms + jitter).min(self.max_ms))
    }

    pub fn reset(&mut self) {
        self.current_ms = self.base_ms;
    }
}
