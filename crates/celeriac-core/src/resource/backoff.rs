//! Capped exponential delays between resubscription attempts.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { next: initial, max }
    }

    /// 1s, doubling up to 30s.
    pub fn resubscribe() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30))
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(self.max);
        delay
    }
}
