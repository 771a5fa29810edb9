use std::time::Duration;

use rand::Rng;

const BASE_DELAY_MS: u64 = 500;
const MAX_DELAY_MS: u64 = 32_000;

/// Exponential reconnect pacing with uniform jitter.
pub(crate) struct Backoff {
    attempt: u32,
}

impl Backoff {
    pub(crate) fn new() -> Self {
        Backoff { attempt: 0 }
    }

    pub(crate) fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Delay before the next connection attempt.
    pub(crate) fn next_delay(&mut self) -> Duration {
        let delay = BASE_DELAY_MS
            .saturating_mul(1 << self.attempt.min(6))
            .min(MAX_DELAY_MS);
        self.attempt = self.attempt.saturating_add(1);

        let jitter = rand::thread_rng().gen_range(0..=delay / 2);
        Duration::from_millis(delay + jitter)
    }
}
