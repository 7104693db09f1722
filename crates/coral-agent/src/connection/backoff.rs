//! Exponential backoff with jitter (spec §4.1).
//!
//! Two independently configured instances are used: registration/
//! reconnection (initial 1 s, cap 5 min, multiplier 2.0) and discovery
//! (initial 2 s, cap 2 min, same shape), both with ±10% jitter applied as
//! `base × (1 ± U(−jitter, +jitter))`.

use std::time::Duration;

use rand::Rng;

/// Jitter fraction applied to every computed delay.
pub const JITTER: f64 = 0.1;

/// A backoff sequence. Call [`Backoff::next_delay`] after each failure and
/// [`Backoff::reset`] after a success.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    jitter: f64,
    attempt: u32,
}

impl Backoff {
    #[must_use]
    pub fn new(initial: Duration, max: Duration, multiplier: f64, jitter: f64) -> Self {
        Self { initial, max, multiplier, jitter, attempt: 0 }
    }

    /// Registration/reconnection backoff: initial 1 s, cap 5 min, ×2.0, ±10%.
    #[must_use]
    pub fn registration() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(5 * 60), 2.0, JITTER)
    }

    /// Discovery backoff: initial 2 s, cap 2 min, ×2.0, ±10%.
    #[must_use]
    pub fn discovery() -> Self {
        Self::new(Duration::from_secs(2), Duration::from_secs(2 * 60), 2.0, JITTER)
    }

    /// Returns the unjittered base delay for the given zero-indexed attempt,
    /// capped at `max`.
    fn base_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt as i32);
        let millis = (self.initial.as_millis() as f64 * factor) as u64;
        Duration::from_millis(millis).min(self.max)
    }

    /// Computes the next delay and advances the attempt counter.
    #[must_use]
    pub fn next_delay(&mut self) -> Duration {
        let base = self.base_for_attempt(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        let sample = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        apply_jitter(base, sample)
    }

    /// Resets the attempt counter after a successful operation.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Applies a jitter sample (expected range `[-jitter, +jitter]`) to `base`.
fn apply_jitter(base: Duration, sample: f64) -> Duration {
    let factor = (1.0 + sample).max(0.0);
    Duration::from_millis((base.as_millis() as f64 * factor) as u64)
}
