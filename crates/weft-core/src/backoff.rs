//! Exponential backoff with randomized jitter.
//!
//! Pure: the caller supplies the random draw, so simulations replay
//! identical schedules. The delay sequence grows geometrically up to a cap
//! and each emitted delay is spread uniformly across
//! `[base * (1 - r), base * (1 + r)]` where `r` is the randomization
//! factor, keeping a fleet of retrying agents from thundering in step.

use std::time::Duration;

/// Backoff shape parameters.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// First delay
    pub initial: Duration,
    /// Growth factor applied after each delay
    pub multiplier: f64,
    /// Jitter spread around the base delay, `0.0` for none
    pub randomization: f64,
    /// Ceiling on the base delay
    pub max: Duration,
}

impl Default for BackoffConfig {
    /// The connection-initializer schedule: 500 ms start, 1.5x growth,
    /// +/-50% jitter, 5 s cap, no overall time limit.
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            multiplier: 1.5,
            randomization: 0.5,
            max: Duration::from_secs(5),
        }
    }
}

/// Stateful delay generator.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    base: Duration,
}

impl Backoff {
    /// Start a fresh schedule.
    #[must_use]
    pub fn new(config: BackoffConfig) -> Self {
        let base = config.initial;
        Self { config, base }
    }

    /// Next delay, jittered by `draw` (uniform in `[0, 1)`).
    ///
    /// Advances the internal base toward the cap.
    pub fn delay(&mut self, draw: f64) -> Duration {
        let base = self.base.as_secs_f64();
        let r = self.config.randomization;
        let jittered = base * (1.0 - r + 2.0 * r * draw);

        let next = self.base.mul_f64(self.config.multiplier);
        self.base = next.min(self.config.max);

        Duration::from_secs_f64(jittered)
    }

    /// Return to the initial delay, e.g. after a successful attempt.
    pub fn reset(&mut self) {
        self.base = self.config.initial;
    }
}
