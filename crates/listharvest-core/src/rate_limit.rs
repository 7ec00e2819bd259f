//! Adaptive per-worker request pacing.
//!
//! Each worker owns one [`RateLimiter`]; there is no shared state and no I/O.
//! Failures grow the delay multiplicatively up to `max_delay`, a sustained
//! run of successes shrinks it down to `min_delay`, and every returned delay
//! carries a bounded random jitter.

use std::collections::VecDeque;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Outcome of one fetch, fed back into the limiter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

/// Tuning knobs for [`RateLimiter`]
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub base_delay: Duration,
    pub min_delay: Duration,
    pub max_delay: Duration,
    /// Multiplier applied on failure
    pub growth: f64,
    /// Multiplier applied on each success once the streak is reached
    pub shrink: f64,
    /// Consecutive successes required before the delay starts shrinking
    pub success_streak: u32,
    /// Rolling outcome window length
    pub window: usize,
    /// Max jitter as a fraction of the current delay
    pub jitter: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            min_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            growth: 1.5,
            shrink: 0.8,
            success_streak: 3,
            window: 20,
            jitter: 0.25,
        }
    }
}

pub struct RateLimiter {
    config: RateLimitConfig,
    current: Duration,
    window: VecDeque<Outcome>,
    streak: u32,
    rng: StdRng,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("current", &self.current)
            .field("streak", &self.streak)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    /// Create a limiter; the same `seed` yields the same jitter sequence.
    ///
    /// Inverted bounds are swapped so that `min_delay <= max_delay`.
    pub fn new(mut config: RateLimitConfig, seed: u64) -> Self {
        if config.min_delay > config.max_delay {
            std::mem::swap(&mut config.min_delay, &mut config.max_delay);
        }
        let current = config.base_delay.clamp(config.min_delay, config.max_delay);
        Self {
            config,
            current,
            window: VecDeque::with_capacity(config.window),
            streak: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Record `outcome` and return the (jittered) delay before the next request.
    pub fn next_delay(&mut self, outcome: Outcome) -> Duration {
        self.record(outcome);
        match outcome {
            Outcome::Failure => {
                self.streak = 0;
                self.current = self.scaled(self.config.growth);
            }
            Outcome::Success => {
                self.streak = self.streak.saturating_add(1);
                if self.streak >= self.config.success_streak {
                    self.current = self.scaled(self.config.shrink);
                }
            }
        }
        self.jittered()
    }

    /// Delay before the very first request of a worker
    pub fn initial_delay(&mut self) -> Duration {
        self.jittered()
    }

    /// Forced slowdown after an explicit rate-limit response
    pub fn force_slowdown(&mut self) {
        self.streak = 0;
        self.current = self.scaled(self.config.growth * self.config.growth);
    }

    /// Current delay without jitter
    pub fn current_delay(&self) -> Duration {
        self.current
    }

    /// Share of successes in the rolling window (1.0 when empty)
    pub fn success_rate(&self) -> f64 {
        if self.window.is_empty() {
            return 1.0;
        }
        let ok = self
            .window
            .iter()
            .filter(|o| **o == Outcome::Success)
            .count();
        ok as f64 / self.window.len() as f64
    }

    fn record(&mut self, outcome: Outcome) {
        if self.config.window == 0 {
            return;
        }
        if self.window.len() == self.config.window {
            self.window.pop_front();
        }
        self.window.push_back(outcome);
    }

    fn scaled(&self, factor: f64) -> Duration {
        let secs = self.current.as_secs_f64() * factor;
        let min = self.config.min_delay.as_secs_f64();
        let max = self.config.max_delay.as_secs_f64();
        Duration::from_secs_f64(secs.clamp(min, max))
    }

    fn jittered(&mut self) -> Duration {
        let spread = self.current.as_secs_f64() * self.config.jitter.max(0.0);
        let extra = self.rng.gen::<f64>() * spread;
        self.current + Duration::from_secs_f64(extra)
    }
}
