//! Harvest configuration loaded from TOML

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use listharvest_core::{RateLimitConfig, RetryPolicy};
use serde::Deserialize;

use crate::dedup::SignaturePolicy;
use crate::planner::PlannerConfig;
use crate::validator::ValidationConfig;

/// Global configuration for one harvest run
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct HarvestConfig {
    pub workers: WorkersConfig,
    pub collection: CollectionConfig,
    pub rate_limit: RateLimitSection,
    pub retry: RetrySection,
    pub validation: ValidationConfig,
    pub dedup: SignaturePolicy,
    pub planner: PlannerConfig,
    pub checkpoint: CheckpointConfig,
    pub progress: ProgressConfig,
    pub fetch: FetchConfig,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    pub count: usize,
    /// Milliseconds between consecutive worker starts
    pub stagger_ms: u64,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            count: cpus.min(4),
            stagger_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct CollectionConfig {
    /// Validated records wanted; reaching it cancels the session
    pub target_count: usize,
    /// Processed candidates between checkpoints
    pub batch_size: usize,
    /// Cap on planned work units
    pub max_units: usize,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            target_count: 1_000,
            batch_size: 25,
            max_units: 200,
        }
    }
}

/// Rate-limit bounds, in seconds
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct RateLimitSection {
    pub base_delay: f64,
    pub min_delay: f64,
    pub max_delay: f64,
    pub growth: f64,
    pub shrink: f64,
    pub success_streak: u32,
    pub window: usize,
    pub jitter: f64,
    /// Fixed jitter seed (per-worker seeds derive from it); random when unset
    pub seed: Option<u64>,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        let d = RateLimitConfig::default();
        Self {
            base_delay: d.base_delay.as_secs_f64(),
            min_delay: d.min_delay.as_secs_f64(),
            max_delay: d.max_delay.as_secs_f64(),
            growth: d.growth,
            shrink: d.shrink,
            success_streak: d.success_streak,
            window: d.window,
            jitter: d.jitter,
            seed: None,
        }
    }
}

impl RateLimitSection {
    pub fn limiter_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            base_delay: secs(self.base_delay),
            min_delay: secs(self.min_delay),
            max_delay: secs(self.max_delay),
            growth: self.growth,
            shrink: self.shrink,
            success_streak: self.success_streak,
            window: self.window,
            jitter: self.jitter,
        }
    }

    /// Jitter seed for one worker
    pub fn seed_for(&self, worker_id: usize) -> u64 {
        let base = self.seed.unwrap_or_else(|| {
            chrono::Utc::now()
                .timestamp_nanos_opt()
                .unwrap_or_default()
                .unsigned_abs()
        });
        base.wrapping_add(worker_id as u64)
    }
}

/// Retry settings, durations in seconds
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub retry_limit: u32,
    pub backoff_base: f64,
    pub backoff_max: f64,
    pub cooldown: f64,
    pub max_exhausted: u32,
}

impl Default for RetrySection {
    fn default() -> Self {
        let d = RetryPolicy::default();
        Self {
            retry_limit: d.retry_limit,
            backoff_base: d.backoff_base.as_secs_f64(),
            backoff_max: d.backoff_max.as_secs_f64(),
            cooldown: d.cooldown.as_secs_f64(),
            max_exhausted: d.max_exhausted,
        }
    }
}

impl RetrySection {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            retry_limit: self.retry_limit,
            backoff_base: secs(self.backoff_base),
            backoff_max: secs(self.backoff_max),
            cooldown: secs(self.cooldown),
            max_exhausted: self.max_exhausted,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    pub enabled: bool,
    pub dir: PathBuf,
    /// Reload existing checkpoints before planning
    pub resume: bool,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from("./checkpoints"),
            resume: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ProgressConfig {
    pub interval_ms: u64,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self { interval_ms: 5_000 }
    }
}

impl ProgressConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Per-request timeout in seconds
    pub timeout: f64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self { timeout: 20.0 }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        secs(self.timeout)
    }
}

fn secs(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f64(value)
    } else {
        Duration::ZERO
    }
}

impl HarvestConfig {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./listharvest.toml (current directory)
    /// 2. ~/.config/listharvest/config.toml
    ///
    /// If no config file found, returns default config.
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("listharvest.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = directories::ProjectDirs::from("", "", "listharvest") {
            let user_config = config_dir.config_dir().join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        log::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = Self::from_toml(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse and validate a TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject inconsistent settings
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.workers.count >= 1, "workers.count must be at least 1");
        anyhow::ensure!(
            self.collection.batch_size >= 1,
            "collection.batch_size must be at least 1"
        );

        let rl = &self.rate_limit;
        for (name, v) in [
            ("base_delay", rl.base_delay),
            ("min_delay", rl.min_delay),
            ("max_delay", rl.max_delay),
        ] {
            anyhow::ensure!(
                v.is_finite() && v >= 0.0,
                "rate_limit.{name} must be a non-negative number"
            );
        }
        anyhow::ensure!(
            rl.min_delay <= rl.base_delay && rl.base_delay <= rl.max_delay,
            "rate_limit requires min_delay <= base_delay <= max_delay"
        );
        anyhow::ensure!(rl.growth >= 1.0, "rate_limit.growth must be >= 1.0");
        anyhow::ensure!(
            rl.shrink > 0.0 && rl.shrink <= 1.0,
            "rate_limit.shrink must be in (0, 1]"
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&rl.jitter),
            "rate_limit.jitter must be in [0, 1]"
        );

        let retry = &self.retry;
        anyhow::ensure!(
            retry.backoff_base <= retry.backoff_max,
            "retry.backoff_base must not exceed retry.backoff_max"
        );

        self.validation.check_bounds()?;
        anyhow::ensure!(
            self.planner.prefix_digits >= 1,
            "planner.prefix_digits must be at least 1"
        );
        anyhow::ensure!(self.fetch.timeout > 0.0, "fetch.timeout must be positive");
        Ok(())
    }
}
