//! Process-wide tunables, mirroring the `*Config` builder structs used
//! elsewhere for long-lived subsystems: constructed via `Config::default()`
//! and refined with `with_*` setters, `Clone + Debug + Serialize`.

use crate::clock::is_power_of_two;
use crate::error::{Result, TierError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Large-allocation threshold an external allocation shim would use to
/// decide whether a given allocation is worth handing to
/// [`crate::manager::Manager::register_region`]. Not enforced by this crate.
pub const LARGE_ALLOC_THRESHOLD: u64 = 1 << 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Page size in bytes; must be a power of two.
    pub page_size: usize,

    /// Interval between policy loop sweeps.
    pub policy_interval: Duration,

    /// Maximum number of concurrently registered regions.
    pub max_managed_regions: usize,

    /// Bucket count for the page statistics hash table. Should be prime.
    pub page_stats_hash_size: usize,

    pub policy: PolicyThresholds,
    pub fast_tier: TierConfig,
    pub slow_tier: TierConfig,
    pub sampler: SamplerConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PolicyThresholds {
    pub hot_threshold: f64,
    pub cold_threshold: f64,
    pub confidence_min: f64,
    pub min_residence: Duration,
    pub max_migrations_per_cycle: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TierConfig {
    pub capacity_bytes: u64,
    pub read_latency: Duration,
    pub write_latency: Duration,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SamplerConfig {
    pub enabled: bool,
    /// One hardware sample is assumed to represent this many real accesses.
    pub sample_period: u64,
    pub ring_capacity: usize,
    pub drain_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            page_size: 4096,
            policy_interval: Duration::from_millis(10),
            max_managed_regions: 64,
            page_stats_hash_size: 1_048_583, // prime, ~2^20
            policy: PolicyThresholds::default(),
            fast_tier: TierConfig {
                capacity_bytes: 4 * 1024 * 1024 * 1024,
                read_latency: Duration::from_nanos(80),
                write_latency: Duration::from_nanos(100),
            },
            slow_tier: TierConfig {
                capacity_bytes: 16 * 1024 * 1024 * 1024,
                read_latency: Duration::from_nanos(300),
                write_latency: Duration::from_nanos(500),
            },
            sampler: SamplerConfig::default(),
        }
    }
}

impl Default for PolicyThresholds {
    fn default() -> Self {
        Self {
            hot_threshold: 0.7,
            cold_threshold: 0.3,
            confidence_min: 0.5,
            min_residence: Duration::from_millis(100),
            max_migrations_per_cycle: 10,
        }
    }
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            sample_period: 100_007,
            ring_capacity: 1 + (1 << 8),
            drain_interval: Duration::from_millis(1),
        }
    }
}

impl Config {
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_policy_interval(mut self, interval: Duration) -> Self {
        self.policy_interval = interval;
        self
    }

    pub fn with_max_managed_regions(mut self, n: usize) -> Self {
        self.max_managed_regions = n;
        self
    }

    pub fn with_sampler(mut self, sampler: SamplerConfig) -> Self {
        self.sampler = sampler;
        self
    }

    pub fn with_policy_thresholds(mut self, thresholds: PolicyThresholds) -> Self {
        self.policy = thresholds;
        self
    }

    /// Rejects a malformed configuration before it reaches the hot paths that
    /// assume `page_size` is a power of two (address masking in
    /// [`crate::clock::page_align`] is undefined otherwise).
    pub fn validate(&self) -> Result<()> {
        if !is_power_of_two(self.page_size) {
            return Err(TierError::Configuration(format!(
                "page_size {} is not a power of two",
                self.page_size
            )));
        }
        Ok(())
    }
}
