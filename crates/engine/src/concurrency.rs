//! Concurrency planning module
//!
//! Derives worker pool sizes for each phase from the CPU core count and configuration.

use crate::config::Config;
use crate::size_class::SizeCategory;

/// Concurrency plan derived from configuration and system resources
#[derive(Debug, Clone, PartialEq)]
pub struct ConcurrencyPlan {
    /// Total logical CPU cores available
    pub total_cores: u32,
    /// Concurrent warming requests across all categories
    pub pool_size: u32,
    /// Per-category caps inside the pool
    pub small_workers: u32,
    pub medium_workers: u32,
    pub large_workers: u32,
    /// Maximum number of concurrent transcodes
    pub transcode_jobs: u32,
    /// Parallel validations
    pub validation_workers: u32,
}

impl ConcurrencyPlan {
    /// Derive a concurrency plan from configuration
    ///
    /// Uses the following rules:
    /// - Detects CPU cores via num_cpus if not specified in config
    /// - Pool size: explicit value, else `2 * cores` clamped to [4, 32]
    /// - Large workers: explicit value, else `max(1, pool / 5)`
    /// - Small/medium split the rest, small taking the larger half (each at least 1)
    /// - Transcode jobs: explicit value, else 2 for 16+ cores, 1 otherwise
    /// - Validation workers: explicit value, else cores clamped to [2, 8]
    pub fn derive(cfg: &Config) -> Self {
        let total_cores = cfg
            .cpu
            .logical_cores
            .filter(|&c| c > 0)
            .unwrap_or_else(|| num_cpus::get() as u32);

        let pool_size = explicit_or(cfg.warmup.pool_size, || derive_pool_size(total_cores));
        let (auto_small, auto_medium, auto_large) = split_pool(pool_size);

        Self {
            total_cores,
            pool_size,
            small_workers: explicit_or(cfg.warmup.small_workers, || auto_small),
            medium_workers: explicit_or(cfg.warmup.medium_workers, || auto_medium),
            large_workers: explicit_or(cfg.warmup.large_workers, || auto_large),
            transcode_jobs: explicit_or(cfg.transcode.max_concurrent_jobs, || {
                derive_transcode_jobs(total_cores)
            }),
            validation_workers: explicit_or(cfg.validation.workers, || total_cores.clamp(2, 8)),
        }
    }

    pub fn workers_for(&self, category: SizeCategory) -> u32 {
        match category {
            SizeCategory::Small => self.small_workers,
            SizeCategory::Medium => self.medium_workers,
            SizeCategory::Large => self.large_workers,
        }
    }
}

fn explicit_or(value: u32, derive: impl FnOnce() -> u32) -> u32 {
    if value > 0 {
        value
    } else {
        derive()
    }
}

/// 2 requests per core, between 4 and 32
fn derive_pool_size(cores: u32) -> u32 {
    cores.saturating_mul(2).clamp(4, 32)
}

/// Large downloads get at most a fifth of the pool so they cannot starve the
/// many small and medium objects.
fn split_pool(pool: u32) -> (u32, u32, u32) {
    let large = (pool / 5).max(1);
    let rest = pool.saturating_sub(large);
    let small = rest.div_ceil(2).max(1);
    let medium = (rest / 2).max(1);
    (small, medium, large)
}

/// Derive max concurrent transcodes based on core count
/// - 2 jobs for 16+ cores
/// - 1 job otherwise
fn derive_transcode_jobs(cores: u32) -> u32 {
    if cores >= 16 {
        2
    } else {
        1
    }
}

/// Public function to derive a concurrency plan from configuration
pub fn derive_plan(cfg: &Config) -> ConcurrencyPlan {
    ConcurrencyPlan::derive(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CpuConfig;
    use proptest::prelude::*;

    fn config_with_cores(cores: u32) -> Config {
        Config {
            cpu: CpuConfig {
                logical_cores: Some(cores),
            },
            ..Config::default()
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_auto_plan_bounds(cores in 1u32..256) {
            let plan = derive_plan(&config_with_cores(cores));

            prop_assert_eq!(plan.total_cores, cores);
            prop_assert!(plan.pool_size >= 4 && plan.pool_size <= 32);
            prop_assert_eq!(plan.pool_size, (cores * 2).clamp(4, 32));

            // Large never exceeds a fifth of the pool (but is at least one)
            prop_assert!(plan.large_workers >= 1);
            prop_assert!(plan.large_workers <= (plan.pool_size / 5).max(1));

            // Every category gets a worker and small is never behind medium
            prop_assert!(plan.small_workers >= 1 && plan.medium_workers >= 1);
            prop_assert!(plan.small_workers >= plan.medium_workers);
            prop_assert_eq!(
                plan.small_workers + plan.medium_workers + plan.large_workers,
                plan.pool_size
            );

            let expected_jobs = if cores >= 16 { 2 } else { 1 };
            prop_assert_eq!(plan.transcode_jobs, expected_jobs);
            prop_assert_eq!(plan.validation_workers, cores.clamp(2, 8));
        }

        #[test]
        fn prop_explicit_config_override(
            cores in 1u32..256,
            pool in 1u32..128,
            small in 1u32..64,
            medium in 1u32..64,
            large in 1u32..64,
            jobs in 1u32..16,
            validators in 1u32..16,
        ) {
            let mut cfg = config_with_cores(cores);
            cfg.warmup.pool_size = pool;
            cfg.warmup.small_workers = small;
            cfg.warmup.medium_workers = medium;
            cfg.warmup.large_workers = large;
            cfg.transcode.max_concurrent_jobs = jobs;
            cfg.validation.workers = validators;

            let plan = derive_plan(&cfg);

            prop_assert_eq!(plan.pool_size, pool);
            prop_assert_eq!(plan.workers_for(SizeCategory::Small), small);
            prop_assert_eq!(plan.workers_for(SizeCategory::Medium), medium);
            prop_assert_eq!(plan.workers_for(SizeCategory::Large), large);
            prop_assert_eq!(plan.transcode_jobs, jobs);
            prop_assert_eq!(plan.validation_workers, validators);
        }
    }

    #[test]
    fn test_pool_of_four_split() {
        let mut cfg = config_with_cores(8);
        cfg.warmup.pool_size = 4;
        let plan = derive_plan(&cfg);
        assert_eq!((plan.small_workers, plan.medium_workers, plan.large_workers), (2, 1, 1));
    }

    #[test]
    fn test_tiny_pool_still_covers_every_category() {
        let mut cfg = config_with_cores(1);
        cfg.warmup.pool_size = 1;
        let plan = derive_plan(&cfg);
        for category in SizeCategory::ALL {
            assert!(plan.workers_for(category) >= 1);
        }
    }
}
