//! Dynamic fee floor: an EMA of recent block median fees, shaped by pool
//! utilization, slew-limited against the previously published floor, and
//! bounded by the histogram range and the absolute minimum.

use serde::{Deserialize, Serialize};
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatermarkConfig {
    /// EMA smoothing factor for the per-block median fee.
    pub ema_alpha: f64,
    /// Gain of the convex utilization term: target = EMA · (1 + gain·u²).
    pub util_gain: f64,
    /// Absolute floor the published threshold never drops below.
    pub min_floor_wei: u128,
    /// Per-call multiplicative bound on upward floor movement.
    pub max_step_up: f64,
    /// Per-call multiplicative bound on downward floor movement.
    pub max_step_down: f64,
    /// Histogram range; published floors are clamped into it.
    pub hist_min_wei: u128,
    pub hist_max_wei: u128,
    /// Log-spaced buckets across the histogram range.
    pub hist_buckets: usize,
    /// Eviction threshold as a fraction of the admit floor.
    pub evict_ratio: f64,
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        let min_floor_wei = 1_000_000_000; // 1 gwei-equivalent in wei
        Self {
            ema_alpha: 0.3,
            util_gain: 3.0,
            min_floor_wei,
            max_step_up: 2.0,
            max_step_down: 0.5,
            hist_min_wei: min_floor_wei,
            hist_max_wei: min_floor_wei * 10_000_000,
            hist_buckets: 64,
            evict_ratio: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub admit_floor_wei: u128,
    pub evict_below_wei: u128,
}

pub struct FeeWatermark {
    pub cfg: WatermarkConfig,
    ema_wei: f64,
    buckets: Vec<u64>,
    observed: u64,
    last_floor_wei: u128,
}

impl FeeWatermark {
    pub fn new(cfg: WatermarkConfig) -> Self {
        let buckets = vec![0u64; cfg.hist_buckets.max(1)];
        // Publishing starts from the absolute minimum so the slew-ratio
        // invariant holds from the very first call.
        let last_floor_wei = cfg.min_floor_wei;
        Self { cfg, ema_wei: 0.0, buckets, observed: 0, last_floor_wei }
    }

    /// Fold one block's included fees into the EMA and histogram.
    pub fn observe_block_inclusions(&mut self, fees: &[u128]) {
        if fees.is_empty() {
            return;
        }
        let mut sorted = fees.to_vec();
        sorted.sort_unstable();
        let median = sorted[sorted.len() / 2];

        self.ema_wei = if self.observed == 0 {
            median as f64
        } else {
            self.cfg.ema_alpha * median as f64 + (1.0 - self.cfg.ema_alpha) * self.ema_wei
        };
        self.observed += 1;

        for fee in fees {
            let idx = self.bucket_index(*fee);
            self.buckets[idx] += 1;
        }
    }

    fn bucket_index(&self, fee: u128) -> usize {
        let lo = self.cfg.hist_min_wei.max(1) as f64;
        let hi = self.cfg.hist_max_wei.max(self.cfg.hist_min_wei + 1) as f64;
        let clamped = (fee as f64).max(lo).min(hi);
        let frac = (clamped / lo).log2() / (hi / lo).log2();
        ((frac * (self.buckets.len() - 1) as f64) as usize).min(self.buckets.len() - 1)
    }

    fn bucket_floor_value(&self, idx: usize) -> u128 {
        let lo = self.cfg.hist_min_wei.max(1) as f64;
        let hi = self.cfg.hist_max_wei.max(self.cfg.hist_min_wei + 1) as f64;
        let frac = idx as f64 / (self.buckets.len() - 1).max(1) as f64;
        (lo * (hi / lo).powf(frac)) as u128
    }

    /// Lower edge of the bucket holding the p-th percentile of observations.
    fn percentile(&self, p: f64) -> Option<u128> {
        let total: u64 = self.buckets.iter().sum();
        if total == 0 {
            return None;
        }
        let rank = (total as f64 * p).ceil() as u64;
        let mut seen = 0u64;
        for (idx, count) in self.buckets.iter().enumerate() {
            seen += count;
            if seen >= rank {
                return Some(self.bucket_floor_value(idx));
            }
        }
        None
    }

    /// Publish the current thresholds for a pool at `pool_size`/`capacity`.
    /// The published floor moves at most `max_step_up`/`max_step_down`
    /// relative to the previous publication, stays inside the histogram
    /// range, and never below `min_floor_wei`.
    pub fn thresholds(&mut self, pool_size: usize, capacity: usize) -> Thresholds {
        let utilization = if capacity == 0 {
            1.0
        } else {
            (pool_size as f64 / capacity as f64).clamp(0.0, 1.0)
        };
        let base = if self.observed == 0 { self.cfg.min_floor_wei as f64 } else { self.ema_wei };
        let target = base * (1.0 + self.cfg.util_gain * utilization * utilization);

        let prev = self.last_floor_wei;
        let mut floor = target as u128;
        if prev > 0 {
            let lo = (prev as f64 * self.cfg.max_step_down).floor() as u128;
            let hi = (prev as f64 * self.cfg.max_step_up).ceil() as u128;
            floor = floor.clamp(lo, hi);
        }
        floor = floor.clamp(self.cfg.hist_min_wei, self.cfg.hist_max_wei);
        floor = floor.max(self.cfg.min_floor_wei);
        self.last_floor_wei = floor;

        // Eviction tracks the observed low end, never above the admit floor.
        let evict = self
            .percentile(0.10)
            .unwrap_or(self.cfg.min_floor_wei)
            .min((floor as f64 * self.cfg.evict_ratio) as u128)
            .max(self.cfg.min_floor_wei)
            .min(floor);

        trace!(floor, evict, utilization, "published watermark thresholds");
        Thresholds { admit_floor_wei: floor, evict_below_wei: evict }
    }

    /// Last published admit floor without republishing.
    pub fn current_floor(&self) -> u128 {
        self.last_floor_wei
    }
}
