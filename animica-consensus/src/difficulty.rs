//! Fractional retargeting of the acceptance target Θ.
//!
//! Θ is adjusted by the ratio of target to observed block spacing, computed
//! in micro units with integer arithmetic, clamped per window so a burst of
//! lucky blocks cannot swing the target more than `max_adjust`×.

use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetargetParams {
    /// Desired seconds between blocks.
    pub target_spacing_s: u64,
    /// Per-window clamp on the adjustment factor.
    pub max_adjust: u32,
    /// Θ never retargets below this.
    pub theta_min_micro: u64,
    /// How many trailing blocks feed one retarget.
    pub window_blocks: u64,
}

impl Default for RetargetParams {
    fn default() -> Self {
        Self { target_spacing_s: 30, max_adjust: 4, theta_min_micro: 50_000, window_blocks: 10 }
    }
}

/// Retarget from the timestamps of the last window of blocks (ascending).
/// Fewer than two timestamps leaves Θ unchanged.
pub fn retarget_theta(theta_micro: u64, timestamps: &[u64], params: &RetargetParams) -> u64 {
    if timestamps.len() < 2 {
        return theta_micro.max(params.theta_min_micro);
    }
    let spans = timestamps.len() as u64 - 1;
    let elapsed = timestamps[timestamps.len() - 1].saturating_sub(timestamps[0]);
    // Clamp observed spacing to at least one second per span so a burst of
    // same-second blocks cannot divide by zero or explode Θ.
    let observed = (elapsed / spans).max(1);

    let raw = (theta_micro as u128) * (params.target_spacing_s as u128) / (observed as u128);
    let lo = (theta_micro / params.max_adjust as u64).max(1) as u128;
    let hi = theta_micro as u128 * params.max_adjust as u128;
    let clamped = raw.clamp(lo, hi) as u64;
    let next = clamped.max(params.theta_min_micro);
    debug!(theta_micro, next, observed, "retargeted theta");
    next
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> RetargetParams {
        RetargetParams { target_spacing_s: 30, max_adjust: 4, theta_min_micro: 1_000, window_blocks: 10 }
    }

    #[test]
    fn fast_blocks_raise_theta() {
        // Blocks every 10s against a 30s target: Θ triples.
        let ts: Vec<u64> = (0..5).map(|i| 100 + i * 10).collect();
        assert_eq!(retarget_theta(600_000, &ts, &params()), 1_800_000);
    }

    #[test]
    fn slow_blocks_lower_theta() {
        let ts: Vec<u64> = (0..5).map(|i| 100 + i * 60).collect();
        assert_eq!(retarget_theta(600_000, &ts, &params()), 300_000);
    }

    #[test]
    fn adjustment_is_clamped_per_window() {
        // Same-second blocks would multiply Θ by 30; the clamp holds it at 4x.
        let ts = vec![100, 100, 100, 100];
        assert_eq!(retarget_theta(600_000, &ts, &params()), 2_400_000);
        // And a huge gap cannot divide by more than 4.
        let ts = vec![0, 100_000];
        assert_eq!(retarget_theta(600_000, &ts, &params()), 150_000);
    }

    #[test]
    fn theta_floor_is_respected() {
        let ts = vec![0, 1_000_000];
        assert_eq!(retarget_theta(2_000, &ts, &params()), 1_000);
    }

    #[test]
    fn short_windows_are_a_no_op() {
        assert_eq!(retarget_theta(600_000, &[42], &params()), 600_000);
        assert_eq!(retarget_theta(600_000, &[], &params()), 600_000);
    }
}
