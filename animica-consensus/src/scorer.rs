//! Acceptance scalar computation and target comparison.

use crate::math::{h_from_u, to_micro};

/// `S = H(u) + Σψ` as a float; comparisons happen in micro units only.
pub fn acceptance_scalar(u: f64, sigma_psi: f64) -> f64 {
    h_from_u(u) + sigma_psi
}

pub fn acceptance_micro(u: f64, sigma_psi: f64) -> u64 {
    to_micro(acceptance_scalar(u, sigma_psi))
}

/// Strict-inequality target test; equality accepts.
pub fn meets_target(s_micro: u64, theta_micro: u64) -> bool {
    s_micro >= theta_micro
}

/// Sub-share threshold for pool mining.
pub fn share_target_micro(theta_micro: u64, share_ratio: f64) -> u64 {
    debug_assert!((0.0..=1.0).contains(&share_ratio));
    (theta_micro as f64 * share_ratio).floor() as u64
}
