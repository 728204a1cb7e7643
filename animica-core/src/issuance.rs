//! Deterministic per-height block reward with halving and a tail emission.

use serde::{Deserialize, Serialize};

/// Decay is expressed in basis points and applied with integer arithmetic so
/// every implementation computes bit-identical rewards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuanceParams {
    /// Reward at epoch 0, in nano-native.
    pub start: u128,
    /// Blocks per epoch.
    pub epoch_len: u64,
    /// Per-epoch decay, basis points (1250 = 12.5%).
    pub decay_bp: u32,
    /// Minimum reward after all halvings.
    pub tail: u128,
    /// Epoch index is capped here.
    pub max_halvings: u32,
}

impl Default for IssuanceParams {
    fn default() -> Self {
        Self {
            start: 1_000_000,
            epoch_len: 4_320_000,
            decay_bp: 1_250,
            tail: 100_000,
            max_halvings: 64,
        }
    }
}

pub fn issuance_for_epoch(params: &IssuanceParams, epoch: u64) -> u128 {
    let keep = 10_000u128.saturating_sub(params.decay_bp as u128);
    let mut reward = params.start;
    for _ in 0..epoch {
        reward = reward * keep / 10_000;
        if reward <= params.tail {
            break;
        }
    }
    reward.max(params.tail)
}

pub fn issuance_for_block(params: &IssuanceParams, height: u64) -> u128 {
    let epoch = (height / params.epoch_len.max(1)).min(params.max_halvings as u64);
    issuance_for_epoch(params, epoch)
}
