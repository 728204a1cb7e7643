//! Deterministic fork choice over candidate tips.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use animica_core::BlockHash;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TipWeight {
    /// Sum of acceptance scalars along the chain, in micro units.
    pub total_s_micro: u128,
    pub height: u64,
    pub hash: BlockHash,
}

/// Lexicographic weight order: higher total S wins, then higher height, then
/// the lexicographically smaller hash. The hash tiebreak is deterministic
/// and grinding-resistant because the hash commits to the whole header.
pub fn compare_weight(a: &TipWeight, b: &TipWeight) -> Ordering {
    a.total_s_micro
        .cmp(&b.total_s_micro)
        .then(a.height.cmp(&b.height))
        .then_with(|| b.hash.cmp(&a.hash))
}

/// The canonical head among `tips`, or None when empty.
pub fn fork_choice<'a>(tips: impl IntoIterator<Item = &'a TipWeight>) -> Option<&'a TipWeight> {
    tips.into_iter().max_by(|a, b| compare_weight(a, b))
}
