//! Proof selection under per-type caps, a total Γ cap, and escort-q
//! fairness.
//!
//! Candidates are scored `ψ × weight(type)`, sorted descending (stable), and
//! taken greedily. A candidate is skipped when its type is capped, when
//! adding it would exceed Γ (ε-tolerant), or, with fairness active, when
//! its type already holds more than fraction q of the picks and some other
//! type is still selectable.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sha3::{Digest as _, Sha3_256};

use animica_core::Digest32;

const GAMMA_EPS: f64 = 1e-12;
const PROOF_SET_DOMAIN: &[u8] = b"animica/proof-set/v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProofKind {
    Hash,
    Ai,
    Quantum,
    Storage,
    Vdf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProofCandidate {
    pub kind: ProofKind,
    /// Non-negative contribution to Σψ.
    pub psi: f64,
    /// Opaque to selection; carries provider ids, attestation handles, etc.
    #[serde(default)]
    pub meta: serde_json::Value,
}

impl ProofCandidate {
    pub fn new(kind: ProofKind, psi: f64) -> Self {
        Self { kind, psi, meta: serde_json::Value::Null }
    }

    pub fn provider(&self) -> Option<&str> {
        self.meta.get("provider").and_then(serde_json::Value::as_str)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectorPolicy {
    #[serde(default)]
    pub per_type_caps: HashMap<ProofKind, usize>,
    #[serde(default)]
    pub weights: HashMap<ProofKind, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gamma_cap: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escort_q: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl SelectorPolicy {
    fn weight(&self, kind: ProofKind) -> f64 {
        self.weights.get(&kind).copied().unwrap_or(1.0)
    }

    fn cap(&self, kind: ProofKind) -> usize {
        self.per_type_caps.get(&kind).copied().unwrap_or(usize::MAX)
    }
}

pub fn select_proofs(candidates: &[ProofCandidate], policy: &SelectorPolicy) -> Vec<ProofCandidate> {
    let limit = policy.limit.unwrap_or(candidates.len());
    let score = |c: &ProofCandidate| c.psi * policy.weight(c.kind);

    let mut ordered: Vec<&ProofCandidate> = candidates.iter().collect();
    ordered.sort_by(|a, b| score(b).partial_cmp(&score(a)).unwrap_or(std::cmp::Ordering::Equal));

    let types_present: std::collections::HashSet<ProofKind> =
        ordered.iter().map(|c| c.kind).collect();
    // Fairness cannot block the sole source.
    let apply_fairness = matches!(policy.escort_q, Some(q) if q > 0.0) && types_present.len() > 1;

    let mut counts: HashMap<ProofKind, usize> = HashMap::new();
    let mut chosen: Vec<ProofCandidate> = Vec::new();
    let mut gamma_total = 0.0_f64;

    for candidate in &ordered {
        let kind = candidate.kind;
        if counts.get(&kind).copied().unwrap_or(0) >= policy.cap(kind) {
            continue;
        }
        let add = score(candidate);
        if let Some(gcap) = policy.gamma_cap {
            if gamma_total + add > gcap + GAMMA_EPS {
                continue;
            }
        }

        if apply_fairness && !chosen.is_empty() {
            let q = policy.escort_q.expect("fairness active");
            let total: usize = counts.values().sum();
            let frac = counts.get(&kind).copied().unwrap_or(0) as f64 / total.max(1) as f64;
            if frac > q {
                // Defer this pick when some other type is still selectable
                // under both caps.
                let alt_ok = ordered.iter().any(|other| {
                    other.kind != kind
                        && counts.get(&other.kind).copied().unwrap_or(0) < policy.cap(other.kind)
                        && policy
                            .gamma_cap
                            .map_or(true, |gcap| gamma_total + score(other) <= gcap + GAMMA_EPS)
                });
                if alt_ok {
                    continue;
                }
            }
        }

        chosen.push((*candidate).clone());
        *counts.entry(kind).or_insert(0) += 1;
        gamma_total += add;
        if chosen.len() >= limit {
            break;
        }
    }

    chosen
}

/// Commitment to the selected proof set, order-sensitive.
pub fn proof_set_digest(proofs: &[ProofCandidate]) -> Digest32 {
    let mut hasher = Sha3_256::new();
    hasher.update(PROOF_SET_DOMAIN);
    hasher.update([0u8]);
    for proof in proofs {
        hasher.update([kind_tag(proof.kind)]);
        hasher.update(crate::math::to_micro(proof.psi).to_be_bytes());
    }
    hasher.finalize().into()
}

fn kind_tag(kind: ProofKind) -> u8 {
    match kind {
        ProofKind::Hash => 0,
        ProofKind::Ai => 1,
        ProofKind::Quantum => 2,
        ProofKind::Storage => 3,
        ProofKind::Vdf => 4,
    }
}

/// Σψ of a selected set (unweighted, as consumed by the acceptance scalar).
pub fn sigma_psi(proofs: &[ProofCandidate]) -> f64 {
    proofs.iter().map(|p| p.psi).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn many(kind: ProofKind, psi: f64, n: usize) -> Vec<ProofCandidate> {
        (0..n).map(|_| ProofCandidate::new(kind, psi)).collect()
    }

    #[test]
    fn per_type_caps_are_enforced() {
        let mut candidates = many(ProofKind::Ai, 10.0, 5);
        candidates.extend(many(ProofKind::Hash, 1.0, 2));
        let policy = SelectorPolicy {
            per_type_caps: HashMap::from([(ProofKind::Ai, 3), (ProofKind::Hash, 2)]),
            ..Default::default()
        };
        let chosen = select_proofs(&candidates, &policy);
        let ai = chosen.iter().filter(|c| c.kind == ProofKind::Ai).count();
        let hash = chosen.iter().filter(|c| c.kind == ProofKind::Hash).count();
        assert_eq!(ai, 3);
        assert_eq!(hash, 2);
    }

    #[test]
    fn gamma_cap_truncates_with_epsilon_tolerance() {
        let candidates = many(ProofKind::Hash, 1.0, 5);
        let policy = SelectorPolicy { gamma_cap: Some(3.0), ..Default::default() };
        let chosen = select_proofs(&candidates, &policy);
        assert_eq!(chosen.len(), 3);
        assert!(sigma_psi(&chosen) <= 3.0 + 1e-12);
    }

    #[test]
    fn escort_q_diversifies_when_one_type_dominates() {
        // 5 heavy A's vs 2 light B's, caps {A:3, B:2}, q = 0.5, limit 5.
        let mut candidates = many(ProofKind::Ai, 10.0, 5);
        candidates.extend(many(ProofKind::Hash, 1.0, 2));
        let policy = SelectorPolicy {
            per_type_caps: HashMap::from([(ProofKind::Ai, 3), (ProofKind::Hash, 2)]),
            escort_q: Some(0.5),
            limit: Some(5),
            ..Default::default()
        };
        let chosen = select_proofs(&candidates, &policy);
        assert!(chosen.len() <= 5);
        let ai = chosen.iter().filter(|c| c.kind == ProofKind::Ai).count();
        let hash = chosen.iter().filter(|c| c.kind == ProofKind::Hash).count();
        assert_eq!(chosen[0].kind, ProofKind::Ai, "highest score still leads");
        assert!(ai <= 3, "A may not exceed its cap");
        assert_eq!(hash, 2, "B must be escorted in once A dominates");
    }

    #[test]
    fn fairness_is_disabled_for_a_single_type() {
        let candidates = many(ProofKind::Quantum, 2.0, 4);
        let policy = SelectorPolicy { escort_q: Some(0.25), limit: Some(4), ..Default::default() };
        let chosen = select_proofs(&candidates, &policy);
        assert_eq!(chosen.len(), 4, "fairness cannot block the sole source");
    }

    #[test]
    fn weights_change_ordering_but_not_sigma_psi_semantics() {
        let candidates = vec![
            ProofCandidate::new(ProofKind::Hash, 4.0),
            ProofCandidate::new(ProofKind::Ai, 3.0),
        ];
        let policy = SelectorPolicy {
            weights: HashMap::from([(ProofKind::Ai, 2.0)]),
            limit: Some(1),
            ..Default::default()
        };
        let chosen = select_proofs(&candidates, &policy);
        assert_eq!(chosen[0].kind, ProofKind::Ai, "weighted score 6.0 beats 4.0");
        assert_eq!(sigma_psi(&chosen), 3.0, "Σψ uses raw ψ, not the weighted score");
    }

    #[test]
    fn selection_is_deterministic_for_a_given_input_order() {
        let mut candidates = many(ProofKind::Ai, 1.5, 3);
        candidates.extend(many(ProofKind::Storage, 1.5, 3));
        let policy = SelectorPolicy { limit: Some(4), escort_q: Some(0.5), ..Default::default() };
        let a = select_proofs(&candidates, &policy);
        let b = select_proofs(&candidates, &policy);
        assert_eq!(a, b);
    }

    #[test]
    fn proof_set_digest_commits_to_members_and_order() {
        let a = vec![ProofCandidate::new(ProofKind::Hash, 1.0), ProofCandidate::new(ProofKind::Ai, 2.0)];
        let mut b = a.clone();
        b.reverse();
        assert_ne!(proof_set_digest(&a), proof_set_digest(&b));
        assert_eq!(proof_set_digest(&a), proof_set_digest(&a.clone()));
    }

    proptest::proptest! {
        #[test]
        fn invariants_hold_for_arbitrary_candidates(
            psis in proptest::collection::vec(0.0f64..10.0, 0..24),
            limit in 1usize..8,
        ) {
            let kinds = [ProofKind::Hash, ProofKind::Ai, ProofKind::Quantum];
            let candidates: Vec<ProofCandidate> = psis
                .iter()
                .enumerate()
                .map(|(i, &psi)| ProofCandidate::new(kinds[i % kinds.len()], psi))
                .collect();
            let policy = SelectorPolicy {
                per_type_caps: HashMap::from([(ProofKind::Hash, 2), (ProofKind::Ai, 3)]),
                gamma_cap: Some(12.0),
                escort_q: Some(0.5),
                limit: Some(limit),
                ..Default::default()
            };
            let chosen = select_proofs(&candidates, &policy);
            proptest::prop_assert!(chosen.len() <= limit);
            let hash = chosen.iter().filter(|c| c.kind == ProofKind::Hash).count();
            let ai = chosen.iter().filter(|c| c.kind == ProofKind::Ai).count();
            proptest::prop_assert!(hash <= 2);
            proptest::prop_assert!(ai <= 3);
            proptest::prop_assert!(sigma_psi(&chosen) <= 12.0 + 1e-12);
        }
    }
}
