//! PoIES consensus primitives: the acceptance scalar `S = H(u) + Σψ`, proof
//! selection under caps and fairness, Θ retargeting, the slashing FSM, and
//! deterministic fork choice. Everything here is pure and deterministic; no
//! I/O, no clocks.

pub mod difficulty;
pub mod fork_choice;
pub mod math;
pub mod scorer;
pub mod selector;
pub mod slashing;

pub use difficulty::{retarget_theta, RetargetParams};
pub use fork_choice::{compare_weight, fork_choice, TipWeight};
pub use math::{h_from_u, to_micro, uniform_from_digest, MICRO_SCALE};
pub use scorer::{acceptance_micro, acceptance_scalar, meets_target, share_target_micro};
pub use selector::{proof_set_digest, select_proofs, sigma_psi, ProofCandidate, ProofKind, SelectorPolicy};
pub use slashing::{
    ProviderState, SlashEvent, SlashPenalties, SlashThresholds, SlashingEngine, WindowStats,
};
