//! Randomness beacon round FSM and the `Beacon` seam the node consumes.
//!
//! A round moves COMMIT → REVEAL → FINALIZED, never skipping a phase.
//! Reveals must match their commitment digest; the finalized output mixes
//! all reveals in participant order under a domain tag.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha3::{Digest as _, Sha3_256};
use thiserror::Error;

use animica_core::{sha3_256, Digest32};

pub const BEACON_DOMAIN: &[u8] = b"animica/beacon/v1";

pub type ParticipantId = [u8; 32];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RoundPhase {
    Commit,
    Reveal,
    Finalized,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BeaconError {
    #[error("round is in phase {got:?}, operation needs {expected:?}")]
    PhaseViolation { expected: RoundPhase, got: RoundPhase },
    #[error("participant committed twice")]
    DuplicateCommit,
    #[error("reveal without a matching commit")]
    UnknownCommit,
    #[error("reveal does not hash to the committed digest")]
    MismatchedReveal,
    #[error("cannot finalize a round with no reveals")]
    NoReveals,
}

/// One commit-reveal round. Participants first commit SHA3-256(preimage),
/// then disclose the preimage; the output is fixed at finalization.
pub struct RoundState {
    round_id: u64,
    phase: RoundPhase,
    commits: BTreeMap<ParticipantId, Digest32>,
    reveals: BTreeMap<ParticipantId, Vec<u8>>,
    output: Option<Digest32>,
}

impl RoundState {
    pub fn new(round_id: u64) -> Self {
        Self {
            round_id,
            phase: RoundPhase::Commit,
            commits: BTreeMap::new(),
            reveals: BTreeMap::new(),
            output: None,
        }
    }

    pub fn round_id(&self) -> u64 {
        self.round_id
    }

    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    fn require(&self, expected: RoundPhase) -> Result<(), BeaconError> {
        if self.phase != expected {
            return Err(BeaconError::PhaseViolation { expected, got: self.phase });
        }
        Ok(())
    }

    pub fn commit(&mut self, who: ParticipantId, digest: Digest32) -> Result<(), BeaconError> {
        self.require(RoundPhase::Commit)?;
        if self.commits.contains_key(&who) {
            return Err(BeaconError::DuplicateCommit);
        }
        self.commits.insert(who, digest);
        Ok(())
    }

    pub fn begin_reveal(&mut self) -> Result<(), BeaconError> {
        self.require(RoundPhase::Commit)?;
        self.phase = RoundPhase::Reveal;
        Ok(())
    }

    pub fn reveal(&mut self, who: ParticipantId, preimage: Vec<u8>) -> Result<(), BeaconError> {
        self.require(RoundPhase::Reveal)?;
        let committed = self.commits.get(&who).ok_or(BeaconError::UnknownCommit)?;
        if sha3_256(&preimage) != *committed {
            return Err(BeaconError::MismatchedReveal);
        }
        self.reveals.insert(who, preimage);
        Ok(())
    }

    /// Mix all reveals, participant-ordered, into the round output.
    pub fn finalize(&mut self) -> Result<Digest32, BeaconError> {
        self.require(RoundPhase::Reveal)?;
        if self.reveals.is_empty() {
            return Err(BeaconError::NoReveals);
        }
        let mut hasher = Sha3_256::new();
        hasher.update(BEACON_DOMAIN);
        hasher.update([0u8]);
        hasher.update(self.round_id.to_be_bytes());
        for (who, preimage) in &self.reveals {
            hasher.update(who);
            hasher.update((preimage.len() as u32).to_be_bytes());
            hasher.update(preimage);
        }
        let output: Digest32 = hasher.finalize().into();
        self.phase = RoundPhase::Finalized;
        self.output = Some(output);
        Ok(output)
    }

    pub fn output(&self) -> Option<Digest32> {
        self.output
    }
}

/// Deterministic randomness the node mixes into PoW draws.
pub trait Beacon: Send + Sync {
    fn beacon(&self, round_id: u64) -> Digest32;
}

/// Devnet beacon: a pure function of the round id. Real deployments plug a
/// finalized commit-reveal pipeline in behind the same trait.
pub struct DevBeacon;

impl Beacon for DevBeacon {
    fn beacon(&self, round_id: u64) -> Digest32 {
        let mut hasher = Sha3_256::new();
        hasher.update(BEACON_DOMAIN);
        hasher.update([0u8]);
        hasher.update(round_id.to_be_bytes());
        hasher.finalize().into()
    }
}
