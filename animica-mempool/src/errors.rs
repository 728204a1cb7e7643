//! Admission failures. None of these are fatal and none touch state; they
//! surface to the submitter with a stable code and structured context.

use animica_core::{to_hex, Address, Problem};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("tx too large: {size_bytes} bytes exceeds max {max_bytes}")]
    Oversize { size_bytes: u64, max_bytes: u64 },
    #[error("wrong chainId: got {got}, expected {expected}")]
    WrongChainId { got: u64, expected: u64 },
    #[error("sender {who} banned until t={until_s}", who = to_hex(.sender))]
    Banned { sender: Address, until_s: u64 },
    #[error("fee {fee_wei} below floor {floor_wei}")]
    FeeTooLow { fee_wei: u128, floor_wei: u128 },
    #[error("sender quota exceeded: {pending} pending, {pending_bytes} bytes")]
    QuotaExceeded { pending: usize, pending_bytes: u64 },
}

impl AdmissionError {
    pub fn code(&self) -> &'static str {
        match self {
            AdmissionError::Oversize { .. } => "OVERSIZE",
            AdmissionError::WrongChainId { .. } => "WRONG_CHAIN_ID",
            AdmissionError::Banned { .. } => "BANNED",
            AdmissionError::FeeTooLow { .. } => "FEE_TOO_LOW",
            AdmissionError::QuotaExceeded { .. } => "QUOTA_EXCEEDED",
        }
    }

    /// Admission outcomes are local policy, so `deterministic` is false.
    pub fn to_problem(&self) -> Problem {
        let p = Problem::new(self.code(), self.to_string(), false);
        match self {
            AdmissionError::Oversize { size_bytes, max_bytes } => p
                .with_context("size_bytes", *size_bytes)
                .with_context("max_bytes", *max_bytes),
            AdmissionError::WrongChainId { got, expected } => {
                p.with_context("got", *got).with_context("expected", *expected)
            }
            AdmissionError::Banned { sender, until_s } => {
                p.with_context("sender", to_hex(sender)).with_context("until_s", *until_s)
            }
            AdmissionError::FeeTooLow { fee_wei, floor_wei } => p
                .with_context("fee_wei", fee_wei.to_string())
                .with_context("floor_wei", floor_wei.to_string()),
            AdmissionError::QuotaExceeded { pending, pending_bytes } => p
                .with_context("pending", *pending as u64)
                .with_context("pending_bytes", *pending_bytes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversize_problem_carries_size_and_limit() {
        let err = AdmissionError::Oversize { size_bytes: 2048, max_bytes: 1024 };
        assert_eq!(err.code(), "OVERSIZE");
        let p = err.to_problem();
        assert_eq!(p.kind, "animica://vm/oversize");
        assert!(!p.deterministic);
        assert_eq!(p.context["size_bytes"], 2048);
        assert_eq!(p.context["max_bytes"], 1024);
        // The human-readable message mentions both values.
        assert!(p.detail.contains("2048") && p.detail.contains("1024"));
    }

    #[test]
    fn wrong_chain_id_message_names_the_expected_chain() {
        let err = AdmissionError::WrongChainId { got: 99, expected: 42 };
        let msg = err.to_string();
        assert!(msg.contains("wrong chainId"));
        assert!(msg.contains("expected 42"));
    }
}
