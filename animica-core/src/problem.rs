//! Stable error codes and their problem+JSON wire form.
//!
//! Every user-visible failure maps to `{type, title, detail, deterministic,
//! context}`. The `deterministic` flag separates errors every honest node
//! agrees on (reverts, fatal block errors) from locally-scoped rejections
//! (admission policy, rate limits).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub detail: String,
    pub deterministic: bool,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub context: Map<String, Value>,
}

impl Problem {
    pub fn new(code: &str, detail: impl Into<String>, deterministic: bool) -> Self {
        Self {
            kind: format!("animica://vm/{}", code.to_ascii_lowercase()),
            title: code.to_string(),
            detail: detail.into(),
            deterministic,
            context: Map::new(),
        }
    }

    pub fn with_context(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }

    /// The stable symbolic code (the title field).
    pub fn code(&self) -> &str {
        &self.title
    }
}

/// VM-level error taxonomy shared across execution and the RPC boundary.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum VmError {
    #[error("execution reverted: {reason}")]
    Revert { reason: String, data: Vec<u8> },
    #[error("insufficient balance: have {have}, need {need}")]
    InsufficientBalance { have: u128, need: u128 },
    /// A code this node does not recognize, e.g. from a newer peer. Kept
    /// representable instead of failing decode.
    #[error("{code}: {detail}")]
    Other { code: String, detail: String, deterministic: bool, context: Map<String, Value> },
}

impl VmError {
    pub fn code(&self) -> &str {
        match self {
            VmError::Revert { .. } => "VM_REVERT",
            VmError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            VmError::Other { code, .. } => code,
        }
    }

    pub fn to_problem(&self) -> Problem {
        match self {
            VmError::Revert { reason, data } => {
                let mut p = Problem::new("VM_REVERT", format!("execution reverted: {reason}"), true)
                    .with_context("reason", reason.clone());
                if !data.is_empty() {
                    p = p.with_context("data_hex", crate::to_hex(data));
                }
                p
            }
            VmError::InsufficientBalance { have, need } => {
                Problem::new("INSUFFICIENT_BALANCE", "sender cannot cover value + fee", true)
                    .with_context("have", have.to_string())
                    .with_context("need", need.to_string())
            }
            VmError::Other { code, detail, deterministic, context } => {
                let mut p = Problem::new(code, detail.clone(), *deterministic);
                p.context = context.clone();
                p
            }
        }
    }

    /// Decode a problem document back into the taxonomy. Unknown titles map
    /// to `VmError::Other` so remote errors stay inspectable.
    pub fn from_problem(problem: &Problem) -> Self {
        match problem.code() {
            "VM_REVERT" => {
                let reason = problem
                    .context
                    .get("reason")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let data = problem
                    .context
                    .get("data_hex")
                    .and_then(Value::as_str)
                    .and_then(|s| crate::from_hex(s).ok())
                    .unwrap_or_default();
                VmError::Revert { reason, data }
            }
            "INSUFFICIENT_BALANCE" => {
                let get = |key: &str| {
                    problem
                        .context
                        .get(key)
                        .and_then(Value::as_str)
                        .and_then(|s| s.parse::<u128>().ok())
                        .unwrap_or_default()
                };
                VmError::InsufficientBalance { have: get("have"), need: get("need") }
            }
            code => VmError::Other {
                code: code.to_string(),
                detail: problem.detail.clone(),
                deterministic: problem.deterministic,
                context: problem.context.clone(),
            },
        }
    }
}

impl From<crate::state::StateError> for VmError {
    fn from(e: crate::state::StateError) -> Self {
        match e {
            crate::state::StateError::InsufficientBalance { have, need, .. } => {
                VmError::InsufficientBalance { have, need }
            }
            crate::state::StateError::BalanceOverflow { address } => VmError::Other {
                code: "BALANCE_OVERFLOW".to_string(),
                detail: format!("balance overflow for {}", crate::to_hex(&address)),
                deterministic: true,
                context: Map::new(),
            },
        }
    }
}
