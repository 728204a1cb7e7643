//! Data-availability commitment contract.
//!
//! The core never samples or reconstructs blobs; it only checks that an
//! attached commitment matches the one the block committed to, by namespace
//! and root.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const NAMESPACE_LEN: usize = 8;
pub const MIN_ROOT_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaParams {
    pub chunk_size: u32,
    pub data_shards: u16,
    pub parity_shards: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaCommitment {
    pub namespace: [u8; NAMESPACE_LEN],
    pub root: Vec<u8>,
    pub params: DaParams,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DaError {
    #[error("commitment root too short: {len} bytes, need at least {MIN_ROOT_LEN}")]
    RootTooShort { len: usize },
    #[error("namespace mismatch")]
    NamespaceMismatch,
    #[error("root mismatch")]
    RootMismatch,
}

impl DaCommitment {
    pub fn new(namespace: [u8; NAMESPACE_LEN], root: Vec<u8>, params: DaParams) -> Result<Self, DaError> {
        if root.len() < MIN_ROOT_LEN {
            return Err(DaError::RootTooShort { len: root.len() });
        }
        Ok(Self { namespace, root, params })
    }

    /// Verify attached data against this commitment: namespace and root must
    /// be byte-equal. Erasure parameters are advisory for fetchers.
    pub fn verify_attached(&self, attached: &DaCommitment) -> Result<(), DaError> {
        if self.namespace != attached.namespace {
            return Err(DaError::NamespaceMismatch);
        }
        if self.root != attached.root {
            return Err(DaError::RootMismatch);
        }
        Ok(())
    }
}
