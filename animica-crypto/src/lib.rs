//! Domain-separated SHA3-256 hashing, deterministic id derivation, and
//! ed25519 key material.
//!
//! Every multi-field digest follows the same layout: ASCII domain tag, a NUL
//! byte, then the fields (integers as u64 big-endian, variable-length
//! fields behind a u32 big-endian length prefix). The bytes are identical
//! across implementations for identical inputs.

use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _, VerifyingKey, SIGNATURE_LENGTH};
use rand::rngs::OsRng;
use sha3::{Digest as _, Sha3_256};
use thiserror::Error;

use animica_core::{Address, Digest32};

/// Domain tag for AICF job/task ids. Changing it is a consensus break.
pub const TASK_ID_DOMAIN: &[u8] = b"animica/task-id/v1";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("bad public key length: {0}")]
    BadPublicKey(usize),
    #[error("bad secret key length: {0}")]
    BadSecretKey(usize),
    #[error("bad signature length: {0}")]
    BadSignature(usize),
}

/// Incremental domain-separated hasher.
pub struct DomainHasher {
    inner: Sha3_256,
}

impl DomainHasher {
    pub fn new(domain: &[u8]) -> Self {
        let mut inner = Sha3_256::new();
        inner.update(domain);
        inner.update([0u8]);
        Self { inner }
    }

    pub fn u64(mut self, value: u64) -> Self {
        self.inner.update(value.to_be_bytes());
        self
    }

    /// Append a variable-length field with its u32 big-endian length prefix.
    pub fn len_prefixed(mut self, bytes: &[u8]) -> Self {
        self.inner.update((bytes.len() as u32).to_be_bytes());
        self.inner.update(bytes);
        self
    }

    /// Append raw bytes with no prefix; only for fixed-width fields.
    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.inner.update(bytes);
        self
    }

    pub fn finalize(self) -> Digest32 {
        self.inner.finalize().into()
    }
}

/// Deterministic AICF job id.
pub fn derive_job_id(
    chain_id: u64,
    height: u64,
    tx_hash: &[u8],
    caller: &[u8],
    payload: &[u8],
) -> Digest32 {
    DomainHasher::new(TASK_ID_DOMAIN)
        .u64(chain_id)
        .u64(height)
        .len_prefixed(tx_hash)
        .len_prefixed(caller)
        .len_prefixed(payload)
        .finalize()
}

#[derive(Debug, Clone)]
pub struct KeyMaterial {
    pub public_key: Vec<u8>,
    pub secret_key: Vec<u8>,
}

pub fn generate_ed25519() -> KeyMaterial {
    let mut csprng = OsRng;
    let signing = SigningKey::generate(&mut csprng);
    let verify = signing.verifying_key();
    KeyMaterial {
        public_key: verify.to_bytes().to_vec(),
        secret_key: signing.to_bytes().to_vec(),
    }
}

/// Address: low 20 bytes of SHA3-256 over the public key.
pub fn address_from_public_key(pk: &[u8]) -> Address {
    let mut hasher = Sha3_256::new();
    hasher.update(pk);
    let digest: Digest32 = hasher.finalize().into();
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest[12..32]);
    out
}

pub fn sign_message(sk: &[u8], msg: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let sk_arr: [u8; 32] = sk.try_into().map_err(|_| CryptoError::BadSecretKey(sk.len()))?;
    let signing = SigningKey::from_bytes(&sk_arr);
    Ok(signing.sign(msg).to_bytes().to_vec())
}

pub fn verify_signature(pk: &[u8], msg: &[u8], sig: &[u8]) -> Result<bool, CryptoError> {
    let pk_arr: [u8; 32] = pk.try_into().map_err(|_| CryptoError::BadPublicKey(pk.len()))?;
    let vk = VerifyingKey::from_bytes(&pk_arr).map_err(|_| CryptoError::BadPublicKey(pk.len()))?;
    let sig_arr: [u8; SIGNATURE_LENGTH] =
        sig.try_into().map_err(|_| CryptoError::BadSignature(sig.len()))?;
    let signature = Signature::from_bytes(&sig_arr);
    Ok(vk.verify(msg, &signature).is_ok())
}

/// Sign the canonical bytes of a transaction (with `sig` unset).
pub fn sign_transaction(
    sk: &[u8],
    tx: &animica_core::Transaction,
) -> Result<Vec<u8>, SignTxError> {
    let mut unsigned = tx.clone();
    unsigned.sig = None;
    let bytes = animica_core::canonical::encode_tx(&unsigned)?;
    Ok(sign_message(sk, &bytes)?)
}

pub fn verify_transaction(pk: &[u8], tx: &animica_core::Transaction) -> Result<bool, SignTxError> {
    let sig = match &tx.sig {
        Some(sig) => sig.clone(),
        None => return Ok(false),
    };
    let mut unsigned = tx.clone();
    unsigned.sig = None;
    let bytes = animica_core::canonical::encode_tx(&unsigned)?;
    Ok(verify_signature(pk, &bytes, &sig)?)
}

#[derive(Debug, Error)]
pub enum SignTxError {
    #[error(transparent)]
    Codec(#[from] animica_core::canonical::CodecError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}
