use serde::{Deserialize, Serialize};
use sha3::{Digest as _, Sha3_256};

pub mod canonical;
pub mod da;
pub mod execution;
pub mod issuance;
pub mod problem;
pub mod state;

pub use execution::{BlockError, ExecError, Executor};
pub use issuance::{issuance_for_block, IssuanceParams};
pub use problem::{Problem, VmError};
pub use state::{Checkpoint, StateDb, StateError};

/// Address is the low 20 bytes of a public-key hash, hex-rendered externally.
pub type Address = [u8; 20];
pub type TxHash = [u8; 32];
pub type BlockHash = [u8; 32];
pub type Digest32 = [u8; 32];

pub const EMPTY_CODE_HASH: Digest32 = [0u8; 32];

/// Render a byte slice as 0x-prefixed lowercase hex.
pub fn to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Parse 0x-prefixed (or bare) hex; odd-length input is left-padded with a
/// zero nibble, mirroring the wire conventions of the RPC layer.
pub fn from_hex(s: &str) -> Result<Vec<u8>, hex::FromHexError> {
    let s = s.trim();
    let s = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
    if s.len() % 2 == 1 {
        let mut padded = String::with_capacity(s.len() + 1);
        padded.push('0');
        padded.push_str(s);
        hex::decode(&padded)
    } else {
        hex::decode(s)
    }
}

pub fn sha3_256(data: &[u8]) -> Digest32 {
    let mut hasher = Sha3_256::new();
    hasher.update(data);
    hasher.finalize().into()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub nonce: u64,
    pub balance: u128,
    pub code_hash: Digest32,
}

impl Default for Account {
    fn default() -> Self {
        Self { nonce: 0, balance: 0, code_hash: EMPTY_CODE_HASH }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessListItem {
    pub address: Address,
    pub storage_keys: Vec<Digest32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub from: Address,
    /// None means contract deploy.
    pub to: Option<Address>,
    pub value: u128,
    pub gas_limit: u64,
    pub gas_price: u64,
    pub nonce: u64,
    pub chain_id: Option<u64>,
    pub data: Vec<u8>,
    pub access_list: Vec<AccessListItem>,
    pub sig: Option<Vec<u8>>,
}

impl Transaction {
    /// Worst-case fee the sender must be able to cover up front.
    pub fn effective_fee(&self) -> u128 {
        self.gas_limit as u128 * self.gas_price as u128
    }

    /// SHA3-256 over the canonical CBOR encoding.
    pub fn hash(&self) -> Result<TxHash, canonical::CodecError> {
        Ok(sha3_256(&canonical::encode_tx(self)?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub height: u64,
    pub parent_hash: BlockHash,
    pub coinbase: Address,
    pub timestamp: u64,
    pub state_root: Digest32,
    pub receipts_root: Digest32,
    /// S in micro units; the block is valid iff this meets the target Θ.
    pub acceptance_scalar_micro: u64,
    pub proof_set_digest: Digest32,
    /// The uniform draw u in micro units, kept for observability.
    pub pow_draw_micro: u64,
    /// Nonce the miner ground to obtain the draw.
    pub nonce: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub txs: Vec<Transaction>,
}

impl Block {
    /// SHA3-256 over the canonical CBOR of the header (hash field excluded
    /// by construction: the header never carries its own hash).
    pub fn hash(&self) -> BlockHash {
        canonical::block_hash(&self.header)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxStatus {
    Success,
    Revert,
    OutOfGas,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<Digest32>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: TxHash,
    pub status: TxStatus,
    pub gas_used: u64,
    pub logs: Vec<Log>,
}
