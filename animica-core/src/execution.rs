//! Deterministic transaction application and whole-block execution.

use thiserror::Error;
use tracing::debug;

use crate::canonical;
use crate::issuance::{issuance_for_block, IssuanceParams};
use crate::state::{StateDb, StateError};
use crate::{sha3_256, to_hex, Address, Block, Receipt, TxHash, TxStatus, Transaction};

/// Transaction-level failures. These abort the failing tx only; the caller
/// decides whether that is recoverable (builder) or fatal (import).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error("bad nonce for {sender}: expected {expected}, got {got}", sender = to_hex(.address))]
    BadNonce { address: Address, expected: u64, got: u64 },
    #[error("codec: {0}")]
    Codec(#[from] canonical::CodecError),
}

/// Block-level failures reject the whole block; state is rolled back to the
/// pre-block snapshot.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BlockError {
    #[error("bad parent: expected {exp}, got {act}", exp = to_hex(.expected), act = to_hex(.got))]
    BadParent { expected: crate::BlockHash, got: crate::BlockHash },
    #[error("state root mismatch: header {hdr}, computed {comp}", hdr = to_hex(.header), comp = to_hex(.computed))]
    BadRoot { header: crate::Digest32, computed: crate::Digest32 },
    #[error("receipts root mismatch")]
    BadReceiptsRoot,
    #[error("tx {index} invalid: {source}")]
    Tx { index: usize, source: ExecError },
}

pub struct Executor {
    issuance: IssuanceParams,
}

impl Executor {
    pub fn new(issuance: IssuanceParams) -> Self {
        Self { issuance }
    }

    pub fn issuance(&self) -> &IssuanceParams {
        &self.issuance
    }

    /// Apply one transaction under its own checkpoint. On failure the state
    /// is exactly as before the call; rejected txs never bump the nonce.
    pub fn execute_tx(
        &self,
        state: &mut StateDb,
        tx: &Transaction,
        coinbase: Address,
    ) -> Result<Receipt, ExecError> {
        let cp = state.checkpoint();
        match self.transfer(state, tx, coinbase) {
            Ok(receipt) => {
                state.commit(cp);
                Ok(receipt)
            }
            Err(e) => {
                state.revert_to(cp);
                Err(e)
            }
        }
    }

    fn transfer(
        &self,
        state: &mut StateDb,
        tx: &Transaction,
        coinbase: Address,
    ) -> Result<Receipt, ExecError> {
        let sender = state.get(&tx.from);
        if sender.nonce != tx.nonce {
            return Err(ExecError::BadNonce {
                address: tx.from,
                expected: sender.nonce,
                got: tx.nonce,
            });
        }
        let fee = tx.effective_fee();
        let need = tx.value.checked_add(fee).ok_or(StateError::BalanceOverflow { address: tx.from })?;
        if sender.balance < need {
            return Err(StateError::InsufficientBalance {
                address: tx.from,
                have: sender.balance,
                need,
            }
            .into());
        }

        state.debit(tx.from, need)?;
        state.inc_nonce(tx.from);
        match tx.to {
            Some(to) => state.credit(to, tx.value)?,
            None => {
                // Deploy: the new account lives at a hash of (sender, nonce)
                // and carries the code hash of the payload.
                let deployed = deploy_address(&tx.from, tx.nonce);
                state.credit(deployed, tx.value)?;
                state.set_code_hash(deployed, sha3_256(&tx.data));
            }
        }
        state.credit(coinbase, fee)?;

        Ok(Receipt {
            tx_hash: tx.hash()?,
            status: TxStatus::Success,
            gas_used: tx.gas_limit,
            logs: vec![],
        })
    }

    /// Mint the per-height reward to the coinbase; returns the amount.
    pub fn mint_block_reward(
        &self,
        state: &mut StateDb,
        coinbase: Address,
        height: u64,
    ) -> Result<u128, StateError> {
        let minted = issuance_for_block(&self.issuance, height);
        state.credit(coinbase, minted)?;
        Ok(minted)
    }

    /// Apply a full block against `state`, validating the header roots.
    /// Honest builders pre-filter failing txs, so any tx failure here is
    /// fatal for the block; state is rolled back to the pre-block snapshot.
    pub fn apply_block(&self, state: &mut StateDb, block: &Block) -> Result<Vec<Receipt>, BlockError> {
        let cp = state.checkpoint();
        match self.apply_block_inner(state, block) {
            Ok(receipts) => {
                state.commit(cp);
                Ok(receipts)
            }
            Err(e) => {
                state.revert_to(cp);
                Err(e)
            }
        }
    }

    fn apply_block_inner(
        &self,
        state: &mut StateDb,
        block: &Block,
    ) -> Result<Vec<Receipt>, BlockError> {
        let coinbase = block.header.coinbase;
        let mut receipts = Vec::with_capacity(block.txs.len());
        for (index, tx) in block.txs.iter().enumerate() {
            let receipt = self
                .execute_tx(state, tx, coinbase)
                .map_err(|source| BlockError::Tx { index, source })?;
            receipts.push(receipt);
        }
        self.mint_block_reward(state, coinbase, block.header.height)
            .map_err(|e| BlockError::Tx { index: block.txs.len(), source: e.into() })?;

        let computed = state.root();
        if computed != block.header.state_root {
            return Err(BlockError::BadRoot { header: block.header.state_root, computed });
        }
        let receipts_root = canonical::receipts_root(&receipts);
        if receipts_root != block.header.receipts_root {
            return Err(BlockError::BadReceiptsRoot);
        }
        debug!(height = block.header.height, txs = block.txs.len(), "applied block");
        Ok(receipts)
    }
}

/// Address of a deployed account: low 20 bytes of SHA3-256(sender || nonce).
pub fn deploy_address(sender: &Address, nonce: u64) -> Address {
    let mut buf = Vec::with_capacity(28);
    buf.extend_from_slice(sender);
    buf.extend_from_slice(&nonce.to_be_bytes());
    let digest = sha3_256(&buf);
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest[12..32]);
    out
}
