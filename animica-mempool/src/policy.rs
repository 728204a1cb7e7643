//! Stateless admission gates, applied in a fixed order with short-circuit:
//! size, chain id, ban, fee floor, sender quota.

use serde::{Deserialize, Serialize};
use tracing::debug;

use animica_core::Transaction;

use crate::banlist::BanList;
use crate::errors::AdmissionError;
use crate::watermark::FeeWatermark;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionConfig {
    pub max_tx_size_bytes: u64,
    /// When set, txs carrying a different chain id are rejected. A tx with
    /// no chain id passes this gate; later validators may still reject it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_chain_id: Option<u64>,
    /// Locally submitted txs may price below the dynamic floor.
    pub accept_below_floor_for_local: bool,
    /// Fixed floor override; bypasses the watermark entirely when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_effective_fee_override_wei: Option<u128>,
    pub max_pending_per_sender: usize,
    pub max_pending_bytes_per_sender: u64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_tx_size_bytes: 128_000,
            allow_chain_id: None,
            accept_below_floor_for_local: true,
            min_effective_fee_override_wei: None,
            max_pending_per_sender: 64,
            max_pending_bytes_per_sender: 1 << 20,
        }
    }
}

/// Out-of-band facts about a submission, computed by the ingress path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TxMeta {
    pub size_bytes: u64,
    /// Preferred fee source; falls back to the tx's own gas pricing.
    pub effective_fee_wei: Option<u128>,
}

/// Current pending footprint of the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SenderUsage {
    pub pending: usize,
    pub pending_bytes: u64,
}

pub struct AdmissionPolicy {
    pub cfg: AdmissionConfig,
}

impl AdmissionPolicy {
    pub fn new(cfg: AdmissionConfig) -> Self {
        Self { cfg }
    }

    fn effective_fee(tx: &Transaction, meta: &TxMeta) -> u128 {
        meta.effective_fee_wei.unwrap_or_else(|| tx.effective_fee())
    }

    /// Run every gate in order. `watermark` is consulted only when the fee
    /// gate needs a dynamic floor; `banlist` only for non-local senders.
    #[allow(clippy::too_many_arguments)]
    pub fn check_admit(
        &self,
        tx: &Transaction,
        meta: &TxMeta,
        watermark: Option<&mut FeeWatermark>,
        banlist: Option<&BanList>,
        usage: &SenderUsage,
        pool_size: usize,
        capacity: usize,
        is_local: bool,
    ) -> Result<(), AdmissionError> {
        // 1. Size.
        if meta.size_bytes > self.cfg.max_tx_size_bytes {
            return Err(AdmissionError::Oversize {
                size_bytes: meta.size_bytes,
                max_bytes: self.cfg.max_tx_size_bytes,
            });
        }

        // 2. Chain id.
        if let (Some(expected), Some(got)) = (self.cfg.allow_chain_id, tx.chain_id) {
            if got != expected {
                return Err(AdmissionError::WrongChainId { got, expected });
            }
        }

        // 3. Ban. Local submissions bypass the ban list.
        if !is_local {
            if let Some(banlist) = banlist {
                if let Some(until_s) = banlist.banned_until(&tx.from) {
                    return Err(AdmissionError::Banned { sender: tx.from, until_s });
                }
            }
        }

        // 4. Fee vs the dynamic floor.
        let fee = Self::effective_fee(tx, meta);
        let floor = match self.cfg.min_effective_fee_override_wei {
            Some(fixed) => fixed,
            None => watermark.map(|wm| wm.thresholds(pool_size, capacity).admit_floor_wei).unwrap_or(0),
        };
        let bypass = is_local && self.cfg.accept_below_floor_for_local;
        if fee < floor && !bypass {
            debug!(fee, floor, "rejecting underpriced tx");
            return Err(AdmissionError::FeeTooLow { fee_wei: fee, floor_wei: floor });
        }

        // 5. Sender quota.
        if usage.pending >= self.cfg.max_pending_per_sender
            || usage.pending_bytes + meta.size_bytes > self.cfg.max_pending_bytes_per_sender
        {
            return Err(AdmissionError::QuotaExceeded {
                pending: usage.pending,
                pending_bytes: usage.pending_bytes,
            });
        }

        Ok(())
    }
}
