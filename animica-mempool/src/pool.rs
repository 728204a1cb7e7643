//! Pending transaction pool. One writer lock serializes submissions,
//! watermark updates, and drains; readers outside the lock see published
//! snapshots only.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use animica_core::{canonical, Address, StateDb, Transaction, TxHash};

use crate::banlist::{BanList, BanPolicy, Clock};
use crate::errors::AdmissionError;
use crate::policy::{AdmissionConfig, AdmissionPolicy, SenderUsage, TxMeta};
use crate::watermark::{FeeWatermark, Thresholds, WatermarkConfig};

/// Read-only account facts the pool needs for nonce-ordered drains.
pub trait StateView {
    fn balance(&self, addr: &Address) -> u128;
    fn nonce(&self, addr: &Address) -> u64;
}

impl StateView for StateDb {
    fn balance(&self, addr: &Address) -> u128 {
        self.get(addr).balance
    }

    fn nonce(&self, addr: &Address) -> u64 {
        self.get(addr).nonce
    }
}

struct PendingTx {
    tx: Transaction,
    hash: TxHash,
    size_bytes: u64,
    fee_wei: u128,
    local: bool,
}

#[derive(Default)]
struct PoolInner {
    by_sender: HashMap<Address, BTreeMap<u64, PendingTx>>,
    by_hash: HashMap<TxHash, (Address, u64)>,
}

impl PoolInner {
    fn len(&self) -> usize {
        self.by_hash.len()
    }

    fn usage(&self, sender: &Address) -> SenderUsage {
        match self.by_sender.get(sender) {
            Some(queue) => SenderUsage {
                pending: queue.len(),
                pending_bytes: queue.values().map(|p| p.size_bytes).sum(),
            },
            None => SenderUsage::default(),
        }
    }

    fn insert(&mut self, pending: PendingTx) {
        let sender = pending.tx.from;
        let nonce = pending.tx.nonce;
        if let Some(old) = self.by_sender.entry(sender).or_default().insert(nonce, pending) {
            self.by_hash.remove(&old.hash);
        }
        let hash = self.by_sender[&sender][&nonce].hash;
        self.by_hash.insert(hash, (sender, nonce));
    }

    fn remove(&mut self, sender: &Address, nonce: u64) -> Option<PendingTx> {
        let queue = self.by_sender.get_mut(sender)?;
        let pending = queue.remove(&nonce)?;
        if queue.is_empty() {
            self.by_sender.remove(sender);
        }
        self.by_hash.remove(&pending.hash);
        Some(pending)
    }
}

pub struct Mempool {
    policy: AdmissionPolicy,
    banlist: BanList,
    capacity: usize,
    watermark: Mutex<FeeWatermark>,
    inner: Mutex<PoolInner>,
}

impl Mempool {
    pub fn new(
        admission: AdmissionConfig,
        watermark: WatermarkConfig,
        ban_policy: BanPolicy,
        clock: Arc<dyn Clock>,
        capacity: usize,
    ) -> Self {
        Self {
            policy: AdmissionPolicy::new(admission),
            banlist: BanList::new(ban_policy, clock),
            capacity,
            watermark: Mutex::new(FeeWatermark::new(watermark)),
            inner: Mutex::new(PoolInner::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn contains(&self, hash: &TxHash) -> bool {
        self.inner.lock().by_hash.contains_key(hash)
    }

    pub fn banlist(&self) -> &BanList {
        &self.banlist
    }

    /// Validate and store one transaction. A low-fee rejection bans the
    /// sender; replacing a pending (sender, nonce) slot requires a strictly
    /// higher fee.
    pub fn submit(&self, tx: Transaction, is_local: bool) -> Result<TxHash, AdmissionError> {
        let encoded = canonical::encode_tx(&tx).map_err(|_| AdmissionError::Oversize {
            size_bytes: u64::MAX,
            max_bytes: self.policy.cfg.max_tx_size_bytes,
        })?;
        let meta =
            TxMeta { size_bytes: encoded.len() as u64, effective_fee_wei: Some(tx.effective_fee()) };

        let mut inner = self.inner.lock();
        let usage = inner.usage(&tx.from);
        let pool_size = inner.len();
        let mut watermark = self.watermark.lock();
        let outcome = self.policy.check_admit(
            &tx,
            &meta,
            Some(&mut *watermark),
            Some(&self.banlist),
            &usage,
            pool_size,
            self.capacity,
            is_local,
        );
        drop(watermark);
        if let Err(err) = outcome {
            if matches!(err, AdmissionError::FeeTooLow { .. }) && !is_local {
                self.banlist.ban_for_low_fee(&tx.from);
            }
            return Err(err);
        }

        let fee_wei = tx.effective_fee();
        if let Some(existing) = inner.by_sender.get(&tx.from).and_then(|q| q.get(&tx.nonce)) {
            if fee_wei <= existing.fee_wei {
                return Err(AdmissionError::FeeTooLow {
                    fee_wei,
                    floor_wei: existing.fee_wei + 1,
                });
            }
        }

        let hash = tx.hash().map_err(|_| AdmissionError::Oversize {
            size_bytes: meta.size_bytes,
            max_bytes: self.policy.cfg.max_tx_size_bytes,
        })?;
        debug!(hash = %animica_core::to_hex(&hash), local = is_local, "admitted tx");
        inner.insert(PendingTx { tx, hash, size_bytes: meta.size_bytes, fee_wei, local: is_local });
        Ok(hash)
    }

    /// Remove and return up to `max` ready transactions. Per sender, txs
    /// leave in strict ascending nonce order starting at the on-chain nonce;
    /// across senders the highest-fee ready head goes first, ties broken by
    /// sender address for determinism.
    pub fn drain_ready(&self, state: &dyn StateView, max: usize) -> Vec<Transaction> {
        let mut inner = self.inner.lock();
        let mut next_nonce: HashMap<Address, u64> =
            inner.by_sender.keys().map(|a| (*a, state.nonce(a))).collect();
        let mut out = Vec::new();

        while out.len() < max {
            let mut best: Option<(u128, Address, u64)> = None;
            for (sender, queue) in &inner.by_sender {
                let wanted = next_nonce[sender];
                if let Some(pending) = queue.get(&wanted) {
                    let key = (pending.fee_wei, *sender, wanted);
                    let better = match best {
                        None => true,
                        // Highest fee first; smaller address on ties.
                        Some((fee, addr, _)) => key.0 > fee || (key.0 == fee && *sender < addr),
                    };
                    if better {
                        best = Some(key);
                    }
                }
            }
            let Some((_, sender, nonce)) = best else { break };
            let pending = inner.remove(&sender, nonce).expect("selected entry exists");
            *next_nonce.get_mut(&sender).expect("tracked sender") += 1;
            out.push(pending.tx);
        }
        if !out.is_empty() {
            debug!(count = out.len(), "drained ready txs");
        }
        out
    }

    /// Fold a sealed block's fees into the watermark.
    pub fn observe_block_inclusions(&self, fees: &[u128]) {
        self.watermark.lock().observe_block_inclusions(fees);
    }

    /// Current thresholds snapshot (publishes a new floor).
    pub fn thresholds(&self) -> Thresholds {
        let pool_size = self.len();
        self.watermark.lock().thresholds(pool_size, self.capacity)
    }

    /// Housekeeping: lift expired bans and evict underpriced non-local txs,
    /// highest nonce first per sender so no nonce gaps are created.
    pub fn maintain(&self) -> usize {
        self.banlist.prune();
        let thresholds = self.thresholds();
        let mut inner = self.inner.lock();

        let mut victims: Vec<(Address, u64)> = Vec::new();
        for (sender, queue) in &inner.by_sender {
            for (nonce, pending) in queue.iter().rev() {
                if !pending.local && pending.fee_wei < thresholds.evict_below_wei {
                    victims.push((*sender, *nonce));
                } else {
                    break;
                }
            }
        }
        for (sender, nonce) in &victims {
            inner.remove(sender, *nonce);
        }
        if !victims.is_empty() {
            info!(evicted = victims.len(), below = thresholds.evict_below_wei, "evicted underpriced txs");
        }
        victims.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::banlist::ManualClock;

    const ALICE: Address = [0xaa; 20];
    const BOB: Address = [0xbb; 20];

    struct FakeState(HashMap<Address, u64>);

    impl StateView for FakeState {
        fn balance(&self, _addr: &Address) -> u128 {
            u128::MAX
        }
        fn nonce(&self, addr: &Address) -> u64 {
            self.0.get(addr).copied().unwrap_or(0)
        }
    }

    fn tx(sender: Address, nonce: u64, gas_price: u64) -> Transaction {
        Transaction {
            from: sender,
            to: Some([0xcc; 20]),
            value: 1,
            gas_limit: 21_000,
            gas_price,
            nonce,
            chain_id: Some(1337),
            data: vec![],
            access_list: vec![],
            sig: None,
        }
    }

    fn pool(min_floor: u128) -> (Mempool, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        let wm = WatermarkConfig {
            min_floor_wei: min_floor,
            hist_min_wei: min_floor,
            hist_max_wei: min_floor.max(1) * 10_000_000,
            ..Default::default()
        };
        let mp = Mempool::new(
            AdmissionConfig::default(),
            wm,
            BanPolicy { low_fee_ban_s: 10 },
            clock.clone(),
            1_000,
        );
        (mp, clock)
    }

    #[test]
    fn submit_then_drain_in_nonce_order() {
        let (mp, _) = pool(1);
        // Insert out of order; drain must come back 0, 1, 2.
        mp.submit(tx(ALICE, 2, 5), false).unwrap();
        mp.submit(tx(ALICE, 0, 5), false).unwrap();
        mp.submit(tx(ALICE, 1, 5), false).unwrap();
        assert_eq!(mp.len(), 3);

        let state = FakeState(HashMap::from([(ALICE, 0)]));
        let drained = mp.drain_ready(&state, 10);
        let nonces: Vec<u64> = drained.iter().map(|t| t.nonce).collect();
        assert_eq!(nonces, vec![0, 1, 2]);
        assert!(mp.is_empty());
    }

    #[test]
    fn drain_starts_at_the_on_chain_nonce() {
        let (mp, _) = pool(1);
        mp.submit(tx(ALICE, 0, 5), false).unwrap();
        mp.submit(tx(ALICE, 5, 5), false).unwrap();
        // On-chain nonce is 5, so the stale nonce-0 tx is not ready.
        let state = FakeState(HashMap::from([(ALICE, 5)]));
        let drained = mp.drain_ready(&state, 10);
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].nonce, 5);
        assert_eq!(mp.len(), 1, "the stale tx stays behind");
    }

    #[test]
    fn higher_paying_sender_drains_first() {
        let (mp, _) = pool(1);
        mp.submit(tx(ALICE, 0, 2), false).unwrap();
        mp.submit(tx(BOB, 0, 9), false).unwrap();
        let state = FakeState(HashMap::new());
        let drained = mp.drain_ready(&state, 10);
        assert_eq!(drained[0].from, BOB);
        assert_eq!(drained[1].from, ALICE);
    }

    #[test]
    fn low_fee_submission_bans_the_sender() {
        let (mp, clock) = pool(1_000_000_000);
        let err = mp.submit(tx(ALICE, 0, 1), false).unwrap_err();
        assert!(matches!(err, AdmissionError::FeeTooLow { .. }));
        assert!(mp.banlist().is_banned(&ALICE));

        // Now even a well-priced tx bounces until the ban lifts.
        let err = mp.submit(tx(ALICE, 0, 1_000_000), false).unwrap_err();
        assert!(matches!(err, AdmissionError::Banned { .. }));

        clock.advance(11);
        mp.submit(tx(ALICE, 0, 1_000_000), false).unwrap();
    }

    #[test]
    fn local_low_fee_submission_is_not_banned() {
        let (mp, _) = pool(1_000_000_000);
        mp.submit(tx(ALICE, 0, 1), true).unwrap();
        assert!(!mp.banlist().is_banned(&ALICE));
    }

    #[test]
    fn replacement_requires_a_strictly_higher_fee() {
        let (mp, _) = pool(1);
        mp.submit(tx(ALICE, 0, 5), false).unwrap();
        let err = mp.submit(tx(ALICE, 0, 5), false).unwrap_err();
        assert!(matches!(err, AdmissionError::FeeTooLow { .. }));

        mp.submit(tx(ALICE, 0, 6), false).unwrap();
        assert_eq!(mp.len(), 1);
        let state = FakeState(HashMap::new());
        let drained = mp.drain_ready(&state, 1);
        assert_eq!(drained[0].gas_price, 6);
    }

    #[test]
    fn maintain_evicts_underpriced_tails_without_nonce_gaps() {
        let (mp, _) = pool(1);
        // Alice queues 0..3 with a cheap tail.
        mp.submit(tx(ALICE, 0, 1_000), false).unwrap();
        mp.submit(tx(ALICE, 1, 1_000), false).unwrap();
        mp.submit(tx(ALICE, 2, 1), false).unwrap();
        // Push the floor up so the evict threshold clears gas_price 1 fees.
        for _ in 0..20 {
            mp.observe_block_inclusions(&vec![100_000_000u128; 10]);
            mp.thresholds();
        }
        let evicted = mp.maintain();
        assert_eq!(evicted, 1, "only the cheap tail goes");
        let state = FakeState(HashMap::new());
        let nonces: Vec<u64> = mp.drain_ready(&state, 10).iter().map(|t| t.nonce).collect();
        assert_eq!(nonces, vec![0, 1]);
    }
}
