//! The node context: one owner for state, mempool, consensus parameters,
//! and storage. Block building, the devnet miner, and block import all run
//! on the single execution thread; nothing here keeps process-wide state.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use animica_aicf::{InMemoryQueue, JobQueue, JobSpec};
use animica_config::AnimicaConfig;
use animica_consensus::{
    acceptance_micro, fork_choice, h_from_u, math, meets_target, proof_set_digest,
    retarget_theta, select_proofs, sigma_psi, uniform_from_digest, ProofCandidate,
    ProviderState, SlashEvent, SlashingEngine, TipWeight, WindowStats,
};
use animica_core::execution::deploy_address;
use animica_core::{
    canonical, to_hex, Account, Address, Block, BlockError, BlockHash, BlockHeader, Executor,
    Receipt, StateDb, Transaction, TxHash,
};
use animica_crypto::DomainHasher;
use animica_mempool::{AdmissionError, Clock, Mempool, SystemClock};
use animica_randomness::{Beacon, DevBeacon};
use animica_storage::{open_rocks, ChainStore, HeadInfo, StoreError};

const POW_DOMAIN: &[u8] = b"animica/pow/v1";
const ZERO_HASH: BlockHash = [0u8; 32];
/// How many canonical blocks keep an undo record; forks below this horizon
/// cannot be switched to.
const MAX_REORG_DEPTH: usize = 64;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("unknown parent {parent}", parent = to_hex(.0))]
    UnknownParent(BlockHash),
    #[error("bad height: expected {expected}, got {got}")]
    BadHeight { expected: u64, got: u64 },
    #[error("acceptance scalar {s_micro} below target {theta_micro}")]
    BelowTarget { s_micro: u64, theta_micro: u64 },
    #[error("header acceptance scalar is inconsistent with its pow draw")]
    BadScalar,
    #[error(transparent)]
    Block(#[from] BlockError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    pub height: u64,
    pub head_hash: String,
    pub chain_id: u64,
    pub syncing: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSummary {
    pub end_height: u64,
    pub head_hash: String,
}

/// Cumulative weight of a block this session has seen, canonical or not.
#[derive(Debug, Clone, Copy)]
struct KnownBlock {
    total_s_micro: u128,
    height: u64,
}

/// Per-block undo record: the block itself plus the prior values of every
/// account it touched, so a reorg can rewind exactly.
struct BlockUndo {
    hash: BlockHash,
    block: Block,
    touched: Vec<(Address, Option<Account>)>,
}

pub struct Node {
    cfg: AnimicaConfig,
    store: Box<dyn ChainStore>,
    state: StateDb,
    mempool: Mempool,
    executor: Executor,
    beacon: Box<dyn Beacon>,
    jobs: InMemoryQueue,
    slashing: SlashingEngine,
    providers: HashMap<String, ProviderState>,
    /// Leaves of every branch this session knows, fed to fork choice.
    tips: HashMap<BlockHash, TipWeight>,
    /// Weights of all session-known blocks, canonical and side.
    known: HashMap<BlockHash, KnownBlock>,
    /// Blocks off the canonical chain, kept in memory for reorgs.
    side_blocks: HashMap<BlockHash, Block>,
    /// Undo records for the most recent canonical blocks, oldest first.
    undo_stack: Vec<BlockUndo>,
    /// The head persisted before this session; blocks at or below it have no
    /// undo records and can never be rewound.
    session_base: Option<HeadInfo>,
    head: Option<HeadInfo>,
    theta_micro: u64,
    coinbase: Address,
    clock: Arc<dyn Clock>,
    auto: bool,
}

impl Node {
    /// Open the node over the configured data directory.
    pub fn open(cfg: AnimicaConfig) -> Result<Self> {
        let dir = cfg.resolved_data_dir();
        std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
        let store = open_rocks(&dir)?;
        Self::with_store(cfg, store, Arc::new(SystemClock))
    }

    /// Wire the node over an explicit store and clock; tests inject an
    /// in-memory store and a manual clock here.
    pub fn with_store(
        cfg: AnimicaConfig,
        store: Box<dyn ChainStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let coinbase = cfg.coinbase_address()?;
        let mempool = Mempool::new(
            cfg.mempool.admission.clone(),
            cfg.mempool.watermark.clone(),
            cfg.mempool.ban.clone(),
            clock.clone(),
            cfg.mempool.capacity,
        );
        mempool.banlist().restore(store.bans()?);

        let mut state = StateDb::from_accounts(store.accounts()?);
        let head = store.head()?;
        if head.is_none() && state.accounts().next().is_none() {
            for (addr, balance) in cfg.genesis_accounts()? {
                state.credit(addr, balance).map_err(|e| anyhow::anyhow!("genesis: {e}"))?;
                store.put_account(&addr, &state.get(&addr))?;
            }
        }

        let mut tips = HashMap::new();
        let mut known = HashMap::new();
        if let Some(h) = &head {
            tips.insert(h.hash, TipWeight { total_s_micro: h.total_s_micro, height: h.height, hash: h.hash });
            known.insert(h.hash, KnownBlock { total_s_micro: h.total_s_micro, height: h.height });
        }

        let auto = store.auto_mine()?;
        let executor = Executor::new(cfg.issuance.clone());
        let theta_micro = cfg.mining.theta_micro;
        Ok(Self {
            slashing: SlashingEngine::new(cfg.slashing.thresholds.clone(), cfg.slashing.penalties.clone()),
            cfg,
            store,
            state,
            mempool,
            executor,
            beacon: Box::new(DevBeacon),
            jobs: InMemoryQueue::new(),
            providers: HashMap::new(),
            tips,
            known,
            side_blocks: HashMap::new(),
            undo_stack: Vec::new(),
            session_base: head.clone(),
            head,
            theta_micro,
            coinbase,
            clock,
            auto,
        })
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            height: self.head.as_ref().map_or(0, |h| h.height),
            head_hash: to_hex(&self.head.as_ref().map_or(ZERO_HASH, |h| h.hash)),
            chain_id: self.cfg.chain.chain_id,
            syncing: false,
        }
    }

    pub fn theta_micro(&self) -> u64 {
        self.theta_micro
    }

    pub fn mempool(&self) -> &Mempool {
        &self.mempool
    }

    pub fn jobs(&self) -> &InMemoryQueue {
        &self.jobs
    }

    pub fn balance(&self, addr: &Address) -> u128 {
        self.state.get(addr).balance
    }

    pub fn block_by_height(&self, height: u64) -> Result<Option<Block>, StoreError> {
        self.store.block_by_height(height)
    }

    pub fn receipts_by_height(&self, height: u64) -> Result<Option<Vec<Receipt>>, StoreError> {
        self.store.receipts_by_height(height)
    }

    /// Submit a transaction into the pool.
    pub fn submit_tx(&self, tx: Transaction, is_local: bool) -> Result<TxHash, AdmissionError> {
        self.mempool.submit(tx, is_local)
    }

    /// Enqueue an off-chain compute job keyed by the current head height.
    pub fn enqueue_job(&self, tx_hash: TxHash, caller: Address, payload: Vec<u8>) -> animica_aicf::JobId {
        let spec = JobSpec {
            chain_id: self.cfg.chain.chain_id,
            height: self.head.as_ref().map_or(0, |h| h.height),
            tx_hash,
            caller,
            payload,
        };
        let id = spec.id();
        let _ = self.jobs.enqueue(spec);
        id
    }

    pub fn register_provider(&mut self, id: &str, stake: u128) {
        self.providers.entry(id.to_string()).or_insert_with(|| ProviderState::new(id, stake));
    }

    pub fn provider(&self, id: &str) -> Option<&ProviderState> {
        self.providers.get(id)
    }

    /// Feed one observation window for a provider at the current height.
    pub fn process_provider_window(&mut self, id: &str, stats: &WindowStats) -> Option<SlashEvent> {
        let height = self.head.as_ref().map_or(0, |h| h.height);
        let provider = self.providers.get_mut(id)?;
        self.slashing.process_window(provider, height, stats)
    }

    fn unjailed_candidates(&self, candidates: &[ProofCandidate]) -> Vec<ProofCandidate> {
        candidates
            .iter()
            .filter(|c| match c.provider() {
                Some(id) => self.providers.get(id).map_or(true, |p| !p.jailed),
                None => true,
            })
            .cloned()
            .collect()
    }

    fn pow_digest(&self, parent: &BlockHash, height: u64, nonce: u64) -> [u8; 32] {
        DomainHasher::new(POW_DOMAIN)
            .raw(parent)
            .u64(height)
            .u64(nonce)
            .raw(&self.beacon.beacon(height))
            .finalize()
    }

    /// Build and import one block from the current mempool, grinding nonces
    /// until the acceptance scalar meets Θ.
    pub fn mine_block(&mut self, candidates: &[ProofCandidate]) -> Result<Block> {
        let eligible = self.unjailed_candidates(candidates);
        let selected = select_proofs(&eligible, &self.cfg.poies.selector);
        let sigma = sigma_psi(&selected);
        let proof_digest = proof_set_digest(&selected);

        let parent = self.head.as_ref().map_or(ZERO_HASH, |h| h.hash);
        let height = self.head.as_ref().map_or(0, |h| h.height) + 1;

        let drained = self.mempool.drain_ready(&self.state, self.cfg.mining.max_block_txs);

        // Dry-run the block to learn the roots, then revert; the real state
        // transition happens in import so both paths share one code path.
        let cp = self.state.checkpoint();
        let mut txs = Vec::with_capacity(drained.len());
        let mut receipts = Vec::with_capacity(drained.len());
        for tx in drained {
            match self.executor.execute_tx(&mut self.state, &tx, self.coinbase) {
                Ok(receipt) => {
                    receipts.push(receipt);
                    txs.push(tx);
                }
                Err(e) => warn!(error = %e, "dropping tx at build time"),
            }
        }
        self.executor
            .mint_block_reward(&mut self.state, self.coinbase, height)
            .map_err(|e| anyhow::anyhow!("minting reward: {e}"))?;
        let state_root = self.state.root();
        let receipts_root = canonical::receipts_root(&receipts);
        self.state.revert_to(cp);

        let mut sealed = None;
        for nonce in 0..self.cfg.mining.max_nonce_window {
            let digest = self.pow_digest(&parent, height, nonce);
            let u = uniform_from_digest(&digest);
            let s_micro = acceptance_micro(u, sigma);
            if meets_target(s_micro, self.theta_micro) {
                sealed = Some((nonce, math::to_micro(u), s_micro));
                break;
            }
        }
        let Some((nonce, pow_draw_micro, s_micro)) = sealed else {
            bail!("no acceptable draw within the nonce window");
        };

        let block = Block {
            header: BlockHeader {
                height,
                parent_hash: parent,
                coinbase: self.coinbase,
                timestamp: self.clock.now_s(),
                state_root,
                receipts_root,
                acceptance_scalar_micro: s_micro,
                proof_set_digest: proof_digest,
                pow_draw_micro,
                nonce,
            },
            txs,
        };
        self.import_block(block.clone())?;
        Ok(block)
    }

    /// Validate a block, register it as a branch tip, and re-run fork choice
    /// across every known tip. A block extending the canonical head applies
    /// immediately; a side block applies only if its branch wins, via a
    /// rewind of the canonical chain to the fork point.
    pub fn import_block(&mut self, block: Block) -> Result<(), ImportError> {
        let header = &block.header;
        let hash = block.hash();
        if self.known.contains_key(&hash) {
            return Ok(());
        }

        let (parent_total, parent_height) = if header.parent_hash == ZERO_HASH {
            (0u128, 0u64)
        } else {
            let parent = self
                .known
                .get(&header.parent_hash)
                .ok_or(ImportError::UnknownParent(header.parent_hash))?;
            (parent.total_s_micro, parent.height)
        };
        if header.height != parent_height + 1 {
            return Err(ImportError::BadHeight { expected: parent_height + 1, got: header.height });
        }

        // The draw must be reproducible from the header and the scalar must
        // contain at least the PoW contribution.
        let digest = self.pow_digest(&header.parent_hash, header.height, header.nonce);
        let u = uniform_from_digest(&digest);
        if math::to_micro(u) != header.pow_draw_micro {
            return Err(ImportError::BadScalar);
        }
        let h_micro = math::to_micro(h_from_u(u));
        if header.acceptance_scalar_micro < h_micro {
            return Err(ImportError::BadScalar);
        }
        if !meets_target(header.acceptance_scalar_micro, self.theta_micro) {
            return Err(ImportError::BelowTarget {
                s_micro: header.acceptance_scalar_micro,
                theta_micro: self.theta_micro,
            });
        }

        let extends_head = match &self.head {
            None => header.parent_hash == ZERO_HASH,
            Some(h) => h.hash == header.parent_hash,
        };
        if extends_head {
            return self.apply_canonical(&block);
        }

        // Competing branch: record its weight and leaf, then let fork choice
        // decide whether the canonical chain switches.
        let height = header.height;
        let parent_hash = header.parent_hash;
        let total = parent_total + header.acceptance_scalar_micro as u128;
        self.known.insert(hash, KnownBlock { total_s_micro: total, height });
        self.side_blocks.insert(hash, block);
        self.tips.remove(&parent_hash);
        self.tips.insert(hash, TipWeight { total_s_micro: total, height, hash });

        let best = fork_choice(self.tips.values()).cloned().expect("tips non-empty after insert");
        if self.head.as_ref().map(|h| h.hash) == Some(best.hash) {
            debug!(hash = %to_hex(&hash), "stored side block; canonical head retained");
            return Ok(());
        }

        let (fork_height, branch) = self.collect_branch(best.hash)?;
        if !self.reorg_feasible(fork_height) {
            warn!(hash = %to_hex(&best.hash), fork_height, "winning branch is beyond the reorg horizon; keeping canonical head");
            return Ok(());
        }
        self.reorg_to(fork_height, branch)
    }

    /// Execute `block` on top of the canonical head, record its undo log,
    /// persist it, and advance the head. On failure the state is untouched.
    fn apply_canonical(&mut self, block: &Block) -> Result<(), ImportError> {
        let header = &block.header;
        let hash = block.hash();
        let parent_total = if header.parent_hash == ZERO_HASH {
            0u128
        } else {
            self.known
                .get(&header.parent_hash)
                .ok_or(ImportError::UnknownParent(header.parent_hash))?
                .total_s_micro
        };
        let total = parent_total + header.acceptance_scalar_micro as u128;

        // Snapshot every account this block can touch, before execution.
        let mut addrs: Vec<Address> = Vec::with_capacity(block.txs.len() * 2 + 1);
        for tx in &block.txs {
            addrs.push(tx.from);
            addrs.push(match tx.to {
                Some(to) => to,
                None => deploy_address(&tx.from, tx.nonce),
            });
        }
        addrs.push(header.coinbase);
        let mut seen: HashSet<Address> = HashSet::new();
        let mut touched: Vec<(Address, Option<Account>)> = Vec::new();
        for addr in addrs {
            if seen.insert(addr) {
                touched.push((addr, self.state.try_get(&addr)));
            }
        }

        let receipts = self.executor.apply_block(&mut self.state, block)?;

        self.undo_stack.push(BlockUndo { hash, block: block.clone(), touched });
        if self.undo_stack.len() > MAX_REORG_DEPTH {
            self.undo_stack.remove(0);
        }

        self.store.put_block(block)?;
        self.store.put_receipts(header.height, &receipts)?;
        for (addr, _) in &self.undo_stack.last().expect("just pushed").touched {
            self.store.put_account(addr, &self.state.get(addr))?;
        }

        self.known.insert(hash, KnownBlock { total_s_micro: total, height: header.height });
        self.tips.remove(&header.parent_hash);
        self.tips.insert(hash, TipWeight { total_s_micro: total, height: header.height, hash });
        let head = HeadInfo { height: header.height, hash, total_s_micro: total };
        self.store.set_head(&head)?;
        self.head = Some(head);

        let fees: Vec<u128> = block.txs.iter().map(Transaction::effective_fee).collect();
        if !fees.is_empty() {
            self.mempool.observe_block_inclusions(&fees);
        }
        self.maybe_retarget()?;
        self.persist_bans()?;

        info!(height = header.height, hash = %to_hex(&hash), txs = block.txs.len(), s_micro = header.acceptance_scalar_micro, "imported block");
        Ok(())
    }

    fn is_canonical(&self, hash: &BlockHash) -> bool {
        self.undo_stack.iter().any(|e| &e.hash == hash)
            || self.session_base.as_ref().map_or(false, |b| &b.hash == hash)
    }

    /// Walk a side tip back to the canonical chain (or genesis); returns the
    /// fork-point height and the branch blocks oldest-first.
    fn collect_branch(&self, tip_hash: BlockHash) -> Result<(u64, Vec<Block>), ImportError> {
        let mut branch = Vec::new();
        let mut cursor = tip_hash;
        loop {
            if cursor == ZERO_HASH {
                branch.reverse();
                return Ok((0, branch));
            }
            if self.is_canonical(&cursor) {
                let height = self
                    .known
                    .get(&cursor)
                    .map(|k| k.height)
                    .ok_or(ImportError::UnknownParent(cursor))?;
                branch.reverse();
                return Ok((height, branch));
            }
            let block = self
                .side_blocks
                .get(&cursor)
                .ok_or(ImportError::UnknownParent(cursor))?;
            cursor = block.header.parent_hash;
            branch.push(block.clone());
        }
    }

    /// A reorg is possible only when every canonical block above the fork
    /// point still has an undo record this session.
    fn reorg_feasible(&self, fork_height: u64) -> bool {
        let head_height = self.head.as_ref().map_or(0, |h| h.height);
        if fork_height >= head_height {
            return true;
        }
        if let Some(base) = &self.session_base {
            if fork_height < base.height {
                return false;
            }
        }
        match self.undo_stack.first() {
            Some(first) => first.block.header.height <= fork_height + 1,
            None => false,
        }
    }

    /// Rewind the canonical chain to `fork_height` and apply `branch` in its
    /// place. If a branch block fails to execute, the previous chain is
    /// replayed and the branch is discarded.
    fn reorg_to(&mut self, fork_height: u64, branch: Vec<Block>) -> Result<(), ImportError> {
        let mut retired = self.pop_to(fork_height)?;
        retired.reverse();

        for block in &branch {
            if let Err(err) = self.apply_canonical(block) {
                warn!(error = %err, "winning branch failed to apply; replaying the previous chain");
                self.pop_to(fork_height)?;
                for old in &retired {
                    if let Err(replay) = self.apply_canonical(old) {
                        warn!(error = %replay, "replay of the previous chain failed");
                        break;
                    }
                }
                if let Some(tip) = branch.last() {
                    self.tips.remove(&tip.hash());
                }
                return Err(err);
            }
        }
        info!(fork_height, blocks = branch.len(), "reorged onto heavier branch");
        Ok(())
    }

    /// Pop canonical blocks above `fork_height`, restoring account records
    /// and retiring the blocks to the side set; returns them newest-first.
    fn pop_to(&mut self, fork_height: u64) -> Result<Vec<Block>, ImportError> {
        let mut popped = Vec::new();
        while self.undo_stack.last().map_or(false, |e| e.block.header.height > fork_height) {
            let entry = self.undo_stack.pop().expect("just checked");
            for (addr, prior) in entry.touched.iter().rev() {
                self.state.restore_account(*addr, prior.clone());
                match prior {
                    Some(acct) => self.store.put_account(addr, acct)?,
                    None => self.store.delete_account(addr)?,
                }
            }
            let height = entry.block.header.height;
            self.store.delete_block(height)?;
            self.store.delete_receipts(height)?;
            self.side_blocks.insert(entry.hash, entry.block.clone());
            popped.push(entry.block);
        }

        if let Some(oldest) = popped.last() {
            let parent = oldest.header.parent_hash;
            if parent == ZERO_HASH {
                self.head = None;
            } else {
                let k = self.known.get(&parent).ok_or(ImportError::UnknownParent(parent))?;
                let head = HeadInfo { height: k.height, hash: parent, total_s_micro: k.total_s_micro };
                self.store.set_head(&head)?;
                self.head = Some(head);
            }
        }
        Ok(popped)
    }

    fn maybe_retarget(&mut self) -> Result<(), StoreError> {
        let params = &self.cfg.poies.retarget;
        let Some(head) = &self.head else { return Ok(()) };
        if params.window_blocks == 0 || head.height % params.window_blocks != 0 {
            return Ok(());
        }
        let from = head.height.saturating_sub(params.window_blocks) + 1;
        let mut timestamps = Vec::new();
        for height in from..=head.height {
            if let Some(block) = self.store.block_by_height(height)? {
                timestamps.push(block.header.timestamp);
            }
        }
        self.theta_micro = retarget_theta(self.theta_micro, &timestamps, params);
        Ok(())
    }

    fn persist_bans(&self) -> Result<(), StoreError> {
        for (addr, until) in self.mempool.banlist().snapshot() {
            self.store.put_ban(&addr, until)?;
        }
        Ok(())
    }

    /// Advance the chain by `count` devnet blocks; returns the new height.
    pub fn mine(&mut self, count: u64) -> Result<u64> {
        for _ in 0..count {
            self.mine_block(&[])?;
        }
        Ok(self.status().height)
    }

    /// Drain the mempool and mine `mine_k` blocks.
    pub fn pipeline(&mut self, mine_k: u64) -> Result<PipelineSummary> {
        self.mine(mine_k.max(1))?;
        let status = self.status();
        Ok(PipelineSummary { end_height: status.height, head_hash: status.head_hash })
    }

    pub fn auto(&self) -> bool {
        self.auto
    }

    pub fn set_auto(&mut self, on: bool) -> Result<(), StoreError> {
        self.auto = on;
        self.store.set_auto_mine(on)
    }

    /// Devnet loop: mine on an interval while the persisted auto flag is on.
    /// Returns when ctrl-c arrives.
    pub async fn run(&mut self) -> Result<()> {
        let interval = std::time::Duration::from_secs(self.cfg.mining.auto_interval_s.max(1));
        info!(auto = self.auto, "devnet loop started");
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("shutting down");
                    return Ok(());
                }
                _ = tokio::time::sleep(interval) => {
                    if self.auto {
                        if let Err(e) = self.mine_block(&[]) {
                            warn!(error = %e, "auto-mine failed");
                        }
                        self.mempool.maintain();
                    }
                }
            }
        }
    }
}

/// Install the global tracing subscriber; safe to call more than once.
pub fn init_logging() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[cfg(test)]
mod tests {
    use super::*;
    use animica_consensus::ProofKind;
    use animica_mempool::ManualClock;
    use animica_storage::open_memory;

    const ALICE: Address = [0xaa; 20];
    const BOB: Address = [0xbb; 20];

    fn devnet_node() -> Node {
        let clock = Arc::new(ManualClock::new(1_700_000_000));
        Node::with_store(AnimicaConfig::default(), open_memory(), clock).unwrap()
    }

    fn transfer(nonce: u64, value: u128) -> Transaction {
        Transaction {
            from: ALICE,
            to: Some(BOB),
            value,
            gas_limit: 21_000,
            gas_price: 100_000,
            nonce,
            chain_id: Some(1337),
            data: vec![],
            access_list: vec![],
            sig: None,
        }
    }

    #[test]
    fn fresh_node_starts_empty_and_mines_devnet_blocks() {
        let mut node = devnet_node();
        let status = node.status();
        assert_eq!(status.height, 0);
        assert_eq!(status.chain_id, 1337);
        assert!(!status.syncing);

        let new_height = node.mine(2).unwrap();
        assert_eq!(new_height, 2);
        assert!(node.block_by_height(1).unwrap().is_some());
        assert!(node.block_by_height(3).unwrap().is_none());

        assert!(!node.auto());
        node.set_auto(true).unwrap();
        assert!(node.auto());
        node.set_auto(false).unwrap();
        assert!(!node.auto());
    }

    #[test]
    fn pipeline_drains_the_pool_and_reports_the_new_head() {
        let mut node = devnet_node();
        node.submit_tx(transfer(0, 1_000_000_000_000_000), false).unwrap();
        node.submit_tx(transfer(1, 2_000_000_000_000_000), false).unwrap();

        let summary = node.pipeline(1).unwrap();
        assert_eq!(summary.end_height, 1);
        assert!(summary.head_hash.starts_with("0x"));
        assert!(node.mempool().is_empty());

        let block = node.block_by_height(1).unwrap().unwrap();
        assert_eq!(block.txs.len(), 2);
        let receipts = node.receipts_by_height(1).unwrap().unwrap();
        assert_eq!(receipts.len(), 2);
        assert_eq!(node.balance(&BOB), 750_000_000_000_000_000 + 3_000_000_000_000_000);
    }

    #[test]
    fn two_independent_runs_agree_on_every_root() {
        let run = || {
            let mut node = devnet_node();
            node.submit_tx(transfer(0, 1_000_000_000_000_000), false).unwrap();
            node.mine(1).unwrap();
            node.submit_tx(transfer(1, 2_000_000_000_000_000), false).unwrap();
            node.mine(2).unwrap();
            let roots: Vec<_> = (1..=3)
                .map(|h| node.block_by_height(h).unwrap().unwrap().header.state_root)
                .collect();
            (roots, node.status().head_hash, node.balance(&ALICE), node.balance(&BOB))
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn blocks_meet_the_acceptance_target_and_grow_supply() {
        let mut node = devnet_node();
        node.mine(1).unwrap();
        let block = node.block_by_height(1).unwrap().unwrap();
        assert!(block.header.acceptance_scalar_micro >= node.theta_micro());

        let coinbase = AnimicaConfig::default().coinbase_address().unwrap();
        assert_eq!(
            node.balance(&coinbase),
            animica_core::issuance_for_block(&AnimicaConfig::default().issuance, 1)
        );
    }

    #[test]
    fn jailed_providers_are_excluded_from_proof_selection() {
        let mut node = devnet_node();
        node.register_provider("prov-1", 1_000);
        let bad = WindowStats { total: 100, traps_ok: 10, qos_ok: 10 };
        node.process_provider_window("prov-1", &bad);
        let event = node.process_provider_window("prov-1", &bad);
        assert!(matches!(event, Some(SlashEvent::Jail { .. })));

        let mut candidate = ProofCandidate::new(ProofKind::Ai, 3.0);
        candidate.meta = serde_json::json!({ "provider": "prov-1" });
        let block = node.mine_block(&[candidate]).unwrap();
        assert_eq!(
            block.header.proof_set_digest,
            proof_set_digest(&[]),
            "a jailed provider contributes nothing"
        );
    }

    #[test]
    fn proof_contributions_raise_the_acceptance_scalar() {
        let mut node = devnet_node();
        let candidate = ProofCandidate::new(ProofKind::Quantum, 2.0);
        let block = node.mine_block(&[candidate]).unwrap();
        assert!(block.header.acceptance_scalar_micro >= 2_000_000);
        assert_ne!(block.header.proof_set_digest, proof_set_digest(&[]));
    }

    #[test]
    fn import_rejects_unknown_parents_and_stale_heights() {
        let mut node = devnet_node();
        node.mine(1).unwrap();
        let mut forged = node.block_by_height(1).unwrap().unwrap();
        forged.header.parent_hash = [0x55; 32];
        assert!(matches!(node.import_block(forged), Err(ImportError::UnknownParent(_))));
    }

    #[test]
    fn importing_a_known_block_is_a_no_op() {
        let mut node = devnet_node();
        node.mine(1).unwrap();
        let block = node.block_by_height(1).unwrap().unwrap();
        node.import_block(block).unwrap();
        assert_eq!(node.status().height, 1);
    }

    #[test]
    fn fork_choice_switches_to_the_heavier_branch() {
        let clock = Arc::new(ManualClock::new(1_700_000_000));
        let mut node_a =
            Node::with_store(AnimicaConfig::default(), open_memory(), clock.clone()).unwrap();

        // A competitor mining the same genesis with a different coinbase.
        let mut cfg_b = AnimicaConfig::default();
        cfg_b.mining.coinbase = format!("0x{}", "77".repeat(20));
        let coinbase_b = cfg_b.coinbase_address().unwrap();
        let mut node_b = Node::with_store(cfg_b, open_memory(), clock.clone()).unwrap();

        let a1 = node_a.mine_block(&[]).unwrap();
        let b1 = node_b.mine_block(&[]).unwrap();
        let b2 = node_b.mine_block(&[]).unwrap();
        assert_ne!(a1.hash(), b1.hash());
        assert_eq!(
            a1.header.acceptance_scalar_micro, b1.header.acceptance_scalar_micro,
            "sibling blocks share the draw"
        );

        // Two blocks outweigh one: node A must switch onto B's branch.
        node_a.import_block(b1.clone()).unwrap();
        node_a.import_block(b2.clone()).unwrap();

        assert_eq!(node_a.status().height, 2);
        assert_eq!(node_a.status().head_hash, to_hex(&b2.hash()));
        assert_eq!(node_a.block_by_height(1).unwrap().unwrap().hash(), b1.hash());
        assert_eq!(node_a.block_by_height(2).unwrap().unwrap().hash(), b2.hash());

        let issuance = AnimicaConfig::default().issuance;
        assert_eq!(
            node_a.balance(&coinbase_b),
            animica_core::issuance_for_block(&issuance, 1)
                + animica_core::issuance_for_block(&issuance, 2)
        );
        let coinbase_a = AnimicaConfig::default().coinbase_address().unwrap();
        assert_eq!(node_a.balance(&coinbase_a), 0, "the abandoned branch reward is rewound");
    }

    #[test]
    fn low_fee_ban_survives_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(0));
        {
            let mut node = Node::with_store(
                AnimicaConfig::default(),
                open_rocks(dir.path()).unwrap(),
                clock.clone(),
            )
            .unwrap();
            let mut cheap = transfer(0, 1);
            cheap.gas_price = 1;
            assert!(matches!(
                node.submit_tx(cheap, false),
                Err(AdmissionError::FeeTooLow { .. })
            ));
            // A mined block persists the ban list.
            node.mine(1).unwrap();
        }

        let node = Node::with_store(
            AnimicaConfig::default(),
            open_rocks(dir.path()).unwrap(),
            clock,
        )
        .unwrap();
        assert!(matches!(
            node.submit_tx(transfer(1, 1_000), false),
            Err(AdmissionError::Banned { .. })
        ));
    }

    #[test]
    fn jobs_enqueue_on_the_deterministic_id() {
        let node = devnet_node();
        let a = node.enqueue_job([0x11; 32], ALICE, b"payload".to_vec());
        let b = node.enqueue_job([0x11; 32], ALICE, b"payload".to_vec());
        assert_eq!(a, b);
        assert_eq!(node.jobs().len(), 1);
        node.jobs().release(&a);
        assert!(node.jobs().is_empty());
    }
}
