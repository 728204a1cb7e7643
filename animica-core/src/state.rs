//! Journaled account state with nested checkpoints and a deterministic root.

use std::collections::HashMap;

use sha3::{Digest as _, Sha3_256};
use thiserror::Error;

use crate::{Account, Address, Digest32};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("insufficient balance for {addr}: have {have}, need {need}", addr = crate::to_hex(.address))]
    InsufficientBalance { address: Address, have: u128, need: u128 },
    #[error("balance overflow for {addr}", addr = crate::to_hex(.address))]
    BalanceOverflow { address: Address },
}

enum JournalEntry {
    Balance { addr: Address, prev: u128 },
    Nonce { addr: Address, prev: u64 },
    CodeHash { addr: Address, prev: Digest32 },
    Created { addr: Address },
}

/// Handle to a journal position. Revert restores exactly the state at the
/// time of the checkpoint; commit discards the ability to revert past it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint(usize);

#[derive(Default)]
pub struct StateDb {
    accounts: HashMap<Address, Account>,
    journal: Vec<JournalEntry>,
    depth: usize,
}

impl StateDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_accounts(accounts: impl IntoIterator<Item = (Address, Account)>) -> Self {
        Self { accounts: accounts.into_iter().collect(), journal: Vec::new(), depth: 0 }
    }

    /// Accounts are created implicitly on first credit and never destroyed.
    pub fn get(&self, addr: &Address) -> Account {
        self.accounts.get(addr).cloned().unwrap_or_default()
    }

    /// The stored record, or None for an account that was never created.
    pub fn try_get(&self, addr: &Address) -> Option<Account> {
        self.accounts.get(addr).cloned()
    }

    pub fn contains(&self, addr: &Address) -> bool {
        self.accounts.contains_key(addr)
    }

    pub fn accounts(&self) -> impl Iterator<Item = (&Address, &Account)> {
        self.accounts.iter()
    }

    fn entry(&mut self, addr: Address) -> &mut Account {
        if !self.accounts.contains_key(&addr) {
            self.journal.push(JournalEntry::Created { addr });
            self.accounts.insert(addr, Account::default());
        }
        self.accounts.get_mut(&addr).expect("just inserted")
    }

    pub fn credit(&mut self, addr: Address, amount: u128) -> Result<(), StateError> {
        let acct = self.entry(addr);
        let prev = acct.balance;
        acct.balance = prev
            .checked_add(amount)
            .ok_or(StateError::BalanceOverflow { address: addr })?;
        self.journal.push(JournalEntry::Balance { addr, prev });
        Ok(())
    }

    pub fn debit(&mut self, addr: Address, amount: u128) -> Result<(), StateError> {
        let have = self.get(&addr).balance;
        if have < amount {
            return Err(StateError::InsufficientBalance { address: addr, have, need: amount });
        }
        let acct = self.entry(addr);
        let prev = acct.balance;
        acct.balance = prev - amount;
        self.journal.push(JournalEntry::Balance { addr, prev });
        Ok(())
    }

    pub fn inc_nonce(&mut self, addr: Address) {
        let acct = self.entry(addr);
        let prev = acct.nonce;
        acct.nonce = prev + 1;
        self.journal.push(JournalEntry::Nonce { addr, prev });
    }

    pub fn set_code_hash(&mut self, addr: Address, code_hash: Digest32) {
        let acct = self.entry(addr);
        let prev = acct.code_hash;
        acct.code_hash = code_hash;
        self.journal.push(JournalEntry::CodeHash { addr, prev });
    }

    pub fn checkpoint(&mut self) -> Checkpoint {
        self.depth += 1;
        Checkpoint(self.journal.len())
    }

    /// Restores exactly the state as of `cp`. Checkpoints nest; reverting an
    /// outer checkpoint discards inner ones.
    pub fn revert_to(&mut self, cp: Checkpoint) {
        while self.journal.len() > cp.0 {
            match self.journal.pop().expect("len checked") {
                JournalEntry::Balance { addr, prev } => {
                    self.accounts.get_mut(&addr).expect("journaled account").balance = prev;
                }
                JournalEntry::Nonce { addr, prev } => {
                    self.accounts.get_mut(&addr).expect("journaled account").nonce = prev;
                }
                JournalEntry::CodeHash { addr, prev } => {
                    self.accounts.get_mut(&addr).expect("journaled account").code_hash = prev;
                }
                JournalEntry::Created { addr } => {
                    self.accounts.remove(&addr);
                }
            }
        }
        self.depth = self.depth.saturating_sub(1);
    }

    pub fn commit(&mut self, _cp: Checkpoint) {
        self.depth = self.depth.saturating_sub(1);
        if self.depth == 0 {
            self.journal.clear();
        }
    }

    /// Replace an account wholesale, or erase it when `account` is None.
    /// This bypasses the journal and is only valid between blocks, with no
    /// outstanding checkpoints; block-level undo logs use it to rewind.
    pub fn restore_account(&mut self, addr: Address, account: Option<Account>) {
        debug_assert!(self.journal.is_empty() && self.depth == 0);
        match account {
            Some(acct) => {
                self.accounts.insert(addr, acct);
            }
            None => {
                self.accounts.remove(&addr);
            }
        }
    }

    /// Deterministic state root: addresses ascending by raw bytes, each fed
    /// as addr || u64_be(nonce) || u256_be(balance) || code_hash. The root
    /// of the empty state is the hash of the empty input.
    pub fn root(&self) -> Digest32 {
        let mut addrs: Vec<&Address> = self.accounts.keys().collect();
        addrs.sort_unstable();
        let mut hasher = Sha3_256::new();
        for addr in addrs {
            let acct = &self.accounts[addr];
            hasher.update(addr);
            hasher.update(acct.nonce.to_be_bytes());
            let mut bal = [0u8; 32];
            bal[16..].copy_from_slice(&acct.balance.to_be_bytes());
            hasher.update(bal);
            hasher.update(acct.code_hash);
        }
        hasher.finalize().into()
    }

    pub fn total_supply(&self) -> u128 {
        self.accounts.values().map(|a| a.balance).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sha3_256;

    const A: Address = [0xaa; 20];
    const B: Address = [0xbb; 20];

    #[test]
    fn empty_root_is_hash_of_empty_input() {
        assert_eq!(StateDb::new().root(), sha3_256(&[]));
    }

    #[test]
    fn debit_refuses_to_go_negative() {
        let mut st = StateDb::new();
        st.credit(A, 10).unwrap();
        let err = st.debit(A, 11).unwrap_err();
        assert_eq!(err, StateError::InsufficientBalance { address: A, have: 10, need: 11 });
        assert_eq!(st.get(&A).balance, 10);
    }

    #[test]
    fn checkpoint_revert_restores_exact_state() {
        let mut st = StateDb::new();
        st.credit(A, 100).unwrap();
        let root_before = st.root();

        let cp = st.checkpoint();
        st.debit(A, 40).unwrap();
        st.credit(B, 40).unwrap();
        st.inc_nonce(A);
        st.revert_to(cp);

        assert_eq!(st.root(), root_before);
        assert_eq!(st.get(&A).balance, 100);
        assert_eq!(st.get(&A).nonce, 0);
        assert!(!st.contains(&B));
    }

    #[test]
    fn nested_checkpoints_stack() {
        let mut st = StateDb::new();
        st.credit(A, 100).unwrap();

        let outer = st.checkpoint();
        st.debit(A, 10).unwrap();
        let inner = st.checkpoint();
        st.debit(A, 20).unwrap();
        st.revert_to(inner);
        assert_eq!(st.get(&A).balance, 90);
        st.revert_to(outer);
        assert_eq!(st.get(&A).balance, 100);
    }

    #[test]
    fn restore_account_rewinds_to_a_prior_record() {
        let mut st = StateDb::new();
        let root_empty = st.root();
        st.credit(A, 50).unwrap();
        st.inc_nonce(A);
        let snapshot = st.try_get(&A);
        let root_snapshot = st.root();

        st.credit(A, 25).unwrap();
        st.restore_account(A, snapshot);
        assert_eq!(st.root(), root_snapshot);

        st.restore_account(A, None);
        assert_eq!(st.try_get(&A), None);
        assert_eq!(st.root(), root_empty);
    }

    #[test]
    fn equal_states_produce_equal_roots() {
        let mut x = StateDb::new();
        let mut y = StateDb::new();
        // Build the same contents in different orders.
        x.credit(A, 5).unwrap();
        x.credit(B, 7).unwrap();
        y.credit(B, 7).unwrap();
        y.credit(A, 5).unwrap();
        assert_eq!(x.root(), y.root());
    }
}
