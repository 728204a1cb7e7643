//! Sender ban list for low-fee spam. Bans extend monotonically and lift on
//! their own once the clock passes the horizon. The clock is injected so
//! tests never sleep.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use animica_core::{to_hex, Address};

pub trait Clock: Send + Sync {
    /// Seconds on a monotone logical timeline.
    fn now_s(&self) -> u64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_s(&self) -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
    }
}

/// Manually advanced clock for tests.
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start: u64) -> Self {
        Self { now: AtomicU64::new(start) }
    }

    pub fn advance(&self, seconds: u64) {
        self.now.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_s(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanPolicy {
    pub low_fee_ban_s: u64,
}

impl Default for BanPolicy {
    fn default() -> Self {
        Self { low_fee_ban_s: 600 }
    }
}

pub struct BanList {
    policy: BanPolicy,
    clock: Arc<dyn Clock>,
    until: RwLock<HashMap<Address, u64>>,
}

impl BanList {
    pub fn new(policy: BanPolicy, clock: Arc<dyn Clock>) -> Self {
        Self { policy, clock, until: RwLock::new(HashMap::new()) }
    }

    /// Ban for a low-fee offense; repeats extend as
    /// `until = max(until, now + low_fee_ban_s)`.
    pub fn ban_for_low_fee(&self, sender: &Address) {
        let horizon = self.clock.now_s() + self.policy.low_fee_ban_s;
        let mut until = self.until.write();
        let entry = until.entry(*sender).or_insert(0);
        *entry = (*entry).max(horizon);
        debug!(sender = %to_hex(sender), until = *entry, "low-fee ban");
    }

    pub fn is_banned(&self, sender: &Address) -> bool {
        self.banned_until(sender).is_some()
    }

    /// The active horizon for `sender`, if still banned.
    pub fn banned_until(&self, sender: &Address) -> Option<u64> {
        let until = *self.until.read().get(sender)?;
        (self.clock.now_s() < until).then_some(until)
    }

    /// Drop expired entries; returns how many were lifted.
    pub fn prune(&self) -> usize {
        let now = self.clock.now_s();
        let mut until = self.until.write();
        let before = until.len();
        until.retain(|_, horizon| now < *horizon);
        before - until.len()
    }

    /// Active bans, for persistence.
    pub fn snapshot(&self) -> Vec<(Address, u64)> {
        let now = self.clock.now_s();
        self.until.read().iter().filter(|(_, &u)| now < u).map(|(a, &u)| (*a, u)).collect()
    }

    /// Reload persisted bans, keeping the longer horizon on conflict.
    pub fn restore(&self, entries: impl IntoIterator<Item = (Address, u64)>) {
        let mut until = self.until.write();
        for (addr, horizon) in entries {
            let entry = until.entry(addr).or_insert(0);
            *entry = (*entry).max(horizon);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: Address = [0xaa; 20];
    const BOB: Address = [0xbb; 20];
    const CAROL: Address = [0xcc; 20];

    fn banlist(low_fee_ban_s: u64) -> (BanList, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        (BanList::new(BanPolicy { low_fee_ban_s }, clock.clone()), clock)
    }

    #[test]
    fn single_ban_lasts_the_configured_window() {
        let (bl, clock) = banlist(10);
        assert!(!bl.is_banned(&ALICE));

        bl.ban_for_low_fee(&ALICE);
        assert!(bl.is_banned(&ALICE));

        clock.advance(9);
        assert!(bl.is_banned(&ALICE));
        clock.advance(2);
        assert!(!bl.is_banned(&ALICE));
    }

    #[test]
    fn repeat_offense_extends_the_horizon() {
        let (bl, clock) = banlist(10);

        bl.ban_for_low_fee(&BOB); // until 10
        clock.advance(5);
        bl.ban_for_low_fee(&BOB); // until 15

        clock.advance(9); // t = 14
        assert!(bl.is_banned(&BOB));
        clock.advance(2); // t = 16
        assert!(!bl.is_banned(&BOB));
    }

    #[test]
    fn an_earlier_reoffense_never_shortens_a_ban() {
        let (bl, clock) = banlist(10);
        bl.ban_for_low_fee(&BOB); // until 10
        clock.advance(8);
        // Horizon is now max(10, 8 + 10) = 18, monotone.
        bl.ban_for_low_fee(&BOB);
        assert_eq!(bl.banned_until(&BOB), Some(18));
    }

    #[test]
    fn bans_are_sender_scoped() {
        let (bl, clock) = banlist(20);
        bl.ban_for_low_fee(&ALICE);
        assert!(bl.is_banned(&ALICE));
        assert!(!bl.is_banned(&CAROL));

        clock.advance(21);
        assert!(!bl.is_banned(&ALICE));
        assert!(!bl.is_banned(&CAROL));
    }

    #[test]
    fn snapshot_and_restore_roundtrip_active_bans() {
        let (bl, clock) = banlist(10);
        bl.ban_for_low_fee(&ALICE);
        clock.advance(3);
        bl.ban_for_low_fee(&BOB);

        let snap = bl.snapshot();
        let (restored, clock2) = banlist(10);
        clock2.advance(3);
        restored.restore(snap);
        assert!(restored.is_banned(&ALICE));
        assert!(restored.is_banned(&BOB));

        clock2.advance(20);
        assert_eq!(restored.prune(), 2);
    }
}
