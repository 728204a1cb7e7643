//! Window-based provider slashing: warn, jail, unjail.

use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlashThresholds {
    /// Minimum fraction of trap tasks answered correctly.
    pub traps_min: f64,
    /// Minimum fraction of tasks meeting the QoS bar.
    pub qos_min: f64,
}

impl Default for SlashThresholds {
    fn default() -> Self {
        Self { traps_min: 0.98, qos_min: 0.90 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlashPenalties {
    pub jail_after_violations: u32,
    pub cooldown_blocks: u64,
    pub penalty_per_violation: u128,
}

impl Default for SlashPenalties {
    fn default() -> Self {
        Self { jail_after_violations: 2, cooldown_blocks: 5, penalty_per_violation: 0 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderState {
    pub provider_id: String,
    pub stake: u128,
    pub jailed: bool,
    pub jail_until_height: u64,
    pub violations: u32,
}

impl ProviderState {
    pub fn new(provider_id: impl Into<String>, stake: u128) -> Self {
        Self { provider_id: provider_id.into(), stake, jailed: false, jail_until_height: 0, violations: 0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowStats {
    pub total: u64,
    pub traps_ok: u64,
    pub qos_ok: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum SlashEvent {
    Warn { height: u64, violations: u32 },
    Jail { height: u64, until: u64 },
    Unjail { height: u64 },
}

pub struct SlashingEngine {
    thresholds: SlashThresholds,
    penalties: SlashPenalties,
}

impl SlashingEngine {
    pub fn new(thresholds: SlashThresholds, penalties: SlashPenalties) -> Self {
        Self { thresholds, penalties }
    }

    fn good(&self, stats: &WindowStats) -> bool {
        if stats.total == 0 {
            return false;
        }
        let total = stats.total as f64;
        stats.traps_ok as f64 / total >= self.thresholds.traps_min
            && stats.qos_ok as f64 / total >= self.thresholds.qos_min
    }

    /// Feed one observation window. Jailed providers can only leave jail via
    /// a good window at or past the cooldown height; leaving jail resets the
    /// violation count. Bad windows outside jail escalate: warn, then jail
    /// once violations reach the threshold, debiting stake each time.
    pub fn process_window(
        &self,
        provider: &mut ProviderState,
        height: u64,
        stats: &WindowStats,
    ) -> Option<SlashEvent> {
        if provider.jailed {
            if height >= provider.jail_until_height && self.good(stats) {
                provider.jailed = false;
                provider.jail_until_height = 0;
                provider.violations = 0;
                info!(provider = %provider.provider_id, height, "provider unjailed");
                return Some(SlashEvent::Unjail { height });
            }
            return None;
        }

        if self.good(stats) {
            return None;
        }

        provider.violations += 1;
        provider.stake = provider.stake.saturating_sub(self.penalties.penalty_per_violation);

        if provider.violations >= self.penalties.jail_after_violations {
            provider.jailed = true;
            provider.jail_until_height = height + self.penalties.cooldown_blocks;
            info!(provider = %provider.provider_id, height, until = provider.jail_until_height, "provider jailed");
            return Some(SlashEvent::Jail { height, until: provider.jail_until_height });
        }
        Some(SlashEvent::Warn { height, violations: provider.violations })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> SlashingEngine {
        SlashingEngine::new(SlashThresholds::default(), SlashPenalties::default())
    }

    fn bad() -> WindowStats {
        WindowStats { total: 100, traps_ok: 50, qos_ok: 50 }
    }

    fn good() -> WindowStats {
        WindowStats { total: 200, traps_ok: 199, qos_ok: 190 }
    }

    #[test]
    fn two_bad_windows_jail_with_cooldown_and_good_window_unjails() {
        let eng = engine();
        let mut p = ProviderState::new("prov-1", 1_000);

        assert_eq!(
            eng.process_window(&mut p, 10, &bad()),
            Some(SlashEvent::Warn { height: 10, violations: 1 })
        );
        assert_eq!(
            eng.process_window(&mut p, 11, &bad()),
            Some(SlashEvent::Jail { height: 11, until: 16 })
        );
        assert!(p.jailed);

        // Good window before the cooldown boundary must not unjail.
        assert_eq!(eng.process_window(&mut p, 15, &good()), None);
        assert!(p.jailed);

        // At the boundary with a good window it must.
        assert_eq!(eng.process_window(&mut p, 16, &good()), Some(SlashEvent::Unjail { height: 16 }));
        assert!(!p.jailed);
        assert_eq!(p.violations, 0, "violations reset on unjail");
    }

    #[test]
    fn bad_window_after_cooldown_keeps_provider_jailed() {
        let eng = engine();
        let mut p = ProviderState::new("prov-2", 0);
        eng.process_window(&mut p, 1, &bad());
        eng.process_window(&mut p, 2, &bad());
        assert!(p.jailed);
        assert_eq!(eng.process_window(&mut p, 100, &bad()), None);
        assert!(p.jailed);
    }

    #[test]
    fn one_violation_below_threshold_does_not_jail() {
        let eng = SlashingEngine::new(
            SlashThresholds::default(),
            SlashPenalties { jail_after_violations: 3, ..Default::default() },
        );
        let mut p = ProviderState::new("prov-3", 0);
        eng.process_window(&mut p, 1, &bad());
        assert_eq!(
            eng.process_window(&mut p, 2, &bad()),
            Some(SlashEvent::Warn { height: 2, violations: 2 })
        );
        assert!(!p.jailed);
        assert!(matches!(eng.process_window(&mut p, 3, &bad()), Some(SlashEvent::Jail { .. })));
    }

    #[test]
    fn stake_is_debited_but_never_negative() {
        let eng = SlashingEngine::new(
            SlashThresholds::default(),
            SlashPenalties { penalty_per_violation: 700, jail_after_violations: 10, ..Default::default() },
        );
        let mut p = ProviderState::new("prov-4", 1_000);
        eng.process_window(&mut p, 1, &bad());
        assert_eq!(p.stake, 300);
        eng.process_window(&mut p, 2, &bad());
        assert_eq!(p.stake, 0, "penalty clamps at zero");
    }

    #[test]
    fn empty_window_counts_as_bad() {
        let eng = engine();
        let mut p = ProviderState::new("prov-5", 0);
        let stats = WindowStats { total: 0, traps_ok: 0, qos_ok: 0 };
        assert!(matches!(eng.process_window(&mut p, 1, &stats), Some(SlashEvent::Warn { .. })));
    }

    #[test]
    fn good_windows_leave_state_untouched() {
        let eng = engine();
        let mut p = ProviderState::new("prov-6", 500);
        assert_eq!(eng.process_window(&mut p, 7, &good()), None);
        assert_eq!(p, ProviderState::new("prov-6", 500));
    }
}
