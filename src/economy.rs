//! Economy rules: tap cost and gain, upgrade tables, daily boost limits.
//!
//! Everything here is a pure function of an account snapshot plus an
//! [`EconomyConfig`]; the engine decides when results get persisted.

use crate::account::{Account, ActiveEffect, BoostKind, DailyCounters, EffectKind, UpgradeKind};
use crate::energy;

/// Paid x2 package activated by the payment glue.
#[derive(Debug, Clone, PartialEq)]
pub struct BoostPackage {
    pub id: &'static str,
    pub duration_ms: i64,
}

#[derive(Debug, Clone)]
pub struct EconomyConfig {
    // === Account defaults ===
    pub base_max_energy: u64,
    pub base_regen_rate: f64,

    // === Upgrade tables (index = current level) ===
    pub multitap_costs: Vec<u64>,
    pub energy_limit_costs: Vec<u64>,
    /// Added on top of `base_max_energy` at level `i + 1`.
    pub energy_limit_tiers: Vec<u64>,
    pub recharge_costs: Vec<u64>,
    /// Regen rate at level `i + 1`.
    pub recharge_speeds: Vec<f64>,
    pub tapbot_costs: Vec<u64>,

    // === Boosts ===
    pub daily_boost_limit: u32,
    pub taping_duration_ms: i64,
    pub effect_multiplier: u64,
    pub packages: Vec<BoostPackage>,

    // === Referral ===
    pub first_time_gift: u64,
    pub referrer_bonus: u64,
}

impl Default for EconomyConfig {
    fn default() -> Self {
        Self {
            base_max_energy: 500,
            base_regen_rate: 1.2,

            multitap_costs: vec![600, 1_500, 3_000, 6_000, 12_000, 25_000, 50_000, 100_000],
            energy_limit_costs: vec![800, 2_000, 4_500, 9_000, 18_000, 36_000],
            energy_limit_tiers: vec![250, 500, 1_000, 1_500, 2_500, 4_000],
            recharge_costs: vec![1_000, 3_000, 7_000, 15_000, 30_000],
            recharge_speeds: vec![1.6, 2.0, 2.5, 3.2, 4.0],
            tapbot_costs: vec![20_000],

            daily_boost_limit: 3,
            taping_duration_ms: 10_000,
            effect_multiplier: 2,
            packages: vec![
                BoostPackage { id: "boost_x2_1h", duration_ms: 3_600_000 },
                BoostPackage { id: "boost_x2_2h", duration_ms: 4 * 3_600_000 },
                BoostPackage { id: "boost_x2_7h", duration_ms: 8 * 3_600_000 },
            ],

            first_time_gift: 2_500,
            referrer_bonus: 500,
        }
    }
}

impl EconomyConfig {
    pub fn cost_table(&self, kind: UpgradeKind) -> &[u64] {
        match kind {
            UpgradeKind::Multitap => &self.multitap_costs,
            UpgradeKind::EnergyLimit => &self.energy_limit_costs,
            UpgradeKind::Recharge => &self.recharge_costs,
            UpgradeKind::TapBot => &self.tapbot_costs,
        }
    }

    /// Highest reachable level. Effect tables cap it as well as cost tables.
    pub fn max_level(&self, kind: UpgradeKind) -> u32 {
        let len = match kind {
            UpgradeKind::EnergyLimit => self.energy_limit_costs.len().min(self.energy_limit_tiers.len()),
            UpgradeKind::Recharge => self.recharge_costs.len().min(self.recharge_speeds.len()),
            _ => self.cost_table(kind).len(),
        };
        u32::try_from(len).unwrap_or(u32::MAX)
    }

    /// Cost to go from `level` to `level + 1`; `None` at the cap.
    pub fn upgrade_cost(&self, kind: UpgradeKind, level: u32) -> Option<u64> {
        if level >= self.max_level(kind) {
            return None;
        }
        self.cost_table(kind).get(level as usize).copied()
    }

    pub fn package(&self, id: &str) -> Option<&BoostPackage> {
        self.packages.iter().find(|p| p.id == id)
    }
}

// =============================================================================
// Tap
// =============================================================================

/// Energy units one tap action consumes.
pub fn tap_cost(account: &Account) -> u64 {
    account.taps_per_click()
}

/// x2 while any taping or paid x2 effect is live, otherwise x1.
pub fn effect_multiplier(account: &Account, now: i64, econ: &EconomyConfig) -> u64 {
    let boosted = account
        .active_effects
        .iter()
        .any(|e| e.is_live(now) && matches!(e.kind, EffectKind::Taping | EffectKind::X2));
    if boosted {
        econ.effect_multiplier
    } else {
        1
    }
}

pub fn tap_gain(account: &Account, now: i64, econ: &EconomyConfig) -> u64 {
    account
        .boost_multiplier
        .max(1)
        .saturating_mul(account.taps_per_click())
        .saturating_mul(effect_multiplier(account, now, econ))
}

// =============================================================================
// Upgrades
// =============================================================================

/// Apply the stat change for reaching `new_level`. Energy is settled first so a
/// new rate or cap never applies to time that already elapsed.
pub fn apply_upgrade_effect(account: &mut Account, kind: UpgradeKind, new_level: u32, now: i64, econ: &EconomyConfig) {
    let idx = (new_level as usize).saturating_sub(1);
    match kind {
        // Derived from the level via `taps_per_click`.
        UpgradeKind::Multitap => {}
        UpgradeKind::EnergyLimit => {
            energy::settle(account, now);
            let tier = econ.energy_limit_tiers.get(idx).copied().unwrap_or(0);
            account.max_energy = econ.base_max_energy.saturating_add(tier);
            account.energy = account.energy.min(account.max_energy);
        }
        UpgradeKind::Recharge => {
            energy::settle(account, now);
            if let Some(speed) = econ.recharge_speeds.get(idx) {
                account.regen_rate = *speed;
            }
        }
        // Consumed by the external auto-tap scheduler.
        UpgradeKind::TapBot => {}
    }
}

// =============================================================================
// Daily boosts
// =============================================================================

pub fn boosts_left(daily: &DailyCounters, kind: BoostKind, econ: &EconomyConfig) -> u32 {
    econ.daily_boost_limit.saturating_sub(daily.used(kind))
}

pub fn taping_effect(now: i64, econ: &EconomyConfig) -> ActiveEffect {
    ActiveEffect { kind: EffectKind::Taping, expires_at: now.saturating_add(econ.taping_duration_ms) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> Account {
        Account::new("u", 0, 500, 1.2)
    }

    #[test]
    fn test_base_tap() {
        let econ = EconomyConfig::default();
        let acct = account();
        assert_eq!(tap_cost(&acct), 1);
        assert_eq!(tap_gain(&acct, 0, &econ), 1);
    }

    #[test]
    fn test_gain_scales_with_multitap_and_boost() {
        let econ = EconomyConfig::default();
        let mut acct = account();
        acct.upgrade_levels.insert(UpgradeKind::Multitap, 2);
        acct.boost_multiplier = 3;
        assert_eq!(tap_cost(&acct), 3);
        assert_eq!(tap_gain(&acct, 0, &econ), 9);
    }

    #[test]
    fn test_effect_doubles_only_while_live() {
        let econ = EconomyConfig::default();
        let mut acct = account();
        acct.active_effects.push(taping_effect(1_000, &econ));
        assert_eq!(tap_gain(&acct, 5_000, &econ), 2);
        assert_eq!(tap_gain(&acct, 11_000, &econ), 1);
    }

    #[test]
    fn test_effects_do_not_stack() {
        let econ = EconomyConfig::default();
        let mut acct = account();
        acct.active_effects.push(taping_effect(0, &econ));
        acct.active_effects.push(ActiveEffect { kind: EffectKind::X2, expires_at: 60_000 });
        assert_eq!(effect_multiplier(&acct, 1, &econ), 2);
    }

    #[test]
    fn test_cost_lookup_and_cap() {
        let econ = EconomyConfig::default();
        assert_eq!(econ.upgrade_cost(UpgradeKind::Multitap, 0), Some(600));
        assert_eq!(econ.upgrade_cost(UpgradeKind::Multitap, 1), Some(1_500));
        assert_eq!(econ.upgrade_cost(UpgradeKind::TapBot, 1), None);
        let cap = econ.max_level(UpgradeKind::Recharge);
        assert_eq!(econ.upgrade_cost(UpgradeKind::Recharge, cap), None);
    }

    #[test]
    fn test_energy_limit_effect() {
        let econ = EconomyConfig::default();
        let mut acct = account();
        apply_upgrade_effect(&mut acct, UpgradeKind::EnergyLimit, 1, 0, &econ);
        assert_eq!(acct.max_energy, 750);
        assert_eq!(acct.energy, 500);
    }

    #[test]
    fn test_energy_limit_clamps_down() {
        let econ = EconomyConfig {
            energy_limit_tiers: vec![0],
            base_max_energy: 300,
            ..Default::default()
        };
        let mut acct = account();
        apply_upgrade_effect(&mut acct, UpgradeKind::EnergyLimit, 1, 0, &econ);
        assert_eq!(acct.max_energy, 300);
        assert_eq!(acct.energy, 300);
    }

    #[test]
    fn test_recharge_settles_before_rate_change() {
        let econ = EconomyConfig::default();
        let mut acct = account();
        acct.energy = 0;
        // 10s at 1.2/s before the upgrade lands
        apply_upgrade_effect(&mut acct, UpgradeKind::Recharge, 1, 10_000, &econ);
        assert_eq!(acct.energy, 12);
        assert_eq!(acct.last_energy_update, 10_000);
        assert_eq!(acct.regen_rate, 1.6);
    }

    #[test]
    fn test_boosts_left() {
        let econ = EconomyConfig::default();
        let mut daily = account().daily;
        assert_eq!(boosts_left(&daily, BoostKind::Full, &econ), 3);
        for _ in 0..4 {
            daily.bump(BoostKind::Full);
        }
        assert_eq!(boosts_left(&daily, BoostKind::Full, &econ), 0);
        assert_eq!(boosts_left(&daily, BoostKind::Taping, &econ), 3);
    }

    #[test]
    fn test_package_lookup() {
        let econ = EconomyConfig::default();
        assert_eq!(econ.package("boost_x2_1h").map(|p| p.duration_ms), Some(3_600_000));
        assert!(econ.package("boost_x9").is_none());
    }
}
