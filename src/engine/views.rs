//! Operation receipts and read-only views handed back to callers.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::account::{Account, ActiveEffect, BoostKind, ReferralEdge, UpgradeKind};
use crate::clock::day_of;
use crate::economy::{boosts_left, EconomyConfig};
use crate::energy;

// =============================================================================
// Receipts
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TapReceipt {
    pub energy: u64,
    pub gain: u64,
    pub points: u64,
    pub taps_per_click: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoostReceipt {
    pub kind: BoostKind,
    pub energy: u64,
    pub used_today: u32,
    pub remaining_today: u32,
    /// Set for timed boosts.
    pub expires_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeReceipt {
    pub item: UpgradeKind,
    pub new_level: u32,
    pub cost: u64,
    /// Balance read back after the commit.
    pub points: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReferralOutcome {
    Awarded { referrer_id: String, gift: u64, bonus: u64 },
    /// Bonuses were credited by an earlier call.
    AlreadyAwarded { referrer_id: String },
    /// Referrer stored without credit. Never awarded later.
    Pending { referrer_id: String },
}

impl ReferralOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferralOutcome::Awarded { .. } => "awarded",
            ReferralOutcome::AlreadyAwarded { .. } => "already_awarded",
            ReferralOutcome::Pending { .. } => "pending",
        }
    }

    /// The referrer the account is bound to, which may differ from the one requested.
    pub fn referrer_id(&self) -> &str {
        match self {
            ReferralOutcome::Awarded { referrer_id, .. }
            | ReferralOutcome::AlreadyAwarded { referrer_id }
            | ReferralOutcome::Pending { referrer_id } => referrer_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatReceipt {
    pub last_active: i64,
    /// First heartbeat of this UTC day for the account.
    pub first_today: bool,
    pub day: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageReceipt {
    pub package: String,
    pub expires_at: i64,
}

// =============================================================================
// Views
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountStatus {
    pub user_id: String,
    pub points: u64,
    pub energy: u64,
    pub max_energy: u64,
    pub regen_rate: f64,
    pub secs_to_full: Option<u64>,
    pub taps_per_click: u64,
    pub boost_multiplier: u64,
    pub upgrade_levels: BTreeMap<UpgradeKind, u32>,
    pub active_effects: Vec<ActiveEffect>,
    pub referral_bonus_total: u64,
    pub touches: u64,
}

impl AccountStatus {
    pub fn of(account: &Account, now: i64) -> Self {
        Self {
            user_id: account.id.clone(),
            points: account.points,
            energy: energy::current_energy(account, now),
            max_energy: account.max_energy,
            regen_rate: account.regen_rate,
            secs_to_full: energy::secs_to_full(account, now),
            taps_per_click: account.taps_per_click(),
            boost_multiplier: account.boost_multiplier,
            upgrade_levels: account.upgrade_levels.clone(),
            active_effects: account.live_effects(now),
            referral_bonus_total: account.referral.referral_bonus_total,
            touches: account.touches,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoostLevel {
    pub item: UpgradeKind,
    pub level: u32,
    pub max_level: u32,
    /// `None` at max level.
    pub next_cost: Option<u64>,
}

pub fn boost_levels_of(account: &Account, econ: &EconomyConfig) -> Vec<BoostLevel> {
    UpgradeKind::ALL
        .iter()
        .map(|kind| {
            let level = account.level(*kind);
            BoostLevel {
                item: *kind,
                level,
                max_level: econ.max_level(*kind),
                next_cost: econ.upgrade_cost(*kind, level),
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyInfo {
    pub day: NaiveDate,
    pub taping_used: u32,
    pub full_used: u32,
    pub taping_left: u32,
    pub full_left: u32,
}

impl DailyInfo {
    /// Stale counters read as zero; the stored record is left alone.
    pub fn of(account: &Account, now: i64, econ: &EconomyConfig) -> Self {
        let day = day_of(now);
        let daily = account.daily.effective(day);
        Self {
            day,
            taping_used: daily.used(BoostKind::Taping),
            full_used: daily.used(BoostKind::Full),
            taping_left: boosts_left(&daily, BoostKind::Taping, econ),
            full_left: boosts_left(&daily, BoostKind::Full, econ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralSummary {
    pub user_id: String,
    pub referrer_id: Option<String>,
    pub awarded: bool,
    pub referrals_count: u64,
    pub referral_bonus_total: u64,
    /// Newest first.
    pub referrals: Vec<ReferralEdge>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::DailyCounters;

    #[test]
    fn test_status_does_not_settle() {
        let mut acct = Account::new("u", 0, 500, 1.5);
        acct.energy = 0;
        let first = AccountStatus::of(&acct, 10_000);
        let second = AccountStatus::of(&acct, 10_000);
        assert_eq!(first.energy, 15);
        assert_eq!(first, second);
        assert_eq!(acct.energy, 0);
    }

    #[test]
    fn test_boost_levels_next_cost() {
        let econ = EconomyConfig::default();
        let mut acct = Account::new("u", 0, 500, 1.2);
        acct.upgrade_levels.insert(UpgradeKind::TapBot, 1);
        let levels = boost_levels_of(&acct, &econ);
        let multitap = levels.iter().find(|l| l.item == UpgradeKind::Multitap).unwrap();
        assert_eq!(multitap.next_cost, Some(600));
        let tapbot = levels.iter().find(|l| l.item == UpgradeKind::TapBot).unwrap();
        assert_eq!(tapbot.next_cost, None);
        assert_eq!(tapbot.max_level, 1);
    }

    #[test]
    fn test_daily_info_stale_date() {
        let econ = EconomyConfig::default();
        let mut acct = Account::new("u", 0, 500, 1.2);
        acct.daily = DailyCounters { taping_used_today: 3, full_tank_used_today: 2, ..acct.daily };
        let same_day = DailyInfo::of(&acct, 1_000, &econ);
        assert_eq!((same_day.taping_left, same_day.full_left), (0, 1));
        let next_day = DailyInfo::of(&acct, 86_400_000, &econ);
        assert_eq!((next_day.taping_used, next_day.full_used), (0, 0));
        assert_eq!(next_day.taping_left, 3);
    }
}
