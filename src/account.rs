//! Per-user game record and the small vocabularies it is built from.
//!
//! An account is a plain value: the engine loads a versioned copy, derives the
//! post-state with pure functions and hands it back to the store for a
//! conditional write. Nothing here touches I/O.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// =============================================================================
// Kinds
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum UpgradeKind {
    #[serde(rename = "multitap")]
    Multitap,
    #[serde(rename = "energylimit")]
    EnergyLimit,
    #[serde(rename = "recharge")]
    Recharge,
    #[serde(rename = "tapbot")]
    TapBot,
}

impl UpgradeKind {
    pub const ALL: [UpgradeKind; 4] = [
        UpgradeKind::Multitap,
        UpgradeKind::EnergyLimit,
        UpgradeKind::Recharge,
        UpgradeKind::TapBot,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            UpgradeKind::Multitap => "multitap",
            UpgradeKind::EnergyLimit => "energylimit",
            UpgradeKind::Recharge => "recharge",
            UpgradeKind::TapBot => "tapbot",
        }
    }

    pub fn parse(item: &str) -> Option<Self> {
        match item.trim().to_ascii_lowercase().as_str() {
            "multitap" => Some(UpgradeKind::Multitap),
            "energylimit" | "energy_limit" => Some(UpgradeKind::EnergyLimit),
            "recharge" => Some(UpgradeKind::Recharge),
            "tapbot" | "tap_bot" => Some(UpgradeKind::TapBot),
            _ => None,
        }
    }
}

impl fmt::Display for UpgradeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Daily-limited boost actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoostKind {
    /// Short timed x2 effect.
    Taping,
    /// Instant energy refill.
    Full,
}

impl BoostKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BoostKind::Taping => "taping",
            BoostKind::Full => "full",
        }
    }

    pub fn parse(kind: &str) -> Option<Self> {
        match kind.trim().to_ascii_lowercase().as_str() {
            "taping" => Some(BoostKind::Taping),
            "full" | "fulltank" => Some(BoostKind::Full),
            _ => None,
        }
    }
}

impl fmt::Display for BoostKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EffectKind {
    Taping,
    X2,
}

/// Temporary multiplier; live iff `expires_at > now`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveEffect {
    pub kind: EffectKind,
    pub expires_at: i64,
}

impl ActiveEffect {
    pub fn is_live(&self, now: i64) -> bool {
        self.expires_at > now
    }
}

// =============================================================================
// Daily counters
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyCounters {
    pub taping_used_today: u32,
    pub full_tank_used_today: u32,
    pub last_reset_date: NaiveDate,
}

impl DailyCounters {
    pub fn new(today: NaiveDate) -> Self {
        Self { taping_used_today: 0, full_tank_used_today: 0, last_reset_date: today }
    }

    /// Counters as they read on `today`, without mutating the stored copy.
    pub fn effective(&self, today: NaiveDate) -> Self {
        if today > self.last_reset_date {
            Self::new(today)
        } else {
            *self
        }
    }

    /// Reset on the first observation of a later day. Returns true if a reset
    /// happened. An earlier `today` (clock skew) never resets.
    pub fn roll(&mut self, today: NaiveDate) -> bool {
        if today <= self.last_reset_date {
            return false;
        }
        *self = Self::new(today);
        true
    }

    pub fn used(&self, kind: BoostKind) -> u32 {
        match kind {
            BoostKind::Taping => self.taping_used_today,
            BoostKind::Full => self.full_tank_used_today,
        }
    }

    pub fn bump(&mut self, kind: BoostKind) -> u32 {
        let slot = match kind {
            BoostKind::Taping => &mut self.taping_used_today,
            BoostKind::Full => &mut self.full_tank_used_today,
        };
        *slot = slot.saturating_add(1);
        *slot
    }
}

// =============================================================================
// Referral
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralInfo {
    /// Who invited this account. May be set while `awarded` is false when the
    /// inviter did not exist at registration time.
    pub referrer_id: Option<String>,
    /// Flips false -> true at most once, ever.
    pub awarded: bool,
    pub referrals_count: u64,
    pub referral_bonus_total: u64,
}

/// Append-only record of a credited invitation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralEdge {
    pub referrer_id: String,
    pub referred_id: String,
    pub at: i64,
    /// Deterministic per (referrer, referred) pair.
    pub token: String,
}

// =============================================================================
// Account
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub points: u64,
    /// Energy at `last_energy_update`; read it through `energy::current_energy`.
    pub energy: u64,
    pub max_energy: u64,
    /// Units per second.
    pub regen_rate: f64,
    pub boost_multiplier: u64,
    pub upgrade_levels: BTreeMap<UpgradeKind, u32>,
    pub last_energy_update: i64,
    pub active_effects: Vec<ActiveEffect>,
    pub daily: DailyCounters,
    pub referral: ReferralInfo,
    pub touches: u64,
    pub last_active: i64,
    pub last_daily_active_date: Option<NaiveDate>,
    pub created_at: i64,
}

impl Account {
    pub fn new(id: &str, now: i64, max_energy: u64, regen_rate: f64) -> Self {
        Self {
            id: id.to_string(),
            points: 0,
            energy: max_energy,
            max_energy,
            regen_rate,
            boost_multiplier: 1,
            upgrade_levels: UpgradeKind::ALL.iter().map(|k| (*k, 0)).collect(),
            last_energy_update: now,
            active_effects: Vec::new(),
            daily: DailyCounters::new(crate::clock::day_of(now)),
            referral: ReferralInfo::default(),
            touches: 0,
            last_active: now,
            last_daily_active_date: None,
            created_at: now,
        }
    }

    pub fn level(&self, kind: UpgradeKind) -> u32 {
        self.upgrade_levels.get(&kind).copied().unwrap_or(0)
    }

    /// Energy consumed (and base points earned) per tap action.
    pub fn taps_per_click(&self) -> u64 {
        1 + u64::from(self.level(UpgradeKind::Multitap))
    }

    pub fn live_effects(&self, now: i64) -> Vec<ActiveEffect> {
        self.active_effects.iter().copied().filter(|e| e.is_live(now)).collect()
    }

    pub fn prune_effects(&mut self, now: i64) {
        self.active_effects.retain(|e| e.is_live(now));
    }
}
