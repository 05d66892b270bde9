//! Pure transitions: (Account, input, now) -> (Account', receipt) | rejection
//!
//! Every function here is deterministic in its inputs. The store layer may call
//! them several times for one request when a commit loses a race, so none of
//! them read the clock or touch I/O. A rejection leaves the input untouched.

use sha2::{Digest, Sha256};

use super::views::{BoostReceipt, HeartbeatReceipt, PackageReceipt, ReferralOutcome, TapReceipt, UpgradeReceipt};
use crate::account::{Account, ActiveEffect, BoostKind, EffectKind, ReferralEdge, UpgradeKind};
use crate::clock::day_of;
use crate::economy::{self, BoostPackage, EconomyConfig};
use crate::energy;
use crate::error::{GameError, GameResult};
use crate::verify::invariants::{assert_account_invariants, assert_points_conserved};

fn touch(next: &mut Account, now: i64) {
    next.last_active = next.last_active.max(now);
}

fn points_check(before: &Account, after: &Account, spent: u64, earned: u64) -> GameResult<()> {
    assert_points_conserved(before, after, spent, earned).map_err(|v| GameError::InvariantViolation(v.msg))
}

// =============================================================================
// Tap
// =============================================================================

pub fn tap(current: &Account, now: i64, econ: &EconomyConfig) -> GameResult<(Account, TapReceipt)> {
    let mut next = current.clone();
    next.daily.roll(day_of(now));

    let available = energy::settle(&mut next, now);
    let cost = economy::tap_cost(&next);
    if available < cost {
        return Err(GameError::InsufficientEnergy { needed: cost, available });
    }

    let gain = economy::tap_gain(&next, now, econ);
    next.energy = available - cost;
    next.points = next.points.saturating_add(gain);
    next.touches = next.touches.saturating_add(1);
    next.prune_effects(now);
    touch(&mut next, now);
    points_check(current, &next, 0, gain)?;

    let receipt = TapReceipt {
        energy: next.energy,
        gain,
        points: next.points,
        taps_per_click: cost,
    };
    Ok((next, receipt))
}

// =============================================================================
// Boosts
// =============================================================================

pub fn activate_boost(current: &Account, kind: BoostKind, now: i64, econ: &EconomyConfig) -> GameResult<(Account, BoostReceipt)> {
    let mut next = current.clone();
    next.daily.roll(day_of(now));
    if next.daily.used(kind) >= econ.daily_boost_limit {
        return Err(GameError::DailyLimitReached(kind));
    }

    let expires_at = match kind {
        BoostKind::Taping => {
            next.prune_effects(now);
            let effect = economy::taping_effect(now, econ);
            next.active_effects.push(effect);
            Some(effect.expires_at)
        }
        BoostKind::Full => {
            energy::settle(&mut next, now);
            next.energy = next.max_energy;
            None
        }
    };
    let used_today = next.daily.bump(kind);
    touch(&mut next, now);

    let receipt = BoostReceipt {
        kind,
        energy: energy::current_energy(&next, now),
        used_today,
        remaining_today: economy::boosts_left(&next.daily, kind, econ),
        expires_at,
    };
    Ok((next, receipt))
}

/// Paid x2 package. Not subject to daily limits.
pub fn activate_package(current: &Account, package: &BoostPackage, now: i64) -> GameResult<(Account, PackageReceipt)> {
    let mut next = current.clone();
    next.daily.roll(day_of(now));
    next.prune_effects(now);
    let expires_at = now.saturating_add(package.duration_ms);
    next.active_effects.push(ActiveEffect { kind: EffectKind::X2, expires_at });
    touch(&mut next, now);
    Ok((next, PackageReceipt { package: package.id.to_string(), expires_at }))
}

// =============================================================================
// Upgrades
// =============================================================================

/// Charge the next level of `kind`. `points` in the receipt is the committed
/// value; the engine replaces it with a fresh read after the write lands.
pub fn upgrade(current: &Account, kind: UpgradeKind, now: i64, econ: &EconomyConfig) -> GameResult<(Account, UpgradeReceipt)> {
    let level = current.level(kind);
    let cost = econ.upgrade_cost(kind, level).ok_or(GameError::MaxLevelReached(kind))?;
    if current.points < cost {
        return Err(GameError::InsufficientFunds { cost, balance: current.points });
    }

    let mut next = current.clone();
    next.daily.roll(day_of(now));
    next.points -= cost;
    let new_level = level + 1;
    next.upgrade_levels.insert(kind, new_level);
    economy::apply_upgrade_effect(&mut next, kind, new_level, now, econ);
    touch(&mut next, now);
    points_check(current, &next, cost, 0)?;

    let receipt = UpgradeReceipt { item: kind, new_level, cost, points: next.points };
    Ok((next, receipt))
}

// =============================================================================
// Presence
// =============================================================================

pub fn heartbeat(current: &Account, now: i64) -> GameResult<(Account, HeartbeatReceipt)> {
    let mut next = current.clone();
    let day = day_of(now);
    next.daily.roll(day);
    touch(&mut next, now);
    let first_today = next.last_daily_active_date.map_or(true, |seen| day > seen);
    if first_today {
        next.last_daily_active_date = Some(day);
    }
    let receipt = HeartbeatReceipt { last_active: next.last_active, first_today, day };
    Ok((next, receipt))
}

// =============================================================================
// Referral
// =============================================================================

/// Deterministic idempotency token for a (referrer, referred) pair.
pub fn referral_token(referrer_id: &str, referred_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(referrer_id.as_bytes());
    hasher.update(b":");
    hasher.update(referred_id.as_bytes());
    hex::encode(hasher.finalize())
}

/// Shape checks that need no stored state.
pub fn validate_referral(referred_id: &str, referrer_id: &str) -> GameResult<()> {
    if referred_id.trim().is_empty() || referrer_id.trim().is_empty() {
        return Err(GameError::InvalidReferral("empty user id".to_string()));
    }
    if referred_id == referrer_id {
        return Err(GameError::InvalidReferral("cannot refer yourself".to_string()));
    }
    Ok(())
}

/// `Some` when the referred account is already bound and nothing may change.
pub fn settled_referral(referred: &Account) -> Option<ReferralOutcome> {
    let referrer_id = referred.referral.referrer_id.clone()?;
    Some(if referred.referral.awarded {
        ReferralOutcome::AlreadyAwarded { referrer_id }
    } else {
        ReferralOutcome::Pending { referrer_id }
    })
}

/// Store a referrer that does not exist yet, without crediting anyone.
pub fn bind_pending(current: &Account, referrer_id: &str, now: i64) -> GameResult<(Account, ReferralOutcome)> {
    if let Some(outcome) = settled_referral(current) {
        return Ok((current.clone(), outcome));
    }
    let mut next = current.clone();
    next.referral.referrer_id = Some(referrer_id.to_string());
    touch(&mut next, now);
    Ok((next, ReferralOutcome::Pending { referrer_id: referrer_id.to_string() }))
}

/// Both post-states and the edge for a first-time referral credit.
pub fn award_referral(
    referred: &Account,
    referrer: &Account,
    now: i64,
    econ: &EconomyConfig,
) -> GameResult<(Account, Account, ReferralEdge)> {
    validate_referral(&referred.id, &referrer.id)?;

    let mut next_referred = referred.clone();
    next_referred.points = next_referred.points.saturating_add(econ.first_time_gift);
    next_referred.referral.awarded = true;
    next_referred.referral.referrer_id = Some(referrer.id.clone());
    touch(&mut next_referred, now);

    let mut next_referrer = referrer.clone();
    next_referrer.points = next_referrer.points.saturating_add(econ.referrer_bonus);
    next_referrer.referral.referrals_count = next_referrer.referral.referrals_count.saturating_add(1);
    next_referrer.referral.referral_bonus_total =
        next_referrer.referral.referral_bonus_total.saturating_add(econ.referrer_bonus);

    for (before, after, earned) in [
        (referred, &next_referred, econ.first_time_gift),
        (referrer, &next_referrer, econ.referrer_bonus),
    ] {
        points_check(before, after, 0, earned)?;
        assert_account_invariants(after).map_err(|v| GameError::InvariantViolation(v.msg))?;
    }

    let edge = ReferralEdge {
        referrer_id: referrer.id.clone(),
        referred_id: referred.id.clone(),
        at: now,
        token: referral_token(&referrer.id, &referred.id),
    };
    Ok((next_referred, next_referrer, edge))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY_MS: i64 = 86_400_000;

    fn fresh() -> Account {
        Account::new("u", 0, 500, 1.2)
    }

    #[test]
    fn test_tap_spends_energy_and_earns() {
        let econ = EconomyConfig::default();
        let (next, receipt) = tap(&fresh(), 0, &econ).unwrap();
        assert_eq!(next.energy, 499);
        assert_eq!(next.points, 1);
        assert_eq!(next.touches, 1);
        assert_eq!(receipt.gain, 1);
    }

    #[test]
    fn test_tap_rejects_without_energy() {
        let econ = EconomyConfig::default();
        let mut acct = fresh();
        acct.upgrade_levels.insert(UpgradeKind::Multitap, 2);
        acct.energy = 2;
        let err = tap(&acct, 0, &econ).unwrap_err();
        assert_eq!(err, GameError::InsufficientEnergy { needed: 3, available: 2 });
    }

    #[test]
    fn test_tap_uses_regenerated_energy() {
        let econ = EconomyConfig::default();
        let mut acct = fresh();
        acct.energy = 0;
        let (next, _) = tap(&acct, 5_000, &econ).unwrap();
        // floor(5 * 1.2) = 6, minus one
        assert_eq!(next.energy, 5);
        assert_eq!(next.last_energy_update, 5_000);
    }

    #[test]
    fn test_tap_prunes_expired_effects() {
        let econ = EconomyConfig::default();
        let mut acct = fresh();
        acct.active_effects.push(economy::taping_effect(0, &econ));
        let (next, receipt) = tap(&acct, 20_000, &econ).unwrap();
        assert_eq!(receipt.gain, 1);
        assert!(next.active_effects.is_empty());
    }

    #[test]
    fn test_taping_boost_doubles_gain() {
        let econ = EconomyConfig::default();
        let (boosted, receipt) = activate_boost(&fresh(), BoostKind::Taping, 0, &econ).unwrap();
        assert_eq!(receipt.expires_at, Some(10_000));
        assert_eq!(receipt.remaining_today, 2);
        let (_, tapped) = tap(&boosted, 1_000, &econ).unwrap();
        assert_eq!(tapped.gain, 2);
    }

    #[test]
    fn test_full_boost_refills() {
        let econ = EconomyConfig::default();
        let mut acct = fresh();
        acct.energy = 3;
        let (next, receipt) = activate_boost(&acct, BoostKind::Full, 1_000, &econ).unwrap();
        assert_eq!(next.energy, 500);
        assert_eq!(next.last_energy_update, 1_000);
        assert_eq!(receipt.used_today, 1);
    }

    #[test]
    fn test_daily_limit_then_rollover() {
        let econ = EconomyConfig::default();
        let mut acct = fresh();
        for _ in 0..3 {
            acct = activate_boost(&acct, BoostKind::Full, 1_000, &econ).unwrap().0;
        }
        assert_eq!(
            activate_boost(&acct, BoostKind::Full, 2_000, &econ).unwrap_err(),
            GameError::DailyLimitReached(BoostKind::Full)
        );
        let (next, receipt) = activate_boost(&acct, BoostKind::Full, DAY_MS + 1, &econ).unwrap();
        assert_eq!(receipt.used_today, 1);
        assert_eq!(next.daily.last_reset_date, day_of(DAY_MS + 1));
    }

    #[test]
    fn test_upgrade_multitap() {
        let econ = EconomyConfig::default();
        let mut acct = fresh();
        acct.points = 600;
        let (next, receipt) = upgrade(&acct, UpgradeKind::Multitap, 0, &econ).unwrap();
        assert_eq!(next.points, 0);
        assert_eq!(next.taps_per_click(), 2);
        assert_eq!(receipt.new_level, 1);
        assert_eq!(
            upgrade(&next, UpgradeKind::Multitap, 0, &econ).unwrap_err(),
            GameError::InsufficientFunds { cost: 1_500, balance: 0 }
        );
    }

    #[test]
    fn test_upgrade_at_cap() {
        let econ = EconomyConfig::default();
        let mut acct = fresh();
        acct.points = 1_000_000;
        acct.upgrade_levels.insert(UpgradeKind::TapBot, 1);
        assert_eq!(
            upgrade(&acct, UpgradeKind::TapBot, 0, &econ).unwrap_err(),
            GameError::MaxLevelReached(UpgradeKind::TapBot)
        );
    }

    #[test]
    fn test_heartbeat_first_today_once() {
        let (next, receipt) = heartbeat(&fresh(), 500).unwrap();
        assert!(receipt.first_today);
        let (again, receipt) = heartbeat(&next, 900).unwrap();
        assert!(!receipt.first_today);
        assert_eq!(again.last_active, 900);
        let (_, receipt) = heartbeat(&again, DAY_MS + 5).unwrap();
        assert!(receipt.first_today);
    }

    #[test]
    fn test_package_adds_x2() {
        let econ = EconomyConfig::default();
        let package = econ.package("boost_x2_2h").unwrap();
        let (next, receipt) = activate_package(&fresh(), package, 1_000).unwrap();
        assert_eq!(receipt.expires_at, 1_000 + 4 * 3_600_000);
        assert_eq!(economy::effect_multiplier(&next, 2_000, &econ), 2);
    }

    #[test]
    fn test_award_referral_credits_both() {
        let econ = EconomyConfig::default();
        let referred = Account::new("new", 0, 500, 1.2);
        let referrer = Account::new("old", 0, 500, 1.2);
        let (a, b, edge) = award_referral(&referred, &referrer, 10, &econ).unwrap();
        assert_eq!(a.points, 2_500);
        assert!(a.referral.awarded);
        assert_eq!(a.referral.referrer_id.as_deref(), Some("old"));
        assert_eq!(b.points, 500);
        assert_eq!(b.referral.referrals_count, 1);
        assert_eq!(b.referral.referral_bonus_total, 500);
        assert_eq!(edge.token, referral_token("old", "new"));
        assert_eq!(edge.token.len(), 64);
    }

    #[test]
    fn test_pending_referrer_is_sticky() {
        let (bound, outcome) = bind_pending(&fresh(), "ghost", 0).unwrap();
        assert_eq!(outcome, ReferralOutcome::Pending { referrer_id: "ghost".into() });
        let (same, outcome) = bind_pending(&bound, "other", 0).unwrap();
        assert_eq!(outcome, ReferralOutcome::Pending { referrer_id: "ghost".into() });
        assert_eq!(same.referral.referrer_id.as_deref(), Some("ghost"));
    }

    #[test]
    fn test_self_referral_invalid() {
        assert!(matches!(validate_referral("a", "a"), Err(GameError::InvalidReferral(_))));
        assert!(matches!(validate_referral("", "a"), Err(GameError::InvalidReferral(_))));
        assert!(validate_referral("a", "b").is_ok());
    }
}
