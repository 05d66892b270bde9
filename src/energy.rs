//! Lazy energy regeneration.
//!
//! Energy is never ticked by a timer. The stored triple
//! `(energy, last_energy_update, regen_rate)` is enough to recompute the current
//! value at any instant:
//!
//! ```text
//! current = min(max_energy, floor(stored + elapsed_secs * regen_rate))
//! ```
//!
//! Reads call [`current_energy`] and persist nothing; transactions call
//! [`settle`] when they need the post-state written back.

use crate::account::Account;

/// Energy at `now` without mutating the account.
pub fn current_energy(account: &Account, now: i64) -> u64 {
    regenerate(
        account.energy,
        account.max_energy,
        account.regen_rate,
        account.last_energy_update,
        now,
    )
}

pub fn regenerate(stored: u64, max_energy: u64, regen_rate: f64, since: i64, now: i64) -> u64 {
    let elapsed_ms = now.saturating_sub(since).max(0);
    let rate = if regen_rate.is_finite() && regen_rate > 0.0 { regen_rate } else { 0.0 };
    let raw = (stored as f64 + (elapsed_ms as f64 / 1000.0) * rate).floor();
    if raw >= max_energy as f64 {
        max_energy
    } else {
        (raw.max(0.0) as u64).min(max_energy)
    }
}

/// Materialize regenerated energy into the record and move the snapshot to `now`.
///
/// A clock that runs backwards leaves the snapshot where it was.
pub fn settle(account: &mut Account, now: i64) -> u64 {
    let energy = current_energy(account, now);
    account.energy = energy;
    account.last_energy_update = account.last_energy_update.max(now);
    energy
}

/// Seconds until the pool is full again, `None` if it never refills.
pub fn secs_to_full(account: &Account, now: i64) -> Option<u64> {
    let current = current_energy(account, now);
    if current >= account.max_energy {
        return Some(0);
    }
    if !(account.regen_rate.is_finite() && account.regen_rate > 0.0) {
        return None;
    }
    let missing = (account.max_energy - current) as f64;
    Some((missing / account.regen_rate).ceil() as u64)
}
