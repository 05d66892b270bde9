//! Store-wide counters updated alongside account transactions.
//!
//! Aggregates are best-effort. They are bumped after the account commit has
//! landed, a failure is logged and swallowed, and a crash between the two
//! writes leaves the totals short of the true sum over accounts. The account
//! transaction is never rolled back or delayed on their behalf beyond one
//! attempt; a circuit breaker stops even that while the backend is failing.

use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::logging::{log, obj, v_str, Domain, Level};
use crate::reliability::circuit::CircuitBreaker;
use crate::store::{AggregateStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateField {
    /// Points issued by taps and referral bonuses.
    TotalShareBalance,
    TotalTouches,
    TotalPlayers,
    TotalReferrals,
}

impl AggregateField {
    pub fn column(&self) -> &'static str {
        match self {
            AggregateField::TotalShareBalance => "total_share_balance",
            AggregateField::TotalTouches => "total_touches",
            AggregateField::TotalPlayers => "total_players",
            AggregateField::TotalReferrals => "total_referrals",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateCounters {
    pub total_share_balance: u64,
    pub total_touches: u64,
    pub total_players: u64,
    /// Distinct active users on `daily_date`.
    pub daily_users: u64,
    pub daily_date: Option<NaiveDate>,
    pub total_referrals: u64,
    pub updated_at: i64,
}

impl AggregateCounters {
    pub fn add(&mut self, field: AggregateField, delta: u64) {
        let slot = match field {
            AggregateField::TotalShareBalance => &mut self.total_share_balance,
            AggregateField::TotalTouches => &mut self.total_touches,
            AggregateField::TotalPlayers => &mut self.total_players,
            AggregateField::TotalReferrals => &mut self.total_referrals,
        };
        *slot = slot.saturating_add(delta);
    }

    pub fn add_daily_user(&mut self, day: NaiveDate) {
        if self.daily_date == Some(day) {
            self.daily_users = self.daily_users.saturating_add(1);
        } else {
            self.daily_date = Some(day);
            self.daily_users = 1;
        }
    }

    /// Daily actives as seen on `day`; a stale window reads as zero.
    pub fn daily_users_on(&self, day: NaiveDate) -> u64 {
        if self.daily_date == Some(day) {
            self.daily_users
        } else {
            0
        }
    }
}

/// Public leaderboard-style totals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalStats {
    pub total_share_balance: u64,
    pub total_touches: u64,
    pub total_players: u64,
    pub daily_users: u64,
    pub online_players: u64,
    pub total_referrals: u64,
}

/// Best-effort dispatcher in front of an [`AggregateStore`].
pub struct Aggregates {
    store: Arc<dyn AggregateStore>,
    breaker: Mutex<CircuitBreaker>,
}

impl Aggregates {
    pub fn new(store: Arc<dyn AggregateStore>, breaker_threshold: u32, breaker_cooldown_ms: i64) -> Self {
        Self {
            store,
            breaker: Mutex::new(CircuitBreaker::new(breaker_threshold, breaker_cooldown_ms)),
        }
    }

    pub async fn ensure_row(&self, now: i64) -> Result<bool, StoreError> {
        self.store.ensure_row(now).await
    }

    pub async fn snapshot(&self) -> Result<AggregateCounters, StoreError> {
        self.store.counters().await
    }

    /// Never fails; a dropped delta is logged.
    pub async fn bump(&self, field: AggregateField, delta: u64, now: i64) {
        if delta == 0 {
            return;
        }
        if !self.allow(now) {
            log_dropped(field.column(), delta, "circuit_open");
            return;
        }
        let result = self.store.increment(field, delta, now).await;
        self.settle(field.column(), delta, now, result);
    }

    pub async fn daily_user(&self, day: NaiveDate, now: i64) {
        if !self.allow(now) {
            log_dropped("daily_users", 1, "circuit_open");
            return;
        }
        let result = self.store.record_daily_user(day, now).await;
        self.settle("daily_users", 1, now, result);
    }

    fn allow(&self, now: i64) -> bool {
        match self.breaker.lock() {
            Ok(mut cb) => cb.allow(now),
            Err(_) => true,
        }
    }

    fn settle(&self, column: &str, delta: u64, now: i64, result: Result<(), StoreError>) {
        let Ok(mut cb) = self.breaker.lock() else {
            return;
        };
        match result {
            Ok(()) => cb.record_success(),
            Err(err) => {
                cb.record_failure(now);
                log(
                    Level::Warn,
                    Domain::Aggregate,
                    "increment_failed",
                    obj(&[
                        ("field", v_str(column)),
                        ("delta", json!(delta)),
                        ("error", v_str(&err.to_string())),
                        ("failures", json!(cb.failures)),
                    ]),
                );
            }
        }
    }
}

fn log_dropped(column: &str, delta: u64, reason: &str) {
    log(
        Level::Warn,
        Domain::Aggregate,
        "increment_dropped",
        obj(&[("field", v_str(column)), ("delta", json!(delta)), ("reason", v_str(reason))]),
    );
}
