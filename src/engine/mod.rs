//! Transaction engine.
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │   Request    │────►│   Reducer    │────►│ AccountStore │
//! │  (user id)   │     │  (pure fn)   │ CAS │ (versioned)  │
//! └──────────────┘     └──────────────┘     └──────────────┘
//!                                                  │ committed
//!                                                  ▼
//!                      ┌──────────────┐     ┌──────────────┐
//!                      │   Notifier   │◄────│  Aggregates  │
//!                      │ (spawned)    │     │ (best effort)│
//!                      └──────────────┘     └──────────────┘
//! ```
//!
//! Each operation is one read-modify-write on one account, retried on version
//! conflicts. Referral credit is the only multi-key write. Side effects run
//! after the commit and cannot change the reported result.

pub mod reducer;
pub mod views;

use std::sync::Arc;

use serde_json::json;

use crate::account::{Account, BoostKind, UpgradeKind};
use crate::aggregate::{AggregateField, Aggregates, GlobalStats};
use crate::clock::{day_of, Clock};
use crate::config::GameConfig;
use crate::error::{GameError, GameResult};
use crate::logging::{self, log, obj, v_str, Domain, Level, ProfileScope};
use crate::notify::{dispatch, Notification, Notifier};
use crate::store::retry::log_conflict;
use crate::store::{transact, AccountStore, AggregateStore, CommitOutcome, Versioned, Write};
use crate::verify::invariants::{assert_account_invariants, assert_referral_monotonic};

pub use views::{
    AccountStatus, BoostLevel, BoostReceipt, DailyInfo, HeartbeatReceipt, PackageReceipt, ReferralOutcome,
    ReferralSummary, TapReceipt, UpgradeReceipt,
};

pub struct GameEngine {
    store: Arc<dyn AccountStore>,
    aggregates: Aggregates,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    config: GameConfig,
}

impl GameEngine {
    pub fn new(
        store: Arc<dyn AccountStore>,
        aggregate_store: Arc<dyn AggregateStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        config: GameConfig,
    ) -> Self {
        let aggregates = Aggregates::new(aggregate_store, config.breaker_threshold, config.breaker_cooldown_ms);
        Self { store, aggregates, notifier, clock, config }
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    /// Create the global counters row if absent. Called once at startup.
    pub async fn init(&self) -> GameResult<()> {
        let now = self.clock.now_ms();
        let created = self.aggregates.ensure_row(now).await?;
        log(
            Level::Info,
            Domain::System,
            "aggregates_ready",
            obj(&[("created", json!(created))]),
        );
        Ok(())
    }

    // =========================================================================
    // Account lifecycle
    // =========================================================================

    /// Insert the default record if absent. Returns true if it was created.
    pub async fn ensure_account(&self, user_id: &str) -> GameResult<bool> {
        if user_id.trim().is_empty() {
            return self.observe("ensure_account", user_id, Err(GameError::InvalidAccountId(user_id.to_string())));
        }
        let now = self.clock.now_ms();
        let econ = &self.config.economy;
        let account = Account::new(user_id, now, econ.base_max_energy, econ.base_regen_rate);
        let created = self.store.insert(&account).await?;
        if created {
            self.aggregates.bump(AggregateField::TotalPlayers, 1, now).await;
            log(
                Level::Info,
                Domain::Audit,
                "account_created",
                obj(&[("user_id", v_str(user_id))]),
            );
        }
        Ok(created)
    }

    // =========================================================================
    // Mutating operations
    // =========================================================================

    pub async fn tap(&self, user_id: &str) -> GameResult<TapReceipt> {
        let _scope = ProfileScope::with_context("tap", &[("user_id", v_str(user_id))]);
        let now = self.clock.now_ms();
        let econ = &self.config.economy;
        let result = transact(self.store.as_ref(), &self.config.retry, "tap", user_id, |current| {
            reducer::tap(current, now, econ)
        })
        .await;
        let done = self.observe("tap", user_id, result)?;

        logging::log_tap(user_id, done.output.gain, done.output.energy, done.version);
        self.aggregates.bump(AggregateField::TotalTouches, 1, now).await;
        self.aggregates.bump(AggregateField::TotalShareBalance, done.output.gain, now).await;
        Ok(done.output)
    }

    pub async fn activate_boost(&self, user_id: &str, kind: BoostKind) -> GameResult<BoostReceipt> {
        let _scope = ProfileScope::with_context("activate_boost", &[("user_id", v_str(user_id))]);
        let now = self.clock.now_ms();
        let econ = &self.config.economy;
        let result = transact(self.store.as_ref(), &self.config.retry, "activate_boost", user_id, |current| {
            reducer::activate_boost(current, kind, now, econ)
        })
        .await;
        let done = self.observe("activate_boost", user_id, result)?;

        logging::log_boost(user_id, kind.as_str(), done.output.used_today, done.version);
        Ok(done.output)
    }

    /// `item` is the wire name of an upgrade kind.
    pub async fn upgrade_item(&self, user_id: &str, item: &str) -> GameResult<UpgradeReceipt> {
        let Some(kind) = UpgradeKind::parse(item) else {
            return self.observe("upgrade_item", user_id, Err(GameError::InvalidItem(item.to_string())));
        };
        self.upgrade(user_id, kind).await
    }

    pub async fn upgrade(&self, user_id: &str, kind: UpgradeKind) -> GameResult<UpgradeReceipt> {
        let _scope = ProfileScope::with_context("upgrade", &[("user_id", v_str(user_id))]);
        let now = self.clock.now_ms();
        let econ = &self.config.economy;
        let result = transact(self.store.as_ref(), &self.config.retry, "upgrade_item", user_id, |current| {
            reducer::upgrade(current, kind, now, econ)
        })
        .await;
        let done = self.observe("upgrade_item", user_id, result)?;

        // Taps may have landed since our commit; report what is stored now.
        let mut receipt = done.output;
        receipt.points = match self.store.load(user_id).await {
            Ok(Some(fresh)) => fresh.value.points,
            _ => done.account.points,
        };
        logging::log_upgrade(user_id, kind.as_str(), receipt.new_level, receipt.cost, receipt.points);
        Ok(receipt)
    }

    pub async fn register_referral(&self, new_user_id: &str, referrer_id: &str) -> GameResult<ReferralOutcome> {
        let _scope = ProfileScope::with_context("register_referral", &[("user_id", v_str(new_user_id))]);
        let result = self.referral_inner(new_user_id, referrer_id).await;
        let outcome = self.observe("register_referral", new_user_id, result)?;
        logging::log_referral(new_user_id, outcome.referrer_id(), outcome.as_str());
        Ok(outcome)
    }

    async fn referral_inner(&self, new_user_id: &str, referrer_id: &str) -> GameResult<ReferralOutcome> {
        reducer::validate_referral(new_user_id, referrer_id)?;
        let now = self.clock.now_ms();
        let econ = &self.config.economy;
        let policy = &self.config.retry;
        let attempts = policy.attempts();

        for attempt in 0..attempts {
            let referred = self.load(new_user_id).await?;
            if let Some(outcome) = reducer::settled_referral(&referred.value) {
                return Ok(outcome);
            }

            let Some(referrer) = self.store.load(referrer_id).await? else {
                let done = transact(self.store.as_ref(), policy, "register_referral", new_user_id, |current| {
                    reducer::bind_pending(current, referrer_id, now)
                })
                .await?;
                return Ok(done.output);
            };

            let (next_referred, next_referrer, edge) =
                reducer::award_referral(&referred.value, &referrer.value, now, econ)?;
            assert_referral_monotonic(&referred.value, &next_referred)
                .and_then(|_| assert_account_invariants(&next_referred))
                .map_err(|v| GameError::InvariantViolation(v.msg))?;

            let referred_write = Write { account: next_referred, expected_version: referred.version };
            let referrer_write = Write { account: next_referrer, expected_version: referrer.version };
            match self.store.commit_referral(&referred_write, &referrer_write, &edge).await? {
                CommitOutcome::Committed { .. } => {
                    let gift = econ.first_time_gift;
                    let bonus = econ.referrer_bonus;
                    self.aggregates
                        .bump(AggregateField::TotalShareBalance, gift.saturating_add(bonus), now)
                        .await;
                    self.aggregates.bump(AggregateField::TotalReferrals, 1, now).await;
                    dispatch(
                        &self.notifier,
                        vec![
                            Notification::ReferralWelcome {
                                user_id: new_user_id.to_string(),
                                referrer_id: referrer_id.to_string(),
                                gift,
                            },
                            Notification::ReferralCredited {
                                user_id: referrer_id.to_string(),
                                referred_id: new_user_id.to_string(),
                                bonus,
                            },
                        ],
                    );
                    return Ok(ReferralOutcome::Awarded { referrer_id: referrer_id.to_string(), gift, bonus });
                }
                CommitOutcome::Conflict => {
                    if attempt + 1 < attempts {
                        let delay = policy.delay_for_attempt(attempt);
                        log_conflict(new_user_id, "register_referral", attempt, policy, delay);
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(GameError::StoreConflict { id: new_user_id.to_string(), attempts })
    }

    pub async fn heartbeat(&self, user_id: &str) -> GameResult<HeartbeatReceipt> {
        let _scope = ProfileScope::with_context("heartbeat", &[("user_id", v_str(user_id))]);
        let now = self.clock.now_ms();
        let result = transact(self.store.as_ref(), &self.config.retry, "heartbeat", user_id, |current| {
            reducer::heartbeat(current, now)
        })
        .await;
        let done = self.observe("heartbeat", user_id, result)?;

        if done.output.first_today {
            self.aggregates.daily_user(done.output.day, now).await;
            log(
                Level::Debug,
                Domain::Presence,
                "daily_active",
                obj(&[("user_id", v_str(user_id)), ("day", v_str(&done.output.day.to_string()))]),
            );
        }
        logging::tick_aggregator();
        Ok(done.output)
    }

    /// Activate a paid x2 package once payment is confirmed upstream.
    pub async fn activate_package(&self, user_id: &str, package_id: &str) -> GameResult<PackageReceipt> {
        let _scope = ProfileScope::with_context("activate_package", &[("user_id", v_str(user_id))]);
        let econ = &self.config.economy;
        let Some(package) = econ.package(package_id) else {
            return self.observe("activate_package", user_id, Err(GameError::InvalidItem(package_id.to_string())));
        };
        let now = self.clock.now_ms();
        let result = transact(self.store.as_ref(), &self.config.retry, "activate_package", user_id, |current| {
            reducer::activate_package(current, package, now)
        })
        .await;
        let done = self.observe("activate_package", user_id, result)?;

        log(
            Level::Info,
            Domain::Boost,
            "package_activated",
            obj(&[
                ("user_id", v_str(user_id)),
                ("kind", v_str(package.id)),
                ("expires_at", json!(done.output.expires_at)),
                ("version", json!(done.version)),
            ]),
        );
        dispatch(
            &self.notifier,
            vec![Notification::PackageActivated {
                user_id: user_id.to_string(),
                package: done.output.package.clone(),
                expires_at: done.output.expires_at,
            }],
        );
        Ok(done.output)
    }

    // =========================================================================
    // Read-only queries (never persist)
    // =========================================================================

    pub async fn status(&self, user_id: &str) -> GameResult<AccountStatus> {
        let account = self.load(user_id).await?;
        Ok(AccountStatus::of(&account.value, self.clock.now_ms()))
    }

    pub async fn boost_levels(&self, user_id: &str) -> GameResult<Vec<BoostLevel>> {
        let account = self.load(user_id).await?;
        Ok(views::boost_levels_of(&account.value, &self.config.economy))
    }

    pub async fn daily_info(&self, user_id: &str) -> GameResult<DailyInfo> {
        let account = self.load(user_id).await?;
        Ok(DailyInfo::of(&account.value, self.clock.now_ms(), &self.config.economy))
    }

    pub async fn referral_summary(&self, user_id: &str) -> GameResult<ReferralSummary> {
        let account = self.load(user_id).await?;
        let referrals = self.store.referrals_by(user_id, self.config.referral_list_limit).await?;
        let referral = &account.value.referral;
        Ok(ReferralSummary {
            user_id: user_id.to_string(),
            referrer_id: referral.referrer_id.clone(),
            awarded: referral.awarded,
            referrals_count: referral.referrals_count,
            referral_bonus_total: referral.referral_bonus_total,
            referrals,
        })
    }

    pub async fn global_stats(&self) -> GameResult<GlobalStats> {
        let now = self.clock.now_ms();
        let counters = self.aggregates.snapshot().await?;
        let online_players = self
            .store
            .count_active_since(now.saturating_sub(self.config.online_window_ms))
            .await?;
        Ok(GlobalStats {
            total_share_balance: counters.total_share_balance,
            total_touches: counters.total_touches,
            total_players: counters.total_players,
            daily_users: counters.daily_users_on(day_of(now)),
            online_players,
            total_referrals: counters.total_referrals,
        })
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn load(&self, user_id: &str) -> GameResult<Versioned<Account>> {
        self.store
            .load(user_id)
            .await?
            .ok_or_else(|| GameError::AccountNotFound(user_id.to_string()))
    }

    fn observe<T>(&self, op: &str, user_id: &str, result: GameResult<T>) -> GameResult<T> {
        if let Err(err) = &result {
            if err.is_rejection() {
                logging::log_rejection(op, user_id, err.kind(), &err.to_string());
            } else {
                log(
                    Level::Error,
                    Domain::Store,
                    "operation_failed",
                    obj(&[
                        ("op", v_str(op)),
                        ("user_id", v_str(user_id)),
                        ("kind", v_str(err.kind())),
                        ("error", v_str(&err.to_string())),
                    ]),
                );
            }
        }
        result
    }
}
