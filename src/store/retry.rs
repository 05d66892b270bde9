use rand::Rng;
use tokio::time::{sleep, Duration};

use super::{AccountStore, CommitOutcome, Write};
use crate::account::Account;
use crate::error::{GameError, GameResult};
use crate::logging::{log, obj, v_str, Domain, Level};
use crate::verify::invariants::{assert_account_invariants, assert_daily_monotonic, assert_referral_monotonic};
use serde_json::json;

/// Bounded optimistic-retry configuration
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_delay_ms: 2,
            max_delay_ms: 200,
            jitter_factor: 0.3,
        }
    }
}

impl RetryPolicy {
    /// Calculate delay with exponential backoff and jitter
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay_ms as f64 * 2.0_f64.powi(attempt.min(30) as i32);
        let clamped = base.min(self.max_delay_ms as f64);

        // Jitter spreads contending writers apart
        let jitter_range = clamped * self.jitter_factor;
        let jitter: f64 = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };
        let final_delay = (clamped + jitter).max(0.0);

        Duration::from_millis(final_delay as u64)
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// A transaction that made it to storage.
#[derive(Debug, Clone)]
pub struct Committed<R> {
    pub account: Account,
    pub version: u64,
    pub output: R,
}

pub(crate) fn log_conflict(id: &str, op: &str, attempt: u32, policy: &RetryPolicy, delay: Duration) {
    log(
        Level::Debug,
        Domain::Store,
        "commit_conflict",
        obj(&[
            ("user_id", v_str(id)),
            ("op", v_str(op)),
            ("attempt", json!(attempt + 1)),
            ("max_attempts", json!(policy.attempts())),
            ("backoff_ms", json!(delay.as_millis() as u64)),
        ]),
    );
}

/// Single-record read-modify-write with compare-and-swap.
///
/// `apply` receives the current record and returns the next record plus an
/// output, or a terminal error. It may run several times, so it must be a pure
/// function of its input. Rejections are returned as-is without writing.
pub async fn transact<R, F>(
    store: &dyn AccountStore,
    policy: &RetryPolicy,
    op: &str,
    id: &str,
    mut apply: F,
) -> GameResult<Committed<R>>
where
    F: FnMut(&Account) -> GameResult<(Account, R)> + Send,
    R: Send,
{
    let attempts = policy.attempts();
    for attempt in 0..attempts {
        let current = store
            .load(id)
            .await?
            .ok_or_else(|| GameError::AccountNotFound(id.to_string()))?;

        let (next, output) = apply(&current.value)?;
        assert_account_invariants(&next)
            .and_then(|_| assert_referral_monotonic(&current.value, &next))
            .and_then(|_| assert_daily_monotonic(&current.value, &next))
            .map_err(|v| GameError::InvariantViolation(v.msg))?;

        let write = Write { account: next, expected_version: current.version };
        match store.commit(&write).await? {
            CommitOutcome::Committed { version } => {
                return Ok(Committed { account: write.account, version, output });
            }
            CommitOutcome::Conflict => {
                if attempt + 1 < attempts {
                    let delay = policy.delay_for_attempt(attempt);
                    log_conflict(id, op, attempt, policy, delay);
                    sleep(delay).await;
                }
            }
        }
    }

    Err(GameError::StoreConflict { id: id.to_string(), attempts })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::fault::FaultProfile;
    use crate::store::MemoryStore;

    #[test]
    fn test_delay_calculation() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay_ms: 100,
            max_delay_ms: 1000,
            jitter_factor: 0.0, // no jitter for deterministic test
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(1000)); // clamped
    }

    #[tokio::test]
    async fn test_transact_missing_account() {
        let store = MemoryStore::new();
        let result: GameResult<Committed<()>> =
            transact(&store, &RetryPolicy::default(), "test", "ghost", |a| Ok((a.clone(), ()))).await;
        assert_eq!(result.unwrap_err(), GameError::AccountNotFound("ghost".into()));
    }

    #[tokio::test]
    async fn test_transact_bumps_version() {
        let store = MemoryStore::new();
        store.insert(&Account::new("a", 0, 500, 1.2)).await.unwrap();
        let done = transact(&store, &RetryPolicy::default(), "test", "a", |a| {
            let mut next = a.clone();
            next.points += 5;
            Ok((next, ()))
        })
        .await
        .unwrap();
        assert_eq!(done.version, 2);
        assert_eq!(store.load("a").await.unwrap().unwrap().value.points, 5);
    }

    #[tokio::test]
    async fn test_transact_retries_through_conflicts() {
        let store = MemoryStore::with_faults(FaultProfile { forced_conflicts: 3, ..FaultProfile::disabled() });
        store.insert(&Account::new("a", 0, 500, 1.2)).await.unwrap();
        let policy = RetryPolicy { base_delay_ms: 1, ..Default::default() };

        let counter = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let calls = counter.clone();
        let done = transact(&store, &policy, "test", "a", move |a| {
            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let mut next = a.clone();
            next.points += 1;
            Ok((next, ()))
        })
        .await
        .unwrap();

        assert_eq!(done.account.points, 1);
        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_transact_gives_up() {
        let store = MemoryStore::with_faults(FaultProfile { forced_conflicts: 100, ..FaultProfile::disabled() });
        store.insert(&Account::new("a", 0, 500, 1.2)).await.unwrap();
        let policy = RetryPolicy { max_attempts: 3, base_delay_ms: 1, ..Default::default() };
        let result = transact(&store, &policy, "test", "a", |a| Ok((a.clone(), ()))).await;
        assert_eq!(result.unwrap_err(), GameError::StoreConflict { id: "a".into(), attempts: 3 });
        assert_eq!(store.load("a").await.unwrap().unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_outage_is_terminal() {
        let store = MemoryStore::with_faults(FaultProfile::account_outage());
        store.insert(&Account::new("a", 0, 500, 1.2)).await.unwrap();
        let policy = RetryPolicy { base_delay_ms: 1, ..Default::default() };

        let counter = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let calls = counter.clone();
        let result = transact(&store, &policy, "test", "a", move |a| {
            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok((a.clone(), ()))
        })
        .await;

        assert_eq!(result.unwrap_err().kind(), "store_unavailable");
        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(store.load("a").await.unwrap().unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_rejection_writes_nothing() {
        let store = MemoryStore::new();
        store.insert(&Account::new("a", 0, 500, 1.2)).await.unwrap();
        let result: GameResult<Committed<()>> = transact(&store, &RetryPolicy::default(), "test", "a", |_| {
            Err(GameError::InvalidItem("nope".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(store.load("a").await.unwrap().unwrap().version, 1);
    }
}
