//! In-process reference backend.
//!
//! Records live behind a single lock that is held only for the duration of a
//! load or a compare-and-swap, never across an `await`, so concurrent
//! transactions genuinely race and exercise the optimistic retry path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::NaiveDate;

use super::fault::{should_fault, FaultProfile};
use super::{AccountStore, AggregateStore, CommitOutcome, StoreError, Versioned, Write};
use crate::account::{Account, ReferralEdge};
use crate::aggregate::{AggregateCounters, AggregateField};

#[derive(Debug, Default)]
struct Tables {
    accounts: HashMap<String, Versioned<Account>>,
    /// Append-only, in insertion order.
    edges: Vec<ReferralEdge>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    counters: Mutex<Option<AggregateCounters>>,
    faults: FaultProfile,
    commit_seq: AtomicU64,
    outage_seq: AtomicU64,
    aggregate_seq: AtomicU64,
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Unavailable("memory store lock poisoned".to_string())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_faults(faults: FaultProfile) -> Self {
        Self { faults, ..Self::default() }
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables.lock().map_err(poisoned)
    }

    /// Number of aggregate writes that reached this store, failed or not.
    pub fn aggregate_attempts(&self) -> u64 {
        self.aggregate_seq.load(Ordering::SeqCst)
    }

    fn injected_conflict(&self) -> bool {
        let seq = self.commit_seq.fetch_add(1, Ordering::SeqCst);
        seq < u64::from(self.faults.forced_conflicts) || should_fault(seq, self.faults.conflict_rate)
    }

    fn injected_outage(&self) -> Result<(), StoreError> {
        let seq = self.outage_seq.fetch_add(1, Ordering::SeqCst);
        if should_fault(seq, self.faults.commit_failure_rate) {
            return Err(StoreError::Unavailable("injected commit failure".to_string()));
        }
        Ok(())
    }

    fn injected_aggregate_failure(&self) -> Result<(), StoreError> {
        let seq = self.aggregate_seq.fetch_add(1, Ordering::SeqCst);
        if should_fault(seq, self.faults.aggregate_failure_rate) {
            return Err(StoreError::Unavailable("injected aggregate failure".to_string()));
        }
        Ok(())
    }

    fn with_counters<R>(&self, f: impl FnOnce(&mut AggregateCounters) -> R) -> Result<R, StoreError> {
        let mut guard = self.counters.lock().map_err(poisoned)?;
        let counters = guard.get_or_insert_with(AggregateCounters::default);
        Ok(f(counters))
    }
}

fn version_matches(tables: &Tables, write: &Write) -> bool {
    tables
        .accounts
        .get(write.id())
        .map(|current| current.version == write.expected_version)
        .unwrap_or(false)
}

fn apply(tables: &mut Tables, write: &Write) -> u64 {
    let version = write.expected_version + 1;
    tables
        .accounts
        .insert(write.id().to_string(), Versioned { value: write.account.clone(), version });
    version
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn load(&self, id: &str) -> Result<Option<Versioned<Account>>, StoreError> {
        Ok(self.tables()?.accounts.get(id).cloned())
    }

    async fn insert(&self, account: &Account) -> Result<bool, StoreError> {
        let mut tables = self.tables()?;
        if tables.accounts.contains_key(&account.id) {
            return Ok(false);
        }
        tables
            .accounts
            .insert(account.id.clone(), Versioned { value: account.clone(), version: 1 });
        Ok(true)
    }

    async fn commit(&self, write: &Write) -> Result<CommitOutcome, StoreError> {
        self.injected_outage()?;
        if self.injected_conflict() {
            return Ok(CommitOutcome::Conflict);
        }
        let mut tables = self.tables()?;
        if !version_matches(&tables, write) {
            return Ok(CommitOutcome::Conflict);
        }
        let version = apply(&mut tables, write);
        Ok(CommitOutcome::Committed { version })
    }

    async fn commit_referral(
        &self,
        referred: &Write,
        referrer: &Write,
        edge: &ReferralEdge,
    ) -> Result<CommitOutcome, StoreError> {
        self.injected_outage()?;
        if self.injected_conflict() {
            return Ok(CommitOutcome::Conflict);
        }
        let mut tables = self.tables()?;
        let duplicate_edge = tables.edges.iter().any(|e| e.referred_id == edge.referred_id);
        if duplicate_edge || !version_matches(&tables, referred) || !version_matches(&tables, referrer) {
            return Ok(CommitOutcome::Conflict);
        }
        let version = apply(&mut tables, referred);
        apply(&mut tables, referrer);
        tables.edges.push(edge.clone());
        Ok(CommitOutcome::Committed { version })
    }

    async fn referrals_by(&self, referrer_id: &str, limit: usize) -> Result<Vec<ReferralEdge>, StoreError> {
        let tables = self.tables()?;
        let mut edges: Vec<ReferralEdge> = tables
            .edges
            .iter()
            .filter(|e| e.referrer_id == referrer_id)
            .cloned()
            .collect();
        // Stable sort keeps insertion order for equal timestamps; reverse puts newest first.
        edges.sort_by_key(|e| e.at);
        edges.reverse();
        edges.truncate(limit);
        Ok(edges)
    }

    async fn count_active_since(&self, cutoff: i64) -> Result<u64, StoreError> {
        let tables = self.tables()?;
        Ok(tables.accounts.values().filter(|v| v.value.last_active > cutoff).count() as u64)
    }
}

#[async_trait]
impl AggregateStore for MemoryStore {
    async fn ensure_row(&self, now: i64) -> Result<bool, StoreError> {
        let mut guard = self.counters.lock().map_err(poisoned)?;
        if guard.is_some() {
            return Ok(false);
        }
        *guard = Some(AggregateCounters { updated_at: now, ..AggregateCounters::default() });
        Ok(true)
    }

    async fn increment(&self, field: AggregateField, delta: u64, now: i64) -> Result<(), StoreError> {
        self.injected_aggregate_failure()?;
        self.with_counters(|c| {
            c.add(field, delta);
            c.updated_at = now;
        })
    }

    async fn record_daily_user(&self, day: NaiveDate, now: i64) -> Result<(), StoreError> {
        self.injected_aggregate_failure()?;
        self.with_counters(|c| {
            c.add_daily_user(day);
            c.updated_at = now;
        })
    }

    async fn counters(&self) -> Result<AggregateCounters, StoreError> {
        self.with_counters(|c| c.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(id: &str) -> Account {
        Account::new(id, 0, 500, 1.2)
    }

    fn edge(referrer: &str, referred: &str, at: i64) -> ReferralEdge {
        ReferralEdge {
            referrer_id: referrer.into(),
            referred_id: referred.into(),
            at,
            token: format!("{}:{}", referrer, referred),
        }
    }

    #[tokio::test]
    async fn test_insert_is_idempotent() {
        let store = MemoryStore::new();
        assert!(store.insert(&account("a")).await.unwrap());
        assert!(!store.insert(&account("a")).await.unwrap());
        assert_eq!(store.load("a").await.unwrap().unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_stale_commit_conflicts() {
        let store = MemoryStore::new();
        store.insert(&account("a")).await.unwrap();
        let mut next = account("a");
        next.points = 10;
        let first = Write { account: next.clone(), expected_version: 1 };
        assert_eq!(store.commit(&first).await.unwrap(), CommitOutcome::Committed { version: 2 });
        // Same snapshot again: must not overwrite.
        next.points = 99;
        let stale = Write { account: next, expected_version: 1 };
        assert_eq!(store.commit(&stale).await.unwrap(), CommitOutcome::Conflict);
        assert_eq!(store.load("a").await.unwrap().unwrap().value.points, 10);
    }

    #[tokio::test]
    async fn test_account_outage_fails_commits_only() {
        let store = MemoryStore::with_faults(FaultProfile::account_outage());
        assert!(store.insert(&account("a")).await.unwrap());
        let write = Write { account: account("a"), expected_version: 1 };
        assert!(matches!(store.commit(&write).await, Err(StoreError::Unavailable(_))));
        assert!(matches!(
            store.commit_referral(&write, &write, &edge("a", "b", 1)).await,
            Err(StoreError::Unavailable(_))
        ));
        assert_eq!(store.load("a").await.unwrap().unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_commit_missing_conflicts() {
        let store = MemoryStore::new();
        let write = Write { account: account("ghost"), expected_version: 1 };
        assert_eq!(store.commit(&write).await.unwrap(), CommitOutcome::Conflict);
        assert!(store.load("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_referral_commit_is_all_or_nothing() {
        let store = MemoryStore::new();
        store.insert(&account("new")).await.unwrap();
        store.insert(&account("ref")).await.unwrap();

        let referred = Write { account: account("new"), expected_version: 1 };
        let stale_referrer = Write { account: account("ref"), expected_version: 7 };
        let out = store.commit_referral(&referred, &stale_referrer, &edge("ref", "new", 1)).await.unwrap();
        assert_eq!(out, CommitOutcome::Conflict);
        assert_eq!(store.load("new").await.unwrap().unwrap().version, 1);
        assert!(store.referrals_by("ref", 10).await.unwrap().is_empty());

        let referrer = Write { account: account("ref"), expected_version: 1 };
        let out = store.commit_referral(&referred, &referrer, &edge("ref", "new", 1)).await.unwrap();
        assert_eq!(out, CommitOutcome::Committed { version: 2 });
        assert_eq!(store.load("ref").await.unwrap().unwrap().version, 2);
        assert_eq!(store.referrals_by("ref", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_referrals_newest_first() {
        let store = MemoryStore::new();
        for id in ["a", "b", "c", "ref"] {
            store.insert(&account(id)).await.unwrap();
        }
        for (i, id) in ["a", "b", "c"].iter().enumerate() {
            let referred = Write { account: account(id), expected_version: 1 };
            let current = store.load("ref").await.unwrap().unwrap();
            let referrer = Write { account: account("ref"), expected_version: current.version };
            store
                .commit_referral(&referred, &referrer, &edge("ref", id, i as i64 * 10))
                .await
                .unwrap();
        }
        let edges = store.referrals_by("ref", 2).await.unwrap();
        let ids: Vec<&str> = edges.iter().map(|e| e.referred_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b"]);
    }

    #[tokio::test]
    async fn test_count_active_since() {
        let store = MemoryStore::new();
        let mut a = account("a");
        a.last_active = 100;
        let mut b = account("b");
        b.last_active = 50;
        store.insert(&a).await.unwrap();
        store.insert(&b).await.unwrap();
        assert_eq!(store.count_active_since(60).await.unwrap(), 1);
        assert_eq!(store.count_active_since(0).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_ensure_row_once() {
        let store = MemoryStore::new();
        assert!(store.ensure_row(5).await.unwrap());
        assert!(!store.ensure_row(6).await.unwrap());
        assert_eq!(store.counters().await.unwrap().updated_at, 5);
    }
}
