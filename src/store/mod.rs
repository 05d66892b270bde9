//! Persistence capabilities the engine consumes.
//!
//! The engine never mutates shared state in place. It loads a versioned copy,
//! derives the next value and asks the store to commit it only if the version
//! is unchanged. Any backend with per-key compare-and-swap (or serializable
//! transactions) satisfies [`AccountStore`].

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use crate::account::{Account, ReferralEdge};
use crate::aggregate::{AggregateCounters, AggregateField};
use crate::error::GameError;

pub mod fault;
pub mod memory;
pub mod retry;
pub mod sqlite;

pub use memory::MemoryStore;
pub use retry::{transact, Committed, RetryPolicy};
pub use sqlite::SqliteStore;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("corrupt record {key}: {reason}")]
    Corrupt { key: String, reason: String },
    #[error("missing row {0}")]
    Missing(String),
}

impl From<StoreError> for GameError {
    fn from(err: StoreError) -> Self {
        GameError::StoreUnavailable(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: u64,
}

/// Conditional write: applies only if the stored version still equals
/// `expected_version`.
#[derive(Debug, Clone)]
pub struct Write {
    pub account: Account,
    pub expected_version: u64,
}

impl Write {
    pub fn id(&self) -> &str {
        &self.account.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed { version: u64 },
    /// Someone else committed first; reload and retry.
    Conflict,
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn load(&self, id: &str) -> Result<Option<Versioned<Account>>, StoreError>;

    /// Insert at version 1. Returns false if the id already exists.
    async fn insert(&self, account: &Account) -> Result<bool, StoreError>;

    async fn commit(&self, write: &Write) -> Result<CommitOutcome, StoreError>;

    /// Commit both accounts and append the edge as one unit, or nothing at all.
    async fn commit_referral(
        &self,
        referred: &Write,
        referrer: &Write,
        edge: &ReferralEdge,
    ) -> Result<CommitOutcome, StoreError>;

    /// Newest first.
    async fn referrals_by(&self, referrer_id: &str, limit: usize) -> Result<Vec<ReferralEdge>, StoreError>;

    /// Accounts with `last_active > cutoff`.
    async fn count_active_since(&self, cutoff: i64) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait AggregateStore: Send + Sync {
    /// Create the counters row if absent. Returns true if it was created.
    async fn ensure_row(&self, now: i64) -> Result<bool, StoreError>;

    async fn increment(&self, field: AggregateField, delta: u64, now: i64) -> Result<(), StoreError>;

    /// Count one daily active user on `day`, restarting the window on a new day.
    async fn record_daily_user(&self, day: NaiveDate, now: i64) -> Result<(), StoreError>;

    async fn counters(&self) -> Result<AggregateCounters, StoreError>;
}
