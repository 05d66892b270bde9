//! SQLite-backed account and aggregate store.
//!
//! Accounts are stored as JSON documents next to a version column; every
//! write is `UPDATE .. WHERE version = ?` so a stale snapshot can never
//! overwrite a newer one.

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Transaction};

use super::{AccountStore, AggregateStore, CommitOutcome, StoreError, Versioned, Write};
use crate::account::{Account, ReferralEdge};
use crate::aggregate::{AggregateCounters, AggregateField};

const META_ID: &str = "counters";

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self { conn: Mutex::new(Connection::open_in_memory()?) })
    }

    pub fn init(&self) -> Result<(), StoreError> {
        self.conn()?.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                version INTEGER NOT NULL,
                last_active INTEGER NOT NULL,
                doc TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS accounts_last_active ON accounts (last_active);
            CREATE TABLE IF NOT EXISTS referrals (
                referred_id TEXT PRIMARY KEY,
                referrer_id TEXT NOT NULL,
                at INTEGER NOT NULL,
                token TEXT NOT NULL UNIQUE
            );
            CREATE INDEX IF NOT EXISTS referrals_by_referrer ON referrals (referrer_id, at);
            CREATE TABLE IF NOT EXISTS meta (
                id TEXT PRIMARY KEY,
                total_share_balance INTEGER NOT NULL DEFAULT 0,
                total_touches INTEGER NOT NULL DEFAULT 0,
                total_players INTEGER NOT NULL DEFAULT 0,
                daily_users INTEGER NOT NULL DEFAULT 0,
                daily_date TEXT,
                total_referrals INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL
            );
            COMMIT;",
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("sqlite connection lock poisoned".to_string()))
    }
}

fn encode(account: &Account) -> Result<String, StoreError> {
    serde_json::to_string(account).map_err(|e| StoreError::Corrupt { key: account.id.clone(), reason: e.to_string() })
}

fn decode(id: &str, doc: &str) -> Result<Account, StoreError> {
    serde_json::from_str(doc).map_err(|e| StoreError::Corrupt { key: id.to_string(), reason: e.to_string() })
}

/// Conditional update inside an open transaction; true if the row matched.
fn cas(tx: &Transaction<'_>, write: &Write) -> Result<bool, StoreError> {
    let changed = tx.execute(
        "UPDATE accounts SET version = version + 1, last_active = ?1, doc = ?2
         WHERE id = ?3 AND version = ?4",
        params![
            write.account.last_active,
            encode(&write.account)?,
            write.id(),
            write.expected_version as i64
        ],
    )?;
    Ok(changed == 1)
}

#[async_trait]
impl AccountStore for SqliteStore {
    async fn load(&self, id: &str) -> Result<Option<Versioned<Account>>, StoreError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT version, doc FROM accounts WHERE id = ?1",
                params![id],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;
        match row {
            Some((version, doc)) => Ok(Some(Versioned { value: decode(id, &doc)?, version: version as u64 })),
            None => Ok(None),
        }
    }

    async fn insert(&self, account: &Account) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "INSERT OR IGNORE INTO accounts (id, version, last_active, doc) VALUES (?1, 1, ?2, ?3)",
            params![account.id, account.last_active, encode(account)?],
        )?;
        Ok(changed == 1)
    }

    async fn commit(&self, write: &Write) -> Result<CommitOutcome, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        if !cas(&tx, write)? {
            return Ok(CommitOutcome::Conflict);
        }
        tx.commit()?;
        Ok(CommitOutcome::Committed { version: write.expected_version + 1 })
    }

    async fn commit_referral(
        &self,
        referred: &Write,
        referrer: &Write,
        edge: &ReferralEdge,
    ) -> Result<CommitOutcome, StoreError> {
        let mut conn = self.conn()?;
        // Dropping `tx` without commit rolls everything back.
        let tx = conn.transaction()?;
        if !cas(&tx, referred)? || !cas(&tx, referrer)? {
            return Ok(CommitOutcome::Conflict);
        }
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO referrals (referred_id, referrer_id, at, token) VALUES (?1, ?2, ?3, ?4)",
            params![edge.referred_id, edge.referrer_id, edge.at, edge.token],
        )?;
        if inserted != 1 {
            return Ok(CommitOutcome::Conflict);
        }
        tx.commit()?;
        Ok(CommitOutcome::Committed { version: referred.expected_version + 1 })
    }

    async fn referrals_by(&self, referrer_id: &str, limit: usize) -> Result<Vec<ReferralEdge>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT referrer_id, referred_id, at, token FROM referrals
             WHERE referrer_id = ?1 ORDER BY at DESC, rowid DESC LIMIT ?2",
        )?;
        let edges = stmt
            .query_map(params![referrer_id, limit as i64], |row| {
                Ok(ReferralEdge {
                    referrer_id: row.get(0)?,
                    referred_id: row.get(1)?,
                    at: row.get(2)?,
                    token: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(edges)
    }

    async fn count_active_since(&self, cutoff: i64) -> Result<u64, StoreError> {
        let conn = self.conn()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM accounts WHERE last_active > ?1",
            params![cutoff],
            |row| row.get(0),
        )?;
        Ok(n.max(0) as u64)
    }
}

#[async_trait]
impl AggregateStore for SqliteStore {
    async fn ensure_row(&self, now: i64) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "INSERT OR IGNORE INTO meta (id, updated_at) VALUES (?1, ?2)",
            params![META_ID, now],
        )?;
        Ok(changed == 1)
    }

    async fn increment(&self, field: AggregateField, delta: u64, now: i64) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let col = field.column();
        let sql = format!("UPDATE meta SET {col} = {col} + ?1, updated_at = ?2 WHERE id = ?3");
        let delta = i64::try_from(delta).map_err(|_| StoreError::Corrupt {
            key: format!("meta/{}", col),
            reason: format!("increment {} out of range", delta),
        })?;
        let changed = conn.execute(&sql, params![delta, now, META_ID])?;
        if changed == 0 {
            return Err(StoreError::Missing(format!("meta/{}", META_ID)));
        }
        Ok(())
    }

    async fn record_daily_user(&self, day: NaiveDate, now: i64) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE meta SET
                daily_users = CASE WHEN daily_date = ?1 THEN daily_users + 1 ELSE 1 END,
                daily_date = ?1,
                updated_at = ?2
             WHERE id = ?3",
            params![day.to_string(), now, META_ID],
        )?;
        if changed == 0 {
            return Err(StoreError::Missing(format!("meta/{}", META_ID)));
        }
        Ok(())
    }

    async fn counters(&self) -> Result<AggregateCounters, StoreError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT total_share_balance, total_touches, total_players, daily_users,
                        daily_date, total_referrals, updated_at
                 FROM meta WHERE id = ?1",
                params![META_ID],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, i64>(6)?,
                    ))
                },
            )
            .optional()?;
        let Some((share, touches, players, daily, daily_date, referrals, updated_at)) = row else {
            return Ok(AggregateCounters::default());
        };
        let daily_date = match daily_date {
            Some(s) => Some(s.parse::<NaiveDate>().map_err(|e| StoreError::Corrupt {
                key: format!("meta/{}", META_ID),
                reason: e.to_string(),
            })?),
            None => None,
        };
        Ok(AggregateCounters {
            total_share_balance: share as u64,
            total_touches: touches as u64,
            total_players: players as u64,
            daily_users: daily as u64,
            daily_date,
            total_referrals: referrals as u64,
            updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteStore {
        let store = SqliteStore::in_memory().unwrap();
        store.init().unwrap();
        store
    }

    #[tokio::test]
    async fn test_account_roundtrip_and_cas() {
        let store = store();
        let acct = Account::new("42", 1_000, 500, 1.2);
        assert!(store.insert(&acct).await.unwrap());
        assert!(!store.insert(&acct).await.unwrap());

        let loaded = store.load("42").await.unwrap().unwrap();
        assert_eq!(loaded.version, 1);
        assert_eq!(loaded.value, acct);

        let mut next = acct.clone();
        next.points = 7;
        let write = Write { account: next, expected_version: 1 };
        assert_eq!(store.commit(&write).await.unwrap(), CommitOutcome::Committed { version: 2 });
        assert_eq!(store.commit(&write).await.unwrap(), CommitOutcome::Conflict);
        assert_eq!(store.load("42").await.unwrap().unwrap().value.points, 7);
    }

    #[tokio::test]
    async fn test_referral_rolls_back_on_stale_referrer() {
        let store = store();
        store.insert(&Account::new("new", 0, 500, 1.2)).await.unwrap();
        store.insert(&Account::new("ref", 0, 500, 1.2)).await.unwrap();
        let mut referred = Account::new("new", 0, 500, 1.2);
        referred.points = 2_500;
        let referred = Write { account: referred, expected_version: 1 };
        let referrer = Write { account: Account::new("ref", 0, 500, 1.2), expected_version: 3 };
        let edge = ReferralEdge { referrer_id: "ref".into(), referred_id: "new".into(), at: 1, token: "t".into() };

        let out = store.commit_referral(&referred, &referrer, &edge).await.unwrap();
        assert_eq!(out, CommitOutcome::Conflict);
        let new = store.load("new").await.unwrap().unwrap();
        assert_eq!((new.version, new.value.points), (1, 0));
        assert!(store.referrals_by("ref", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_meta_counters() {
        let store = store();
        assert!(store.increment(AggregateField::TotalTouches, 1, 0).await.is_err());
        assert!(store.ensure_row(10).await.unwrap());
        assert!(!store.ensure_row(11).await.unwrap());
        store.increment(AggregateField::TotalTouches, 3, 12).await.unwrap();
        store.increment(AggregateField::TotalShareBalance, 6, 12).await.unwrap();

        let d1 = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        store.record_daily_user(d1, 13).await.unwrap();
        store.record_daily_user(d1, 13).await.unwrap();
        store.record_daily_user(d2, 14).await.unwrap();

        let c = store.counters().await.unwrap();
        assert_eq!(c.total_touches, 3);
        assert_eq!(c.total_share_balance, 6);
        assert_eq!(c.daily_users, 1);
        assert_eq!(c.daily_date, Some(d2));
        assert_eq!(c.updated_at, 14);
    }

    #[tokio::test]
    async fn test_oversized_increment_is_refused() {
        let store = store();
        store.ensure_row(1).await.unwrap();
        store.increment(AggregateField::TotalTouches, 2, 2).await.unwrap();
        let err = store.increment(AggregateField::TotalTouches, u64::MAX, 3).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
        let c = store.counters().await.unwrap();
        assert_eq!(c.total_touches, 2);
        assert_eq!(c.updated_at, 2);
    }
}
