//! Failure taxonomy reported to callers.
//!
//! Every variant maps to a stable snake_case `kind()` that the request layer
//! puts on the wire. Only `StoreConflict` is produced after internal retries;
//! all other kinds are terminal for the request and leave state unchanged.

use thiserror::Error;

use crate::account::{BoostKind, UpgradeKind};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GameError {
    #[error("account {0} not found")]
    AccountNotFound(String),

    #[error("malformed account id {0:?}")]
    InvalidAccountId(String),

    #[error("not enough energy: need {needed}, have {available}")]
    InsufficientEnergy { needed: u64, available: u64 },

    #[error("not enough points: upgrade costs {cost}, balance is {balance}")]
    InsufficientFunds { cost: u64, balance: u64 },

    #[error("unknown item {0:?}")]
    InvalidItem(String),

    #[error("{0} is already at max level")]
    MaxLevelReached(UpgradeKind),

    #[error("no {0} uses left today")]
    DailyLimitReached(BoostKind),

    #[error("invalid referral: {0}")]
    InvalidReferral(String),

    #[error("write conflict on {id} after {attempts} attempts")]
    StoreConflict { id: String, attempts: u32 },

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("invariant violated: {0}")]
    InvariantViolation(String),
}

impl GameError {
    pub fn kind(&self) -> &'static str {
        match self {
            GameError::AccountNotFound(_) => "account_not_found",
            GameError::InvalidAccountId(_) => "invalid_account_id",
            GameError::InsufficientEnergy { .. } => "insufficient_energy",
            GameError::InsufficientFunds { .. } => "insufficient_funds",
            GameError::InvalidItem(_) => "invalid_item",
            GameError::MaxLevelReached(_) => "max_level_reached",
            GameError::DailyLimitReached(_) => "daily_limit_reached",
            GameError::InvalidReferral(_) => "invalid_referral",
            GameError::StoreConflict { .. } => "store_conflict",
            GameError::StoreUnavailable(_) => "store_unavailable",
            GameError::InvariantViolation(_) => "invariant_violation",
        }
    }

    /// Business rejections, as opposed to infrastructure failures.
    pub fn is_rejection(&self) -> bool {
        !matches!(
            self,
            GameError::StoreConflict { .. } | GameError::StoreUnavailable(_) | GameError::InvariantViolation(_)
        )
    }
}

pub type GameResult<T> = Result<T, GameError>;
