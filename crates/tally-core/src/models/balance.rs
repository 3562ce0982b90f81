//! Token balance model
//!
//! Each user owns exactly one balance record, split into spendable and held
//! portions. Records are created lazily on first credit or reserve and are
//! mutated only by the ledger service inside a transaction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-user token balance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBalance {
    /// Owning user
    pub user_id: Uuid,

    /// Spendable tokens
    pub available: i64,

    /// Tokens held by active reservations
    pub reserved: i64,

    /// Bumped on every mutation, for optimistic concurrency checks
    pub version: i64,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl TokenBalance {
    /// Fresh zero balance for a user
    pub fn empty(user_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            available: 0,
            reserved: 0,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Total tokens attributed to the user (spendable + held)
    #[inline]
    pub fn total(&self) -> i64 {
        self.available + self.reserved
    }

    /// Check whether a reservation of `estimated` tokens can be placed
    pub fn can_reserve(&self, estimated: i64) -> bool {
        estimated > 0 && self.available >= estimated
    }

    /// Check whether a deduction of `tokens` keeps the balance non-negative
    pub fn can_deduct(&self, tokens: i64) -> bool {
        tokens > 0 && self.available >= tokens
    }
}
