//! Token transaction journal model
//!
//! Immutable append-only record of every ledger-changing effect. Each row
//! carries the caller's idempotency key (globally unique) and the balance
//! snapshot after the effect, so a replayed request can be answered entirely
//! from the journal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Journal entry type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    /// Tokens credited from a completed checkout
    Purchase,
    /// Manual or compensating credit
    Adjustment,
    /// Tokens moved from available to reserved
    Reserve,
    /// Reserved tokens consumed
    Commit,
    /// Held tokens returned to available
    Release,
    /// Tokens clawed back for a provider refund or dispute
    Refund,
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionType::Purchase => write!(f, "PURCHASE"),
            TransactionType::Adjustment => write!(f, "ADJUSTMENT"),
            TransactionType::Reserve => write!(f, "RESERVE"),
            TransactionType::Commit => write!(f, "COMMIT"),
            TransactionType::Release => write!(f, "RELEASE"),
            TransactionType::Refund => write!(f, "REFUND"),
        }
    }
}

impl TransactionType {
    /// Parse from the journal's string column
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PURCHASE" => Some(TransactionType::Purchase),
            "ADJUSTMENT" => Some(TransactionType::Adjustment),
            "RESERVE" => Some(TransactionType::Reserve),
            "COMMIT" => Some(TransactionType::Commit),
            "RELEASE" => Some(TransactionType::Release),
            "REFUND" => Some(TransactionType::Refund),
            _ => None,
        }
    }

    /// Refund rows are stored with a negative amount; everything else is
    /// non-negative
    pub fn canonical_sign_ok(&self, amount_tokens: i64) -> bool {
        match self {
            TransactionType::Refund => amount_tokens <= 0,
            _ => amount_tokens >= 0,
        }
    }
}

/// Journal row, immutable once written
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenTransaction {
    /// Journal sequence id
    pub id: i64,

    /// Affected user
    pub user_id: Uuid,

    /// Entry type
    pub tx_type: TransactionType,

    /// Originating subsystem label (e.g. "stripe", "job", "expiry-sweep")
    pub source: String,

    /// Signed token amount; REFUND rows are negative
    pub amount_tokens: i64,

    /// External correlation: reservation id for RESERVE/COMMIT/RELEASE,
    /// refund or dispute id for REFUND, session id for PURCHASE
    pub ref_id: Option<String>,

    /// Caller-chosen at-most-once key, unique across the journal
    pub idempotency_key: String,

    /// Available balance after the effect
    pub balance_after_available: i64,

    /// Reserved balance after the effect
    pub balance_after_reserved: i64,

    /// Free-form context (caller refs, provider ids)
    pub meta: Option<serde_json::Value>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl TokenTransaction {
    /// The magnitude of the effect, refund sign folded away
    #[inline]
    pub fn magnitude(&self) -> i64 {
        self.amount_tokens.abs()
    }

    /// Same-parameters test for an idempotent replay.
    ///
    /// A prior row answers a retry only when the retry describes the same
    /// effect: same type, same user, same magnitude when the caller names
    /// one (a release retry cannot), and the same correlation id when the
    /// caller names one (a reserve retry cannot, since the first call minted it).
    /// Anything else means the key was spent on a different operation.
    pub fn matches_replay(
        &self,
        tx_type: TransactionType,
        user_id: Uuid,
        amount_tokens: Option<i64>,
        ref_id: Option<&str>,
    ) -> bool {
        if self.tx_type != tx_type || self.user_id != user_id {
            return false;
        }
        if let Some(amount) = amount_tokens {
            if self.magnitude() != amount.abs() {
                return false;
            }
        }
        match ref_id {
            Some(expected) => self.ref_id.as_deref() == Some(expected),
            None => true,
        }
    }
}
