//! Payment model
//!
//! External-effect record tying a provider checkout session to the tokens it
//! credited. Refunds and disputes accumulate into `refunded_amount_cents` and
//! drive the status transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Payment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Session created, not yet paid
    #[default]
    Pending,
    /// Paid in full, tokens credited
    Succeeded,
    /// Some but not all of the amount was refunded
    PartiallyRefunded,
    /// The full amount was refunded
    Refunded,
    /// The session failed or expired unpaid
    Failed,
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentStatus::Pending => write!(f, "pending"),
            PaymentStatus::Succeeded => write!(f, "succeeded"),
            PaymentStatus::PartiallyRefunded => write!(f, "partially_refunded"),
            PaymentStatus::Refunded => write!(f, "refunded"),
            PaymentStatus::Failed => write!(f, "failed"),
        }
    }
}

impl PaymentStatus {
    /// Parse from string (case-insensitive)
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(PaymentStatus::Pending),
            "succeeded" => Some(PaymentStatus::Succeeded),
            "partially_refunded" => Some(PaymentStatus::PartiallyRefunded),
            "refunded" => Some(PaymentStatus::Refunded),
            "failed" => Some(PaymentStatus::Failed),
            _ => None,
        }
    }
}

/// Payment entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    /// Unique identifier
    pub id: Uuid,

    /// Paying user
    pub user_id: Uuid,

    /// Provider checkout session id (unique)
    pub provider_session_id: String,

    /// Provider payment intent id, when known
    pub provider_payment_intent_id: Option<String>,

    /// Gross amount in the smallest currency unit
    pub amount_cents: i64,

    /// ISO 4217 currency code, lowercase
    pub currency: String,

    /// Tokens credited to the ledger for this payment
    pub credited_tokens: i64,

    /// Total refunded so far, in cents
    pub refunded_amount_cents: i64,

    /// Current status
    pub status: PaymentStatus,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Amount still refundable, in cents
    #[inline]
    pub fn remaining_refundable_cents(&self) -> i64 {
        (self.amount_cents - self.refunded_amount_cents).max(0)
    }

    /// Status implied by a cumulative refunded total
    pub fn status_after_refund_total(&self, refunded_total_cents: i64) -> PaymentStatus {
        if refunded_total_cents <= 0 {
            PaymentStatus::Succeeded
        } else if refunded_total_cents >= self.amount_cents {
            PaymentStatus::Refunded
        } else {
            PaymentStatus::PartiallyRefunded
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payment(amount_cents: i64, refunded: i64) -> Payment {
        let now = Utc::now();
        Payment {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            provider_session_id: "cs_test_1".to_string(),
            provider_payment_intent_id: Some("pi_1".to_string()),
            amount_cents,
            currency: "usd".to_string(),
            credited_tokens: 1000,
            refunded_amount_cents: refunded,
            status: PaymentStatus::Succeeded,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_status_roundtrip() {
        for s in [
            PaymentStatus::Pending,
            PaymentStatus::Succeeded,
            PaymentStatus::PartiallyRefunded,
            PaymentStatus::Refunded,
            PaymentStatus::Failed,
        ] {
            assert_eq!(PaymentStatus::parse(&s.to_string()), Some(s));
        }
        assert_eq!(PaymentStatus::parse("unknown"), None);
    }

    #[test]
    fn test_status_after_refund_total() {
        let p = payment(1000, 0);
        assert_eq!(p.status_after_refund_total(0), PaymentStatus::Succeeded);
        assert_eq!(
            p.status_after_refund_total(333),
            PaymentStatus::PartiallyRefunded
        );
        assert_eq!(p.status_after_refund_total(1000), PaymentStatus::Refunded);
        assert_eq!(p.status_after_refund_total(1200), PaymentStatus::Refunded);
    }

    #[test]
    fn test_remaining_refundable() {
        assert_eq!(payment(1000, 333).remaining_refundable_cents(), 667);
        assert_eq!(payment(1000, 1000).remaining_refundable_cents(), 0);
        // over-refund never goes negative
        assert_eq!(payment(1000, 1500).remaining_refundable_cents(), 0);
    }
}
