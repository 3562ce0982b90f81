//! Idempotency key construction
//!
//! Keys are opaque strings up to 255 bytes chosen by the caller. The helpers
//! here build the namespaced keys the webhook processor and the background
//! jobs derive from the provider's stable ids, so retries and redeliveries
//! always converge on the same journal row.

use uuid::Uuid;

/// Key for crediting a checkout session
pub fn purchase_key(session_id: &str) -> String {
    format!("purchase:{session_id}")
}

/// Key for the token clawback of a provider refund
pub fn refund_key(refund_id: &str) -> String {
    format!("refund:{refund_id}")
}

/// Key for re-crediting a canceled refund
pub fn refund_canceled_key(refund_id: &str) -> String {
    format!("refund-canceled:{refund_id}")
}

/// Key for the token clawback of a dispute
pub fn dispute_key(dispute_id: &str) -> String {
    format!("dispute:{dispute_id}")
}

/// Key for re-crediting a dispute resolved in our favor
pub fn dispute_won_key(dispute_id: &str) -> String {
    format!("dispute-won:{dispute_id}")
}

/// Key for the expiry sweep's release of a reservation
pub fn expire_key(reservation_id: Uuid) -> String {
    format!("expire:{reservation_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_namespaced_by_id() {
        assert_eq!(purchase_key("cs_1"), "purchase:cs_1");
        assert_eq!(refund_key("re_1"), "refund:re_1");
        assert_eq!(refund_canceled_key("re_1"), "refund-canceled:re_1");
        assert_eq!(dispute_key("dp_1"), "dispute:dp_1");
        assert_eq!(dispute_won_key("dp_1"), "dispute-won:dp_1");
    }

    #[test]
    fn test_refund_and_cancellation_keys_differ() {
        // The cancellation re-credit must not replay the deduction's row
        assert_ne!(refund_key("re_1"), refund_canceled_key("re_1"));
    }

    #[test]
    fn test_expire_key_fits_column_width() {
        let key = expire_key(Uuid::new_v4());
        assert!(key.len() <= 255);
    }
}
