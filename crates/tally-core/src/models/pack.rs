//! Product pack model
//!
//! A purchasable bundle of tokens tied to a provider price. Read-only from the
//! ledger's perspective; maintained by the catalog sync.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Token pack available for purchase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductPack {
    /// Unique identifier
    pub id: Uuid,

    /// Provider price id this pack is sold under (unique)
    pub provider_price_id: String,

    /// Tokens credited on purchase
    pub tokens: i64,

    /// Price in the smallest currency unit
    pub price_cents: i64,

    /// ISO 4217 currency code, lowercase
    pub currency: String,

    /// Whether the pack is currently purchasable
    pub active: bool,
}

impl ProductPack {
    /// Case-insensitive currency match against a session's currency
    pub fn currency_matches(&self, other: &str) -> bool {
        self.currency.eq_ignore_ascii_case(other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_currency_match_is_case_insensitive() {
        let pack = ProductPack {
            id: Uuid::new_v4(),
            provider_price_id: "price_1".to_string(),
            tokens: 1000,
            price_cents: 999,
            currency: "usd".to_string(),
            active: true,
        };
        assert!(pack.currency_matches("USD"));
        assert!(pack.currency_matches("usd"));
        assert!(!pack.currency_matches("eur"));
    }
}
