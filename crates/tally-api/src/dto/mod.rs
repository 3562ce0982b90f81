//! API data transfer objects
//!
//! Explicit conversions at the edge; the core operates on plain records.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tally_core::models::{ProductPack, TokenBalance};
use tally_services::MetricsSnapshot;
use uuid::Uuid;

/// Balance response
#[derive(Debug, Clone, Serialize)]
pub struct BalanceResponse {
    pub user_id: Uuid,
    pub available_tokens: i64,
    pub reserved_tokens: i64,
    pub updated_at: DateTime<Utc>,
}

impl From<TokenBalance> for BalanceResponse {
    fn from(balance: TokenBalance) -> Self {
        Self {
            user_id: balance.user_id,
            available_tokens: balance.available,
            reserved_tokens: balance.reserved,
            updated_at: balance.updated_at,
        }
    }
}

/// Product pack response
#[derive(Debug, Clone, Serialize)]
pub struct PackResponse {
    pub id: Uuid,
    pub price_id: String,
    pub tokens: i64,
    pub price_cents: i64,
    pub currency: String,
}

impl From<ProductPack> for PackResponse {
    fn from(pack: ProductPack) -> Self {
        Self {
            id: pack.id,
            price_id: pack.provider_price_id,
            tokens: pack.tokens,
            price_cents: pack.price_cents,
            currency: pack.currency,
        }
    }
}

/// Health response with a metrics snapshot
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub metrics: MetricsSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_balance_response_conversion() {
        let balance = TokenBalance {
            user_id: Uuid::nil(),
            available: 4400,
            reserved: 600,
            version: 7,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let response = BalanceResponse::from(balance);
        assert_eq!(response.available_tokens, 4400);
        assert_eq!(response.reserved_tokens, 600);
    }

    #[test]
    fn test_pack_response_conversion() {
        let pack = ProductPack {
            id: Uuid::nil(),
            provider_price_id: "price_small".to_string(),
            tokens: 1000,
            price_cents: 499,
            currency: "usd".to_string(),
            active: true,
        };

        let response = PackResponse::from(pack);
        assert_eq!(response.price_id, "price_small");
        assert_eq!(response.tokens, 1000);
        assert_eq!(response.price_cents, 499);
    }
}
