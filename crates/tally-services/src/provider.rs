//! Payment provider client
//!
//! Typed facade over the provider's REST API. Only the three calls the core
//! consumes are exposed: session and charge retrieval for webhook handling,
//! and the active price listing for catalog sync. Provider calls never happen
//! inside a database transaction.

use async_trait::async_trait;
use serde::Deserialize;
use tally_core::{AppError, AppResult};
use tracing::{debug, instrument};

/// Checkout session as returned by the provider
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub payment_status: Option<String>,
    #[serde(default)]
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub client_reference_id: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl CheckoutSession {
    /// Whether the provider considers the session settled
    pub fn is_paid(&self) -> bool {
        matches!(self.payment_status.as_deref(), Some("paid"))
    }

    /// Metadata value by key
    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }
}

/// Charge as returned by the provider
#[derive(Debug, Clone, Deserialize)]
pub struct Charge {
    pub id: String,
    #[serde(default)]
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub amount: i64,
    #[serde(default)]
    pub amount_refunded: i64,
    #[serde(default)]
    pub currency: Option<String>,
}

/// Price as returned by the provider's catalog
#[derive(Debug, Clone, Deserialize)]
pub struct Price {
    pub id: String,
    #[serde(default)]
    pub unit_amount: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Price {
    /// Token grant advertised in the price metadata
    pub fn tokens(&self) -> Option<i64> {
        self.metadata
            .get("tokens")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
    }
}

#[derive(Debug, Deserialize)]
struct PriceList {
    data: Vec<Price>,
}

/// Provider API surface the core consumes
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Retrieve a checkout session by id
    async fn retrieve_session(&self, session_id: &str) -> AppResult<CheckoutSession>;

    /// Retrieve a charge by id
    async fn retrieve_charge(&self, charge_id: &str) -> AppResult<Charge>;

    /// List active prices
    async fn list_prices(&self) -> AppResult<Vec<Price>>;
}

/// HTTP implementation over the provider REST API
pub struct HttpProviderClient {
    http: reqwest::Client,
    api_base: String,
    secret_key: String,
}

impl HttpProviderClient {
    /// Create a new client against `api_base` using `secret_key` bearer auth
    pub fn new(api_base: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.into(),
            secret_key: secret_key.into(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> AppResult<T> {
        let url = format!("{}/{}", self.api_base.trim_end_matches('/'), path);
        debug!("GET {}", url);

        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| AppError::Provider(format!("request to {path} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Provider(format!(
                "{path} returned {status}"
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| AppError::Provider(format!("invalid response from {path}: {e}")))
    }
}

#[async_trait]
impl ProviderClient for HttpProviderClient {
    #[instrument(skip(self))]
    async fn retrieve_session(&self, session_id: &str) -> AppResult<CheckoutSession> {
        self.get_json(&format!("checkout/sessions/{session_id}")).await
    }

    #[instrument(skip(self))]
    async fn retrieve_charge(&self, charge_id: &str) -> AppResult<Charge> {
        self.get_json(&format!("charges/{charge_id}")).await
    }

    #[instrument(skip(self))]
    async fn list_prices(&self) -> AppResult<Vec<Price>> {
        let list: PriceList = self.get_json("prices?active=true&limit=100").await?;
        Ok(list.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_paid_predicate() {
        let session: CheckoutSession = serde_json::from_str(
            r#"{"id":"cs_1","payment_status":"paid","amount_total":999,"currency":"usd"}"#,
        )
        .unwrap();
        assert!(session.is_paid());

        let unpaid: CheckoutSession =
            serde_json::from_str(r#"{"id":"cs_2","payment_status":"unpaid"}"#).unwrap();
        assert!(!unpaid.is_paid());
    }

    #[test]
    fn test_session_metadata_access() {
        let session: CheckoutSession = serde_json::from_str(
            r#"{"id":"cs_1","metadata":{"user_id":"u-1","pack_id":"price_small"}}"#,
        )
        .unwrap();
        assert_eq!(session.meta("user_id"), Some("u-1"));
        assert_eq!(session.meta("missing"), None);
    }

    #[test]
    fn test_price_tokens_from_metadata() {
        let price: Price = serde_json::from_str(
            r#"{"id":"price_1","unit_amount":999,"currency":"usd","active":true,"metadata":{"tokens":"1000"}}"#,
        )
        .unwrap();
        assert_eq!(price.tokens(), Some(1000));

        let no_tokens: Price =
            serde_json::from_str(r#"{"id":"price_2","active":true}"#).unwrap();
        assert_eq!(no_tokens.tokens(), None);
    }
}
