//! Checkout session validation
//!
//! Before a completed session credits tokens, the processor confirms the
//! session is internally consistent: the pack it names exists, the currency
//! matches, and (when strict validation is on) the charged amount equals the
//! catalog price. Validation runs before the database transaction.

use crate::catalog::PackSource;
use crate::provider::CheckoutSession;
use std::sync::Arc;
use tally_core::models::ProductPack;
use tally_core::{AppError, AppResult};
use tracing::{instrument, warn};
use uuid::Uuid;

/// Outcome of validating a checkout session against the catalog
#[derive(Debug, Clone)]
pub struct ValidatedCheckout {
    pub user_id: Uuid,
    pub primary_pack: ProductPack,
    pub additional_packs: Vec<ProductPack>,
    pub total_amount_cents: i64,
    pub total_tokens: i64,
    pub currency: String,
}

/// Checkout validator
pub struct CheckoutValidator {
    packs: Arc<dyn PackSource>,
    strict_amount_validation: bool,
}

impl CheckoutValidator {
    /// Create a new validator
    pub fn new(packs: Arc<dyn PackSource>, strict_amount_validation: bool) -> Self {
        Self {
            packs,
            strict_amount_validation,
        }
    }

    /// Validate a paid session against the pack catalog.
    ///
    /// The session must carry the buying user (metadata `user_id` or the
    /// client reference id) and the pack it was created for (metadata
    /// `pack_id`, optionally `additional_pack_ids` comma-separated).
    #[instrument(skip(self, session), fields(session = %session.id))]
    pub async fn validate(&self, session: &CheckoutSession) -> AppResult<ValidatedCheckout> {
        if !session.is_paid() {
            return Err(AppError::InvalidCheckoutSession(format!(
                "session {} is not paid",
                session.id
            )));
        }

        let user_raw = session
            .meta("user_id")
            .or(session.client_reference_id.as_deref())
            .ok_or_else(|| {
                AppError::InvalidCheckoutSession(format!(
                    "session {} carries no user reference",
                    session.id
                ))
            })?;
        let user_id = Uuid::parse_str(user_raw).map_err(|_| {
            AppError::InvalidCheckoutSession(format!(
                "session {} has malformed user reference",
                session.id
            ))
        })?;

        let pack_id = session.meta("pack_id").ok_or_else(|| {
            AppError::InvalidCheckoutSession(format!("session {} names no pack", session.id))
        })?;
        let primary_pack = self.resolve_pack(pack_id).await?;

        let mut additional_packs = Vec::new();
        if let Some(extra) = session.meta("additional_pack_ids") {
            for id in extra.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                additional_packs.push(self.resolve_pack(id).await?);
            }
        }

        let session_currency = session.currency.as_deref().unwrap_or_default();
        for pack in std::iter::once(&primary_pack).chain(additional_packs.iter()) {
            if !pack.currency_matches(session_currency) {
                return Err(AppError::InvalidCheckoutSession(format!(
                    "currency mismatch for session {}: pack {} is {}, session is {}",
                    session.id, pack.provider_price_id, pack.currency, session_currency
                )));
            }
        }

        let total_amount_cents: i64 = std::iter::once(&primary_pack)
            .chain(additional_packs.iter())
            .map(|p| p.price_cents)
            .sum();
        let total_tokens: i64 = std::iter::once(&primary_pack)
            .chain(additional_packs.iter())
            .map(|p| p.tokens)
            .sum();

        if let Some(session_amount) = session.amount_total {
            if session_amount != total_amount_cents {
                if self.strict_amount_validation {
                    return Err(AppError::InvalidCheckoutSession(format!(
                        "amount mismatch for session {}: packs total {}, session charged {}",
                        session.id, total_amount_cents, session_amount
                    )));
                }
                warn!(
                    session = %session.id,
                    pack_total = total_amount_cents,
                    charged = session_amount,
                    "session amount differs from catalog; strict validation off"
                );
            }
        }

        Ok(ValidatedCheckout {
            user_id,
            primary_pack,
            additional_packs,
            total_amount_cents,
            total_tokens,
            currency: session_currency.to_lowercase(),
        })
    }

    async fn resolve_pack(&self, price_id: &str) -> AppResult<ProductPack> {
        self.packs
            .pack_by_price_id(price_id)
            .await?
            .ok_or_else(|| AppError::InvalidCheckoutSession(format!("unknown pack {price_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MockPackSource;

    fn pack(price_id: &str, tokens: i64, price_cents: i64, currency: &str) -> ProductPack {
        ProductPack {
            id: Uuid::new_v4(),
            provider_price_id: price_id.to_string(),
            tokens,
            price_cents,
            currency: currency.to_string(),
            active: true,
        }
    }

    fn session(json: &str) -> CheckoutSession {
        serde_json::from_str(json).unwrap()
    }

    fn source_with(packs: Vec<ProductPack>) -> Arc<dyn PackSource> {
        let mut mock = MockPackSource::new();
        mock.expect_pack_by_price_id().returning(move |price_id| {
            Ok(packs
                .iter()
                .find(|p| p.provider_price_id == price_id)
                .cloned())
        });
        Arc::new(mock)
    }

    const USER: &str = "1f5c8f74-4db4-4e2c-9a6c-0d8c86f6a001";

    #[tokio::test]
    async fn test_valid_session_passes() {
        let validator = CheckoutValidator::new(
            source_with(vec![pack("price_small", 1000, 999, "usd")]),
            true,
        );
        let session = session(&format!(
            r#"{{"id":"cs_1","payment_status":"paid","amount_total":999,"currency":"usd",
                "metadata":{{"user_id":"{USER}","pack_id":"price_small"}}}}"#
        ));

        let checkout = validator.validate(&session).await.unwrap();
        assert_eq!(checkout.total_tokens, 1000);
        assert_eq!(checkout.total_amount_cents, 999);
        assert_eq!(checkout.currency, "usd");
        assert!(checkout.additional_packs.is_empty());
    }

    #[tokio::test]
    async fn test_currency_compare_is_case_insensitive() {
        let validator = CheckoutValidator::new(
            source_with(vec![pack("price_small", 1000, 999, "usd")]),
            true,
        );
        let session = session(&format!(
            r#"{{"id":"cs_1","payment_status":"paid","amount_total":999,"currency":"USD",
                "metadata":{{"user_id":"{USER}","pack_id":"price_small"}}}}"#
        ));

        assert!(validator.validate(&session).await.is_ok());
    }

    #[tokio::test]
    async fn test_currency_mismatch_rejected() {
        let validator = CheckoutValidator::new(
            source_with(vec![pack("price_small", 1000, 999, "usd")]),
            true,
        );
        let session = session(&format!(
            r#"{{"id":"cs_1","payment_status":"paid","amount_total":999,"currency":"eur",
                "metadata":{{"user_id":"{USER}","pack_id":"price_small"}}}}"#
        ));

        let err = validator.validate(&session).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidCheckoutSession(_)));
    }

    #[tokio::test]
    async fn test_amount_mismatch_strict() {
        let validator = CheckoutValidator::new(
            source_with(vec![pack("price_small", 1000, 999, "usd")]),
            true,
        );
        let session = session(&format!(
            r#"{{"id":"cs_1","payment_status":"paid","amount_total":1099,"currency":"usd",
                "metadata":{{"user_id":"{USER}","pack_id":"price_small"}}}}"#
        ));

        let err = validator.validate(&session).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidCheckoutSession(_)));
    }

    #[tokio::test]
    async fn test_amount_mismatch_lenient() {
        let validator = CheckoutValidator::new(
            source_with(vec![pack("price_small", 1000, 999, "usd")]),
            false,
        );
        let session = session(&format!(
            r#"{{"id":"cs_1","payment_status":"paid","amount_total":1099,"currency":"usd",
                "metadata":{{"user_id":"{USER}","pack_id":"price_small"}}}}"#
        ));

        assert!(validator.validate(&session).await.is_ok());
    }

    #[tokio::test]
    async fn test_additional_packs_summed() {
        let validator = CheckoutValidator::new(
            source_with(vec![
                pack("price_small", 1000, 999, "usd"),
                pack("price_medium", 5000, 1999, "usd"),
            ]),
            true,
        );
        let session = session(&format!(
            r#"{{"id":"cs_1","payment_status":"paid","amount_total":2998,"currency":"usd",
                "metadata":{{"user_id":"{USER}","pack_id":"price_small",
                             "additional_pack_ids":"price_medium"}}}}"#
        ));

        let checkout = validator.validate(&session).await.unwrap();
        assert_eq!(checkout.total_tokens, 6000);
        assert_eq!(checkout.total_amount_cents, 2998);
        assert_eq!(checkout.additional_packs.len(), 1);
    }

    #[tokio::test]
    async fn test_unpaid_session_rejected() {
        let validator = CheckoutValidator::new(
            source_with(vec![pack("price_small", 1000, 999, "usd")]),
            true,
        );
        let session = session(&format!(
            r#"{{"id":"cs_1","payment_status":"unpaid",
                "metadata":{{"user_id":"{USER}","pack_id":"price_small"}}}}"#
        ));

        let err = validator.validate(&session).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidCheckoutSession(_)));
    }

    #[tokio::test]
    async fn test_unknown_pack_rejected() {
        let validator = CheckoutValidator::new(source_with(vec![]), true);
        let session = session(&format!(
            r#"{{"id":"cs_1","payment_status":"paid","amount_total":999,"currency":"usd",
                "metadata":{{"user_id":"{USER}","pack_id":"price_missing"}}}}"#
        ));

        let err = validator.validate(&session).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidCheckoutSession(_)));
    }

    #[tokio::test]
    async fn test_missing_user_rejected() {
        let validator = CheckoutValidator::new(
            source_with(vec![pack("price_small", 1000, 999, "usd")]),
            true,
        );
        let session = session(
            r#"{"id":"cs_1","payment_status":"paid","amount_total":999,"currency":"usd",
                "metadata":{"pack_id":"price_small"}}"#,
        );

        let err = validator.validate(&session).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidCheckoutSession(_)));
    }

    #[tokio::test]
    async fn test_client_reference_id_fallback() {
        let validator = CheckoutValidator::new(
            source_with(vec![pack("price_small", 1000, 999, "usd")]),
            true,
        );
        let session = session(&format!(
            r#"{{"id":"cs_1","payment_status":"paid","amount_total":999,"currency":"usd",
                "client_reference_id":"{USER}",
                "metadata":{{"pack_id":"price_small"}}}}"#
        ));

        let checkout = validator.validate(&session).await.unwrap();
        assert_eq!(checkout.user_id.to_string(), USER);
    }
}
