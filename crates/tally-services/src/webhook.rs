//! Webhook event processor
//!
//! Turns provider deliveries into ledger operations. The pipeline is:
//! verify signature, parse, dedup against `processed_events`, classify,
//! dispatch. Every effectful handler writes the ledger effect, the payment
//! mutation, and the processed-event marker in one transaction, so an event
//! either lands completely or is retried by the provider.
//!
//! Ordering of related events is never assumed: refund and dispute handlers
//! converge on idempotency keys derived from the provider's stable ids, so
//! `refund.updated` before `refund.created` (or a redelivery of either)
//! deducts exactly once.

use crate::checkout::CheckoutValidator;
use crate::idempotency;
use crate::ledger::LedgerService;
use crate::metrics::{MetricsSink, SharedMetrics};
use crate::provider::ProviderClient;
use crate::refund_policy::{self, RefundCalculation};
use crate::signature;
use serde::Deserialize;
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Instant;
use tally_core::clock::SharedClock;
use tally_core::config::{RefundPolicyMode, WebhookConfig};
use tally_core::models::{Payment, PaymentStatus, TransactionType};
use tally_core::{AppError, AppResult};
use tally_db::{PaymentRepository, ProcessedEventRepository};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Source label on journal rows written by this processor
const WEBHOOK_SOURCE: &str = "stripe";

/// Final disposition of a delivery, mapped to HTTP by the API layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// Handled (including ignored event types)
    Ok,
    /// Already processed; acknowledged without effect
    Duplicate,
    /// Signature verification failed
    BadSignature,
    /// Semantically invalid; the provider should not retry
    Rejected,
    /// Transient failure; the provider should retry
    Failed,
}

/// How an event maps onto the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventClass {
    CheckoutCompleted,
    RefundSucceeded,
    RefundCanceled,
    DisputeDebit,
    DisputeWon,
    Ignored,
}

/// Provider event envelope
#[derive(Debug, Deserialize)]
pub struct ProviderEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: EventData,
}

#[derive(Debug, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
struct RefundObject {
    id: String,
    #[serde(default)]
    charge: Option<String>,
    #[serde(default)]
    payment_intent: Option<String>,
    #[serde(default)]
    amount: i64,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefundList {
    #[serde(default)]
    data: Vec<RefundObject>,
}

#[derive(Debug, Deserialize)]
struct ChargeObject {
    id: String,
    #[serde(default)]
    payment_intent: Option<String>,
    #[serde(default)]
    refunds: Option<RefundList>,
}

#[derive(Debug, Deserialize)]
struct DisputeObject {
    id: String,
    #[serde(default)]
    charge: Option<String>,
    #[serde(default)]
    payment_intent: Option<String>,
    #[serde(default)]
    amount: i64,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SessionObject {
    id: String,
}

/// Classify an event type (pure; drives dispatch)
fn classify(event_type: &str, object: &serde_json::Value) -> EventClass {
    match event_type {
        "checkout.session.completed" => EventClass::CheckoutCompleted,
        "charge.refunded" | "refund.created" => EventClass::RefundSucceeded,
        "refund.updated" => {
            match object.get("status").and_then(|s| s.as_str()) {
                Some("succeeded") => EventClass::RefundSucceeded,
                Some("canceled") => EventClass::RefundCanceled,
                _ => EventClass::Ignored,
            }
        }
        "charge.dispute.created"
        | "charge.dispute.funds_withdrawn"
        | "charge.dispute.lost" => EventClass::DisputeDebit,
        "charge.dispute.closed" => {
            match object.get("status").and_then(|s| s.as_str()) {
                Some("won") => EventClass::DisputeWon,
                _ => EventClass::Ignored,
            }
        }
        t if t.starts_with("customer.")
            || t.starts_with("plan.")
            || t.starts_with("product.")
            || t.starts_with("price.")
            || t.starts_with("payment_method.") =>
        {
            EventClass::Ignored
        }
        _ => EventClass::Ignored,
    }
}

/// How an effectful handler ended
enum Handled {
    Applied,
    Duplicate,
    Ignored,
}

/// Webhook event processor
pub struct WebhookProcessor {
    pool: PgPool,
    ledger: Arc<LedgerService>,
    payments: PaymentRepository,
    events: ProcessedEventRepository,
    validator: CheckoutValidator,
    provider: Arc<dyn ProviderClient>,
    metrics: SharedMetrics,
    clock: SharedClock,
    config: WebhookConfig,
    refund_policy: RefundPolicyMode,
}

impl WebhookProcessor {
    /// Create a new processor
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: PgPool,
        ledger: Arc<LedgerService>,
        validator: CheckoutValidator,
        provider: Arc<dyn ProviderClient>,
        metrics: SharedMetrics,
        clock: SharedClock,
        config: WebhookConfig,
        refund_policy: RefundPolicyMode,
    ) -> Self {
        Self {
            payments: PaymentRepository::new(pool.clone()),
            events: ProcessedEventRepository::new(pool.clone()),
            pool,
            ledger,
            validator,
            provider,
            metrics,
            clock,
            config,
            refund_policy,
        }
    }

    /// Process one raw delivery
    pub async fn process(&self, payload: &[u8], signature_header: &str) -> WebhookOutcome {
        let started = Instant::now();
        let outcome = self.process_inner(payload, signature_header).await;
        self.metrics.observe_webhook_duration(started.elapsed());

        match outcome {
            WebhookOutcome::Ok => MetricsSink::incr(&self.metrics.webhook_ok),
            WebhookOutcome::Duplicate => MetricsSink::incr(&self.metrics.webhook_duplicate),
            WebhookOutcome::BadSignature => MetricsSink::incr(&self.metrics.webhook_bad_signature),
            WebhookOutcome::Rejected => MetricsSink::incr(&self.metrics.webhook_rejected),
            WebhookOutcome::Failed => MetricsSink::incr(&self.metrics.webhook_failed),
        }
        outcome
    }

    async fn process_inner(&self, payload: &[u8], signature_header: &str) -> WebhookOutcome {
        if let Err(e) = signature::verify(
            &self.config.secret,
            payload,
            signature_header,
            self.clock.now(),
            self.config.tolerance_secs,
        ) {
            warn!("webhook signature rejected: {}", e);
            return WebhookOutcome::BadSignature;
        }

        let event: ProviderEvent = match serde_json::from_slice(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!("unparseable webhook payload: {}", e);
                return WebhookOutcome::Rejected;
            }
        };

        match self.events.find(&event.id).await {
            Ok(Some(processed)) => {
                debug!(
                    event = %event.id,
                    first_seen = %processed.received_at,
                    "duplicate webhook event"
                );
                return WebhookOutcome::Duplicate;
            }
            Ok(None) => {}
            Err(e) => {
                error!(event = %event.id, "dedup check failed: {}", e);
                return WebhookOutcome::Failed;
            }
        }

        let class = classify(&event.event_type, &event.data.object);
        if class == EventClass::Ignored {
            debug!(event = %event.id, kind = %event.event_type, "ignored webhook event");
            MetricsSink::incr(&self.metrics.webhook_ignored);
            return WebhookOutcome::Ok;
        }

        let result = match class {
            EventClass::CheckoutCompleted => self.handle_checkout_completed(&event).await,
            EventClass::RefundSucceeded => self.handle_refund_succeeded(&event).await,
            EventClass::RefundCanceled => self.handle_refund_canceled(&event).await,
            EventClass::DisputeDebit => self.handle_dispute_debit(&event).await,
            EventClass::DisputeWon => self.handle_dispute_won(&event).await,
            EventClass::Ignored => unreachable!("ignored events return early"),
        };

        match result {
            Ok(Handled::Applied) => {
                info!(event = %event.id, kind = %event.event_type, "webhook event applied");
                WebhookOutcome::Ok
            }
            Ok(Handled::Duplicate) => WebhookOutcome::Duplicate,
            Ok(Handled::Ignored) => {
                MetricsSink::incr(&self.metrics.webhook_ignored);
                WebhookOutcome::Ok
            }
            Err(e) if e.is_retryable() => {
                error!(event = %event.id, kind = %event.event_type, "webhook handler failed: {}", e);
                WebhookOutcome::Failed
            }
            Err(e) => {
                warn!(event = %event.id, kind = %event.event_type, "webhook event rejected: {}", e);
                WebhookOutcome::Rejected
            }
        }
    }

    // ==================== checkout.session.completed ====================

    #[instrument(skip(self, event), fields(event = %event.id))]
    async fn handle_checkout_completed(&self, event: &ProviderEvent) -> AppResult<Handled> {
        let session_ref: SessionObject = parse_object(&event.data.object)?;

        // Re-fetch the session: the payload is provider-signed but the
        // authoritative amounts come from the API, outside any transaction.
        let session = self.provider.retrieve_session(&session_ref.id).await?;
        let checkout = self.validator.validate(&session).await?;

        let existing = self
            .payments
            .find_by_session_id(&session.id)
            .await?
            .is_some();

        let key = idempotency::purchase_key(&session.id);
        let mut tx = self.begin().await?;

        if !self.events.mark_processed_in_tx(&mut tx, &event.id).await? {
            let _ = tx.rollback().await;
            return Ok(Handled::Duplicate);
        }

        if !existing {
            let now = self.clock.now();
            let payment = Payment {
                id: Uuid::new_v4(),
                user_id: checkout.user_id,
                provider_session_id: session.id.clone(),
                provider_payment_intent_id: session.payment_intent.clone(),
                amount_cents: checkout.total_amount_cents,
                currency: checkout.currency.clone(),
                credited_tokens: checkout.total_tokens,
                refunded_amount_cents: 0,
                status: PaymentStatus::Succeeded,
                created_at: now,
                updated_at: now,
            };
            if let Err(e) = self.payments.insert_in_tx(&mut tx, &payment).await {
                let _ = tx.rollback().await;
                if tally_db::is_unique_violation(&e) {
                    // Another worker recorded the session in between; the
                    // provider will redeliver and hit the dedup path.
                    return Ok(Handled::Duplicate);
                }
                return Err(AppError::Database(format!("Failed to insert payment: {e}")));
            }
        }

        let credit = self
            .ledger
            .credit_in_tx(
                &mut tx,
                TransactionType::Purchase,
                checkout.user_id,
                checkout.total_tokens,
                &key,
                Some(&session.id),
                WEBHOOK_SOURCE,
                Some(json!({
                    "session": session.id,
                    "amount_cents": checkout.total_amount_cents,
                    "currency": checkout.currency,
                })),
            )
            .await?;

        self.commit(tx).await?;

        if !credit.replayed {
            MetricsSink::add(&self.metrics.tokens_credited, checkout.total_tokens as u64);
        }
        info!(
            user = %checkout.user_id,
            session = %session.id,
            tokens = checkout.total_tokens,
            "checkout credited"
        );
        Ok(Handled::Applied)
    }

    // ==================== refunds ====================

    /// Refund objects named by this event, with the owning payment resolved
    async fn resolve_refunds(&self, event: &ProviderEvent) -> AppResult<Vec<(Payment, RefundObject)>> {
        let refunds: Vec<RefundObject> = if event.event_type == "charge.refunded" {
            let charge: ChargeObject = parse_object(&event.data.object)?;
            match charge.refunds {
                Some(list) if !list.data.is_empty() => list
                    .data
                    .into_iter()
                    .map(|mut r| {
                        // The embedded refunds inherit the charge's intent
                        if r.payment_intent.is_none() {
                            r.payment_intent = charge.payment_intent.clone();
                        }
                        if r.charge.is_none() {
                            r.charge = Some(charge.id.clone());
                        }
                        r
                    })
                    .collect(),
                _ => {
                    warn!(charge = %charge.id, "charge.refunded without embedded refunds");
                    return Ok(Vec::new());
                }
            }
        } else {
            vec![parse_object(&event.data.object)?]
        };

        let mut resolved = Vec::new();
        for refund in refunds {
            // Skip refunds that never succeeded; refund.updated(canceled)
            // has its own path.
            if matches!(refund.status.as_deref(), Some("failed") | Some("canceled")) {
                continue;
            }
            let payment = self.payment_for(&refund.payment_intent, &refund.charge).await?;
            resolved.push((payment, refund));
        }
        Ok(resolved)
    }

    /// Find the payment a refund or dispute belongs to, going through the
    /// provider's charge lookup when only the charge id is on the object.
    /// Runs before the transactional section.
    async fn payment_for(
        &self,
        payment_intent: &Option<String>,
        charge: &Option<String>,
    ) -> AppResult<Payment> {
        if let Some(intent) = payment_intent {
            if let Some(payment) = self.payments.find_by_payment_intent(intent).await? {
                return Ok(payment);
            }
        }
        if let Some(charge_id) = charge {
            let charge = self.provider.retrieve_charge(charge_id).await?;
            if let Some(intent) = charge.payment_intent {
                if let Some(payment) = self.payments.find_by_payment_intent(&intent).await? {
                    return Ok(payment);
                }
            }
        }
        Err(AppError::NotFound(
            "no payment recorded for refunded charge".to_string(),
        ))
    }

    #[instrument(skip(self, event), fields(event = %event.id))]
    async fn handle_refund_succeeded(&self, event: &ProviderEvent) -> AppResult<Handled> {
        let resolved = self.resolve_refunds(event).await?;
        if resolved.is_empty() {
            return Ok(Handled::Ignored);
        }

        // Policy inputs are computed before the transaction; the deduction
        // itself is idempotent on the refund id.
        let mut planned: Vec<(Payment, RefundObject, RefundCalculation)> = Vec::new();
        for (payment, refund) in resolved {
            let committed_since = self
                .ledger
                .journal()
                .committed_tokens_since(payment.user_id, payment.created_at)
                .await?;
            let calc = refund_policy::calculate(
                self.refund_policy,
                &payment,
                refund.amount,
                committed_since,
            );
            if !calc.refund_allowed {
                info!(
                    refund = %refund.id,
                    policy = calc.policy.as_str(),
                    "refund allowed financially, token clawback withheld by policy"
                );
            }
            planned.push((payment, refund, calc));
        }

        let mut tx = self.begin().await?;

        if !self.events.mark_processed_in_tx(&mut tx, &event.id).await? {
            let _ = tx.rollback().await;
            return Ok(Handled::Duplicate);
        }

        let mut deducted_total = 0u64;
        for (payment, refund, calc) in &planned {
            let allow_negative = self.refund_policy == RefundPolicyMode::AllowNegativeBalance;
            let outcome = self
                .ledger
                .deduct_in_tx(
                    &mut tx,
                    payment.user_id,
                    calc.tokens_to_deduct,
                    &idempotency::refund_key(&refund.id),
                    Some(&refund.id),
                    WEBHOOK_SOURCE,
                    Some(json!({
                        "refund": refund.id,
                        "amount_cents": refund.amount,
                        "policy": calc.policy.as_str(),
                    })),
                    allow_negative,
                )
                .await?;

            // The payment-side bookkeeping follows the first materialized
            // deduction; replays mean another event already accounted for it.
            if !outcome.replayed {
                self.payments
                    .apply_refund_in_tx(&mut tx, payment.id, refund.amount)
                    .await?;
                deducted_total += outcome.deducted as u64;
            }
        }

        self.commit(tx).await?;
        MetricsSink::add(&self.metrics.tokens_deducted, deducted_total);
        Ok(Handled::Applied)
    }

    #[instrument(skip(self, event), fields(event = %event.id))]
    async fn handle_refund_canceled(&self, event: &ProviderEvent) -> AppResult<Handled> {
        let refund: RefundObject = parse_object(&event.data.object)?;

        // Whatever the original deduction took is what comes back.
        let prior = self
            .ledger
            .journal()
            .find_by_key(&idempotency::refund_key(&refund.id))
            .await?;
        let Some(prior) = prior else {
            // Nothing was deducted for this refund; just mark the event.
            let mut tx = self.begin().await?;
            if !self.events.mark_processed_in_tx(&mut tx, &event.id).await? {
                let _ = tx.rollback().await;
                return Ok(Handled::Duplicate);
            }
            self.commit(tx).await?;
            return Ok(Handled::Applied);
        };

        let tokens_back = prior.magnitude();
        let payment = self.payment_for(&refund.payment_intent, &refund.charge).await.ok();

        let mut tx = self.begin().await?;

        if !self.events.mark_processed_in_tx(&mut tx, &event.id).await? {
            let _ = tx.rollback().await;
            return Ok(Handled::Duplicate);
        }

        let mut replayed = false;
        if tokens_back > 0 {
            let credit = self
                .ledger
                .credit_in_tx(
                    &mut tx,
                    TransactionType::Adjustment,
                    prior.user_id,
                    tokens_back,
                    &idempotency::refund_canceled_key(&refund.id),
                    Some(&refund.id),
                    WEBHOOK_SOURCE,
                    Some(json!({ "refund": refund.id, "reason": "refund_canceled" })),
                )
                .await?;
            replayed = credit.replayed;
        }

        if !replayed {
            if let Some(payment) = &payment {
                self.payments
                    .revert_refund_in_tx(&mut tx, payment.id, refund.amount)
                    .await?;
            }
        }

        self.commit(tx).await?;

        if !replayed && tokens_back > 0 {
            MetricsSink::add(&self.metrics.tokens_credited, tokens_back as u64);
        }
        info!(refund = %refund.id, tokens = tokens_back, "refund cancellation re-credited");
        Ok(Handled::Applied)
    }

    // ==================== disputes ====================

    #[instrument(skip(self, event), fields(event = %event.id))]
    async fn handle_dispute_debit(&self, event: &ProviderEvent) -> AppResult<Handled> {
        let dispute: DisputeObject = parse_object(&event.data.object)?;
        let payment = self
            .payment_for(&dispute.payment_intent, &dispute.charge)
            .await?;

        let committed_since = self
            .ledger
            .journal()
            .committed_tokens_since(payment.user_id, payment.created_at)
            .await?;
        let calc = refund_policy::calculate(
            self.refund_policy,
            &payment,
            dispute.amount,
            committed_since,
        );

        let mut tx = self.begin().await?;

        if !self.events.mark_processed_in_tx(&mut tx, &event.id).await? {
            let _ = tx.rollback().await;
            return Ok(Handled::Duplicate);
        }

        let allow_negative = self.refund_policy == RefundPolicyMode::AllowNegativeBalance;
        let outcome = self
            .ledger
            .deduct_in_tx(
                &mut tx,
                payment.user_id,
                calc.tokens_to_deduct,
                &idempotency::dispute_key(&dispute.id),
                Some(&dispute.id),
                WEBHOOK_SOURCE,
                Some(json!({
                    "dispute": dispute.id,
                    "amount_cents": dispute.amount,
                    "status": dispute.status,
                })),
                allow_negative,
            )
            .await?;

        if !outcome.replayed {
            self.payments
                .apply_refund_in_tx(&mut tx, payment.id, dispute.amount)
                .await?;
        }

        self.commit(tx).await?;

        if !outcome.replayed {
            MetricsSink::add(&self.metrics.tokens_deducted, outcome.deducted as u64);
        }
        info!(dispute = %dispute.id, tokens = outcome.deducted, "dispute debited");
        Ok(Handled::Applied)
    }

    #[instrument(skip(self, event), fields(event = %event.id))]
    async fn handle_dispute_won(&self, event: &ProviderEvent) -> AppResult<Handled> {
        let dispute: DisputeObject = parse_object(&event.data.object)?;

        let prior = self
            .ledger
            .journal()
            .find_by_key(&idempotency::dispute_key(&dispute.id))
            .await?;
        let Some(prior) = prior else {
            let mut tx = self.begin().await?;
            if !self.events.mark_processed_in_tx(&mut tx, &event.id).await? {
                let _ = tx.rollback().await;
                return Ok(Handled::Duplicate);
            }
            self.commit(tx).await?;
            return Ok(Handled::Applied);
        };

        let tokens_back = prior.magnitude();
        let payment = self
            .payment_for(&dispute.payment_intent, &dispute.charge)
            .await
            .ok();

        let mut tx = self.begin().await?;

        if !self.events.mark_processed_in_tx(&mut tx, &event.id).await? {
            let _ = tx.rollback().await;
            return Ok(Handled::Duplicate);
        }

        let mut replayed = false;
        if tokens_back > 0 {
            let credit = self
                .ledger
                .credit_in_tx(
                    &mut tx,
                    TransactionType::Adjustment,
                    prior.user_id,
                    tokens_back,
                    &idempotency::dispute_won_key(&dispute.id),
                    Some(&dispute.id),
                    WEBHOOK_SOURCE,
                    Some(json!({ "dispute": dispute.id, "reason": "dispute_won" })),
                )
                .await?;
            replayed = credit.replayed;
        }

        if !replayed {
            if let Some(payment) = &payment {
                self.payments
                    .revert_refund_in_tx(&mut tx, payment.id, dispute.amount)
                    .await?;
            }
        }

        self.commit(tx).await?;

        if !replayed && tokens_back > 0 {
            MetricsSink::add(&self.metrics.tokens_credited, tokens_back as u64);
        }
        info!(dispute = %dispute.id, tokens = tokens_back, "dispute won, tokens restored");
        Ok(Handled::Applied)
    }

    // ==================== plumbing ====================

    async fn begin(&self) -> AppResult<sqlx::Transaction<'static, sqlx::Postgres>> {
        self.pool
            .begin()
            .await
            .map_err(|e| AppError::Transaction(format!("Failed to start transaction: {}", e)))
    }

    async fn commit(&self, tx: sqlx::Transaction<'_, sqlx::Postgres>) -> AppResult<()> {
        tx.commit()
            .await
            .map_err(|e| AppError::Transaction(format!("Failed to commit transaction: {}", e)))
    }
}

fn parse_object<T: serde::de::DeserializeOwned>(object: &serde_json::Value) -> AppResult<T> {
    serde_json::from_value(object.clone())
        .map_err(|e| AppError::InvalidInput(format!("malformed event object: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(json: &str) -> serde_json::Value {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_classify_checkout() {
        assert_eq!(
            classify("checkout.session.completed", &obj("{}")),
            EventClass::CheckoutCompleted
        );
    }

    #[test]
    fn test_classify_refund_paths() {
        assert_eq!(
            classify("refund.created", &obj(r#"{"id":"re_1"}"#)),
            EventClass::RefundSucceeded
        );
        assert_eq!(
            classify("charge.refunded", &obj(r#"{"id":"ch_1"}"#)),
            EventClass::RefundSucceeded
        );
        assert_eq!(
            classify("refund.updated", &obj(r#"{"status":"succeeded"}"#)),
            EventClass::RefundSucceeded
        );
        assert_eq!(
            classify("refund.updated", &obj(r#"{"status":"canceled"}"#)),
            EventClass::RefundCanceled
        );
        assert_eq!(
            classify("refund.updated", &obj(r#"{"status":"pending"}"#)),
            EventClass::Ignored
        );
    }

    #[test]
    fn test_classify_disputes() {
        for t in [
            "charge.dispute.created",
            "charge.dispute.funds_withdrawn",
            "charge.dispute.lost",
        ] {
            assert_eq!(classify(t, &obj("{}")), EventClass::DisputeDebit);
        }
        assert_eq!(
            classify("charge.dispute.closed", &obj(r#"{"status":"won"}"#)),
            EventClass::DisputeWon
        );
        assert_eq!(
            classify("charge.dispute.closed", &obj(r#"{"status":"lost"}"#)),
            EventClass::Ignored
        );
    }

    #[test]
    fn test_classify_ignored_families() {
        for t in [
            "customer.created",
            "plan.updated",
            "product.deleted",
            "price.created",
            "payment_method.attached",
            "invoice.finalized",
            "totally.unknown",
        ] {
            assert_eq!(classify(t, &obj("{}")), EventClass::Ignored, "{t}");
        }
    }

    #[test]
    fn test_event_envelope_parses() {
        let event: ProviderEvent = serde_json::from_str(
            r#"{
                "id": "evt_1",
                "type": "refund.created",
                "data": { "object": { "id": "re_1", "amount": 500, "payment_intent": "pi_1" } }
            }"#,
        )
        .unwrap();
        assert_eq!(event.id, "evt_1");
        assert_eq!(event.event_type, "refund.created");

        let refund: RefundObject = parse_object(&event.data.object).unwrap();
        assert_eq!(refund.id, "re_1");
        assert_eq!(refund.amount, 500);
        assert_eq!(refund.payment_intent.as_deref(), Some("pi_1"));
    }

    #[test]
    fn test_charge_object_with_embedded_refunds() {
        let charge: ChargeObject = serde_json::from_str(
            r#"{
                "id": "ch_1",
                "payment_intent": "pi_1",
                "refunds": { "data": [
                    { "id": "re_1", "amount": 300 },
                    { "id": "re_2", "amount": 200 }
                ]}
            }"#,
        )
        .unwrap();
        let refunds = charge.refunds.unwrap().data;
        assert_eq!(refunds.len(), 2);
        assert_eq!(refunds[1].id, "re_2");
    }

    #[test]
    fn test_malformed_object_is_invalid_input() {
        let err = parse_object::<DisputeObject>(&obj(r#"{"amount":"not-a-number"}"#)).unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }
}
