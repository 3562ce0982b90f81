//! Provider webhook endpoint
//!
//! The raw body is passed through byte-for-byte for signature verification.
//! Exactly one signature header must be present; zero or several is a 400
//! before any processing. Outcome mapping: accepted (including duplicates and
//! ignored types) is 2xx so the provider stops retrying, semantic rejections
//! are 4xx, transient failures are 5xx to trigger a retry.

use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::json;
use std::sync::Arc;
use tally_services::{WebhookOutcome, WebhookProcessor};
use tracing::warn;

/// Signature header set by the payment provider
const SIGNATURE_HEADER: &str = "Stripe-Signature";

/// Configure webhook routes
pub fn configure_webhooks(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/billing/webhooks").route("/stripe", web::post().to(stripe_webhook)),
    );
}

/// POST /billing/webhooks/stripe
async fn stripe_webhook(
    req: HttpRequest,
    body: web::Bytes,
    processor: web::Data<Arc<WebhookProcessor>>,
) -> HttpResponse {
    let mut headers = req.headers().get_all(SIGNATURE_HEADER);
    let Some(signature) = headers.next() else {
        warn!("webhook delivery without signature header");
        return bad_request("missing_signature", "missing signature header");
    };
    if headers.next().is_some() {
        warn!("webhook delivery with multiple signature headers");
        return bad_request("duplicate_signature", "multiple signature headers");
    }
    let Ok(signature) = signature.to_str() else {
        return bad_request("malformed_signature", "signature header is not valid text");
    };

    match processor.process(&body, signature).await {
        WebhookOutcome::Ok => HttpResponse::Ok().json(json!({ "received": true })),
        WebhookOutcome::Duplicate => {
            HttpResponse::Ok().json(json!({ "received": true, "duplicate": true }))
        }
        WebhookOutcome::BadSignature => bad_request("bad_signature", "signature verification failed"),
        WebhookOutcome::Rejected => bad_request("rejected", "event could not be processed"),
        WebhookOutcome::Failed => HttpResponse::ServiceUnavailable().json(json!({
            "error": "processing_failed",
            "retryable": true,
        })),
    }
}

fn bad_request(code: &str, message: &str) -> HttpResponse {
    HttpResponse::BadRequest().json(json!({ "error": code, "message": message }))
}
