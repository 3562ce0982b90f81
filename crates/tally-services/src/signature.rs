//! Webhook signature verification
//!
//! The provider signs each delivery with HMAC-SHA256 over `"{t}.{body}"` and
//! sends the result in a single header of the form `t=<unix>,v1=<hex>`.
//! Verification is constant-time via `Mac::verify_slice`; an optional
//! timestamp tolerance rejects stale replays.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tally_core::{AppError, AppResult};

type HmacSha256 = Hmac<Sha256>;

/// Parsed signature header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    pub timestamp: i64,
    pub signatures: Vec<String>,
}

/// Parse a `t=<unix>,v1=<hex>` header. Multiple `v1` entries are accepted
/// (the provider rotates secrets that way); anything else is rejected.
pub fn parse_header(header: &str) -> AppResult<SignatureHeader> {
    let mut timestamp: Option<i64> = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let mut kv = part.trim().splitn(2, '=');
        match (kv.next(), kv.next()) {
            (Some("t"), Some(value)) => {
                if timestamp.is_some() {
                    return Err(AppError::BadSignature(
                        "duplicate timestamp in signature header".to_string(),
                    ));
                }
                timestamp = Some(value.parse().map_err(|_| {
                    AppError::BadSignature("malformed timestamp in signature header".to_string())
                })?);
            }
            (Some("v1"), Some(value)) => signatures.push(value.to_string()),
            // Unknown schemes (v0 test-mode signatures etc.) are skipped
            (Some(_), Some(_)) => {}
            _ => {
                return Err(AppError::BadSignature(
                    "malformed signature header".to_string(),
                ))
            }
        }
    }

    let timestamp =
        timestamp.ok_or_else(|| AppError::BadSignature("missing timestamp".to_string()))?;
    if signatures.is_empty() {
        return Err(AppError::BadSignature("missing v1 signature".to_string()));
    }

    Ok(SignatureHeader {
        timestamp,
        signatures,
    })
}

/// Verify a raw payload against its signature header.
///
/// `tolerance_secs <= 0` disables the timestamp check.
pub fn verify(
    secret: &str,
    payload: &[u8],
    header: &str,
    now: DateTime<Utc>,
    tolerance_secs: i64,
) -> AppResult<()> {
    let parsed = parse_header(header)?;

    if tolerance_secs > 0 {
        let age = (now.timestamp() - parsed.timestamp).abs();
        if age > tolerance_secs {
            return Err(AppError::BadSignature(format!(
                "signature timestamp outside tolerance ({age}s)"
            )));
        }
    }

    for candidate in &parsed.signatures {
        let Ok(bytes) = hex::decode(candidate) else {
            continue;
        };
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| AppError::Internal(format!("invalid webhook secret: {e}")))?;
        mac.update(parsed.timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        if mac.verify_slice(&bytes).is_ok() {
            return Ok(());
        }
    }

    Err(AppError::BadSignature("signature mismatch".to_string()))
}

/// Sign a payload the way the provider would. Used by tests and local tooling.
pub fn sign(secret: &str, payload: &[u8], timestamp: i64) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    let digest = hex::encode(mac.finalize().into_bytes());
    format!("t={timestamp},v1={digest}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SECRET: &str = "whsec_test_secret";

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_sign_then_verify() {
        let payload = br#"{"id":"evt_1","type":"checkout.session.completed"}"#;
        let header = sign(SECRET, payload, now().timestamp());
        assert!(verify(SECRET, payload, &header, now(), 300).is_ok());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let payload = b"{}";
        let header = sign(SECRET, payload, now().timestamp());
        let err = verify("whsec_other", payload, &header, now(), 300).unwrap_err();
        assert!(matches!(err, AppError::BadSignature(_)));
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let header = sign(SECRET, b"{\"amount\":100}", now().timestamp());
        let err = verify(SECRET, b"{\"amount\":999}", &header, now(), 300).unwrap_err();
        assert!(matches!(err, AppError::BadSignature(_)));
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let payload = b"{}";
        let old = now().timestamp() - 600;
        let header = sign(SECRET, payload, old);
        let err = verify(SECRET, payload, &header, now(), 300).unwrap_err();
        assert!(matches!(err, AppError::BadSignature(_)));
    }

    #[test]
    fn test_tolerance_disabled() {
        let payload = b"{}";
        let old = now().timestamp() - 86_400;
        let header = sign(SECRET, payload, old);
        assert!(verify(SECRET, payload, &header, now(), 0).is_ok());
    }

    #[test]
    fn test_rotated_secret_extra_v1_accepted() {
        let payload = b"{}";
        let ts = now().timestamp();
        let good = sign(SECRET, payload, ts);
        // Prepend a stale signature from a rotated-out secret
        let stale = sign("whsec_rotated_out", payload, ts);
        let stale_sig = stale.split("v1=").nth(1).unwrap();
        let header = format!("{good},v1={stale_sig}");
        assert!(verify(SECRET, payload, &header, now(), 300).is_ok());
    }

    #[test]
    fn test_malformed_headers_rejected() {
        for header in ["", "t=abc,v1=00", "v1=00", "t=123", "garbage"] {
            assert!(
                parse_header(header).is_err(),
                "header {header:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_duplicate_timestamp_rejected() {
        let err = parse_header("t=1,t=2,v1=00").unwrap_err();
        assert!(matches!(err, AppError::BadSignature(_)));
    }

    #[test]
    fn test_non_hex_signature_skipped() {
        let payload = b"{}";
        let ts = now().timestamp();
        let good = sign(SECRET, payload, ts);
        let sig = good.split("v1=").nth(1).unwrap();
        let header = format!("t={ts},v1=zzzz,v1={sig}");
        assert!(verify(SECRET, payload, &header, now(), 300).is_ok());
    }
}
