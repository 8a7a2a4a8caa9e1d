//! Webhook signature verification
//!
//! The provider signs `"{timestamp}.{raw_body}"` with HMAC-SHA256 and sends
//! `t=<timestamp>,v1=<hex>[,v1=<hex>...]` in the `Stripe-Signature` header.
//! Nothing here touches the network or the database.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{BillingError, BillingResult};
use crate::event::WebhookEvent;

type HmacSha256 = Hmac<Sha256>;

/// Name of the header carrying the signature
pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Default accepted clock skew between the signing timestamp and now
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

/// Parsed `Stripe-Signature` header
#[derive(Debug, Clone, PartialEq, Eq)]
struct SignatureHeader {
    timestamp: i64,
    signatures: Vec<String>,
}

fn parse_signature_header(header: &str) -> BillingResult<SignatureHeader> {
    let mut timestamp: Option<i64> = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse().ok(),
            "v1" => signatures.push(value.to_string()),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| {
        tracing::warn!("Missing timestamp in signature header");
        BillingError::SignatureInvalid
    })?;

    if signatures.is_empty() {
        tracing::warn!("Missing v1 signature in signature header");
        return Err(BillingError::SignatureInvalid);
    }

    Ok(SignatureHeader {
        timestamp,
        signatures,
    })
}

fn compute_signature(secret: &str, timestamp: i64, payload: &[u8]) -> BillingResult<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| {
        tracing::error!("Invalid webhook secret key");
        BillingError::SignatureInvalid
    })?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Build a valid signature header for `payload`.
///
/// Used to sign fixtures and for local replay tooling.
pub fn sign_payload(secret: &str, timestamp: i64, payload: &[u8]) -> BillingResult<String> {
    let signature = compute_signature(secret, timestamp, payload)?;
    Ok(format!("t={},v1={}", timestamp, hex::encode(signature)))
}

fn now_unix() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

/// Verifies inbound events against the shared webhook secret
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: String,
    tolerance_secs: i64,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("secret", &"[redacted]")
            .field("tolerance_secs", &self.tolerance_secs)
            .finish()
    }
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            tolerance_secs: DEFAULT_TOLERANCE_SECS,
        }
    }

    pub fn with_tolerance(mut self, tolerance_secs: i64) -> Self {
        self.tolerance_secs = tolerance_secs;
        self
    }

    /// Verify the signature and decode the event
    pub fn verify(&self, payload: &[u8], signature: &str) -> BillingResult<WebhookEvent> {
        self.verify_at(payload, signature, now_unix())
    }

    /// Same as [`verify`](Self::verify) with an explicit clock
    pub fn verify_at(
        &self,
        payload: &[u8],
        signature: &str,
        now: i64,
    ) -> BillingResult<WebhookEvent> {
        let header = parse_signature_header(signature)?;

        // The header is unauthenticated, so the difference must not overflow
        let skew = now.abs_diff(header.timestamp);
        if skew > self.tolerance_secs.unsigned_abs() {
            tracing::warn!(
                timestamp = header.timestamp,
                now = now,
                diff = skew,
                "Webhook timestamp outside tolerance"
            );
            return Err(BillingError::SignatureInvalid);
        }

        let expected = compute_signature(&self.secret, header.timestamp, payload)?;

        let matched = header.signatures.iter().any(|candidate| {
            hex::decode(candidate)
                .map(|provided| {
                    provided.len() == expected.len() && bool::from(provided.ct_eq(&expected))
                })
                .unwrap_or(false)
        });

        if !matched {
            tracing::warn!(
                payload_len = payload.len(),
                candidates = header.signatures.len(),
                "Webhook signature mismatch"
            );
            return Err(BillingError::SignatureInvalid);
        }

        serde_json::from_slice(payload).map_err(|e| {
            tracing::warn!(parse_error = %e, "Failed to parse webhook event JSON");
            BillingError::InvalidPayload("malformed event JSON".to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";
    const NOW: i64 = 1_700_000_000;

    fn payload() -> Vec<u8> {
        br#"{"id":"evt_1","type":"payment_intent.succeeded","livemode":false,"data":{"object":{"id":"pi_1"}}}"#
            .to_vec()
    }

    #[test]
    fn test_valid_signature_accepted() {
        let body = payload();
        let header = sign_payload(SECRET, NOW, &body).unwrap();
        let event = WebhookVerifier::new(SECRET)
            .verify_at(&body, &header, NOW)
            .unwrap();
        assert_eq!(event.id, "evt_1");
        assert_eq!(event.event_type, "payment_intent.succeeded");
    }

    #[test]
    fn test_tampered_body_rejected() {
        let body = payload();
        let header = sign_payload(SECRET, NOW, &body).unwrap();
        let tampered = String::from_utf8(body)
            .unwrap()
            .replace("pi_1", "pi_2")
            .into_bytes();

        let err = WebhookVerifier::new(SECRET)
            .verify_at(&tampered, &header, NOW)
            .unwrap_err();
        assert!(matches!(err, BillingError::SignatureInvalid));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let body = payload();
        let header = sign_payload("whsec_other", NOW, &body).unwrap();
        assert!(WebhookVerifier::new(SECRET)
            .verify_at(&body, &header, NOW)
            .is_err());
    }

    #[test]
    fn test_timestamp_tolerance_boundary() {
        let body = payload();
        let verifier = WebhookVerifier::new(SECRET);

        let at_limit = sign_payload(SECRET, NOW - 300, &body).unwrap();
        assert!(verifier.verify_at(&body, &at_limit, NOW).is_ok());

        let past_limit = sign_payload(SECRET, NOW - 301, &body).unwrap();
        assert!(matches!(
            verifier.verify_at(&body, &past_limit, NOW),
            Err(BillingError::SignatureInvalid)
        ));

        let future = sign_payload(SECRET, NOW + 301, &body).unwrap();
        assert!(verifier.verify_at(&body, &future, NOW).is_err());
    }

    #[test]
    fn test_any_v1_candidate_may_match() {
        let body = payload();
        let valid = sign_payload(SECRET, NOW, &body).unwrap();
        let valid_sig = valid.split("v1=").nth(1).unwrap();
        let header = format!("t={},v1={},v1={},v0=legacy", NOW, "00".repeat(32), valid_sig);

        assert!(WebhookVerifier::new(SECRET)
            .verify_at(&body, &header, NOW)
            .is_ok());
    }

    #[test]
    fn test_malformed_headers_rejected() {
        let body = payload();
        let verifier = WebhookVerifier::new(SECRET);
        for header in [
            "",
            "garbage",
            "t=abc,v1=00",
            "v1=deadbeef",
            "t=1700000000",
            "t=-9223372036854775808,v1=00",
            "t=9223372036854775807,v1=00",
        ] {
            assert!(
                matches!(
                    verifier.verify_at(&body, header, NOW),
                    Err(BillingError::SignatureInvalid)
                ),
                "header {:?} should be rejected",
                header
            );
        }
    }

    #[test]
    fn test_extreme_timestamps_rejected_at_extreme_clocks() {
        let body = payload();
        let verifier = WebhookVerifier::new(SECRET);
        let header = format!("t={},v1={}", i64::MIN, "00".repeat(32));
        assert!(verifier.verify_at(&body, &header, i64::MAX).is_err());
        let header = format!("t={},v1={}", i64::MAX, "00".repeat(32));
        assert!(verifier.verify_at(&body, &header, i64::MIN).is_err());
    }

    #[test]
    fn test_signed_garbage_is_invalid_payload() {
        let body = b"not json".to_vec();
        let header = sign_payload(SECRET, NOW, &body).unwrap();
        let err = WebhookVerifier::new(SECRET)
            .verify_at(&body, &header, NOW)
            .unwrap_err();
        assert!(matches!(err, BillingError::InvalidPayload(_)));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let debug = format!("{:?}", WebhookVerifier::new(SECRET));
        assert!(!debug.contains(SECRET));
    }
}
