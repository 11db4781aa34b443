//! Request authentication helpers
//!
//! - Bearer token extraction for requests forwarded to the backend
//! - Stripe webhook signature verification
//!
//! # Stripe signatures
//!
//! The `Stripe-Signature` header carries `t=<unix seconds>` and one or more
//! `v1=<hex>` entries. Each `v1` is HMAC-SHA256 over `"{t}.{raw body}"` keyed
//! with the endpoint's webhook secret. A request is accepted when any `v1`
//! matches and `t` lies within the tolerance window.
//!
//! Pure functions only, no HTTP framework dependencies.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a signed webhook payload, in seconds
pub const STRIPE_TOLERANCE_SECS: i64 = 300;

/// Webhook signature verification failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("Malformed signature header: {0}")]
    Malformed(String),

    #[error("Signature header has no timestamp")]
    MissingTimestamp,

    #[error("Signature header has no v1 signature")]
    MissingSignature,

    #[error("Timestamp {timestamp} outside tolerance (now {now})")]
    Expired { timestamp: i64, now: i64 },

    #[error("No signature matches the payload")]
    Mismatch,
}

/// Parsed `Stripe-Signature` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StripeSignature {
    pub timestamp: i64,
    pub signatures: Vec<String>,
}

impl StripeSignature {
    /// Parse a header of the form `t=1492774577,v1=5257a8...,v0=6ffbb5...`
    ///
    /// Unknown schemes (`v0`, ...) are ignored.
    pub fn parse(header: &str) -> Result<Self, SignatureError> {
        let mut timestamp = None;
        let mut signatures = Vec::new();

        for item in header.split(',') {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }
            let (key, value) = item
                .split_once('=')
                .ok_or_else(|| SignatureError::Malformed(item.to_string()))?;
            match key {
                "t" => {
                    let parsed = value
                        .parse::<i64>()
                        .map_err(|_| SignatureError::Malformed(format!("t={}", value)))?;
                    timestamp = Some(parsed);
                }
                "v1" => signatures.push(value.to_string()),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or(SignatureError::MissingTimestamp)?;
        if signatures.is_empty() {
            return Err(SignatureError::MissingSignature);
        }

        Ok(Self {
            timestamp,
            signatures,
        })
    }
}

/// Compute the hex `v1` signature for `payload` signed at `timestamp`
pub fn compute_stripe_signature(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    let mac = signed_payload_mac(secret, timestamp, payload);
    mac.finalize()
        .into_bytes()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Verify a webhook payload against its `Stripe-Signature` header
///
/// `now` is the current Unix time in seconds; passing it in keeps the
/// function pure.
pub fn verify_stripe_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: i64,
    tolerance_secs: i64,
) -> Result<StripeSignature, SignatureError> {
    let parsed = StripeSignature::parse(header)?;

    if (now - parsed.timestamp).abs() > tolerance_secs {
        return Err(SignatureError::Expired {
            timestamp: parsed.timestamp,
            now,
        });
    }

    let matched = parsed.signatures.iter().any(|candidate| {
        let Some(bytes) = decode_hex(candidate) else {
            return false;
        };
        signed_payload_mac(secret, parsed.timestamp, payload)
            .verify_slice(&bytes)
            .is_ok()
    });

    if matched {
        Ok(parsed)
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header value
pub fn bearer_token(header_value: &str) -> Option<&str> {
    let (scheme, token) = header_value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

fn signed_payload_mac(secret: &str, timestamp: i64, payload: &[u8]) -> HmacSha256 {
    // HMAC accepts keys of any length
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"));
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    mac
}

fn decode_hex(input: &str) -> Option<Vec<u8>> {
    if input.len() % 2 != 0 {
        return None;
    }
    (0..input.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(input.get(i..i + 2)?, 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";
    const BODY: &[u8] = br#"{"id":"evt_1","type":"payment_intent.succeeded"}"#;

    #[test]
    fn test_parse_header_ignores_v0() {
        let parsed = StripeSignature::parse("t=100,v1=abc,v0=def,v1=123").unwrap();
        assert_eq!(parsed.timestamp, 100);
        assert_eq!(parsed.signatures, vec!["abc".to_string(), "123".to_string()]);
    }

    #[test]
    fn test_parse_header_requires_timestamp_and_v1() {
        assert_eq!(
            StripeSignature::parse("v1=abc"),
            Err(SignatureError::MissingTimestamp)
        );
        assert_eq!(
            StripeSignature::parse("t=100,v0=abc"),
            Err(SignatureError::MissingSignature)
        );
        assert!(matches!(
            StripeSignature::parse("garbage"),
            Err(SignatureError::Malformed(_))
        ));
    }

    #[test]
    fn test_valid_signature_accepted() {
        let sig = compute_stripe_signature(SECRET, 1_700_000_000, BODY);
        let header = format!("t=1700000000,v1={}", sig);
        let parsed = verify_stripe_signature(BODY, &header, SECRET, 1_700_000_010, 300).unwrap();
        assert_eq!(parsed.timestamp, 1_700_000_000);
    }

    #[test]
    fn test_any_matching_v1_accepted() {
        let sig = compute_stripe_signature(SECRET, 1_700_000_000, BODY);
        let header = format!("t=1700000000,v1={},v1={}", "00".repeat(32), sig);
        assert!(verify_stripe_signature(BODY, &header, SECRET, 1_700_000_000, 300).is_ok());
    }

    #[test]
    fn test_tampered_body_rejected() {
        let sig = compute_stripe_signature(SECRET, 1_700_000_000, BODY);
        let header = format!("t=1700000000,v1={}", sig);
        let result = verify_stripe_signature(b"{}", &header, SECRET, 1_700_000_000, 300);
        assert_eq!(result, Err(SignatureError::Mismatch));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let sig = compute_stripe_signature("other", 1_700_000_000, BODY);
        let header = format!("t=1700000000,v1={}", sig);
        let result = verify_stripe_signature(BODY, &header, SECRET, 1_700_000_000, 300);
        assert_eq!(result, Err(SignatureError::Mismatch));
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let sig = compute_stripe_signature(SECRET, 1_700_000_000, BODY);
        let header = format!("t=1700000000,v1={}", sig);
        let result = verify_stripe_signature(BODY, &header, SECRET, 1_700_000_301, 300);
        assert!(matches!(result, Err(SignatureError::Expired { .. })));
    }

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token("Bearer abc.def"), Some("abc.def"));
        assert_eq!(bearer_token("bearer   xyz "), Some("xyz"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("abc"), None);
    }
}
