//! Stripe payments
//!
//! Creates PaymentIntents through Stripe's REST API and verifies signed
//! webhook deliveries.

use braggly_common::api::{verify_stripe_signature, SignatureError, STRIPE_TOLERANCE_SECS};
use braggly_common::config::StripeConfig;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

const STRIPE_API_BASE: &str = "https://api.stripe.com";

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("Stripe is not configured")]
    NotConfigured,

    #[error("Amount must be positive, got {0}")]
    InvalidAmount(i64),

    #[error("Stripe returned {status}: {message}")]
    Stripe { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid webhook signature: {0}")]
    Signature(#[from] SignatureError),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for PaymentError {
    fn from(e: reqwest::Error) -> Self {
        PaymentError::Network(e.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct PaymentIntent {
    id: String,
    client_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    #[serde(default)]
    message: Option<String>,
}

/// Verified webhook event
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub data: WebhookData,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookData {
    #[serde(default)]
    pub object: Value,
}

impl WebhookEvent {
    /// Id of the object the event is about (the PaymentIntent id)
    pub fn object_id(&self) -> Option<&str> {
        self.data.object.get("id").and_then(Value::as_str)
    }
}

pub struct StripeClient {
    http: reqwest::Client,
    api_base: String,
    secret_key: Option<String>,
    webhook_secret: Option<String>,
    currency: String,
}

impl StripeClient {
    pub fn new(config: &StripeConfig, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        Self {
            http,
            api_base: STRIPE_API_BASE.to_string(),
            secret_key: config.secret_key.clone(),
            webhook_secret: config.webhook_secret.clone(),
            currency: config.currency.clone(),
        }
    }

    /// Point the client at another API host
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    /// Create a card PaymentIntent for `amount` minor units
    ///
    /// Returns the intent's client secret.
    pub async fn create_payment_intent(&self, amount: i64) -> Result<String, PaymentError> {
        let secret_key = self.secret_key.as_deref().ok_or(PaymentError::NotConfigured)?;
        if amount <= 0 {
            return Err(PaymentError::InvalidAmount(amount));
        }

        let response = self
            .http
            .post(format!("{}/v1/payment_intents", self.api_base))
            .basic_auth(secret_key, None::<&str>)
            .form(&[
                ("amount", amount.to_string()),
                ("currency", self.currency.clone()),
                ("payment_method_types[]", "card".to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            let message = serde_json::from_str::<StripeErrorBody>(&text)
                .ok()
                .and_then(|body| body.error.message)
                .unwrap_or(text);
            return Err(PaymentError::Stripe {
                status: status.as_u16(),
                message,
            });
        }

        let intent: PaymentIntent =
            serde_json::from_str(&text).map_err(|e| PaymentError::Parse(e.to_string()))?;
        info!(intent_id = %intent.id, amount, currency = %self.currency, "PaymentIntent created");
        intent
            .client_secret
            .ok_or_else(|| PaymentError::Parse("PaymentIntent has no client_secret".to_string()))
    }

    /// Verify a webhook delivery and decode its event
    pub fn verify_webhook(
        &self,
        payload: &[u8],
        signature_header: &str,
        now: i64,
    ) -> Result<WebhookEvent, PaymentError> {
        let secret = self
            .webhook_secret
            .as_deref()
            .ok_or(PaymentError::NotConfigured)?;

        verify_stripe_signature(payload, signature_header, secret, now, STRIPE_TOLERANCE_SECS)?;
        let event: WebhookEvent =
            serde_json::from_slice(payload).map_err(|e| PaymentError::Parse(e.to_string()))?;
        debug!(event_type = %event.event_type, "Webhook signature verified");
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use braggly_common::api::compute_stripe_signature;

    fn client(secret: Option<&str>) -> StripeClient {
        StripeClient::new(
            &StripeConfig {
                secret_key: Some("sk_test".to_string()),
                webhook_secret: secret.map(str::to_string),
                currency: "pln".to_string(),
            },
            Duration::from_secs(5),
        )
    }

    #[test]
    fn test_verify_webhook() {
        let stripe = client(Some("whsec_test"));
        let payload = br#"{"id":"evt_1","type":"payment_intent.succeeded","data":{"object":{"id":"pi_42"}}}"#;
        let now = 1_700_000_000;
        let header = format!("t={},v1={}", now, compute_stripe_signature("whsec_test", now, payload));

        let event = stripe.verify_webhook(payload, &header, now + 10).unwrap();
        assert_eq!(event.event_type, "payment_intent.succeeded");
        assert_eq!(event.object_id(), Some("pi_42"));
    }

    #[test]
    fn test_verify_webhook_rejects_tampering() {
        let stripe = client(Some("whsec_test"));
        let now = 1_700_000_000;
        let header = format!(
            "t={},v1={}",
            now,
            compute_stripe_signature("whsec_test", now, b"{\"type\":\"a\"}")
        );
        let result = stripe.verify_webhook(b"{\"type\":\"b\"}", &header, now);
        assert!(matches!(
            result,
            Err(PaymentError::Signature(SignatureError::Mismatch))
        ));
    }

    #[test]
    fn test_webhook_without_secret() {
        let stripe = client(None);
        assert!(matches!(
            stripe.verify_webhook(b"{}", "t=1,v1=00", 1),
            Err(PaymentError::NotConfigured)
        ));
    }

    #[tokio::test]
    async fn test_non_positive_amount_rejected_locally() {
        let stripe = client(None);
        assert!(matches!(
            stripe.create_payment_intent(0).await,
            Err(PaymentError::InvalidAmount(0))
        ));
    }
}
