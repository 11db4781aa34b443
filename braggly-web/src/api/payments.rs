//! Stripe payment endpoints

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use braggly_common::api::{CreatePaymentIntentRequest, PaymentIntentResponse};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::session::SessionToken;
use crate::{
    error::{ApiError, ApiResult},
    AppState,
};

const SIGNATURE_HEADER: &str = "stripe-signature";
const PAYMENT_SUCCEEDED: &str = "payment_intent.succeeded";

/// POST /api/payments/create-payment-intent
pub async fn create_payment_intent(
    State(state): State<AppState>,
    SessionToken(_token): SessionToken,
    Json(request): Json<CreatePaymentIntentRequest>,
) -> ApiResult<Json<PaymentIntentResponse>> {
    let client_secret = state.stripe.create_payment_intent(request.amount).await?;
    Ok(Json(PaymentIntentResponse { client_secret }))
}

/// POST /api/payments/webhook
///
/// Called by Stripe, so there is no session token. The raw body is needed
/// for signature verification.
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let Some(signature) = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
    else {
        warn!("Webhook without Stripe-Signature header");
        return Err(ApiError::BadRequest("missing Stripe-Signature header".to_string()));
    };

    let event = state
        .stripe
        .verify_webhook(&body, signature, Utc::now().timestamp())
        .map_err(|e| {
            warn!("Webhook rejected: {}", e);
            ApiError::from(e)
        })?;

    if event.event_type == PAYMENT_SUCCEEDED {
        info!(
            intent_id = event.object_id().unwrap_or("unknown"),
            "PaymentIntent succeeded"
        );
    } else {
        debug!(event_type = %event.event_type, "Unhandled webhook event");
    }

    Ok(Json(json!({ "received": true })))
}

/// Build payment routes
pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/api/payments/create-payment-intent", post(create_payment_intent))
        .route("/api/payments/webhook", post(webhook))
}
