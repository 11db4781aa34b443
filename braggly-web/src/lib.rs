//! braggly-web library interface
//!
//! HTTP gateway in front of the Braggly backend: authentication cookies,
//! route gating, backend proxies, Stripe payments, translations and the
//! COD import polling engine.

pub mod api;
pub mod backend;
pub mod cod;
pub mod error;
pub mod i18n;
pub mod oauth;
pub mod payments;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use braggly_common::config::GatewayConfig;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::backend::{BackendClient, BackendError};
use crate::cod::SessionRegistry;
use crate::i18n::Translations;
use crate::oauth::GoogleOAuth;
use crate::payments::StripeClient;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub backend: BackendClient,
    /// COD polling sessions keyed by backend token
    pub sessions: SessionRegistry,
    pub translations: Arc<Translations>,
    pub stripe: Arc<StripeClient>,
    pub google: Arc<GoogleOAuth>,
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(config: GatewayConfig) -> Result<Self, BackendError> {
        let backend = BackendClient::new(&config.backend_url, config.request_timeout)?;
        let translations = Translations::new(&config.locales_dir, config.default_locale.clone());
        let stripe = StripeClient::new(&config.stripe, config.request_timeout);
        let google = GoogleOAuth::new(config.google.clone(), config.request_timeout);

        Ok(Self {
            config: Arc::new(config),
            backend,
            sessions: SessionRegistry::new(),
            translations: Arc::new(translations),
            stripe: Arc::new(stripe),
            google: Arc::new(google),
            startup_time: Utc::now(),
        })
    }

    pub fn with_stripe(mut self, stripe: StripeClient) -> Self {
        self.stripe = Arc::new(stripe);
        self
    }

    pub fn with_google(mut self, google: GoogleOAuth) -> Self {
        self.google = Arc::new(google);
        self
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::middleware;

    // Page shell, gated by role
    let pages = api::page_routes().route_layer(middleware::from_fn_with_state(
        state.clone(),
        api::gate_middleware,
    ));

    Router::new()
        .merge(pages)
        .merge(api::auth_routes())
        .merge(api::cod_routes())
        .merge(api::xrd_routes())
        .merge(api::admin_routes())
        .merge(api::credit_routes())
        .merge(api::i18n_routes())
        .merge(api::payment_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
