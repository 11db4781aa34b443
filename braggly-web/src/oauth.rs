//! Google OAuth 2.0 client
//!
//! Authorization-code flow: the browser is redirected to Google, the
//! callback code is exchanged for tokens, and the Google `id_token` is handed
//! to the backend's `/api/auth/google`. The refresh token lets the gateway
//! obtain a fresh `id_token` later without another consent screen.

use braggly_common::config::GoogleConfig;
use rand::distributions::Alphanumeric;
use rand::Rng;
use reqwest::Url;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

const AUTHORIZE_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
const SCOPES: &str = "openid email profile";

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("Google sign-in is not configured")]
    NotConfigured,

    #[error("Google rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for OAuthError {
    fn from(e: reqwest::Error) -> Self {
        OAuthError::Network(e.to_string())
    }
}

/// Token endpoint response
#[derive(Debug, Clone, Deserialize)]
pub struct GoogleTokens {
    pub id_token: String,
    #[serde(default)]
    pub access_token: Option<String>,
    /// Only returned on the first consent
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TokenErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Random value for the `state` parameter
pub fn new_state() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

pub struct GoogleOAuth {
    http: reqwest::Client,
    config: GoogleConfig,
    authorize_endpoint: String,
    token_endpoint: String,
}

impl GoogleOAuth {
    pub fn new(config: GoogleConfig, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        Self {
            http,
            config,
            authorize_endpoint: AUTHORIZE_ENDPOINT.to_string(),
            token_endpoint: TOKEN_ENDPOINT.to_string(),
        }
    }

    /// Override Google's endpoints
    pub fn with_endpoints(
        mut self,
        authorize_endpoint: impl Into<String>,
        token_endpoint: impl Into<String>,
    ) -> Self {
        self.authorize_endpoint = authorize_endpoint.into();
        self.token_endpoint = token_endpoint.into();
        self
    }

    pub fn is_configured(&self) -> bool {
        self.config.is_complete()
    }

    fn credentials(&self) -> Result<(&str, &str, &str), OAuthError> {
        match (
            self.config.client_id.as_deref(),
            self.config.client_secret.as_deref(),
            self.config.redirect_uri.as_deref(),
        ) {
            (Some(id), Some(secret), Some(redirect)) => Ok((id, secret, redirect)),
            _ => Err(OAuthError::NotConfigured),
        }
    }

    /// URL of Google's consent screen for `state`
    pub fn authorize_url(&self, state: &str) -> Result<String, OAuthError> {
        let (client_id, _, redirect_uri) = self.credentials()?;
        let url = Url::parse_with_params(
            &self.authorize_endpoint,
            &[
                ("client_id", client_id),
                ("redirect_uri", redirect_uri),
                ("response_type", "code"),
                ("scope", SCOPES),
                ("access_type", "offline"),
                ("prompt", "consent"),
                ("state", state),
            ],
        )
        .map_err(|e| OAuthError::Parse(e.to_string()))?;
        Ok(url.into())
    }

    /// Exchange the callback `code` for tokens
    pub async fn exchange_code(&self, code: &str) -> Result<GoogleTokens, OAuthError> {
        let (client_id, client_secret, redirect_uri) = self.credentials()?;
        debug!("Exchanging Google authorization code");
        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("redirect_uri", redirect_uri),
        ])
        .await
    }

    /// Obtain a fresh `id_token` with a stored refresh token
    pub async fn refresh(&self, refresh_token: &str) -> Result<GoogleTokens, OAuthError> {
        let (client_id, client_secret, _) = self.credentials()?;
        debug!("Refreshing Google token");
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", client_id),
            ("client_secret", client_secret),
        ])
        .await
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<GoogleTokens, OAuthError> {
        let response = self.http.post(&self.token_endpoint).form(form).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<TokenErrorBody>(&text)
                .map(|body| body.error_description.unwrap_or(body.error))
                .unwrap_or(text);
            return Err(OAuthError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        serde_json::from_str(&text).map_err(|e| OAuthError::Parse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> GoogleOAuth {
        GoogleOAuth::new(
            GoogleConfig {
                client_id: Some("client-1".to_string()),
                client_secret: Some("secret".to_string()),
                redirect_uri: Some("http://localhost:3000/api/auth/google/callback".to_string()),
            },
            Duration::from_secs(5),
        )
    }

    #[test]
    fn test_authorize_url_carries_state_and_redirect() {
        let url = configured().authorize_url("abc123").unwrap();
        let parsed = Url::parse(&url).unwrap();
        let params: std::collections::HashMap<_, _> = parsed.query_pairs().into_owned().collect();

        assert_eq!(parsed.host_str(), Some("accounts.google.com"));
        assert_eq!(params["state"], "abc123");
        assert_eq!(params["client_id"], "client-1");
        assert_eq!(params["redirect_uri"], "http://localhost:3000/api/auth/google/callback");
        assert_eq!(params["access_type"], "offline");
    }

    #[test]
    fn test_unconfigured() {
        let oauth = GoogleOAuth::new(GoogleConfig::default(), Duration::from_secs(5));
        assert!(!oauth.is_configured());
        assert!(matches!(oauth.authorize_url("x"), Err(OAuthError::NotConfigured)));
    }

    #[test]
    fn test_new_state_is_random() {
        let a = new_state();
        let b = new_state();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }
}
