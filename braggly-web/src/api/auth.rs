//! Sign-in, sign-out and the current-user proxy
//!
//! The backend issues the session token; the gateway keeps it in an
//! HttpOnly `token` cookie so page requests can be gated server-side.

use axum::{
    extract::{Query, State},
    response::Redirect,
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::CookieJar;
use braggly_common::api::{LoginRequest, TokenResponse, WhoAmI};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::session::{
    private_cookie, removal_cookie, SessionToken, BALANCE_COOKIE, FREE_ACCESS_COOKIE,
    GOOGLE_REFRESH_COOKIE, OAUTH_STATE_COOKIE, ROLE_COOKIE, TOKEN_COOKIE,
};
use crate::{
    error::{ApiError, ApiResult},
    oauth, AppState,
};

/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(request): Json<LoginRequest>,
) -> ApiResult<(CookieJar, Json<TokenResponse>)> {
    if request.username.trim().is_empty() || request.password.is_empty() {
        return Err(ApiError::BadRequest("username and password are required".to_string()));
    }

    let token = state.backend.login(&request.username, &request.password).await?;
    info!(username = %request.username, "User signed in");

    let jar = jar.add(private_cookie(TOKEN_COOKIE, token.clone()));
    Ok((jar, Json(TokenResponse { token })))
}

/// POST /api/auth/logout
///
/// Also tears down the caller's COD session.
pub async fn logout(State(state): State<AppState>, jar: CookieJar) -> (CookieJar, Json<Value>) {
    if let Some(token) = jar.get(TOKEN_COOKIE).map(|c| c.value().to_string()) {
        state.sessions.remove(&token).await;
    }

    let jar = [
        TOKEN_COOKIE,
        ROLE_COOKIE,
        BALANCE_COOKIE,
        FREE_ACCESS_COOKIE,
        GOOGLE_REFRESH_COOKIE,
    ]
    .into_iter()
    .fold(jar, |jar, name| jar.remove(removal_cookie(name)));

    (jar, Json(json!({ "status": "ok" })))
}

/// GET /api/whoami
pub async fn whoami(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
) -> ApiResult<Json<WhoAmI>> {
    let who = state.backend.with_token(token).whoami().await?;
    Ok(Json(who))
}

/// GET /api/auth/google/start
pub async fn google_start(
    State(state): State<AppState>,
    jar: CookieJar,
) -> ApiResult<(CookieJar, Redirect)> {
    let oauth_state = oauth::new_state();
    let url = state.google.authorize_url(&oauth_state)?;
    let jar = jar.add(private_cookie(OAUTH_STATE_COOKIE, oauth_state));
    Ok((jar, Redirect::to(&url)))
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// GET /api/auth/google/callback
pub async fn google_callback(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(params): Query<CallbackParams>,
) -> ApiResult<(CookieJar, Redirect)> {
    if let Some(error) = params.error {
        warn!("Google sign-in cancelled: {}", error);
        return Err(ApiError::Unauthorized);
    }

    let expected = jar.get(OAUTH_STATE_COOKIE).map(|c| c.value().to_string());
    match (expected.as_deref(), params.state.as_deref()) {
        (Some(expected), Some(received)) if !expected.is_empty() && expected == received => {}
        _ => {
            warn!("Google callback state mismatch");
            return Err(ApiError::BadRequest("invalid OAuth state".to_string()));
        }
    }

    let code = params
        .code
        .filter(|code| !code.is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing authorization code".to_string()))?;

    let tokens = state.google.exchange_code(&code).await?;
    let token = state.backend.google_login(&tokens.id_token).await?;
    info!("User signed in with Google");

    let mut jar = jar
        .remove(removal_cookie(OAUTH_STATE_COOKIE))
        .add(private_cookie(TOKEN_COOKIE, token));
    if let Some(refresh_token) = tokens.refresh_token {
        jar = jar.add(private_cookie(GOOGLE_REFRESH_COOKIE, refresh_token));
    }

    Ok((jar, Redirect::to("/")))
}

/// POST /api/auth/google/refresh
pub async fn google_refresh(
    State(state): State<AppState>,
    jar: CookieJar,
) -> ApiResult<(CookieJar, Json<TokenResponse>)> {
    let refresh_token = jar
        .get(GOOGLE_REFRESH_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|t| !t.is_empty())
        .ok_or(ApiError::Unauthorized)?;

    let tokens = state.google.refresh(&refresh_token).await?;
    let token = state.backend.google_login(&tokens.id_token).await?;

    // The old session polls with a token that is about to be replaced
    if let Some(previous) = jar.get(TOKEN_COOKIE).map(|c| c.value().to_string()) {
        if previous != token {
            state.sessions.remove(&previous).await;
        }
    }

    let mut jar = jar.add(private_cookie(TOKEN_COOKIE, token.clone()));
    if let Some(rotated) = tokens.refresh_token {
        jar = jar.add(private_cookie(GOOGLE_REFRESH_COOKIE, rotated));
    }
    Ok((jar, Json(TokenResponse { token })))
}

/// Build authentication routes
pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/google/start", get(google_start))
        .route("/api/auth/google/callback", get(google_callback))
        .route("/api/auth/google/refresh", post(google_refresh))
        .route("/api/whoami", get(whoami))
}
