//! Translation endpoints

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Deserialize;
use serde_json::{json, Value};

use super::session::LOCALE_COOKIE;
use crate::{
    error::{ApiError, ApiResult},
    i18n::{is_valid_locale, TranslationMap},
    AppState,
};

const LOCALE_COOKIE_DAYS: i64 = 365;

#[derive(Debug, Deserialize)]
pub struct LocaleQuery {
    pub locale: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LocaleRequest {
    pub locale: String,
}

/// GET /api/i18n?locale=xx
///
/// Without `locale` the `locale` cookie decides, then the configured default.
pub async fn get_translations(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<LocaleQuery>,
) -> ApiResult<Json<TranslationMap>> {
    let locale = query
        .locale
        .filter(|l| !l.is_empty())
        .or_else(|| jar.get(LOCALE_COOKIE).map(|c| c.value().to_string()))
        .unwrap_or_else(|| state.translations.default_locale().to_string());

    let translations = state.translations.load(&locale).await?;
    Ok(Json(translations.as_ref().clone()))
}

/// POST /api/locale
pub async fn set_locale(
    jar: CookieJar,
    Json(request): Json<LocaleRequest>,
) -> ApiResult<(CookieJar, Json<Value>)> {
    if !is_valid_locale(&request.locale) {
        return Err(ApiError::BadRequest(format!("invalid locale: {}", request.locale)));
    }

    let cookie = Cookie::build((LOCALE_COOKIE, request.locale.clone()))
        .path("/")
        .same_site(SameSite::Lax)
        .max_age(time::Duration::days(LOCALE_COOKIE_DAYS))
        .build();

    Ok((jar.add(cookie), Json(json!({ "locale": request.locale }))))
}

/// Build translation routes
pub fn i18n_routes() -> Router<AppState> {
    Router::new()
        .route("/api/i18n", get(get_translations))
        .route("/api/locale", post(set_locale))
}
