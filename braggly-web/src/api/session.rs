//! Session token extraction and cookie helpers

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use braggly_common::api::bearer_token;

use crate::error::ApiError;

pub const TOKEN_COOKIE: &str = "token";
pub const ROLE_COOKIE: &str = "Role";
pub const BALANCE_COOKIE: &str = "Balance";
pub const FREE_ACCESS_COOKIE: &str = "FreeAccess";
pub const LOCALE_COOKIE: &str = "locale";
pub const OAUTH_STATE_COOKIE: &str = "oauth_state";
pub const GOOGLE_REFRESH_COOKIE: &str = "google_refresh";

/// Backend token of the caller
///
/// Read from `Authorization: Bearer`, falling back to the `token` cookie.
#[derive(Debug, Clone)]
pub struct SessionToken(pub String);

impl SessionToken {
    /// Token from request headers, if any
    pub fn from_parts(parts: &Parts) -> Option<Self> {
        let from_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(bearer_token)
            .map(str::to_string);

        from_header
            .or_else(|| {
                CookieJar::from_headers(&parts.headers)
                    .get(TOKEN_COOKIE)
                    .map(|cookie| cookie.value().to_string())
            })
            .filter(|token| !token.trim().is_empty())
            .map(SessionToken)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for SessionToken
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Self::from_parts(parts).ok_or(ApiError::Unauthorized)
    }
}

/// Site-wide cookie readable by page scripts
pub fn site_cookie(name: &'static str, value: impl Into<String>) -> Cookie<'static> {
    Cookie::build((name, value.into()))
        .path("/")
        .same_site(SameSite::Lax)
        .build()
}

/// Site-wide HttpOnly cookie
pub fn private_cookie(name: &'static str, value: impl Into<String>) -> Cookie<'static> {
    Cookie::build((name, value.into()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}

/// Cookie that clears `name` when added to a jar
pub fn removal_cookie(name: &'static str) -> Cookie<'static> {
    Cookie::build((name, "")).path("/").build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(header: Option<(&str, &str)>) -> Parts {
        let mut builder = Request::builder().uri("/api/whoami");
        if let Some((name, value)) = header {
            builder = builder.header(name, value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_bearer_header_wins() {
        let parts = parts(Some(("authorization", "Bearer abc")));
        assert_eq!(SessionToken::from_parts(&parts).unwrap().0, "abc");
    }

    #[test]
    fn test_cookie_fallback() {
        let parts = parts(Some(("cookie", "locale=pl; token=xyz")));
        assert_eq!(SessionToken::from_parts(&parts).unwrap().0, "xyz");
    }

    #[test]
    fn test_missing_or_blank_token() {
        assert!(SessionToken::from_parts(&parts(None)).is_none());
        assert!(SessionToken::from_parts(&parts(Some(("cookie", "token=")))).is_none());
    }

    #[test]
    fn test_token_cookie_is_http_only() {
        let cookie = private_cookie(TOKEN_COOKIE, "abc");
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
    }
}
