//! HTTP client for the Braggly backend
//!
//! The backend owns all business state (users, credits, files, analyses,
//! the COD cache). This client is the gateway's only way to reach it.
//!
//! [`BackendClient`] holds the connection pool and base URL and covers the
//! unauthenticated endpoints. [`AuthedBackend`] adds a bearer token for
//! everything else.

use axum::body::Bytes;
use braggly_common::api::{
    ActiveImport, BoolParameter, CodRecord, CreditPackage, FormulaResolution, GoogleLoginRequest,
    LoginRequest, NewCreditPackage, PurchaseHistory, QueryStatus, RestrictedPath, Role,
    TokenResponse, UsageHistory, User, WhoAmI, XrdAnalysis, XrdFile, XrdFileUpdate,
};
use reqwest::header::CONTENT_TYPE;
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::BackendError;

const USER_AGENT: &str = concat!("braggly-web/", env!("CARGO_PKG_VERSION"));

/// Shared, cheaply cloneable backend client
#[derive(Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    base_url: Arc<str>,
}

impl BackendClient {
    /// Create a client for `base_url`
    ///
    /// An empty URL is the "unconfigured environment" failure and is
    /// reported immediately.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, BackendError> {
        let base_url = base_url.trim().trim_end_matches('/');
        if base_url.is_empty() {
            return Err(BackendError::Unconfigured);
        }

        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Network(e.to_string()))?;

        Ok(Self {
            http,
            base_url: Arc::from(base_url),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Attach a bearer token
    pub fn with_token(&self, token: impl Into<String>) -> AuthedBackend {
        AuthedBackend {
            client: self.clone(),
            token: Arc::from(token.into()),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `POST /api/auth/login`
    pub async fn login(&self, username: &str, password: &str) -> Result<String, BackendError> {
        let request = self.http.post(self.url("/api/auth/login")).json(&LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        });
        let response = send(request, "/api/auth/login").await?;
        let token: TokenResponse = read_json(response).await?;
        Ok(token.token)
    }

    /// `POST /api/auth/google` with a Google-issued ID token
    pub async fn google_login(&self, id_token: &str) -> Result<String, BackendError> {
        let request = self.http.post(self.url("/api/auth/google")).json(&GoogleLoginRequest {
            token: id_token.to_string(),
        });
        let response = send(request, "/api/auth/google").await?;
        let token: TokenResponse = read_json(response).await?;
        Ok(token.token)
    }
}

/// Backend client bound to one user's token
#[derive(Clone)]
pub struct AuthedBackend {
    client: BackendClient,
    token: Arc<str>,
}

impl AuthedBackend {
    pub fn token(&self) -> &str {
        &self.token
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.client.http.get(self.client.url(path)).bearer_auth(&*self.token)
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.client.http.post(self.client.url(path)).bearer_auth(&*self.token)
    }

    fn put(&self, path: &str) -> RequestBuilder {
        self.client.http.put(self.client.url(path)).bearer_auth(&*self.token)
    }

    fn delete(&self, path: &str) -> RequestBuilder {
        self.client.http.delete(self.client.url(path)).bearer_auth(&*self.token)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, BackendError> {
        let response = send(self.get(path), path).await?;
        read_json(response).await
    }

    async fn get_list<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, BackendError> {
        let response = send(self.get(path), path).await?;
        let value: Value = read_json(response).await?;
        filter_items(value, path)
    }

    // ========================================
    // Session
    // ========================================

    /// `GET /api/whoami`
    pub async fn whoami(&self) -> Result<WhoAmI, BackendError> {
        self.get_json("/api/whoami").await
    }

    // ========================================
    // Users (admin)
    // ========================================

    pub async fn list_users(&self) -> Result<Vec<User>, BackendError> {
        self.get_list("/api/admin/list-user").await
    }

    pub async fn create_user(&self, username: &str, password: &str) -> Result<(), BackendError> {
        let path = "/api/admin/create-user";
        let request = self.post(path).json(&json!({
            "username": username,
            "password": password,
        }));
        send(request, path).await.map(drop)
    }

    pub async fn delete_user(&self, username: &str) -> Result<(), BackendError> {
        let path = "/api/admin/delete-user";
        let request = self.delete(path).query(&[("username", username)]);
        send(request, path).await.map(drop)
    }

    pub async fn set_user_role(&self, user_id: i64, role: Role) -> Result<(), BackendError> {
        if role == Role::Unknown {
            return Err(BackendError::InvalidRequest("role must be USER or ADMIN".into()));
        }
        let path = "/api/admin/set-role";
        let request = self
            .put(path)
            .query(&[("userId", user_id.to_string()), ("role", role.as_str().to_string())]);
        send(request, path).await.map(drop)
    }

    pub async fn set_user_password(&self, user_id: i64, new_password: &str) -> Result<(), BackendError> {
        let path = "/api/admin/set-password";
        let request = self.put(path).query(&[
            ("userId", user_id.to_string()),
            ("newPassword", new_password.to_string()),
        ]);
        send(request, path).await.map(drop)
    }

    // ========================================
    // Credits
    // ========================================

    pub async fn list_packages(&self) -> Result<Vec<CreditPackage>, BackendError> {
        self.get_list("/credits/packages").await
    }

    /// Add a credit package
    ///
    /// Some backend versions answer with an empty 2xx body; that is a
    /// success without a package to return.
    pub async fn add_package(
        &self,
        credits: i64,
        price_in_cents: i64,
    ) -> Result<Option<CreditPackage>, BackendError> {
        let path = "/credits/packages";
        let request = self.post(path).json(&NewCreditPackage {
            credits,
            price_in_cents,
        });
        let response = send(request, path).await?;
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| BackendError::Parse(e.to_string()))
    }

    pub async fn delete_package(&self, package_id: i64) -> Result<(), BackendError> {
        let path = format!("/credits/packages/{}", package_id);
        send(self.delete(&path), &path).await.map(drop)
    }

    /// Assign a package's credits to a user (form-encoded)
    pub async fn assign_credits(&self, user_id: i64, package_id: i64) -> Result<(), BackendError> {
        let path = "/credits/assign";
        let request = self.post(path).form(&[
            ("userId", user_id.to_string()),
            ("packageId", package_id.to_string()),
        ]);
        send(request, path).await.map(drop)
    }

    pub async fn purchase_history(&self, user_id: i64) -> Result<Vec<PurchaseHistory>, BackendError> {
        self.get_list(&format!("/credits/purchase-history?userId={}", user_id))
            .await
    }

    pub async fn usage_history(&self, user_id: i64) -> Result<Vec<UsageHistory>, BackendError> {
        self.get_list(&format!("/credits/usage-history?userId={}", user_id))
            .await
    }

    // ========================================
    // Feature flags
    // ========================================

    pub async fn list_bool_parameters(&self) -> Result<Vec<BoolParameter>, BackendError> {
        self.get_list("/api/parameters/bool").await
    }

    pub async fn bool_parameter(&self, name: &str) -> Result<BoolParameter, BackendError> {
        self.get_json(&format!("/api/parameters/bool/{}", path_segment(name)))
            .await
    }

    pub async fn update_bool_parameter(&self, name: &str, value: bool) -> Result<(), BackendError> {
        let path = format!("/api/parameters/bool/{}", path_segment(name));
        let request = self.put(&path).query(&[("value", value.to_string())]);
        send(request, &path).await.map(drop)
    }

    pub async fn delete_bool_parameter(&self, name: &str) -> Result<(), BackendError> {
        let path = format!("/api/parameters/bool/{}", path_segment(name));
        send(self.delete(&path), &path).await.map(drop)
    }

    // ========================================
    // Restricted paths
    // ========================================

    pub async fn list_restricted_paths(&self) -> Result<Vec<RestrictedPath>, BackendError> {
        self.get_list("/api/restricted-paths").await
    }

    pub async fn add_restricted_path(&self, restricted: &str) -> Result<(), BackendError> {
        if !restricted.starts_with('/') {
            return Err(BackendError::InvalidRequest(
                "path must start with '/'".to_string(),
            ));
        }
        let path = "/api/restricted-paths";
        let request = self.post(path).json(&json!({ "path": restricted }));
        send(request, path).await.map(drop)
    }

    pub async fn delete_restricted_path(&self, restricted: &str) -> Result<(), BackendError> {
        let path = "/api/restricted-paths";
        let request = self.delete(path).query(&[("path", restricted)]);
        send(request, path).await.map(drop)
    }

    // ========================================
    // XRD files and analysis
    // ========================================

    pub async fn list_files(&self) -> Result<Vec<XrdFile>, BackendError> {
        self.get_list("/api/xrd/files").await
    }

    pub async fn list_public_files(&self) -> Result<Vec<XrdFile>, BackendError> {
        self.get_list("/api/xrd/public-files").await
    }

    pub async fn update_file(&self, file_id: i64, update: &XrdFileUpdate) -> Result<(), BackendError> {
        let path = format!("/api/xrd/files/{}", file_id);
        send(self.put(&path).json(update), &path).await.map(drop)
    }

    pub async fn delete_file(&self, file_id: i64) -> Result<(), BackendError> {
        let path = format!("/api/xrd/files/{}", file_id);
        send(self.delete(&path), &path).await.map(drop)
    }

    pub async fn analysis(&self, file_id: i64) -> Result<XrdAnalysis, BackendError> {
        self.get_json(&format!("/api/xrd/analyze/{}", file_id)).await
    }

    /// Forward a multipart body unchanged and return the JSON answer
    ///
    /// The boundary lives in `content_type`, so the body is passed through
    /// byte for byte instead of being re-encoded.
    pub async fn forward_upload(
        &self,
        path: &str,
        content_type: &str,
        body: Bytes,
    ) -> Result<Value, BackendError> {
        debug!(path = %path, bytes = body.len(), "Forwarding upload to backend");
        let request = self.post(path).header(CONTENT_TYPE, content_type).body(body);
        let response = send(request, path).await?;
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| BackendError::Parse(e.to_string()))
    }

    // ========================================
    // COD
    // ========================================

    /// Resolve free text (substance name, formula) into a COD query
    pub async fn resolve_formula(&self, input: &str) -> Result<FormulaResolution, BackendError> {
        let path = "/openai/cod";
        let response = send(self.post(path).json(&input), path).await?;
        read_json(response).await
    }

    /// `POST /api/cod/search` with the query as a plain-text body
    pub async fn query_status(&self, query: &str) -> Result<QueryStatus, BackendError> {
        let path = "/api/cod/search";
        let request = self
            .post(path)
            .header(CONTENT_TYPE, "text/plain")
            .body(query.to_string());
        let response = send(request, path).await?;
        read_json(response).await
    }

    /// `GET /api/cod/id?formula=`: identifiers known so far for `formula`
    pub async fn list_ids(&self, formula: &str) -> Result<Vec<String>, BackendError> {
        let path = "/api/cod/id";
        let request = self.get(path).query(&[("formula", formula)]);
        let response = send(request, path).await?;
        let value: Value = read_json(response).await?;
        let Value::Array(items) = value else {
            return Err(BackendError::Parse(format!("{}: expected an array", path)));
        };
        Ok(items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                other => {
                    warn!(path = %path, item = %other, "Skipping malformed identifier");
                    None
                }
            })
            .collect())
    }

    /// `GET /api/cod/cif/{id}`
    pub async fn fetch_record(&self, cod_id: &str) -> Result<CodRecord, BackendError> {
        let path = format!("/api/cod/cif/{}", path_segment(cod_id));
        let response = send(self.get(&path), &path).await?;
        let mut record: CodRecord = read_json(response).await?;
        record.cod_id = cod_id.to_string();
        Ok(record)
    }

    /// `GET /api/cod/active-imports`
    pub async fn active_imports(&self) -> Result<Vec<ActiveImport>, BackendError> {
        self.get_list("/api/cod/active-imports").await
    }
}

/// Send a request and classify non-2xx statuses
async fn send(request: RequestBuilder, path: &str) -> Result<Response, BackendError> {
    let response = request.send().await?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    debug!(path = %path, status = status.as_u16(), "Backend request failed");
    Err(BackendError::from_status(status.as_u16(), path, body))
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, BackendError> {
    let text = response.text().await?;
    serde_json::from_str(&text).map_err(|e| BackendError::Parse(e.to_string()))
}

/// Deserialize each array element, dropping the ones with a bad shape
fn filter_items<T: DeserializeOwned>(value: Value, path: &str) -> Result<Vec<T>, BackendError> {
    let Value::Array(items) = value else {
        return Err(BackendError::Parse(format!("{}: expected an array", path)));
    };

    let total = items.len();
    let parsed: Vec<T> = items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect();

    if parsed.len() < total {
        warn!(
            path = %path,
            dropped = total - parsed.len(),
            "Dropped malformed items from backend list"
        );
    }
    Ok(parsed)
}

/// Percent-encode a single path segment
fn path_segment(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use braggly_common::api::ActiveImport;

    #[test]
    fn test_empty_base_url_is_unconfigured() {
        let result = BackendClient::new("  ", Duration::from_secs(1));
        assert!(matches!(result, Err(BackendError::Unconfigured)));
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = BackendClient::new("http://backend:8080/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url(), "http://backend:8080");
        assert_eq!(client.url("/api/whoami"), "http://backend:8080/api/whoami");
    }

    #[test]
    fn test_filter_items_drops_malformed_entries() {
        let value = serde_json::json!([
            {"formula": "Na Cl", "eta": "00:01:00"},
            {"eta": "00:02:00"},
            {"formula": "Fe O", "startedAt": "2025-01-01T00:00:00Z"}
        ]);
        let imports: Vec<ActiveImport> = filter_items(value, "/api/cod/active-imports").unwrap();
        assert_eq!(imports.len(), 2);
        assert_eq!(imports[1].requested_at.as_deref(), Some("2025-01-01T00:00:00Z"));
    }

    #[test]
    fn test_filter_items_requires_array() {
        let result: Result<Vec<ActiveImport>, _> =
            filter_items(serde_json::json!({"formula": "x"}), "/x");
        assert!(matches!(result, Err(BackendError::Parse(_))));
    }

    #[test]
    fn test_path_segment_encoding() {
        assert_eq!(path_segment("1000041"), "1000041");
        assert_eq!(path_segment("free_access"), "free_access");
        assert_eq!(path_segment("a/b c"), "a%2Fb%20c");
    }
}
