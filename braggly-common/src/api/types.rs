//! Wire types exchanged with the Braggly backend
//!
//! Field names follow the backend's camelCase JSON. Structural records from
//! COD arrive with unit-cell values as either strings or numbers, so those
//! fields are read leniently into `Option<String>`.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// ========================================
// Authentication
// ========================================

/// `POST /api/auth/login` body
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// `POST /api/auth/google` body: the Google-issued ID token
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GoogleLoginRequest {
    pub token: String,
}

/// Backend session token
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenResponse {
    pub token: String,
}

/// Account role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    User,
    Admin,
    #[serde(other)]
    Unknown,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Admin => "ADMIN",
            Role::Unknown => "UNKNOWN",
        }
    }
}

/// `GET /api/whoami` response
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WhoAmI {
    pub role: Role,
    pub username: String,
    pub balance: i64,
    pub id: i64,
    #[serde(default)]
    pub last_updated: Option<String>,
}

// ========================================
// Administration
// ========================================

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub role: Role,
    #[serde(default)]
    pub balance: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditPackage {
    pub id: i64,
    pub credits: i64,
    pub price_in_cents: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCreditPackage {
    pub credits: i64,
    pub price_in_cents: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseHistory {
    pub id: i64,
    pub user_id: i64,
    pub credits_purchased: i64,
    pub amount_paid: i64,
    pub purchase_date: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageHistory {
    pub id: i64,
    pub user_id: i64,
    pub usage_type: String,
    pub usage_date: String,
    pub credits_used: i64,
}

/// Boolean feature flag (e.g. `free_access`)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BoolParameter {
    pub name: String,
    pub value: bool,
}

/// Path that costs credits to access
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RestrictedPath {
    #[serde(default)]
    pub id: Option<i64>,
    pub path: String,
}

// ========================================
// XRD files and analysis
// ========================================

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct XrdFile {
    pub id: i64,
    #[serde(default)]
    pub user_filename: String,
    #[serde(default)]
    pub original_filename: String,
    #[serde(default)]
    pub uploaded_at: Option<String>,
    #[serde(default)]
    pub public_visible: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct XrdFileUpdate {
    pub user_filename: String,
    pub public_visible: bool,
}

/// Detected diffraction peak
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Peak {
    pub angle: f64,
    pub intensity: f64,
    #[serde(default)]
    pub dspacing: Option<f64>,
}

/// Backend-computed analysis of one XRD file
///
/// Older backends name the 2θ axis `angles`, newer ones `twoTheta`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct XrdAnalysis {
    #[serde(default, alias = "angles")]
    pub two_theta: Vec<f64>,
    #[serde(default)]
    pub intensities: Vec<f64>,
    #[serde(default)]
    pub peaks: Vec<Peak>,
}

impl XrdAnalysis {
    /// Peaks ordered by ascending 2θ
    pub fn peak_table(&self) -> Vec<Peak> {
        let mut peaks = self.peaks.clone();
        peaks.sort_by(|a, b| a.angle.total_cmp(&b.angle));
        peaks
    }
}

// ========================================
// COD (Crystallography Open Database)
// ========================================

/// `POST /api/cod/search` response
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryStatus {
    #[serde(default)]
    pub already_queried: bool,
    #[serde(default)]
    pub query_running: bool,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub last_completed: Option<String>,
    #[serde(default, deserialize_with = "deserialize_progress")]
    pub progress: u8,
}

impl QueryStatus {
    /// Terminal state for the status poller
    pub fn is_finished(&self) -> bool {
        self.completed && self.already_queried
    }
}

/// `POST /openai/cod` response: free text resolved into a COD query
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FormulaResolution {
    #[serde(rename = "queryCOD")]
    pub query_cod: String,
    #[serde(rename = "formulaCOD")]
    pub formula_cod: String,
    #[serde(rename = "elementCount", default)]
    pub element_count: u32,
}

/// Atom position inside a structural record
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Atom {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default, alias = "type", alias = "symbol")]
    pub element: Option<String>,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Structural record fetched from `GET /api/cod/cif/{id}`
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CodRecord {
    #[serde(default)]
    pub cod_id: String,
    #[serde(default, deserialize_with = "deserialize_loose_string")]
    pub formula: Option<String>,
    #[serde(default, deserialize_with = "deserialize_loose_string")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_loose_string")]
    pub year: Option<String>,
    #[serde(default, alias = "authors", deserialize_with = "deserialize_loose_string")]
    pub author: Option<String>,
    #[serde(default, deserialize_with = "deserialize_loose_string")]
    pub space_group: Option<String>,
    #[serde(default, deserialize_with = "deserialize_loose_string")]
    pub a: Option<String>,
    #[serde(default, deserialize_with = "deserialize_loose_string")]
    pub b: Option<String>,
    #[serde(default, deserialize_with = "deserialize_loose_string")]
    pub c: Option<String>,
    #[serde(default, deserialize_with = "deserialize_loose_string")]
    pub volume: Option<String>,
    #[serde(default)]
    pub atoms: Option<Vec<Atom>>,
}

/// Entry of `GET /api/cod/active-imports`
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveImport {
    pub formula: String,
    #[serde(default, alias = "startedAt")]
    pub requested_at: Option<String>,
    #[serde(default)]
    pub eta: Option<String>,
}

// ========================================
// Payments
// ========================================

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CreatePaymentIntentRequest {
    pub amount: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntentResponse {
    pub client_secret: String,
}

/// Accept a string, number or null and keep it as text
fn deserialize_loose_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        Some(Value::Array(items)) => {
            let parts: Vec<String> = items
                .into_iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect();
            Some(parts.join(", "))
        }
        Some(other) => Some(other.to_string()),
    })
}

/// Progress is reported as 0..=100; anything else is clamped
fn deserialize_progress<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<f64>::deserialize(deserializer)?;
    Ok(value.map(|p| p.clamp(0.0, 100.0).round() as u8).unwrap_or(0))
}
