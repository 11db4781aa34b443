//! Configuration loading and resolution
//!
//! Resolution priority for every setting:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! The backend URL has no compiled default: a gateway without a backend is
//! refused at start-up instead of failing on the first request.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming the backend base URL
pub const ENV_BACKEND_URL: &str = "BRAGGLY_BACKEND_URL";
pub const ENV_BIND: &str = "BRAGGLY_BIND";
pub const ENV_PORT: &str = "BRAGGLY_PORT";
pub const ENV_LOCALES_DIR: &str = "BRAGGLY_LOCALES_DIR";
pub const ENV_STRIPE_SECRET_KEY: &str = "STRIPE_SECRET_KEY";
pub const ENV_STRIPE_WEBHOOK_SECRET: &str = "STRIPE_WEBHOOK_SECRET";
pub const ENV_GOOGLE_CLIENT_ID: &str = "GOOGLE_CLIENT_ID";
pub const ENV_GOOGLE_CLIENT_SECRET: &str = "GOOGLE_CLIENT_SECRET";
pub const ENV_GOOGLE_REDIRECT_URI: &str = "GOOGLE_REDIRECT_URI";

const CONFIG_FILE_NAME: &str = "braggly-web.toml";

/// Bootstrap configuration as read from the TOML file
///
/// Every field is optional so that a partial (or missing) file still loads.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub backend_url: Option<String>,

    #[serde(default)]
    pub bind_address: Option<String>,

    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default)]
    pub locales_dir: Option<PathBuf>,

    #[serde(default)]
    pub default_locale: Option<String>,

    #[serde(default)]
    pub request_timeout_secs: Option<u64>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub stripe: StripeConfig,

    #[serde(default)]
    pub google: GoogleConfig,

    #[serde(default)]
    pub polling: PollingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Stripe credentials
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeConfig {
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub webhook_secret: Option<String>,
    #[serde(default = "default_currency")]
    pub currency: String,
}

impl Default for StripeConfig {
    fn default() -> Self {
        Self {
            secret_key: None,
            webhook_secret: None,
            currency: default_currency(),
        }
    }
}

/// Google OAuth client registration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GoogleConfig {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub redirect_uri: Option<String>,
}

impl GoogleConfig {
    /// True when all three values needed for the OAuth round trip are present
    pub fn is_complete(&self) -> bool {
        self.client_id.is_some() && self.client_secret.is_some() && self.redirect_uri.is_some()
    }
}

/// What a poll loop does after a failed request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorMode {
    /// Log and end the loop
    Stop,
    /// Back off and try again
    Retry,
    /// Per-loop timing of the browser client: the status loop stops on the
    /// first error, the other loops retry forever at their own interval
    Legacy,
}

/// Timing of the COD import polling loops
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PollingConfig {
    #[serde(default = "default_status_interval_ms")]
    pub status_interval_ms: u64,
    #[serde(default = "default_ids_interval_ms")]
    pub ids_interval_ms: u64,
    /// Delay between the final identifier poll and the "polling complete" state
    #[serde(default = "default_id_grace_ms")]
    pub id_grace_ms: u64,
    #[serde(default = "default_detail_delay_ms")]
    pub detail_delay_ms: u64,
    /// Detail requests allowed per `detail_delay_ms` window
    #[serde(default = "default_detail_burst")]
    pub detail_burst: u32,
    #[serde(default = "default_active_imports_interval_ms")]
    pub active_imports_interval_ms: u64,
    /// Failure handling shared by every poll loop
    ///
    /// Defaults to `retry`, so the status loop survives transient errors
    /// and the identifier loop gives up after `max_consecutive_failures`.
    /// `legacy` restores the old per-loop behaviour.
    #[serde(default = "default_error_mode")]
    pub on_error: ErrorMode,
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: Option<u32>,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_detail_max_attempts")]
    pub detail_max_attempts: u32,
    /// Sessions untouched for this long, with no event subscriber, are closed
    #[serde(default = "default_session_idle_secs")]
    pub session_idle_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            status_interval_ms: default_status_interval_ms(),
            ids_interval_ms: default_ids_interval_ms(),
            id_grace_ms: default_id_grace_ms(),
            detail_delay_ms: default_detail_delay_ms(),
            detail_burst: default_detail_burst(),
            active_imports_interval_ms: default_active_imports_interval_ms(),
            on_error: default_error_mode(),
            max_consecutive_failures: default_max_consecutive_failures(),
            backoff_max_ms: default_backoff_max_ms(),
            detail_max_attempts: default_detail_max_attempts(),
            session_idle_secs: default_session_idle_secs(),
        }
    }
}

impl PollingConfig {
    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }

    pub fn ids_interval(&self) -> Duration {
        Duration::from_millis(self.ids_interval_ms)
    }

    pub fn id_grace(&self) -> Duration {
        Duration::from_millis(self.id_grace_ms)
    }

    pub fn detail_delay(&self) -> Duration {
        Duration::from_millis(self.detail_delay_ms)
    }

    pub fn active_imports_interval(&self) -> Duration {
        Duration::from_millis(self.active_imports_interval_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    pub fn session_idle(&self) -> Duration {
        Duration::from_secs(self.session_idle_secs)
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_currency() -> String {
    "pln".to_string()
}

fn default_status_interval_ms() -> u64 {
    500
}

fn default_ids_interval_ms() -> u64 {
    500
}

fn default_id_grace_ms() -> u64 {
    4000
}

fn default_detail_delay_ms() -> u64 {
    500
}

fn default_detail_burst() -> u32 {
    1
}

fn default_active_imports_interval_ms() -> u64 {
    500
}

fn default_error_mode() -> ErrorMode {
    ErrorMode::Retry
}

fn default_max_consecutive_failures() -> Option<u32> {
    Some(5)
}

fn default_backoff_max_ms() -> u64 {
    8000
}

fn default_detail_max_attempts() -> u32 {
    3
}

fn default_session_idle_secs() -> u64 {
    1800
}

impl TomlConfig {
    /// Load the TOML file at `path`
    ///
    /// A missing file yields the defaults with a warning; a present but
    /// malformed file is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(
                "Config file {} not found, using defaults",
                path.display()
            );
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Parse TOML failed ({}): {}", path.display(), e)))?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }
}

/// Locate the default configuration file for the platform
///
/// Returns the user config path when it exists, else the system path on
/// Linux, else `None`.
pub fn default_config_path() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("braggly").join(CONFIG_FILE_NAME));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/braggly").join(CONFIG_FILE_NAME);
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Values supplied on the command line
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_path: Option<PathBuf>,
    pub backend_url: Option<String>,
    pub bind_address: Option<String>,
    pub port: Option<u16>,
    pub locales_dir: Option<PathBuf>,
}

/// Fully resolved gateway configuration
///
/// Built once at start-up and handed to the application state.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub backend_url: String,
    pub bind_address: String,
    pub port: u16,
    pub locales_dir: PathBuf,
    pub default_locale: String,
    pub request_timeout: Duration,
    pub log_level: String,
    pub stripe: StripeConfig,
    pub google: GoogleConfig,
    pub polling: PollingConfig,
}

impl GatewayConfig {
    /// Resolve configuration from CLI overrides, environment and TOML file
    pub fn resolve(overrides: ConfigOverrides) -> Result<Self> {
        let toml_config = match overrides.config_path.clone().or_else(default_config_path) {
            Some(path) => TomlConfig::load(&path)?,
            None => {
                info!("No config file found, using environment and defaults");
                TomlConfig::default()
            }
        };

        Self::from_sources(overrides, toml_config)
    }

    /// Merge CLI overrides, environment and an already-loaded TOML config
    pub fn from_sources(overrides: ConfigOverrides, toml_config: TomlConfig) -> Result<Self> {
        let backend_url = overrides
            .backend_url
            .or_else(|| env_var(ENV_BACKEND_URL))
            .or(toml_config.backend_url)
            .map(|url| url.trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty())
            .ok_or_else(|| {
                Error::Config(format!(
                    "Backend URL not configured. Set one of:\n\
                     1. Command line: --backend-url https://backend.example\n\
                     2. Environment: {}=https://backend.example\n\
                     3. TOML config: backend_url = \"https://backend.example\"",
                    ENV_BACKEND_URL
                ))
            })?;

        if !backend_url.starts_with("http://") && !backend_url.starts_with("https://") {
            return Err(Error::Config(format!(
                "Backend URL must start with http:// or https://: {}",
                backend_url
            )));
        }

        let port = match overrides.port {
            Some(port) => port,
            None => match env_var(ENV_PORT) {
                Some(raw) => raw
                    .parse::<u16>()
                    .map_err(|e| Error::Config(format!("Invalid {}: {}", ENV_PORT, e)))?,
                None => toml_config.port.unwrap_or(3000),
            },
        };

        let bind_address = overrides
            .bind_address
            .or_else(|| env_var(ENV_BIND))
            .or(toml_config.bind_address)
            .unwrap_or_else(|| "127.0.0.1".to_string());

        let locales_dir = overrides
            .locales_dir
            .or_else(|| env_var(ENV_LOCALES_DIR).map(PathBuf::from))
            .or(toml_config.locales_dir)
            .unwrap_or_else(|| PathBuf::from("./locales"));

        let mut stripe = toml_config.stripe;
        if let Some(key) = env_var(ENV_STRIPE_SECRET_KEY) {
            stripe.secret_key = Some(key);
        }
        if let Some(secret) = env_var(ENV_STRIPE_WEBHOOK_SECRET) {
            stripe.webhook_secret = Some(secret);
        }

        let mut google = toml_config.google;
        if let Some(id) = env_var(ENV_GOOGLE_CLIENT_ID) {
            google.client_id = Some(id);
        }
        if let Some(secret) = env_var(ENV_GOOGLE_CLIENT_SECRET) {
            google.client_secret = Some(secret);
        }
        if let Some(uri) = env_var(ENV_GOOGLE_REDIRECT_URI) {
            google.redirect_uri = Some(uri);
        }

        let log_level = env_var("RUST_LOG").unwrap_or(toml_config.logging.level);

        Ok(Self {
            backend_url,
            bind_address,
            port,
            locales_dir,
            default_locale: toml_config.default_locale.unwrap_or_else(|| "en".to_string()),
            request_timeout: Duration::from_secs(toml_config.request_timeout_secs.unwrap_or(30)),
            log_level,
            stripe,
            google,
            polling: toml_config.polling,
        })
    }

    /// Configuration pointing at `backend_url` with every other value defaulted
    ///
    /// Ignores the environment; used by tests and embedders.
    pub fn for_backend(backend_url: impl Into<String>) -> Self {
        Self {
            backend_url: backend_url.into(),
            bind_address: "127.0.0.1".to_string(),
            port: 3000,
            locales_dir: PathBuf::from("./locales"),
            default_locale: "en".to_string(),
            request_timeout: Duration::from_secs(30),
            log_level: default_log_level(),
            stripe: StripeConfig::default(),
            google: GoogleConfig::default(),
            polling: PollingConfig::default(),
        }
    }
}

/// Read a non-blank environment variable
fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
