//! Translation loader
//!
//! Each locale lives in `{locales_dir}/{locale}/common.json` as a flat
//! object of string keys to string values. Loaded maps are cached for the
//! lifetime of the process.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

const TRANSLATION_FILE: &str = "common.json";

pub type TranslationMap = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub enum I18nError {
    #[error("Invalid locale name: {0}")]
    InvalidLocale(String),

    #[error("No translations for locale: {0}")]
    NotFound(String),

    #[error("Translation file for {locale} is invalid: {message}")]
    Malformed { locale: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Locale names are restricted to `[A-Za-z0-9_-]`, 1 to 16 characters
///
/// ```
/// use braggly_web::i18n::is_valid_locale;
///
/// assert!(is_valid_locale("pl"));
/// assert!(is_valid_locale("en-GB"));
/// assert!(!is_valid_locale("../etc"));
/// ```
pub fn is_valid_locale(locale: &str) -> bool {
    !locale.is_empty()
        && locale.len() <= 16
        && locale
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Cached translation loader
pub struct Translations {
    dir: PathBuf,
    default_locale: String,
    cache: RwLock<HashMap<String, Arc<TranslationMap>>>,
}

impl Translations {
    pub fn new(dir: impl Into<PathBuf>, default_locale: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            default_locale: default_locale.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn default_locale(&self) -> &str {
        &self.default_locale
    }

    /// Translations for `locale`, read from disk on first use
    pub async fn load(&self, locale: &str) -> Result<Arc<TranslationMap>, I18nError> {
        if !is_valid_locale(locale) {
            return Err(I18nError::InvalidLocale(locale.to_string()));
        }

        if let Some(map) = self.cache.read().await.get(locale) {
            return Ok(map.clone());
        }

        let path = self.dir.join(locale).join(TRANSLATION_FILE);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Translation file not found: {}", path.display());
                return Err(I18nError::NotFound(locale.to_string()));
            }
            Err(e) => return Err(I18nError::Io(e)),
        };

        let map: TranslationMap =
            serde_json::from_str(&content).map_err(|e| I18nError::Malformed {
                locale: locale.to_string(),
                message: e.to_string(),
            })?;
        info!(locale = %locale, keys = map.len(), "Loaded translations");

        let map = Arc::new(map);
        self.cache
            .write()
            .await
            .insert(locale.to_string(), map.clone());
        Ok(map)
    }

    /// Locale directories that contain a translation file
    pub fn available_locales(&self) -> Result<Vec<String>, I18nError> {
        let mut locales = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if is_valid_locale(&name) && entry.path().join(TRANSLATION_FILE).is_file() {
                locales.push(name);
            }
        }
        locales.sort();
        Ok(locales)
    }

    /// Keys present in the default locale but missing from each other locale
    ///
    /// Locales with nothing missing are omitted.
    pub async fn missing_keys(&self) -> Result<BTreeMap<String, Vec<String>>, I18nError> {
        let reference = self.load(&self.default_locale).await?;
        let mut report = BTreeMap::new();

        for locale in self.available_locales()? {
            if locale == self.default_locale {
                continue;
            }
            let translations = self.load(&locale).await?;
            let missing: Vec<String> = reference
                .keys()
                .filter(|key| !translations.contains_key(*key))
                .cloned()
                .collect();
            if !missing.is_empty() {
                report.insert(locale, missing);
            }
        }

        Ok(report)
    }
}
