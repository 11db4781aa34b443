//! Backend client errors

use thiserror::Error;

/// Failures talking to the Braggly backend
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// No backend URL configured
    #[error("Backend URL is not configured")]
    Unconfigured,

    /// Transport failure (connect, timeout, TLS, body read)
    #[error("Network error: {0}")]
    Network(String),

    /// 401: missing or expired token
    #[error("Not authenticated")]
    Unauthorized,

    /// 403: token valid but access denied
    #[error("Access denied")]
    Forbidden,

    /// 404
    #[error("Not found: {0}")]
    NotFound(String),

    /// Any other non-2xx status
    #[error("Backend returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Response body did not have the expected shape
    #[error("Parse error: {0}")]
    Parse(String),

    /// Rejected locally before any request was sent
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl BackendError {
    /// Classify a non-success HTTP status
    pub fn from_status(status: u16, path: &str, body: String) -> Self {
        match status {
            401 => BackendError::Unauthorized,
            403 => BackendError::Forbidden,
            404 => BackendError::NotFound(path.to_string()),
            _ => BackendError::Status { status, body },
        }
    }

    /// Errors worth retrying later: transport failures and 5xx responses
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Network(_) => true,
            BackendError::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            BackendError::Parse(e.to_string())
        } else {
            BackendError::Network(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            BackendError::from_status(401, "/x", String::new()),
            BackendError::Unauthorized
        ));
        assert!(matches!(
            BackendError::from_status(403, "/x", String::new()),
            BackendError::Forbidden
        ));
        assert!(matches!(
            BackendError::from_status(404, "/api/cod/cif/1", String::new()),
            BackendError::NotFound(path) if path == "/api/cod/cif/1"
        ));
        assert!(matches!(
            BackendError::from_status(502, "/x", "bad gateway".into()),
            BackendError::Status { status: 502, .. }
        ));
    }

    #[test]
    fn test_transient_errors() {
        assert!(BackendError::Network("reset".into()).is_transient());
        assert!(BackendError::from_status(503, "/", String::new()).is_transient());
        assert!(BackendError::from_status(429, "/", String::new()).is_transient());
        assert!(!BackendError::from_status(400, "/", String::new()).is_transient());
        assert!(!BackendError::Forbidden.is_transient());
        assert!(!BackendError::Parse("eof".into()).is_transient());
    }
}
