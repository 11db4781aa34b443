//! Upstream seam for the COD polling engine
//!
//! The engine talks to the backend through [`CodSource`] so tests can drive
//! it with scripted responses.

use async_trait::async_trait;
use braggly_common::api::{ActiveImport, CodRecord, QueryStatus};

use crate::backend::{AuthedBackend, BackendError};

/// The four backend endpoints the COD engine polls
#[async_trait]
pub trait CodSource: Send + Sync + 'static {
    /// `POST /api/cod/search`
    async fn query_status(&self, query: &str) -> Result<QueryStatus, BackendError>;

    /// `GET /api/cod/id?formula=`
    async fn list_ids(&self, formula: &str) -> Result<Vec<String>, BackendError>;

    /// `GET /api/cod/cif/{id}`
    async fn fetch_record(&self, cod_id: &str) -> Result<CodRecord, BackendError>;

    /// `GET /api/cod/active-imports`
    async fn active_imports(&self) -> Result<Vec<ActiveImport>, BackendError>;
}

#[async_trait]
impl CodSource for AuthedBackend {
    async fn query_status(&self, query: &str) -> Result<QueryStatus, BackendError> {
        AuthedBackend::query_status(self, query).await
    }

    async fn list_ids(&self, formula: &str) -> Result<Vec<String>, BackendError> {
        AuthedBackend::list_ids(self, formula).await
    }

    async fn fetch_record(&self, cod_id: &str) -> Result<CodRecord, BackendError> {
        AuthedBackend::fetch_record(self, cod_id).await
    }

    async fn active_imports(&self) -> Result<Vec<ActiveImport>, BackendError> {
        AuthedBackend::active_imports(self).await
    }
}
