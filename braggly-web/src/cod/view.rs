//! Presentation snapshot of a COD session
//!
//! [`CodView`] is what `GET /api/cod/results` returns: the fetched records
//! in numeric identifier order plus the flags the UI turns into banners.

use braggly_common::api::CodRecord;
use serde::Serialize;
use std::cmp::Ordering;

/// Lifecycle of the identifier poller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdPhase {
    /// No formula to poll for
    Idle,
    Polling,
    /// Status completed; one last identifier fetch is under way
    FinalPoll,
    /// Waiting out the grace delay before declaring completion
    Grace,
    Complete,
    Failed,
}

/// Order COD identifiers by numeric value
///
/// Non-numeric identifiers sort after numeric ones, lexically.
pub fn compare_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// Raw session state copied out under the lock
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub generation: u64,
    pub query: Option<String>,
    pub formula: Option<String>,
    pub progress: u8,
    pub completed: bool,
    pub status_error: Option<String>,
    pub id_phase: IdPhase,
    pub ids: Vec<String>,
    pub records: Vec<CodRecord>,
    pub rejected: Vec<String>,
    pub fetching: bool,
}

/// Derived banner flags; more than one can be set at a time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Banners {
    pub searching: bool,
    pub rejected: bool,
    pub fetching: bool,
    pub no_results: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CodView {
    pub generation: u64,
    pub query: Option<String>,
    pub formula: Option<String>,
    pub progress: u8,
    pub completed: bool,
    pub status_error: Option<String>,
    pub id_polling: IdPhase,
    pub records: Vec<CodRecord>,
    pub rejected: Vec<String>,
    /// Identifiers neither fetched nor rejected yet
    pub pending: Vec<String>,
    pub banners: Banners,
}

impl CodView {
    /// View of a caller with no COD session
    pub fn idle() -> Self {
        Self::from(SessionSnapshot {
            generation: 0,
            query: None,
            formula: None,
            progress: 0,
            completed: false,
            status_error: None,
            id_phase: IdPhase::Idle,
            ids: Vec::new(),
            records: Vec::new(),
            rejected: Vec::new(),
            fetching: false,
        })
    }
}

impl From<SessionSnapshot> for CodView {
    fn from(snapshot: SessionSnapshot) -> Self {
        let SessionSnapshot {
            generation,
            query,
            formula,
            progress,
            completed,
            status_error,
            id_phase,
            ids,
            mut records,
            mut rejected,
            fetching,
        } = snapshot;

        records.sort_by(|a, b| compare_ids(&a.cod_id, &b.cod_id));
        rejected.sort_by(|a, b| compare_ids(a, b));

        let mut pending: Vec<String> = ids
            .into_iter()
            .filter(|id| {
                !rejected.contains(id) && !records.iter().any(|record| &record.cod_id == id)
            })
            .collect();
        pending.sort_by(|a, b| compare_ids(a, b));

        let has_formula = formula.as_deref().is_some_and(|f| !f.trim().is_empty());
        let banners = Banners {
            searching: query.is_some() && !completed && status_error.is_none(),
            rejected: !rejected.is_empty() && !fetching,
            fetching,
            no_results: completed && records.is_empty() && has_formula && !fetching,
        };

        Self {
            generation,
            query,
            formula,
            progress,
            completed,
            status_error,
            id_polling: id_phase,
            records,
            rejected,
            pending,
            banners,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> CodRecord {
        CodRecord {
            cod_id: id.to_string(),
            ..Default::default()
        }
    }

    fn snapshot() -> SessionSnapshot {
        SessionSnapshot {
            generation: 1,
            query: Some("H2 O".to_string()),
            formula: Some("H O".to_string()),
            progress: 0,
            completed: false,
            status_error: None,
            id_phase: IdPhase::Polling,
            ids: Vec::new(),
            records: Vec::new(),
            rejected: Vec::new(),
            fetching: false,
        }
    }

    #[test]
    fn test_compare_ids_numeric() {
        let mut ids = vec!["1002", "999", "abc", "1001", "10"];
        ids.sort_by(|a, b| compare_ids(a, b));
        assert_eq!(ids, vec!["10", "999", "1001", "1002", "abc"]);
    }

    #[test]
    fn test_records_sorted_and_pending_derived() {
        let mut snap = snapshot();
        snap.ids = vec!["1002".into(), "200".into(), "9999".into(), "1001".into()];
        snap.records = vec![record("1002"), record("200")];
        snap.rejected = vec!["9999".into()];

        let view = CodView::from(snap);
        let ids: Vec<&str> = view.records.iter().map(|r| r.cod_id.as_str()).collect();
        assert_eq!(ids, vec!["200", "1002"]);
        assert_eq!(view.pending, vec!["1001".to_string()]);
        assert_eq!(view.rejected, vec!["9999".to_string()]);
    }

    #[test]
    fn test_searching_banner() {
        let view = CodView::from(snapshot());
        assert!(view.banners.searching);
        assert!(!view.banners.no_results);

        let mut snap = snapshot();
        snap.completed = true;
        assert!(!CodView::from(snap).banners.searching);
    }

    #[test]
    fn test_rejected_banner_waits_for_idle_fetcher() {
        let mut snap = snapshot();
        snap.rejected = vec!["9999".into()];
        snap.fetching = true;
        let view = CodView::from(snap.clone());
        assert!(!view.banners.rejected);
        assert!(view.banners.fetching);

        snap.fetching = false;
        assert!(CodView::from(snap).banners.rejected);
    }

    #[test]
    fn test_no_results_requires_completed_formula_and_idle() {
        let mut snap = snapshot();
        snap.completed = true;
        assert!(CodView::from(snap.clone()).banners.no_results);

        snap.fetching = true;
        assert!(!CodView::from(snap.clone()).banners.no_results);

        snap.fetching = false;
        snap.formula = None;
        assert!(!CodView::from(snap.clone()).banners.no_results);

        snap.formula = Some("H O".into());
        snap.records = vec![record("1001")];
        assert!(!CodView::from(snap).banners.no_results);
    }

    #[test]
    fn test_idle_view_has_no_banners() {
        let view = CodView::idle();
        assert_eq!(view.generation, 0);
        assert_eq!(view.id_polling, IdPhase::Idle);
        assert!(view.records.is_empty());
        assert_eq!(view.banners, Banners::default());
    }

    #[test]
    fn test_failed_status_is_not_searching() {
        let mut snap = snapshot();
        snap.status_error = Some("Network error: refused".into());
        let view = CodView::from(snap);
        assert!(!view.banners.searching);
        assert_eq!(view.status_error.as_deref(), Some("Network error: refused"));
    }
}
