//! Awareness of COD imports already running on the backend
//!
//! The backend reports every running import with its formula and an ETA.
//! Each entry is matched against the formula of the session's current query
//! so the user can see that an identical or related import is in progress.

use braggly_common::api::ActiveImport;
use braggly_common::human_time::Eta;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::poller::{poll, PollOutcome, RetryPolicy, Step};
use super::source::CodSource;

/// Whitespace-separated element tokens of a COD formula
///
/// ```
/// use braggly_web::cod::active_imports::element_tokens;
///
/// let tokens = element_tokens(" Na  Cl H ");
/// assert_eq!(tokens.len(), 3);
/// assert!(tokens.contains("Cl"));
/// ```
pub fn element_tokens(formula: &str) -> BTreeSet<String> {
    formula.split_whitespace().map(str::to_string).collect()
}

/// Whether an import's formula is compatible with the current query
///
/// Every token of the smaller set must appear in the larger one. An empty
/// set on either side never matches.
pub fn formulas_match(import_formula: &str, current_formula: &str) -> bool {
    let import = element_tokens(import_formula);
    let current = element_tokens(current_formula);
    if import.is_empty() || current.is_empty() {
        return false;
    }

    let (smaller, larger) = if import.len() <= current.len() {
        (&import, &current)
    } else {
        (&current, &import)
    };
    smaller.is_subset(larger)
}

/// Active import annotated for display
#[derive(Debug, Clone, Serialize)]
pub struct ImportEntry {
    pub formula: String,
    pub requested_at: Option<String>,
    /// Raw `HH:MM:SS` value as reported
    pub eta: Option<String>,
    /// `None` while the backend is still estimating
    pub eta_seconds: Option<u64>,
    pub matches_current: bool,
}

/// Annotate and sort the backend's list
///
/// Matching imports come first; within each group known ETAs come soonest
/// first and "still estimating" entries last.
pub fn annotate(imports: &[ActiveImport], current_formula: Option<&str>) -> Vec<ImportEntry> {
    let mut keyed: Vec<(bool, Eta, ImportEntry)> = imports
        .iter()
        .map(|import| {
            let matches_current = current_formula
                .map(|current| formulas_match(&import.formula, current))
                .unwrap_or(false);
            let eta = Eta::from_report(import.eta.as_deref());
            let entry = ImportEntry {
                formula: import.formula.clone(),
                requested_at: import.requested_at.clone(),
                eta: import.eta.clone(),
                eta_seconds: eta.seconds(),
                matches_current,
            };
            (matches_current, eta, entry)
        })
        .collect();

    // Stable sort keeps the backend's order between equal keys
    keyed.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
    keyed.into_iter().map(|(_, _, entry)| entry).collect()
}

/// True when any running import matches `current_formula`
pub fn is_being_imported(imports: &[ActiveImport], current_formula: Option<&str>) -> bool {
    match current_formula {
        Some(current) => imports
            .iter()
            .any(|import| formulas_match(&import.formula, current)),
        None => false,
    }
}

/// Poll the active-imports endpoint until `cancel` fires or the policy
/// gives up, returning how the loop ended
///
/// Every successful response is handed to `publish`. A failed request
/// publishes an empty list so stale imports are not shown as running.
pub async fn watch<F>(
    source: Arc<dyn CodSource>,
    interval: Duration,
    policy: RetryPolicy,
    cancel: CancellationToken,
    publish: F,
) -> PollOutcome<()>
where
    F: Fn(Vec<ActiveImport>) + Send + Sync,
{
    let outcome: PollOutcome<()> = poll("cod-active-imports", interval, &policy, &cancel, || {
        let source = source.clone();
        let publish = &publish;
        async move {
            match source.active_imports().await {
                Ok(imports) => {
                    publish(imports);
                    Ok(Step::Continue)
                }
                Err(e) => {
                    publish(Vec::new());
                    Err(e)
                }
            }
        }
    })
    .await;

    match &outcome {
        PollOutcome::Failed(e) => warn!("Active import watcher stopped: {}", e),
        PollOutcome::Cancelled | PollOutcome::Completed(()) => {
            debug!("Active import watcher stopped")
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    fn import(formula: &str, eta: Option<&str>) -> ActiveImport {
        ActiveImport {
            formula: formula.to_string(),
            requested_at: None,
            eta: eta.map(str::to_string),
        }
    }

    #[test]
    fn test_subset_either_direction_matches() {
        assert!(formulas_match("Na Cl", "Na Cl H"));
        assert!(formulas_match("Na Cl H", "Na Cl"));
        assert!(formulas_match("Cl Na", "Na Cl"));
    }

    #[test]
    fn test_disjoint_or_partial_overlap_does_not_match() {
        assert!(!formulas_match("Na Cl", "Na H"));
        assert!(!formulas_match("Fe O", "Na Cl H"));
    }

    #[test]
    fn test_empty_formula_never_matches() {
        assert!(!formulas_match("", "Na Cl"));
        assert!(!formulas_match("Na Cl", "   "));
    }

    #[test]
    fn test_annotate_sorts_matches_then_eta() {
        let imports = vec![
            import("Fe O", Some("00:00:10")),
            import("Na Cl", Some("00:00:00")),
            import("Cu S", Some("00:10:30")),
            import("Na", Some("00:05:00")),
        ];

        let entries = annotate(&imports, Some("Na Cl H"));
        let order: Vec<&str> = entries.iter().map(|e| e.formula.as_str()).collect();
        assert_eq!(order, vec!["Na", "Na Cl", "Fe O", "Cu S"]);

        assert!(entries[0].matches_current);
        assert_eq!(entries[1].eta_seconds, None);
        assert_eq!(entries[3].eta_seconds, Some(630));
    }

    #[test]
    fn test_annotate_without_current_formula() {
        let imports = vec![import("Na Cl", None), import("Fe O", Some("00:01:00"))];
        let entries = annotate(&imports, None);
        assert!(entries.iter().all(|e| !e.matches_current));
        assert_eq!(entries[0].formula, "Fe O");
    }

    #[test]
    fn test_is_being_imported() {
        let imports = vec![import("Na Cl", None)];
        assert!(is_being_imported(&imports, Some("Na Cl H")));
        assert!(!is_being_imported(&imports, Some("Fe O")));
        assert!(!is_being_imported(&imports, None));
    }
}
