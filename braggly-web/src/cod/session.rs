//! COD import polling session
//!
//! One [`CodSession`] exists per signed-in browser session. Submitting a
//! query starts a new *generation* and spawns up to three tasks for it:
//!
//! - **status poller**: `POST /api/cod/search` until `completed && alreadyQueried`
//! - **identifier poller**: `GET /api/cod/id` until one fetch after completion,
//!   then the grace delay
//! - **detail fetcher**: sequential, rate-limited `GET /api/cod/cif/{id}` for
//!   every identifier that is neither fetched, rejected nor in flight
//!
//! Every generation owns a child [`CancellationToken`]. Replacing the query
//! cancels the previous generation's token, which drops its in-flight
//! requests, and every state mutation re-checks the generation number so a
//! late answer from a superseded query is discarded.
//!
//! For the current generation the identifier set always equals the union of
//! fetched records, rejected identifiers and pending identifiers.

use braggly_common::api::{ActiveImport, CodRecord, QueryStatus};
use braggly_common::config::PollingConfig;
use braggly_common::events::{CodEvent, EventBus};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::active_imports::{self, ImportEntry};
use super::poller::{poll, PollLoop, PollOutcome, RetryPolicy, Step};
use super::scheduler::TaskScheduler;
use super::source::CodSource;
use super::view::{compare_ids, CodView, IdPhase, SessionSnapshot};
use crate::backend::BackendError;

const EVENT_CAPACITY: usize = 256;

/// Mutable state of the current generation
struct SessionState {
    generation: u64,
    query: Option<String>,
    formula: Option<String>,
    progress: u8,
    completed: bool,
    status_error: Option<String>,
    id_phase: IdPhase,
    ids: BTreeSet<String>,
    details: HashMap<String, CodRecord>,
    rejected: BTreeSet<String>,
    /// Failed detail attempts per identifier
    attempts: HashMap<String, u32>,
    /// Identifiers that used up their attempts; still counted as pending
    exhausted: BTreeSet<String>,
    fetching: bool,
    cancel: CancellationToken,
    ids_changed: Arc<Notify>,
    /// Not tied to a generation
    active_imports: Vec<ActiveImport>,
}

impl SessionState {
    fn new(cancel: CancellationToken) -> Self {
        Self {
            generation: 0,
            query: None,
            formula: None,
            progress: 0,
            completed: false,
            status_error: None,
            id_phase: IdPhase::Idle,
            ids: BTreeSet::new(),
            details: HashMap::new(),
            rejected: BTreeSet::new(),
            attempts: HashMap::new(),
            exhausted: BTreeSet::new(),
            fetching: false,
            cancel,
            ids_changed: Arc::new(Notify::new()),
            active_imports: Vec::new(),
        }
    }

    /// Identifiers the detail fetcher should try next, in numeric order
    fn fetchable_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .ids
            .iter()
            .filter(|id| {
                !self.details.contains_key(*id)
                    && !self.rejected.contains(*id)
                    && !self.exhausted.contains(*id)
            })
            .cloned()
            .collect();
        ids.sort_by(|a, b| compare_ids(a, b));
        ids
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            generation: self.generation,
            query: self.query.clone(),
            formula: self.formula.clone(),
            progress: self.progress,
            completed: self.completed,
            status_error: self.status_error.clone(),
            id_phase: self.id_phase,
            ids: self.ids.iter().cloned().collect(),
            records: self.details.values().cloned().collect(),
            rejected: self.rejected.iter().cloned().collect(),
            fetching: self.fetching,
        }
    }
}

struct SessionInner {
    id: Uuid,
    source: Arc<dyn CodSource>,
    config: PollingConfig,
    events: EventBus,
    scheduler: TaskScheduler<String>,
    shutdown: CancellationToken,
    state: Mutex<SessionState>,
    last_seen: Mutex<Instant>,
}

impl SessionInner {
    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn touch(&self) {
        *self.last_seen.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }
}

/// Handle to one generation's tasks
#[derive(Clone)]
struct Generation {
    inner: Arc<SessionInner>,
    number: u64,
    cancel: CancellationToken,
}

impl Generation {
    /// Run `f` against the state if this generation is still current
    fn with_state<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> Option<R> {
        let mut state = self.inner.state();
        if state.generation != self.number || self.cancel.is_cancelled() {
            return None;
        }
        Some(f(&mut state))
    }

    fn emit(&self, event: CodEvent) {
        self.inner.events.emit_lossy(event);
    }

    /// Union `ids` into the identifier set
    fn union_ids(&self, ids: Vec<String>) {
        let discovered = self.with_state(|state| {
            let new_ids: Vec<String> = ids
                .into_iter()
                .filter(|id| state.ids.insert(id.clone()))
                .collect();
            if !new_ids.is_empty() {
                state.ids_changed.notify_one();
            }
            (new_ids, state.ids.len())
        });

        if let Some((new_ids, total)) = discovered {
            if !new_ids.is_empty() {
                debug!(generation = self.number, count = new_ids.len(), total, "New COD identifiers");
                self.emit(CodEvent::IdsDiscovered {
                    generation: self.number,
                    new_ids,
                    total,
                });
            }
        }
    }

    fn set_id_phase(&self, phase: IdPhase) -> bool {
        self.with_state(|state| state.id_phase = phase).is_some()
    }

    async fn run_status_poller(self, query: String) {
        let config = &self.inner.config;
        let interval = config.status_interval();
        let policy = RetryPolicy::from_config(config, PollLoop::Status, interval);

        let outcome = poll("cod-status", interval, &policy, &self.cancel, || {
            let generation = self.clone();
            let query = query.clone();
            async move {
                let status = generation.inner.source.query_status(&query).await?;
                Ok::<_, BackendError>(generation.apply_status(&status))
            }
        })
        .await;

        match outcome {
            PollOutcome::Completed(true) => {
                info!(generation = self.number, query = %query, "COD query completed");
                self.emit(CodEvent::QueryCompleted {
                    generation: self.number,
                });
            }
            PollOutcome::Completed(false) | PollOutcome::Cancelled => {}
            PollOutcome::Failed(e) => {
                let message = e.to_string();
                let current = self
                    .with_state(|state| state.status_error = Some(message.clone()))
                    .is_some();
                if current {
                    warn!(generation = self.number, query = %query, "COD status polling failed: {}", message);
                    self.emit(CodEvent::QueryFailed {
                        generation: self.number,
                        message,
                    });
                }
            }
        }
    }

    /// Record a status response; `Done(false)` when the generation is stale
    fn apply_status(&self, status: &QueryStatus) -> Step<bool> {
        let finished = status.is_finished();
        let current = self
            .with_state(|state| {
                state.progress = status.progress;
                if finished {
                    state.completed = true;
                }
            })
            .is_some();

        if !current {
            return Step::Done(false);
        }

        self.emit(CodEvent::ProgressUpdated {
            generation: self.number,
            progress: status.progress,
        });

        if finished {
            Step::Done(true)
        } else {
            Step::Continue
        }
    }

    async fn run_id_poller(self, formula: String) {
        let config = &self.inner.config;
        let interval = config.ids_interval();
        let policy = RetryPolicy::from_config(config, PollLoop::Identifiers, interval);

        let outcome = poll("cod-ids", interval, &policy, &self.cancel, || {
            let generation = self.clone();
            let formula = formula.clone();
            async move {
                let status_done = generation.with_state(|state| {
                    let done = state.completed || state.status_error.is_some();
                    if done {
                        state.id_phase = IdPhase::FinalPoll;
                    }
                    done
                });
                let Some(status_done) = status_done else {
                    return Ok::<_, BackendError>(Step::Done(false));
                };

                let ids = generation.inner.source.list_ids(&formula).await?;
                generation.union_ids(ids);

                Ok(if status_done {
                    Step::Done(true)
                } else {
                    Step::Continue
                })
            }
        })
        .await;

        match outcome {
            PollOutcome::Completed(true) => {
                if !self.set_id_phase(IdPhase::Grace) {
                    return;
                }
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return,
                    _ = tokio::time::sleep(config.id_grace()) => {}
                }
                if self.set_id_phase(IdPhase::Complete) {
                    debug!(generation = self.number, formula = %formula, "Identifier polling complete");
                    self.emit(CodEvent::IdPollingComplete {
                        generation: self.number,
                    });
                }
            }
            PollOutcome::Completed(false) | PollOutcome::Cancelled => {}
            PollOutcome::Failed(e) => {
                if self.set_id_phase(IdPhase::Failed) {
                    warn!(generation = self.number, formula = %formula, "Identifier polling failed: {}", e);
                }
            }
        }
    }

    async fn run_detail_fetcher(self, ids_changed: Arc<Notify>) {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = ids_changed.notified() => {}
            }
            self.detail_pass().await;
        }
        debug!(generation = self.number, "Detail fetcher stopped");
    }

    /// Fetch every fetchable identifier, one at a time
    ///
    /// Loops until nothing is left so identifiers discovered during the
    /// pass, and transient failures with attempts left, are picked up.
    async fn detail_pass(&self) {
        let mut announced = false;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            let Some(candidates) = self.with_state(|state| state.fetchable_ids()) else {
                break;
            };
            if candidates.is_empty() {
                break;
            }
            let pending: Vec<String> = candidates
                .into_iter()
                .filter(|id| !self.inner.scheduler.is_in_flight(id))
                .collect();
            if pending.is_empty() {
                // Held by a superseded generation until its request is dropped
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.inner.config.detail_delay()) => continue,
                }
            }

            if !announced {
                announced = true;
                if self.with_state(|state| state.fetching = true).is_some() {
                    self.emit(CodEvent::FetchActivity {
                        generation: self.number,
                        active: true,
                    });
                }
            }

            for cod_id in pending {
                let fetch = self
                    .inner
                    .scheduler
                    .run(cod_id.clone(), self.inner.source.fetch_record(&cod_id));
                let result = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => break,
                    result = fetch => result,
                };
                // None: another task already holds this identifier
                if let Some(result) = result {
                    self.apply_detail(&cod_id, result);
                }
            }
        }

        if announced && self.with_state(|state| state.fetching = false).is_some() {
            self.emit(CodEvent::FetchActivity {
                generation: self.number,
                active: false,
            });
        }
    }

    fn apply_detail(&self, cod_id: &str, result: Result<CodRecord, BackendError>) {
        let max_attempts = self.inner.config.detail_max_attempts.max(1);

        match result {
            Ok(mut record) => {
                record.cod_id = cod_id.to_string();
                let stored = self.with_state(|state| {
                    if !state.ids.contains(cod_id) {
                        return false;
                    }
                    state.attempts.remove(cod_id);
                    state.details.insert(cod_id.to_string(), record.clone());
                    true
                });
                if stored == Some(true) {
                    debug!(generation = self.number, cod_id = %cod_id, "COD record stored");
                    self.emit(CodEvent::RecordFetched {
                        generation: self.number,
                        record,
                    });
                }
            }
            Err(BackendError::Forbidden) => {
                let rejected = self.with_state(|state| {
                    state.attempts.remove(cod_id);
                    state.rejected.insert(cod_id.to_string())
                });
                if rejected == Some(true) {
                    info!(generation = self.number, cod_id = %cod_id, "COD record access denied");
                    self.emit(CodEvent::RecordRejected {
                        generation: self.number,
                        cod_id: cod_id.to_string(),
                    });
                }
            }
            Err(e) => {
                let attempts = self.with_state(|state| {
                    let attempts = state.attempts.entry(cod_id.to_string()).or_insert(0);
                    *attempts += 1;
                    let attempts = *attempts;
                    if attempts >= max_attempts {
                        state.exhausted.insert(cod_id.to_string());
                    }
                    attempts
                });
                if let Some(attempts) = attempts {
                    warn!(
                        generation = self.number,
                        cod_id = %cod_id,
                        attempts,
                        max_attempts,
                        "COD record fetch failed: {}",
                        e
                    );
                }
            }
        }
    }
}

/// COD polling session bound to one backend token
#[derive(Clone)]
pub struct CodSession {
    inner: Arc<SessionInner>,
}

impl CodSession {
    /// Create an idle session and start watching the backend's active imports
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(source: Arc<dyn CodSource>, config: PollingConfig) -> Self {
        let shutdown = CancellationToken::new();
        let inner = Arc::new(SessionInner {
            id: Uuid::new_v4(),
            source,
            scheduler: TaskScheduler::new(config.detail_burst, config.detail_delay()),
            events: EventBus::new(EVENT_CAPACITY),
            state: Mutex::new(SessionState::new(shutdown.child_token())),
            last_seen: Mutex::new(Instant::now()),
            shutdown,
            config,
        });

        let session = Self { inner };
        session.spawn_active_imports_watcher();
        session
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CodEvent> {
        self.inner.touch();
        self.inner.events.subscribe()
    }

    /// Whether an event stream is still attached
    pub fn has_subscribers(&self) -> bool {
        self.inner.events.subscriber_count() > 0
    }

    /// Time since the session was last used by its owner
    pub fn idle_for(&self) -> Duration {
        self.inner
            .last_seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }

    pub fn generation(&self) -> u64 {
        self.inner.state().generation
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Replace the current query
    ///
    /// Clears identifiers, records, rejections and progress in one step
    /// and returns the new generation number.
    pub fn submit(&self, query: &str, formula: Option<&str>) -> u64 {
        self.inner.touch();
        self.start_generation(non_blank(Some(query)), non_blank(formula), None)
    }

    /// Replace the current query with a single COD identifier
    ///
    /// No search runs; only the record itself is fetched.
    pub fn submit_direct(&self, cod_id: &str) -> u64 {
        self.inner.touch();
        let cod_id = cod_id.trim().to_string();
        self.start_generation(Some(cod_id.clone()), None, Some(cod_id))
    }

    /// Add an identifier to the current set without any network call
    ///
    /// Returns `false` when the identifier was already known. With no query
    /// yet, an empty generation is started to hold it.
    pub fn inject_id(&self, cod_id: &str) -> bool {
        self.inner.touch();
        let cod_id = cod_id.trim().to_string();
        if cod_id.is_empty() {
            return false;
        }

        let injected = {
            let mut state = self.inner.state();
            if state.generation == 0 || state.cancel.is_cancelled() {
                None
            } else if state.ids.insert(cod_id.clone()) {
                state.ids_changed.notify_one();
                Some(Some((state.generation, state.ids.len())))
            } else {
                Some(None)
            }
        };

        match injected {
            None => {
                if self.is_closed() {
                    return false;
                }
                self.start_generation(None, None, Some(cod_id));
                true
            }
            Some(Some((generation, total))) => {
                debug!(generation, cod_id = %cod_id, "COD identifier injected");
                self.inner.events.emit_lossy(CodEvent::IdsDiscovered {
                    generation,
                    new_ids: vec![cod_id],
                    total,
                });
                true
            }
            Some(None) => false,
        }
    }

    /// Presentation snapshot of the current generation
    pub fn view(&self) -> CodView {
        self.inner.touch();
        CodView::from(self.inner.state().snapshot())
    }

    /// Running backend imports, annotated against the current formula
    pub fn active_imports(&self) -> Vec<ImportEntry> {
        self.inner.touch();
        let state = self.inner.state();
        active_imports::annotate(&state.active_imports, state.formula.as_deref())
    }

    /// Whether a running import matches the current formula
    pub fn is_being_imported(&self) -> bool {
        let state = self.inner.state();
        active_imports::is_being_imported(&state.active_imports, state.formula.as_deref())
    }

    /// Cancel every loop of this session
    pub fn close(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        self.inner.shutdown.cancel();
        let generation = self.generation();
        info!(session_id = %self.inner.id, generation, "COD session closed");
        self.inner.events.emit_lossy(CodEvent::SessionClosed {
            session_id: self.inner.id,
            generation,
        });
    }

    fn start_generation(
        &self,
        query: Option<String>,
        formula: Option<String>,
        seed_id: Option<String>,
    ) -> u64 {
        let cancel = self.inner.shutdown.child_token();
        let ids_changed = Arc::new(Notify::new());

        let generation = {
            let mut state = self.inner.state();
            state.cancel.cancel();

            let generation = state.generation + 1;
            let active_imports = std::mem::take(&mut state.active_imports);
            *state = SessionState::new(cancel.clone());
            state.generation = generation;
            state.ids_changed = ids_changed.clone();
            state.active_imports = active_imports;
            state.query = query.clone();
            state.formula = formula.clone();
            if formula.is_some() {
                state.id_phase = IdPhase::Polling;
            }
            if let Some(cod_id) = &seed_id {
                // Nothing to search for; the identifier is fetched directly
                state.ids.insert(cod_id.clone());
                state.completed = true;
                state.progress = 100;
            }
            generation
        };

        info!(
            session_id = %self.inner.id,
            generation,
            query = ?query,
            formula = ?formula,
            "COD query started"
        );
        self.inner.events.emit_lossy(CodEvent::QueryStarted {
            session_id: self.inner.id,
            generation,
            query: query.clone().unwrap_or_default(),
            formula: formula.clone(),
            timestamp: chrono::Utc::now(),
        });

        let handle = Generation {
            inner: self.inner.clone(),
            number: generation,
            cancel,
        };

        tokio::spawn(handle.clone().run_detail_fetcher(ids_changed.clone()));
        if let (Some(query), None) = (query, &seed_id) {
            tokio::spawn(handle.clone().run_status_poller(query));
        }
        if let Some(formula) = formula {
            tokio::spawn(handle.clone().run_id_poller(formula));
        }
        if let Some(cod_id) = seed_id {
            handle.emit(CodEvent::IdsDiscovered {
                generation,
                new_ids: vec![cod_id],
                total: 1,
            });
            ids_changed.notify_one();
        }

        generation
    }

    /// Watch the backend's running imports for as long as the session lives
    ///
    /// A rejected token ends the watcher and closes the session.
    fn spawn_active_imports_watcher(&self) {
        let config = &self.inner.config;
        let interval = config.active_imports_interval();
        let policy = RetryPolicy::from_config(config, PollLoop::ActiveImports, interval);
        let source = self.inner.source.clone();
        let cancel = self.inner.shutdown.clone();
        let publish_to = Arc::downgrade(&self.inner);
        let owner = Arc::downgrade(&self.inner);

        tokio::spawn(async move {
            let outcome = active_imports::watch(source, interval, policy, cancel, move |imports| {
                if let Some(inner) = publish_to.upgrade() {
                    inner.state().active_imports = imports;
                }
            })
            .await;

            if let PollOutcome::Failed(BackendError::Unauthorized) = outcome {
                if let Some(inner) = owner.upgrade() {
                    warn!(session_id = %inner.id, "Backend rejected the session token");
                    CodSession { inner }.close();
                }
            }
        });
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
