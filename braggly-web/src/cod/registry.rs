//! Per-token COD sessions
//!
//! Sessions are only created once the backend has accepted the token. A
//! session whose watcher saw the token rejected closes itself; closed and
//! idle sessions are dropped by [`SessionRegistry::evict_idle`].

use braggly_common::config::PollingConfig;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::session::CodSession;
use super::source::CodSource;

/// Longest pause between two idle sweeps
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// COD sessions keyed by backend token
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, CodSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open session for `token`; closed sessions count as absent
    pub async fn get(&self, token: &str) -> Option<CodSession> {
        self.sessions
            .read()
            .await
            .get(token)
            .filter(|session| !session.is_closed())
            .cloned()
    }

    /// Session for `token`, created with `source` on first use
    ///
    /// A closed session left under the same token is replaced.
    pub async fn get_or_create(
        &self,
        token: &str,
        source: impl FnOnce() -> Arc<dyn CodSource>,
        config: &PollingConfig,
    ) -> CodSession {
        if let Some(session) = self.get(token).await {
            return session;
        }

        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get(token).filter(|s| !s.is_closed()) {
            return session.clone();
        }

        let session = CodSession::new(source(), config.clone());
        info!(session_id = %session.id(), "COD session created");
        if let Some(stale) = sessions.insert(token.to_string(), session.clone()) {
            stale.close();
        }
        session
    }

    /// Close and forget the session for `token`
    pub async fn remove(&self, token: &str) -> bool {
        let removed = self.sessions.write().await.remove(token);
        match removed {
            Some(session) => {
                let was_open = !session.is_closed();
                session.close();
                was_open
            }
            None => false,
        }
    }

    /// Drop closed sessions and close those idle for at least `idle`
    ///
    /// A session with a live event subscriber is never idle. Returns the
    /// number of sessions removed.
    pub async fn evict_idle(&self, idle: Duration) -> usize {
        let mut evicted = Vec::new();
        self.sessions.write().await.retain(|_, session| {
            let keep =
                !session.is_closed() && (session.has_subscribers() || session.idle_for() < idle);
            if !keep {
                evicted.push(session.clone());
            }
            keep
        });

        for session in &evicted {
            session.close();
        }
        if !evicted.is_empty() {
            info!(count = evicted.len(), "Evicted idle COD sessions");
        }
        evicted.len()
    }

    /// Sweep for idle sessions until `cancel` fires
    pub fn spawn_reaper(&self, idle: Duration, cancel: CancellationToken) {
        let registry = self.clone();
        let period = idle.clamp(Duration::from_secs(1), MAX_SWEEP_INTERVAL);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        registry.evict_idle(idle).await;
                    }
                }
            }
            debug!("COD session reaper stopped");
        });
    }

    /// Close every session; used on shutdown
    pub async fn close_all(&self) {
        let sessions: Vec<CodSession> = self.sessions.write().await.drain().map(|(_, s)| s).collect();
        if !sessions.is_empty() {
            info!(count = sessions.len(), "Closing COD sessions");
        }
        for session in sessions {
            session.close();
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendError;
    use async_trait::async_trait;
    use braggly_common::api::{ActiveImport, CodRecord, QueryStatus};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Backend that optionally rejects the session token on every call
    #[derive(Default)]
    struct StubSource {
        reject_token: bool,
        imports_calls: AtomicUsize,
    }

    #[async_trait]
    impl CodSource for StubSource {
        async fn query_status(&self, _query: &str) -> Result<QueryStatus, BackendError> {
            Ok(QueryStatus::default())
        }

        async fn list_ids(&self, _formula: &str) -> Result<Vec<String>, BackendError> {
            Ok(Vec::new())
        }

        async fn fetch_record(&self, _cod_id: &str) -> Result<CodRecord, BackendError> {
            Ok(CodRecord::default())
        }

        async fn active_imports(&self) -> Result<Vec<ActiveImport>, BackendError> {
            self.imports_calls.fetch_add(1, Ordering::SeqCst);
            if self.reject_token {
                Err(BackendError::Unauthorized)
            } else {
                Ok(Vec::new())
            }
        }
    }

    fn stub(reject_token: bool) -> Arc<dyn CodSource> {
        Arc::new(StubSource {
            reject_token,
            ..Default::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_does_not_create() {
        let registry = SessionRegistry::new();
        assert!(registry.get("tok").await.is_none());
        assert!(registry.is_empty().await);

        let config = PollingConfig::default();
        let first = registry.get_or_create("tok", || stub(false), &config).await;
        let second = registry.get_or_create("tok", || stub(false), &config).await;
        assert_eq!(first.id(), second.id());
        assert_eq!(registry.len().await, 1);
        registry.close_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_token_closes_session() {
        let registry = SessionRegistry::new();
        let source = Arc::new(StubSource {
            reject_token: true,
            ..Default::default()
        });
        let config = PollingConfig::default();

        let session = registry
            .get_or_create("stale", || source.clone() as Arc<dyn CodSource>, &config)
            .await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(session.is_closed());
        assert_eq!(source.imports_calls.load(Ordering::SeqCst), 1);
        assert!(registry.get("stale").await.is_none());

        assert_eq!(registry.evict_idle(config.session_idle()).await, 1);
        assert!(registry.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_session_replaced_on_create() {
        let registry = SessionRegistry::new();
        let config = PollingConfig::default();

        let first = registry.get_or_create("tok", || stub(false), &config).await;
        first.close();
        let second = registry.get_or_create("tok", || stub(false), &config).await;

        assert_ne!(first.id(), second.id());
        assert!(!second.is_closed());
        assert_eq!(registry.len().await, 1);
        registry.close_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_sessions_evicted_unless_subscribed() {
        let registry = SessionRegistry::new();
        let config = PollingConfig::default();
        let idle = Duration::from_secs(60);

        let quiet = registry.get_or_create("quiet", || stub(false), &config).await;
        let watched = registry.get_or_create("watched", || stub(false), &config).await;
        let _events = watched.subscribe();
        let busy = registry.get_or_create("busy", || stub(false), &config).await;

        tokio::time::sleep(Duration::from_secs(45)).await;
        busy.view();
        tokio::time::sleep(Duration::from_secs(20)).await;

        assert_eq!(registry.evict_idle(idle).await, 1);
        assert!(quiet.is_closed());
        assert!(registry.get("quiet").await.is_none());
        assert!(registry.get("watched").await.is_some());
        assert!(registry.get("busy").await.is_some());
        registry.close_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaper_sweeps_until_cancelled() {
        let registry = SessionRegistry::new();
        let config = PollingConfig::default();
        let cancel = CancellationToken::new();
        registry.spawn_reaper(Duration::from_secs(5), cancel.clone());

        registry.get_or_create("tok", || stub(false), &config).await;
        tokio::time::sleep(Duration::from_secs(12)).await;
        assert!(registry.is_empty().await);

        cancel.cancel();
        registry.get_or_create("tok", || stub(false), &config).await;
        tokio::time::sleep(Duration::from_secs(12)).await;
        assert_eq!(registry.len().await, 1);
        registry.close_all().await;
    }
}
