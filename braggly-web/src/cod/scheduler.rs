//! Exactly-once in-flight, at-most-N-per-interval task scheduling
//!
//! The detail fetcher uses this to guarantee that a COD identifier is never
//! requested twice concurrently and that the backend sees no more than
//! `max_per_interval` detail requests in any `interval` window.

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Marker held while a keyed task runs; dropping it releases the key
pub struct InFlightGuard<K: Eq + Hash> {
    key: Option<K>,
    in_flight: Arc<Mutex<HashSet<K>>>,
}

impl<K: Eq + Hash> Drop for InFlightGuard<K> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&key);
        }
    }
}

pub struct TaskScheduler<K: Eq + Hash> {
    in_flight: Arc<Mutex<HashSet<K>>>,
    window: tokio::sync::Mutex<VecDeque<Instant>>,
    max_per_interval: usize,
    interval: Duration,
}

impl<K: Eq + Hash + Clone> TaskScheduler<K> {
    /// Allow `max_per_interval` task starts per `interval` (minimum 1)
    pub fn new(max_per_interval: u32, interval: Duration) -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            window: tokio::sync::Mutex::new(VecDeque::new()),
            max_per_interval: max_per_interval.max(1) as usize,
            interval,
        }
    }

    /// Claim `key`, or `None` when a task for it is already running
    pub fn try_claim(&self, key: K) -> Option<InFlightGuard<K>> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !in_flight.insert(key.clone()) {
            return None;
        }
        Some(InFlightGuard {
            key: Some(key),
            in_flight: self.in_flight.clone(),
        })
    }

    pub fn is_in_flight(&self, key: &K) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Wait until starting another task keeps the window within its limit
    pub async fn acquire_slot(&self) {
        loop {
            let wait = {
                let mut window = self.window.lock().await;
                let now = Instant::now();
                while let Some(&front) = window.front() {
                    if now.duration_since(front) >= self.interval {
                        window.pop_front();
                    } else {
                        break;
                    }
                }

                if window.len() < self.max_per_interval {
                    window.push_back(now);
                    return;
                }

                match window.front() {
                    Some(&oldest) => (oldest + self.interval).saturating_duration_since(now),
                    None => Duration::ZERO,
                }
            };

            debug!("Rate limiting: waiting {:?}", wait);
            tokio::time::sleep(wait).await;
        }
    }

    /// Run `task` under `key` once a rate slot is free
    ///
    /// Returns `None` without running anything when `key` is already in
    /// flight.
    pub async fn run<F, T>(&self, key: K, task: F) -> Option<T>
    where
        F: Future<Output = T>,
    {
        let _guard = self.try_claim(key)?;
        self.acquire_slot().await;
        Some(task.await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_claim_is_exclusive_until_dropped() {
        let scheduler: TaskScheduler<String> = TaskScheduler::new(1, Duration::from_millis(500));
        let guard = scheduler.try_claim("1001".to_string());
        assert!(guard.is_some());
        assert!(scheduler.try_claim("1001".to_string()).is_none());
        assert!(scheduler.is_in_flight(&"1001".to_string()));
        assert!(scheduler.try_claim("1002".to_string()).is_some());

        drop(guard);
        assert!(!scheduler.is_in_flight(&"1001".to_string()));
        assert!(scheduler.try_claim("1001".to_string()).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slots_are_spaced_by_interval() {
        let scheduler: TaskScheduler<u32> = TaskScheduler::new(1, Duration::from_millis(500));
        let start = Instant::now();

        scheduler.acquire_slot().await;
        scheduler.acquire_slot().await;
        scheduler.acquire_slot().await;

        assert!(start.elapsed() >= Duration::from_millis(1000));
        assert!(start.elapsed() < Duration::from_millis(1100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_allows_n_per_window() {
        let scheduler: TaskScheduler<u32> = TaskScheduler::new(3, Duration::from_millis(500));
        let start = Instant::now();

        for _ in 0..3 {
            scheduler.acquire_slot().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);

        scheduler.acquire_slot().await;
        assert!(start.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_skips_duplicate_key() {
        let scheduler = Arc::new(TaskScheduler::<String>::new(10, Duration::from_millis(10)));
        let runs = Arc::new(AtomicUsize::new(0));

        let guard = scheduler.try_claim("42".to_string());
        let counter = runs.clone();
        let result = scheduler
            .run("42".to_string(), async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        assert!(result.is_none());
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        drop(guard);
        let counter = runs.clone();
        let result = scheduler
            .run("42".to_string(), async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        assert!(result.is_some());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.in_flight_count(), 0);
    }
}
