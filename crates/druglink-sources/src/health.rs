//! Source availability tracking.

use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use druglink_core::SharedClock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::SourceResult;

/// Availability of a source.
///
/// `Unknown → Checking → {Up, Down}`; a settled state is re-checked once it is older
/// than the recheck interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Unknown,
    Checking,
    Up,
    Down,
}

#[derive(Debug, Clone, Copy)]
struct Snapshot {
    availability: Availability,
    checked_at: Option<Instant>,
}

/// Caches the result of availability checks.
#[derive(Debug)]
pub struct HealthMonitor {
    snapshot: Mutex<Snapshot>,
    /// Serializes checks so concurrent callers share one
    check_guard: tokio::sync::Mutex<()>,
    recheck: Duration,
    timeout: Duration,
    clock: SharedClock,
}

impl HealthMonitor {
    pub fn new(recheck: Duration, timeout: Duration, clock: SharedClock) -> Self {
        Self {
            snapshot: Mutex::new(Snapshot {
                availability: Availability::Unknown,
                checked_at: None,
            }),
            check_guard: tokio::sync::Mutex::new(()),
            recheck,
            timeout,
            clock,
        }
    }

    /// Last known availability, without probing.
    pub fn state(&self) -> Availability {
        self.snapshot().availability
    }

    /// Return a fresh availability, running `check` if the cached one is stale.
    pub async fn ensure<F, Fut>(&self, source: &str, check: F) -> Availability
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SourceResult<()>>,
    {
        if let Some(settled) = self.settled() {
            return settled;
        }

        let _guard = self.check_guard.lock().await;
        if let Some(settled) = self.settled() {
            return settled;
        }

        self.set(Availability::Checking);
        let availability = match tokio::time::timeout(self.timeout, check()).await {
            Ok(Ok(())) => {
                debug!(source, "Source is up");
                Availability::Up
            }
            Ok(Err(e)) => {
                warn!(source, error = %e, "Availability check failed; marking down");
                Availability::Down
            }
            Err(_) => {
                warn!(source, timeout = ?self.timeout, "Availability check timed out; marking down");
                Availability::Down
            }
        };
        self.set(availability);
        availability
    }

    fn snapshot(&self) -> Snapshot {
        *self.snapshot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Up or down, if checked within the recheck interval.
    pub fn settled(&self) -> Option<Availability> {
        let snapshot = self.snapshot();
        match (snapshot.availability, snapshot.checked_at) {
            (Availability::Up | Availability::Down, Some(at))
                if self.clock.now().duration_since(at) < self.recheck =>
            {
                Some(snapshot.availability)
            }
            _ => None,
        }
    }

    fn set(&self, availability: Availability) {
        let now = self.clock.now();
        let mut snapshot = self.snapshot.lock().unwrap_or_else(PoisonError::into_inner);
        snapshot.availability = availability;
        snapshot.checked_at = match availability {
            Availability::Up | Availability::Down => Some(now),
            _ => snapshot.checked_at,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use druglink_core::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn monitor(clock: Arc<ManualClock>) -> HealthMonitor {
        HealthMonitor::new(Duration::from_secs(60), Duration::from_secs(8), clock)
    }

    #[tokio::test]
    async fn test_check_result_is_cached() {
        let clock = Arc::new(ManualClock::new());
        let health = monitor(clock.clone());
        let counter = AtomicUsize::new(0);
        let checks = &counter;
        assert_eq!(health.state(), Availability::Unknown);

        for _ in 0..3 {
            let state = health
                .ensure("test", || async move {
                    checks.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), SourceError>(())
                })
                .await;
            assert_eq!(state, Availability::Up);
        }
        assert_eq!(checks.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_secs(61));
        assert_eq!(health.settled(), None);
        health
            .ensure("test", || async move {
                checks.fetch_add(1, Ordering::SeqCst);
                Ok::<(), SourceError>(())
            })
            .await;
        assert_eq!(checks.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_check_marks_down() {
        let health = monitor(Arc::new(ManualClock::new()));

        let state = health
            .ensure("test", || async { Err::<(), _>(SourceError::Http(503)) })
            .await;
        assert_eq!(state, Availability::Down);
        assert_eq!(health.state(), Availability::Down);
        assert_eq!(health.settled(), Some(Availability::Down));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_check_times_out() {
        let health = monitor(Arc::new(ManualClock::new()));

        let state = health
            .ensure("test", || async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok::<(), SourceError>(())
            })
            .await;
        assert_eq!(state, Availability::Down);
    }
}
