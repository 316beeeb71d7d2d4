//! Lazy, single-flight initialization of shared state.

use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

/// Observable initialization state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Uninitialized,
    Loading,
    Ready,
}

impl LifecycleState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Loading,
            2 => Self::Ready,
            _ => Self::Uninitialized,
        }
    }
}

/// A value built at most once, on first use.
///
/// Concurrent callers of [`Lifecycle::get_or_init`] wait on the same initialization.
#[derive(Debug)]
pub struct Lifecycle<T> {
    cell: OnceCell<Arc<T>>,
    state: AtomicU8,
}

impl<T> Default for Lifecycle<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Lifecycle<T> {
    /// Create an uninitialized lifecycle.
    pub fn new() -> Self {
        Self {
            cell: OnceCell::new(),
            state: AtomicU8::new(0),
        }
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Return the value, running `init` if nobody has yet.
    pub async fn get_or_init<F, Fut>(&self, init: F) -> Arc<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.cell
            .get_or_init(|| async move {
                self.state.store(1, Ordering::Release);
                let value = Arc::new(init().await);
                self.state.store(2, Ordering::Release);
                value
            })
            .await
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_initializes_once() {
        let lifecycle = Arc::new(Lifecycle::<usize>::new());
        let calls = Arc::new(AtomicUsize::new(0));
        assert_eq!(lifecycle.state(), LifecycleState::Uninitialized);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let lifecycle = lifecycle.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                *lifecycle
                    .get_or_init(|| async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::task::yield_now().await;
                        42
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(lifecycle.state(), LifecycleState::Ready);
    }

    #[tokio::test]
    async fn test_cancelled_init_runs_again() {
        let lifecycle = Lifecycle::<usize>::new();

        let abandoned = tokio::time::timeout(
            std::time::Duration::ZERO,
            lifecycle.get_or_init(|| async {
                tokio::time::sleep(std::time::Duration::from_secs(60)).await;
                1
            }),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(lifecycle.state(), LifecycleState::Loading);

        assert_eq!(*lifecycle.get_or_init(|| async { 2 }).await, 2);
        assert_eq!(lifecycle.state(), LifecycleState::Ready);
    }
}
