use std::sync::Arc;
use tokio::sync::watch;

/// Count of pipelines started but not yet settled.
///
/// Every mutation goes through `watch::Sender::send_modify`, which serializes
/// writers and wakes every subscriber, so observers always see the outstanding
/// work and never a value recomputed from an earlier snapshot.
#[derive(Clone)]
pub struct InFlightCounter {
    tx: Arc<watch::Sender<usize>>,
}

impl Default for InFlightCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl InFlightCounter {
    pub fn new() -> Self {
        Self {
            tx: Arc::new(watch::Sender::new(0)),
        }
    }

    /// Current number of unsettled pipelines.
    pub fn get(&self) -> usize {
        *self.tx.borrow()
    }

    pub fn is_busy(&self) -> bool {
        self.get() > 0
    }

    /// Read-only handle that is notified on every increment and decrement.
    pub fn subscribe(&self) -> watch::Receiver<usize> {
        self.tx.subscribe()
    }

    /// Wait until every pipeline has settled.
    pub async fn wait_idle(&self) {
        let mut rx = self.subscribe();
        // Sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|count| *count == 0).await;
    }

    /// Count one pipeline in. The returned guard counts it out when dropped.
    pub(crate) fn acquire(&self) -> InFlightGuard {
        self.tx.send_modify(|count| *count += 1);
        InFlightGuard {
            tx: Some(self.tx.clone()),
        }
    }
}

/// Releases one unit of in-flight work exactly once, on every exit path.
pub(crate) struct InFlightGuard {
    tx: Option<Arc<watch::Sender<usize>>>,
}

impl InFlightGuard {
    pub(crate) fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Some(tx) = self.tx.take() {
            tx.send_modify(|count| match count.checked_sub(1) {
                Some(next) => *count = next,
                None => log::error!("In-flight counter underflow ignored"),
            });
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_and_release() {
        let counter = InFlightCounter::new();
        assert!(!counter.is_busy());

        let first = counter.acquire();
        let second = counter.acquire();
        assert_eq!(counter.get(), 2);

        first.release();
        assert_eq!(counter.get(), 1);

        drop(second);
        assert_eq!(counter.get(), 0);
        assert!(!counter.is_busy());
    }

    #[test]
    fn test_explicit_release_does_not_double_count() {
        let counter = InFlightCounter::new();
        let _other = counter.acquire();
        let guard = counter.acquire();

        // release consumes the guard; its Drop must not decrement again
        guard.release();
        assert_eq!(counter.get(), 1);
    }

    #[test]
    fn test_subscriber_sees_every_mutation() {
        let counter = InFlightCounter::new();
        let mut rx = counter.subscribe();

        let guard = counter.acquire();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), 1);

        drop(guard);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), 0);
    }

    #[tokio::test]
    async fn test_wait_idle_returns_after_last_release() {
        let counter = InFlightCounter::new();
        let guard = counter.acquire();

        let waiter = {
            let counter = counter.clone();
            tokio::spawn(async move { counter.wait_idle().await })
        };

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
        assert_eq!(counter.get(), 0);
    }
}
