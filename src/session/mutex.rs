//! Per-conversation exclusive access
//!
//! Every caller of [`KeyedMutex::run_exclusive`] is admitted into a chain for
//! its key at call time. A caller waits for the release of the caller admitted
//! before it, runs its task, then releases its own link. Keys never wait on one
//! another.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::oneshot;

use crate::conversation::ConversationKey;

/// Resolves once a link and every link admitted before it have released.
/// The map holds the newest link per key.
type Release = Shared<BoxFuture<'static, ()>>;

#[derive(Default)]
struct Inner {
    tails: Mutex<HashMap<ConversationKey, Release>>,
    next_ticket: AtomicU64,
}

impl Inner {
    fn tails(&self) -> MutexGuard<'_, HashMap<ConversationKey, Release>> {
        // The map is only touched in short non-panicking sections.
        self.tails.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// FIFO mutual exclusion keyed by conversation
#[derive(Clone, Default)]
pub struct KeyedMutex {
    inner: Arc<Inner>,
}

impl KeyedMutex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` once every task admitted earlier for `key` has finished.
    ///
    /// Admission happens when this method is called, not when the returned
    /// future is first polled. The key is released when the task completes,
    /// fails, panics, or the returned future is dropped.
    pub fn run_exclusive<Fut, T>(&self, key: &ConversationKey, task: Fut) -> impl Future<Output = T>
    where
        Fut: Future<Output = T>,
    {
        let (slot, previous) = self.admit(key);

        async move {
            if let Some(previous) = previous {
                previous.await;
            }
            tracing::trace!(key = %slot.key, ticket = slot.ticket, "Entered critical section");

            let result = task.await;
            drop(slot);
            result
        }
    }

    /// Number of keys with queued or running tasks
    pub fn tracked_keys(&self) -> usize {
        self.inner.tails().len()
    }

    fn admit(&self, key: &ConversationKey) -> (Slot, Option<Release>) {
        let ticket = self.inner.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (release, released_rx) = oneshot::channel::<()>();

        let mut tails = self.inner.tails();
        let previous = tails.get(key).cloned();

        let chained = previous.clone();
        let released = async move {
            if let Some(chained) = chained {
                chained.await;
            }
            // A dropped sender counts as a release.
            let _ = released_rx.await;
        }
        .boxed()
        .shared();

        tails.insert(key.clone(), released);
        drop(tails);

        let slot = Slot {
            inner: self.inner.clone(),
            key: key.clone(),
            ticket,
            release: Some(release),
        };
        (slot, previous)
    }
}

/// A caller's link in the chain for one key
struct Slot {
    inner: Arc<Inner>,
    key: ConversationKey,
    ticket: u64,
    release: Option<oneshot::Sender<()>>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            let _ = release.send(());
        }

        // Forget the key once its newest link has fully released.
        let mut tails = self.inner.tails();
        let idle = tails
            .get(&self.key)
            .is_some_and(|released| released.clone().now_or_never().is_some());
        if idle {
            tails.remove(&self.key);
            tracing::trace!(key = %self.key, ticket = self.ticket, "Released idle key");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::time::timeout;

    fn key(name: &str) -> ConversationKey {
        ConversationKey::new(name)
    }

    #[tokio::test]
    async fn test_same_key_runs_in_call_order_without_overlap() {
        let mutex = KeyedMutex::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let k = key("g:c:u");

        let mut futures = Vec::new();
        for i in 0..4 {
            let log = log.clone();
            futures.push(mutex.run_exclusive(&k, async move {
                log.lock().unwrap().push(format!("start {}", i));
                tokio::time::sleep(Duration::from_millis(5)).await;
                log.lock().unwrap().push(format!("end {}", i));
                i
            }));
        }

        // Spawn in reverse; admission order was fixed at call time.
        let mut handles = Vec::new();
        for fut in futures.into_iter().rev() {
            handles.push(tokio::spawn(fut));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let log = log.lock().unwrap().clone();
        let expected: Vec<String> = (0..4)
            .flat_map(|i| [format!("start {}", i), format!("end {}", i)])
            .collect();
        assert_eq!(log, expected);
        assert_eq!(mutex.tracked_keys(), 0);
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let mutex = KeyedMutex::new();
        let (hold_tx, hold_rx) = oneshot::channel::<()>();

        let held = tokio::spawn(mutex.run_exclusive(&key("a"), async move {
            let _ = hold_rx.await;
        }));

        let other = timeout(
            Duration::from_secs(1),
            mutex.run_exclusive(&key("b"), async { "done" }),
        )
        .await;
        assert_eq!(other.unwrap(), "done");
        assert_eq!(mutex.tracked_keys(), 1);

        hold_tx.send(()).unwrap();
        held.await.unwrap();
        assert_eq!(mutex.tracked_keys(), 0);
    }

    #[tokio::test]
    async fn test_error_propagates_and_releases() {
        let mutex = KeyedMutex::new();
        let k = key("k");

        let failed: Result<(), String> = mutex
            .run_exclusive(&k, async { Err("boom".to_string()) })
            .await;
        assert_eq!(failed, Err("boom".to_string()));

        let next = timeout(Duration::from_secs(1), mutex.run_exclusive(&k, async { 7 })).await;
        assert_eq!(next.unwrap(), 7);
        assert_eq!(mutex.tracked_keys(), 0);
    }

    #[tokio::test]
    async fn test_panicking_task_releases_key() {
        let mutex = KeyedMutex::new();
        let k = key("k");

        let panicked = tokio::spawn(mutex.run_exclusive(&k, async {
            panic!("task failed");
        }))
        .await;
        assert!(panicked.is_err());

        let next = timeout(Duration::from_secs(1), mutex.run_exclusive(&k, async { 1 })).await;
        assert_eq!(next.unwrap(), 1);
        assert_eq!(mutex.tracked_keys(), 0);
    }

    #[tokio::test]
    async fn test_dropped_waiter_keeps_successor_queued() {
        let mutex = KeyedMutex::new();
        let k = key("k");
        let (hold_tx, hold_rx) = oneshot::channel::<()>();
        let running = Arc::new(AtomicU64::new(0));

        let first_running = running.clone();
        let first = tokio::spawn(mutex.run_exclusive(&k, async move {
            first_running.fetch_add(1, Ordering::SeqCst);
            let _ = hold_rx.await;
            first_running.fetch_sub(1, Ordering::SeqCst);
        }));
        tokio::task::yield_now().await;

        let abandoned = mutex.run_exclusive(&k, async { unreachable!() });
        drop(abandoned);

        let third_running = running.clone();
        let third = mutex.run_exclusive(&k, async move { third_running.load(Ordering::SeqCst) });
        let third = tokio::spawn(third);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!third.is_finished());

        hold_tx.send(()).unwrap();
        first.await.unwrap();
        assert_eq!(third.await.unwrap(), 0);
        assert_eq!(mutex.tracked_keys(), 0);
    }
}
