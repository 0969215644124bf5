//! Deduplicating work queue of role keys.
//!
//! A key is queued at most once. A key being reconciled is never handed to a second
//! worker; enqueues that arrive meanwhile mark it dirty and it is queued again as soon
//! as the running pass finishes.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use cohort_common::ObjectKey;

use crate::action::Requeue;

/// Exponential retry delay: `base * 2^failures`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Backoff {
    pub fn delay(&self, failures: u32) -> Duration {
        let factor = 1u32.checked_shl(failures).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}

#[derive(Debug, Default)]
struct Slot {
    queued: bool,
    active: bool,
    dirty: bool,
    /// Consecutive passes that asked for a backoff.
    failures: u32,
}

pub struct WorkQueue {
    slots: DashMap<ObjectKey, Slot>,
    tx: mpsc::UnboundedSender<ObjectKey>,
    rx: Mutex<mpsc::UnboundedReceiver<ObjectKey>>,
    backoff: Backoff,
}

impl WorkQueue {
    pub fn new(backoff: Backoff) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            slots: DashMap::new(),
            tx,
            rx: Mutex::new(rx),
            backoff,
        }
    }

    pub fn enqueue(&self, key: ObjectKey) {
        let send = {
            let mut slot = self.slots.entry(key.clone()).or_default();
            if slot.active {
                slot.dirty = true;
                false
            } else if slot.queued {
                false
            } else {
                slot.queued = true;
                true
            }
        };
        if send {
            let _ = self.tx.send(key);
        }
    }

    pub fn enqueue_after(self: &Arc<Self>, key: ObjectKey, delay: Duration) {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.enqueue(key);
        });
    }

    /// Waits for the next key and marks it active.
    pub async fn next(&self) -> Option<ObjectKey> {
        let key = self.rx.lock().await.recv().await?;
        let mut slot = self.slots.entry(key.clone()).or_default();
        slot.queued = false;
        slot.active = true;
        Some(key)
    }

    /// Finishes the pass over `key` started by [`WorkQueue::next`].
    pub fn done(self: &Arc<Self>, key: &ObjectKey, requeue: Requeue) {
        let (dirty, delay) = {
            let Some(mut slot) = self.slots.get_mut(key) else {
                return;
            };
            slot.active = false;
            let dirty = std::mem::take(&mut slot.dirty);
            let delay = match requeue {
                Requeue::Backoff => {
                    let delay = self.backoff.delay(slot.failures);
                    slot.failures = slot.failures.saturating_add(1);
                    Some(delay)
                }
                Requeue::None | Requeue::Immediate => {
                    slot.failures = 0;
                    None
                }
            };
            (dirty, delay)
        };

        match (requeue, delay) {
            _ if dirty => self.enqueue(key.clone()),
            (Requeue::Immediate, _) => self.enqueue(key.clone()),
            (_, Some(delay)) => {
                tracing::debug!(%key, ?delay, "retrying after backoff");
                self.enqueue_after(key.clone(), delay);
            }
            _ => {
                self.slots
                    .remove_if(key, |_, s| !s.queued && !s.active && s.failures == 0);
            }
        }
    }

    /// Runs `workers` tasks pulling keys until `shutdown` fires. A pass in progress is
    /// allowed to finish.
    pub async fn run_workers<F, Fut>(
        self: &Arc<Self>,
        workers: usize,
        shutdown: CancellationToken,
        handler: F,
    ) where
        F: Fn(ObjectKey) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Requeue> + Send + 'static,
    {
        let mut set = JoinSet::new();
        for worker in 0..workers.max(1) {
            let queue = Arc::clone(self);
            let shutdown = shutdown.clone();
            let handler = handler.clone();
            set.spawn(async move {
                loop {
                    let key = tokio::select! {
                        _ = shutdown.cancelled() => break,
                        key = queue.next() => match key {
                            Some(key) => key,
                            None => break,
                        },
                    };
                    let requeue = handler(key.clone()).await;
                    queue.done(&key, requeue);
                }
                tracing::debug!(worker, "worker stopped");
            });
        }

        while let Some(res) = set.join_next().await {
            if let Err(e) = res {
                tracing::error!(error=%e, "worker task failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::time::timeout;

    use super::*;

    fn key(name: &str) -> ObjectKey {
        ObjectKey::new("default", name)
    }

    fn queue(base_ms: u64) -> Arc<WorkQueue> {
        Arc::new(WorkQueue::new(Backoff {
            base: Duration::from_millis(base_ms),
            max: Duration::from_secs(60),
        }))
    }

    async fn nothing_queued(queue: &WorkQueue) -> bool {
        timeout(Duration::from_millis(50), queue.next()).await.is_err()
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let backoff = Backoff {
            base: Duration::from_millis(100),
            max: Duration::from_secs(5),
        };
        assert_eq!(backoff.delay(0), Duration::from_millis(100));
        assert_eq!(backoff.delay(1), Duration::from_millis(200));
        assert_eq!(backoff.delay(3), Duration::from_millis(800));
        assert_eq!(backoff.delay(10), Duration::from_secs(5));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn duplicate_enqueues_collapse() {
        let queue = queue(10);
        queue.enqueue(key("a"));
        queue.enqueue(key("a"));
        queue.enqueue(key("b"));

        assert_eq!(queue.next().await, Some(key("a")));
        assert_eq!(queue.next().await, Some(key("b")));
        assert!(nothing_queued(&queue).await);
    }

    #[tokio::test]
    async fn enqueue_during_a_pass_runs_again_afterwards() {
        let queue = queue(10);
        queue.enqueue(key("a"));
        let a = queue.next().await.unwrap();

        queue.enqueue(key("a"));
        assert!(nothing_queued(&queue).await);

        queue.done(&a, Requeue::None);
        assert_eq!(queue.next().await, Some(key("a")));
    }

    #[tokio::test]
    async fn converged_keys_are_forgotten() {
        let queue = queue(10);
        queue.enqueue(key("a"));
        let a = queue.next().await.unwrap();
        queue.done(&a, Requeue::None);

        assert!(queue.slots.is_empty());
        assert!(nothing_queued(&queue).await);
    }

    #[tokio::test]
    async fn immediate_requeue_is_queued_right_away() {
        let queue = queue(10_000);
        queue.enqueue(key("a"));
        let a = queue.next().await.unwrap();
        queue.done(&a, Requeue::Immediate);

        let again = timeout(Duration::from_millis(500), queue.next()).await;
        assert_eq!(again.unwrap(), Some(key("a")));
    }

    #[tokio::test]
    async fn backoff_retries_later_and_resets_on_success() {
        let queue = queue(20);
        queue.enqueue(key("a"));

        let mut a = queue.next().await.unwrap();
        for expected_failures in 1..=2u32 {
            queue.done(&a, Requeue::Backoff);
            assert_eq!(queue.slots.get(&a).map(|s| s.failures), Some(expected_failures));
            let retried = timeout(Duration::from_secs(2), queue.next()).await;
            a = retried.unwrap().unwrap();
        }

        queue.done(&a, Requeue::None);
        assert!(queue.slots.get(&a).is_none());
    }

    #[tokio::test]
    async fn workers_never_run_one_key_concurrently() {
        let queue = queue(10);
        let running = Arc::new(AtomicUsize::new(0));
        let overlap = Arc::new(AtomicUsize::new(0));
        let passes = Arc::new(AtomicUsize::new(0));
        let shutdown = CancellationToken::new();

        let handler = {
            let (running, overlap, passes) = (running.clone(), overlap.clone(), passes.clone());
            move |_key: ObjectKey| {
                let (running, overlap, passes) = (running.clone(), overlap.clone(), passes.clone());
                async move {
                    if running.fetch_add(1, Ordering::SeqCst) > 0 {
                        overlap.fetch_add(1, Ordering::SeqCst);
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    passes.fetch_add(1, Ordering::SeqCst);
                    Requeue::None
                }
            }
        };

        let workers = {
            let queue = queue.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { queue.run_workers(4, shutdown, handler).await })
        };

        for _ in 0..20 {
            queue.enqueue(key("a"));
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.cancel();
        timeout(Duration::from_secs(2), workers).await.unwrap().unwrap();

        assert_eq!(overlap.load(Ordering::SeqCst), 0);
        let passes = passes.load(Ordering::SeqCst);
        assert!(passes >= 1 && passes <= 20, "unexpected pass count {passes}");
    }
}
