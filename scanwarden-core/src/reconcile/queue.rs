use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;

use crate::error::{OrchestratorError, Result};

use super::ReconcileEvent;

/// Deduplicating FIFO of reconcile events.
///
/// An item is accepted only when it is neither queued nor waiting on a
/// delayed requeue, so a poller that keeps rediscovering the same pending work
/// cannot grow the queue. Once an item is dequeued it may be enqueued again.
pub struct Queue<T> {
    name: &'static str,
    inner: Arc<QueueInner<T>>,
}

struct QueueInner<T> {
    state: Mutex<QueueState<T>>,
    item_added: Notify,
}

struct QueueState<T> {
    items: VecDeque<T>,
    queued: HashSet<T>,
    waiting: HashSet<T>,
}

impl<T> Clone for Queue<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Queue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (queued, waiting) = self
            .inner
            .state
            .try_lock()
            .map(|state| (state.items.len(), state.waiting.len()))
            .unwrap_or_default();
        f.debug_struct("Queue")
            .field("name", &self.name)
            .field("queued", &queued)
            .field("waiting", &waiting)
            .finish()
    }
}

impl<T: ReconcileEvent> Queue<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState {
                    items: VecDeque::new(),
                    queued: HashSet::new(),
                    waiting: HashSet::new(),
                }),
                item_added: Notify::new(),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Appends `item` unless it is already queued or waiting. Returns whether
    /// the item was accepted.
    pub async fn enqueue(&self, item: T) -> bool {
        let mut state = self.inner.state.lock().await;
        if state.queued.contains(&item) || state.waiting.contains(&item) {
            tracing::trace!(target: "scan::queue", queue = self.name, event = %item, "event already queued");
            return false;
        }
        state.queued.insert(item.clone());
        state.items.push_back(item);
        drop(state);
        self.inner.item_added.notify_one();
        true
    }

    /// Holds `item` back for `delay` before queueing it. Plain enqueues of the
    /// same item are ignored until then.
    pub async fn enqueue_after(&self, item: T, delay: Duration) -> bool {
        {
            let mut state = self.inner.state.lock().await;
            if state.queued.contains(&item) || state.waiting.contains(&item) {
                return false;
            }
            state.waiting.insert(item.clone());
        }

        let inner = Arc::clone(&self.inner);
        let name = self.name;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut state = inner.state.lock().await;
            state.waiting.remove(&item);
            if state.queued.insert(item.clone()) {
                tracing::trace!(target: "scan::queue", queue = name, event = %item, "delayed event released");
                state.items.push_back(item);
                drop(state);
                inner.item_added.notify_one();
            }
        });
        true
    }

    /// Waits for the next item, or fails with [`OrchestratorError::Cancelled`]
    /// once `cancel` fires.
    pub async fn dequeue(&self, cancel: &CancellationToken) -> Result<T> {
        loop {
            let notified = self.inner.item_added.notified();
            {
                let mut state = self.inner.state.lock().await;
                if let Some(item) = state.items.pop_front() {
                    state.queued.remove(&item);
                    return Ok(item);
                }
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(OrchestratorError::Cancelled),
                _ = notified => {}
            }
        }
    }

    /// Number of items ready to dequeue. Diagnostics only.
    pub async fn len(&self) -> usize {
        self.inner.state.lock().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Whether `item` is queued or waiting. Diagnostics only.
    pub async fn has(&self, item: &T) -> bool {
        let state = self.inner.state.lock().await;
        state.queued.contains(item) || state.waiting.contains(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> CancellationToken {
        CancellationToken::new()
    }

    #[tokio::test]
    async fn duplicate_enqueue_yields_single_dequeue() {
        let queue = Queue::new("test");
        assert!(queue.enqueue("a".to_string()).await);
        assert!(!queue.enqueue("a".to_string()).await);
        assert_eq!(queue.len().await, 1);

        assert_eq!(queue.dequeue(&token()).await.unwrap(), "a");
        assert!(queue.is_empty().await);

        // Dequeued items may come back.
        assert!(queue.enqueue("a".to_string()).await);
        assert_eq!(queue.dequeue(&token()).await.unwrap(), "a");
    }

    #[tokio::test]
    async fn preserves_first_enqueue_order() {
        let queue = Queue::new("test");
        for item in ["a", "b", "c", "a"] {
            queue.enqueue(item.to_string()).await;
        }

        let cancel = token();
        assert_eq!(queue.dequeue(&cancel).await.unwrap(), "a");
        assert_eq!(queue.dequeue(&cancel).await.unwrap(), "b");
        assert_eq!(queue.dequeue(&cancel).await.unwrap(), "c");
    }

    #[tokio::test]
    async fn dequeue_returns_cancelled_when_token_fires() {
        let queue: Queue<String> = Queue::new("test");
        let cancel = token();
        let waiter = {
            let queue = queue.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { queue.dequeue(&cancel).await })
        };

        cancel.cancel();
        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(OrchestratorError::Cancelled)));
    }

    #[tokio::test]
    async fn blocked_consumer_wakes_on_enqueue() {
        let queue: Queue<String> = Queue::new("test");
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue(&CancellationToken::new()).await })
        };

        tokio::task::yield_now().await;
        queue.enqueue("late".to_string()).await;
        assert_eq!(waiter.await.unwrap().unwrap(), "late");
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_items_block_plain_enqueue_until_released() {
        let queue = Queue::new("test");
        assert!(queue.enqueue_after("a".to_string(), Duration::from_secs(5)).await);
        assert!(queue.has(&"a".to_string()).await);
        assert!(!queue.enqueue("a".to_string()).await);
        assert!(queue.is_empty().await);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(queue.len().await, 1);
        assert_eq!(queue.dequeue(&token()).await.unwrap(), "a");
    }
}
