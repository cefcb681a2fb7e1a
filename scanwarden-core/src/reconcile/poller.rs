use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{OrchestratorError, Result};

use super::{Queue, ReconcileEvent};

/// Supplies the current set of items needing reconciliation. Must be
/// state-based: anything dropped during a cycle has to show up again on the
/// next call.
#[async_trait]
pub trait PollSource<T>: Send + Sync {
    async fn get_items(&self) -> Result<Vec<T>>;
}

/// Destination a poller publishes into.
#[async_trait]
pub trait EventSink<T>: Send + Sync {
    async fn publish(&self, item: T) -> Result<()>;
}

#[async_trait]
impl<T: ReconcileEvent> EventSink<T> for Queue<T> {
    async fn publish(&self, item: T) -> Result<()> {
        self.enqueue(item).await;
        Ok(())
    }
}

#[async_trait]
impl<T: ReconcileEvent> EventSink<T> for mpsc::Sender<T> {
    async fn publish(&self, item: T) -> Result<()> {
        self.send(item)
            .await
            .map_err(|_| OrchestratorError::Internal("event channel closed".into()))
    }
}

/// Calls [`PollSource::get_items`] once per period and publishes the result.
///
/// Fetching and publishing share one deadline of `period` from the start of
/// the cycle; whatever is left of the period afterwards is slept, so cycles
/// start at a constant cadence however slow the source is.
pub struct Poller<T, S> {
    name: &'static str,
    period: Duration,
    source: Arc<S>,
    sink: Arc<dyn EventSink<T>>,
}

impl<T, S> fmt::Debug for Poller<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Poller")
            .field("name", &self.name)
            .field("period", &self.period)
            .finish()
    }
}

/// Result of a single poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Published { fetched: usize, published: usize },
    FetchFailed,
    TimedOut { fetched: usize, published: usize },
}

impl<T, S> Poller<T, S>
where
    T: ReconcileEvent,
    S: PollSource<T> + 'static,
{
    pub fn new(
        name: &'static str,
        period: Duration,
        source: Arc<S>,
        sink: Arc<dyn EventSink<T>>,
    ) -> Self {
        Self {
            name,
            period,
            source,
            sink,
        }
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    pub async fn run(self, cancel: CancellationToken) {
        loop {
            let deadline = Instant::now() + self.period;

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!(target: "scan::poller", poller = self.name, "poller shutting down");
                    break;
                }
                outcome = self.cycle(deadline) => {
                    tracing::trace!(target: "scan::poller", poller = self.name, ?outcome, "poll cycle finished");
                }
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!(target: "scan::poller", poller = self.name, "poller shutting down");
                    break;
                }
                _ = tokio::time::sleep_until(deadline) => {}
            }
        }
    }

    /// Runs one fetch-and-publish pass bounded by `deadline`.
    pub async fn cycle(&self, deadline: Instant) -> CycleOutcome {
        let items = match tokio::time::timeout_at(deadline, self.source.get_items()).await {
            Ok(Ok(items)) => items,
            Ok(Err(err)) => {
                tracing::warn!(target: "scan::poller", poller = self.name, error = %err, "failed to get items");
                return CycleOutcome::FetchFailed;
            }
            Err(_) => {
                tracing::warn!(target: "scan::poller", poller = self.name, "timed out getting items");
                return CycleOutcome::FetchFailed;
            }
        };

        let fetched = items.len();
        let mut published = 0usize;
        for item in items {
            match tokio::time::timeout_at(deadline, self.sink.publish(item)).await {
                Ok(Ok(())) => published += 1,
                Ok(Err(err)) => {
                    tracing::warn!(target: "scan::poller", poller = self.name, error = %err, published, fetched, "failed to publish items");
                    return CycleOutcome::Published { fetched, published };
                }
                Err(_) => {
                    tracing::warn!(
                        target: "scan::poller",
                        poller = self.name,
                        published,
                        fetched,
                        "poll period elapsed before every item was published; the rest is picked up next cycle"
                    );
                    return CycleOutcome::TimedOut { fetched, published };
                }
            }
        }

        tracing::debug!(target: "scan::poller", poller = self.name, fetched, "published items");
        CycleOutcome::Published { fetched, published }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct Counting {
        calls: AtomicUsize,
        items: Vec<u32>,
    }

    #[async_trait]
    impl PollSource<u32> for Counting {
        async fn get_items(&self) -> Result<Vec<u32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.items.clone())
        }
    }

    struct Failing;

    #[async_trait]
    impl PollSource<u32> for Failing {
        async fn get_items(&self) -> Result<Vec<u32>> {
            Err(OrchestratorError::Internal("backend down".into()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn polls_at_constant_cadence_and_dedups_into_queue() {
        let source = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            items: vec![1, 2, 2, 3],
        });
        let queue = Queue::new("poll-test");
        let poller = Poller::new(
            "poll-test",
            Duration::from_secs(10),
            Arc::clone(&source),
            Arc::new(queue.clone()),
        );

        let cancel = CancellationToken::new();
        let handle = poller.spawn(cancel.clone());

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
        assert_eq!(queue.len().await, 3);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_errors_do_not_stop_the_loop() {
        let queue: Queue<u32> = Queue::new("poll-test");
        let poller = Poller::new(
            "poll-test",
            Duration::from_secs(1),
            Arc::new(Failing),
            Arc::new(queue.clone()),
        );

        assert_eq!(
            poller.cycle(Instant::now() + Duration::from_secs(1)).await,
            CycleOutcome::FetchFailed
        );

        let cancel = CancellationToken::new();
        let handle = poller.spawn(cancel.clone());
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!handle.is_finished());
        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn publish_stops_at_deadline_with_a_full_channel() {
        let (tx, mut rx) = mpsc::channel::<u32>(1);
        let source = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            items: vec![1, 2, 3],
        });
        let poller = Poller::new("poll-test", Duration::from_secs(1), source, Arc::new(tx));

        let outcome = poller.cycle(Instant::now() + Duration::from_secs(1)).await;
        assert_eq!(
            outcome,
            CycleOutcome::TimedOut {
                fetched: 3,
                published: 1
            }
        );
        assert_eq!(rx.recv().await, Some(1));
    }
}
