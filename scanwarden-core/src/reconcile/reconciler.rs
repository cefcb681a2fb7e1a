use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{OrchestratorError, Result};

use super::{Queue, ReconcileEvent};

/// Where a reconciler pulls events from.
#[async_trait]
pub trait EventSource<T>: Send + Sync {
    /// Blocks until an event is available. Returns
    /// [`OrchestratorError::Cancelled`] once `cancel` fires.
    async fn next(&self, cancel: &CancellationToken) -> Result<T>;

    /// Presents `item` again after `delay`. Sources that cannot delay drop it;
    /// the poller will rediscover it.
    async fn requeue_after(&self, item: T, delay: Duration);
}

#[async_trait]
impl<T: ReconcileEvent> EventSource<T> for Queue<T> {
    async fn next(&self, cancel: &CancellationToken) -> Result<T> {
        self.dequeue(cancel).await
    }

    async fn requeue_after(&self, item: T, delay: Duration) {
        self.enqueue_after(item, delay).await;
    }
}

/// Adapts a channel receiver into an [`EventSource`].
pub struct ChannelSource<T> {
    rx: Mutex<mpsc::Receiver<T>>,
}

impl<T> ChannelSource<T> {
    pub fn new(rx: mpsc::Receiver<T>) -> Self {
        Self { rx: Mutex::new(rx) }
    }
}

impl<T> fmt::Debug for ChannelSource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelSource").finish_non_exhaustive()
    }
}

#[async_trait]
impl<T: ReconcileEvent> EventSource<T> for ChannelSource<T> {
    async fn next(&self, cancel: &CancellationToken) -> Result<T> {
        let mut rx = self.rx.lock().await;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(OrchestratorError::Cancelled),
            item = rx.recv() => item.ok_or(OrchestratorError::Cancelled),
        }
    }

    async fn requeue_after(&self, item: T, _delay: Duration) {
        tracing::debug!(target: "scan::reconciler", event = %item, "channel source cannot delay; dropping requeue");
    }
}

/// Reconciles one event toward its desired state.
#[async_trait]
pub trait Reconcile<T>: Send + Sync {
    async fn reconcile(&self, event: &T) -> Result<()>;
}

/// Single consumer that drains an [`EventSource`] and applies a
/// [`Reconcile`] implementation with a per-event timeout.
pub struct Reconciler<T, R> {
    name: &'static str,
    timeout: Duration,
    source: Arc<dyn EventSource<T>>,
    reconciler: Arc<R>,
}

impl<T, R> fmt::Debug for Reconciler<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl<T, R> Reconciler<T, R>
where
    T: ReconcileEvent,
    R: Reconcile<T> + 'static,
{
    pub fn new(
        name: &'static str,
        timeout: Duration,
        source: Arc<dyn EventSource<T>>,
        reconciler: Arc<R>,
    ) -> Self {
        Self {
            name,
            timeout,
            source,
            reconciler,
        }
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    pub async fn run(self, cancel: CancellationToken) {
        loop {
            let event = match self.source.next(&cancel).await {
                Ok(event) => event,
                Err(OrchestratorError::Cancelled) => {
                    tracing::info!(target: "scan::reconciler", reconciler = self.name, "reconciler shutting down");
                    break;
                }
                Err(err) => {
                    tracing::warn!(target: "scan::reconciler", reconciler = self.name, error = %err, "failed to get next event");
                    continue;
                }
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!(target: "scan::reconciler", reconciler = self.name, event = %event, "reconciler shutting down mid-event");
                    break;
                }
                _ = self.handle(&event) => {}
            }
        }
    }

    /// Reconciles a single event, translating the outcome into logs and
    /// requeues. Never fails: errors are left for the next poll.
    pub async fn handle(&self, event: &T) {
        tracing::debug!(target: "scan::reconciler", reconciler = self.name, event = %event, "reconciling event");

        let outcome = tokio::time::timeout(self.timeout, self.reconciler.reconcile(event)).await;
        match outcome {
            Ok(Ok(())) => {
                tracing::trace!(target: "scan::reconciler", reconciler = self.name, event = %event, "event reconciled");
            }
            Ok(Err(OrchestratorError::RequeueAfter { after, message })) => {
                tracing::debug!(
                    target: "scan::reconciler",
                    reconciler = self.name,
                    event = %event,
                    after_ms = after.as_millis() as u64,
                    %message,
                    "requeueing event"
                );
                self.source.requeue_after(event.clone(), after).await;
            }
            Ok(Err(err)) => {
                tracing::warn!(target: "scan::reconciler", reconciler = self.name, event = %event, error = %err, "failed to reconcile event");
            }
            Err(_) => {
                tracing::warn!(
                    target: "scan::reconciler",
                    reconciler = self.name,
                    event = %event,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "reconcile timed out"
                );
            }
        }
    }
}
