//! Generic poll/queue/reconcile loop shared by every watcher.
//!
//! A [`Poller`] periodically asks a [`PollSource`] for work and publishes it
//! into a [`Queue`]; a [`Reconciler`] drains the queue one event at a time and
//! hands each to a [`Reconcile`] implementation. Failed events are not retried
//! inline: the next poll rediscovers them.

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ControllerConfig;

mod poller;
mod queue;
mod reconciler;

pub use poller::*;
pub use queue::*;
pub use reconciler::*;

/// Minimal, hashable projection of an entity used as a queue key.
pub trait ReconcileEvent:
    Clone + Eq + Hash + fmt::Display + fmt::Debug + Send + Sync + 'static
{
}

impl<T> ReconcileEvent for T where
    T: Clone + Eq + Hash + fmt::Display + fmt::Debug + Send + Sync + 'static
{
}

/// Wires a poller and a reconciler around a fresh queue for `controller` and
/// spawns both on child tokens of `cancel`.
pub fn start_controller<E, C>(
    name: &'static str,
    controller: Arc<C>,
    config: ControllerConfig,
    cancel: &CancellationToken,
) -> Vec<JoinHandle<()>>
where
    E: ReconcileEvent,
    C: PollSource<E> + Reconcile<E> + 'static,
{
    let queue = Queue::new(name);
    let poller = Poller::new(
        name,
        config.poll_period(),
        Arc::clone(&controller),
        Arc::new(queue.clone()),
    );
    let reconciler =
        Reconciler::new(name, config.reconcile_timeout(), Arc::new(queue), controller);

    tracing::info!(
        target: "scan::runtime",
        controller = name,
        poll_period_ms = config.poll_period_ms,
        reconcile_timeout_ms = config.reconcile_timeout_ms,
        "starting controller"
    );

    vec![
        poller.spawn(cancel.child_token()),
        reconciler.spawn(cancel.child_token()),
    ]
}
