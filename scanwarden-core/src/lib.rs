//! # scanwarden core
//!
//! Reconciliation engine that drives scans, per-asset scans and their cost
//! estimations to convergence and turns scanner output into findings.
//!
//! Every long-lived entity is owned by one controller built from the same
//! parts in [`reconcile`]: a poller that asks the backend which entities still
//! need work, a deduplicating queue, and a reconciler that re-reads each
//! entity, checks the next status against its [`state`] machine and patches
//! it back. Nothing is held in memory between reconciliations, so a crashed
//! or restarted process resumes from whatever the backend holds.
//!
//! - [`watcher`]: scheduled scan configs, scans, asset scans, scan
//!   estimations and asset scan estimations.
//! - [`findings`]: per-family finding upsert and invalidation for finished
//!   asset scans.
//! - [`discovery`]: periodic asset discovery with conflict merging.
//! - [`runtime`]: the [`Orchestrator`] that starts and stops all of the above.
//!
//! The [`backend::BackendClient`] and [`provider::Provider`] traits are the
//! two seams to the outside world; [`backend::InMemoryBackend`] implements
//! the former for tests and single-process deployments.
#![allow(missing_docs)]

pub mod backend;
pub mod config;
pub mod discovery;
pub mod error;
pub mod findings;
pub mod provider;
pub mod reconcile;
pub mod runtime;
pub mod state;
pub mod watcher;

pub use backend::{BackendClient, BackendError, Entity, InMemoryBackend, Query};
pub use config::OrchestratorConfig;
pub use error::{OrchestratorError, Result};
pub use provider::{AssetDiscoverer, Provider, ProviderError, ProviderResult, ScanJobConfig};
pub use runtime::{Orchestrator, OrchestratorBuilder};
