//! Periodic reconciliation of provider-reported assets against the store.

mod discoverer;

pub use discoverer::{DiscoveryReport, Discoverer};
