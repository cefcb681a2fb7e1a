//! Provider capability port.
//!
//! A provider knows how to find assets in one kind of infrastructure and how
//! to run, remove and price scan jobs against them. Everything else about the
//! infrastructure stays behind this trait.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use scanwarden_model::{
    Asset, AssetInfo, AssetScanId, AssetScanStats, AssetScanTemplate, Estimation, ProviderKind,
    ScanId,
};

/// Provider failures, classified so callers can decide between recording a
/// terminal status and trying again later.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Will not succeed on retry. Recorded on the entity as a failure.
    #[error("{0}")]
    Fatal(String),

    /// Transient. The caller presents the item again after `retry_after`.
    #[error("{message} (retry after {retry_after:?})")]
    Retryable {
        message: String,
        retry_after: Duration,
    },

    /// Unclassified infrastructure failure. Retried on the next poll.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ProviderError {
    pub fn fatal(message: impl Into<String>) -> Self {
        ProviderError::Fatal(message.into())
    }

    pub fn retryable(message: impl Into<String>, retry_after: Duration) -> Self {
        ProviderError::Retryable {
            message: message.into(),
            retry_after,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ProviderError::Retryable { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, ProviderError::Fatal(_))
    }
}

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Everything a provider needs to start or tear down one asset scan.
#[derive(Debug, Clone)]
pub struct ScanJobConfig {
    pub asset_scan_id: AssetScanId,
    pub scan_id: Option<ScanId>,
    pub asset: Asset,
    pub template: AssetScanTemplate,
}

/// One-shot stream of discovered assets plus the producer's final result.
///
/// Drain with [`recv`](Self::recv) until it yields `None`, then call
/// [`finish`](Self::finish). A producer that goes away without reporting a
/// result counts as failed, so a crashed discovery never looks complete.
pub struct AssetDiscoverer {
    assets: mpsc::Receiver<AssetInfo>,
    done: oneshot::Receiver<ProviderResult<()>>,
}

impl fmt::Debug for AssetDiscoverer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssetDiscoverer").finish_non_exhaustive()
    }
}

/// Producer half of an [`AssetDiscoverer`].
#[derive(Debug)]
pub struct DiscoverySender {
    assets: mpsc::Sender<AssetInfo>,
    done: oneshot::Sender<ProviderResult<()>>,
}

impl DiscoverySender {
    /// Returns false once the consumer has gone away.
    pub async fn send(&self, asset: AssetInfo) -> bool {
        self.assets.send(asset).await.is_ok()
    }

    pub fn finish(self, result: ProviderResult<()>) {
        let DiscoverySender { assets, done } = self;
        drop(assets);
        // The consumer may already be gone; nothing to report to then.
        let _ = done.send(result);
    }
}

impl AssetDiscoverer {
    pub fn channel(buffer: usize) -> (DiscoverySender, AssetDiscoverer) {
        let (assets_tx, assets_rx) = mpsc::channel(buffer.max(1));
        let (done_tx, done_rx) = oneshot::channel();
        (
            DiscoverySender {
                assets: assets_tx,
                done: done_tx,
            },
            AssetDiscoverer {
                assets: assets_rx,
                done: done_rx,
            },
        )
    }

    /// A finished discovery over a fixed set of assets.
    pub fn from_assets(assets: Vec<AssetInfo>) -> Self {
        let (assets_tx, assets_rx) = mpsc::channel(assets.len().max(1));
        for asset in assets {
            // Capacity covers every item.
            let _ = assets_tx.try_send(asset);
        }
        let (done_tx, done_rx) = oneshot::channel();
        let _ = done_tx.send(Ok(()));
        AssetDiscoverer {
            assets: assets_rx,
            done: done_rx,
        }
    }

    pub fn failed(err: ProviderError) -> Self {
        let (_, assets_rx) = mpsc::channel(1);
        let (done_tx, done_rx) = oneshot::channel();
        let _ = done_tx.send(Err(err));
        AssetDiscoverer {
            assets: assets_rx,
            done: done_rx,
        }
    }

    pub async fn recv(&mut self) -> Option<AssetInfo> {
        self.assets.recv().await
    }

    pub async fn finish(self) -> ProviderResult<()> {
        drop(self.assets);
        match self.done.await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Other(anyhow::anyhow!(
                "asset discovery ended without reporting a result"
            ))),
        }
    }
}

/// Capability interface every infrastructure integration implements.
#[async_trait]
pub trait Provider: Send + Sync + 'static {
    fn kind(&self) -> ProviderKind;

    /// Starts a discovery pass. Producers should stop early once `cancel`
    /// fires.
    async fn discover_assets(&self, cancel: CancellationToken) -> AssetDiscoverer;

    async fn estimate(
        &self,
        stats: &AssetScanStats,
        asset: &Asset,
        template: &AssetScanTemplate,
    ) -> ProviderResult<Estimation>;

    async fn run_asset_scan(&self, config: &ScanJobConfig) -> ProviderResult<()>;

    async fn remove_asset_scan(&self, config: &ScanJobConfig) -> ProviderResult<()>;
}
