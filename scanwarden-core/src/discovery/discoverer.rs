use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use scanwarden_model::{Asset, AssetId, AssetInfo, AssetPatch, Filter};

use crate::backend::{BackendClient, Query};
use crate::config::DiscoveryConfig;
use crate::error::{OrchestratorError, Result};
use crate::provider::Provider;

/// Counts from one discovery pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    pub created: usize,
    pub updated: usize,
    pub terminated: usize,
}

/// Creates assets the provider reports, refreshes those already known and
/// marks the ones it no longer reports as terminated.
pub struct Discoverer<B, P> {
    backend: Arc<B>,
    provider: Arc<P>,
    config: DiscoveryConfig,
}

impl<B, P> fmt::Debug for Discoverer<B, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Discoverer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

enum Observed {
    Created,
    Updated,
}

impl<B: BackendClient, P: Provider> Discoverer<B, P> {
    pub fn new(backend: Arc<B>, provider: Arc<P>, config: DiscoveryConfig) -> Self {
        Self {
            backend,
            provider,
            config,
        }
    }

    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    /// Runs a pass immediately and then once per interval until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            target: "scan::discovery",
            provider = %self.provider.kind(),
            interval_ms = self.config.interval_ms,
            "starting asset discovery"
        );
        loop {
            tracing::debug!(target: "scan::discovery", "discovering available assets");
            match self.discover(&cancel).await {
                Ok(report) => {
                    tracing::info!(
                        target: "scan::discovery",
                        created = report.created,
                        updated = report.updated,
                        terminated = report.terminated,
                        "asset discovery finished"
                    );
                }
                Err(OrchestratorError::Cancelled) => break,
                Err(err) => {
                    tracing::warn!(target: "scan::discovery", error = %err, "failed to discover assets");
                }
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.interval()) => {}
            }
        }
        tracing::info!(target: "scan::discovery", "asset discovery shutting down");
    }

    /// One discovery pass.
    ///
    /// Failures on individual assets are collected and reported together once
    /// the whole stream has been consumed. A failed provider stream aborts
    /// the pass before anything is marked terminated.
    pub async fn discover(&self, cancel: &CancellationToken) -> Result<DiscoveryReport> {
        let discovery_time = Utc::now();
        let mut discoverer = self.provider.discover_assets(cancel.child_token()).await;

        let mut report = DiscoveryReport::default();
        let mut errors = Vec::new();
        let mut failed: HashSet<AssetId> = HashSet::new();

        loop {
            let observed = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(OrchestratorError::Cancelled),
                observed = discoverer.recv() => observed,
            };
            let Some(info) = observed else { break };

            match self.observe(info, discovery_time, &mut failed).await {
                Ok(Observed::Created) => report.created += 1,
                Ok(Observed::Updated) => report.updated += 1,
                Err(err) => errors.push(err),
            }
        }

        discoverer.finish().await?;

        report.terminated = self
            .terminate_unseen(discovery_time, &failed, &mut errors)
            .await?;

        match OrchestratorError::join(errors) {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }

    async fn observe(
        &self,
        info: AssetInfo,
        discovery_time: DateTime<Utc>,
        failed: &mut HashSet<AssetId>,
    ) -> Result<Observed> {
        let err = match self
            .backend
            .post(Asset::discovered(info.clone(), discovery_time))
            .await
        {
            Ok(asset) => {
                tracing::debug!(target: "scan::discovery", asset_id = %asset.id, kind = info.kind(), "created asset");
                return Ok(Observed::Created);
            }
            Err(err) => err,
        };

        let existing = match err.conflicting::<Asset>() {
            Some(existing) => existing?,
            None => return Err(err.into()),
        };

        let merged = match existing.asset_info.merge_observed(&info) {
            Ok(merged) => merged,
            Err(err) => {
                failed.insert(existing.id);
                return Err(err.into());
            }
        };

        let patch = AssetPatch {
            asset_info: Some(merged),
            last_seen: Some(discovery_time),
            ..Default::default()
        };
        if let Err(err) = self.backend.patch::<Asset>(existing.id, patch).await {
            failed.insert(existing.id);
            return Err(err.into());
        }
        tracing::trace!(target: "scan::discovery", asset_id = %existing.id, "refreshed existing asset");
        Ok(Observed::Updated)
    }

    async fn terminate_unseen(
        &self,
        discovery_time: DateTime<Utc>,
        failed: &HashSet<AssetId>,
        errors: &mut Vec<OrchestratorError>,
    ) -> Result<usize> {
        let filter = Filter::all([
            Filter::is_null("terminatedOn"),
            Filter::any([
                Filter::is_null("lastSeen"),
                Filter::lt("lastSeen", discovery_time),
            ]),
        ]);
        let unseen: Vec<Asset> = self
            .backend
            .list(&Query::filtered(filter).select(["id"]))
            .await?;

        let mut terminated = 0;
        for asset in unseen {
            if failed.contains(&asset.id) {
                continue;
            }
            let patch = AssetPatch {
                terminated_on: Some(discovery_time),
                ..Default::default()
            };
            match self.backend.patch::<Asset>(asset.id, patch).await {
                Ok(_) => {
                    tracing::debug!(target: "scan::discovery", asset_id = %asset.id, "marked asset terminated");
                    terminated += 1;
                }
                Err(err) => errors.push(err.into()),
            }
        }
        Ok(terminated)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::TimeDelta;
    use scanwarden_model::{
        AssetScanStats, AssetScanTemplate, ContainerImageInfo, DirInfo, Estimation, ProviderKind,
    };
    use tokio::sync::Mutex;

    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::provider::{AssetDiscoverer, ProviderError, ProviderResult, ScanJobConfig};

    /// Reports a preset list of assets, one list per pass.
    #[derive(Default)]
    struct Passes {
        passes: Mutex<Vec<ProviderResult<Vec<AssetInfo>>>>,
    }

    impl Passes {
        fn new(mut passes: Vec<ProviderResult<Vec<AssetInfo>>>) -> Self {
            passes.reverse();
            Self {
                passes: Mutex::new(passes),
            }
        }
    }

    #[async_trait]
    impl Provider for Passes {
        fn kind(&self) -> ProviderKind {
            ProviderKind::Local
        }

        async fn discover_assets(&self, _cancel: CancellationToken) -> AssetDiscoverer {
            match self.passes.lock().await.pop() {
                Some(Ok(assets)) => AssetDiscoverer::from_assets(assets),
                Some(Err(err)) => AssetDiscoverer::failed(err),
                None => AssetDiscoverer::from_assets(Vec::new()),
            }
        }

        async fn estimate(
            &self,
            _stats: &AssetScanStats,
            _asset: &Asset,
            _template: &AssetScanTemplate,
        ) -> ProviderResult<Estimation> {
            Err(ProviderError::fatal("not supported"))
        }

        async fn run_asset_scan(&self, _config: &ScanJobConfig) -> ProviderResult<()> {
            Ok(())
        }

        async fn remove_asset_scan(&self, _config: &ScanJobConfig) -> ProviderResult<()> {
            Ok(())
        }
    }

    fn dir(name: &str) -> AssetInfo {
        AssetInfo::Dir(DirInfo {
            dir_name: name.into(),
            location: Some("host".into()),
        })
    }

    fn image(tags: &[&str], os: &str) -> AssetInfo {
        AssetInfo::ContainerImage(ContainerImageInfo {
            image_id: "sha256:1".into(),
            repo_tags: tags.iter().map(|tag| tag.to_string()).collect(),
            os: Some(os.into()),
            ..Default::default()
        })
    }

    fn discoverer(
        backend: &Arc<InMemoryBackend>,
        passes: Vec<ProviderResult<Vec<AssetInfo>>>,
    ) -> Discoverer<InMemoryBackend, Passes> {
        Discoverer::new(
            Arc::clone(backend),
            Arc::new(Passes::new(passes)),
            DiscoveryConfig::default(),
        )
    }

    async fn assets(backend: &InMemoryBackend) -> Vec<Asset> {
        backend.list(&Query::new()).await.expect("list assets")
    }

    #[tokio::test]
    async fn rediscovered_assets_are_refreshed_and_missing_ones_terminated() {
        let backend = Arc::new(InMemoryBackend::new());
        let discoverer = discoverer(
            &backend,
            vec![
                Ok(vec![dir("a"), dir("b"), image(&["app:1"], "linux")]),
                Ok(vec![dir("a"), image(&["app:2"], "linux")]),
            ],
        );
        let cancel = CancellationToken::new();

        let first = discoverer.discover(&cancel).await.unwrap();
        assert_eq!(
            first,
            DiscoveryReport {
                created: 3,
                updated: 0,
                terminated: 0
            }
        );
        let before = assets(&backend).await;

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = discoverer.discover(&cancel).await.unwrap();
        assert_eq!(
            second,
            DiscoveryReport {
                created: 0,
                updated: 2,
                terminated: 1
            }
        );

        let after = assets(&backend).await;
        assert_eq!(after.len(), 3);
        for asset in &after {
            let original = before.iter().find(|a| a.id == asset.id).expect("same ids");
            assert_eq!(asset.first_seen, original.first_seen);
            match &asset.asset_info {
                AssetInfo::Dir(dir) if dir.dir_name == "b" => {
                    assert!(asset.terminated_on.is_some());
                    assert_eq!(asset.last_seen, original.last_seen);
                }
                AssetInfo::ContainerImage(image) => {
                    assert_eq!(image.repo_tags, ["app:1", "app:2"]);
                    assert!(asset.terminated_on.is_none());
                    assert!(asset.last_seen > original.last_seen);
                }
                _ => assert!(asset.terminated_on.is_none()),
            }
        }
    }

    #[tokio::test]
    async fn merge_conflict_is_reported_and_asset_is_not_terminated() {
        let backend = Arc::new(InMemoryBackend::new());
        let discoverer = discoverer(
            &backend,
            vec![
                Ok(vec![image(&["app:1"], "linux")]),
                Ok(vec![image(&["app:1"], "windows"), dir("new")]),
            ],
        );
        let cancel = CancellationToken::new();
        discoverer.discover(&cancel).await.unwrap();

        let err = discoverer.discover(&cancel).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Model(_)), "{err}");

        let stored = assets(&backend).await;
        assert_eq!(stored.len(), 2);
        assert!(stored.iter().all(|asset| asset.terminated_on.is_none()));
    }

    #[tokio::test]
    async fn failed_stream_terminates_nothing() {
        let backend = Arc::new(InMemoryBackend::new());
        let stale = backend
            .post(Asset::discovered(dir("old"), Utc::now() - TimeDelta::hours(1)))
            .await
            .unwrap();
        let discoverer = discoverer(&backend, vec![Err(ProviderError::fatal("credentials revoked"))]);

        let err = discoverer.discover(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Provider(_)));
        let stored = backend.get::<Asset>(stale.id).await.unwrap();
        assert!(stored.terminated_on.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn run_repeats_on_interval_until_cancelled() {
        let backend = Arc::new(InMemoryBackend::new());
        let discoverer = Arc::new(discoverer(
            &backend,
            vec![Ok(vec![dir("a")]), Ok(vec![dir("a"), dir("b")])],
        ));
        let cancel = CancellationToken::new();
        let handle = Arc::clone(&discoverer).spawn(cancel.clone());

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(backend.len::<Asset>(), 1);

        tokio::time::sleep(DiscoveryConfig::default().interval()).await;
        assert_eq!(backend.len::<Asset>(), 2);

        cancel.cancel();
        handle.await.unwrap();
    }
}
