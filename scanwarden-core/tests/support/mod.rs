//! Test doubles shared by the integration suites.
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use scanwarden_core::backend::{BackendClient, BackendError, BackendResult, Entity, Query};
use scanwarden_core::provider::{
    AssetDiscoverer, Provider, ProviderError, ProviderResult, ScanJobConfig,
};
use scanwarden_core::InMemoryBackend;
use scanwarden_model::{
    Asset, AssetId, AssetInfo, AssetScanStats, AssetScanTemplate, DirInfo, Estimation,
    ProviderKind,
};

/// In-memory backend whose patches can be made to fail for chosen IDs.
#[derive(Debug, Default)]
pub struct FlakyBackend {
    pub inner: InMemoryBackend,
    failing_patches: Mutex<HashSet<String>>,
}

impl FlakyBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_patches_for(&self, id: impl ToString) {
        self.failing_patches
            .lock()
            .expect("lock")
            .insert(id.to_string());
    }

    pub fn heal(&self) {
        self.failing_patches.lock().expect("lock").clear();
    }
}

#[async_trait]
impl BackendClient for FlakyBackend {
    async fn get<E: Entity>(&self, id: E::Id) -> BackendResult<E> {
        self.inner.get(id).await
    }

    async fn list<E: Entity>(&self, query: &Query) -> BackendResult<Vec<E>> {
        self.inner.list(query).await
    }

    async fn post<E: Entity>(&self, entity: E) -> BackendResult<E> {
        self.inner.post(entity).await
    }

    async fn patch<E: Entity>(&self, id: E::Id, patch: E::Patch) -> BackendResult<E> {
        let fail = self
            .failing_patches
            .lock()
            .expect("lock")
            .contains(&id.to_string());
        if fail {
            return Err(BackendError::Request(format!("injected patch failure for {id}")));
        }
        self.inner.patch(id, patch).await
    }

    async fn delete<E: Entity>(&self, id: E::Id) -> BackendResult<()> {
        self.inner.delete::<E>(id).await
    }
}

/// Provider that reports a settable asset list and a fixed estimate, and
/// records the scan jobs it was asked to run and remove.
#[derive(Debug)]
pub struct ScriptedProvider {
    assets: Mutex<Vec<AssetInfo>>,
    estimate: Mutex<ProviderResult<Estimation>>,
    pub started: Mutex<Vec<AssetId>>,
    pub removed: Mutex<Vec<AssetId>>,
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self {
            assets: Mutex::new(Vec::new()),
            estimate: Mutex::new(Ok(Estimation::default())),
            started: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
        }
    }
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_assets(&self, assets: Vec<AssetInfo>) {
        *self.assets.lock().expect("lock") = assets;
    }

    pub fn set_estimate(&self, estimate: Estimation) {
        *self.estimate.lock().expect("lock") = Ok(estimate);
    }
}

fn clone_result(result: &ProviderResult<Estimation>) -> ProviderResult<Estimation> {
    match result {
        Ok(estimation) => Ok(estimation.clone()),
        Err(ProviderError::Retryable {
            message,
            retry_after,
        }) => Err(ProviderError::retryable(message.clone(), *retry_after)),
        Err(err) => Err(ProviderError::fatal(err.to_string())),
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }

    async fn discover_assets(&self, _cancel: CancellationToken) -> AssetDiscoverer {
        AssetDiscoverer::from_assets(self.assets.lock().expect("lock").clone())
    }

    async fn estimate(
        &self,
        _stats: &AssetScanStats,
        _asset: &Asset,
        _template: &AssetScanTemplate,
    ) -> ProviderResult<Estimation> {
        clone_result(&self.estimate.lock().expect("lock"))
    }

    async fn run_asset_scan(&self, config: &ScanJobConfig) -> ProviderResult<()> {
        self.started.lock().expect("lock").push(config.asset.id);
        Ok(())
    }

    async fn remove_asset_scan(&self, config: &ScanJobConfig) -> ProviderResult<()> {
        self.removed.lock().expect("lock").push(config.asset.id);
        Ok(())
    }
}

pub fn dir(name: &str) -> AssetInfo {
    AssetInfo::Dir(DirInfo {
        dir_name: name.into(),
        location: Some("host-1".into()),
    })
}

pub async fn seed_asset<B: BackendClient>(backend: &B, name: &str, seen: DateTime<Utc>) -> Asset {
    backend
        .post(Asset::discovered(dir(name), seen))
        .await
        .expect("seed asset")
}
