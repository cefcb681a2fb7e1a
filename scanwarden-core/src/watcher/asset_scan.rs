use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use scanwarden_model::{
    Asset, AssetId, AssetScan, AssetScanId, AssetScanPatch, AssetScanReason, AssetScanState,
    AssetScanStatus, Filter, ResourceCleanupReason, ResourceCleanupState, ResourceCleanupStatus,
    Scan, ScanId,
};

use crate::backend::{BackendClient, Query};
use crate::config::{AssetScanWatcherConfig, DeleteJobPolicy};
use crate::error::{OrchestratorError, Result};
use crate::provider::{Provider, ProviderError, ScanJobConfig};
use crate::reconcile::{PollSource, Reconcile, start_controller};
use crate::state::{ASSET_SCAN, RESOURCE_CLEANUP};

/// Delay before a pending asset scan blocked by the parallelism cap is
/// looked at again.
const CAPACITY_RETRY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AssetScanReconcileEvent {
    pub asset_scan_id: AssetScanId,
    pub scan_id: Option<ScanId>,
    pub asset_id: AssetId,
}

impl fmt::Display for AssetScanReconcileEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AssetScanID={} AssetID={}", self.asset_scan_id, self.asset_id)?;
        if let Some(scan_id) = self.scan_id {
            write!(f, " ScanID={scan_id}")?;
        }
        Ok(())
    }
}

/// Moves asset scans through provisioning and releases provider resources
/// once they finish.
pub struct AssetScanWatcher<B, P> {
    backend: Arc<B>,
    provider: Arc<P>,
    config: AssetScanWatcherConfig,
}

impl<B, P> fmt::Debug for AssetScanWatcher<B, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssetScanWatcher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<B: BackendClient, P: Provider> AssetScanWatcher<B, P> {
    pub const NAME: &'static str = "AssetScanWatcher";

    pub fn new(backend: Arc<B>, provider: Arc<P>, config: AssetScanWatcherConfig) -> Self {
        Self {
            backend,
            provider,
            config,
        }
    }

    pub fn start(self: Arc<Self>, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        let controller = self.config.controller;
        start_controller::<AssetScanReconcileEvent, _>(Self::NAME, self, controller, cancel)
    }

    async fn set_status(&self, asset_scan: &AssetScan, next: AssetScanStatus) -> Result<()> {
        ASSET_SCAN.advance(asset_scan.status.as_ref(), &next)?;
        tracing::debug!(
            target: "scan::asset_scan",
            asset_scan_id = %asset_scan.id,
            state = %next.state,
            reason = %next.reason,
            "updating asset scan status"
        );
        self.backend
            .patch::<AssetScan>(asset_scan.id, AssetScanPatch::status(next))
            .await?;
        Ok(())
    }

    async fn set_cleanup_status(
        &self,
        asset_scan: &AssetScan,
        next: ResourceCleanupStatus,
    ) -> Result<()> {
        RESOURCE_CLEANUP.advance(asset_scan.resource_cleanup_status.as_ref(), &next)?;
        tracing::debug!(
            target: "scan::asset_scan",
            asset_scan_id = %asset_scan.id,
            state = %next.state,
            reason = %next.reason,
            "updating resource cleanup status"
        );
        self.backend
            .patch::<AssetScan>(asset_scan.id, AssetScanPatch::resource_cleanup(next))
            .await?;
        Ok(())
    }

    async fn job_config(&self, asset_scan: &AssetScan) -> Result<ScanJobConfig> {
        let asset = self.backend.get::<Asset>(asset_scan.asset.id).await?;
        Ok(ScanJobConfig {
            asset_scan_id: asset_scan.id,
            scan_id: asset_scan.scan.map(|scan| scan.id),
            asset,
            template: asset_scan.template.clone(),
        })
    }

    /// Returns true while the owning scan already has as many asset scans
    /// holding resources as its template allows. Aborted asset scans count
    /// until their resources are released.
    async fn at_capacity(&self, scan_id: ScanId) -> Result<bool> {
        let scan = self.backend.get::<Scan>(scan_id).await?;
        let Some(max) = scan.template.max_parallel_scanners else {
            return Ok(false);
        };

        let running = Filter::all([
            Filter::eq("scan/id", scan_id),
            Filter::ne("status/state", AssetScanState::Done),
            Filter::ne("status/state", AssetScanState::Failed),
            Filter::ne("status/state", AssetScanState::Pending),
            Filter::eq("resourceCleanupStatus/state", ResourceCleanupState::Pending),
        ]);
        let count = self
            .backend
            .count::<AssetScan>(&Query::filtered(running).select(["id"]))
            .await?;
        Ok(count >= max as usize)
    }

    async fn reconcile_pending(&self, asset_scan: &AssetScan) -> Result<()> {
        if let Some(scan) = asset_scan.scan
            && self.at_capacity(scan.id).await?
        {
            tracing::info!(target: "scan::asset_scan", asset_scan_id = %asset_scan.id, scan_id = %scan.id, "maximum number of running asset scans reached");
            return Err(OrchestratorError::requeue_after(
                CAPACITY_RETRY,
                "maximum number of parallel scanners reached",
            ));
        }

        self.set_status(
            asset_scan,
            AssetScanStatus::new(AssetScanState::Scheduled, AssetScanReason::Provisioning, None),
        )
        .await?;

        Err(OrchestratorError::requeue_after(
            self.config.scheduled_requeue(),
            format!("AssetScan {} moved to Scheduled", asset_scan.id),
        ))
    }

    async fn reconcile_scheduled(&self, asset_scan: &AssetScan) -> Result<()> {
        let job = self.job_config(asset_scan).await?;

        let next = match self.provider.run_asset_scan(&job).await {
            Ok(()) => AssetScanStatus::new(
                AssetScanState::ReadyToScan,
                AssetScanReason::ResourcesReady,
                None,
            ),
            Err(ProviderError::Fatal(message)) => {
                tracing::error!(target: "scan::asset_scan", asset_scan_id = %asset_scan.id, error = %message, "scan job failed to start");
                AssetScanStatus::with_message(AssetScanState::Failed, AssetScanReason::Error, message)
            }
            Err(ProviderError::Retryable {
                message,
                retry_after,
            }) => return Err(OrchestratorError::requeue_after(retry_after, message)),
            Err(err) => return Err(err.into()),
        };

        self.set_status(asset_scan, next).await
    }

    async fn reconcile_aborted(&self, asset_scan: &AssetScan) -> Result<()> {
        let Some(status) = &asset_scan.status else {
            return Err(OrchestratorError::InvalidEntity(format!(
                "AssetScan {} has no status",
                asset_scan.id
            )));
        };

        let timeout = TimeDelta::from_std(self.config.abort_timeout()).unwrap_or(TimeDelta::MAX);
        let timed_out = status
            .last_transition_time
            .checked_add_signed(timeout)
            .is_some_and(|deadline| Utc::now() > deadline);
        if !timed_out {
            tracing::trace!(target: "scan::asset_scan", asset_scan_id = %asset_scan.id, "aborted asset scan still within abort timeout");
            return Ok(());
        }

        self.set_status(
            asset_scan,
            AssetScanStatus::with_message(
                AssetScanState::Failed,
                AssetScanReason::AbortTimeout,
                format!(
                    "failed to wait for scanner to finish graceful shutdown on abort after: {:?}",
                    self.config.abort_timeout()
                ),
            ),
        )
        .await
    }

    async fn cleanup_resources(&self, asset_scan: &AssetScan, state: AssetScanState) -> Result<()> {
        let Some(cleanup) = &asset_scan.resource_cleanup_status else {
            return Err(OrchestratorError::InvalidEntity(format!(
                "AssetScan {} has no resource cleanup status",
                asset_scan.id
            )));
        };
        if cleanup.state != ResourceCleanupState::Pending {
            return Ok(());
        }

        let skip = match self.config.delete_policy {
            DeleteJobPolicy::Never => true,
            DeleteJobPolicy::OnSuccess => state == AssetScanState::Failed,
            DeleteJobPolicy::Always => false,
        };
        if skip {
            return self
                .set_cleanup_status(
                    asset_scan,
                    ResourceCleanupStatus::new(
                        ResourceCleanupState::Skipped,
                        ResourceCleanupReason::DeletePolicy,
                        None,
                    ),
                )
                .await;
        }

        let job = self.job_config(asset_scan).await?;
        let next = match self.provider.remove_asset_scan(&job).await {
            Ok(()) => ResourceCleanupStatus::new(
                ResourceCleanupState::Done,
                ResourceCleanupReason::Success,
                None,
            ),
            Err(ProviderError::Fatal(message)) => {
                tracing::error!(target: "scan::asset_scan", asset_scan_id = %asset_scan.id, error = %message, "resource cleanup failed");
                ResourceCleanupStatus::with_message(
                    ResourceCleanupState::Failed,
                    ResourceCleanupReason::ProviderError,
                    message,
                )
            }
            Err(ProviderError::Retryable {
                message,
                retry_after,
            }) => return Err(OrchestratorError::requeue_after(retry_after, message)),
            Err(err) => return Err(err.into()),
        };

        self.set_cleanup_status(asset_scan, next).await
    }
}

#[async_trait]
impl<B: BackendClient, P: Provider> PollSource<AssetScanReconcileEvent> for AssetScanWatcher<B, P> {
    async fn get_items(&self) -> Result<Vec<AssetScanReconcileEvent>> {
        let filter = Filter::all([
            Filter::ne("status/state", AssetScanState::Done),
            Filter::ne("status/state", AssetScanState::Failed),
        ])
        .or(Filter::eq(
            "resourceCleanupStatus/state",
            ResourceCleanupState::Pending,
        ));
        let asset_scans: Vec<AssetScan> = self
            .backend
            .list(&Query::filtered(filter).select(["id", "scan/id", "asset/id"]))
            .await?;
        tracing::debug!(target: "scan::asset_scan", count = asset_scans.len(), "fetched asset scans to reconcile");
        Ok(asset_scans
            .into_iter()
            .map(|asset_scan| AssetScanReconcileEvent {
                asset_scan_id: asset_scan.id,
                scan_id: asset_scan.scan.map(|scan| scan.id),
                asset_id: asset_scan.asset.id,
            })
            .collect())
    }
}

#[async_trait]
impl<B: BackendClient, P: Provider> Reconcile<AssetScanReconcileEvent> for AssetScanWatcher<B, P> {
    async fn reconcile(&self, event: &AssetScanReconcileEvent) -> Result<()> {
        let asset_scan = match self.backend.get::<AssetScan>(event.asset_scan_id).await {
            Ok(asset_scan) => asset_scan,
            Err(err) if err.is_not_found() => {
                tracing::debug!(target: "scan::asset_scan", asset_scan_id = %event.asset_scan_id, "asset scan no longer exists");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        let state = asset_scan.state().ok_or_else(|| {
            OrchestratorError::InvalidEntity(format!("AssetScan {} has no status", asset_scan.id))
        })?;
        tracing::trace!(target: "scan::asset_scan", asset_scan_id = %asset_scan.id, state = %state, "reconciling asset scan");

        match state {
            AssetScanState::Pending => self.reconcile_pending(&asset_scan).await,
            AssetScanState::Scheduled => self.reconcile_scheduled(&asset_scan).await,
            // The scanner itself advances these.
            AssetScanState::ReadyToScan | AssetScanState::InProgress => Ok(()),
            AssetScanState::Aborted => self.reconcile_aborted(&asset_scan).await,
            AssetScanState::Done | AssetScanState::Failed => {
                self.cleanup_resources(&asset_scan, state).await
            }
        }
    }
}
