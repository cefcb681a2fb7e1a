use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use scanwarden_model::{
    Asset, AssetId, AssetScan, AssetScanPatch, AssetScanReason, AssetScanState, AssetScanStatus,
    Filter, FindingsSummary, Scan, ScanFamily, ScanId, ScanPatch, ScanReason, ScanState,
    ScanStatus, ScanSummary, ScannerReason, ScannerState, ScannerStatus,
};

use crate::backend::{BackendClient, Query};
use crate::config::ScanWatcherConfig;
use crate::error::{OrchestratorError, Result};
use crate::reconcile::{PollSource, Reconcile, start_controller};
use crate::state::{ASSET_SCAN, SCAN};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScanReconcileEvent {
    pub scan_id: ScanId,
}

impl fmt::Display for ScanReconcileEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScanID={}", self.scan_id)
    }
}

/// Drives scans from discovery to completion and cascades aborts to their
/// asset scans.
pub struct ScanWatcher<B> {
    backend: Arc<B>,
    config: ScanWatcherConfig,
}

impl<B> fmt::Debug for ScanWatcher<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanWatcher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<B: BackendClient> ScanWatcher<B> {
    pub const NAME: &'static str = "ScanWatcher";

    pub fn new(backend: Arc<B>, config: ScanWatcherConfig) -> Self {
        Self { backend, config }
    }

    pub fn start(self: Arc<Self>, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        let controller = self.config.controller;
        start_controller::<ScanReconcileEvent, _>(Self::NAME, self, controller, cancel)
    }

    async fn set_status(&self, scan: &Scan, next: ScanStatus, patch: ScanPatch) -> Result<()> {
        SCAN.advance(scan.status.as_ref(), &next)?;
        tracing::debug!(
            target: "scan::watcher",
            scan_id = %scan.id,
            state = %next.state,
            reason = %next.reason,
            "updating scan status"
        );
        self.backend
            .patch::<Scan>(
                scan.id,
                ScanPatch {
                    status: Some(next),
                    ..patch
                },
            )
            .await?;
        Ok(())
    }

    async fn reconcile_pending(&self, scan: &Scan) -> Result<()> {
        let mut filter = Filter::is_null("terminatedOn");
        if let Some(scope) = &scan.template.asset_scope {
            filter = filter.and(scope.clone());
        }

        let assets: Vec<Asset> = self
            .backend
            .list(&Query::filtered(filter).select(["id"]))
            .await?;
        let asset_ids: Vec<_> = assets.iter().map(|asset| asset.id).collect();

        tracing::debug!(target: "scan::watcher", scan_id = %scan.id, assets = asset_ids.len(), "assets discovered for scan");

        if asset_ids.is_empty() {
            let status = ScanStatus::with_message(
                ScanState::Done,
                ScanReason::NothingToScan,
                "No assets found in scope for Scan",
            );
            return self
                .set_status(
                    scan,
                    status,
                    ScanPatch {
                        asset_ids: Some(Vec::new()),
                        end_time: Some(Utc::now()),
                        ..Default::default()
                    },
                )
                .await;
        }

        let status = ScanStatus::with_message(
            ScanState::Discovered,
            ScanReason::AssetsDiscovered,
            "Assets for Scan are successfully discovered",
        );
        self.set_status(
            scan,
            status,
            ScanPatch {
                asset_ids: Some(asset_ids),
                ..Default::default()
            },
        )
        .await
    }

    fn new_asset_scan(scan: &Scan, asset_id: AssetId) -> AssetScan {
        let families = &scan.template.asset_scan_template.families;
        let scanners = ScanFamily::ALL
            .iter()
            .map(|&family| {
                let status = if families.is_enabled(family) {
                    ScannerStatus::new(ScannerState::Pending, ScannerReason::Scheduled, None)
                } else {
                    ScannerStatus::new(ScannerState::Skipped, ScannerReason::NotScheduled, None)
                };
                (family, status)
            })
            .collect();

        let mut asset_scan = AssetScan::new(
            Some(scan.id),
            asset_id,
            scan.template.asset_scan_template.clone(),
        );
        asset_scan.scanners = scanners;
        asset_scan.summary = Some(FindingsSummary::default());
        asset_scan.findings_processed = Some(false);
        asset_scan
    }

    async fn create_asset_scan(&self, scan: &Scan, asset_id: AssetId) -> Result<()> {
        match self.backend.post(Self::new_asset_scan(scan, asset_id)).await {
            Ok(created) => {
                tracing::debug!(target: "scan::watcher", scan_id = %scan.id, asset_scan_id = %created.id, asset_id = %asset_id, "asset scan created");
                Ok(())
            }
            Err(err) if err.is_conflict() => {
                tracing::debug!(target: "scan::watcher", scan_id = %scan.id, asset_id = %asset_id, "asset scan already exists");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn reconcile_discovered(&self, scan: &Scan) -> Result<()> {
        let results = join_all(
            scan.asset_ids
                .iter()
                .map(|&asset_id| self.create_asset_scan(scan, asset_id)),
        )
        .await;

        let errors: Vec<_> = results.into_iter().filter_map(|result| result.err()).collect();
        if let Some(err) = OrchestratorError::join(errors) {
            tracing::warn!(target: "scan::watcher", scan_id = %scan.id, error = %err, "failed to create asset scans");
            return Err(err);
        }

        tracing::info!(target: "scan::watcher", scan_id = %scan.id, assets = scan.asset_ids.len(), "asset scans created for scan");

        let summary = ScanSummary {
            jobs_left_to_run: scan.asset_ids.len() as u64,
            ..Default::default()
        };
        self.set_status(
            scan,
            ScanStatus::new(ScanState::InProgress, ScanReason::AssetScansRunning, None),
            ScanPatch {
                summary: Some(summary),
                ..Default::default()
            },
        )
        .await
    }

    async fn reconcile_in_progress(&self, scan: &Scan) -> Result<()> {
        let asset_scans: Vec<AssetScan> = self
            .backend
            .list(&Query::filtered(Filter::eq("scan/id", scan.id)).select(["id", "status", "summary"]))
            .await?;

        let mut summary = ScanSummary::default();
        let mut failed = 0u64;
        for asset_scan in &asset_scans {
            let state = asset_scan.state().ok_or_else(|| {
                OrchestratorError::InvalidEntity(format!("AssetScan {} has no status", asset_scan.id))
            })?;
            match state {
                AssetScanState::Done | AssetScanState::Failed => {
                    summary.jobs_completed += 1;
                    if let Some(findings) = &asset_scan.summary {
                        summary.findings.accumulate(findings);
                    }
                    if state == AssetScanState::Failed {
                        failed += 1;
                    }
                }
                _ => summary.jobs_left_to_run += 1,
            }
        }

        tracing::trace!(
            target: "scan::watcher",
            scan_id = %scan.id,
            jobs_completed = summary.jobs_completed,
            jobs_left_to_run = summary.jobs_left_to_run,
            "scan summary updated"
        );

        if summary.jobs_left_to_run > 0 {
            self.backend
                .patch::<Scan>(
                    scan.id,
                    ScanPatch {
                        summary: Some(summary),
                        ..Default::default()
                    },
                )
                .await?;
            return Ok(());
        }

        let total = asset_scans.len() as u64;
        let message = format!(
            "{} succeeded, {} failed out of {} total asset scans",
            total - failed,
            failed,
            total
        );
        let status = if failed > 0 {
            ScanStatus::with_message(ScanState::Failed, ScanReason::Error, message)
        } else {
            ScanStatus::with_message(ScanState::Done, ScanReason::Success, message)
        };
        tracing::info!(target: "scan::watcher", scan_id = %scan.id, state = %status.state, total, failed, "scan finished");
        self.set_status(
            scan,
            status,
            ScanPatch {
                summary: Some(summary),
                end_time: Some(Utc::now()),
                ..Default::default()
            },
        )
        .await
    }

    async fn abort_asset_scan(&self, asset_scan: &AssetScan) -> Result<()> {
        let next = AssetScanStatus::new(AssetScanState::Aborted, AssetScanReason::Cancellation, None);
        ASSET_SCAN.advance(asset_scan.status.as_ref(), &next)?;
        self.backend
            .patch::<AssetScan>(asset_scan.id, AssetScanPatch::status(next))
            .await
            .map(|_| ())
            .map_err(|err| {
                tracing::warn!(target: "scan::watcher", asset_scan_id = %asset_scan.id, error = %err, "failed to abort asset scan");
                err.into()
            })
    }

    /// Aborts every asset scan of `scan` that has not finished or been
    /// aborted already. Patches run concurrently; any failure fails the whole
    /// call and leaves the scan untouched, while patches that did succeed
    /// stay applied.
    pub async fn reconcile_aborted(&self, scan: &Scan) -> Result<()> {
        let filter = Filter::all([
            Filter::eq("scan/id", scan.id),
            Filter::ne("status/state", AssetScanState::Aborted),
            Filter::ne("status/state", AssetScanState::Done),
            Filter::ne("status/state", AssetScanState::Failed),
        ]);
        let asset_scans: Vec<AssetScan> = self
            .backend
            .list(&Query::filtered(filter).select(["id", "status"]))
            .await?;

        if !asset_scans.is_empty() {
            let results = join_all(asset_scans.iter().map(|asset_scan| self.abort_asset_scan(asset_scan))).await;
            let total = results.len();
            let failed = results.iter().filter(|result| result.is_err()).count();
            if failed > 0 {
                let errors = results.into_iter().filter_map(|result| result.err()).collect();
                tracing::warn!(target: "scan::watcher", scan_id = %scan.id, failed, total, "abort cascade incomplete");
                return Err(OrchestratorError::Aggregate(errors));
            }
            tracing::info!(target: "scan::watcher", scan_id = %scan.id, aborted = total, "asset scans aborted");
        }

        if !self.config.fail_scan_after_abort {
            return Ok(());
        }

        self.set_status(
            scan,
            ScanStatus::with_message(
                ScanState::Failed,
                ScanReason::Cancellation,
                "Scan has been aborted",
            ),
            ScanPatch {
                end_time: Some(Utc::now()),
                ..Default::default()
            },
        )
        .await
    }
}

#[async_trait]
impl<B: BackendClient> PollSource<ScanReconcileEvent> for ScanWatcher<B> {
    async fn get_items(&self) -> Result<Vec<ScanReconcileEvent>> {
        let filter = Filter::all([
            Filter::ne("status/state", ScanState::Done),
            Filter::ne("status/state", ScanState::Failed),
        ]);
        let scans: Vec<Scan> = self
            .backend
            .list(&Query::filtered(filter).select(["id"]))
            .await?;
        tracing::debug!(target: "scan::watcher", count = scans.len(), "fetched running scans");
        Ok(scans
            .into_iter()
            .map(|scan| ScanReconcileEvent { scan_id: scan.id })
            .collect())
    }
}

#[async_trait]
impl<B: BackendClient> Reconcile<ScanReconcileEvent> for ScanWatcher<B> {
    async fn reconcile(&self, event: &ScanReconcileEvent) -> Result<()> {
        let scan = match self.backend.get::<Scan>(event.scan_id).await {
            Ok(scan) => scan,
            Err(err) if err.is_not_found() => {
                tracing::debug!(target: "scan::watcher", scan_id = %event.scan_id, "scan no longer exists");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        let state = scan
            .state()
            .ok_or_else(|| OrchestratorError::InvalidEntity(format!("Scan {} has no status", scan.id)))?;

        // A timeout wins over an abort in progress. The cascade does not run
        // for a scan failed here, so its asset scans are left as they are.
        let running = !matches!(state, ScanState::Done | ScanState::Failed);
        if running && scan.is_timed_out(self.config.scan_timeout(), Utc::now()) {
            tracing::warn!(target: "scan::watcher", scan_id = %scan.id, state = %state, "scan timed out");
            return self
                .set_status(
                    &scan,
                    ScanStatus::with_message(ScanState::Failed, ScanReason::Timeout, "Scan has timed out"),
                    ScanPatch {
                        end_time: Some(Utc::now()),
                        ..Default::default()
                    },
                )
                .await;
        }

        tracing::trace!(target: "scan::watcher", scan_id = %scan.id, state = %state, "reconciling scan");

        match state {
            ScanState::Pending => self.reconcile_pending(&scan).await,
            ScanState::Discovered => self.reconcile_discovered(&scan).await,
            ScanState::InProgress => self.reconcile_in_progress(&scan).await,
            ScanState::Aborted => self.reconcile_aborted(&scan).await,
            ScanState::Done | ScanState::Failed => {
                tracing::debug!(target: "scan::watcher", scan_id = %scan.id, "scan already finished");
                Ok(())
            }
        }
    }
}
