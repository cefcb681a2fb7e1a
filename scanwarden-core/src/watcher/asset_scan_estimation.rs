use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use scanwarden_model::{
    Asset, AssetId, AssetScan, AssetScanEstimation, AssetScanEstimationId,
    AssetScanEstimationPatch, AssetScanEstimationReason, AssetScanEstimationState,
    AssetScanEstimationStatus, AssetScanState, AssetScanStats, Filter, OrderBy, ScanEstimationId,
    ScanFamily, ScannerState,
};

use crate::backend::{BackendClient, Query};
use crate::config::AssetScanEstimationWatcherConfig;
use crate::error::{OrchestratorError, Result};
use crate::provider::{Provider, ProviderError};
use crate::reconcile::{PollSource, Reconcile, start_controller};
use crate::state::ASSET_SCAN_ESTIMATION;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AssetScanEstimationReconcileEvent {
    pub asset_scan_estimation_id: AssetScanEstimationId,
    pub scan_estimation_id: Option<ScanEstimationId>,
    pub asset_id: AssetId,
}

impl fmt::Display for AssetScanEstimationReconcileEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AssetScanEstimationID={} AssetID={}",
            self.asset_scan_estimation_id, self.asset_id
        )?;
        if let Some(scan_estimation_id) = self.scan_estimation_id {
            write!(f, " ScanEstimationID={scan_estimation_id}")?;
        }
        Ok(())
    }
}

/// Asks the provider for a per-asset forecast and deletes the result once its
/// time-to-live has passed.
pub struct AssetScanEstimationWatcher<B, P> {
    backend: Arc<B>,
    provider: Arc<P>,
    config: AssetScanEstimationWatcherConfig,
}

impl<B, P> fmt::Debug for AssetScanEstimationWatcher<B, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssetScanEstimationWatcher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<B: BackendClient, P: Provider> AssetScanEstimationWatcher<B, P> {
    pub const NAME: &'static str = "AssetScanEstimationWatcher";

    pub fn new(backend: Arc<B>, provider: Arc<P>, config: AssetScanEstimationWatcherConfig) -> Self {
        Self {
            backend,
            provider,
            config,
        }
    }

    pub fn start(self: Arc<Self>, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        let controller = self.config.controller;
        start_controller::<AssetScanEstimationReconcileEvent, _>(Self::NAME, self, controller, cancel)
    }

    async fn patch(
        &self,
        estimation: &AssetScanEstimation,
        patch: AssetScanEstimationPatch,
    ) -> Result<()> {
        if let Some(next) = &patch.status {
            ASSET_SCAN_ESTIMATION.advance(estimation.status.as_ref(), next)?;
            tracing::debug!(
                target: "scan::estimation",
                asset_scan_estimation_id = %estimation.id,
                state = %next.state,
                reason = %next.reason,
                "updating asset scan estimation status"
            );
        }
        self.backend
            .patch::<AssetScanEstimation>(estimation.id, patch)
            .await?;
        Ok(())
    }

    /// Collects, per family, the stats of the most recent asset scan of
    /// `asset` that finished that family. A family whose lookup fails is
    /// left out.
    pub async fn latest_asset_scan_stats(&self, asset: &Asset) -> AssetScanStats {
        let mut stats = AssetScanStats::new();
        for &family in ScanFamily::ALL {
            let filter = Filter::all([
                Filter::eq("asset/id", asset.id),
                Filter::eq("status/state", AssetScanState::Done),
                Filter::eq(format!("scanners/{}/state", family.as_str()), ScannerState::Done),
            ]);
            let query = Query::filtered(filter)
                .select(["id", "stats"])
                .order_by(OrderBy::desc("status/lastTransitionTime"))
                .top(1);

            match self.backend.first::<AssetScan>(query).await {
                Ok(Some(mut asset_scan)) => {
                    if let Some(family_stats) = asset_scan.stats.remove(&family) {
                        stats.insert(family, family_stats);
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(
                        target: "scan::estimation",
                        asset_id = %asset.id,
                        family = %family,
                        error = %err,
                        "failed to get latest asset scan stats"
                    );
                }
            }
        }
        stats
    }

    async fn reconcile_pending(&self, estimation: &AssetScanEstimation) -> Result<()> {
        let asset = self.backend.get::<Asset>(estimation.asset.id).await?;
        let template = estimation.asset_scan_template.clone().unwrap_or_default();
        let stats = self.latest_asset_scan_stats(&asset).await;

        let start_time = Utc::now();
        let outcome = self.provider.estimate(&stats, &asset, &template).await;
        let end_time = Utc::now();

        let (status, forecast) = match outcome {
            Ok(forecast) => {
                tracing::info!(
                    target: "scan::estimation",
                    asset_scan_estimation_id = %estimation.id,
                    cost = ?forecast.cost,
                    duration = ?forecast.duration,
                    "asset scan estimation completed"
                );
                (
                    AssetScanEstimationStatus::new(
                        AssetScanEstimationState::Done,
                        AssetScanEstimationReason::Success,
                        None,
                    ),
                    Some(forecast),
                )
            }
            Err(ProviderError::Fatal(message)) => {
                tracing::error!(
                    target: "scan::estimation",
                    asset_scan_estimation_id = %estimation.id,
                    error = %message,
                    "fatal error while estimating asset scan"
                );
                (
                    AssetScanEstimationStatus::with_message(
                        AssetScanEstimationState::Failed,
                        AssetScanEstimationReason::Error,
                        message,
                    ),
                    None,
                )
            }
            Err(ProviderError::Retryable {
                message,
                retry_after,
            }) => return Err(OrchestratorError::requeue_after(retry_after, message)),
            Err(err) => return Err(err.into()),
        };

        let ttl = estimation
            .ttl_seconds_after_finished
            .unwrap_or(self.config.default_ttl_secs);
        self.patch(
            estimation,
            AssetScanEstimationPatch {
                status: Some(status),
                estimation: forecast,
                start_time: Some(start_time),
                end_time: Some(end_time),
                delete_after: Some(estimation.compute_delete_after(end_time, ttl)),
                ttl_seconds_after_finished: Some(ttl),
            },
        )
        .await
    }

    /// Garbage-collects a finished estimation: records `delete_after` the
    /// first time round and deletes once `now` is past it.
    pub async fn reconcile_done(
        &self,
        estimation: &AssetScanEstimation,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let delete_after = match estimation.delete_after {
            Some(delete_after) => delete_after,
            None => {
                let end_time = estimation.end_time.unwrap_or(now);
                let ttl = estimation
                    .ttl_seconds_after_finished
                    .unwrap_or(self.config.default_ttl_secs);
                let delete_after = estimation.compute_delete_after(end_time, ttl);
                if now <= delete_after {
                    return self
                        .patch(
                            estimation,
                            AssetScanEstimationPatch {
                                end_time: Some(end_time),
                                delete_after: Some(delete_after),
                                ttl_seconds_after_finished: Some(ttl),
                                ..Default::default()
                            },
                        )
                        .await;
                }
                delete_after
            }
        };

        if now > delete_after {
            tracing::debug!(
                target: "scan::estimation",
                asset_scan_estimation_id = %estimation.id,
                %delete_after,
                "deleting expired asset scan estimation"
            );
            match self.backend.delete::<AssetScanEstimation>(estimation.id).await {
                Ok(()) => {}
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<B: BackendClient, P: Provider> PollSource<AssetScanEstimationReconcileEvent>
    for AssetScanEstimationWatcher<B, P>
{
    async fn get_items(&self) -> Result<Vec<AssetScanEstimationReconcileEvent>> {
        let filter = Filter::any([
            Filter::all([
                Filter::ne("status/state", AssetScanEstimationState::Done),
                Filter::ne("status/state", AssetScanEstimationState::Failed),
            ]),
            Filter::is_null("status"),
            Filter::is_null("deleteAfter"),
            Filter::lt("deleteAfter", Utc::now()),
        ]);
        let estimations: Vec<AssetScanEstimation> = self
            .backend
            .list(&Query::filtered(filter).select(["id", "scanEstimation/id", "asset/id"]))
            .await?;
        tracing::debug!(target: "scan::estimation", count = estimations.len(), "fetched asset scan estimations to reconcile");
        Ok(estimations
            .into_iter()
            .map(|estimation| AssetScanEstimationReconcileEvent {
                asset_scan_estimation_id: estimation.id,
                scan_estimation_id: estimation.scan_estimation.map(|parent| parent.id),
                asset_id: estimation.asset.id,
            })
            .collect())
    }
}

#[async_trait]
impl<B: BackendClient, P: Provider> Reconcile<AssetScanEstimationReconcileEvent>
    for AssetScanEstimationWatcher<B, P>
{
    async fn reconcile(&self, event: &AssetScanEstimationReconcileEvent) -> Result<()> {
        let estimation = match self
            .backend
            .get::<AssetScanEstimation>(event.asset_scan_estimation_id)
            .await
        {
            Ok(estimation) => estimation,
            Err(err) if err.is_not_found() => {
                tracing::debug!(target: "scan::estimation", asset_scan_estimation_id = %event.asset_scan_estimation_id, "asset scan estimation no longer exists");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        let Some(state) = estimation.state() else {
            return self
                .patch(
                    &estimation,
                    AssetScanEstimationPatch {
                        status: Some(AssetScanEstimationStatus::new(
                            AssetScanEstimationState::Pending,
                            AssetScanEstimationReason::Created,
                            None,
                        )),
                        ..Default::default()
                    },
                )
                .await;
        };

        tracing::trace!(target: "scan::estimation", asset_scan_estimation_id = %estimation.id, state = %state, "reconciling asset scan estimation");

        match state {
            AssetScanEstimationState::Pending => self.reconcile_pending(&estimation).await,
            AssetScanEstimationState::Aborted => {
                self.patch(
                    &estimation,
                    AssetScanEstimationPatch {
                        status: Some(AssetScanEstimationStatus::with_message(
                            AssetScanEstimationState::Failed,
                            AssetScanEstimationReason::Aborted,
                            "asset scan estimation was aborted",
                        )),
                        end_time: Some(Utc::now()),
                        ..Default::default()
                    },
                )
                .await?;
                tracing::info!(target: "scan::estimation", asset_scan_estimation_id = %estimation.id, "asset scan estimation aborted");
                Ok(())
            }
            AssetScanEstimationState::Done | AssetScanEstimationState::Failed => {
                self.reconcile_done(&estimation, Utc::now()).await
            }
        }
    }
}
