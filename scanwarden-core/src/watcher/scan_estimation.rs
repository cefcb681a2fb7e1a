use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use scanwarden_model::{
    Asset, AssetId, AssetScanEstimation, AssetScanEstimationId, AssetScanEstimationPatch,
    AssetScanEstimationReason, AssetScanEstimationState, AssetScanEstimationStatus, Filter,
    Reference, ScanEstimation, ScanEstimationId, ScanEstimationPatch, ScanEstimationReason,
    ScanEstimationState, ScanEstimationStatus, ScanEstimationSummary,
};

use crate::backend::{BackendClient, Query};
use crate::config::ScanEstimationWatcherConfig;
use crate::error::{OrchestratorError, Result};
use crate::reconcile::{PollSource, Reconcile, start_controller};
use crate::state::{ASSET_SCAN_ESTIMATION, SCAN_ESTIMATION};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScanEstimationReconcileEvent {
    pub scan_estimation_id: ScanEstimationId,
}

impl fmt::Display for ScanEstimationReconcileEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScanEstimationID={}", self.scan_estimation_id)
    }
}

/// Fans a scan estimation out into per-asset estimations and folds their
/// results back into one summary.
pub struct ScanEstimationWatcher<B> {
    backend: Arc<B>,
    config: ScanEstimationWatcherConfig,
}

impl<B> fmt::Debug for ScanEstimationWatcher<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanEstimationWatcher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Folds finished asset scan estimations into a summary. Returns the summary
/// and how many of them failed.
fn summarize(children: &[AssetScanEstimation]) -> Result<(ScanEstimationSummary, u64)> {
    let mut summary = ScanEstimationSummary::default();
    let mut failed = 0u64;
    for child in children {
        let state = child.state().ok_or_else(|| {
            OrchestratorError::InvalidEntity(format!(
                "AssetScanEstimation {} has no status",
                child.id
            ))
        })?;
        match state {
            AssetScanEstimationState::Pending => summary.jobs_left_to_run += 1,
            AssetScanEstimationState::Done => {
                if let Some(estimation) = &child.estimation {
                    summary.total_scan_time += estimation.duration.unwrap_or_default();
                    summary.total_scan_size += estimation.size.unwrap_or_default();
                    summary.total_scan_cost += estimation.cost.unwrap_or_default();
                }
                summary.jobs_completed += 1;
            }
            AssetScanEstimationState::Failed => {
                failed += 1;
                summary.jobs_completed += 1;
            }
            AssetScanEstimationState::Aborted => summary.jobs_completed += 1,
        }
    }
    Ok((summary, failed))
}

/// Scans run side by side up to `max_parallel_scanners`, so the wall-clock
/// estimate is the summed time divided by the effective parallelism.
fn apply_parallelism(summary: &mut ScanEstimationSummary, max_parallel_scanners: Option<u32>) {
    let max = u64::from(max_parallel_scanners.unwrap_or_default());
    if max > 1 && summary.jobs_completed > 0 {
        let parallel = max.min(summary.jobs_completed) as i64;
        summary.total_scan_time /= parallel;
    }
}

impl<B: BackendClient> ScanEstimationWatcher<B> {
    pub const NAME: &'static str = "ScanEstimationWatcher";

    pub fn new(backend: Arc<B>, config: ScanEstimationWatcherConfig) -> Self {
        Self { backend, config }
    }

    pub fn start(self: Arc<Self>, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        let controller = self.config.controller;
        start_controller::<ScanEstimationReconcileEvent, _>(Self::NAME, self, controller, cancel)
    }

    async fn patch(&self, estimation: &ScanEstimation, patch: ScanEstimationPatch) -> Result<()> {
        if let Some(next) = &patch.status {
            SCAN_ESTIMATION.advance(estimation.status.as_ref(), next)?;
            tracing::debug!(
                target: "scan::estimation",
                scan_estimation_id = %estimation.id,
                state = %next.state,
                reason = %next.reason,
                "updating scan estimation status"
            );
        }
        self.backend
            .patch::<ScanEstimation>(estimation.id, patch)
            .await?;
        Ok(())
    }

    fn is_timed_out(&self, estimation: &ScanEstimation, now: DateTime<Utc>) -> bool {
        let Some(start) = estimation.start_time else {
            return false;
        };
        let timeout =
            TimeDelta::from_std(self.config.estimation_timeout()).unwrap_or(TimeDelta::MAX);
        start
            .checked_add_signed(timeout)
            .is_some_and(|deadline| deadline < now)
    }

    async fn reconcile_pending(&self, estimation: &ScanEstimation) -> Result<()> {
        let mut filter = Filter::is_null("terminatedOn");
        if let Some(scope) = &estimation.scan_template.asset_scope {
            filter = filter.and(scope.clone());
        }
        let assets: Vec<Asset> = self
            .backend
            .list(&Query::filtered(filter).select(["id"]))
            .await?;
        let asset_ids: Vec<AssetId> = assets.iter().map(|asset| asset.id).collect();

        tracing::debug!(target: "scan::estimation", scan_estimation_id = %estimation.id, assets = asset_ids.len(), "assets discovered for scan estimation");

        let status = if asset_ids.is_empty() {
            ScanEstimationStatus::with_message(
                ScanEstimationState::Done,
                ScanEstimationReason::NothingToEstimate,
                "No assets found in scope for scan estimation",
            )
        } else {
            ScanEstimationStatus::with_message(
                ScanEstimationState::Discovered,
                ScanEstimationReason::SuccessfulDiscovery,
                "Assets for scan estimation are successfully discovered",
            )
        };
        let now = Utc::now();
        let finished = asset_ids.is_empty();
        let ttl = estimation
            .ttl_seconds_after_finished
            .unwrap_or(self.config.default_ttl_secs);

        self.patch(
            estimation,
            ScanEstimationPatch {
                status: Some(status),
                start_time: Some(estimation.start_time.unwrap_or(now)),
                end_time: finished.then_some(now),
                delete_after: finished.then(|| estimation.compute_delete_after(now, ttl)),
                ttl_seconds_after_finished: Some(ttl),
                summary: Some(ScanEstimationSummary {
                    jobs_left_to_run: asset_ids.len() as u64,
                    ..Default::default()
                }),
                asset_ids: Some(asset_ids),
                ..Default::default()
            },
        )
        .await
    }

    fn new_asset_scan_estimation(
        &self,
        estimation: &ScanEstimation,
        asset_id: AssetId,
    ) -> AssetScanEstimation {
        AssetScanEstimation {
            id: AssetScanEstimationId::new(),
            asset: Reference::new(asset_id),
            scan_estimation: Some(Reference::new(estimation.id)),
            asset_scan_template: Some(estimation.scan_template.asset_scan_template.clone()),
            estimation: None,
            start_time: None,
            end_time: None,
            delete_after: None,
            ttl_seconds_after_finished: Some(self.config.default_ttl_secs),
            status: Some(AssetScanEstimationStatus::new(
                AssetScanEstimationState::Pending,
                AssetScanEstimationReason::Created,
                None,
            )),
        }
    }

    /// Posts the per-asset estimation and returns its id, or the id of the
    /// one that already existed for the same asset.
    async fn create_asset_scan_estimation(
        &self,
        estimation: &ScanEstimation,
        asset_id: AssetId,
    ) -> Result<AssetScanEstimationId> {
        let err = match self
            .backend
            .post(self.new_asset_scan_estimation(estimation, asset_id))
            .await
        {
            Ok(created) => return Ok(created.id),
            Err(err) => err,
        };
        if let Some(existing) = err.conflicting::<AssetScanEstimation>() {
            let existing = existing?;
            tracing::debug!(target: "scan::estimation", scan_estimation_id = %estimation.id, asset_scan_estimation_id = %existing.id, asset_id = %asset_id, "asset scan estimation already exists");
            return Ok(existing.id);
        }
        tracing::error!(target: "scan::estimation", scan_estimation_id = %estimation.id, asset_id = %asset_id, error = %err, "failed to create asset scan estimation");
        Err(err.into())
    }

    async fn reconcile_discovered(&self, estimation: &ScanEstimation) -> Result<()> {
        let results = join_all(
            estimation
                .asset_ids
                .iter()
                .map(|&asset_id| self.create_asset_scan_estimation(estimation, asset_id)),
        )
        .await;

        let mut children = estimation.asset_scan_estimations.clone();
        let mut errors = Vec::new();
        for result in results {
            match result {
                Ok(id) => {
                    if !children.iter().any(|child| child.id == id) {
                        children.push(Reference::new(id));
                    }
                }
                Err(err) => errors.push(err),
            }
        }
        if let Some(err) = OrchestratorError::join(errors) {
            return Err(err);
        }

        tracing::info!(target: "scan::estimation", scan_estimation_id = %estimation.id, assets = estimation.asset_ids.len(), "asset scan estimations created");

        let summary = ScanEstimationSummary {
            jobs_left_to_run: estimation.asset_ids.len() as u64,
            ..estimation.summary.clone().unwrap_or_default()
        };
        self.patch(
            estimation,
            ScanEstimationPatch {
                status: Some(ScanEstimationStatus::new(
                    ScanEstimationState::InProgress,
                    ScanEstimationReason::Running,
                    None,
                )),
                asset_scan_estimations: Some(children),
                summary: Some(summary),
                ..Default::default()
            },
        )
        .await
    }

    async fn reconcile_in_progress(&self, estimation: &ScanEstimation) -> Result<()> {
        let children: Vec<AssetScanEstimation> = self
            .backend
            .list(
                &Query::filtered(Filter::eq("scanEstimation/id", estimation.id))
                    .select(["id", "status", "estimation"]),
            )
            .await?;

        let (mut summary, failed) = summarize(&children)?;
        tracing::trace!(
            target: "scan::estimation",
            scan_estimation_id = %estimation.id,
            jobs_completed = summary.jobs_completed,
            jobs_left_to_run = summary.jobs_left_to_run,
            "scan estimation summary updated"
        );

        if summary.jobs_left_to_run > 0 {
            return self
                .patch(
                    estimation,
                    ScanEstimationPatch {
                        summary: Some(summary),
                        ..Default::default()
                    },
                )
                .await;
        }

        let total = children.len() as u64;
        let message = format!(
            "{} succeeded, {} failed out of {} total asset scan estimations",
            total - failed,
            failed,
            total
        );
        let status = if failed > 0 {
            ScanEstimationStatus::with_message(
                ScanEstimationState::Failed,
                ScanEstimationReason::Error,
                message,
            )
        } else {
            ScanEstimationStatus::with_message(
                ScanEstimationState::Done,
                ScanEstimationReason::Success,
                message,
            )
        };
        apply_parallelism(&mut summary, estimation.scan_template.max_parallel_scanners);

        let end_time = Utc::now();
        let ttl = estimation
            .ttl_seconds_after_finished
            .unwrap_or(self.config.default_ttl_secs);
        tracing::info!(
            target: "scan::estimation",
            scan_estimation_id = %estimation.id,
            state = %status.state,
            total,
            failed,
            total_scan_cost = summary.total_scan_cost,
            "scan estimation finished"
        );
        self.patch(
            estimation,
            ScanEstimationPatch {
                status: Some(status),
                summary: Some(summary),
                end_time: Some(end_time),
                delete_after: Some(estimation.compute_delete_after(end_time, ttl)),
                ttl_seconds_after_finished: Some(ttl),
                ..Default::default()
            },
        )
        .await
    }

    async fn abort_child(&self, child: &AssetScanEstimation) -> Result<()> {
        let next = AssetScanEstimationStatus::new(
            AssetScanEstimationState::Aborted,
            AssetScanEstimationReason::Cancellation,
            None,
        );
        ASSET_SCAN_ESTIMATION.advance(child.status.as_ref(), &next)?;
        self.backend
            .patch::<AssetScanEstimation>(
                child.id,
                AssetScanEstimationPatch {
                    status: Some(next),
                    ..Default::default()
                },
            )
            .await
            .map(|_| ())
            .map_err(|err| {
                tracing::warn!(target: "scan::estimation", asset_scan_estimation_id = %child.id, error = %err, "failed to abort asset scan estimation");
                err.into()
            })
    }

    /// Aborts every unfinished asset scan estimation, then fails the parent.
    /// A failed child patch fails the call and leaves the parent Aborted.
    pub async fn reconcile_aborted(&self, estimation: &ScanEstimation) -> Result<()> {
        let filter = Filter::all([
            Filter::eq("scanEstimation/id", estimation.id),
            Filter::ne("status/state", AssetScanEstimationState::Aborted),
            Filter::ne("status/state", AssetScanEstimationState::Done),
            Filter::ne("status/state", AssetScanEstimationState::Failed),
        ]);
        let children: Vec<AssetScanEstimation> = self
            .backend
            .list(&Query::filtered(filter).select(["id", "status"]))
            .await?;

        let results = join_all(children.iter().map(|child| self.abort_child(child))).await;
        let errors: Vec<_> = results.into_iter().filter_map(|result| result.err()).collect();
        if !errors.is_empty() {
            tracing::warn!(target: "scan::estimation", scan_estimation_id = %estimation.id, failed = errors.len(), total = children.len(), "abort cascade incomplete");
            return Err(OrchestratorError::Aggregate(errors));
        }

        let end_time = Utc::now();
        self.patch(
            estimation,
            ScanEstimationPatch {
                status: Some(ScanEstimationStatus::with_message(
                    ScanEstimationState::Failed,
                    ScanEstimationReason::Aborted,
                    "Scan estimation has been aborted",
                )),
                end_time: Some(end_time),
                ..Default::default()
            },
        )
        .await
    }

    /// Records `delete_after` for a finished estimation and deletes it once
    /// `now` is past that point.
    pub async fn reconcile_done(&self, estimation: &ScanEstimation, now: DateTime<Utc>) -> Result<()> {
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
                            ScanEstimationPatch {
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
            tracing::debug!(target: "scan::estimation", scan_estimation_id = %estimation.id, %delete_after, "deleting expired scan estimation");
            match self.backend.delete::<ScanEstimation>(estimation.id).await {
                Ok(()) => {}
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<B: BackendClient> PollSource<ScanEstimationReconcileEvent> for ScanEstimationWatcher<B> {
    async fn get_items(&self) -> Result<Vec<ScanEstimationReconcileEvent>> {
        let filter = Filter::any([
            Filter::all([
                Filter::ne("status/state", ScanEstimationState::Done),
                Filter::ne("status/state", ScanEstimationState::Failed),
            ]),
            Filter::is_null("status"),
            Filter::is_null("deleteAfter"),
            Filter::lt("deleteAfter", Utc::now()),
        ]);
        let estimations: Vec<ScanEstimation> = self
            .backend
            .list(&Query::filtered(filter).select(["id"]))
            .await?;
        tracing::debug!(target: "scan::estimation", count = estimations.len(), "fetched scan estimations to reconcile");
        Ok(estimations
            .into_iter()
            .map(|estimation| ScanEstimationReconcileEvent {
                scan_estimation_id: estimation.id,
            })
            .collect())
    }
}

#[async_trait]
impl<B: BackendClient> Reconcile<ScanEstimationReconcileEvent> for ScanEstimationWatcher<B> {
    async fn reconcile(&self, event: &ScanEstimationReconcileEvent) -> Result<()> {
        let estimation = match self
            .backend
            .get::<ScanEstimation>(event.scan_estimation_id)
            .await
        {
            Ok(estimation) => estimation,
            Err(err) if err.is_not_found() => {
                tracing::debug!(target: "scan::estimation", scan_estimation_id = %event.scan_estimation_id, "scan estimation no longer exists");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        let Some(state) = estimation.state() else {
            return self
                .patch(
                    &estimation,
                    ScanEstimationPatch {
                        status: Some(ScanEstimationStatus::new(
                            ScanEstimationState::Pending,
                            ScanEstimationReason::Created,
                            None,
                        )),
                        ..Default::default()
                    },
                )
                .await;
        };

        let now = Utc::now();
        let running = !matches!(state, ScanEstimationState::Done | ScanEstimationState::Failed);
        if running && self.is_timed_out(&estimation, now) {
            tracing::warn!(target: "scan::estimation", scan_estimation_id = %estimation.id, state = %state, "scan estimation timed out");
            return self
                .patch(
                    &estimation,
                    ScanEstimationPatch {
                        status: Some(ScanEstimationStatus::with_message(
                            ScanEstimationState::Failed,
                            ScanEstimationReason::Timeout,
                            "Scan estimation has timed out",
                        )),
                        end_time: Some(now),
                        ..Default::default()
                    },
                )
                .await;
        }

        tracing::trace!(target: "scan::estimation", scan_estimation_id = %estimation.id, state = %state, "reconciling scan estimation");

        match state {
            ScanEstimationState::Pending => self.reconcile_pending(&estimation).await,
            ScanEstimationState::Discovered => self.reconcile_discovered(&estimation).await,
            ScanEstimationState::InProgress => self.reconcile_in_progress(&estimation).await,
            ScanEstimationState::Aborted => self.reconcile_aborted(&estimation).await,
            ScanEstimationState::Done | ScanEstimationState::Failed => {
                self.reconcile_done(&estimation, now).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use scanwarden_model::{AssetInfo, DirInfo, Estimation, ScanTemplate};

    use super::*;
    use crate::backend::InMemoryBackend;

    async fn seed_assets(backend: &InMemoryBackend, count: usize) -> Vec<AssetId> {
        let mut ids = Vec::new();
        for index in 0..count {
            let asset = backend
                .post(Asset::discovered(
                    AssetInfo::Dir(DirInfo {
                        dir_name: format!("dir-{index}"),
                        location: Some("/srv".into()),
                    }),
                    Utc::now(),
                ))
                .await
                .expect("post asset");
            ids.push(asset.id);
        }
        ids
    }

    fn watcher(backend: &Arc<InMemoryBackend>) -> ScanEstimationWatcher<InMemoryBackend> {
        ScanEstimationWatcher::new(Arc::clone(backend), ScanEstimationWatcherConfig::default())
    }

    async fn reconcile(watcher: &ScanEstimationWatcher<InMemoryBackend>, id: ScanEstimationId) {
        watcher
            .reconcile(&ScanEstimationReconcileEvent {
                scan_estimation_id: id,
            })
            .await
            .expect("reconcile");
    }

    async fn finish_children(backend: &InMemoryBackend, id: ScanEstimationId, duration: i64) {
        let children: Vec<AssetScanEstimation> = backend
            .list(&Query::filtered(Filter::eq("scanEstimation/id", id)))
            .await
            .unwrap();
        for child in children {
            backend
                .patch::<AssetScanEstimation>(
                    child.id,
                    AssetScanEstimationPatch {
                        status: Some(AssetScanEstimationStatus::new(
                            AssetScanEstimationState::Done,
                            AssetScanEstimationReason::Success,
                            None,
                        )),
                        estimation: Some(Estimation {
                            cost: Some(2.0),
                            size: Some(100),
                            duration: Some(duration),
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn drives_estimation_to_done_with_parallel_time() {
        let backend = Arc::new(InMemoryBackend::new());
        seed_assets(&backend, 3).await;
        let template = ScanTemplate {
            max_parallel_scanners: Some(2),
            ..Default::default()
        };
        let estimation = backend.post(ScanEstimation::new(template)).await.unwrap();
        let watcher = watcher(&backend);

        reconcile(&watcher, estimation.id).await;
        reconcile(&watcher, estimation.id).await;
        let stored = backend.get::<ScanEstimation>(estimation.id).await.unwrap();
        assert_eq!(stored.state(), Some(ScanEstimationState::Discovered));
        assert_eq!(stored.asset_ids.len(), 3);

        reconcile(&watcher, estimation.id).await;
        assert_eq!(backend.len::<AssetScanEstimation>(), 3);
        // Replaying the Discovered step must not duplicate children.
        watcher.reconcile_discovered(&stored).await.expect("replay");
        assert_eq!(backend.len::<AssetScanEstimation>(), 3);

        reconcile(&watcher, estimation.id).await;
        let stored = backend.get::<ScanEstimation>(estimation.id).await.unwrap();
        assert_eq!(stored.state(), Some(ScanEstimationState::InProgress));
        assert_eq!(stored.summary.as_ref().map(|s| s.jobs_left_to_run), Some(3));

        finish_children(&backend, estimation.id, 60).await;
        reconcile(&watcher, estimation.id).await;
        let stored = backend.get::<ScanEstimation>(estimation.id).await.unwrap();
        assert_eq!(stored.state(), Some(ScanEstimationState::Done));
        let summary = stored.summary.expect("summary");
        assert_eq!(summary.jobs_completed, 3);
        assert_eq!(summary.total_scan_time, 90);
        assert_eq!(summary.total_scan_size, 300);
        assert!((summary.total_scan_cost - 6.0).abs() < f64::EPSILON);
        assert!(stored.delete_after.is_some());
    }

    #[tokio::test]
    async fn empty_scope_finishes_immediately() {
        let backend = Arc::new(InMemoryBackend::new());
        let estimation = backend
            .post(ScanEstimation::new(ScanTemplate::default()))
            .await
            .unwrap();
        let watcher = watcher(&backend);

        reconcile(&watcher, estimation.id).await;
        reconcile(&watcher, estimation.id).await;
        let stored = backend.get::<ScanEstimation>(estimation.id).await.unwrap();
        let status = stored.status.expect("status");
        assert_eq!(status.state, ScanEstimationState::Done);
        assert_eq!(status.reason, ScanEstimationReason::NothingToEstimate);
        assert!(stored.delete_after.is_some());
    }

    #[tokio::test]
    async fn abort_cascades_then_fails_parent() {
        let backend = Arc::new(InMemoryBackend::new());
        seed_assets(&backend, 2).await;
        let estimation = backend
            .post(ScanEstimation::new(ScanTemplate::default()))
            .await
            .unwrap();
        let watcher = watcher(&backend);
        for _ in 0..3 {
            reconcile(&watcher, estimation.id).await;
        }
        backend
            .patch::<ScanEstimation>(
                estimation.id,
                ScanEstimationPatch {
                    status: Some(ScanEstimationStatus::new(
                        ScanEstimationState::Aborted,
                        ScanEstimationReason::Cancellation,
                        None,
                    )),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        reconcile(&watcher, estimation.id).await;

        let children: Vec<AssetScanEstimation> = backend.list(&Query::new()).await.unwrap();
        assert_eq!(children.len(), 2);
        assert!(
            children
                .iter()
                .all(|child| child.state() == Some(AssetScanEstimationState::Aborted))
        );
        let stored = backend.get::<ScanEstimation>(estimation.id).await.unwrap();
        let status = stored.status.expect("status");
        assert_eq!(status.state, ScanEstimationState::Failed);
        assert_eq!(status.reason, ScanEstimationReason::Aborted);
    }

    #[tokio::test]
    async fn finished_estimation_records_the_ttl_it_was_collected_with() {
        let backend = Arc::new(InMemoryBackend::new());
        let watcher = watcher(&backend);

        for (ttl, expected) in [(None, 24 * 60 * 60), (Some(120), 120)] {
            let mut estimation = ScanEstimation::new(ScanTemplate::default());
            estimation.ttl_seconds_after_finished = ttl;
            estimation.start_time = Some(Utc::now());
            estimation.status = Some(ScanEstimationStatus::new(
                ScanEstimationState::InProgress,
                ScanEstimationReason::Running,
                None,
            ));
            let estimation = backend.post(estimation).await.unwrap();

            reconcile(&watcher, estimation.id).await;

            let stored = backend.get::<ScanEstimation>(estimation.id).await.unwrap();
            assert_eq!(stored.state(), Some(ScanEstimationState::Done));
            assert_eq!(stored.ttl_seconds_after_finished, Some(expected));
            let end_time = stored.end_time.expect("end time");
            assert_eq!(
                stored.delete_after,
                Some(end_time + TimeDelta::seconds(expected as i64))
            );
        }
    }

    #[test]
    fn parallelism_divides_total_time_by_effective_scanners() {
        let mut summary = ScanEstimationSummary {
            jobs_completed: 2,
            total_scan_time: 100,
            ..Default::default()
        };
        apply_parallelism(&mut summary, Some(8));
        assert_eq!(summary.total_scan_time, 50);

        let mut summary = ScanEstimationSummary {
            jobs_completed: 4,
            total_scan_time: 100,
            ..Default::default()
        };
        apply_parallelism(&mut summary, None);
        assert_eq!(summary.total_scan_time, 100);
    }
}
