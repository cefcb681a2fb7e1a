use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use scanwarden_model::{
    AssetId, AssetScan, AssetScanId, AssetScanPatch, AssetScanState, Filter, FindingsSummary,
};

use crate::backend::{BackendClient, Query};
use crate::config::AssetScanProcessorConfig;
use crate::error::{OrchestratorError, Result};
use crate::reconcile::{PollSource, Reconcile, start_controller};

use super::{FindingReconciler, PROCESSING_ORDER, collect_infos, has_results, record_outcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AssetScanProcessEvent {
    pub asset_scan_id: AssetScanId,
    pub asset_id: AssetId,
}

impl fmt::Display for AssetScanProcessEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AssetScanID={} AssetID={}", self.asset_scan_id, self.asset_id)
    }
}

/// Converts the results of terminal asset scans into findings, once per
/// asset scan.
pub struct AssetScanProcessor<B> {
    backend: Arc<B>,
    findings: FindingReconciler<B>,
    config: AssetScanProcessorConfig,
}

impl<B> fmt::Debug for AssetScanProcessor<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssetScanProcessor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<B: BackendClient> AssetScanProcessor<B> {
    pub const NAME: &'static str = "AssetScanProcessor";

    pub fn new(backend: Arc<B>, config: AssetScanProcessorConfig) -> Self {
        Self {
            findings: FindingReconciler::new(Arc::clone(&backend)),
            backend,
            config,
        }
    }

    pub fn start(self: Arc<Self>, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        let controller = self.config.controller;
        start_controller::<AssetScanProcessEvent, _>(Self::NAME, self, controller, cancel)
    }

    /// Runs every family with results, then marks the asset scan processed.
    ///
    /// A failing family does not stop the others, but the asset scan is left
    /// unprocessed so the next poll retries all of them.
    pub async fn process(&self, asset_scan: &AssetScan) -> Result<FindingsSummary> {
        let mut summary = FindingsSummary::default();
        let mut errors = Vec::new();

        for &kind in PROCESSING_ORDER {
            if !has_results(asset_scan, kind) {
                continue;
            }
            let infos = collect_infos(asset_scan, kind);
            match self.findings.reconcile(asset_scan, kind, infos).await {
                Ok(outcome) => record_outcome(&mut summary, &outcome),
                Err(err) => {
                    tracing::warn!(
                        target: "scan::findings",
                        asset_scan_id = %asset_scan.id,
                        %kind,
                        error = %err,
                        "failed to reconcile findings"
                    );
                    errors.push(err);
                }
            }
        }

        if let Some(err) = OrchestratorError::join(errors) {
            return Err(err);
        }

        self.backend
            .patch::<AssetScan>(
                asset_scan.id,
                AssetScanPatch {
                    summary: Some(summary.clone()),
                    findings_processed: Some(true),
                    ..Default::default()
                },
            )
            .await?;
        tracing::info!(
            target: "scan::findings",
            asset_scan_id = %asset_scan.id,
            asset_id = %asset_scan.asset.id,
            packages = summary.total_packages,
            vulnerabilities = summary.total_vulnerabilities.total(),
            "asset scan findings processed"
        );
        Ok(summary)
    }
}

fn is_terminal(asset_scan: &AssetScan) -> bool {
    matches!(
        asset_scan.state(),
        Some(AssetScanState::Done | AssetScanState::Failed)
    )
}

#[async_trait]
impl<B: BackendClient> PollSource<AssetScanProcessEvent> for AssetScanProcessor<B> {
    async fn get_items(&self) -> Result<Vec<AssetScanProcessEvent>> {
        let filter = Filter::all([
            Filter::any([
                Filter::eq("status/state", AssetScanState::Done),
                Filter::eq("status/state", AssetScanState::Failed),
            ]),
            Filter::any([
                Filter::is_null("findingsProcessed"),
                Filter::eq("findingsProcessed", false),
            ]),
        ]);
        let asset_scans: Vec<AssetScan> = self
            .backend
            .list(&Query::filtered(filter).select(["id", "asset/id"]))
            .await?;
        tracing::debug!(target: "scan::findings", count = asset_scans.len(), "fetched asset scans to process");
        Ok(asset_scans
            .into_iter()
            .map(|asset_scan| AssetScanProcessEvent {
                asset_scan_id: asset_scan.id,
                asset_id: asset_scan.asset.id,
            })
            .collect())
    }
}

#[async_trait]
impl<B: BackendClient> Reconcile<AssetScanProcessEvent> for AssetScanProcessor<B> {
    async fn reconcile(&self, event: &AssetScanProcessEvent) -> Result<()> {
        let asset_scan = match self.backend.get::<AssetScan>(event.asset_scan_id).await {
            Ok(asset_scan) => asset_scan,
            Err(err) if err.is_not_found() => {
                tracing::debug!(target: "scan::findings", asset_scan_id = %event.asset_scan_id, "asset scan no longer exists");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        if asset_scan.findings_processed == Some(true) || !is_terminal(&asset_scan) {
            tracing::trace!(target: "scan::findings", asset_scan_id = %asset_scan.id, "nothing to process");
            return Ok(());
        }

        self.process(&asset_scan).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, Utc};
    use scanwarden_model::{
        Asset, AssetInfo, AssetScanReason, AssetScanStatus, AssetScanTemplate, DirInfo, Finding,
        Package, ScanFamily, ScanResults, ScannerReason, ScannerState, ScannerStatus, Secret,
        Vulnerability, VulnerabilitySeverity,
    };

    use super::*;
    use crate::backend::InMemoryBackend;

    async fn asset(backend: &InMemoryBackend) -> AssetId {
        backend
            .post(Asset::discovered(
                AssetInfo::Dir(DirInfo {
                    dir_name: "srv".into(),
                    location: None,
                }),
                Utc::now(),
            ))
            .await
            .expect("post asset")
            .id
    }

    fn finished(
        asset_id: AssetId,
        state: AssetScanState,
        families: &[ScanFamily],
        results: ScanResults,
    ) -> AssetScan {
        let mut asset_scan = AssetScan::new(None, asset_id, AssetScanTemplate::default());
        let reason = if state == AssetScanState::Done {
            AssetScanReason::Success
        } else {
            AssetScanReason::Error
        };
        let mut status = AssetScanStatus::new(state, reason, None);
        status.last_transition_time = Utc::now() - TimeDelta::minutes(1);
        asset_scan.status = Some(status);
        for &family in families {
            asset_scan.scanners.insert(
                family,
                ScannerStatus::new(ScannerState::Done, ScannerReason::Success, None),
            );
        }
        asset_scan.results = results;
        asset_scan
    }

    fn results() -> ScanResults {
        ScanResults {
            packages: Some(vec![Package {
                name: "zlib".into(),
                version: "1.3".into(),
                ..Default::default()
            }]),
            vulnerabilities: Some(vec![Vulnerability {
                vulnerability_name: "CVE-9".into(),
                severity: VulnerabilitySeverity::High,
                package: Some(Package {
                    name: "curl".into(),
                    version: "8.0".into(),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            secrets: Some(vec![Secret {
                fingerprint: "unscanned".into(),
                ..Default::default()
            }]),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn processes_finished_families_and_marks_the_scan() {
        let backend = Arc::new(InMemoryBackend::new());
        let asset_id = asset(&backend).await;
        let asset_scan = backend
            .post(finished(
                asset_id,
                AssetScanState::Done,
                &[ScanFamily::Sbom, ScanFamily::Vulnerabilities],
                results(),
            ))
            .await
            .unwrap();
        let processor = AssetScanProcessor::new(Arc::clone(&backend), Default::default());

        let events = processor.get_items().await.unwrap();
        assert_eq!(
            events,
            vec![AssetScanProcessEvent {
                asset_scan_id: asset_scan.id,
                asset_id,
            }]
        );
        processor.reconcile(&events[0]).await.unwrap();

        let stored = backend.get::<AssetScan>(asset_scan.id).await.unwrap();
        assert_eq!(stored.findings_processed, Some(true));
        let summary = stored.summary.expect("summary");
        assert_eq!(summary.total_packages, 2);
        assert_eq!(summary.total_vulnerabilities.total_high_vulnerabilities, 1);
        assert_eq!(summary.total_secrets, 0);

        // Secrets were reported but the family never finished.
        assert_eq!(backend.len::<Finding>(), 3);
        assert!(processor.get_items().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn already_processed_scans_are_left_alone() {
        let backend = Arc::new(InMemoryBackend::new());
        let asset_id = asset(&backend).await;
        let mut asset_scan = finished(
            asset_id,
            AssetScanState::Failed,
            &[ScanFamily::Sbom],
            results(),
        );
        asset_scan.findings_processed = Some(true);
        let asset_scan = backend.post(asset_scan).await.unwrap();
        let processor = AssetScanProcessor::new(Arc::clone(&backend), Default::default());

        assert!(processor.get_items().await.unwrap().is_empty());
        processor
            .reconcile(&AssetScanProcessEvent {
                asset_scan_id: asset_scan.id,
                asset_id,
            })
            .await
            .unwrap();
        assert_eq!(backend.len::<Finding>(), 0);
    }

    #[tokio::test]
    async fn in_progress_scans_are_not_processed() {
        let backend = Arc::new(InMemoryBackend::new());
        let asset_id = asset(&backend).await;
        let asset_scan = backend
            .post(finished(
                asset_id,
                AssetScanState::InProgress,
                &[ScanFamily::Sbom],
                results(),
            ))
            .await
            .unwrap();
        let processor = AssetScanProcessor::new(Arc::clone(&backend), Default::default());

        assert!(processor.get_items().await.unwrap().is_empty());
        processor
            .reconcile(&AssetScanProcessEvent {
                asset_scan_id: asset_scan.id,
                asset_id,
            })
            .await
            .unwrap();
        let stored = backend.get::<AssetScan>(asset_scan.id).await.unwrap();
        assert_eq!(stored.findings_processed, None);
    }

    #[tokio::test]
    async fn missing_asset_scan_is_not_an_error() {
        let backend = Arc::new(InMemoryBackend::new());
        let processor = AssetScanProcessor::new(backend, Default::default());
        processor
            .reconcile(&AssetScanProcessEvent {
                asset_scan_id: AssetScanId::new(),
                asset_id: AssetId::new(),
            })
            .await
            .unwrap();
    }
}
