use std::sync::Arc;

use chrono::Utc;

use scanwarden_core::backend::{BackendClient, Query};
use scanwarden_core::config::{AssetScanWatcherConfig, ScanWatcherConfig};
use scanwarden_core::reconcile::{PollSource, Reconcile};
use scanwarden_core::watcher::{
    AssetScanReconcileEvent, AssetScanWatcher, ScanReconcileEvent, ScanWatcher,
};
use scanwarden_core::{InMemoryBackend, OrchestratorError};
use scanwarden_model::{
    AssetScan, AssetScanPatch, AssetScanReason, AssetScanState, AssetScanStatus, Filter,
    ResourceCleanupState, Scan, ScanPatch, ScanReason, ScanState, ScanStatus, ScanTemplate,
};

mod support;

use support::{FlakyBackend, ScriptedProvider, seed_asset};

async fn scan_state<B: BackendClient>(backend: &B, scan: &Scan) -> ScanState {
    backend
        .get::<Scan>(scan.id)
        .await
        .expect("scan")
        .state()
        .expect("status")
}

async fn asset_scans<B: BackendClient>(backend: &B, scan: &Scan) -> Vec<AssetScan> {
    backend
        .list(&Query::filtered(Filter::eq("scan/id", scan.id)))
        .await
        .expect("asset scans")
}

async fn force_state<B: BackendClient>(
    backend: &B,
    asset_scan: &AssetScan,
    state: AssetScanState,
    reason: AssetScanReason,
) {
    backend
        .patch::<AssetScan>(
            asset_scan.id,
            AssetScanPatch::status(AssetScanStatus::new(state, reason, None)),
        )
        .await
        .expect("force asset scan state");
}

async fn abort<B: BackendClient>(backend: &B, scan: &Scan) {
    backend
        .patch::<Scan>(
            scan.id,
            ScanPatch {
                status: Some(ScanStatus::new(ScanState::Aborted, ScanReason::Cancellation, None)),
                ..Default::default()
            },
        )
        .await
        .expect("abort scan");
}

/// Runs the scan through Pending and Discovered so that it owns one asset
/// scan per seeded asset.
async fn running_scan<B: BackendClient>(backend: &Arc<B>, watcher: &ScanWatcher<B>) -> Scan {
    let scan = backend
        .post(Scan::new(ScanTemplate::default()))
        .await
        .expect("post scan");
    let event = ScanReconcileEvent { scan_id: scan.id };
    watcher.reconcile(&event).await.expect("pending");
    watcher.reconcile(&event).await.expect("discovered");
    assert_eq!(scan_state(backend.as_ref(), &scan).await, ScanState::InProgress);
    backend.get::<Scan>(scan.id).await.expect("scan")
}

#[tokio::test]
async fn scan_runs_from_discovery_to_done() {
    let backend = Arc::new(InMemoryBackend::new());
    seed_asset(backend.as_ref(), "a", Utc::now()).await;
    seed_asset(backend.as_ref(), "b", Utc::now()).await;
    let provider = Arc::new(ScriptedProvider::new());
    let scans = ScanWatcher::new(Arc::clone(&backend), ScanWatcherConfig::default());
    let jobs = AssetScanWatcher::new(
        Arc::clone(&backend),
        Arc::clone(&provider),
        AssetScanWatcherConfig::default(),
    );

    let scan = running_scan(&backend, &scans).await;
    let created = asset_scans(backend.as_ref(), &scan).await;
    assert_eq!(created.len(), 2);
    assert!(created.iter().all(|asset_scan| {
        asset_scan.state() == Some(AssetScanState::Pending)
            && asset_scan.resource_cleanup_status.as_ref().map(|s| s.state)
                == Some(ResourceCleanupState::Pending)
    }));

    // Replaying Discovered must not duplicate asset scans.
    backend
        .patch::<Scan>(
            scan.id,
            ScanPatch {
                status: Some(ScanStatus::new(
                    ScanState::Discovered,
                    ScanReason::AssetsDiscovered,
                    None,
                )),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    scans
        .reconcile(&ScanReconcileEvent { scan_id: scan.id })
        .await
        .unwrap();
    assert_eq!(asset_scans(backend.as_ref(), &scan).await.len(), 2);

    for event in jobs.get_items().await.unwrap() {
        let err = jobs.reconcile(&event).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::RequeueAfter { .. }));
        jobs.reconcile(&event).await.unwrap();
    }
    assert_eq!(provider.started.lock().unwrap().len(), 2);

    let mut ready = asset_scans(backend.as_ref(), &scan).await;
    ready.sort_by_key(|asset_scan| asset_scan.id);
    assert!(ready.iter().all(|a| a.state() == Some(AssetScanState::ReadyToScan)));

    // The scanner reports progress itself.
    force_state(backend.as_ref(), &ready[0], AssetScanState::InProgress, AssetScanReason::ScannerIsRunning).await;
    force_state(backend.as_ref(), &ready[0], AssetScanState::Done, AssetScanReason::Success).await;
    scans
        .reconcile(&ScanReconcileEvent { scan_id: scan.id })
        .await
        .unwrap();
    let partial = backend.get::<Scan>(scan.id).await.unwrap();
    assert_eq!(partial.state(), Some(ScanState::InProgress));
    let summary = partial.summary.expect("summary");
    assert_eq!((summary.jobs_completed, summary.jobs_left_to_run), (1, 1));

    force_state(backend.as_ref(), &ready[1], AssetScanState::Failed, AssetScanReason::Error).await;
    scans
        .reconcile(&ScanReconcileEvent { scan_id: scan.id })
        .await
        .unwrap();
    let finished = backend.get::<Scan>(scan.id).await.unwrap();
    let status = finished.status.expect("status");
    assert_eq!(status.state, ScanState::Failed);
    assert_eq!(status.reason, ScanReason::Error);
    assert_eq!(
        status.message.as_deref(),
        Some("1 succeeded, 1 failed out of 2 total asset scans")
    );
    assert!(finished.end_time.is_some());

    // Finished asset scans release their resources.
    for asset_scan in &ready {
        jobs.reconcile(&AssetScanReconcileEvent {
            asset_scan_id: asset_scan.id,
            scan_id: Some(scan.id),
            asset_id: asset_scan.asset.id,
        })
        .await
        .unwrap();
    }
    assert_eq!(provider.removed.lock().unwrap().len(), 2);
    assert!(jobs.get_items().await.unwrap().is_empty());
}

#[tokio::test]
async fn scan_without_assets_is_done_immediately() {
    let backend = Arc::new(InMemoryBackend::new());
    let scans = ScanWatcher::new(Arc::clone(&backend), ScanWatcherConfig::default());
    let scan = backend.post(Scan::new(ScanTemplate::default())).await.unwrap();

    scans
        .reconcile(&ScanReconcileEvent { scan_id: scan.id })
        .await
        .unwrap();

    let stored = backend.get::<Scan>(scan.id).await.unwrap();
    let status = stored.status.expect("status");
    assert_eq!((status.state, status.reason), (ScanState::Done, ScanReason::NothingToScan));
    assert!(scans.get_items().await.unwrap().is_empty());
}

#[tokio::test]
async fn abort_leaves_finished_asset_scans_alone() {
    let backend = Arc::new(InMemoryBackend::new());
    seed_asset(backend.as_ref(), "a1", Utc::now()).await;
    seed_asset(backend.as_ref(), "a2", Utc::now()).await;
    let scans = ScanWatcher::new(Arc::clone(&backend), ScanWatcherConfig::default());
    let scan = running_scan(&backend, &scans).await;

    let mut children = asset_scans(backend.as_ref(), &scan).await;
    children.sort_by_key(|asset_scan| asset_scan.id);
    let (a1, a2) = (&children[0], &children[1]);
    for (state, reason) in [
        (AssetScanState::Scheduled, AssetScanReason::Provisioning),
        (AssetScanState::ReadyToScan, AssetScanReason::ResourcesReady),
        (AssetScanState::InProgress, AssetScanReason::ScannerIsRunning),
    ] {
        force_state(backend.as_ref(), a1, state, reason).await;
        force_state(backend.as_ref(), a2, state, reason).await;
    }
    force_state(backend.as_ref(), a2, AssetScanState::Done, AssetScanReason::Success).await;
    let a2_before = backend.get::<AssetScan>(a2.id).await.unwrap();

    abort(backend.as_ref(), &scan).await;
    scans
        .reconcile(&ScanReconcileEvent { scan_id: scan.id })
        .await
        .unwrap();

    let a1_after = backend.get::<AssetScan>(a1.id).await.unwrap();
    let status = a1_after.status.expect("status");
    assert_eq!((status.state, status.reason), (AssetScanState::Aborted, AssetScanReason::Cancellation));
    assert_eq!(backend.get::<AssetScan>(a2.id).await.unwrap(), a2_before);

    let stored = backend.get::<Scan>(scan.id).await.unwrap();
    let status = stored.status.expect("status");
    assert_eq!((status.state, status.reason), (ScanState::Failed, ScanReason::Cancellation));
}

#[tokio::test]
async fn partial_abort_failure_fails_the_cascade_until_healed() {
    let backend = Arc::new(FlakyBackend::new());
    for name in ["a", "b", "c"] {
        seed_asset(backend.as_ref(), name, Utc::now()).await;
    }
    let scans = ScanWatcher::new(Arc::clone(&backend), ScanWatcherConfig::default());
    let scan = running_scan(&backend, &scans).await;

    let mut children = asset_scans(backend.as_ref(), &scan).await;
    children.sort_by_key(|asset_scan| asset_scan.id);
    backend.fail_patches_for(children[1].id);

    abort(backend.as_ref(), &scan).await;
    let event = ScanReconcileEvent { scan_id: scan.id };
    let err = scans.reconcile(&event).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Aggregate(ref errors) if errors.len() == 1), "{err}");

    let states: Vec<_> = asset_scans(backend.as_ref(), &scan)
        .await
        .iter()
        .map(|asset_scan| (asset_scan.id, asset_scan.state()))
        .collect();
    for (id, state) in &states {
        let expected = if *id == children[1].id {
            AssetScanState::Pending
        } else {
            AssetScanState::Aborted
        };
        assert_eq!(*state, Some(expected));
    }
    assert_eq!(scan_state(backend.as_ref(), &scan).await, ScanState::Aborted);
    assert!(
        scans
            .get_items()
            .await
            .unwrap()
            .contains(&event),
        "aborted scan is picked up again"
    );

    backend.heal();
    scans.reconcile(&event).await.unwrap();
    assert!(
        asset_scans(backend.as_ref(), &scan)
            .await
            .iter()
            .all(|asset_scan| asset_scan.state() == Some(AssetScanState::Aborted))
    );
    assert_eq!(scan_state(backend.as_ref(), &scan).await, ScanState::Failed);
}

#[tokio::test]
async fn abort_without_failing_the_scan_keeps_it_aborted() {
    let backend = Arc::new(InMemoryBackend::new());
    seed_asset(backend.as_ref(), "a", Utc::now()).await;
    let config = ScanWatcherConfig {
        fail_scan_after_abort: false,
        ..Default::default()
    };
    let scans = ScanWatcher::new(Arc::clone(&backend), config);
    let scan = running_scan(&backend, &scans).await;

    abort(backend.as_ref(), &scan).await;
    scans
        .reconcile(&ScanReconcileEvent { scan_id: scan.id })
        .await
        .unwrap();

    assert_eq!(scan_state(backend.as_ref(), &scan).await, ScanState::Aborted);
    assert!(
        asset_scans(backend.as_ref(), &scan)
            .await
            .iter()
            .all(|asset_scan| asset_scan.state() == Some(AssetScanState::Aborted))
    );
}

#[tokio::test]
async fn timed_out_scan_fails() {
    let backend = Arc::new(InMemoryBackend::new());
    seed_asset(backend.as_ref(), "a", Utc::now()).await;
    let scans = ScanWatcher::new(Arc::clone(&backend), ScanWatcherConfig::default());
    let mut scan = Scan::new(ScanTemplate {
        timeout_seconds: Some(60),
        ..Default::default()
    });
    scan.start_time = Some(Utc::now() - chrono::TimeDelta::minutes(5));
    let scan = backend.post(scan).await.unwrap();

    scans
        .reconcile(&ScanReconcileEvent { scan_id: scan.id })
        .await
        .unwrap();

    let status = backend.get::<Scan>(scan.id).await.unwrap().status.expect("status");
    assert_eq!((status.state, status.reason), (ScanState::Failed, ScanReason::Timeout));
}
