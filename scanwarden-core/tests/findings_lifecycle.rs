use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};

use scanwarden_core::backend::{BackendClient, Query};
use scanwarden_core::config::AssetScanProcessorConfig;
use scanwarden_core::findings::{AssetScanProcessEvent, AssetScanProcessor};
use scanwarden_core::reconcile::{PollSource, Reconcile};
use scanwarden_core::InMemoryBackend;
use scanwarden_model::{
    Asset, AssetId, AssetScan, AssetScanPatch, AssetScanReason, AssetScanState, AssetScanStatus,
    AssetScanTemplate, Filter, Finding, FindingInfo, Package, ScanFamily, ScanResults,
    ScannerReason, ScannerState, ScannerStatus, Vulnerability, VulnerabilitySeverity,
};

mod support;

use support::seed_asset;

fn package(name: &str, version: &str) -> Package {
    Package {
        name: name.into(),
        version: version.into(),
        ..Default::default()
    }
}

fn vulnerability(name: &str, on: Package, severity: VulnerabilitySeverity) -> Vulnerability {
    Vulnerability {
        vulnerability_name: name.into(),
        severity,
        package: Some(on),
        ..Default::default()
    }
}

fn finished_scan(asset_id: AssetId, completed: DateTime<Utc>, results: ScanResults) -> AssetScan {
    let mut asset_scan = AssetScan::new(None, asset_id, AssetScanTemplate::default());
    let mut status = AssetScanStatus::new(AssetScanState::Done, AssetScanReason::Success, None);
    status.last_transition_time = completed;
    asset_scan.status = Some(status);
    for family in [ScanFamily::Sbom, ScanFamily::Vulnerabilities] {
        asset_scan.scanners.insert(
            family,
            ScannerStatus::new(ScannerState::Done, ScannerReason::Success, None),
        );
    }
    asset_scan.results = results;
    asset_scan.findings_processed = Some(false);
    asset_scan
}

async fn process(processor: &AssetScanProcessor<InMemoryBackend>, asset_scan: &AssetScan) {
    processor
        .reconcile(&AssetScanProcessEvent {
            asset_scan_id: asset_scan.id,
            asset_id: asset_scan.asset.id,
        })
        .await
        .expect("process asset scan");
}

async fn findings_of(backend: &InMemoryBackend, asset_scan: &AssetScan) -> Vec<Finding> {
    let mut findings: Vec<Finding> = backend
        .list(&Query::filtered(Filter::eq("foundBy/id", asset_scan.id)))
        .await
        .expect("findings");
    findings.sort_by_key(|finding| finding.id);
    findings
}

fn vulnerability_name(finding: &Finding) -> Option<&str> {
    match &finding.finding_info {
        FindingInfo::Vulnerability(vuln) => Some(vuln.vulnerability_name.as_str()),
        _ => None,
    }
}

#[tokio::test]
async fn reprocessing_an_asset_scan_changes_nothing() {
    let backend = Arc::new(InMemoryBackend::new());
    let asset = seed_asset(backend.as_ref(), "app", Utc::now()).await;
    let openssl = package("openssl", "3.0.1");
    let results = ScanResults {
        packages: Some(vec![openssl.clone()]),
        vulnerabilities: Some(vec![
            vulnerability("CVE-1", openssl.clone(), VulnerabilitySeverity::Critical),
            vulnerability("CVE-1", openssl.clone(), VulnerabilitySeverity::Critical),
        ]),
        ..Default::default()
    };
    let asset_scan = backend
        .post(finished_scan(asset.id, Utc::now() - TimeDelta::minutes(1), results))
        .await
        .unwrap();
    let processor = AssetScanProcessor::new(Arc::clone(&backend), AssetScanProcessorConfig::default());

    process(&processor, &asset_scan).await;
    let first = findings_of(&backend, &asset_scan).await;
    assert_eq!(first.len(), 2, "one package and one deduplicated vulnerability");

    // Simulate a crash after findings were written but before the flag was
    // committed.
    backend
        .patch::<AssetScan>(
            asset_scan.id,
            AssetScanPatch {
                findings_processed: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(processor.get_items().await.unwrap().len(), 1);
    process(&processor, &asset_scan).await;

    assert_eq!(findings_of(&backend, &asset_scan).await, first);
    assert_eq!(backend.len::<Finding>(), 2);

    let summary = backend
        .get::<Asset>(asset.id)
        .await
        .unwrap()
        .summary
        .expect("asset summary");
    assert_eq!(summary.total_packages, Some(1));
    assert_eq!(
        summary
            .total_vulnerabilities
            .map(|severities| severities.total_critical_vulnerabilities),
        Some(1)
    );
}

async fn run_out_of_order(newer_first: bool) -> (Vec<Finding>, Vec<Finding>, Asset, DateTime<Utc>) {
    let backend = Arc::new(InMemoryBackend::new());
    let asset = seed_asset(backend.as_ref(), "svc", Utc::now()).await;
    let processor = AssetScanProcessor::new(Arc::clone(&backend), AssetScanProcessorConfig::default());

    let libc = package("libc", "2.0");
    let t1 = Utc::now() - TimeDelta::hours(2);
    let t2 = t1 + TimeDelta::hours(1);
    let older = backend
        .post(finished_scan(
            asset.id,
            t1,
            ScanResults {
                packages: Some(vec![libc.clone()]),
                vulnerabilities: Some(vec![
                    vulnerability("CVE-OLD", libc.clone(), VulnerabilitySeverity::High),
                    vulnerability("CVE-KEPT", libc.clone(), VulnerabilitySeverity::Low),
                ]),
                ..Default::default()
            },
        ))
        .await
        .unwrap();
    let newer = backend
        .post(finished_scan(
            asset.id,
            t2,
            ScanResults {
                packages: Some(vec![libc.clone()]),
                vulnerabilities: Some(vec![vulnerability(
                    "CVE-KEPT",
                    libc.clone(),
                    VulnerabilitySeverity::Low,
                )]),
                ..Default::default()
            },
        ))
        .await
        .unwrap();

    if newer_first {
        process(&processor, &newer).await;
        process(&processor, &older).await;
    } else {
        process(&processor, &older).await;
        process(&processor, &newer).await;
    }

    let asset = backend.get::<Asset>(asset.id).await.unwrap();
    (
        findings_of(&backend, &older).await,
        findings_of(&backend, &newer).await,
        asset,
        t2,
    )
}

#[tokio::test]
async fn processing_order_does_not_change_the_outcome() {
    for newer_first in [false, true] {
        let (older, newer, asset, t2) = run_out_of_order(newer_first).await;

        assert_eq!(older.len(), 3, "newer_first={newer_first}");
        assert!(
            older.iter().all(|finding| finding.invalidated_on == Some(t2)),
            "newer_first={newer_first}: every finding of the older scan is superseded at t2"
        );

        assert_eq!(newer.len(), 2);
        assert!(newer.iter().all(Finding::is_active));
        let names: Vec<_> = newer.iter().filter_map(vulnerability_name).collect();
        assert_eq!(names, ["CVE-KEPT"]);

        let summary = asset.summary.expect("asset summary");
        assert_eq!(summary.total_packages, Some(1));
        let severities = summary.total_vulnerabilities.expect("vulnerability summary");
        assert_eq!(severities.total_low_vulnerabilities, 1);
        assert_eq!(severities.total_high_vulnerabilities, 0);
    }
}

#[tokio::test]
async fn empty_newer_scan_still_supersedes_an_older_one() {
    let backend = Arc::new(InMemoryBackend::new());
    let asset = seed_asset(backend.as_ref(), "batch", Utc::now()).await;
    let processor = AssetScanProcessor::new(Arc::clone(&backend), AssetScanProcessorConfig::default());
    let t1 = Utc::now() - TimeDelta::hours(2);
    let t2 = t1 + TimeDelta::hours(1);

    let older = backend
        .post(finished_scan(
            asset.id,
            t1,
            ScanResults {
                packages: Some(vec![package("zlib", "1.2")]),
                ..Default::default()
            },
        ))
        .await
        .unwrap();
    let newer = backend
        .post(finished_scan(asset.id, t2, ScanResults::default()))
        .await
        .unwrap();

    process(&processor, &newer).await;
    process(&processor, &older).await;

    let findings = findings_of(&backend, &older).await;
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].invalidated_on, Some(t2));
    let summary = backend.get::<Asset>(asset.id).await.unwrap().summary.expect("summary");
    assert_eq!(summary.total_packages, Some(0));
}
