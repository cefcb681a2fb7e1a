use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::family::ScanFamily;
use crate::finding::{
    Exploit, InfoFinderItem, Malware, Misconfiguration, Package, Rootkit,
    Secret, Vulnerability,
};
use crate::ids::{AssetId, AssetScanId, Reference, ScanId};
use crate::scan::{AssetScanTemplate, FindingsSummary};
use crate::status::{Status, status_enum};

status_enum!(
    /// Lifecycle of a single per-asset scan job.
    AssetScanState {
        Pending,
        Scheduled,
        ReadyToScan,
        InProgress,
        Aborted,
        Failed,
        Done,
    }
);

status_enum!(AssetScanReason {
    Created,
    Provisioning,
    ResourcesReady,
    ScannerIsRunning,
    Cancellation,
    Error,
    Timeout,
    AbortTimeout,
    Success,
});

pub type AssetScanStatus = Status<AssetScanState, AssetScanReason>;

status_enum!(
    /// Lifecycle of the provider resources backing an asset scan.
    ResourceCleanupState {
        Pending,
        Skipped,
        Failed,
        Done,
    }
);

status_enum!(ResourceCleanupReason {
    AssetScanCreated,
    NotApplicable,
    DeletePolicy,
    ProviderError,
    UnsupportedProvider,
    Success,
});

pub type ResourceCleanupStatus = Status<ResourceCleanupState, ResourceCleanupReason>;

status_enum!(
    /// Progress of one scanner family inside an asset scan. Reported by the
    /// scanner itself.
    ScannerState {
        Pending,
        InProgress,
        Done,
        Failed,
        Skipped,
    }
);

status_enum!(ScannerReason {
    Scheduled,
    NotScheduled,
    Scanning,
    Success,
    Error,
});

pub type ScannerStatus = Status<ScannerState, ScannerReason>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScanTime {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

/// Statistics about one input a scanner family processed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InputScanStats {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub path: Option<String>,
    pub size: Option<i64>,
    pub scan_time: Option<ScanTime>,
}

/// Per-family input statistics, used as priors for estimations.
pub type AssetScanStats = BTreeMap<ScanFamily, Vec<InputScanStats>>;

/// Raw scanner output, one optional collection per family.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScanResults {
    pub packages: Option<Vec<Package>>,
    pub vulnerabilities: Option<Vec<Vulnerability>>,
    pub exploits: Option<Vec<Exploit>>,
    pub secrets: Option<Vec<Secret>>,
    pub misconfigurations: Option<Vec<Misconfiguration>>,
    pub rootkits: Option<Vec<Rootkit>>,
    pub malware: Option<Vec<Malware>>,
    pub info_finder: Option<Vec<InfoFinderItem>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetScan {
    pub id: AssetScanId,
    #[serde(default)]
    pub scan: Option<Reference<ScanId>>,
    pub asset: Reference<AssetId>,
    #[serde(default)]
    pub template: AssetScanTemplate,
    #[serde(default)]
    pub status: Option<AssetScanStatus>,
    #[serde(default)]
    pub resource_cleanup_status: Option<ResourceCleanupStatus>,
    #[serde(default)]
    pub scanners: BTreeMap<ScanFamily, ScannerStatus>,
    #[serde(default)]
    pub results: ScanResults,
    #[serde(default)]
    pub stats: AssetScanStats,
    #[serde(default)]
    pub summary: Option<FindingsSummary>,
    #[serde(default)]
    pub findings_processed: Option<bool>,
}

impl AssetScan {
    /// A pending asset scan with no scanner progress yet. Its resources are
    /// pending cleanup from the start.
    pub fn new(scan: Option<ScanId>, asset: AssetId, template: AssetScanTemplate) -> Self {
        Self {
            id: AssetScanId::new(),
            scan: scan.map(Reference::new),
            asset: Reference::new(asset),
            template,
            status: Some(AssetScanStatus::new(
                AssetScanState::Pending,
                AssetScanReason::Created,
                None,
            )),
            resource_cleanup_status: Some(ResourceCleanupStatus::new(
                ResourceCleanupState::Pending,
                ResourceCleanupReason::AssetScanCreated,
                None,
            )),
            scanners: BTreeMap::new(),
            results: ScanResults::default(),
            stats: AssetScanStats::new(),
            summary: None,
            findings_processed: None,
        }
    }

    pub fn state(&self) -> Option<AssetScanState> {
        self.status.as_ref().map(|status| status.state)
    }

    pub fn scanner_status(&self, family: ScanFamily) -> Option<&ScannerStatus> {
        self.scanners.get(&family)
    }

    pub fn family_completed(&self, family: ScanFamily) -> bool {
        self.scanner_status(family)
            .is_some_and(|status| status.state == ScannerState::Done)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetScanPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AssetScanStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_cleanup_status: Option<ResourceCleanupStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scanners: Option<BTreeMap<ScanFamily, ScannerStatus>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<ScanResults>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<AssetScanStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<FindingsSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub findings_processed: Option<bool>,
}

impl AssetScanPatch {
    pub fn status(status: AssetScanStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn resource_cleanup(status: ResourceCleanupStatus) -> Self {
        Self {
            resource_cleanup_status: Some(status),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_asset_scan_starts_pending_with_cleanup_pending() {
        let asset_scan = AssetScan::new(Some(ScanId::new()), AssetId::new(), AssetScanTemplate::default());

        assert_eq!(asset_scan.state(), Some(AssetScanState::Pending));
        let cleanup = asset_scan.resource_cleanup_status.expect("cleanup status");
        assert_eq!(
            (cleanup.state, cleanup.reason),
            (ResourceCleanupState::Pending, ResourceCleanupReason::AssetScanCreated)
        );
    }
}
