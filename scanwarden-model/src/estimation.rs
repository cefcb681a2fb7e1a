use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{
    AssetId, AssetScanEstimationId, Reference, ScanEstimationId,
};
use crate::scan::{AssetScanTemplate, ScanTemplate};
use crate::status::{Status, status_enum};

status_enum!(
    /// Lifecycle of a whole-scan cost forecast.
    ScanEstimationState {
        Pending,
        Discovered,
        InProgress,
        Aborted,
        Failed,
        Done,
    }
);

status_enum!(ScanEstimationReason {
    Created,
    SuccessfulDiscovery,
    Running,
    Cancellation,
    Aborted,
    Error,
    Timeout,
    NothingToEstimate,
    Success,
});

pub type ScanEstimationStatus = Status<ScanEstimationState, ScanEstimationReason>;

status_enum!(
    /// Lifecycle of a single-asset cost forecast.
    AssetScanEstimationState {
        Pending,
        Aborted,
        Failed,
        Done,
    }
);

status_enum!(AssetScanEstimationReason {
    Created,
    Cancellation,
    Aborted,
    Error,
    Success,
});

pub type AssetScanEstimationStatus =
    Status<AssetScanEstimationState, AssetScanEstimationReason>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CostBreakdownComponent {
    pub operation: String,
    pub cost: f64,
}

/// Forecast returned by a provider for one asset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Estimation {
    pub cost: Option<f64>,
    /// Bytes to scan.
    pub size: Option<i64>,
    /// Seconds the scan is expected to take.
    pub duration: Option<i64>,
    pub cost_breakdown: Vec<CostBreakdownComponent>,
}

/// Time-to-live bookkeeping shared by both estimation entities.
fn delete_after(end_time: DateTime<Utc>, ttl_seconds: u64) -> DateTime<Utc> {
    let ttl = i64::try_from(ttl_seconds)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or(TimeDelta::MAX);
    end_time
        .checked_add_signed(ttl)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetScanEstimation {
    pub id: AssetScanEstimationId,
    pub asset: Reference<AssetId>,
    #[serde(default)]
    pub scan_estimation: Option<Reference<ScanEstimationId>>,
    #[serde(default)]
    pub asset_scan_template: Option<AssetScanTemplate>,
    #[serde(default)]
    pub estimation: Option<Estimation>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub delete_after: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ttl_seconds_after_finished: Option<u64>,
    #[serde(default)]
    pub status: Option<AssetScanEstimationStatus>,
}

impl AssetScanEstimation {
    pub fn state(&self) -> Option<AssetScanEstimationState> {
        self.status.as_ref().map(|status| status.state)
    }

    pub fn compute_delete_after(&self, end_time: DateTime<Utc>, default_ttl: u64) -> DateTime<Utc> {
        delete_after(
            end_time,
            self.ttl_seconds_after_finished.unwrap_or(default_ttl),
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetScanEstimationPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AssetScanEstimationStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimation: Option<Estimation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete_after: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_seconds_after_finished: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScanEstimationSummary {
    pub jobs_completed: u64,
    pub jobs_left_to_run: u64,
    pub total_scan_time: i64,
    pub total_scan_size: i64,
    pub total_scan_cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanEstimation {
    pub id: ScanEstimationId,
    #[serde(default)]
    pub scan_template: ScanTemplate,
    #[serde(default)]
    pub asset_ids: Vec<AssetId>,
    #[serde(default)]
    pub asset_scan_estimations: Vec<Reference<AssetScanEstimationId>>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub delete_after: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ttl_seconds_after_finished: Option<u64>,
    #[serde(default)]
    pub status: Option<ScanEstimationStatus>,
    #[serde(default)]
    pub summary: Option<ScanEstimationSummary>,
}

impl ScanEstimation {
    pub fn new(scan_template: ScanTemplate) -> Self {
        Self {
            id: ScanEstimationId::new(),
            scan_template,
            asset_ids: Vec::new(),
            asset_scan_estimations: Vec::new(),
            start_time: None,
            end_time: None,
            delete_after: None,
            ttl_seconds_after_finished: None,
            status: None,
            summary: None,
        }
    }

    pub fn state(&self) -> Option<ScanEstimationState> {
        self.status.as_ref().map(|status| status.state)
    }

    pub fn compute_delete_after(&self, end_time: DateTime<Utc>, default_ttl: u64) -> DateTime<Utc> {
        delete_after(
            end_time,
            self.ttl_seconds_after_finished.unwrap_or(default_ttl),
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanEstimationPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ScanEstimationStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_ids: Option<Vec<AssetId>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_scan_estimations: Option<Vec<Reference<AssetScanEstimationId>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete_after: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_seconds_after_finished: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<ScanEstimationSummary>,
}
