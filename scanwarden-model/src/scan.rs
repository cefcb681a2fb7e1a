use std::time::Duration;

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::asset::VulnerabilitySeveritySummary;
use crate::family::ScanFamiliesConfig;
use crate::filter::Filter;
use crate::ids::{AssetId, Reference, ScanConfigId, ScanId};
use crate::status::{Status, status_enum};

status_enum!(
    /// Lifecycle of a scan run.
    ScanState {
        Pending,
        Discovered,
        InProgress,
        Aborted,
        Failed,
        Done,
    }
);

status_enum!(ScanReason {
    Created,
    AssetsDiscovered,
    AssetScansRunning,
    Cancellation,
    Error,
    Timeout,
    NothingToScan,
    Success,
});

pub type ScanStatus = Status<ScanState, ScanReason>;

/// Per-asset settings copied into every asset scan a scan creates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AssetScanTemplate {
    pub families: ScanFamiliesConfig,
    pub scanner_instance_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScanTemplate {
    /// Extra asset filter, combined with the not-terminated check.
    pub asset_scope: Option<Filter>,
    pub max_parallel_scanners: Option<u32>,
    pub timeout_seconds: Option<u64>,
    pub asset_scan_template: AssetScanTemplate,
}

/// Totals of findings reported by scans, summed across families.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FindingsSummary {
    pub total_packages: u64,
    pub total_exploits: u64,
    pub total_malware: u64,
    pub total_misconfigurations: u64,
    pub total_rootkits: u64,
    pub total_secrets: u64,
    pub total_info_finder: u64,
    pub total_vulnerabilities: VulnerabilitySeveritySummary,
}

impl FindingsSummary {
    pub fn accumulate(&mut self, other: &FindingsSummary) {
        self.total_packages += other.total_packages;
        self.total_exploits += other.total_exploits;
        self.total_malware += other.total_malware;
        self.total_misconfigurations += other.total_misconfigurations;
        self.total_rootkits += other.total_rootkits;
        self.total_secrets += other.total_secrets;
        self.total_info_finder += other.total_info_finder;

        let mine = &mut self.total_vulnerabilities;
        let theirs = &other.total_vulnerabilities;
        mine.total_critical_vulnerabilities += theirs.total_critical_vulnerabilities;
        mine.total_high_vulnerabilities += theirs.total_high_vulnerabilities;
        mine.total_medium_vulnerabilities += theirs.total_medium_vulnerabilities;
        mine.total_low_vulnerabilities += theirs.total_low_vulnerabilities;
        mine.total_negligible_vulnerabilities +=
            theirs.total_negligible_vulnerabilities;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScanSummary {
    pub jobs_completed: u64,
    pub jobs_left_to_run: u64,
    pub findings: FindingsSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scan {
    pub id: ScanId,
    pub name: Option<String>,
    #[serde(default)]
    pub scan_config: Option<Reference<ScanConfigId>>,
    #[serde(default)]
    pub template: ScanTemplate,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: Option<ScanStatus>,
    #[serde(default)]
    pub asset_ids: Vec<AssetId>,
    #[serde(default)]
    pub summary: Option<ScanSummary>,
}

impl Scan {
    pub fn new(template: ScanTemplate) -> Self {
        Self {
            id: ScanId::new(),
            name: None,
            scan_config: None,
            template,
            start_time: Some(Utc::now()),
            end_time: None,
            status: Some(ScanStatus::new(ScanState::Pending, ScanReason::Created, None)),
            asset_ids: Vec::new(),
            summary: None,
        }
    }

    pub fn state(&self) -> Option<ScanState> {
        self.status.as_ref().map(|status| status.state)
    }

    /// A scan with a start time times out once `start_time + timeout` has
    /// passed. The template's own timeout takes precedence over `default`.
    pub fn is_timed_out(&self, default: Duration, now: DateTime<Utc>) -> bool {
        let Some(start) = self.start_time else {
            return false;
        };
        let timeout = self
            .template
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(default);
        let timeout = TimeDelta::from_std(timeout).unwrap_or(TimeDelta::MAX);
        start
            .checked_add_signed(timeout)
            .is_some_and(|deadline| deadline < now)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ScanStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_ids: Option<Vec<AssetId>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<ScanSummary>,
}

/// When a scan config starts its scans. A cron line makes the schedule
/// recurring; `operation_time` is the next planned start.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RuntimeSchedule {
    pub cron_line: Option<String>,
    pub operation_time: Option<DateTime<Utc>>,
}

impl RuntimeSchedule {
    pub fn is_empty(&self) -> bool {
        self.cron_line.is_none() && self.operation_time.is_none()
    }
}

/// Saved scan definition from which scans are started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanConfig {
    pub id: ScanConfigId,
    pub name: String,
    #[serde(default)]
    pub template: ScanTemplate,
    #[serde(default)]
    pub scheduled: Option<RuntimeSchedule>,
    #[serde(default)]
    pub disabled: bool,
}

impl ScanConfig {
    pub fn new(name: impl Into<String>, template: ScanTemplate, scheduled: RuntimeSchedule) -> Self {
        Self {
            id: ScanConfigId::new(),
            name: name.into(),
            template,
            scheduled: Some(scheduled),
            disabled: false,
        }
    }
}

impl Scan {
    /// A pending scan started by `config` at `now`.
    pub fn from_config(config: &ScanConfig, now: DateTime<Utc>) -> Self {
        Self {
            name: Some(format!(
                "{}-{}",
                config.name,
                now.to_rfc3339_opts(SecondsFormat::Secs, true)
            )),
            scan_config: Some(Reference::new(config.id)),
            start_time: Some(now),
            ..Self::new(config.template.clone())
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanConfigPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<ScanTemplate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled: Option<RuntimeSchedule>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disabled: Option<bool>,
}
