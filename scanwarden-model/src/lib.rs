//! Core data model definitions shared across scanwarden crates.
//!
//! Field names serialize in camelCase so the slash-separated paths used by
//! [`Filter`] (`status/state`, `asset/id`, `findingInfo/objectType`) line up
//! with the wire representation the backend stores.
#![allow(missing_docs)]

pub mod asset;
pub mod asset_scan;
pub mod error;
pub mod estimation;
pub mod family;
pub mod filter;
pub mod finding;
pub mod ids;
pub mod provider;
pub mod scan;
pub mod status;

pub use asset::{
    Asset, AssetInfo, AssetPatch, AssetSummary, ContainerImageInfo,
    ContainerInfo, DirInfo, PodInfo, RootVolume, Tag, VmInfo,
    VulnerabilitySeveritySummary,
};
pub use asset_scan::{
    AssetScan, AssetScanPatch, AssetScanReason, AssetScanState,
    AssetScanStats, AssetScanStatus, InputScanStats, ResourceCleanupReason,
    ResourceCleanupState, ResourceCleanupStatus, ScanResults, ScanTime,
    ScannerReason, ScannerState, ScannerStatus,
};
pub use error::{ModelError, Result as ModelResult};
pub use estimation::{
    AssetScanEstimation, AssetScanEstimationPatch, AssetScanEstimationReason,
    AssetScanEstimationState, AssetScanEstimationStatus, CostBreakdownComponent,
    Estimation, ScanEstimation, ScanEstimationPatch, ScanEstimationReason,
    ScanEstimationState, ScanEstimationStatus, ScanEstimationSummary,
};
pub use family::{ScanFamiliesConfig, ScanFamily};
pub use filter::{CompareOp, Filter, Literal, OrderBy};
pub use finding::{
    Exploit, Finding, FindingInfo, FindingKind, FindingPatch, InfoFinderItem,
    Malware, Misconfiguration, Package, Rootkit, Secret, Vulnerability,
    VulnerabilitySeverity,
};
pub use ids::{
    AssetId, AssetScanEstimationId, AssetScanId, FindingId, ProviderId,
    Reference, ScanConfigId, ScanEstimationId, ScanId,
};
pub use provider::{ProviderKind, ProviderRecord, ProviderRecordPatch};
pub use scan::{
    AssetScanTemplate, FindingsSummary, RuntimeSchedule, Scan, ScanConfig, ScanConfigPatch,
    ScanPatch, ScanReason, ScanState, ScanStatus, ScanSummary, ScanTemplate,
};
pub use status::Status;
