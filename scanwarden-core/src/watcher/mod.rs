//! Controllers that drive one entity type each toward convergence.

mod asset_scan;
mod asset_scan_estimation;
mod scan;
mod scan_config;
mod scan_estimation;
pub mod schedule;

pub use asset_scan::{AssetScanReconcileEvent, AssetScanWatcher};
pub use asset_scan_estimation::{AssetScanEstimationReconcileEvent, AssetScanEstimationWatcher};
pub use scan::{ScanReconcileEvent, ScanWatcher};
pub use scan_config::{ScanConfigReconcileEvent, ScanConfigWatcher};
pub use scan_estimation::{ScanEstimationReconcileEvent, ScanEstimationWatcher};
