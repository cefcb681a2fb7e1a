//! Orchestrator configuration types.
//!
//! These structures are shared between the config loader, the server binary
//! and tests, so every section carries defaults and a missing section in a
//! config file falls back to them.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Global knobs that tune orchestrator behaviour.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Scheduled scan configs that start new scans.
    pub scan_config_watcher: ScanConfigWatcherConfig,
    /// Scan lifecycle driver, including the abort cascade.
    pub scan_watcher: ScanWatcherConfig,
    /// Per-asset scan driver and resource cleanup.
    pub asset_scan_watcher: AssetScanWatcherConfig,
    /// Whole-scan estimation driver.
    pub scan_estimation_watcher: ScanEstimationWatcherConfig,
    /// Per-asset estimation driver and TTL garbage collection.
    pub asset_scan_estimation_watcher: AssetScanEstimationWatcherConfig,
    /// Scanner output to finding reconciliation.
    pub asset_scan_processor: AssetScanProcessorConfig,
    /// Periodic asset discovery.
    pub discovery: DiscoveryConfig,
    /// Grace period (seconds) for background tasks to exit on shutdown.
    pub shutdown_timeout_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            scan_config_watcher: ScanConfigWatcherConfig::default(),
            scan_watcher: ScanWatcherConfig::default(),
            asset_scan_watcher: AssetScanWatcherConfig::default(),
            scan_estimation_watcher: ScanEstimationWatcherConfig::default(),
            asset_scan_estimation_watcher: AssetScanEstimationWatcherConfig::default(),
            asset_scan_processor: AssetScanProcessorConfig::default(),
            discovery: DiscoveryConfig::default(),
            shutdown_timeout_secs: 30,
        }
    }
}

impl OrchestratorConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Poll cadence and per-item timeout shared by every watcher.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ControllerConfig {
    /// Interval (ms) between two `GetItems` calls.
    pub poll_period_ms: u64,
    /// Upper bound (ms) for one reconcile call.
    pub reconcile_timeout_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            poll_period_ms: 15_000,
            reconcile_timeout_ms: 5 * 60 * 1_000,
        }
    }
}

impl ControllerConfig {
    pub fn poll_period(&self) -> Duration {
        Duration::from_millis(self.poll_period_ms)
    }

    pub fn reconcile_timeout(&self) -> Duration {
        Duration::from_millis(self.reconcile_timeout_ms)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanWatcherConfig {
    #[serde(flatten)]
    pub controller: ControllerConfig,
    /// Scans running longer than this (seconds) fail with `Timeout`.
    pub scan_timeout_secs: u64,
    /// After every asset scan of an aborted scan is aborted, move the scan
    /// itself to `Failed/Cancellation`. When false the scan stays `Aborted`.
    pub fail_scan_after_abort: bool,
}

impl Default for ScanWatcherConfig {
    fn default() -> Self {
        Self {
            controller: ControllerConfig::default(),
            scan_timeout_secs: 48 * 60 * 60,
            fail_scan_after_abort: true,
        }
    }
}

impl ScanWatcherConfig {
    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_secs)
    }
}

/// When to release provider resources of a finished asset scan.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum DeleteJobPolicy {
    #[default]
    Always,
    OnSuccess,
    Never,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetScanWatcherConfig {
    #[serde(flatten)]
    pub controller: ControllerConfig,
    /// Aborted asset scans that stay aborted longer than this (seconds) are
    /// failed with `AbortTimeout`.
    pub abort_timeout_secs: u64,
    pub delete_policy: DeleteJobPolicy,
    /// Delay (ms) before re-presenting an asset scan that just moved to
    /// `Scheduled`, so provisioning starts without waiting a full poll period.
    pub scheduled_requeue_ms: u64,
}

impl Default for AssetScanWatcherConfig {
    fn default() -> Self {
        Self {
            controller: ControllerConfig::default(),
            abort_timeout_secs: 10 * 60,
            delete_policy: DeleteJobPolicy::Always,
            scheduled_requeue_ms: 1_000,
        }
    }
}

impl AssetScanWatcherConfig {
    pub fn abort_timeout(&self) -> Duration {
        Duration::from_secs(self.abort_timeout_secs)
    }

    pub fn scheduled_requeue(&self) -> Duration {
        Duration::from_millis(self.scheduled_requeue_ms)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanEstimationWatcherConfig {
    #[serde(flatten)]
    pub controller: ControllerConfig,
    pub estimation_timeout_secs: u64,
    /// TTL applied when an estimation does not carry its own.
    pub default_ttl_secs: u64,
}

impl Default for ScanEstimationWatcherConfig {
    fn default() -> Self {
        Self {
            controller: ControllerConfig::default(),
            estimation_timeout_secs: 24 * 60 * 60,
            default_ttl_secs: 24 * 60 * 60,
        }
    }
}

impl ScanEstimationWatcherConfig {
    pub fn estimation_timeout(&self) -> Duration {
        Duration::from_secs(self.estimation_timeout_secs)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ScanConfigWatcherConfig {
    #[serde(flatten)]
    pub controller: ControllerConfig,
}

impl ScanConfigWatcherConfig {
    /// Width of the window a scheduled operation counts as due in. Two poll
    /// periods so that every operation time falls in at least one window.
    pub fn schedule_window(&self) -> Duration {
        self.controller.poll_period() * 2
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetScanEstimationWatcherConfig {
    #[serde(flatten)]
    pub controller: ControllerConfig,
    pub default_ttl_secs: u64,
}

impl Default for AssetScanEstimationWatcherConfig {
    fn default() -> Self {
        Self {
            controller: ControllerConfig::default(),
            default_ttl_secs: 24 * 60 * 60,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AssetScanProcessorConfig {
    #[serde(flatten)]
    pub controller: ControllerConfig,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Interval (ms) between two discovery passes.
    pub interval_ms: u64,
    /// Skip discovery entirely, e.g. when another instance owns it.
    pub enabled: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            interval_ms: 2 * 60 * 1_000,
            enabled: true,
        }
    }
}

impl DiscoveryConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: OrchestratorConfig = serde_json::from_str(
            r#"{"scan_watcher": {"poll_period_ms": 500, "fail_scan_after_abort": false}}"#,
        )
        .unwrap();

        assert_eq!(config.scan_watcher.controller.poll_period(), Duration::from_millis(500));
        assert_eq!(
            config.scan_watcher.controller.reconcile_timeout(),
            ControllerConfig::default().reconcile_timeout()
        );
        assert!(!config.scan_watcher.fail_scan_after_abort);
        assert_eq!(config.asset_scan_watcher.delete_policy, DeleteJobPolicy::Always);
        assert!(config.discovery.enabled);
    }

    #[test]
    fn delete_policy_uses_camel_case() {
        let policy: DeleteJobPolicy = serde_json::from_str(r#""onSuccess""#).unwrap();
        assert_eq!(policy, DeleteJobPolicy::OnSuccess);
    }
}
