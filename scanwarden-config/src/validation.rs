use std::collections::HashSet;

use scanwarden_core::config::{ControllerConfig, DeleteJobPolicy};
use scanwarden_core::watcher::schedule::parse_cron_line;
use thiserror::Error;

use crate::settings::Settings;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigGuardRailError {
    #[error("{section}.{field} must be greater than zero")]
    ZeroDuration {
        section: &'static str,
        field: &'static str,
    },
    #[error("provider.local.roots must list at least one directory")]
    NoLocalRoots,
    #[error("scan config {name:?}: maxParallelScanners must be greater than zero")]
    ZeroParallelScanners { name: String },
    #[error("scan config {name:?}: {message}")]
    InvalidCronLine { name: String, message: String },
    #[error("scan config {0:?} is listed more than once")]
    DuplicateScanConfig(String),
}

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push<S: Into<String>>(&mut self, message: S) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint<S: Into<String>, H: Into<String>>(&mut self, message: S, hint: H) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

fn non_zero(value: u64, section: &'static str, field: &'static str) -> Result<(), ConfigGuardRailError> {
    if value == 0 {
        return Err(ConfigGuardRailError::ZeroDuration { section, field });
    }
    Ok(())
}

fn controller(config: &ControllerConfig, section: &'static str) -> Result<(), ConfigGuardRailError> {
    non_zero(config.poll_period_ms, section, "poll_period_ms")?;
    non_zero(config.reconcile_timeout_ms, section, "reconcile_timeout_ms")
}

fn scan_configs(settings: &Settings, warnings: &mut ConfigWarnings) -> Result<(), ConfigGuardRailError> {
    let mut names = HashSet::new();
    for config in &settings.scan_configs {
        if !names.insert(config.name.as_str()) {
            return Err(ConfigGuardRailError::DuplicateScanConfig(config.name.clone()));
        }
        if config.template.max_parallel_scanners == Some(0) {
            return Err(ConfigGuardRailError::ZeroParallelScanners {
                name: config.name.clone(),
            });
        }
        if let Some(line) = &config.cron_line {
            parse_cron_line(line).map_err(|err| ConfigGuardRailError::InvalidCronLine {
                name: config.name.clone(),
                message: err.to_string(),
            })?;
        } else if config.operation_time.is_none() {
            warnings.push(format!(
                "scan config {:?} has no schedule and is disabled on the first poll",
                config.name
            ));
        }
    }
    Ok(())
}

pub(crate) fn validate(settings: &Settings) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let orchestrator = &settings.orchestrator;
    let mut warnings = ConfigWarnings::default();

    controller(&orchestrator.scan_config_watcher.controller, "scan_config_watcher")?;
    controller(&orchestrator.scan_watcher.controller, "scan_watcher")?;
    non_zero(orchestrator.scan_watcher.scan_timeout_secs, "scan_watcher", "scan_timeout_secs")?;

    controller(&orchestrator.asset_scan_watcher.controller, "asset_scan_watcher")?;
    non_zero(
        orchestrator.asset_scan_watcher.abort_timeout_secs,
        "asset_scan_watcher",
        "abort_timeout_secs",
    )?;

    controller(&orchestrator.scan_estimation_watcher.controller, "scan_estimation_watcher")?;
    non_zero(
        orchestrator.scan_estimation_watcher.estimation_timeout_secs,
        "scan_estimation_watcher",
        "estimation_timeout_secs",
    )?;

    controller(
        &orchestrator.asset_scan_estimation_watcher.controller,
        "asset_scan_estimation_watcher",
    )?;
    controller(&orchestrator.asset_scan_processor.controller, "asset_scan_processor")?;

    if orchestrator.discovery.enabled {
        non_zero(orchestrator.discovery.interval_ms, "discovery", "interval_ms")?;
    } else {
        warnings.push_with_hint(
            "asset discovery is disabled",
            "assets are only picked up if another instance runs discovery",
        );
    }
    non_zero(orchestrator.shutdown_timeout_secs, "orchestrator", "shutdown_timeout_secs")?;

    if settings.provider.local.roots.is_empty() {
        return Err(ConfigGuardRailError::NoLocalRoots);
    }

    scan_configs(settings, &mut warnings)?;

    if orchestrator.asset_scan_watcher.delete_policy == DeleteJobPolicy::Never {
        warnings.push("scan job resources are never released (delete_policy = never)");
    }
    for (section, ttl) in [
        ("scan_estimation_watcher", orchestrator.scan_estimation_watcher.default_ttl_secs),
        (
            "asset_scan_estimation_watcher",
            orchestrator.asset_scan_estimation_watcher.default_ttl_secs,
        ),
    ] {
        if ttl == 0 {
            warnings.push(format!(
                "{section}.default_ttl_secs is zero; finished estimations are deleted on the next poll"
            ));
        }
    }

    for warning in &warnings.items {
        tracing::warn!(target: "scanwarden::config", hint = ?warning.hint, "{}", warning.message);
    }
    Ok(warnings)
}
