use std::{
    env, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use scanwarden_core::OrchestratorConfig;
use scanwarden_model::{RuntimeSchedule, ScanConfig, ScanTemplate};

use crate::validation::{self, ConfigGuardRailError, ConfigWarnings};

/// Environment variable naming a TOML or JSON settings file.
pub const CONFIG_PATH_ENV: &str = "SCANWARDEN_CONFIG_PATH";
/// Environment variable carrying the settings as inline JSON.
pub const CONFIG_JSON_ENV: &str = "SCANWARDEN_CONFIG_JSON";

const CANDIDATES: &[&str] = &[
    "scanwarden.toml",
    "scanwarden.json",
    "config/scanwarden.toml",
    "config/scanwarden.json",
];

/// Source that produced the settings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SettingsSource {
    #[default]
    Default,
    EnvPath(PathBuf),
    EnvInline,
    File(PathBuf),
}

/// Directories the local provider reports as assets.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LocalProviderSettings {
    /// Every immediate subdirectory of a root becomes one `Dir` asset.
    pub roots: Vec<PathBuf>,
    /// Location recorded on discovered assets. Defaults to the host name
    /// when unset.
    pub location: Option<String>,
}

impl Default for LocalProviderSettings {
    fn default() -> Self {
        Self {
            roots: vec![PathBuf::from(".")],
            location: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// Name under which the provider registers with the backend.
    pub display_name: Option<String>,
    pub local: LocalProviderSettings,
}

/// A scan config created in the backend when the server starts.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ScanConfigSettings {
    pub name: String,
    /// Five-field cron, or six fields ending in a year, or seven fields
    /// starting with seconds.
    #[serde(default)]
    pub cron_line: Option<String>,
    #[serde(default)]
    pub operation_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub template: ScanTemplate,
}

impl ScanConfigSettings {
    pub fn to_scan_config(&self) -> ScanConfig {
        ScanConfig::new(
            self.name.clone(),
            self.template.clone(),
            RuntimeSchedule {
                cron_line: self.cron_line.clone(),
                operation_time: self.operation_time,
            },
        )
    }
}

/// Top-level settings of a scanwarden deployment.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Poll cadences, timeouts, TTLs and policies of every control loop.
    pub orchestrator: OrchestratorConfig,
    pub provider: ProviderSettings,
    pub scan_configs: Vec<ScanConfigSettings>,
}

impl Settings {
    /// Load settings using the process environment and working directory.
    /// Evaluation order:
    /// 1) `$SCANWARDEN_CONFIG_PATH` (TOML or JSON file),
    /// 2) `$SCANWARDEN_CONFIG_JSON` (inline JSON),
    /// 3) the first existing default file,
    /// 4) defaults.
    pub fn load_from_env() -> anyhow::Result<(Self, SettingsSource)> {
        Self::load_with(|key| env::var(key).ok(), Path::new("."))
    }

    /// Same resolution as [`Settings::load_from_env`] with an explicit
    /// variable lookup and base directory for the default file candidates.
    pub fn load_with<F>(lookup: F, base_dir: &Path) -> anyhow::Result<(Self, SettingsSource)>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path_str) = lookup(CONFIG_PATH_ENV)
            && !path_str.trim().is_empty()
        {
            let path = PathBuf::from(path_str);
            let settings = Self::load_from_file(&path)?;
            return Ok((settings, SettingsSource::EnvPath(path)));
        }

        if let Some(raw) = lookup(CONFIG_JSON_ENV)
            && !raw.trim().is_empty()
        {
            let parsed =
                Self::parse_json(&raw).with_context(|| format!("failed to parse {CONFIG_JSON_ENV}"))?;
            return Ok((parsed, SettingsSource::EnvInline));
        }

        if let Some(path) = Self::find_default_file(base_dir) {
            let settings = Self::load_from_file(&path)?;
            return Ok((settings, SettingsSource::File(path)));
        }

        Ok((Self::default(), SettingsSource::Default))
    }

    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings from {}", path.display()))?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::parse_json(&contents)
                .with_context(|| format!("invalid settings {}", path.display())),
            Some("toml") | Some("tml") => toml::from_str(&contents)
                .map_err(|err| anyhow!("invalid settings {}: {}", path.display(), err)),
            _ => Self::parse_from_str(&contents, &path.display().to_string()),
        }
    }

    pub fn parse_from_str(contents: &str, origin: &str) -> anyhow::Result<Self> {
        // TOML first, then JSON.
        toml::from_str(contents).or_else(|toml_err| {
            serde_json::from_str(contents).map_err(|json_err| {
                anyhow!(
                    "failed to parse settings {}: toml error: {}; json error: {}",
                    origin,
                    toml_err,
                    json_err
                )
            })
        })
    }

    pub fn parse_json(raw: &str) -> anyhow::Result<Self> {
        serde_json::from_str(raw).map_err(|err| anyhow!("invalid settings json: {err}"))
    }

    /// Checks the guard rails and collects non-fatal warnings.
    pub fn validate(&self) -> Result<ConfigWarnings, ConfigGuardRailError> {
        validation::validate(self)
    }

    fn find_default_file(base_dir: &Path) -> Option<PathBuf> {
        CANDIDATES
            .iter()
            .map(|candidate| base_dir.join(candidate))
            .find(|path| path.exists())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use scanwarden_core::config::DeleteJobPolicy;
    use tempfile::tempdir;

    use super::*;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn falls_back_to_defaults_without_any_source() {
        let dir = tempdir().unwrap();
        let (settings, source) = Settings::load_with(env_of(&[]), dir.path()).unwrap();
        assert_eq!(source, SettingsSource::Default);
        assert_eq!(settings.provider, ProviderSettings::default());
        assert!(settings.orchestrator.scan_watcher.fail_scan_after_abort);
    }

    #[test]
    fn path_variable_wins_over_inline_json_and_files() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("scanwarden.toml"),
            "[orchestrator]\nshutdown_timeout_secs = 1\n",
        )
        .unwrap();
        let explicit = dir.path().join("explicit.json");
        fs::write(
            &explicit,
            r#"{"orchestrator": {"shutdown_timeout_secs": 7}}"#,
        )
        .unwrap();
        let explicit_str = explicit.display().to_string();

        let (settings, source) = Settings::load_with(
            env_of(&[
                (CONFIG_PATH_ENV, explicit_str.as_str()),
                (CONFIG_JSON_ENV, r#"{"orchestrator": {"shutdown_timeout_secs": 3}}"#),
            ]),
            dir.path(),
        )
        .unwrap();
        assert_eq!(source, SettingsSource::EnvPath(explicit));
        assert_eq!(settings.orchestrator.shutdown_timeout_secs, 7);
    }

    #[test]
    fn inline_json_wins_over_default_files() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("scanwarden.toml"),
            "[orchestrator]\nshutdown_timeout_secs = 1\n",
        )
        .unwrap();

        let (settings, source) = Settings::load_with(
            env_of(&[
                (CONFIG_PATH_ENV, "  "),
                (CONFIG_JSON_ENV, r#"{"provider": {"display_name": "edge"}}"#),
            ]),
            dir.path(),
        )
        .unwrap();
        assert_eq!(source, SettingsSource::EnvInline);
        assert_eq!(settings.provider.display_name.as_deref(), Some("edge"));
        assert_eq!(settings.orchestrator.shutdown_timeout_secs, 30);
    }

    #[test]
    fn default_file_candidates_are_tried_in_order() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("config")).unwrap();
        fs::write(
            dir.path().join("config/scanwarden.json"),
            r#"{"provider": {"local": {"roots": ["/srv"]}}}"#,
        )
        .unwrap();

        let (settings, source) = Settings::load_with(env_of(&[]), dir.path()).unwrap();
        assert_eq!(source, SettingsSource::File(dir.path().join("config/scanwarden.json")));
        assert_eq!(settings.provider.local.roots, vec![PathBuf::from("/srv")]);

        fs::write(
            dir.path().join("scanwarden.json"),
            r#"{"provider": {"local": {"roots": ["/data"]}}}"#,
        )
        .unwrap();
        let (settings, source) = Settings::load_with(env_of(&[]), dir.path()).unwrap();
        assert_eq!(source, SettingsSource::File(dir.path().join("scanwarden.json")));
        assert_eq!(settings.provider.local.roots, vec![PathBuf::from("/data")]);
    }

    #[test]
    fn toml_sections_override_nested_defaults() {
        let settings = Settings::parse_from_str(
            r#"
[orchestrator.scan_watcher]
poll_period_ms = 250
fail_scan_after_abort = false

[orchestrator.asset_scan_watcher]
delete_policy = "onSuccess"

[provider.local]
roots = ["/var/lib/images"]
location = "rack-7"
"#,
            "inline",
        )
        .unwrap();

        let scan_watcher = settings.orchestrator.scan_watcher;
        assert_eq!(scan_watcher.controller.poll_period_ms, 250);
        assert!(!scan_watcher.fail_scan_after_abort);
        assert_eq!(
            settings.orchestrator.asset_scan_watcher.delete_policy,
            DeleteJobPolicy::OnSuccess
        );
        assert_eq!(settings.provider.local.location.as_deref(), Some("rack-7"));
        assert!(settings.orchestrator.discovery.enabled);
    }

    #[test]
    fn scan_configs_are_read_from_toml() {
        let settings = Settings::parse_from_str(
            r#"
[[scan_configs]]
name = "nightly"
cron_line = "0 2 * * *"

[scan_configs.template]
maxParallelScanners = 4
timeoutSeconds = 3600

[[scan_configs]]
name = "once"
operation_time = "2024-05-17T11:00:00Z"
"#,
            "inline",
        )
        .unwrap();

        assert_eq!(settings.scan_configs.len(), 2);
        let nightly = settings.scan_configs[0].to_scan_config();
        assert_eq!(nightly.name, "nightly");
        assert_eq!(nightly.template.max_parallel_scanners, Some(4));
        assert_eq!(
            nightly.scheduled.and_then(|scheduled| scheduled.cron_line).as_deref(),
            Some("0 2 * * *")
        );
        assert!(!nightly.disabled);

        let once = &settings.scan_configs[1];
        assert!(once.cron_line.is_none());
        assert_eq!(
            once.operation_time.map(|time| time.to_rfc3339()),
            Some("2024-05-17T11:00:00+00:00".to_string())
        );
    }

    #[test]
    fn unreadable_explicit_path_is_an_error() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        let missing_str = missing.display().to_string();
        let err = Settings::load_with(env_of(&[(CONFIG_PATH_ENV, missing_str.as_str())]), dir.path())
            .unwrap_err();
        assert!(err.to_string().contains("failed to read settings"));
    }

    #[test]
    fn garbage_reports_both_parsers() {
        let err = Settings::parse_from_str("{not valid", "stdin").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("toml error"));
        assert!(message.contains("json error"));
    }
}
