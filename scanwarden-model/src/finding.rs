use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{AssetId, AssetScanId, FindingId, Reference};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Package {
    pub name: String,
    pub version: String,
    pub purl: Option<String>,
    pub language: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub cpes: Vec<String>,
    pub licenses: Vec<String>,
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VulnerabilitySeverity {
    Critical,
    High,
    Medium,
    Low,
    #[default]
    Negligible,
}

impl VulnerabilitySeverity {
    pub const ALL: &'static [VulnerabilitySeverity] = &[
        VulnerabilitySeverity::Critical,
        VulnerabilitySeverity::High,
        VulnerabilitySeverity::Medium,
        VulnerabilitySeverity::Low,
        VulnerabilitySeverity::Negligible,
    ];

    /// Wire form, as stored under `findingInfo/severity`.
    pub fn as_str(&self) -> &'static str {
        match self {
            VulnerabilitySeverity::Critical => "CRITICAL",
            VulnerabilitySeverity::High => "HIGH",
            VulnerabilitySeverity::Medium => "MEDIUM",
            VulnerabilitySeverity::Low => "LOW",
            VulnerabilitySeverity::Negligible => "NEGLIGIBLE",
        }
    }
}

impl From<VulnerabilitySeverity> for crate::filter::Literal {
    fn from(value: VulnerabilitySeverity) -> Self {
        crate::filter::Literal::Str(value.as_str().to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Vulnerability {
    pub vulnerability_name: String,
    pub description: Option<String>,
    pub severity: VulnerabilitySeverity,
    pub package: Option<Package>,
    pub fix_versions: Vec<String>,
    pub links: Vec<String>,
    pub cvss_score: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Exploit {
    pub cve_id: String,
    pub name: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub source_db: String,
    pub urls: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Secret {
    pub fingerprint: String,
    pub description: Option<String>,
    pub file_path: Option<String>,
    pub start_line: Option<i64>,
    pub end_line: Option<i64>,
    pub start_column: Option<i64>,
    pub end_column: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Misconfiguration {
    pub scanner_name: String,
    pub test_id: String,
    pub message: String,
    pub category: Option<String>,
    pub severity: Option<String>,
    pub location: Option<String>,
    pub remediation: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Rootkit {
    pub rootkit_name: String,
    #[serde(rename = "rootkitType")]
    pub kind: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Malware {
    pub malware_name: String,
    #[serde(rename = "malwareType")]
    pub kind: Option<String>,
    pub path: Option<String>,
    pub rule_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InfoFinderItem {
    pub scanner_name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: String,
    pub path: Option<String>,
}

/// Family-specific payload of a finding, discriminated by `objectType`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "objectType")]
pub enum FindingInfo {
    Package(Package),
    Vulnerability(Vulnerability),
    Exploit(Exploit),
    Secret(Secret),
    Misconfiguration(Misconfiguration),
    Rootkit(Rootkit),
    Malware(Malware),
    InfoFinder(InfoFinderItem),
}

/// Discriminator of [`FindingInfo`], matching its serialized `objectType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FindingKind {
    Package,
    Vulnerability,
    Exploit,
    Secret,
    Misconfiguration,
    Rootkit,
    Malware,
    InfoFinder,
}

impl FindingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FindingKind::Package => "Package",
            FindingKind::Vulnerability => "Vulnerability",
            FindingKind::Exploit => "Exploit",
            FindingKind::Secret => "Secret",
            FindingKind::Misconfiguration => "Misconfiguration",
            FindingKind::Rootkit => "Rootkit",
            FindingKind::Malware => "Malware",
            FindingKind::InfoFinder => "InfoFinder",
        }
    }
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<FindingKind> for crate::filter::Literal {
    fn from(value: FindingKind) -> Self {
        crate::filter::Literal::Str(value.as_str().to_string())
    }
}

impl FindingInfo {
    pub fn kind(&self) -> FindingKind {
        match self {
            FindingInfo::Package(_) => FindingKind::Package,
            FindingInfo::Vulnerability(_) => FindingKind::Vulnerability,
            FindingInfo::Exploit(_) => FindingKind::Exploit,
            FindingInfo::Secret(_) => FindingKind::Secret,
            FindingInfo::Misconfiguration(_) => FindingKind::Misconfiguration,
            FindingInfo::Rootkit(_) => FindingKind::Rootkit,
            FindingInfo::Malware(_) => FindingKind::Malware,
            FindingInfo::InfoFinder(_) => FindingKind::InfoFinder,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub id: FindingId,
    #[serde(default)]
    pub asset: Option<Reference<AssetId>>,
    #[serde(default)]
    pub found_by: Option<Reference<AssetScanId>>,
    #[serde(default)]
    pub found_on: Option<DateTime<Utc>>,
    #[serde(default)]
    pub invalidated_on: Option<DateTime<Utc>>,
    pub finding_info: FindingInfo,
}

impl Finding {
    pub fn is_active(&self) -> bool {
        self.invalidated_on.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindingPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset: Option<Reference<AssetId>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub found_by: Option<Reference<AssetScanId>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub found_on: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalidated_on: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finding_info: Option<FindingInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finding_info_tag_matches_kind() {
        let info = FindingInfo::Secret(Secret {
            fingerprint: "abc".into(),
            ..Default::default()
        });
        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["objectType"], info.kind().as_str());
    }

    #[test]
    fn severities_use_upper_case_on_the_wire() {
        let value = serde_json::to_value(VulnerabilitySeverity::Critical).unwrap();
        assert_eq!(value, "CRITICAL");
    }
}
