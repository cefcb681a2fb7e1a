use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};
use crate::finding::VulnerabilitySeverity;
use crate::ids::AssetId;
use crate::provider::ProviderKind;

#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootVolume {
    pub size_gib: u64,
    pub encrypted: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VmInfo {
    pub instance_id: String,
    pub location: String,
    pub instance_provider: Option<ProviderKind>,
    pub instance_type: Option<String>,
    pub image: Option<String>,
    pub platform: Option<String>,
    pub launch_time: Option<DateTime<Utc>>,
    pub tags: Vec<Tag>,
    pub security_groups: Vec<String>,
    pub root_volume: Option<RootVolume>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ContainerImageInfo {
    pub image_id: String,
    pub repo_tags: Vec<String>,
    pub repo_digests: Vec<String>,
    pub labels: Vec<Tag>,
    pub architecture: Option<String>,
    pub os: Option<String>,
    pub size: Option<i64>,
}

impl ContainerImageInfo {
    /// Combines two observations of the same image.
    ///
    /// Tags, digests and labels are unioned and the larger reported size
    /// wins. The image ID must match, as must the OS and architecture when
    /// both sides report one.
    pub fn merge(&self, other: &ContainerImageInfo) -> Result<ContainerImageInfo> {
        if self.image_id != other.image_id {
            return Err(ModelError::MergeConflict {
                field: "imageID",
                left: self.image_id.clone(),
                right: other.image_id.clone(),
            });
        }

        let os = merge_matching("os", &self.os, &other.os)?;
        let architecture =
            merge_matching("architecture", &self.architecture, &other.architecture)?;

        let size = match (self.size, other.size) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };

        Ok(ContainerImageInfo {
            image_id: self.image_id.clone(),
            repo_tags: union(&self.repo_tags, &other.repo_tags),
            repo_digests: union(&self.repo_digests, &other.repo_digests),
            labels: union(&self.labels, &other.labels),
            architecture,
            os,
            size,
        })
    }
}

fn merge_matching(
    field: &'static str,
    left: &Option<String>,
    right: &Option<String>,
) -> Result<Option<String>> {
    match (left, right) {
        (Some(a), Some(b)) if a != b => Err(ModelError::MergeConflict {
            field,
            left: a.clone(),
            right: b.clone(),
        }),
        (Some(a), _) => Ok(Some(a.clone())),
        (None, b) => Ok(b.clone()),
    }
}

fn union<T: Ord + Clone>(left: &[T], right: &[T]) -> Vec<T> {
    left.iter()
        .chain(right.iter())
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ContainerInfo {
    pub container_id: String,
    pub container_name: Option<String>,
    pub location: Option<String>,
    pub image: Option<ContainerImageInfo>,
    pub labels: Vec<Tag>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PodInfo {
    pub pod_name: String,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DirInfo {
    pub dir_name: String,
    pub location: Option<String>,
}

/// Provider-reported description of an asset, discriminated by `objectType`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "objectType")]
pub enum AssetInfo {
    VirtualMachine(VmInfo),
    Container(ContainerInfo),
    ContainerImage(ContainerImageInfo),
    Pod(PodInfo),
    Dir(DirInfo),
}

impl AssetInfo {
    pub fn kind(&self) -> &'static str {
        match self {
            AssetInfo::VirtualMachine(_) => "VirtualMachine",
            AssetInfo::Container(_) => "Container",
            AssetInfo::ContainerImage(_) => "ContainerImage",
            AssetInfo::Pod(_) => "Pod",
            AssetInfo::Dir(_) => "Dir",
        }
    }

    /// Provider-defined identity. Two infos with the same identity describe
    /// the same asset.
    pub fn identity(&self) -> String {
        match self {
            AssetInfo::VirtualMachine(vm) => {
                format!("vm:{}:{}", vm.location, vm.instance_id)
            }
            AssetInfo::Container(container) => {
                format!("container:{}", container.container_id)
            }
            AssetInfo::ContainerImage(image) => format!("image:{}", image.image_id),
            AssetInfo::Pod(pod) => format!(
                "pod:{}:{}",
                pod.location.as_deref().unwrap_or_default(),
                pod.pod_name
            ),
            AssetInfo::Dir(dir) => format!(
                "dir:{}:{}",
                dir.location.as_deref().unwrap_or_default(),
                dir.dir_name
            ),
        }
    }

    /// Merges a fresh observation into the stored one.
    ///
    /// Container images are merged field by field; every other kind is
    /// replaced by the fresh observation.
    pub fn merge_observed(&self, observed: &AssetInfo) -> Result<AssetInfo> {
        match (self, observed) {
            (AssetInfo::ContainerImage(existing), AssetInfo::ContainerImage(fresh)) => {
                existing.merge(fresh).map(AssetInfo::ContainerImage)
            }
            (existing, fresh) if existing.kind() != fresh.kind() => {
                Err(ModelError::MergeConflict {
                    field: "objectType",
                    left: existing.kind().to_string(),
                    right: fresh.kind().to_string(),
                })
            }
            (_, fresh) => Ok(fresh.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VulnerabilitySeveritySummary {
    pub total_critical_vulnerabilities: u64,
    pub total_high_vulnerabilities: u64,
    pub total_medium_vulnerabilities: u64,
    pub total_low_vulnerabilities: u64,
    pub total_negligible_vulnerabilities: u64,
}

impl VulnerabilitySeveritySummary {
    pub fn total(&self) -> u64 {
        self.total_critical_vulnerabilities
            + self.total_high_vulnerabilities
            + self.total_medium_vulnerabilities
            + self.total_low_vulnerabilities
            + self.total_negligible_vulnerabilities
    }

    pub fn count_mut(&mut self, severity: VulnerabilitySeverity) -> &mut u64 {
        match severity {
            VulnerabilitySeverity::Critical => &mut self.total_critical_vulnerabilities,
            VulnerabilitySeverity::High => &mut self.total_high_vulnerabilities,
            VulnerabilitySeverity::Medium => &mut self.total_medium_vulnerabilities,
            VulnerabilitySeverity::Low => &mut self.total_low_vulnerabilities,
            VulnerabilitySeverity::Negligible => &mut self.total_negligible_vulnerabilities,
        }
    }
}

/// Aggregated counts of an asset's active findings. Fields are optional so a
/// patch can update one family without touching the others.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AssetSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_packages: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_exploits: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_malware: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_misconfigurations: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_rootkits: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_secrets: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_info_finder: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_vulnerabilities: Option<VulnerabilitySeveritySummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub id: AssetId,
    pub asset_info: AssetInfo,
    #[serde(default)]
    pub first_seen: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(default)]
    pub terminated_on: Option<DateTime<Utc>>,
    #[serde(default)]
    pub summary: Option<AssetSummary>,
}

impl Asset {
    pub fn discovered(asset_info: AssetInfo, seen: DateTime<Utc>) -> Self {
        Self {
            id: AssetId::new(),
            asset_info,
            first_seen: Some(seen),
            last_seen: Some(seen),
            terminated_on: None,
            summary: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_info: Option<AssetInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminated_on: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<AssetSummary>,
}
