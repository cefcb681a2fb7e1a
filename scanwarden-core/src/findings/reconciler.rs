use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use scanwarden_model::{
    Asset, AssetId, AssetPatch, AssetScan, AssetScanId, AssetSummary, Filter, Finding, FindingId,
    FindingInfo, FindingKind, FindingPatch, OrderBy, Reference, ScannerState,
    VulnerabilitySeverity, VulnerabilitySeveritySummary,
};

use crate::backend::{BackendClient, Query};
use crate::error::{OrchestratorError, Result};

use super::NaturalKey;
use super::source_families;

/// What one family pass did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FamilyOutcome {
    pub kind: FindingKind,
    /// Distinct natural keys reported by the scan.
    pub found: u64,
    pub created: u64,
    pub updated: u64,
    /// Older findings retired by this scan.
    pub invalidated: u64,
    /// Per-severity split of `found`; only set for vulnerabilities.
    pub severities: VulnerabilitySeveritySummary,
}

/// Upserts one family of findings for one finished asset scan.
///
/// A pass is idempotent: findings already recorded for the same asset scan
/// are matched by natural key and patched in place. Invalidation is derived
/// from completion timestamps only, so scans processed out of order end up in
/// the same state as scans processed in order.
pub struct FindingReconciler<B> {
    backend: Arc<B>,
}

impl<B> fmt::Debug for FindingReconciler<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FindingReconciler").finish_non_exhaustive()
    }
}

impl FamilyOutcome {
    pub fn empty(kind: FindingKind) -> Self {
        Self {
            kind,
            found: 0,
            created: 0,
            updated: 0,
            invalidated: 0,
            severities: VulnerabilitySeveritySummary::default(),
        }
    }
}

fn kind_filter(kind: FindingKind) -> Filter {
    Filter::eq("findingInfo/objectType", kind)
}

impl<B: BackendClient> FindingReconciler<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    pub async fn reconcile(
        &self,
        asset_scan: &AssetScan,
        kind: FindingKind,
        infos: Vec<FindingInfo>,
    ) -> Result<FamilyOutcome> {
        let completed = asset_scan
            .status
            .as_ref()
            .map(|status| status.last_transition_time)
            .ok_or_else(|| {
                OrchestratorError::InvalidEntity(format!("AssetScan {} has no status", asset_scan.id))
            })?;
        let asset_id = asset_scan.asset.id;

        let superseded_at = self
            .superseded_at(asset_scan.id, asset_id, kind, completed)
            .await?;
        let existing = self.recorded_by(asset_scan.id, kind).await?;

        let mut outcome = FamilyOutcome::empty(kind);
        let mut seen = HashSet::new();
        for info in infos {
            if info.kind() != kind {
                return Err(OrchestratorError::InvalidEntity(format!(
                    "{} finding passed to {kind} reconciliation",
                    info.kind()
                )));
            }
            let key = NaturalKey::of(&info);
            if !seen.insert(key.clone()) {
                tracing::trace!(target: "scan::findings", asset_scan_id = %asset_scan.id, %kind, %key, "duplicate finding in scan results");
                continue;
            }

            outcome.found += 1;
            if let FindingInfo::Vulnerability(vuln) = &info {
                *outcome.severities.count_mut(vuln.severity) += 1;
            }

            match existing.get(&key) {
                Some(&finding_id) => {
                    self.backend
                        .patch::<Finding>(
                            finding_id,
                            FindingPatch {
                                asset: Some(Reference::new(asset_id)),
                                found_by: Some(Reference::new(asset_scan.id)),
                                found_on: Some(completed),
                                invalidated_on: superseded_at,
                                finding_info: Some(info),
                            },
                        )
                        .await?;
                    outcome.updated += 1;
                }
                None => {
                    self.backend
                        .post(Finding {
                            id: FindingId::new(),
                            asset: Some(Reference::new(asset_id)),
                            found_by: Some(Reference::new(asset_scan.id)),
                            found_on: Some(completed),
                            invalidated_on: superseded_at,
                            finding_info: info,
                        })
                        .await?;
                    outcome.created += 1;
                }
            }
        }

        outcome.invalidated = self.invalidate_older(asset_id, kind, completed).await?;
        self.update_asset_summary(asset_id, kind).await?;

        tracing::debug!(
            target: "scan::findings",
            asset_scan_id = %asset_scan.id,
            asset_id = %asset_id,
            %kind,
            found = outcome.found,
            created = outcome.created,
            updated = outcome.updated,
            invalidated = outcome.invalidated,
            superseded = superseded_at.is_some(),
            "findings reconciled"
        );
        Ok(outcome)
    }

    /// Earliest point after `completed` at which a newer scan of the same
    /// asset reported this family: either through a finding it recorded or
    /// through a completed, processed asset scan. `None` when this scan is
    /// the newest.
    async fn superseded_at(
        &self,
        asset_scan_id: AssetScanId,
        asset_id: AssetId,
        kind: FindingKind,
        completed: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        let newer_finding = Query::filtered(Filter::all([
            kind_filter(kind),
            Filter::eq("asset/id", asset_id),
            Filter::gt("foundOn", completed),
        ]))
        .select(["id", "foundOn"])
        .order_by(OrderBy::asc("foundOn"))
        .top(1);
        let from_findings = self
            .backend
            .first::<Finding>(newer_finding)
            .await?
            .and_then(|finding| finding.found_on);

        let family_done = Filter::any(source_families(kind).iter().map(|family| {
            Filter::eq(format!("scanners/{}/state", family.as_str()), ScannerState::Done)
        }));
        let newer_scan = Query::filtered(Filter::all([
            Filter::eq("asset/id", asset_id),
            Filter::ne("id", asset_scan_id),
            Filter::eq("findingsProcessed", true),
            Filter::gt("status/lastTransitionTime", completed),
            family_done,
        ]))
        .select(["id", "status"])
        .order_by(OrderBy::asc("status/lastTransitionTime"))
        .top(1);
        let from_scans = self
            .backend
            .first::<AssetScan>(newer_scan)
            .await?
            .and_then(|asset_scan| asset_scan.status)
            .map(|status| status.last_transition_time);

        Ok(match (from_findings, from_scans) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        })
    }

    /// Findings this asset scan already recorded, by natural key.
    async fn recorded_by(
        &self,
        asset_scan_id: AssetScanId,
        kind: FindingKind,
    ) -> Result<HashMap<NaturalKey, FindingId>> {
        let findings: Vec<Finding> = self
            .backend
            .list(&Query::filtered(Filter::all([
                kind_filter(kind),
                Filter::eq("foundBy/id", asset_scan_id),
            ])))
            .await?;

        let mut by_key = HashMap::with_capacity(findings.len());
        for finding in findings {
            let key = NaturalKey::of(&finding.finding_info);
            if let Some(previous) = by_key.insert(key.clone(), finding.id) {
                return Err(OrchestratorError::InvalidEntity(format!(
                    "findings {previous} and {} of asset scan {asset_scan_id} share natural key {key}",
                    finding.id
                )));
            }
        }
        Ok(by_key)
    }

    /// Retires findings of this family seen before `completed` that are
    /// still active or were retired by something later than `completed`.
    async fn invalidate_older(
        &self,
        asset_id: AssetId,
        kind: FindingKind,
        completed: DateTime<Utc>,
    ) -> Result<u64> {
        let older: Vec<Finding> = self
            .backend
            .list(
                &Query::filtered(Filter::all([
                    kind_filter(kind),
                    Filter::eq("asset/id", asset_id),
                    Filter::lt("foundOn", completed),
                    Filter::any([
                        Filter::is_null("invalidatedOn"),
                        Filter::gt("invalidatedOn", completed),
                    ]),
                ]))
                .select(["id"]),
            )
            .await?;

        for finding in &older {
            self.backend
                .patch::<Finding>(
                    finding.id,
                    FindingPatch {
                        invalidated_on: Some(completed),
                        ..Default::default()
                    },
                )
                .await?;
        }
        Ok(older.len() as u64)
    }

    async fn count_active(&self, filter: Filter) -> Result<u64> {
        let query = Query::filtered(filter.and(Filter::is_null("invalidatedOn"))).select(["id"]);
        Ok(self.backend.count::<Finding>(&query).await? as u64)
    }

    /// Rewrites the asset's summary entry for `kind` from its active
    /// findings. Other families' entries are left alone.
    async fn update_asset_summary(&self, asset_id: AssetId, kind: FindingKind) -> Result<()> {
        let active = Filter::all([kind_filter(kind), Filter::eq("asset/id", asset_id)]);
        let mut summary = AssetSummary::default();
        if kind == FindingKind::Vulnerability {
            let mut severities = VulnerabilitySeveritySummary::default();
            for &severity in VulnerabilitySeverity::ALL {
                *severities.count_mut(severity) = self
                    .count_active(active.clone().and(Filter::eq("findingInfo/severity", severity)))
                    .await?;
            }
            summary.total_vulnerabilities = Some(severities);
        } else {
            let count = Some(self.count_active(active).await?);
            match kind {
                FindingKind::Package => summary.total_packages = count,
                FindingKind::Exploit => summary.total_exploits = count,
                FindingKind::Secret => summary.total_secrets = count,
                FindingKind::Misconfiguration => summary.total_misconfigurations = count,
                FindingKind::Rootkit => summary.total_rootkits = count,
                FindingKind::Malware => summary.total_malware = count,
                FindingKind::InfoFinder => summary.total_info_finder = count,
                FindingKind::Vulnerability => {}
            }
        }

        let patch = AssetPatch {
            summary: Some(summary),
            ..Default::default()
        };
        match self.backend.patch::<Asset>(asset_id, patch).await {
            Ok(_) => Ok(()),
            Err(err) if err.is_not_found() => {
                tracing::warn!(target: "scan::findings", asset_id = %asset_id, %kind, "asset gone; skipping summary update");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}
