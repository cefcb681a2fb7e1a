//! Turns finished asset scans into deduplicated, time-ordered findings.
//!
//! Every family goes through the same [`FindingReconciler`] pass; families
//! differ only in how their results map to [`FindingInfo`] and in their
//! [`NaturalKey`].

use std::collections::HashSet;

use scanwarden_model::{AssetScan, FindingInfo, FindingKind, FindingsSummary, ScanFamily};

mod key;
mod processor;
mod reconciler;

pub use key::NaturalKey;
pub use processor::{AssetScanProcessEvent, AssetScanProcessor};
pub use reconciler::{FamilyOutcome, FindingReconciler};

/// Order in which finding kinds are reconciled. Vulnerabilities go before
/// packages because they also contribute packages.
pub const PROCESSING_ORDER: &[FindingKind] = &[
    FindingKind::Vulnerability,
    FindingKind::Package,
    FindingKind::Exploit,
    FindingKind::Secret,
    FindingKind::Misconfiguration,
    FindingKind::Rootkit,
    FindingKind::Malware,
    FindingKind::InfoFinder,
];

/// Scanner families whose output feeds findings of `kind`.
pub fn source_families(kind: FindingKind) -> &'static [ScanFamily] {
    match kind {
        FindingKind::Package => &[ScanFamily::Sbom, ScanFamily::Vulnerabilities],
        FindingKind::Vulnerability => &[ScanFamily::Vulnerabilities],
        FindingKind::Exploit => &[ScanFamily::Exploits],
        FindingKind::Secret => &[ScanFamily::Secrets],
        FindingKind::Misconfiguration => &[ScanFamily::Misconfigurations],
        FindingKind::Rootkit => &[ScanFamily::Rootkits],
        FindingKind::Malware => &[ScanFamily::Malware],
        FindingKind::InfoFinder => &[ScanFamily::InfoFinder],
    }
}

/// Whether any family feeding `kind` finished in `asset_scan`.
pub fn has_results(asset_scan: &AssetScan, kind: FindingKind) -> bool {
    source_families(kind)
        .iter()
        .any(|&family| asset_scan.family_completed(family))
}

/// Builds the finding payloads of `kind` from the completed families of
/// `asset_scan`. Packages from the SBOM come first, then packages referenced
/// by vulnerabilities that the SBOM did not list.
pub fn collect_infos(asset_scan: &AssetScan, kind: FindingKind) -> Vec<FindingInfo> {
    let results = &asset_scan.results;
    let done = |family| asset_scan.family_completed(family);

    fn wrap<T: Clone>(items: &Option<Vec<T>>, f: fn(T) -> FindingInfo) -> Vec<FindingInfo> {
        items.iter().flatten().cloned().map(f).collect()
    }

    match kind {
        FindingKind::Package => {
            let mut infos = Vec::new();
            let mut seen = HashSet::new();
            if done(ScanFamily::Sbom) {
                for package in results.packages.iter().flatten() {
                    if seen.insert((package.name.clone(), package.version.clone())) {
                        infos.push(FindingInfo::Package(package.clone()));
                    }
                }
            }
            if done(ScanFamily::Vulnerabilities) {
                let referenced = results
                    .vulnerabilities
                    .iter()
                    .flatten()
                    .filter_map(|vuln| vuln.package.as_ref());
                for package in referenced {
                    if seen.insert((package.name.clone(), package.version.clone())) {
                        infos.push(FindingInfo::Package(package.clone()));
                    }
                }
            }
            infos
        }
        FindingKind::Vulnerability if done(ScanFamily::Vulnerabilities) => {
            wrap(&results.vulnerabilities, FindingInfo::Vulnerability)
        }
        FindingKind::Exploit if done(ScanFamily::Exploits) => {
            wrap(&results.exploits, FindingInfo::Exploit)
        }
        FindingKind::Secret if done(ScanFamily::Secrets) => wrap(&results.secrets, FindingInfo::Secret),
        FindingKind::Misconfiguration if done(ScanFamily::Misconfigurations) => {
            wrap(&results.misconfigurations, FindingInfo::Misconfiguration)
        }
        FindingKind::Rootkit if done(ScanFamily::Rootkits) => {
            wrap(&results.rootkits, FindingInfo::Rootkit)
        }
        FindingKind::Malware if done(ScanFamily::Malware) => wrap(&results.malware, FindingInfo::Malware),
        FindingKind::InfoFinder if done(ScanFamily::InfoFinder) => {
            wrap(&results.info_finder, FindingInfo::InfoFinder)
        }
        _ => Vec::new(),
    }
}

/// Adds one family's counts to an asset scan summary.
pub fn record_outcome(summary: &mut FindingsSummary, outcome: &FamilyOutcome) {
    match outcome.kind {
        FindingKind::Package => summary.total_packages = outcome.found,
        FindingKind::Vulnerability => summary.total_vulnerabilities = outcome.severities,
        FindingKind::Exploit => summary.total_exploits = outcome.found,
        FindingKind::Secret => summary.total_secrets = outcome.found,
        FindingKind::Misconfiguration => summary.total_misconfigurations = outcome.found,
        FindingKind::Rootkit => summary.total_rootkits = outcome.found,
        FindingKind::Malware => summary.total_malware = outcome.found,
        FindingKind::InfoFinder => summary.total_info_finder = outcome.found,
    }
}

#[cfg(test)]
mod tests {
    use scanwarden_model::{
        AssetId, AssetScanTemplate, Package, ScanResults, ScannerReason, ScannerState,
        ScannerStatus, Vulnerability,
    };

    use super::*;

    fn package(name: &str, version: &str) -> Package {
        Package {
            name: name.into(),
            version: version.into(),
            ..Default::default()
        }
    }

    fn finished(families: &[ScanFamily], results: ScanResults) -> AssetScan {
        let mut asset_scan = AssetScan::new(None, AssetId::new(), AssetScanTemplate::default());
        for &family in families {
            asset_scan.scanners.insert(
                family,
                ScannerStatus::new(ScannerState::Done, ScannerReason::Success, None),
            );
        }
        asset_scan.results = results;
        asset_scan
    }

    #[test]
    fn vulnerability_packages_join_sbom_packages_without_duplicates() {
        let results = ScanResults {
            packages: Some(vec![package("zlib", "1.3")]),
            vulnerabilities: Some(vec![
                Vulnerability {
                    vulnerability_name: "CVE-1".into(),
                    package: Some(package("zlib", "1.3")),
                    ..Default::default()
                },
                Vulnerability {
                    vulnerability_name: "CVE-2".into(),
                    package: Some(package("curl", "8.0")),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        };
        let asset_scan = finished(&[ScanFamily::Sbom, ScanFamily::Vulnerabilities], results);

        let infos = collect_infos(&asset_scan, FindingKind::Package);
        let names: Vec<_> = infos
            .iter()
            .map(|info| match info {
                FindingInfo::Package(package) => package.name.as_str(),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(names, ["zlib", "curl"]);
    }

    #[test]
    fn families_that_did_not_finish_contribute_nothing() {
        let results = ScanResults {
            secrets: Some(vec![Default::default()]),
            ..Default::default()
        };
        let asset_scan = finished(&[], results);
        assert!(!has_results(&asset_scan, FindingKind::Secret));
        assert!(collect_infos(&asset_scan, FindingKind::Secret).is_empty());
    }
}
