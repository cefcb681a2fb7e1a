use std::fmt;

use scanwarden_model::FindingInfo;

/// Family-specific identity of a finding. Two findings of the same family
/// with equal keys describe the same problem.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NaturalKey(Vec<String>);

fn opt<T: ToString>(value: &Option<T>) -> String {
    value.as_ref().map(ToString::to_string).unwrap_or_default()
}

impl NaturalKey {
    pub fn of(info: &FindingInfo) -> Self {
        let parts = match info {
            FindingInfo::Vulnerability(vuln) => {
                let (name, version) = vuln
                    .package
                    .as_ref()
                    .map(|package| (package.name.clone(), package.version.clone()))
                    .unwrap_or_default();
                vec![vuln.vulnerability_name.clone(), name, version]
            }
            FindingInfo::Package(package) => vec![package.name.clone(), package.version.clone()],
            FindingInfo::Secret(secret) => vec![
                secret.fingerprint.clone(),
                opt(&secret.start_column),
                opt(&secret.end_column),
            ],
            FindingInfo::Misconfiguration(misconfiguration) => vec![
                misconfiguration.scanner_name.clone(),
                misconfiguration.test_id.clone(),
                misconfiguration.message.clone(),
            ],
            FindingInfo::Rootkit(rootkit) => vec![
                rootkit.rootkit_name.clone(),
                opt(&rootkit.kind),
                opt(&rootkit.message),
            ],
            FindingInfo::Malware(malware) => vec![
                malware.malware_name.clone(),
                opt(&malware.kind),
                opt(&malware.path),
            ],
            FindingInfo::Exploit(exploit) => {
                vec![exploit.cve_id.clone(), exploit.source_db.clone()]
            }
            FindingInfo::InfoFinder(item) => vec![
                item.scanner_name.clone(),
                item.kind.clone(),
                item.data.clone(),
                opt(&item.path),
            ],
        };
        NaturalKey(parts)
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}
