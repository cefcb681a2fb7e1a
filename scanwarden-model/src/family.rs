use std::fmt;

use serde::{Deserialize, Serialize};

/// Scanner families an asset scan can run. Each family produces one kind of
/// finding, except `Sbom` which yields packages.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum ScanFamily {
    Sbom,
    Vulnerabilities,
    Exploits,
    Secrets,
    Misconfigurations,
    Rootkits,
    Malware,
    InfoFinder,
}

impl ScanFamily {
    pub const ALL: &'static [ScanFamily] = &[
        ScanFamily::Sbom,
        ScanFamily::Vulnerabilities,
        ScanFamily::Exploits,
        ScanFamily::Secrets,
        ScanFamily::Misconfigurations,
        ScanFamily::Rootkits,
        ScanFamily::Malware,
        ScanFamily::InfoFinder,
    ];

    /// Path segment used when addressing this family inside filters.
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanFamily::Sbom => "sbom",
            ScanFamily::Vulnerabilities => "vulnerabilities",
            ScanFamily::Exploits => "exploits",
            ScanFamily::Secrets => "secrets",
            ScanFamily::Misconfigurations => "misconfigurations",
            ScanFamily::Rootkits => "rootkits",
            ScanFamily::Malware => "malware",
            ScanFamily::InfoFinder => "infoFinder",
        }
    }
}

impl fmt::Display for ScanFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which families an asset scan template enables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScanFamiliesConfig {
    pub sbom: bool,
    pub vulnerabilities: bool,
    pub exploits: bool,
    pub secrets: bool,
    pub misconfigurations: bool,
    pub rootkits: bool,
    pub malware: bool,
    pub info_finder: bool,
}

impl ScanFamiliesConfig {
    pub fn all() -> Self {
        Self {
            sbom: true,
            vulnerabilities: true,
            exploits: true,
            secrets: true,
            misconfigurations: true,
            rootkits: true,
            malware: true,
            info_finder: true,
        }
    }

    pub fn is_enabled(&self, family: ScanFamily) -> bool {
        match family {
            ScanFamily::Sbom => self.sbom,
            ScanFamily::Vulnerabilities => self.vulnerabilities,
            ScanFamily::Exploits => self.exploits,
            ScanFamily::Secrets => self.secrets,
            ScanFamily::Misconfigurations => self.misconfigurations,
            ScanFamily::Rootkits => self.rootkits,
            ScanFamily::Malware => self.malware,
            ScanFamily::InfoFinder => self.info_finder,
        }
    }

    pub fn enabled(&self) -> impl Iterator<Item = ScanFamily> + '_ {
        ScanFamily::ALL
            .iter()
            .copied()
            .filter(|family| self.is_enabled(*family))
    }
}
