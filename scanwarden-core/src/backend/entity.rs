use scanwarden_model::{
    Asset, AssetId, AssetPatch, AssetScan, AssetScanEstimation, AssetScanEstimationId,
    AssetScanEstimationPatch, AssetScanId, AssetScanPatch, Finding, FindingId, FindingPatch,
    ProviderId, ProviderRecord, ProviderRecordPatch, Scan, ScanConfig, ScanConfigId,
    ScanConfigPatch, ScanEstimation, ScanEstimationId, ScanEstimationPatch, ScanId, ScanPatch,
};

use super::{Entity, EntityKind};

impl Entity for Asset {
    const KIND: EntityKind = EntityKind::Asset;
    type Id = AssetId;
    type Patch = AssetPatch;

    fn id(&self) -> AssetId {
        self.id
    }

    fn identity(&self) -> Option<String> {
        Some(self.asset_info.identity())
    }
}

impl Entity for AssetScan {
    const KIND: EntityKind = EntityKind::AssetScan;
    type Id = AssetScanId;
    type Patch = AssetScanPatch;

    fn id(&self) -> AssetScanId {
        self.id
    }

    /// One asset scan per (scan, asset).
    fn identity(&self) -> Option<String> {
        self.scan
            .as_ref()
            .map(|scan| format!("scan:{}:asset:{}", scan.id, self.asset.id))
    }
}

impl Entity for Scan {
    const KIND: EntityKind = EntityKind::Scan;
    type Id = ScanId;
    type Patch = ScanPatch;

    fn id(&self) -> ScanId {
        self.id
    }
}

impl Entity for ScanConfig {
    const KIND: EntityKind = EntityKind::ScanConfig;
    type Id = ScanConfigId;
    type Patch = ScanConfigPatch;

    fn id(&self) -> ScanConfigId {
        self.id
    }

    fn identity(&self) -> Option<String> {
        Some(self.name.clone())
    }
}

impl Entity for ScanEstimation {
    const KIND: EntityKind = EntityKind::ScanEstimation;
    type Id = ScanEstimationId;
    type Patch = ScanEstimationPatch;

    fn id(&self) -> ScanEstimationId {
        self.id
    }
}

impl Entity for AssetScanEstimation {
    const KIND: EntityKind = EntityKind::AssetScanEstimation;
    type Id = AssetScanEstimationId;
    type Patch = AssetScanEstimationPatch;

    fn id(&self) -> AssetScanEstimationId {
        self.id
    }

    fn identity(&self) -> Option<String> {
        self.scan_estimation
            .as_ref()
            .map(|estimation| format!("estimation:{}:asset:{}", estimation.id, self.asset.id))
    }
}

impl Entity for Finding {
    const KIND: EntityKind = EntityKind::Finding;
    type Id = FindingId;
    type Patch = FindingPatch;

    fn id(&self) -> FindingId {
        self.id
    }
}

impl Entity for ProviderRecord {
    const KIND: EntityKind = EntityKind::Provider;
    type Id = ProviderId;
    type Patch = ProviderRecordPatch;

    fn id(&self) -> ProviderId {
        self.id
    }

    fn identity(&self) -> Option<String> {
        Some(format!("{}:{}", self.kind, self.display_name))
    }
}
