use scanwarden_model::{
    AssetScanEstimationReason as AseR, AssetScanEstimationState as AseS, AssetScanReason as AsR,
    AssetScanState as AsS, ResourceCleanupReason as RcR, ResourceCleanupState as RcS,
    ScanEstimationReason as SeR, ScanEstimationState as SeS, ScanReason as SR, ScanState as S,
};

use super::StateMachine;

pub static SCAN: StateMachine<S, SR> = StateMachine::new(
    "Scan",
    &[
        (S::Pending, &[S::Discovered, S::Aborted, S::Failed, S::Done]),
        (S::Discovered, &[S::InProgress, S::Aborted, S::Failed]),
        (S::InProgress, &[S::Aborted, S::Failed, S::Done]),
        (S::Aborted, &[S::Failed]),
    ],
    &[
        (S::Pending, &[SR::Created]),
        (S::Discovered, &[SR::AssetsDiscovered]),
        (S::InProgress, &[SR::AssetScansRunning]),
        (S::Aborted, &[SR::Cancellation]),
        (S::Failed, &[SR::Cancellation, SR::Error, SR::Timeout]),
        (S::Done, &[SR::NothingToScan, SR::Success]),
    ],
);

// Pending and Scheduled may be aborted directly so a scan-level abort can
// reach asset scans that never started.
pub static ASSET_SCAN: StateMachine<AsS, AsR> = StateMachine::new(
    "AssetScan",
    &[
        (AsS::Pending, &[AsS::Scheduled, AsS::Aborted]),
        (AsS::Scheduled, &[AsS::ReadyToScan, AsS::Failed, AsS::Aborted]),
        (AsS::ReadyToScan, &[AsS::InProgress, AsS::Failed, AsS::Aborted]),
        (AsS::InProgress, &[AsS::Done, AsS::Failed, AsS::Aborted]),
        (AsS::Aborted, &[AsS::Failed]),
    ],
    &[
        (AsS::Pending, &[AsR::Created]),
        (AsS::Scheduled, &[AsR::Provisioning]),
        (AsS::ReadyToScan, &[AsR::ResourcesReady]),
        (AsS::InProgress, &[AsR::ScannerIsRunning]),
        (AsS::Aborted, &[AsR::Cancellation]),
        (
            AsS::Failed,
            &[AsR::Cancellation, AsR::Error, AsR::Timeout, AsR::AbortTimeout],
        ),
        (AsS::Done, &[AsR::Success]),
    ],
);

pub static SCAN_ESTIMATION: StateMachine<SeS, SeR> = StateMachine::new(
    "ScanEstimation",
    &[
        (SeS::Pending, &[SeS::Discovered, SeS::Aborted, SeS::Failed, SeS::Done]),
        (SeS::Discovered, &[SeS::InProgress, SeS::Aborted, SeS::Failed]),
        (SeS::InProgress, &[SeS::Aborted, SeS::Failed, SeS::Done]),
        (SeS::Aborted, &[SeS::Failed]),
    ],
    &[
        (SeS::Pending, &[SeR::Created]),
        (SeS::Discovered, &[SeR::SuccessfulDiscovery]),
        (SeS::InProgress, &[SeR::Running]),
        (SeS::Aborted, &[SeR::Cancellation]),
        (SeS::Failed, &[SeR::Error, SeR::Timeout, SeR::Aborted]),
        (SeS::Done, &[SeR::NothingToEstimate, SeR::Success]),
    ],
);

pub static ASSET_SCAN_ESTIMATION: StateMachine<AseS, AseR> = StateMachine::new(
    "AssetScanEstimation",
    &[
        (AseS::Pending, &[AseS::Done, AseS::Failed, AseS::Aborted]),
        (AseS::Aborted, &[AseS::Failed]),
    ],
    &[
        (AseS::Pending, &[AseR::Created]),
        (AseS::Aborted, &[AseR::Cancellation]),
        (AseS::Failed, &[AseR::Error, AseR::Aborted]),
        (AseS::Done, &[AseR::Success]),
    ],
);

pub static RESOURCE_CLEANUP: StateMachine<RcS, RcR> = StateMachine::new(
    "ResourceCleanup",
    &[(RcS::Pending, &[RcS::Skipped, RcS::Failed, RcS::Done])],
    &[
        (RcS::Pending, &[RcR::AssetScanCreated]),
        (RcS::Skipped, &[RcR::NotApplicable, RcR::DeletePolicy]),
        (RcS::Failed, &[RcR::ProviderError, RcR::UnsupportedProvider]),
        (RcS::Done, &[RcR::Success]),
    ],
);
