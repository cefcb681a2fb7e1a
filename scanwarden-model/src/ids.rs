use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
            Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            pub fn to_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl AsRef<Uuid> for $name {
            fn as_ref(&self) -> &Uuid {
                &self.0
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl From<$name> for crate::filter::Literal {
            fn from(value: $name) -> Self {
                crate::filter::Literal::Str(value.0.to_string())
            }
        }
    };
}

entity_id!(
    /// Identifier of a discovered asset.
    AssetId
);
entity_id!(
    /// Identifier of a scan configuration.
    ScanConfigId
);
entity_id!(
    /// Identifier of a scan run.
    ScanId
);
entity_id!(
    /// Identifier of a single per-asset scan job.
    AssetScanId
);
entity_id!(FindingId);
entity_id!(ScanEstimationId);
entity_id!(AssetScanEstimationId);
entity_id!(
    /// Identifier of a registered provider record.
    ProviderId
);

/// Relationship to another entity, serialized as `{"id": ...}` so filters can
/// address it as `<field>/id`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub struct Reference<I> {
    pub id: I,
}

impl<I> Reference<I> {
    pub fn new(id: I) -> Self {
        Self { id }
    }
}

impl<I> From<I> for Reference<I> {
    fn from(id: I) -> Self {
        Self { id }
    }
}
