//! Backend client port.
//!
//! Watchers talk to persistence only through [`BackendClient`]. Queries are
//! described with the typed [`Filter`] tree from the model crate; a remote
//! backend sends its rendered text, the [`InMemoryBackend`] evaluates it
//! directly.

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use scanwarden_model::{Filter, OrderBy};

mod entity;
mod eval;
mod memory;

pub use memory::InMemoryBackend;

/// Collections exposed by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    Asset,
    AssetScan,
    AssetScanEstimation,
    Finding,
    Provider,
    Scan,
    ScanConfig,
    ScanEstimation,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Asset => "Asset",
            EntityKind::AssetScan => "AssetScan",
            EntityKind::AssetScanEstimation => "AssetScanEstimation",
            EntityKind::Finding => "Finding",
            EntityKind::Provider => "Provider",
            EntityKind::Scan => "Scan",
            EntityKind::ScanConfig => "ScanConfig",
            EntityKind::ScanEstimation => "ScanEstimation",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record type stored by the backend.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const KIND: EntityKind;

    type Id: Copy + Eq + fmt::Display + fmt::Debug + Send + Sync + 'static;

    /// Partial update. Absent fields are left untouched.
    type Patch: Serialize + Send + Sync + 'static;

    fn id(&self) -> Self::Id;

    /// Natural key used to reject duplicates on create. `None` means only
    /// the ID has to be unique.
    fn identity(&self) -> Option<String> {
        None
    }
}

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: String },

    /// Carries the record that already holds the identity.
    #[error("{kind} conflicts with an existing record")]
    Conflict {
        kind: EntityKind,
        existing: serde_json::Value,
    },

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BackendError {
    pub fn not_found(kind: EntityKind, id: impl fmt::Display) -> Self {
        BackendError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, BackendError::Conflict { .. })
    }

    /// Decodes the conflicting record. `None` when this is not a conflict
    /// or the conflict belongs to another collection.
    pub fn conflicting<E: Entity>(&self) -> Option<BackendResult<E>> {
        match self {
            BackendError::Conflict { kind, existing } if *kind == E::KIND => Some(
                serde_json::from_value(existing.clone()).map_err(BackendError::from),
            ),
            _ => None,
        }
    }
}

pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Collection query: filter, projection, ordering and paging.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filter: Option<Filter>,
    /// Advisory projection. Backends may return full records.
    pub select: Vec<String>,
    pub order_by: Vec<OrderBy>,
    pub top: Option<usize>,
    pub skip: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filtered(filter: Filter) -> Self {
        Self {
            filter: Some(filter),
            ..Self::default()
        }
    }

    pub fn select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    pub fn top(mut self, top: usize) -> Self {
        self.top = Some(top);
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = Some(skip);
        self
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(filter) = &self.filter {
            parts.push(format!("$filter={filter}"));
        }
        if !self.select.is_empty() {
            parts.push(format!("$select={}", self.select.join(",")));
        }
        if !self.order_by.is_empty() {
            let order = self
                .order_by
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(",");
            parts.push(format!("$orderby={order}"));
        }
        if let Some(top) = self.top {
            parts.push(format!("$top={top}"));
        }
        if let Some(skip) = self.skip {
            parts.push(format!("$skip={skip}"));
        }
        f.write_str(&parts.join("&"))
    }
}

/// CRUD access to every collection. Implementations must be safe to share
/// between watchers.
#[async_trait]
pub trait BackendClient: Send + Sync + 'static {
    async fn get<E: Entity>(&self, id: E::Id) -> BackendResult<E>;

    async fn list<E: Entity>(&self, query: &Query) -> BackendResult<Vec<E>>;

    /// Creates `entity`, or fails with [`BackendError::Conflict`] carrying
    /// the record that already owns its ID or identity.
    async fn post<E: Entity>(&self, entity: E) -> BackendResult<E>;

    async fn patch<E: Entity>(&self, id: E::Id, patch: E::Patch) -> BackendResult<E>;

    async fn delete<E: Entity>(&self, id: E::Id) -> BackendResult<()>;

    async fn first<E: Entity>(&self, query: Query) -> BackendResult<Option<E>> {
        let found = self.list::<E>(&query.top(1)).await?;
        Ok(found.into_iter().next())
    }

    async fn count<E: Entity>(&self, query: &Query) -> BackendResult<usize> {
        Ok(self.list::<E>(query).await?.len())
    }
}

#[cfg(test)]
mod tests {
    use scanwarden_model::{Asset, AssetInfo, DirInfo};

    use super::*;

    #[test]
    fn query_renders_odata_like_text() {
        let query = Query::filtered(Filter::eq("status/state", "Done"))
            .order_by(OrderBy::desc("status/lastTransitionTime"))
            .top(1);
        assert_eq!(
            query.to_string(),
            "$filter=status/state eq 'Done'&$orderby=status/lastTransitionTime desc&$top=1"
        );
    }

    #[test]
    fn conflict_decodes_only_for_matching_kind() {
        let asset = Asset::discovered(
            AssetInfo::Dir(DirInfo {
                dir_name: "/srv".into(),
                ..Default::default()
            }),
            chrono::Utc::now(),
        );
        let err = BackendError::Conflict {
            kind: EntityKind::Asset,
            existing: serde_json::to_value(&asset).expect("serialize asset"),
        };

        let decoded = err
            .conflicting::<Asset>()
            .expect("asset conflict")
            .expect("decode asset");
        assert_eq!(decoded.id, asset.id);
        assert!(err.conflicting::<scanwarden_model::Scan>().is_none());
        assert!(!err.is_not_found());
    }
}
