use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Map, Value};

use super::{BackendClient, BackendError, BackendResult, Entity, EntityKind, Query, eval};

/// Process-local backend keeping every collection as JSON.
///
/// Rows are keyed by ID, so unordered listings come back in ID order, which
/// for v7 IDs is creation order. Patches are applied as JSON merge patches:
/// objects merge recursively, `null` removes a field, anything else replaces.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    tables: DashMap<EntityKind, Table>,
}

#[derive(Debug, Default)]
struct Table {
    rows: BTreeMap<String, Value>,
    /// identity -> row id
    identities: HashMap<String, String>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records of `E`.
    pub fn len<E: Entity>(&self) -> usize {
        self.tables
            .get(&E::KIND)
            .map(|table| table.rows.len())
            .unwrap_or_default()
    }

    pub fn is_empty<E: Entity>(&self) -> bool {
        self.len::<E>() == 0
    }
}

fn merge_patch(target: &mut Value, patch: Value) {
    let Value::Object(patch) = patch else {
        *target = patch;
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target) = target {
        for (key, value) in patch {
            if value.is_null() {
                target.remove(&key);
            } else {
                merge_patch(target.entry(key).or_insert(Value::Null), value);
            }
        }
    }
}

#[async_trait]
impl BackendClient for InMemoryBackend {
    async fn get<E: Entity>(&self, id: E::Id) -> BackendResult<E> {
        let key = id.to_string();
        let row = self
            .tables
            .get(&E::KIND)
            .and_then(|table| table.rows.get(&key).cloned())
            .ok_or_else(|| BackendError::not_found(E::KIND, &key))?;
        Ok(serde_json::from_value(row)?)
    }

    async fn list<E: Entity>(&self, query: &Query) -> BackendResult<Vec<E>> {
        let mut rows: Vec<Value> = match self.tables.get(&E::KIND) {
            Some(table) => table
                .rows
                .values()
                .filter(|row| {
                    query
                        .filter
                        .as_ref()
                        .is_none_or(|filter| eval::matches(filter, row))
                })
                .cloned()
                .collect(),
            None => Vec::new(),
        };

        eval::sort(&mut rows, &query.order_by);

        rows.into_iter()
            .skip(query.skip.unwrap_or(0))
            .take(query.top.unwrap_or(usize::MAX))
            .map(|row| serde_json::from_value(row).map_err(BackendError::from))
            .collect()
    }

    async fn post<E: Entity>(&self, entity: E) -> BackendResult<E> {
        let key = entity.id().to_string();
        let identity = entity.identity();
        let row = serde_json::to_value(&entity)?;

        let mut table = self.tables.entry(E::KIND).or_default();
        if let Some(existing) = table.rows.get(&key) {
            return Err(BackendError::Conflict {
                kind: E::KIND,
                existing: existing.clone(),
            });
        }
        if let Some(identity) = &identity {
            let owner = table.identities.get(identity).cloned();
            if let Some(existing) = owner.and_then(|owner| table.rows.get(&owner).cloned()) {
                return Err(BackendError::Conflict {
                    kind: E::KIND,
                    existing,
                });
            }
            table.identities.insert(identity.clone(), key.clone());
        }
        table.rows.insert(key, row);
        Ok(entity)
    }

    async fn patch<E: Entity>(&self, id: E::Id, patch: E::Patch) -> BackendResult<E> {
        let key = id.to_string();
        let patch = serde_json::to_value(&patch)?;

        let mut table = self.tables.entry(E::KIND).or_default();
        let current = table
            .rows
            .get(&key)
            .cloned()
            .ok_or_else(|| BackendError::not_found(E::KIND, &key))?;
        let previous: E = serde_json::from_value(current.clone())?;

        let mut merged = current;
        merge_patch(&mut merged, patch);
        let updated: E = serde_json::from_value(merged.clone())?;

        let (old_identity, new_identity) = (previous.identity(), updated.identity());
        if old_identity != new_identity {
            if let Some(identity) = &new_identity {
                let owner = table.identities.get(identity).cloned();
                if let Some(existing) = owner
                    .filter(|owner| *owner != key)
                    .and_then(|owner| table.rows.get(&owner).cloned())
                {
                    return Err(BackendError::Conflict {
                        kind: E::KIND,
                        existing,
                    });
                }
                table.identities.insert(identity.clone(), key.clone());
            }
            if let Some(identity) = old_identity {
                table.identities.remove(&identity);
            }
        }

        table.rows.insert(key, merged);
        Ok(updated)
    }

    async fn delete<E: Entity>(&self, id: E::Id) -> BackendResult<()> {
        let key = id.to_string();
        let mut table = self.tables.entry(E::KIND).or_default();
        let row = table
            .rows
            .remove(&key)
            .ok_or_else(|| BackendError::not_found(E::KIND, &key))?;
        let entity: E = serde_json::from_value(row)?;
        if let Some(identity) = entity.identity() {
            table.identities.remove(&identity);
        }
        Ok(())
    }
}
