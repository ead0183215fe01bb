// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Metadata Store and Property Locking
//!
//! Durable, versioned storage of entity identities and property groups,
//! plus the [`Properties`] handle through which every mutation of a group
//! goes.
//!
//! | Type | Role |
//! |------|------|
//! | [`MetadataStore`] | Persistence port (implemented in `crate::infrastructure::metadata`) |
//! | [`Properties`] | Per-entity cache with one reader/writer lock per property group |
//! | [`ReadScope`] / [`WriteScope`] | Scoped handles returned by `lock_for_read` / `lock_for_write` |
//!
//! ## Locking model
//!
//! Each group has its own `tokio::sync::RwLock`. Readers of a group proceed
//! together, a writer excludes every other reader and writer of that group,
//! and different groups never block each other. A write scope hands the
//! closure a private copy of the payload; the copy is persisted with a bumped
//! version and only then becomes the committed value, so a failed persist
//! leaves the group as it was.
//!
//! ```no_run
//! # use nimbus_core::domain::metadata::Properties;
//! # use nimbus_core::domain::properties::NodesV1;
//! # use nimbus_core::domain::cluster::NodeType;
//! # async fn demo(props: &Properties) -> Result<(), nimbus_core::domain::metadata::MetadataError> {
//! let index = props
//!     .lock_for_write::<NodesV1>()
//!     .then_use(|nodes| Ok::<_, nimbus_core::domain::metadata::MetadataError>(nodes.next_index(NodeType::Master)))
//!     .await?;
//! # Ok(()) }
//! ```

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{RwLock, RwLockWriteGuard};
use tracing::debug;

use crate::domain::properties::PropertyGroup;

/// A stored property group payload and its version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedValue {
    pub version: u64,
    pub payload: serde_json::Value,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MetadataError {
    #[error("metadata entity '{0}' not found")]
    NotFound(String),

    #[error("failed to (de)serialize property group '{tag}': {message}")]
    Serialization { tag: String, message: String },

    #[error("metadata storage error: {0}")]
    Storage(String),
}

/// Persistence port for entity metadata.
///
/// Entities are addressed by a path-like key such as `clusters/demo`.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn read_identity(&self, entity: &str) -> Result<Option<serde_json::Value>, MetadataError>;

    async fn write_identity(&self, entity: &str, identity: serde_json::Value) -> Result<(), MetadataError>;

    async fn read_group(&self, entity: &str, tag: &str) -> Result<Option<VersionedValue>, MetadataError>;

    async fn write_group(&self, entity: &str, tag: &str, value: VersionedValue) -> Result<(), MetadataError>;

    /// Removes the identity and every group of the entity. Idempotent.
    async fn delete_entity(&self, entity: &str) -> Result<(), MetadataError>;

    /// Entity keys starting with `prefix`, sorted.
    async fn list_entities(&self, prefix: &str) -> Result<Vec<String>, MetadataError>;
}

struct Slot {
    loaded: bool,
    version: u64,
    payload: serde_json::Value,
}

impl Slot {
    fn empty() -> Self {
        Self {
            loaded: false,
            version: 0,
            payload: serde_json::Value::Null,
        }
    }

    fn decode<T: PropertyGroup>(&self) -> Result<T, MetadataError> {
        if self.payload.is_null() {
            return Ok(T::default());
        }
        serde_json::from_value(self.payload.clone()).map_err(|e| MetadataError::Serialization {
            tag: T::TAG.to_string(),
            message: e.to_string(),
        })
    }
}

/// Property groups of one entity, each independently lockable.
pub struct Properties {
    entity: String,
    store: Arc<dyn MetadataStore>,
    slots: DashMap<&'static str, Arc<RwLock<Slot>>>,
}

impl Properties {
    pub fn new(entity: impl Into<String>, store: Arc<dyn MetadataStore>) -> Self {
        Self {
            entity: entity.into(),
            store,
            slots: DashMap::new(),
        }
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn lock_for_read<T: PropertyGroup>(&self) -> ReadScope<'_, T> {
        ReadScope {
            properties: self,
            _group: PhantomData,
        }
    }

    pub fn lock_for_write<T: PropertyGroup>(&self) -> WriteScope<'_, T> {
        WriteScope {
            properties: self,
            _group: PhantomData,
        }
    }

    /// Consistent copy of a group's committed value.
    pub async fn snapshot<T: PropertyGroup>(&self) -> Result<T, MetadataError> {
        self.lock_for_read::<T>().then_use(T::clone).await
    }

    /// Committed version of a group (0 if never written).
    pub async fn version<T: PropertyGroup>(&self) -> Result<u64, MetadataError> {
        let slot = self.slot(T::TAG);
        let guard = self.loaded_write(&slot, T::TAG).await?;
        Ok(guard.version)
    }

    /// Marks every cached group stale so the next access reloads from the
    /// store. Each group is reset under its write lock, after any writer in
    /// flight has committed.
    pub async fn invalidate(&self) {
        let slots: Vec<Arc<RwLock<Slot>>> = self.slots.iter().map(|entry| entry.value().clone()).collect();
        for slot in slots {
            let mut guard = slot.write().await;
            guard.loaded = false;
            guard.version = 0;
            guard.payload = serde_json::Value::Null;
        }
    }

    fn slot(&self, tag: &'static str) -> Arc<RwLock<Slot>> {
        self.slots
            .entry(tag)
            .or_insert_with(|| Arc::new(RwLock::new(Slot::empty())))
            .clone()
    }

    async fn loaded_write<'s>(
        &self,
        slot: &'s RwLock<Slot>,
        tag: &str,
    ) -> Result<RwLockWriteGuard<'s, Slot>, MetadataError> {
        let mut guard = slot.write().await;
        if !guard.loaded {
            if let Some(stored) = self.store.read_group(&self.entity, tag).await? {
                guard.version = stored.version;
                guard.payload = stored.payload;
            }
            guard.loaded = true;
            debug!(entity = %self.entity, tag, version = guard.version, "Loaded property group");
        }
        Ok(guard)
    }
}

/// Read access to one property group. Nothing is persisted on release.
pub struct ReadScope<'a, T> {
    properties: &'a Properties,
    _group: PhantomData<fn() -> T>,
}

impl<T: PropertyGroup> ReadScope<'_, T> {
    pub async fn then_use<R, F>(self, f: F) -> Result<R, MetadataError>
    where
        F: FnOnce(&T) -> R + Send,
    {
        let slot = self.properties.slot(T::TAG);

        {
            let guard = slot.read().await;
            if guard.loaded {
                let value: T = guard.decode()?;
                return Ok(f(&value));
            }
        }

        let guard = self.properties.loaded_write(&slot, T::TAG).await?.downgrade();
        let value: T = guard.decode()?;
        Ok(f(&value))
    }
}

/// Exclusive access to one property group, persisted on successful release.
pub struct WriteScope<'a, T> {
    properties: &'a Properties,
    _group: PhantomData<fn() -> T>,
}

impl<T: PropertyGroup> WriteScope<'_, T> {
    /// Runs `f` on a copy of the payload. When `f` returns `Ok`, the copy is
    /// persisted with the next version and committed; when `f` fails or the
    /// persist fails, the committed value is left untouched.
    pub async fn then_use<R, E, F>(self, f: F) -> Result<R, E>
    where
        F: FnOnce(&mut T) -> Result<R, E> + Send,
        R: Send,
        E: From<MetadataError>,
    {
        let properties = self.properties;
        let slot = properties.slot(T::TAG);
        let mut guard = properties.loaded_write(&slot, T::TAG).await?;

        let mut value: T = guard.decode()?;
        let result = f(&mut value)?;

        let payload = serde_json::to_value(&value).map_err(|e| MetadataError::Serialization {
            tag: T::TAG.to_string(),
            message: e.to_string(),
        })?;
        let next = VersionedValue {
            version: guard.version + 1,
            payload,
        };
        properties
            .store
            .write_group(&properties.entity, T::TAG, next.clone())
            .await?;

        guard.version = next.version;
        guard.payload = next.payload;
        debug!(entity = %properties.entity, tag = T::TAG, version = guard.version, "Committed property group");
        Ok(result)
    }
}
