// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::domain::metadata::{MetadataError, MetadataStore, VersionedValue};

#[derive(Default, Clone)]
struct EntityRecord {
    identity: Option<serde_json::Value>,
    groups: HashMap<String, VersionedValue>,
}

#[derive(Clone, Default)]
pub struct InMemoryMetadataStore {
    entities: Arc<RwLock<BTreeMap<String, EntityRecord>>>,
    fail_writes: Arc<AtomicBool>,
    write_delay_ms: Arc<AtomicU64>,
    group_writes: Arc<AtomicU64>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail with a storage error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Delays every subsequent group write.
    pub fn set_write_delay(&self, delay: Duration) {
        self.write_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of committed group writes since creation.
    pub fn group_write_count(&self) -> u64 {
        self.group_writes.load(Ordering::SeqCst)
    }

    pub fn contains(&self, entity: &str) -> bool {
        self.entities.read().contains_key(entity)
    }

    fn check_writable(&self) -> Result<(), MetadataError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(MetadataError::Storage("injected write failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn read_identity(&self, entity: &str) -> Result<Option<serde_json::Value>, MetadataError> {
        Ok(self
            .entities
            .read()
            .get(entity)
            .and_then(|record| record.identity.clone()))
    }

    async fn write_identity(&self, entity: &str, identity: serde_json::Value) -> Result<(), MetadataError> {
        self.check_writable()?;
        self.entities
            .write()
            .entry(entity.to_string())
            .or_default()
            .identity = Some(identity);
        Ok(())
    }

    async fn read_group(&self, entity: &str, tag: &str) -> Result<Option<VersionedValue>, MetadataError> {
        Ok(self
            .entities
            .read()
            .get(entity)
            .and_then(|record| record.groups.get(tag).cloned()))
    }

    async fn write_group(&self, entity: &str, tag: &str, value: VersionedValue) -> Result<(), MetadataError> {
        let delay = self.write_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.check_writable()?;
        self.entities
            .write()
            .entry(entity.to_string())
            .or_default()
            .groups
            .insert(tag.to_string(), value);
        self.group_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete_entity(&self, entity: &str) -> Result<(), MetadataError> {
        self.check_writable()?;
        self.entities.write().remove(entity);
        Ok(())
    }

    async fn list_entities(&self, prefix: &str) -> Result<Vec<String>, MetadataError> {
        Ok(self
            .entities
            .read()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_store_lifecycle() {
        let store = InMemoryMetadataStore::new();
        store
            .write_identity("clusters/a", serde_json::json!({"name": "a"}))
            .await
            .unwrap();
        store
            .write_group(
                "clusters/a",
                "state.v1",
                VersionedValue {
                    version: 1,
                    payload: serde_json::json!({"state": "creating"}),
                },
            )
            .await
            .unwrap();
        store
            .write_identity("hosts/x", serde_json::json!({}))
            .await
            .unwrap();

        assert_eq!(store.list_entities("clusters/").await.unwrap(), vec!["clusters/a"]);
        assert_eq!(store.group_write_count(), 1);

        store.delete_entity("clusters/a").await.unwrap();
        assert!(store.read_identity("clusters/a").await.unwrap().is_none());
        assert!(store.read_group("clusters/a", "state.v1").await.unwrap().is_none());
        // idempotent
        store.delete_entity("clusters/a").await.unwrap();
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let store = InMemoryMetadataStore::new();
        store.fail_writes(true);
        let err = store
            .write_identity("clusters/a", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, MetadataError::Storage(_)));
        assert!(!store.contains("clusters/a"));
    }
}
