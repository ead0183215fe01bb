// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Cluster controller.
//!
//! Owns a cluster's identity and its [`Properties`], and offers typed
//! accessors over the property groups the blueprint and flavors need.

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

use crate::domain::cluster::{ClusterIdentity, ClusterState, Node, NodeType};
use crate::domain::error::ClusterError;
use crate::domain::metadata::{MetadataError, MetadataStore, Properties};
use crate::domain::properties::{NetworkV1, NodesV1, StateV1};

/// Metadata entity key of a cluster.
pub fn cluster_entity(name: &str) -> String {
    format!("clusters/{}", name)
}

pub struct ClusterController {
    identity: RwLock<ClusterIdentity>,
    properties: Arc<Properties>,
    store: Arc<dyn MetadataStore>,
}

impl ClusterController {
    pub fn new(identity: ClusterIdentity, store: Arc<dyn MetadataStore>) -> Self {
        let properties = Arc::new(Properties::new(cluster_entity(&identity.name), store.clone()));
        Self {
            identity: RwLock::new(identity),
            properties,
            store,
        }
    }

    /// Loads an existing cluster from the store.
    pub async fn load(name: &str, store: Arc<dyn MetadataStore>) -> Result<Self, ClusterError> {
        let raw = store
            .read_identity(&cluster_entity(name))
            .await?
            .ok_or_else(|| ClusterError::NotFound(name.to_string()))?;
        let identity: ClusterIdentity = serde_json::from_value(raw).map_err(|e| {
            ClusterError::Metadata(MetadataError::Storage(format!(
                "corrupt identity of cluster '{}': {}",
                name, e
            )))
        })?;
        Ok(Self::new(identity, store))
    }

    pub fn name(&self) -> String {
        self.identity.read().name.clone()
    }

    pub fn identity(&self) -> ClusterIdentity {
        self.identity.read().clone()
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn properties_handle(&self) -> Arc<Properties> {
        self.properties.clone()
    }

    /// Updates the in-memory identity. Call [`Self::write_metadata`] to persist.
    pub fn update_identity(&self, update: impl FnOnce(&mut ClusterIdentity)) {
        update(&mut self.identity.write());
    }

    /// Persists the identity record.
    pub async fn write_metadata(&self) -> Result<(), ClusterError> {
        let identity = self.identity();
        let value = serde_json::to_value(&identity).map_err(|e| {
            MetadataError::Serialization {
                tag: "identity".to_string(),
                message: e.to_string(),
            }
        })?;
        self.store
            .write_identity(self.properties.entity(), value)
            .await?;
        debug!(cluster = %identity.name, "Cluster identity persisted");
        Ok(())
    }

    /// Reloads the identity and drops cached property groups.
    pub async fn read_metadata(&self) -> Result<(), ClusterError> {
        let name = self.name();
        let reloaded = Self::load(&name, self.store.clone()).await?;
        *self.identity.write() = reloaded.identity();
        self.properties.invalidate().await;
        Ok(())
    }

    /// Removes the identity and every property group.
    pub async fn delete_metadata(&self) -> Result<(), ClusterError> {
        self.store.delete_entity(self.properties.entity()).await?;
        self.properties.invalidate().await;
        Ok(())
    }

    pub async fn network_config(&self) -> Result<NetworkV1, ClusterError> {
        Ok(self.properties.snapshot::<NetworkV1>().await?)
    }

    /// Last recorded state.
    pub async fn recorded_state(&self) -> Result<ClusterState, ClusterError> {
        Ok(self
            .properties
            .lock_for_read::<StateV1>()
            .then_use(|s| s.state)
            .await?)
    }

    pub async fn set_state(&self, state: ClusterState) -> Result<(), ClusterError> {
        self.properties
            .lock_for_write::<StateV1>()
            .then_use(|s| {
                s.state = state;
                Ok::<_, ClusterError>(())
            })
            .await
    }

    pub async fn nodes(&self) -> Result<NodesV1, ClusterError> {
        Ok(self.properties.snapshot::<NodesV1>().await?)
    }

    pub async fn list_masters(&self) -> Result<Vec<Node>, ClusterError> {
        Ok(self
            .properties
            .lock_for_read::<NodesV1>()
            .then_use(|n| n.masters.clone())
            .await?)
    }

    pub async fn list_master_ids(&self) -> Result<Vec<String>, ClusterError> {
        Ok(self
            .properties
            .lock_for_read::<NodesV1>()
            .then_use(|n| n.ids(NodeType::Master))
            .await?)
    }

    pub async fn list_master_ips(&self) -> Result<Vec<String>, ClusterError> {
        Ok(self
            .properties
            .lock_for_read::<NodesV1>()
            .then_use(|n| n.private_ips(NodeType::Master))
            .await?)
    }

    pub async fn list_node_ids(&self, public: bool) -> Result<Vec<String>, ClusterError> {
        Ok(self
            .properties
            .lock_for_read::<NodesV1>()
            .then_use(|n| n.ids(NodeType::worker(public)))
            .await?)
    }

    pub async fn list_node_ips(&self, public: bool) -> Result<Vec<String>, ClusterError> {
        Ok(self
            .properties
            .lock_for_read::<NodesV1>()
            .then_use(|n| n.private_ips(NodeType::worker(public)))
            .await?)
    }
}
