// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Cluster Service
//!
//! Application service fronting cluster lifecycle operations.
//!
//! # DDD Pattern: Application Service
//!
//! - **Layer:** Application
//! - **Responsibility:** Validate requests, pick the flavor actors and run a
//!   [`Blueprint`] per cluster
//! - **Collaborators:**
//!   - Domain: ClusterRequest, MetadataStore, property groups
//!   - Application: Blueprint, FlavorRegistry
//!   - Infrastructure: InfrastructureProvider, FeatureInstaller, EventBus
//!
//! Constructions in flight are tracked by name: a second request for the same
//! name is refused, and a running construction can be cancelled.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::application::blueprint::{Blueprint, BlueprintSettings, Collaborators};
use crate::application::controller::{cluster_entity, ClusterController};
use crate::application::flavor::FlavorRegistry;
use crate::domain::cluster::{
    ClusterIdentity, ClusterRequest, ClusterState, Complexity, ConstructionOutcome, Flavor,
};
use crate::domain::error::ClusterError;
use crate::domain::metadata::MetadataStore;
use crate::domain::properties::{CompositeV1, FeaturesV1, NetworkV1, NodesV1};

const CLUSTER_PREFIX: &str = "clusters/";

/// Recorded view of a cluster.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterSummary {
    pub name: String,
    pub flavor: Flavor,
    pub complexity: Complexity,
    pub state: ClusterState,
    pub tenants: Vec<String>,
    pub network: NetworkV1,
    pub nodes: NodesV1,
    pub installed_features: BTreeSet<String>,
}

#[async_trait]
pub trait ClusterService: Send + Sync {
    /// Validates the request and constructs the cluster.
    ///
    /// # Errors
    ///
    /// - `Configuration`: invalid request
    /// - `AlreadyExists`: a cluster with that name is recorded or being built
    /// - any construction failure, after rollback
    async fn create_cluster(&self, request: ClusterRequest) -> Result<ConstructionOutcome, ClusterError>;

    async fn inspect_cluster(&self, name: &str) -> Result<ClusterSummary, ClusterError>;

    async fn list_clusters(&self) -> Result<Vec<String>, ClusterError>;

    /// Current state as assessed by the flavor.
    async fn cluster_state(&self, name: &str) -> Result<ClusterState, ClusterError>;

    async fn delete_cluster(&self, name: &str) -> Result<(), ClusterError>;

    /// Requests cancellation of a construction in flight. Returns whether one
    /// was running.
    fn cancel_construction(&self, name: &str) -> bool;
}

pub struct StandardClusterService {
    store: Arc<dyn MetadataStore>,
    registry: FlavorRegistry,
    collaborators: Collaborators,
    settings: BlueprintSettings,
    in_flight: DashMap<String, CancellationToken>,
}

impl StandardClusterService {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        registry: FlavorRegistry,
        collaborators: Collaborators,
        settings: BlueprintSettings,
    ) -> Self {
        Self {
            store,
            registry,
            collaborators,
            settings,
            in_flight: DashMap::new(),
        }
    }

    async fn load(&self, name: &str) -> Result<Blueprint, ClusterError> {
        let cluster = ClusterController::load(&name.to_lowercase(), self.store.clone()).await?;
        let actors = self.registry.get(cluster.identity().flavor);
        Ok(Blueprint::with_controller(
            cluster,
            actors,
            self.collaborators.clone(),
            self.settings.clone(),
        ))
    }

    async fn exists(&self, name: &str) -> Result<bool, ClusterError> {
        Ok(self.store.read_identity(&cluster_entity(name)).await?.is_some())
    }
}

#[async_trait]
impl ClusterService for StandardClusterService {
    async fn create_cluster(&self, request: ClusterRequest) -> Result<ConstructionOutcome, ClusterError> {
        request.validate().map_err(ClusterError::Configuration)?;
        let mut request = request;
        request.name = request.name.to_lowercase();
        let name = request.name.clone();

        if self.exists(&name).await? {
            return Err(ClusterError::AlreadyExists(name));
        }
        if !self.registry.is_registered(request.flavor) {
            warn!(cluster = %name, flavor = %request.flavor, "No actors registered for flavor, using defaults");
        }

        let blueprint = Blueprint::new(
            ClusterIdentity::new(&name, request.flavor, request.complexity),
            self.store.clone(),
            self.registry.get(request.flavor),
            self.collaborators.clone(),
            self.settings.clone(),
        );
        match self.in_flight.entry(name.clone()) {
            Entry::Occupied(_) => return Err(ClusterError::AlreadyExists(name)),
            Entry::Vacant(slot) => {
                slot.insert(blueprint.cancellation_token());
            }
        }

        info!(cluster = %name, "Cluster creation requested");
        let result = blueprint.construct(&request).await;
        self.in_flight.remove(&name);
        result
    }

    async fn inspect_cluster(&self, name: &str) -> Result<ClusterSummary, ClusterError> {
        let blueprint = self.load(name).await?;
        let cluster = blueprint.cluster();
        let identity = cluster.identity();
        let props = cluster.properties();
        Ok(ClusterSummary {
            name: identity.name,
            flavor: identity.flavor,
            complexity: identity.complexity,
            state: cluster.recorded_state().await?,
            tenants: props.snapshot::<CompositeV1>().await?.tenants,
            network: props.snapshot::<NetworkV1>().await?,
            nodes: props.snapshot::<NodesV1>().await?,
            installed_features: props.snapshot::<FeaturesV1>().await?.installed,
        })
    }

    async fn list_clusters(&self) -> Result<Vec<String>, ClusterError> {
        let mut names: Vec<String> = self
            .store
            .list_entities(CLUSTER_PREFIX)
            .await?
            .into_iter()
            .filter_map(|entity| entity.strip_prefix(CLUSTER_PREFIX).map(str::to_string))
            .collect();
        names.sort();
        Ok(names)
    }

    async fn cluster_state(&self, name: &str) -> Result<ClusterState, ClusterError> {
        self.load(name).await?.state().await
    }

    async fn delete_cluster(&self, name: &str) -> Result<(), ClusterError> {
        if self.in_flight.contains_key(&name.to_lowercase()) {
            return Err(ClusterError::Configuration(format!(
                "cluster '{}' is being constructed, cancel it first",
                name
            )));
        }
        self.load(name).await?.destroy().await
    }

    fn cancel_construction(&self, name: &str) -> bool {
        match self.in_flight.get(&name.to_lowercase()) {
            Some(token) => {
                info!(cluster = %name, "Cancelling cluster construction");
                token.cancel();
                true
            }
            None => false,
        }
    }
}
