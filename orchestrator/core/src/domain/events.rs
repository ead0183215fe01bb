// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::cluster::{ClusterState, Flavor, NodeType};

/// Construction phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Network,
    MetadataSeed,
    Topology,
    Configuration,
    NodeConfiguration,
    ClusterConfiguration,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Network => "network",
            Phase::MetadataSeed => "metadata-seed",
            Phase::Topology => "topology",
            Phase::Configuration => "configuration",
            Phase::NodeConfiguration => "node-configuration",
            Phase::ClusterConfiguration => "cluster-configuration",
        };
        f.write_str(name)
    }
}

/// Cluster lifecycle events published while a blueprint runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClusterEvent {
    ConstructionStarted {
        cluster: String,
        flavor: Flavor,
        started_at: DateTime<Utc>,
    },
    PhaseStarted {
        cluster: String,
        phase: Phase,
        started_at: DateTime<Utc>,
    },
    PhaseCompleted {
        cluster: String,
        phase: Phase,
        completed_at: DateTime<Utc>,
    },
    HostCreated {
        cluster: String,
        host_id: String,
        host_name: String,
        node_type: NodeType,
        created_at: DateTime<Utc>,
    },
    HostDeleted {
        cluster: String,
        host_id: String,
        deleted_at: DateTime<Utc>,
    },
    FeatureInstalled {
        cluster: String,
        feature: String,
        target: String,
        installed_at: DateTime<Utc>,
    },
    RollbackStarted {
        cluster: String,
        reason: String,
        started_at: DateTime<Utc>,
    },
    ConstructionSucceeded {
        cluster: String,
        state: ClusterState,
        completed_at: DateTime<Utc>,
    },
    ConstructionFailed {
        cluster: String,
        error: String,
        resources_kept: bool,
        failed_at: DateTime<Utc>,
    },
    ClusterDeleted {
        cluster: String,
        deleted_at: DateTime<Utc>,
    },
}

impl ClusterEvent {
    pub fn cluster(&self) -> &str {
        match self {
            ClusterEvent::ConstructionStarted { cluster, .. }
            | ClusterEvent::PhaseStarted { cluster, .. }
            | ClusterEvent::PhaseCompleted { cluster, .. }
            | ClusterEvent::HostCreated { cluster, .. }
            | ClusterEvent::HostDeleted { cluster, .. }
            | ClusterEvent::FeatureInstalled { cluster, .. }
            | ClusterEvent::RollbackStarted { cluster, .. }
            | ClusterEvent::ConstructionSucceeded { cluster, .. }
            | ClusterEvent::ConstructionFailed { cluster, .. }
            | ClusterEvent::ClusterDeleted { cluster, .. } => cluster,
        }
    }
}
