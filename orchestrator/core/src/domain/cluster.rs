// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Cluster Domain Types
//!
//! Value objects describing a cluster and the hosts it is built from:
//!
//! - [`ClusterIdentity`] - immutable identity recorded when construction starts
//! - [`ClusterRequest`] - what a caller asks the orchestrator to build
//! - [`HostDefinition`] - a sizing request, with the three-level fallback rule
//!   implemented by [`HostDefinition::complement`]
//! - [`Node`], [`NodeType`], [`ClusterState`], [`Flavor`], [`Complexity`]

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::provider::{Host, KeyPair};

/// Image used when neither the flavor nor the request names one.
pub const DEFAULT_IMAGE: &str = "Ubuntu 18.04";

/// Hardcoded node/master baseline: 4 cores.
pub const BASELINE_CORES: u32 = 4;
/// Hardcoded node/master baseline: 15 GB of RAM.
pub const BASELINE_RAM_SIZE: f32 = 15.0;
/// Hardcoded node/master baseline: 100 GB of disk.
pub const BASELINE_DISK_SIZE: u32 = 100;

// ============================================================================
// Enumerations
// ============================================================================

/// Topology family of a cluster. Selects the [`crate::application::flavor::FlavorActors`]
/// implementation injected into the blueprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flavor {
    /// Bunch of hosts, no orchestration layer
    Boh,
    Dcos,
    K8s,
    Ohpc,
    Swarm,
}

impl fmt::Display for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Flavor::Boh => "boh",
            Flavor::Dcos => "dcos",
            Flavor::K8s => "k8s",
            Flavor::Ohpc => "ohpc",
            Flavor::Swarm => "swarm",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for Flavor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "boh" => Ok(Flavor::Boh),
            "dcos" => Ok(Flavor::Dcos),
            "k8s" => Ok(Flavor::K8s),
            "ohpc" => Ok(Flavor::Ohpc),
            "swarm" => Ok(Flavor::Swarm),
            other => Err(format!("unknown cluster flavor '{}'", other)),
        }
    }
}

/// Complexity tier; flavors map it to a number of masters and nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    #[default]
    Small,
    Normal,
    Large,
}

impl fmt::Display for Complexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Complexity::Small => "small",
            Complexity::Normal => "normal",
            Complexity::Large => "large",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for Complexity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "small" => Ok(Complexity::Small),
            "normal" => Ok(Complexity::Normal),
            "large" => Ok(Complexity::Large),
            other => Err(format!("unknown cluster complexity '{}'", other)),
        }
    }
}

/// Role of a host inside a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Gateway,
    Master,
    PrivateNode,
    PublicNode,
}

impl NodeType {
    /// Short label used in log lines and host labels ("master #2", "public node #1").
    pub fn label(&self) -> &'static str {
        match self {
            NodeType::Gateway => "gateway",
            NodeType::Master => "master",
            NodeType::PrivateNode => "private node",
            NodeType::PublicNode => "public node",
        }
    }

    /// Node type of worker nodes for the given visibility.
    pub fn worker(public: bool) -> Self {
        if public {
            NodeType::PublicNode
        } else {
            NodeType::PrivateNode
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Lifecycle state of a cluster as recorded in `state.v1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClusterState {
    #[default]
    Unknown,
    Nominal,
    Degraded,
    Stopped,
    Initializing,
    Created,
    Creating,
    Error,
    Removed,
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// Value Objects
// ============================================================================

/// Sizing request for a host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct HostDefinition {
    pub cores: u32,
    /// RAM in GB
    pub ram_size: f32,
    /// Disk in GB
    pub disk_size: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_number: Option<u32>,
    /// CPU frequency in GHz
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_freq: Option<f32>,
}

impl HostDefinition {
    pub fn new(cores: u32, ram_size: f32, disk_size: u32, image_id: impl Into<String>) -> Self {
        Self {
            cores,
            ram_size,
            disk_size,
            image_id: image_id.into(),
            gpu_number: None,
            cpu_freq: None,
        }
    }

    /// Baseline gateway sizing used when the flavor has no opinion.
    pub fn gateway_baseline(image_id: impl Into<String>) -> Self {
        Self::new(2, 7.0, 60, image_id)
    }

    /// Baseline master/node sizing used when the flavor has no opinion.
    pub fn node_baseline(image_id: impl Into<String>) -> Self {
        Self::new(BASELINE_CORES, BASELINE_RAM_SIZE, BASELINE_DISK_SIZE, image_id)
    }

    /// Merges a request-level sizing with a tier default.
    ///
    /// Each field comes from `request` when positive (or non-empty), else from
    /// `default` when positive, else from the hardcoded baseline. GPU count and
    /// frequency are taken from the request as-is. Without a request the tier
    /// default is returned unchanged.
    pub fn complement(request: Option<&HostDefinition>, default: &HostDefinition) -> HostDefinition {
        let Some(request) = request else {
            return default.clone();
        };

        let mut merged = request.clone();
        if merged.cores == 0 && default.cores > 0 {
            merged.cores = default.cores;
        }
        if merged.ram_size <= 0.0 && default.ram_size > 0.0 {
            merged.ram_size = default.ram_size;
        }
        if merged.disk_size == 0 && default.disk_size > 0 {
            merged.disk_size = default.disk_size;
        }
        if merged.image_id.is_empty() {
            merged.image_id = default.image_id.clone();
        }

        if merged.cores == 0 {
            merged.cores = BASELINE_CORES;
        }
        if merged.ram_size <= 0.0 {
            merged.ram_size = BASELINE_RAM_SIZE;
        }
        if merged.disk_size == 0 {
            merged.disk_size = BASELINE_DISK_SIZE;
        }
        merged
    }
}

/// A member host of the cluster, as recorded in `nodes.v1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub name: String,
    pub private_ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_ip: Option<String>,
}

impl From<&Node> for Host {
    fn from(node: &Node) -> Self {
        Self {
            id: node.id.clone(),
            name: node.name.clone(),
            private_ip: node.private_ip.clone(),
            public_ip: node.public_ip.clone(),
        }
    }
}

impl From<&Host> for Node {
    fn from(host: &Host) -> Self {
        Self {
            id: host.id.clone(),
            name: host.name.clone(),
            private_ip: host.private_ip.clone(),
            public_ip: host.public_ip.clone(),
        }
    }
}

/// Identity of a cluster, written once when construction begins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterIdentity {
    pub name: String,
    pub flavor: Flavor,
    pub complexity: Complexity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keypair: Option<KeyPair>,
    #[serde(default)]
    pub admin_password: String,
}

impl ClusterIdentity {
    /// Cluster names are case-insensitive; they are recorded lowercased.
    pub fn new(name: impl Into<String>, flavor: Flavor, complexity: Complexity) -> Self {
        Self {
            name: name.into().to_lowercase(),
            flavor,
            complexity,
            keypair: None,
            admin_password: String::new(),
        }
    }
}

/// Upstream construction request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterRequest {
    pub name: String,
    pub cidr: String,
    #[serde(default)]
    pub complexity: Complexity,
    pub flavor: Flavor,
    /// Optional override of the node tier sizing, merged with
    /// [`HostDefinition::complement`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes_def: Option<HostDefinition>,
    #[serde(default)]
    pub tenant: String,
    /// Suppresses rollback so partially built resources can be inspected.
    #[serde(default)]
    pub keep_on_failure: bool,
}

impl ClusterRequest {
    pub fn new(name: impl Into<String>, cidr: impl Into<String>, flavor: Flavor) -> Self {
        Self {
            name: name.into(),
            cidr: cidr.into(),
            complexity: Complexity::default(),
            flavor,
            nodes_def: None,
            tenant: String::new(),
            keep_on_failure: false,
        }
    }

    pub fn with_complexity(mut self, complexity: Complexity) -> Self {
        self.complexity = complexity;
        self
    }

    pub fn with_nodes_def(mut self, def: HostDefinition) -> Self {
        self.nodes_def = Some(def);
        self
    }

    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = tenant.into();
        self
    }

    pub fn keep_on_failure(mut self, keep: bool) -> Self {
        self.keep_on_failure = keep;
        self
    }

    /// Checks the fields construction cannot proceed without.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("cluster name cannot be empty".to_string());
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(format!(
                "cluster name '{}' may only contain alphanumerics, '-' and '_'",
                self.name
            ));
        }
        let Some((address, prefix)) = self.cidr.split_once('/') else {
            return Err(format!("invalid CIDR '{}': missing prefix length", self.cidr));
        };
        if address.parse::<std::net::Ipv4Addr>().is_err() {
            return Err(format!("invalid CIDR '{}': bad network address", self.cidr));
        }
        match prefix.parse::<u8>() {
            Ok(p) if p <= 30 => Ok(()),
            _ => Err(format!("invalid CIDR '{}': prefix must be between 0 and 30", self.cidr)),
        }
    }
}

/// Result of a successful construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstructionOutcome {
    pub cluster: String,
    pub state: ClusterState,
    pub gateway_ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_ip: Option<String>,
    pub masters: usize,
    pub private_nodes: usize,
    pub public_nodes: usize,
}
