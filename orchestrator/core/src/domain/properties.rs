// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Property Groups
//!
//! Typed, versioned slices of an entity's metadata. Each group is locked
//! independently through [`crate::domain::metadata::Properties`]; the payload
//! type determines the storage tag at compile time.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::domain::cluster::{ClusterState, HostDefinition, Node, NodeType};

/// A payload stored under a fixed tag in an entity's property map.
pub trait PropertyGroup:
    Serialize + DeserializeOwned + Default + Clone + Send + Sync + 'static
{
    const TAG: &'static str;
}

/// Sizing defaults resolved at construction time.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DefaultsV1 {
    pub gateway_sizing: HostDefinition,
    pub master_sizing: HostDefinition,
    pub node_sizing: HostDefinition,
    pub image: String,
}

impl PropertyGroup for DefaultsV1 {
    const TAG: &'static str = "defaults.v1";
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StateV1 {
    pub state: ClusterState,
    /// Seconds between two state collections
    #[serde(default)]
    pub state_collect_interval_secs: u64,
}

impl PropertyGroup for StateV1 {
    const TAG: &'static str = "state.v1";
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CompositeV1 {
    pub tenants: Vec<String>,
}

impl PropertyGroup for CompositeV1 {
    const TAG: &'static str = "composite.v1";
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NetworkV1 {
    pub network_id: String,
    pub gateway_id: String,
    pub gateway_ip: String,
    pub public_ip: String,
    pub cidr: String,
}

impl PropertyGroup for NetworkV1 {
    const TAG: &'static str = "network.v1";
}

/// Cluster membership and the hostname counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NodesV1 {
    pub masters: Vec<Node>,
    pub private_nodes: Vec<Node>,
    pub public_nodes: Vec<Node>,
    pub master_last_index: u32,
    pub private_last_index: u32,
    pub public_last_index: u32,
}

impl PropertyGroup for NodesV1 {
    const TAG: &'static str = "nodes.v1";
}

impl NodesV1 {
    /// Increments the counter of `node_type` and returns the new value.
    ///
    /// Must only be called inside a write-lock scope on this group.
    pub fn next_index(&mut self, node_type: NodeType) -> Option<u32> {
        let counter = match node_type {
            NodeType::Master => &mut self.master_last_index,
            NodeType::PrivateNode => &mut self.private_last_index,
            NodeType::PublicNode => &mut self.public_last_index,
            NodeType::Gateway => return None,
        };
        *counter += 1;
        Some(*counter)
    }

    fn list_mut(&mut self, node_type: NodeType) -> Option<&mut Vec<Node>> {
        match node_type {
            NodeType::Master => Some(&mut self.masters),
            NodeType::PrivateNode => Some(&mut self.private_nodes),
            NodeType::PublicNode => Some(&mut self.public_nodes),
            NodeType::Gateway => None,
        }
    }

    pub fn list(&self, node_type: NodeType) -> &[Node] {
        match node_type {
            NodeType::Master => &self.masters,
            NodeType::PrivateNode => &self.private_nodes,
            NodeType::PublicNode => &self.public_nodes,
            NodeType::Gateway => &[],
        }
    }

    pub fn push(&mut self, node_type: NodeType, node: Node) -> bool {
        match self.list_mut(node_type) {
            Some(list) => {
                list.push(node);
                true
            }
            None => false,
        }
    }

    /// Removes the record with the given host id. Returns whether one was found.
    pub fn remove(&mut self, node_type: NodeType, host_id: &str) -> bool {
        let Some(list) = self.list_mut(node_type) else {
            return false;
        };
        let before = list.len();
        list.retain(|n| n.id != host_id);
        list.len() != before
    }

    pub fn ids(&self, node_type: NodeType) -> Vec<String> {
        self.list(node_type).iter().map(|n| n.id.clone()).collect()
    }

    pub fn private_ips(&self, node_type: NodeType) -> Vec<String> {
        self.list(node_type)
            .iter()
            .map(|n| n.private_ip.clone())
            .collect()
    }
}

/// Installed and disabled features.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FeaturesV1 {
    pub installed: BTreeSet<String>,
    pub disabled: BTreeSet<String>,
}

impl PropertyGroup for FeaturesV1 {
    const TAG: &'static str = "features.v1";
}

impl FeaturesV1 {
    pub fn is_disabled(&self, feature: &str) -> bool {
        self.disabled.contains(feature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str) -> Node {
        Node {
            id: id.into(),
            name: format!("demo-{}", id),
            private_ip: "10.0.0.2".into(),
            public_ip: None,
        }
    }

    #[test]
    fn test_counters_are_independent_per_node_type() {
        let mut nodes = NodesV1::default();
        assert_eq!(nodes.next_index(NodeType::Master), Some(1));
        assert_eq!(nodes.next_index(NodeType::Master), Some(2));
        assert_eq!(nodes.next_index(NodeType::PrivateNode), Some(1));
        assert_eq!(nodes.next_index(NodeType::PublicNode), Some(1));
        assert_eq!(nodes.next_index(NodeType::Gateway), None);
        assert_eq!(nodes.master_last_index, 2);
    }

    #[test]
    fn test_push_and_remove_specific_record() {
        let mut nodes = NodesV1::default();
        assert!(nodes.push(NodeType::PrivateNode, node("h1")));
        assert!(nodes.push(NodeType::PrivateNode, node("h2")));
        assert!(!nodes.push(NodeType::Gateway, node("gw")));

        assert!(nodes.remove(NodeType::PrivateNode, "h1"));
        assert!(!nodes.remove(NodeType::PrivateNode, "h1"));
        assert_eq!(nodes.ids(NodeType::PrivateNode), vec!["h2".to_string()]);
    }

    #[test]
    fn test_tags_are_distinct() {
        let tags = [
            DefaultsV1::TAG,
            StateV1::TAG,
            CompositeV1::TAG,
            NetworkV1::TAG,
            NodesV1::TAG,
            FeaturesV1::TAG,
        ];
        let unique: BTreeSet<_> = tags.iter().collect();
        assert_eq!(unique.len(), tags.len());
    }
}
