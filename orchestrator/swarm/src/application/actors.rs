// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Swarm Flavor Actors
//!
//! Masters are configured concurrently: the primary manager (the first
//! recorded master) initializes the swarm while the others poll until the
//! manager feature checks healthy on it before joining. Workers are configured
//! after every manager, so they join directly.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

use nimbus_core::application::blueprint::Blueprint;
use nimbus_core::application::flavor::{FlavorActors, InstallationScript, ServerCounts};
use nimbus_core::domain::cluster::{ClusterState, Complexity, Flavor, HostDefinition, NodeType};
use nimbus_core::domain::error::ClusterError;
use nimbus_core::domain::installer::{InstallTarget, Variables};
use nimbus_core::domain::provider::Host;

use crate::domain::topology::{
    self, ManagerRole, DEFAULT_IMAGE, MANAGER_FEATURE, NETWORK_FEATURE, WORKER_FEATURE,
};

const REQUIREMENTS_SCRIPT: &str = "swarm_install_requirements.sh";
const REQUIREMENTS_TEMPLATE: &str = include_str!("../../templates/swarm_install_requirements.sh");

const GLOBAL_REQUIREMENTS: &str = "set -euo pipefail
export DEBIAN_FRONTEND=noninteractive
apt-get update -qq
apt-get install -qq -y curl jq ufw";

const DEFAULT_PRIMARY_WAIT: Duration = Duration::from_secs(300);
const PRIMARY_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct SwarmActors {
    primary_wait: Duration,
}

impl SwarmActors {
    pub fn new() -> Self {
        Self {
            primary_wait: DEFAULT_PRIMARY_WAIT,
        }
    }

    /// How long joining managers wait for the primary to initialize the swarm.
    pub fn with_primary_wait(mut self, wait: Duration) -> Self {
        self.primary_wait = wait;
        self
    }

    async fn primary_master(&self, blueprint: &Blueprint) -> Result<Host, ClusterError> {
        blueprint
            .cluster()
            .list_masters()
            .await?
            .first()
            .map(Host::from)
            .ok_or_else(|| {
                ClusterError::Configuration(format!(
                    "cluster '{}' has no master to manage the swarm",
                    blueprint.name()
                ))
            })
    }

    async fn wait_for_primary(&self, blueprint: &Blueprint, primary: &Host) -> Result<(), ClusterError> {
        let target = InstallTarget::Host(primary.clone());
        let token = blueprint.cancellation_token();
        let deadline = tokio::time::Instant::now() + self.primary_wait;
        loop {
            if blueprint
                .check_feature(MANAGER_FEATURE, &target, Variables::new())
                .await?
            {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ClusterError::Configuration(format!(
                    "swarm not initialized on '{}' after {}s",
                    primary.name,
                    self.primary_wait.as_secs()
                )));
            }
            tokio::select! {
                _ = token.cancelled() => return Err(ClusterError::Cancelled),
                _ = tokio::time::sleep(PRIMARY_POLL_INTERVAL) => {}
            }
        }
    }
}

impl Default for SwarmActors {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FlavorActors for SwarmActors {
    fn flavor(&self) -> Flavor {
        Flavor::Swarm
    }

    fn minimum_required_servers(&self, complexity: Complexity) -> ServerCounts {
        topology::required_servers(complexity)
    }

    fn default_gateway_sizing(&self) -> Option<HostDefinition> {
        Some(topology::gateway_sizing())
    }

    fn default_master_sizing(&self) -> Option<HostDefinition> {
        Some(topology::manager_sizing())
    }

    fn default_node_sizing(&self) -> Option<HostDefinition> {
        Some(topology::worker_sizing())
    }

    fn default_image(&self) -> Option<String> {
        Some(DEFAULT_IMAGE.to_string())
    }

    fn node_installation_script(&self, node_type: NodeType) -> Option<InstallationScript> {
        let role = match node_type {
            NodeType::Gateway => return None,
            NodeType::Master => "manager",
            NodeType::PrivateNode | NodeType::PublicNode => "worker",
        };
        Some(InstallationScript::new(REQUIREMENTS_SCRIPT).param("Role", role))
    }

    fn template(&self, name: &str) -> Option<&'static str> {
        (name == REQUIREMENTS_SCRIPT).then_some(REQUIREMENTS_TEMPLATE)
    }

    fn global_system_requirements(&self) -> Option<String> {
        Some(GLOBAL_REQUIREMENTS.to_string())
    }

    async fn configure_master(&self, blueprint: &Blueprint, _index: usize, host: &Host) -> Result<(), ClusterError> {
        let primary = self.primary_master(blueprint).await?;
        let role = ManagerRole::of(&primary, host);
        if role == ManagerRole::Join {
            debug!(host = %host.name, primary = %primary.name, "Waiting for swarm initialization");
            self.wait_for_primary(blueprint, &primary).await?;
        }

        let mut variables = Variables::new();
        variables.insert("Role".to_string(), role.to_string());
        variables.insert("PrimaryMasterIP".to_string(), primary.private_ip.clone());
        variables.insert("ClusterName".to_string(), blueprint.name());
        blueprint
            .add_feature(MANAGER_FEATURE, &InstallTarget::Host(host.clone()), variables)
            .await?;
        info!(host = %host.name, %role, "Swarm manager configured");
        Ok(())
    }

    async fn configure_node(
        &self,
        blueprint: &Blueprint,
        _index: usize,
        host: &Host,
        node_type: NodeType,
    ) -> Result<(), ClusterError> {
        let primary = self.primary_master(blueprint).await?;
        let mut variables = Variables::new();
        variables.insert("PrimaryMasterIP".to_string(), primary.private_ip);
        variables.insert(
            "Public".to_string(),
            (node_type == NodeType::PublicNode).to_string(),
        );
        blueprint
            .add_feature(WORKER_FEATURE, &InstallTarget::Host(host.clone()), variables)
            .await?;
        debug!(host = %host.name, "Swarm worker joined");
        Ok(())
    }

    async fn configure_cluster(&self, blueprint: &Blueprint) -> Result<(), ClusterError> {
        let target = blueprint.cluster_target().await?;
        let mut variables = Variables::new();
        variables.insert("NetworkName".to_string(), format!("{}-overlay", blueprint.name()));
        blueprint.add_feature(NETWORK_FEATURE, &target, variables).await?;
        info!(cluster = %blueprint.name(), "Swarm overlay network created");
        Ok(())
    }

    async fn get_state(&self, blueprint: &Blueprint) -> Result<ClusterState, ClusterError> {
        let target = blueprint.cluster_target().await?;
        let healthy = blueprint
            .check_feature(NETWORK_FEATURE, &target, Variables::new())
            .await?;
        Ok(if healthy {
            ClusterState::Nominal
        } else {
            ClusterState::Degraded
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requirements_script_per_node_type() {
        let actors = SwarmActors::new();
        assert!(actors.node_installation_script(NodeType::Gateway).is_none());

        let manager = actors.node_installation_script(NodeType::Master).unwrap();
        assert_eq!(manager.name, REQUIREMENTS_SCRIPT);
        assert_eq!(manager.params["Role"], "manager");

        let worker = actors.node_installation_script(NodeType::PublicNode).unwrap();
        assert_eq!(worker.params["Role"], "worker");
        assert!(actors.template(REQUIREMENTS_SCRIPT).is_some());
        assert!(actors.template("other.sh").is_none());
    }

    #[test]
    fn test_flavor_defaults() {
        let actors = SwarmActors::default();
        assert_eq!(actors.flavor(), Flavor::Swarm);
        assert_eq!(actors.minimum_required_servers(Complexity::Normal), (3, 3, 0));
        assert_eq!(actors.default_image().as_deref(), Some(DEFAULT_IMAGE));
        assert_eq!(actors.default_gateway_sizing().unwrap().cores, 2);
    }
}
