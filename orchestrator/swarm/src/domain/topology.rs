// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Swarm Topology
//!
//! How many managers and workers a swarm needs for each complexity, how large
//! they are, and which manager bootstraps the swarm.
//!
//! Manager counts are odd so the raft quorum survives the loss of
//! `(n - 1) / 2` managers.

use nimbus_core::domain::cluster::{Complexity, HostDefinition};
use nimbus_core::domain::provider::Host;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const MANAGER_FEATURE: &str = "docker-swarm-manager";
pub const WORKER_FEATURE: &str = "docker-swarm-worker";
pub const NETWORK_FEATURE: &str = "docker-swarm-network";

pub const DEFAULT_IMAGE: &str = "Ubuntu 20.04";

/// (managers, private workers, public workers) for a complexity.
pub fn required_servers(complexity: Complexity) -> (usize, usize, usize) {
    match complexity {
        Complexity::Small => (1, 1, 0),
        Complexity::Normal => (3, 3, 0),
        Complexity::Large => (5, 6, 0),
    }
}

pub fn gateway_sizing() -> HostDefinition {
    HostDefinition::new(2, 3.5, 60, DEFAULT_IMAGE)
}

pub fn manager_sizing() -> HostDefinition {
    HostDefinition::new(2, 7.0, 60, DEFAULT_IMAGE)
}

pub fn worker_sizing() -> HostDefinition {
    HostDefinition::new(4, 15.0, 100, DEFAULT_IMAGE)
}

/// What a manager does when it joins the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManagerRole {
    /// Runs `docker swarm init`; only the primary manager does this.
    Init,
    Join,
}

impl ManagerRole {
    /// Role of `manager` given the swarm's primary manager.
    pub fn of(primary: &Host, manager: &Host) -> Self {
        if primary.id == manager.id {
            ManagerRole::Init
        } else {
            ManagerRole::Join
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ManagerRole::Init => "init",
            ManagerRole::Join => "join",
        }
    }
}

impl fmt::Display for ManagerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manager_counts_are_odd() {
        for complexity in [Complexity::Small, Complexity::Normal, Complexity::Large] {
            let (managers, workers, public) = required_servers(complexity);
            assert_eq!(managers % 2, 1);
            assert!(workers >= 1);
            assert_eq!(public, 0);
        }
        assert_eq!(required_servers(Complexity::Large), (5, 6, 0));
    }

    fn host(id: &str) -> Host {
        Host {
            id: id.to_string(),
            name: format!("demo-master-{}", id),
            private_ip: "10.0.0.2".to_string(),
            public_ip: None,
        }
    }

    #[test]
    fn test_only_primary_manager_inits() {
        assert_eq!(ManagerRole::of(&host("1"), &host("1")), ManagerRole::Init);
        assert_eq!(ManagerRole::of(&host("1"), &host("2")), ManagerRole::Join);
        assert_eq!(ManagerRole::of(&host("1"), &host("3")).to_string(), "join");
    }

    #[test]
    fn test_sizings_use_swarm_image() {
        assert_eq!(gateway_sizing().ram_size, 3.5);
        assert_eq!(manager_sizing().image_id, DEFAULT_IMAGE);
        assert_eq!(worker_sizing().cores, 4);
    }
}
