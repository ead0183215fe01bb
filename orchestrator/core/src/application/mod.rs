// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod blueprint;
pub mod cluster_service;
pub mod controller;
pub mod fanout;
pub mod flavor;
pub mod network_service;
pub mod rollback;

// Re-export use cases for convenience
pub use blueprint::{Blueprint, BlueprintSettings, Collaborators};
pub use cluster_service::{ClusterService, ClusterSummary, StandardClusterService};
pub use flavor::{FlavorActors, FlavorRegistry, InstallationScript, NoopActors};
