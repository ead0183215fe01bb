// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Builds swarm clusters through the cluster service on the simulated
//! provider and checks what the swarm actors installed.

use std::sync::Arc;
use std::time::Duration;

use nimbus_core::application::blueprint::{BlueprintSettings, Collaborators};
use nimbus_core::application::cluster_service::{ClusterService, StandardClusterService};
use nimbus_core::application::flavor::FlavorRegistry;
use nimbus_core::domain::cluster::{ClusterRequest, ClusterState, Complexity, Flavor};
use nimbus_core::infrastructure::event_bus::EventBus;
use nimbus_core::infrastructure::installer::{SimulatedInstaller, SimulatedScriptRunner};
use nimbus_core::infrastructure::metadata::InMemoryMetadataStore;
use nimbus_core::infrastructure::providers::SimulatedProvider;
use nimbus_swarm::domain::{MANAGER_FEATURE, NETWORK_FEATURE, WORKER_FEATURE};
use nimbus_swarm::SwarmActors;

struct Fixture {
    provider: SimulatedProvider,
    installer: SimulatedInstaller,
    runner: SimulatedScriptRunner,
    service: StandardClusterService,
}

fn fixture(actors: SwarmActors) -> Fixture {
    let provider = SimulatedProvider::with_defaults();
    let installer = SimulatedInstaller::new();
    let runner = SimulatedScriptRunner::new();
    let service = StandardClusterService::new(
        Arc::new(InMemoryMetadataStore::new()),
        FlavorRegistry::new().with(Arc::new(actors)),
        Collaborators {
            provider: Arc::new(provider.clone()),
            installer: Arc::new(installer.clone()),
            script_runner: Arc::new(runner.clone()),
            event_bus: EventBus::with_default_capacity(),
        },
        BlueprintSettings::default(),
    );
    Fixture {
        provider,
        installer,
        runner,
        service,
    }
}

fn request(complexity: Complexity) -> ClusterRequest {
    ClusterRequest::new("Swarm1", "192.168.0.0/24", Flavor::Swarm).with_complexity(complexity)
}

#[tokio::test]
async fn test_normal_swarm_has_one_initializing_manager() {
    let fx = fixture(SwarmActors::new());
    let outcome = tokio_test::assert_ok!(fx.service.create_cluster(request(Complexity::Normal)).await);
    assert_eq!((outcome.masters, outcome.private_nodes, outcome.public_nodes), (3, 3, 0));

    let managers = fx.installer.records_for(MANAGER_FEATURE);
    assert_eq!(managers.len(), 3);
    let init: Vec<_> = managers
        .iter()
        .filter(|r| r.variables.get("Role").map(String::as_str) == Some("init"))
        .collect();
    assert_eq!(init.len(), 1);
    let primary_ip = init[0].variables["PrimaryMasterIP"].clone();
    for joiner in managers.iter().filter(|r| r.variables["Role"] == "join") {
        assert_eq!(joiner.variables["PrimaryMasterIP"], primary_ip);
        assert!(joiner.started_at >= init[0].finished_at);
    }

    let workers = fx.installer.records_for(WORKER_FEATURE);
    assert_eq!(workers.len(), 3);
    assert!(workers.iter().all(|r| r.variables["Public"] == "false"));
    assert!(workers.iter().all(|r| r.variables["PrimaryMasterIP"] == primary_ip));

    let network = fx.installer.records_for(NETWORK_FEATURE);
    assert_eq!(network.len(), 1);
    assert_eq!(network[0].target, "swarm1");
    assert_eq!(network[0].variables["NetworkName"], "swarm1-overlay");
}

#[tokio::test]
async fn test_state_follows_overlay_network_health() {
    let fx = fixture(SwarmActors::new());
    fx.service.create_cluster(request(Complexity::Small)).await.unwrap();
    assert_eq!(fx.service.cluster_state("swarm1").await.unwrap(), ClusterState::Nominal);

    fx.installer.mark_unhealthy(NETWORK_FEATURE);
    assert_eq!(fx.service.cluster_state("swarm1").await.unwrap(), ClusterState::Degraded);
}

#[tokio::test]
async fn test_requirements_script_runs_on_members_only() {
    let fx = fixture(SwarmActors::new());
    fx.service.create_cluster(request(Complexity::Small)).await.unwrap();

    let scripts = fx.runner.records();
    assert_eq!(scripts.len(), 2);
    assert!(scripts.iter().all(|r| r.script_name == "swarm_install_requirements.sh"));
    assert!(scripts.iter().all(|r| !r.host.starts_with("gw-")));

    let manager = scripts.iter().find(|r| r.host == "swarm1-master-1").unwrap();
    assert!(manager.content.contains("set -euo pipefail"));
    assert!(manager.content.contains("echo \"manager\" > /opt/nimbus/swarm/role"));
    assert!(manager.content.contains("DNS=1.1.1.1 8.8.8.8"));
    let worker = scripts.iter().find(|r| r.host == "swarm1-node-1").unwrap();
    assert!(worker.content.contains("echo \"worker\" > /opt/nimbus/swarm/role"));
}

#[tokio::test]
async fn test_failed_swarm_init_rolls_back() {
    let fx = fixture(SwarmActors::new().with_primary_wait(Duration::from_millis(300)));
    fx.installer.fail_feature_on(MANAGER_FEATURE, "swarm1-master-");

    let err = fx
        .service
        .create_cluster(request(Complexity::Normal))
        .await
        .unwrap_err();
    let text = err.to_string();
    assert_eq!(text.matches("failed to add feature 'docker-swarm-manager'").count(), 1, "{}", text);
    assert_eq!(text.matches("swarm not initialized").count(), 2, "{}", text);

    assert!(fx.provider.is_empty());
    assert!(fx.service.list_clusters().await.unwrap().is_empty());
}
