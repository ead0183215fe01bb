// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! End-to-end construction tests against the simulated provider and installer.
//!
//! Covers the happy path, phase ordering, rollback after master and node
//! failures, aggregation of sibling errors, keep-on-failure and cancellation,
//! plus hook failures that halt later phases and feature gating settings.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use nimbus_core::application::blueprint::{Blueprint, BlueprintSettings, Collaborators};
use nimbus_core::application::controller::ClusterController;
use nimbus_core::application::flavor::{FlavorActors, InstallationScript, ServerCounts};
use nimbus_core::domain::cluster::{
    ClusterIdentity, ClusterRequest, ClusterState, Complexity, Flavor, NodeType,
};
use nimbus_core::domain::error::ClusterError;
use nimbus_core::domain::events::{ClusterEvent, Phase};
use nimbus_core::domain::properties::FeaturesV1;
use nimbus_core::domain::provider::Host;
use nimbus_core::infrastructure::event_bus::EventBus;
use nimbus_core::infrastructure::installer::{SimulatedInstaller, SimulatedScriptRunner};
use nimbus_core::infrastructure::metadata::InMemoryMetadataStore;
use nimbus_core::infrastructure::providers::SimulatedProvider;

const REQUIREMENTS_TEMPLATE: &str = "#!/bin/bash\n{{GlobalSystemRequirements}}\necho \"{{ClusterName}} {{Role}}\"\n";

/// Flavor recording every configuration hook in call order.
struct RecordingFlavor {
    counts: ServerCounts,
    log: Arc<Mutex<Vec<String>>>,
    /// Hooks whose log entry starts with this prefix fail after recording.
    fail_on: Option<&'static str>,
}

impl RecordingFlavor {
    fn new(counts: ServerCounts) -> (Arc<Self>, Arc<Mutex<Vec<String>>>) {
        Self::build(counts, None)
    }

    fn failing_on(counts: ServerCounts, prefix: &'static str) -> (Arc<Self>, Arc<Mutex<Vec<String>>>) {
        Self::build(counts, Some(prefix))
    }

    fn build(counts: ServerCounts, fail_on: Option<&'static str>) -> (Arc<Self>, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        (
            Arc::new(Self {
                counts,
                log: log.clone(),
                fail_on,
            }),
            log,
        )
    }

    fn record(&self, entry: String) -> Result<(), ClusterError> {
        let refused = self.fail_on.is_some_and(|prefix| entry.starts_with(prefix));
        self.log.lock().push(entry.clone());
        if refused {
            return Err(ClusterError::Configuration(format!("hook refused {}", entry)));
        }
        Ok(())
    }
}

#[async_trait]
impl FlavorActors for RecordingFlavor {
    fn flavor(&self) -> Flavor {
        Flavor::K8s
    }

    fn minimum_required_servers(&self, _complexity: Complexity) -> ServerCounts {
        self.counts
    }

    fn node_installation_script(&self, node_type: NodeType) -> Option<InstallationScript> {
        Some(InstallationScript::new("requirements.sh").param("Role", node_type.label()))
    }

    fn template(&self, name: &str) -> Option<&'static str> {
        (name == "requirements.sh").then_some(REQUIREMENTS_TEMPLATE)
    }

    fn global_system_requirements(&self) -> Option<String> {
        Some("set -e".to_string())
    }

    async fn configure_gateway(&self, _blueprint: &Blueprint) -> Result<(), ClusterError> {
        self.record("gateway".to_string())
    }

    async fn configure_master(&self, _blueprint: &Blueprint, _index: usize, host: &Host) -> Result<(), ClusterError> {
        self.record(format!("master:{}", host.name))
    }

    async fn configure_node(
        &self,
        _blueprint: &Blueprint,
        _index: usize,
        host: &Host,
        node_type: NodeType,
    ) -> Result<(), ClusterError> {
        self.record(format!("{}:{}", node_type.label(), host.name))
    }

    async fn configure_cluster(&self, _blueprint: &Blueprint) -> Result<(), ClusterError> {
        self.record("cluster".to_string())
    }

    async fn get_state(&self, _blueprint: &Blueprint) -> Result<ClusterState, ClusterError> {
        Ok(ClusterState::Nominal)
    }
}

struct Harness {
    provider: SimulatedProvider,
    installer: SimulatedInstaller,
    runner: SimulatedScriptRunner,
    store: InMemoryMetadataStore,
    events: EventBus,
}

impl Harness {
    fn new() -> Self {
        Self {
            provider: SimulatedProvider::with_defaults(),
            installer: SimulatedInstaller::new(),
            runner: SimulatedScriptRunner::new(),
            store: InMemoryMetadataStore::new(),
            events: EventBus::with_default_capacity(),
        }
    }

    fn blueprint(&self, actors: Arc<dyn FlavorActors>) -> Blueprint {
        self.blueprint_with("demo", actors, BlueprintSettings::default())
    }

    fn blueprint_with(&self, name: &str, actors: Arc<dyn FlavorActors>, settings: BlueprintSettings) -> Blueprint {
        Blueprint::new(
            ClusterIdentity::new(name, actors.flavor(), Complexity::Normal),
            Arc::new(self.store.clone()),
            actors,
            Collaborators {
                provider: Arc::new(self.provider.clone()),
                installer: Arc::new(self.installer.clone()),
                script_runner: Arc::new(self.runner.clone()),
                event_bus: self.events.clone(),
            },
            settings,
        )
    }

    async fn recorded_state(&self) -> ClusterState {
        ClusterController::load("demo", Arc::new(self.store.clone()))
            .await
            .unwrap()
            .recorded_state()
            .await
            .unwrap()
    }
}

fn request() -> ClusterRequest {
    ClusterRequest::new("demo", "10.10.0.0/16", Flavor::K8s)
        .with_complexity(Complexity::Normal)
        .with_tenant("acme")
}

#[tokio::test]
async fn test_successful_construction_reaches_created() {
    let harness = Harness::new();
    let (actors, _log) = RecordingFlavor::new((2, 3, 1));
    let blueprint = harness.blueprint(actors);

    let outcome = tokio_test::assert_ok!(blueprint.construct(&request()).await);
    assert_eq!(outcome.state, ClusterState::Created);
    assert_eq!((outcome.masters, outcome.private_nodes, outcome.public_nodes), (2, 3, 1));
    assert!(outcome.public_ip.is_some());
    assert_eq!(harness.recorded_state().await, ClusterState::Created);

    let names: HashSet<String> = harness.provider.created_host_names().into_iter().collect();
    for expected in [
        "demo-master-1",
        "demo-master-2",
        "demo-node-1",
        "demo-node-2",
        "demo-node-3",
        "demo-pubnode-1",
    ] {
        assert!(names.contains(expected), "missing host {}", expected);
    }
    // gateway + 6 members
    assert_eq!(harness.provider.hosts().len(), 7);
    assert_eq!(harness.installer.records_for("docker").len(), 7);
    assert_eq!(harness.runner.records().len(), 7);
    assert!(harness.installer.records_for("proxycache-client").is_empty());
    assert!(harness.installer.records_for("proxycache-server").is_empty());

    let remote_desktop = harness.installer.records_for("remotedesktop");
    assert_eq!(remote_desktop.len(), 1);
    assert_eq!(remote_desktop[0].target, "demo");
    assert_eq!(remote_desktop[0].variables.get("Username").map(String::as_str), Some("cladm"));
    assert_eq!(
        remote_desktop[0].variables.get("Password").map(String::len),
        Some(16)
    );

    let features = blueprint.cluster().properties().snapshot::<FeaturesV1>().await.unwrap();
    assert!(features.disabled.contains("proxycache"));
    assert!(features.installed.contains("docker"));
    assert!(features.installed.contains("reverseproxy"));

    assert_eq!(blueprint.state().await.unwrap(), ClusterState::Nominal);
}

#[tokio::test]
async fn test_requirements_scripts_are_rendered_per_node_type() {
    let harness = Harness::new();
    let (actors, _log) = RecordingFlavor::new((1, 1, 0));
    harness.blueprint(actors).construct(&request()).await.unwrap();

    let scripts = harness.runner.records();
    let master = scripts.iter().find(|r| r.host == "demo-master-1").unwrap();
    assert!(master.content.starts_with("#!/bin/bash\nset -e\n"));
    assert!(master.content.contains("demo master"));
    let node = scripts.iter().find(|r| r.host == "demo-node-1").unwrap();
    assert!(node.content.contains("demo private node"));
}

#[tokio::test]
async fn test_configuration_follows_phase_order() {
    let harness = Harness::new();
    let (actors, log) = RecordingFlavor::new((3, 2, 2));
    harness.blueprint(actors).construct(&request()).await.unwrap();

    let log = log.lock().clone();
    let position = |pred: &dyn Fn(&String) -> bool| -> Vec<usize> {
        log.iter().enumerate().filter(|(_, e)| pred(e)).map(|(i, _)| i).collect()
    };
    let gateway = position(&|e: &String| e == "gateway");
    let masters = position(&|e: &String| e.starts_with("master:"));
    let nodes = position(&|e: &String| e.starts_with("private node:") || e.starts_with("public node:"));
    let cluster = position(&|e: &String| e == "cluster");

    assert_eq!(gateway.len(), 1);
    assert_eq!(masters.len(), 3);
    assert_eq!(nodes.len(), 4);
    assert_eq!(cluster, vec![log.len() - 1]);
    assert!(masters.iter().all(|m| *m > gateway[0]));
    assert!(nodes.iter().all(|n| masters.iter().all(|m| n > m)));
}

#[tokio::test]
async fn test_events_trace_every_phase() {
    let harness = Harness::new();
    let mut receiver = harness.events.subscribe_cluster("demo");
    let (actors, _log) = RecordingFlavor::new((1, 1, 0));
    harness.blueprint(actors).construct(&request()).await.unwrap();

    let mut started = Vec::new();
    let mut last = None;
    while let Ok(Ok(event)) =
        tokio::time::timeout(Duration::from_millis(50), receiver.recv()).await
    {
        if let ClusterEvent::PhaseStarted { phase, .. } = &event {
            started.push(*phase);
        }
        last = Some(event);
    }
    assert_eq!(
        started,
        vec![
            Phase::Network,
            Phase::MetadataSeed,
            Phase::Topology,
            Phase::Configuration,
            Phase::NodeConfiguration,
            Phase::ClusterConfiguration,
        ]
    );
    assert!(matches!(last, Some(ClusterEvent::ConstructionSucceeded { .. })));
}

#[tokio::test]
async fn test_master_failure_rolls_back_everything() {
    let harness = Harness::new();
    harness.provider.fail_host_creation_matching("demo-master-2");
    let (actors, log) = RecordingFlavor::new((2, 2, 1));

    let err = harness
        .blueprint(actors)
        .construct(&request())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("demo-master-2"), "{}", err);

    assert!(harness.provider.is_empty(), "leftovers: {:?}", harness.provider.hosts());
    assert!(!harness.store.contains("clusters/demo"));
    // No configuration ran on a broken topology
    assert!(log.lock().is_empty());
}

#[tokio::test]
async fn test_sibling_node_failures_are_all_reported() {
    let harness = Harness::new();
    harness.provider.fail_host_creation_matching("demo-node-");
    let (actors, _log) = RecordingFlavor::new((1, 3, 0));

    let err = harness
        .blueprint(actors)
        .construct(&request())
        .await
        .unwrap_err();
    let text = err.to_string();
    assert_eq!(text.lines().count(), 3, "{}", text);
    for name in ["demo-node-1", "demo-node-2", "demo-node-3"] {
        assert!(text.contains(name), "{} missing from {}", name, text);
    }
    assert!(harness.provider.is_empty());
}

#[tokio::test]
async fn test_docker_failure_names_feature_and_host() {
    let harness = Harness::new();
    harness.installer.fail_feature_on("docker", "demo-master-1");
    let (actors, _log) = RecordingFlavor::new((1, 1, 0));

    let err = harness
        .blueprint(actors)
        .construct(&request())
        .await
        .unwrap_err();
    assert!(
        err.to_string()
            .contains("failed to add feature 'docker' on host 'demo-master-1'"),
        "{}",
        err
    );
    assert!(harness.provider.is_empty());
}

#[tokio::test]
async fn test_requirements_exit_code_is_reported() {
    let harness = Harness::new();
    harness.runner.exit_with_on("demo-pubnode", 3);
    let (actors, _log) = RecordingFlavor::new((1, 0, 1));

    let err = tokio_test::assert_err!(harness.blueprint(actors).construct(&request()).await);
    assert!(err
        .to_string()
        .contains("failed to install system requirements on 'demo-pubnode-1' with error code '3'"));
    assert!(harness.provider.is_empty());
}

#[tokio::test]
async fn test_keep_on_failure_preserves_resources() {
    let harness = Harness::new();
    harness.provider.fail_host_creation_matching("demo-node-2");
    let (actors, _log) = RecordingFlavor::new((1, 2, 0));
    let blueprint = harness.blueprint(actors);

    let result = blueprint.construct(&request().keep_on_failure(true)).await;
    assert!(result.is_err());

    assert_eq!(harness.recorded_state().await, ClusterState::Error);
    assert_eq!(harness.provider.networks().len(), 1);
    let names: HashSet<String> = harness.provider.hosts().into_iter().map(|h| h.name).collect();
    assert!(names.contains("demo-master-1"));
    assert!(names.contains("demo-node-1"));
    assert!(harness.provider.key_pair_names().contains("cluster_demo_cladm_key"));

    let nodes = blueprint.cluster().nodes().await.unwrap();
    let masters: Vec<&str> = nodes.masters.iter().map(|n| n.name.as_str()).collect();
    let private: Vec<&str> = nodes.private_nodes.iter().map(|n| n.name.as_str()).collect();
    assert_eq!(masters, vec!["demo-master-1"]);
    assert!(private.contains(&"demo-node-1"), "{:?}", private);
    assert!(!private.contains(&"demo-node-2"), "{:?}", private);
}

#[tokio::test]
async fn test_cancellation_rolls_back() {
    let harness = Harness::new();
    harness
        .provider
        .delay_host_creation("demo-node", Duration::from_millis(300));
    let (actors, _log) = RecordingFlavor::new((1, 2, 0));
    let blueprint = harness.blueprint(actors);
    let token = blueprint.cancellation_token();

    let running = {
        let blueprint = blueprint.clone();
        tokio::spawn(async move { blueprint.construct(&request()).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    token.cancel();

    let err = running.await.unwrap().unwrap_err();
    assert!(err.is_cancelled(), "{}", err);
    assert!(harness.provider.is_empty());
    assert!(!harness.store.contains("clusters/demo"));
}

#[tokio::test]
async fn test_network_failure_leaves_nothing_behind() {
    let harness = Harness::new();
    harness.provider.fail_gateway_creation(true);
    let (actors, _log) = RecordingFlavor::new((1, 1, 0));

    let err = harness
        .blueprint(actors)
        .construct(&request())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("failed to create gateway"));
    assert!(harness.provider.is_empty());
    assert!(!harness.store.contains("clusters/demo"));
}

#[tokio::test]
async fn test_gateway_configuration_failure_stops_before_masters() {
    let harness = Harness::new();
    let (actors, log) = RecordingFlavor::failing_on((2, 2, 1), "gateway");

    let err = harness
        .blueprint(actors)
        .construct(&request())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("hook refused gateway"), "{}", err);

    assert_eq!(*log.lock(), vec!["gateway".to_string()]);
    assert!(harness.provider.is_empty(), "leftovers: {:?}", harness.provider.hosts());
    assert!(!harness.store.contains("clusters/demo"));
}

#[tokio::test]
async fn test_master_configuration_failure_skips_node_configuration() {
    let harness = Harness::new();
    let (actors, log) = RecordingFlavor::failing_on((2, 2, 1), "master:");

    let err = harness
        .blueprint(actors)
        .construct(&request())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("hook refused master:demo-master-"), "{}", err);

    let log = log.lock().clone();
    assert_eq!(log[0], "gateway");
    assert!(log.iter().any(|e| e.starts_with("master:")));
    assert!(
        log.iter()
            .all(|e| !e.starts_with("private node:") && !e.starts_with("public node:") && e != "cluster"),
        "{:?}",
        log
    );
    assert!(harness.provider.is_empty(), "leftovers: {:?}", harness.provider.hosts());
}

#[tokio::test]
async fn test_proxy_cache_installed_when_not_force_disabled() {
    let harness = Harness::new();
    let (actors, _log) = RecordingFlavor::new((1, 2, 1));
    let settings = BlueprintSettings {
        force_disable_proxycache: false,
        ..BlueprintSettings::default()
    };
    let blueprint = harness.blueprint_with("demo", actors, settings);

    tokio_test::assert_ok!(blueprint.construct(&request()).await);

    let server = harness.installer.records_for("proxycache-server");
    assert_eq!(server.len(), 1);
    assert_eq!(server[0].target, "gw-net-demo");
    let clients: HashSet<String> = harness
        .installer
        .records_for("proxycache-client")
        .into_iter()
        .map(|r| r.target)
        .collect();
    let expected: HashSet<String> = ["demo-master-1", "demo-node-1", "demo-node-2", "demo-pubnode-1"]
        .into_iter()
        .map(String::from)
        .collect();
    assert_eq!(clients, expected);

    let features = blueprint.cluster().properties().snapshot::<FeaturesV1>().await.unwrap();
    assert!(!features.disabled.contains("proxycache"));
}

#[tokio::test]
async fn test_disabled_features_are_skipped() {
    let harness = Harness::new();
    let (actors, _log) = RecordingFlavor::new((1, 1, 0));
    let settings = BlueprintSettings {
        disabled_features: vec!["reverseproxy".to_string(), "remotedesktop".to_string()],
        ..BlueprintSettings::default()
    };
    let blueprint = harness.blueprint_with("demo", actors, settings);

    let outcome = tokio_test::assert_ok!(blueprint.construct(&request()).await);
    assert_eq!(outcome.state, ClusterState::Created);

    assert!(harness.installer.records_for("reverseproxy").is_empty());
    assert!(harness.installer.records_for("remotedesktop").is_empty());
    assert_eq!(harness.installer.records_for("docker").len(), 3);

    let features = blueprint.cluster().properties().snapshot::<FeaturesV1>().await.unwrap();
    assert!(features.disabled.contains("reverseproxy"));
    assert!(features.disabled.contains("remotedesktop"));
    assert!(!features.installed.contains("reverseproxy"));
}

#[tokio::test]
async fn test_mixed_case_name_builds_lowercase_resources() {
    let harness = Harness::new();
    let (actors, _log) = RecordingFlavor::new((1, 1, 0));
    let blueprint = harness.blueprint_with("Demo", actors, BlueprintSettings::default());
    assert_eq!(blueprint.name(), "demo");

    tokio_test::assert_ok!(blueprint.construct(&request()).await);

    let names: HashSet<String> = harness.provider.created_host_names().into_iter().collect();
    assert!(names.contains("demo-master-1"), "{:?}", names);
    assert!(names.contains("demo-node-1"), "{:?}", names);
    assert!(names.iter().all(|n| n.to_lowercase() == *n), "{:?}", names);
    assert_eq!(harness.recorded_state().await, ClusterState::Created);
}
