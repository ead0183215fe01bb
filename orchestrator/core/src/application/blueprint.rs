// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Cluster Blueprint
//!
//! The blueprint drives the construction of a cluster through six phases:
//!
//! 1. **Network**: private network, gateway key pair and gateway host.
//! 2. **Metadata seed**: identity and the initial property groups.
//! 3. **Topology**: gateway installation, master creation and node creation
//!    run concurrently; node creation keeps going in the background.
//! 4. **Configuration**: gateway, then masters, then joins node creation.
//! 5. **Node configuration**: private and public nodes concurrently.
//! 6. **Cluster configuration**: cluster-wide features, then state `Created`.
//!
//! Flavors hook into every phase through [`FlavorActors`]. Any failure rolls
//! back what was built (nodes, masters, network, metadata) unless the request
//! asked to keep the resources, in which case the cluster is left in state
//! `Error`.

use chrono::Utc;
use rand::Rng;
use serde_json::json;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::controller::ClusterController;
use crate::application::fanout::fan_out;
use crate::application::flavor::FlavorActors;
use crate::application::network_service::{NetworkService, NetworkWithGateway};
use crate::application::rollback::RollbackGuard;
use crate::domain::cluster::{
    ClusterIdentity, ClusterRequest, ClusterState, ConstructionOutcome, HostDefinition, Node,
    NodeType, DEFAULT_IMAGE,
};
use crate::domain::config::OrchestratorConfig;
use crate::domain::error::ClusterError;
use crate::domain::events::{ClusterEvent, Phase};
use crate::domain::installer::{
    FeatureInstaller, InstallTarget, RemoteScriptRunner, Settings, Variables,
};
use crate::domain::metadata::MetadataStore;
use crate::domain::properties::{CompositeV1, DefaultsV1, FeaturesV1, NetworkV1, NodesV1};
use crate::domain::provider::{Host, HostRequest, InfrastructureProvider, IpVersion, ProviderError};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::script_template_engine::ScriptTemplateEngine;

/// Administrator account created on every cluster host.
pub const ADMIN_USER: &str = "cladm";

const ADMIN_PASSWORD_LENGTH: usize = 16;
const PASSWORD_CHARSET: &[u8] =
    b"ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz23456789-_.+";

/// Extra time granted per master on top of the base host timeout.
const MASTER_TIMEOUT_STEP: Duration = Duration::from_secs(60);

pub fn network_name(cluster: &str) -> String {
    format!("net-{}", cluster.to_lowercase())
}

pub fn cluster_key_pair_name(cluster: &str) -> String {
    format!("cluster_{}_{}_key", cluster, ADMIN_USER)
}

fn generate_password() -> String {
    let mut rng = rand::rng();
    (0..ADMIN_PASSWORD_LENGTH)
        .map(|_| PASSWORD_CHARSET[rng.random_range(0..PASSWORD_CHARSET.len())] as char)
        .collect()
}

/// Tunables applied to every blueprint.
#[derive(Debug, Clone)]
pub struct BlueprintSettings {
    pub max_parallel_hosts: usize,
    pub host_timeout: Duration,
    pub force_disable_proxycache: bool,
    pub disabled_features: Vec<String>,
}

impl Default for BlueprintSettings {
    fn default() -> Self {
        Self {
            max_parallel_hosts: 64,
            host_timeout: Duration::from_secs(600),
            force_disable_proxycache: true,
            disabled_features: Vec::new(),
        }
    }
}

impl From<&OrchestratorConfig> for BlueprintSettings {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            max_parallel_hosts: config.spec.orchestration.max_parallel_hosts,
            host_timeout: config.spec.orchestration.host_timeout(),
            force_disable_proxycache: config.spec.features.force_disable_proxycache,
            disabled_features: config.spec.features.disabled.clone(),
        }
    }
}

/// External services a blueprint talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub provider: Arc<dyn InfrastructureProvider>,
    pub installer: Arc<dyn FeatureInstaller>,
    pub script_runner: Arc<dyn RemoteScriptRunner>,
    pub event_bus: EventBus,
}

/// Host sizings resolved for one construction.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSizing {
    pub image: String,
    pub gateway: HostDefinition,
    pub master: HostDefinition,
    pub node: HostDefinition,
}

/// Resolves the image and the sizing of every tier.
///
/// A flavor default replaces the baseline entirely; the resolved image is
/// forced onto it. The request's node definition is merged over the node tier
/// with [`HostDefinition::complement`].
pub fn resolve_sizing(actors: &dyn FlavorActors, request: &ClusterRequest) -> ResolvedSizing {
    let image = actors
        .default_image()
        .filter(|i| !i.is_empty())
        .unwrap_or_else(|| DEFAULT_IMAGE.to_string());

    let with_image = |def: Option<HostDefinition>, baseline: HostDefinition| {
        let mut def = def.unwrap_or(baseline);
        def.image_id = image.clone();
        def
    };
    let gateway = with_image(actors.default_gateway_sizing(), HostDefinition::gateway_baseline(&image));
    let master = with_image(actors.default_master_sizing(), HostDefinition::node_baseline(&image));
    let node_tier = with_image(actors.default_node_sizing(), HostDefinition::node_baseline(&image));
    let node = HostDefinition::complement(request.nodes_def.as_ref(), &node_tier);

    ResolvedSizing {
        image,
        gateway,
        master,
        node,
    }
}

/// Settles with the result of a spawned task.
struct Completion {
    label: &'static str,
    rx: oneshot::Receiver<Result<(), ClusterError>>,
}

impl Completion {
    fn spawn<F>(label: &'static str, task: F) -> Self
    where
        F: Future<Output = Result<(), ClusterError>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let _ = tx.send(task.await);
        });
        Self { label, rx }
    }

    async fn wait(self) -> Result<(), ClusterError> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(ClusterError::Aggregate(format!(
                "{} ended without reporting a result",
                self.label
            ))),
        }
    }
}

/// What a construction has built so far, for rollback.
#[derive(Default)]
struct Progress {
    network: Option<NetworkWithGateway>,
    cluster_key_pair: Option<String>,
    metadata_seeded: bool,
    private_nodes: Option<Completion>,
    public_nodes: Option<Completion>,
}

impl Progress {
    /// Waits for background node creation still in flight.
    async fn settle(&mut self) {
        for completion in [self.private_nodes.take(), self.public_nodes.take()]
            .into_iter()
            .flatten()
        {
            let label = completion.label;
            if let Err(e) = completion.wait().await {
                debug!("{} settled with error: {}", label, e);
            }
        }
    }
}

struct BlueprintInner {
    cluster: ClusterController,
    actors: Arc<dyn FlavorActors>,
    collaborators: Collaborators,
    network_service: NetworkService,
    templates: ScriptTemplateEngine,
    settings: BlueprintSettings,
    cancel: CancellationToken,
    keep_on_failure: AtomicBool,
}

/// Construction driver of one cluster. Cheap to clone.
#[derive(Clone)]
pub struct Blueprint {
    inner: Arc<BlueprintInner>,
}

impl Blueprint {
    pub fn new(
        identity: ClusterIdentity,
        store: Arc<dyn MetadataStore>,
        actors: Arc<dyn FlavorActors>,
        collaborators: Collaborators,
        settings: BlueprintSettings,
    ) -> Self {
        Self::with_controller(ClusterController::new(identity, store), actors, collaborators, settings)
    }

    /// Blueprint driving an existing controller, such as one loaded from the
    /// store.
    pub fn with_controller(
        cluster: ClusterController,
        actors: Arc<dyn FlavorActors>,
        collaborators: Collaborators,
        settings: BlueprintSettings,
    ) -> Self {
        let network_service = NetworkService::new(collaborators.provider.clone());
        Self {
            inner: Arc::new(BlueprintInner {
                cluster,
                actors,
                collaborators,
                network_service,
                templates: ScriptTemplateEngine::new(),
                settings,
                cancel: CancellationToken::new(),
                keep_on_failure: AtomicBool::new(false),
            }),
        }
    }

    pub fn name(&self) -> String {
        self.inner.cluster.name()
    }

    pub fn cluster(&self) -> &ClusterController {
        &self.inner.cluster
    }

    pub fn actors(&self) -> &Arc<dyn FlavorActors> {
        &self.inner.actors
    }

    pub fn provider(&self) -> &Arc<dyn InfrastructureProvider> {
        &self.inner.collaborators.provider
    }

    pub fn installer(&self) -> &Arc<dyn FeatureInstaller> {
        &self.inner.collaborators.installer
    }

    pub fn settings(&self) -> &BlueprintSettings {
        &self.inner.settings
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.inner.collaborators.event_bus
    }

    /// Cancelling the token makes the running construction fail with
    /// [`ClusterError::Cancelled`] at its next checkpoint and roll back.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    fn keep_on_failure(&self) -> bool {
        self.inner.keep_on_failure.load(Ordering::SeqCst)
    }

    fn check_cancelled(&self) -> Result<(), ClusterError> {
        if self.inner.cancel.is_cancelled() {
            Err(ClusterError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn publish(&self, event: ClusterEvent) {
        self.event_bus().publish(event);
    }

    fn phase_started(&self, phase: Phase) {
        info!(cluster = %self.name(), %phase, "Phase started");
        self.publish(ClusterEvent::PhaseStarted {
            cluster: self.name(),
            phase,
            started_at: Utc::now(),
        });
    }

    fn phase_completed(&self, phase: Phase) {
        debug!(cluster = %self.name(), %phase, "Phase completed");
        self.publish(ClusterEvent::PhaseCompleted {
            cluster: self.name(),
            phase,
            completed_at: Utc::now(),
        });
    }

    // ========================================================================
    // Construction
    // ========================================================================

    /// Builds the cluster described by `request`.
    pub async fn construct(&self, request: &ClusterRequest) -> Result<ConstructionOutcome, ClusterError> {
        let name = self.name();
        self.inner
            .keep_on_failure
            .store(request.keep_on_failure, Ordering::SeqCst);
        info!(cluster = %name, flavor = %request.flavor, complexity = %request.complexity, "Constructing cluster");
        self.publish(ClusterEvent::ConstructionStarted {
            cluster: name.clone(),
            flavor: request.flavor,
            started_at: Utc::now(),
        });

        let mut progress = Progress::default();
        let result = self.construct_phases(request, &mut progress).await;
        match result {
            Ok(outcome) => {
                metrics::counter!("nimbus_constructions_total", "outcome" => "success").increment(1);
                info!(cluster = %name, "Cluster created");
                self.publish(ClusterEvent::ConstructionSucceeded {
                    cluster: name,
                    state: outcome.state,
                    completed_at: Utc::now(),
                });
                Ok(outcome)
            }
            Err(err) => {
                error!(cluster = %name, "Cluster construction failed: {}", err);
                progress.settle().await;
                let kept = request.keep_on_failure;
                if kept {
                    metrics::counter!("nimbus_constructions_total", "outcome" => "kept").increment(1);
                    warn!(cluster = %name, "Keeping resources of failed construction");
                    if progress.metadata_seeded {
                        if let Err(e) = self.cluster().set_state(ClusterState::Error).await {
                            warn!(cluster = %name, "Failed to record state 'Error': {}", e);
                        }
                    }
                } else {
                    metrics::counter!("nimbus_constructions_total", "outcome" => "rolled_back").increment(1);
                    self.rollback(progress, &err).await;
                }
                self.publish(ClusterEvent::ConstructionFailed {
                    cluster: name,
                    error: err.to_string(),
                    resources_kept: kept,
                    failed_at: Utc::now(),
                });
                Err(err)
            }
        }
    }

    async fn construct_phases(
        &self,
        request: &ClusterRequest,
        progress: &mut Progress,
    ) -> Result<ConstructionOutcome, ClusterError> {
        // Phase 1
        self.phase_started(Phase::Network);
        let password = generate_password();
        self.cluster().update_identity(|id| id.admin_password = password);
        let sizing = resolve_sizing(self.actors().as_ref(), request);
        let network = self
            .inner
            .network_service
            .create_network_with_gateway(
                &network_name(&self.name()),
                &request.cidr,
                IpVersion::IPv4,
                &sizing.gateway,
            )
            .await?;
        progress.network = Some(network.clone());
        self.phase_completed(Phase::Network);
        self.check_cancelled()?;

        // Phase 2
        self.phase_started(Phase::MetadataSeed);
        self.seed_metadata(request, &sizing, &network, progress).await?;
        self.phase_completed(Phase::MetadataSeed);
        self.check_cancelled()?;

        // Phase 3
        self.phase_started(Phase::Topology);
        let (masters_count, private_count, public_count) =
            self.actors().minimum_required_servers(request.complexity);
        debug!(
            cluster = %self.name(),
            masters = masters_count,
            private_nodes = private_count,
            public_nodes = public_count,
            "Topology resolved"
        );

        let gateway_install = {
            let bp = self.clone();
            let gateway = network.gateway.clone();
            Completion::spawn("gateway installation", async move {
                bp.install_gateway(&gateway).await
            })
        };
        let masters_creation = {
            let bp = self.clone();
            let def = sizing.master.clone();
            Completion::spawn("master creation", async move {
                bp.create_masters(masters_count, def).await
            })
        };
        progress.private_nodes = Some({
            let bp = self.clone();
            let def = sizing.node.clone();
            Completion::spawn("private node creation", async move {
                bp.create_nodes(private_count, false, def).await
            })
        });
        progress.public_nodes = Some({
            let bp = self.clone();
            let def = sizing.node.clone();
            Completion::spawn("public node creation", async move {
                bp.create_nodes(public_count, true, def).await
            })
        });

        let mut gateway_result = gateway_install.wait().await;
        let mut masters_result = masters_creation.wait().await;

        // Phase 4
        if gateway_result.is_ok() && masters_result.is_ok() {
            self.phase_completed(Phase::Topology);
            self.check_cancelled()?;
            self.phase_started(Phase::Configuration);
            gateway_result = self.configure_gateway(&network.gateway).await;
            if gateway_result.is_ok() {
                masters_result = self.configure_masters().await;
            }
        }

        let mut private_result = match progress.private_nodes.take() {
            Some(c) => c.wait().await,
            None => Ok(()),
        };
        let mut public_result = match progress.public_nodes.take() {
            Some(c) => c.wait().await,
            None => Ok(()),
        };

        // Phase 5
        if gateway_result.is_ok() && masters_result.is_ok() {
            self.phase_completed(Phase::Configuration);
            self.check_cancelled()?;
            self.phase_started(Phase::NodeConfiguration);
            let private_config = private_result.is_ok().then(|| {
                let bp = self.clone();
                Completion::spawn("private node configuration", async move {
                    bp.configure_nodes(false).await
                })
            });
            let public_config = public_result.is_ok().then(|| {
                let bp = self.clone();
                Completion::spawn("public node configuration", async move {
                    bp.configure_nodes(true).await
                })
            });
            if let Some(c) = private_config {
                private_result = c.wait().await;
            }
            if let Some(c) = public_config {
                public_result = c.wait().await;
            }
        }

        gateway_result?;
        masters_result?;
        private_result?;
        public_result?;
        self.phase_completed(Phase::NodeConfiguration);
        self.check_cancelled()?;

        // Phase 6
        self.phase_started(Phase::ClusterConfiguration);
        self.configure_cluster().await?;
        self.cluster().set_state(ClusterState::Created).await?;
        self.phase_completed(Phase::ClusterConfiguration);

        let nodes = self.cluster().nodes().await?;
        let net = self.cluster().network_config().await?;
        Ok(ConstructionOutcome {
            cluster: self.name(),
            state: ClusterState::Created,
            gateway_ip: net.gateway_ip,
            public_ip: (!net.public_ip.is_empty()).then_some(net.public_ip),
            masters: nodes.masters.len(),
            private_nodes: nodes.private_nodes.len(),
            public_nodes: nodes.public_nodes.len(),
        })
    }

    async fn seed_metadata(
        &self,
        request: &ClusterRequest,
        sizing: &ResolvedSizing,
        network: &NetworkWithGateway,
        progress: &mut Progress,
    ) -> Result<(), ClusterError> {
        let name = self.name();
        let kp_name = cluster_key_pair_name(&name);
        let key_pair = self
            .provider()
            .create_key_pair(&kp_name)
            .await
            .map_err(|e| ClusterError::provider(format!("failed to create key pair '{}'", kp_name), e))?;
        progress.cluster_key_pair = Some(kp_name);
        self.cluster().update_identity(|id| id.keypair = Some(key_pair));

        progress.metadata_seeded = true;
        self.cluster().write_metadata().await?;

        let props = self.cluster().properties();
        let defaults = DefaultsV1 {
            gateway_sizing: sizing.gateway.clone(),
            master_sizing: sizing.master.clone(),
            node_sizing: sizing.node.clone(),
            image: sizing.image.clone(),
        };
        props
            .lock_for_write::<DefaultsV1>()
            .then_use(|d| {
                *d = defaults;
                Ok::<_, ClusterError>(())
            })
            .await?;
        self.cluster().set_state(ClusterState::Creating).await?;
        let tenant = request.tenant.clone();
        props
            .lock_for_write::<CompositeV1>()
            .then_use(|c| {
                c.tenants = vec![tenant];
                Ok::<_, ClusterError>(())
            })
            .await?;
        let network_record = NetworkV1 {
            network_id: network.network.id.clone(),
            gateway_id: network.gateway.id.clone(),
            gateway_ip: network.gateway.private_ip.clone(),
            public_ip: network.gateway.public_ip.clone().unwrap_or_default(),
            cidr: network.network.cidr.clone(),
        };
        props
            .lock_for_write::<NetworkV1>()
            .then_use(|n| {
                *n = network_record;
                Ok::<_, ClusterError>(())
            })
            .await?;
        let disabled = self.settings().disabled_features.clone();
        if !disabled.is_empty() {
            props
                .lock_for_write::<FeaturesV1>()
                .then_use(|f| {
                    f.disabled.extend(disabled);
                    Ok::<_, ClusterError>(())
                })
                .await?;
        }
        debug!(cluster = %name, "Cluster metadata seeded");
        Ok(())
    }

    // ========================================================================
    // Gateway
    // ========================================================================

    async fn install_gateway(&self, gateway: &Host) -> Result<(), ClusterError> {
        debug!(gateway = %gateway.name, "[gateway] installing");
        self.install_proxy_cache(gateway, "proxycache-server").await?;
        self.install_node_requirements(NodeType::Gateway, gateway).await?;
        self.install_reverse_proxy(gateway).await?;
        debug!(gateway = %gateway.name, "[gateway] installation done");
        Ok(())
    }

    async fn configure_gateway(&self, gateway: &Host) -> Result<(), ClusterError> {
        debug!(gateway = %gateway.name, "[gateway] configuring");
        self.install_docker(gateway).await?;
        self.actors()
            .configure_gateway(self)
            .await
            .map_err(|e| e.context("[gateway]"))?;
        debug!(gateway = %gateway.name, "[gateway] configuration done");
        Ok(())
    }

    // ========================================================================
    // Masters and nodes
    // ========================================================================

    async fn create_masters(&self, count: usize, def: HostDefinition) -> Result<(), ClusterError> {
        if count == 0 {
            debug!(cluster = %self.name(), "No masters to create");
            return Ok(());
        }
        info!(cluster = %self.name(), count, "Creating masters");
        let timeout = self.settings().host_timeout + MASTER_TIMEOUT_STEP * count as u32;
        let max_parallel = self.settings().max_parallel_hosts;
        fan_out(vec![def; count], max_parallel, |index, def| {
            let bp = self.clone();
            async move {
                bp.create_member(index, NodeType::Master, def, timeout)
                    .await
                    .map(|_| ())
            }
        })
        .await?;
        info!(cluster = %self.name(), count, "Masters created");
        Ok(())
    }

    async fn create_nodes(&self, count: usize, public: bool, def: HostDefinition) -> Result<(), ClusterError> {
        let node_type = NodeType::worker(public);
        if count == 0 {
            debug!(cluster = %self.name(), "No {}s to create", node_type.label());
            return Ok(());
        }
        info!(cluster = %self.name(), count, "Creating {}s", node_type.label());
        let timeout = self.settings().host_timeout;
        let max_parallel = self.settings().max_parallel_hosts;
        fan_out(vec![def; count], max_parallel, |index, def| {
            let bp = self.clone();
            async move {
                bp.create_member(index, node_type, def, timeout)
                    .await
                    .map(|_| ())
            }
        })
        .await?;
        info!(cluster = %self.name(), count, "{}s created", node_type.label());
        Ok(())
    }

    /// Allocates the next hostname for `node_type`. The counter is bumped
    /// inside the `nodes.v1` write lock, so concurrent callers never share a
    /// name.
    pub async fn build_hostname(&self, node_type: NodeType) -> Result<String, ClusterError> {
        let core = match node_type {
            NodeType::Master => "master",
            NodeType::PrivateNode => "node",
            NodeType::PublicNode => "pubnode",
            NodeType::Gateway => return Err(ClusterError::InvalidNodeType(node_type.to_string())),
        };
        let index = self
            .cluster()
            .properties()
            .lock_for_write::<NodesV1>()
            .then_use(|nodes| {
                nodes
                    .next_index(node_type)
                    .ok_or_else(|| ClusterError::InvalidNodeType(node_type.to_string()))
            })
            .await?;
        Ok(format!("{}-{}-{}", self.name(), core, index))
    }

    /// Creates one master or node, records it and installs its requirements.
    /// On failure the host and its record are removed again, unless the
    /// construction keeps its resources.
    async fn create_member(
        &self,
        index: usize,
        node_type: NodeType,
        def: HostDefinition,
        timeout: Duration,
    ) -> Result<Host, ClusterError> {
        let label = format!("[{} #{}]", node_type.label(), index);
        self.check_cancelled()?;

        let hostname = self
            .build_hostname(node_type)
            .await
            .map_err(|e| e.context(&label))?;
        let network_id = self.cluster().network_config().await?.network_id;
        debug!(host = %hostname, "{} creating host", label);

        let request = HostRequest {
            name: hostname.clone(),
            network_id,
            public: node_type == NodeType::PublicNode,
            sizing: def,
        };
        let host = match tokio::time::timeout(timeout, self.provider().create_host(request)).await {
            Ok(Ok(host)) => host,
            Ok(Err(e)) => {
                error!(host = %hostname, "{} host creation failed: {}", label, e);
                return Err(ClusterError::provider(
                    format!("{} failed to create host '{}'", label, hostname),
                    e,
                ));
            }
            Err(_) => {
                error!(host = %hostname, "{} host creation timed out", label);
                return Err(ClusterError::provider(
                    format!("{} failed to create host '{}'", label, hostname),
                    ProviderError::Timeout(format!("no host after {}s", timeout.as_secs())),
                ));
            }
        };
        metrics::counter!("nimbus_hosts_created_total", "node_type" => node_type.label()).increment(1);
        self.publish(ClusterEvent::HostCreated {
            cluster: self.name(),
            host_id: host.id.clone(),
            host_name: host.name.clone(),
            node_type,
            created_at: Utc::now(),
        });

        let mut guard = RollbackGuard::new(label.clone());
        if !self.keep_on_failure() {
            let bp = self.clone();
            let host_id = host.id.clone();
            guard.register(format!("delete host '{}'", host.name), async move {
                bp.delete_host(&host_id).await
            });
        }

        let recorded = self
            .cluster()
            .properties()
            .lock_for_write::<NodesV1>()
            .then_use(|nodes| {
                nodes.push(node_type, Node::from(&host));
                Ok::<_, ClusterError>(())
            })
            .await;
        if let Err(e) = recorded {
            error!(host = %host.name, "{} failed to record host: {}", label, e);
            guard.unwind().await;
            return Err(e.context(&label));
        }
        if !self.keep_on_failure() {
            let props = self.cluster().properties_handle();
            let host_id = host.id.clone();
            guard.register(format!("remove record of '{}'", host.name), async move {
                props
                    .lock_for_write::<NodesV1>()
                    .then_use(|nodes| {
                        nodes.remove(node_type, &host_id);
                        Ok::<_, ClusterError>(())
                    })
                    .await
            });
        }

        let installed = async {
            self.check_cancelled()?;
            self.install_proxy_cache(&host, "proxycache-client").await?;
            self.install_node_requirements(node_type, &host).await
        }
        .await;

        match installed {
            Ok(()) => {
                guard.disarm();
                debug!(host = %host.name, "{} host ready", label);
                Ok(host)
            }
            Err(e) => {
                error!(host = %host.name, "{} host setup failed: {}", label, e);
                guard.unwind().await;
                Err(e.context(&label))
            }
        }
    }

    async fn configure_masters(&self) -> Result<(), ClusterError> {
        let ids = self.cluster().list_master_ids().await?;
        info!(cluster = %self.name(), count = ids.len(), "Configuring masters");
        let max_parallel = self.settings().max_parallel_hosts;
        fan_out(ids, max_parallel, |index, host_id| {
            let bp = self.clone();
            async move { bp.configure_master(index, &host_id).await }
        })
        .await?;
        Ok(())
    }

    async fn configure_master(&self, index: usize, host_id: &str) -> Result<(), ClusterError> {
        let label = format!("[master #{}]", index);
        let host = self.provider().inspect_host(host_id).await.map_err(|e| {
            ClusterError::provider(format!("{} failed to get metadata of host '{}'", label, host_id), e)
        })?;
        self.install_docker(&host).await.map_err(|e| {
            error!(host = %host.name, "{} {}", label, e);
            e
        })?;
        self.actors()
            .configure_master(self, index, &host)
            .await
            .map_err(|e| e.context(&label))?;
        debug!(host = %host.name, "{} configuration done", label);
        Ok(())
    }

    async fn configure_nodes(&self, public: bool) -> Result<(), ClusterError> {
        let node_type = NodeType::worker(public);
        let ids = self.cluster().list_node_ids(public).await?;
        info!(cluster = %self.name(), count = ids.len(), "Configuring {}s", node_type.label());
        let max_parallel = self.settings().max_parallel_hosts;
        fan_out(ids, max_parallel, |index, host_id| {
            let bp = self.clone();
            async move { bp.configure_node(index, &host_id, node_type).await }
        })
        .await?;
        Ok(())
    }

    async fn configure_node(&self, index: usize, host_id: &str, node_type: NodeType) -> Result<(), ClusterError> {
        let label = format!("[{} #{}]", node_type.label(), index);
        let host = self.provider().inspect_host(host_id).await.map_err(|e| {
            ClusterError::provider(format!("{} failed to get metadata of host '{}'", label, host_id), e)
        })?;
        self.install_docker(&host).await.map_err(|e| {
            error!(host = %host.name, "{} {}", label, e);
            e
        })?;
        self.actors()
            .configure_node(self, index, &host, node_type)
            .await
            .map_err(|e| e.context(&label))?;
        debug!(host = %host.name, "{} configuration done", label);
        Ok(())
    }

    async fn configure_cluster(&self) -> Result<(), ClusterError> {
        info!(cluster = %self.name(), "Configuring cluster");
        self.install_remote_desktop().await?;
        self.actors().configure_cluster(self).await
    }

    // ========================================================================
    // Features
    // ========================================================================

    pub async fn is_feature_disabled(&self, feature: &str) -> Result<bool, ClusterError> {
        Ok(self
            .cluster()
            .properties()
            .lock_for_read::<FeaturesV1>()
            .then_use(|f| f.is_disabled(feature))
            .await?)
    }

    async fn disable_feature(&self, feature: &str) -> Result<(), ClusterError> {
        self.cluster()
            .properties()
            .lock_for_write::<FeaturesV1>()
            .then_use(|f| {
                f.disabled.insert(feature.to_string());
                Ok::<_, ClusterError>(())
            })
            .await
    }

    /// Installs `feature` on `target` and records it as installed.
    pub async fn add_feature(
        &self,
        feature: &str,
        target: &InstallTarget,
        variables: Variables,
    ) -> Result<(), ClusterError> {
        let installable = self
            .installer()
            .new_feature(feature)
            .await
            .map_err(|e| ClusterError::feature(feature, target, e.to_string()))?;
        let results = installable
            .add(target, &variables, Settings::default())
            .await
            .map_err(|e| ClusterError::feature(feature, target, e.to_string()))?;
        if !results.successful() {
            return Err(ClusterError::feature(feature, target, results.all_error_messages()));
        }

        self.cluster()
            .properties()
            .lock_for_write::<FeaturesV1>()
            .then_use(|f| {
                f.installed.insert(feature.to_string());
                Ok::<_, ClusterError>(())
            })
            .await?;
        self.publish(ClusterEvent::FeatureInstalled {
            cluster: self.name(),
            feature: feature.to_string(),
            target: target.to_string(),
            installed_at: Utc::now(),
        });
        debug!(feature, target = %target, "Feature installed");
        Ok(())
    }

    /// Whether `feature` is present and healthy on `target`.
    pub async fn check_feature(
        &self,
        feature: &str,
        target: &InstallTarget,
        variables: Variables,
    ) -> Result<bool, ClusterError> {
        let installable = self
            .installer()
            .new_feature(feature)
            .await
            .map_err(|e| ClusterError::feature(feature, target, e.to_string()))?;
        let results = installable
            .check(target, &variables, Settings::default())
            .await
            .map_err(|e| ClusterError::feature(feature, target, e.to_string()))?;
        if !results.successful() {
            debug!(feature, target = %target, "Feature check failed:\n{}", results.all_error_messages());
        }
        Ok(results.successful())
    }

    /// Target addressing the whole cluster through its masters.
    pub async fn cluster_target(&self) -> Result<InstallTarget, ClusterError> {
        let masters = self.cluster().list_masters().await?;
        Ok(InstallTarget::Cluster {
            name: self.name(),
            masters: masters.iter().map(Host::from).collect(),
        })
    }

    async fn install_docker(&self, host: &Host) -> Result<(), ClusterError> {
        self.add_feature("docker", &InstallTarget::Host(host.clone()), Variables::new())
            .await
    }

    async fn install_proxy_cache(&self, host: &Host, feature: &str) -> Result<(), ClusterError> {
        if self.settings().force_disable_proxycache {
            self.disable_feature("proxycache").await?;
        }
        if self.is_feature_disabled("proxycache").await? {
            debug!(host = %host.name, "Proxy cache disabled, skipping {}", feature);
            return Ok(());
        }
        self.add_feature(feature, &InstallTarget::Host(host.clone()), Variables::new())
            .await
    }

    async fn install_reverse_proxy(&self, gateway: &Host) -> Result<(), ClusterError> {
        if self.is_feature_disabled("reverseproxy").await? {
            debug!(gateway = %gateway.name, "Reverse proxy disabled, skipping");
            return Ok(());
        }
        self.add_feature("reverseproxy", &InstallTarget::Host(gateway.clone()), Variables::new())
            .await
    }

    async fn install_remote_desktop(&self) -> Result<(), ClusterError> {
        if self.is_feature_disabled("remotedesktop").await? {
            debug!(cluster = %self.name(), "Remote desktop disabled, skipping");
            return Ok(());
        }
        let target = self.cluster_target().await?;
        let mut variables = Variables::new();
        variables.insert("Username".to_string(), ADMIN_USER.to_string());
        variables.insert("Password".to_string(), self.cluster().identity().admin_password);
        self.add_feature("remotedesktop", &target, variables).await
    }

    /// Renders the flavor's installation script for `node_type` and runs it on
    /// `host`. Flavors without a script for that node type skip this step.
    async fn install_node_requirements(&self, node_type: NodeType, host: &Host) -> Result<(), ClusterError> {
        let Some(script) = self.actors().node_installation_script(node_type) else {
            debug!(host = %host.name, "No requirements script for {}", node_type.label());
            return Ok(());
        };
        let template = self.actors().template(&script.name).ok_or_else(|| {
            ClusterError::Configuration(format!(
                "template '{}' not provided by flavor '{}'",
                script.name,
                self.actors().flavor()
            ))
        })?;

        let identity = self.cluster().identity();
        let mut params = script.params;
        params.insert(
            "GlobalSystemRequirements".to_string(),
            json!(self.actors().global_system_requirements().unwrap_or_default()),
        );
        params.insert("ClusterName".to_string(), json!(identity.name));
        params.insert("DNSServerIPs".to_string(), json!(self.provider().dns_servers()));
        params.insert("MasterIPs".to_string(), json!(self.cluster().list_master_ips().await?));
        params.insert("CladmPassword".to_string(), json!(identity.admin_password));

        let content = self.inner.templates.render(&script.name, template, &params)?;
        let outcome = self
            .inner
            .collaborators
            .script_runner
            .run(host, &script.name, &content)
            .await?;
        if !outcome.success() {
            error!(host = %host.name, retcode = outcome.retcode, stderr = %outcome.stderr, "Requirements script failed");
            return Err(ClusterError::Configuration(format!(
                "failed to install system requirements on '{}' with error code '{}'",
                host.name, outcome.retcode
            )));
        }
        debug!(host = %host.name, script = %script.name, "System requirements installed");
        Ok(())
    }

    // ========================================================================
    // State, deletion and rollback
    // ========================================================================

    /// Actively assesses the cluster through the flavor.
    pub async fn state(&self) -> Result<ClusterState, ClusterError> {
        self.actors().get_state(self).await
    }

    async fn delete_host(&self, host_id: &str) -> Result<(), ClusterError> {
        match self.provider().delete_host(host_id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!(host_id, "Host already gone");
                return Ok(());
            }
            Err(e) => {
                return Err(ClusterError::provider(format!("failed to delete host '{}'", host_id), e))
            }
        }
        metrics::counter!("nimbus_hosts_deleted_total").increment(1);
        self.publish(ClusterEvent::HostDeleted {
            cluster: self.name(),
            host_id: host_id.to_string(),
            deleted_at: Utc::now(),
        });
        Ok(())
    }

    async fn delete_hosts(&self, ids: Vec<String>) -> Result<(), ClusterError> {
        let max_parallel = self.settings().max_parallel_hosts;
        fan_out(ids, max_parallel, |_, host_id| {
            let bp = self.clone();
            async move { bp.delete_host(&host_id).await }
        })
        .await?;
        Ok(())
    }

    /// Deletes nodes, then masters, then the network with its gateway, then
    /// the cluster key pair. Returns every failure; a failed step does not
    /// stop the following ones.
    async fn teardown(&self, network: Option<(String, String)>, key_pair: Option<String>) -> Vec<ClusterError> {
        let mut failures = Vec::new();
        match self.cluster().nodes().await {
            Ok(nodes) => {
                let mut workers = nodes.ids(NodeType::PrivateNode);
                workers.extend(nodes.ids(NodeType::PublicNode));
                if let Err(e) = self.delete_hosts(workers).await {
                    failures.push(e);
                }
                if let Err(e) = self.delete_hosts(nodes.ids(NodeType::Master)).await {
                    failures.push(e);
                }
            }
            Err(e) => failures.push(e),
        }
        if let Some((network_id, network_name)) = network {
            if let Err(e) = self
                .inner
                .network_service
                .delete_network(&network_id, &network_name)
                .await
            {
                failures.push(e);
            }
        }
        if let Some(kp_name) = key_pair {
            match self.provider().delete_key_pair(&kp_name).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => failures.push(ClusterError::provider(
                    format!("failed to delete key pair '{}'", kp_name),
                    e,
                )),
            }
        }
        failures
    }

    async fn rollback(&self, progress: Progress, reason: &ClusterError) {
        let name = self.name();
        warn!(cluster = %name, "Rolling back cluster construction");
        self.publish(ClusterEvent::RollbackStarted {
            cluster: name.clone(),
            reason: reason.to_string(),
            started_at: Utc::now(),
        });

        let network = progress
            .network
            .map(|n| (n.network.id, n.network.name));
        for failure in self.teardown(network, progress.cluster_key_pair).await {
            warn!(cluster = %name, "Rollback step failed: {}", failure);
        }
        if progress.metadata_seeded {
            if let Err(e) = self.cluster().delete_metadata().await {
                warn!(cluster = %name, "Failed to delete cluster metadata: {}", e);
            }
        }
        info!(cluster = %name, "Rollback finished");
    }

    /// Deletes every resource of the cluster, then its metadata. Metadata is
    /// kept when a resource could not be deleted so the deletion can be
    /// retried.
    pub async fn destroy(&self) -> Result<(), ClusterError> {
        let name = self.name();
        info!(cluster = %name, "Deleting cluster");
        let net = self.cluster().network_config().await?;
        let network = (!net.network_id.is_empty()).then(|| (net.network_id, network_name(&name)));
        let key_pair = self.cluster().identity().keypair.map(|kp| kp.name);

        let failures = self.teardown(network, key_pair).await;
        if !failures.is_empty() {
            if let Err(e) = self.cluster().set_state(ClusterState::Error).await {
                warn!(cluster = %name, "Failed to record state 'Error': {}", e);
            }
            return Err(ClusterError::aggregate(failures));
        }
        self.cluster().delete_metadata().await?;
        self.publish(ClusterEvent::ClusterDeleted {
            cluster: name.clone(),
            deleted_at: Utc::now(),
        });
        info!(cluster = %name, "Cluster deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::flavor::{NoopActors, ServerCounts};
    use crate::domain::cluster::{Complexity, Flavor};
    use crate::infrastructure::installer::{SimulatedInstaller, SimulatedScriptRunner};
    use crate::infrastructure::metadata::InMemoryMetadataStore;
    use crate::infrastructure::providers::SimulatedProvider;
    use std::collections::HashSet;

    struct SizedFlavor;

    impl FlavorActors for SizedFlavor {
        fn flavor(&self) -> Flavor {
            Flavor::K8s
        }

        fn minimum_required_servers(&self, _complexity: Complexity) -> ServerCounts {
            (1, 1, 0)
        }

        fn default_node_sizing(&self) -> Option<HostDefinition> {
            Some(HostDefinition::new(8, 32.0, 200, "ignored"))
        }

        fn default_image(&self) -> Option<String> {
            Some("Ubuntu 20.04".to_string())
        }
    }

    fn blueprint(actors: Arc<dyn FlavorActors>) -> Blueprint {
        let collaborators = Collaborators {
            provider: Arc::new(SimulatedProvider::with_defaults()),
            installer: Arc::new(SimulatedInstaller::new()),
            script_runner: Arc::new(SimulatedScriptRunner::new()),
            event_bus: EventBus::with_default_capacity(),
        };
        Blueprint::new(
            ClusterIdentity::new("demo", actors.flavor(), Complexity::Small),
            Arc::new(InMemoryMetadataStore::new()),
            actors,
            collaborators,
            BlueprintSettings::default(),
        )
    }

    #[test]
    fn test_sizing_falls_back_to_baseline_and_default_image() {
        let request = ClusterRequest::new("demo", "10.0.0.0/16", Flavor::Boh);
        let sizing = resolve_sizing(&NoopActors(Flavor::Boh), &request);
        assert_eq!(sizing.image, DEFAULT_IMAGE);
        assert_eq!(sizing.gateway, HostDefinition::gateway_baseline(DEFAULT_IMAGE));
        assert_eq!(sizing.master, HostDefinition::node_baseline(DEFAULT_IMAGE));
        assert_eq!(sizing.node, HostDefinition::node_baseline(DEFAULT_IMAGE));
    }

    #[test]
    fn test_flavor_sizing_gets_resolved_image_and_request_overrides_disk() {
        let request = ClusterRequest::new("demo", "10.0.0.0/16", Flavor::K8s)
            .with_nodes_def(HostDefinition::new(0, 0.0, 500, ""));
        let sizing = resolve_sizing(&SizedFlavor, &request);
        assert_eq!(sizing.image, "Ubuntu 20.04");
        assert_eq!(sizing.node.cores, 8);
        assert_eq!(sizing.node.ram_size, 32.0);
        assert_eq!(sizing.node.disk_size, 500);
        assert_eq!(sizing.node.image_id, "Ubuntu 20.04");
        assert_eq!(sizing.master.image_id, "Ubuntu 20.04");
    }

    #[test]
    fn test_generated_password() {
        let password = generate_password();
        assert_eq!(password.len(), ADMIN_PASSWORD_LENGTH);
        assert!(password.bytes().all(|b| PASSWORD_CHARSET.contains(&b)));
        assert_ne!(password, generate_password());
    }

    #[test]
    fn test_resource_names() {
        assert_eq!(network_name("Demo"), "net-demo");
        assert_eq!(cluster_key_pair_name("demo"), "cluster_demo_cladm_key");
    }

    #[tokio::test]
    async fn test_concurrent_hostnames_are_unique() {
        let bp = blueprint(Arc::new(SizedFlavor));
        let mut handles = Vec::new();
        for i in 0..24 {
            let bp = bp.clone();
            let node_type = if i % 2 == 0 { NodeType::Master } else { NodeType::PrivateNode };
            handles.push(tokio::spawn(async move { bp.build_hostname(node_type).await.unwrap() }));
        }
        let mut names = HashSet::new();
        for handle in handles {
            assert!(names.insert(handle.await.unwrap()));
        }
        assert!(names.contains("demo-master-12"));
        assert!(names.contains("demo-node-12"));

        let nodes = bp.cluster().nodes().await.unwrap();
        assert_eq!(nodes.master_last_index, 12);
        assert_eq!(nodes.private_last_index, 12);
        assert_eq!(nodes.public_last_index, 0);
    }

    #[tokio::test]
    async fn test_gateway_has_no_hostname_counter() {
        let bp = blueprint(Arc::new(SizedFlavor));
        assert!(matches!(
            bp.build_hostname(NodeType::Gateway).await,
            Err(ClusterError::InvalidNodeType(_))
        ));
    }

    #[tokio::test]
    async fn test_noop_flavor_has_no_state_actor() {
        let bp = blueprint(Arc::new(NoopActors(Flavor::Boh)));
        let err = bp.state().await.unwrap_err();
        assert!(err.to_string().contains("no actor defined for 'GetState'"));
    }
}
