// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Cluster commands
//!
//! Commands: plan, create, list, inspect

use anyhow::{Context, Result};
use clap::{Subcommand, ValueEnum};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use nimbus_core::application::blueprint::{resolve_sizing, BlueprintSettings, Collaborators};
use nimbus_core::application::cluster_service::{ClusterService, StandardClusterService};
use nimbus_core::application::flavor::FlavorRegistry;
use nimbus_core::domain::cluster::{
    ClusterRequest, Complexity, ConstructionOutcome, Flavor, HostDefinition,
};
use nimbus_core::domain::config::OrchestratorConfig;
use nimbus_core::domain::events::ClusterEvent;
use nimbus_core::infrastructure::event_bus::{EventBus, EventBusError};
use nimbus_core::infrastructure::installer::{SimulatedInstaller, SimulatedScriptRunner};
use nimbus_core::infrastructure::metadata::create_metadata_store;
use nimbus_core::infrastructure::providers::SimulatedProvider;
use nimbus_swarm::SwarmActors;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum ClusterCommand {
    /// Show the topology and sizing a request would produce
    Plan {
        #[command(flatten)]
        request: RequestArgs,
    },

    /// Build a cluster on the configured provider
    Create {
        #[command(flatten)]
        request: RequestArgs,

        /// Keep partially built resources when construction fails
        #[arg(long)]
        keep_on_failure: bool,

        #[arg(long, value_enum, default_value = "text")]
        output: OutputFormat,
    },

    /// List recorded clusters
    List,

    /// Show the recorded metadata of a cluster
    Inspect {
        name: String,

        #[arg(long, value_enum, default_value = "text")]
        output: OutputFormat,
    },
}

#[derive(clap::Args, Debug, Clone)]
pub struct RequestArgs {
    /// Cluster name
    pub name: String,

    /// Flavor (boh, dcos, k8s, ohpc, swarm)
    #[arg(long, default_value = "boh")]
    pub flavor: Flavor,

    /// Complexity (small, normal, large)
    #[arg(long, default_value = "small")]
    pub complexity: Complexity,

    /// Private network CIDR
    #[arg(long, default_value = "192.168.0.0/24")]
    pub cidr: String,

    #[arg(long, default_value = "")]
    pub tenant: String,

    /// Minimum cores per node
    #[arg(long)]
    pub node_cores: Option<u32>,

    /// Minimum RAM per node, in GB
    #[arg(long)]
    pub node_ram: Option<f32>,

    /// Minimum disk per node, in GB
    #[arg(long)]
    pub node_disk: Option<u32>,
}

impl RequestArgs {
    pub fn to_request(&self) -> ClusterRequest {
        let mut request = ClusterRequest::new(&self.name, &self.cidr, self.flavor)
            .with_complexity(self.complexity)
            .with_tenant(&self.tenant);
        if self.node_cores.is_some() || self.node_ram.is_some() || self.node_disk.is_some() {
            request = request.with_nodes_def(HostDefinition::new(
                self.node_cores.unwrap_or(0),
                self.node_ram.unwrap_or(0.0),
                self.node_disk.unwrap_or(0),
                "",
            ));
        }
        request
    }
}

/// Cluster service wired on the simulated provider.
pub struct Runtime {
    pub service: StandardClusterService,
    pub registry: FlavorRegistry,
    pub events: EventBus,
}

pub fn flavor_registry() -> FlavorRegistry {
    FlavorRegistry::new().with(Arc::new(SwarmActors::new()))
}

pub fn build_runtime(config: &OrchestratorConfig) -> Result<Runtime> {
    config.validate().context("Configuration validation failed")?;

    let store = create_metadata_store(&config.spec.metadata)
        .context("Failed to open the metadata store")?;

    let events = EventBus::with_default_capacity();
    let collaborators = Collaborators {
        provider: Arc::new(SimulatedProvider::new(config.spec.provider.clone())),
        installer: Arc::new(SimulatedInstaller::new()),
        script_runner: Arc::new(SimulatedScriptRunner::new()),
        event_bus: events.clone(),
    };
    let registry = flavor_registry();
    let service = StandardClusterService::new(
        store,
        registry.clone(),
        collaborators,
        BlueprintSettings::from(config),
    );

    Ok(Runtime {
        service,
        registry,
        events,
    })
}

pub async fn handle_command(command: ClusterCommand, config_override: Option<PathBuf>) -> Result<()> {
    let config = OrchestratorConfig::load_or_default(config_override)
        .context("Failed to load configuration")?;

    match command {
        ClusterCommand::Plan { request } => plan(&request.to_request()),
        ClusterCommand::Create {
            request,
            keep_on_failure,
            output,
        } => {
            let runtime = build_runtime(&config)?;
            let request = request.to_request().keep_on_failure(keep_on_failure);
            create(&runtime, request, output).await
        }
        ClusterCommand::List => {
            let runtime = build_runtime(&config)?;
            let names = runtime.service.list_clusters().await?;
            if names.is_empty() {
                println!("{}", "No clusters recorded".dimmed());
            }
            for name in names {
                println!("{}", name);
            }
            Ok(())
        }
        ClusterCommand::Inspect { name, output } => {
            let runtime = build_runtime(&config)?;
            let summary = runtime
                .service
                .inspect_cluster(&name)
                .await
                .with_context(|| format!("Failed to inspect cluster '{}'", name))?;
            match output {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
                OutputFormat::Text => {
                    println!("{} ({}, {})", summary.name.bold(), summary.flavor, summary.complexity);
                    println!("  State: {}", summary.state);
                    println!("  Gateway: {}", summary.network.gateway_ip);
                    println!("  Masters: {}", summary.nodes.masters.len());
                    println!("  Private nodes: {}", summary.nodes.private_nodes.len());
                    println!("  Public nodes: {}", summary.nodes.public_nodes.len());
                    if !summary.installed_features.is_empty() {
                        let features: Vec<&str> =
                            summary.installed_features.iter().map(String::as_str).collect();
                        println!("  Features: {}", features.join(", "));
                    }
                }
            }
            Ok(())
        }
    }
}

fn plan(request: &ClusterRequest) -> Result<()> {
    request
        .validate()
        .map_err(|e| anyhow::anyhow!(e))
        .context("Invalid cluster request")?;

    let registry = flavor_registry();
    if !registry.is_registered(request.flavor) {
        warn!(flavor = %request.flavor, "No actors registered for flavor, using defaults");
    }
    let actors = registry.get(request.flavor);
    let (masters, private_nodes, public_nodes) = actors.minimum_required_servers(request.complexity);
    let sizing = resolve_sizing(actors.as_ref(), request);

    println!(
        "{} {} ({}, {})",
        "Plan for".bold(),
        request.name.to_lowercase().bold(),
        request.flavor,
        request.complexity
    );
    println!("  Network: {}", request.cidr);
    println!("  Image: {}", sizing.image);
    println!("  Gateway: 1 x {}", describe(&sizing.gateway));
    println!("  Masters: {} x {}", masters, describe(&sizing.master));
    println!("  Private nodes: {} x {}", private_nodes, describe(&sizing.node));
    println!("  Public nodes: {} x {}", public_nodes, describe(&sizing.node));
    Ok(())
}

fn describe(def: &HostDefinition) -> String {
    let mut text = format!("{} cores, {} GB RAM, {} GB disk", def.cores, def.ram_size, def.disk_size);
    if let Some(gpus) = def.gpu_number.filter(|n| *n > 0) {
        text.push_str(&format!(", {} GPU", gpus));
    }
    text
}

/// Runs the construction, echoing its events. Ctrl-C cancels it.
async fn create(runtime: &Runtime, request: ClusterRequest, output: OutputFormat) -> Result<()> {
    let name = request.name.to_lowercase();
    let mut events = runtime.events.subscribe();
    let construction = runtime.service.create_cluster(request);
    tokio::pin!(construction);

    let mut cancelled = false;
    let result = loop {
        tokio::select! {
            result = &mut construction => break result,
            event = events.recv() => match event {
                Ok(event) if event.cluster() == name && output == OutputFormat::Text => print_event(&event),
                Ok(_) | Err(EventBusError::Lagged(_)) => {}
                Err(e) => warn!(error = %e, "Event stream interrupted"),
            },
            signal = tokio::signal::ctrl_c(), if !cancelled => {
                if let Err(e) = signal {
                    warn!(error = %e, "Failed to listen for Ctrl-C");
                }
                cancelled = true;
                println!("{}", "Cancelling construction...".yellow());
                runtime.service.cancel_construction(&name);
            }
        }
    };
    if output == OutputFormat::Text {
        for event in events.drain().iter().filter(|e| e.cluster() == name) {
            print_event(event);
        }
    }

    let outcome = result.with_context(|| format!("Failed to create cluster '{}'", name))?;
    info!(cluster = %outcome.cluster, "Cluster ready");
    print_outcome(&outcome, output)
}

fn print_event(event: &ClusterEvent) {
    match event {
        ClusterEvent::ConstructionStarted { flavor, .. } => {
            println!("{} construction started ({})", "▶".cyan(), flavor)
        }
        ClusterEvent::PhaseStarted { phase, .. } => println!("  {} {}", "→".cyan(), phase),
        ClusterEvent::PhaseCompleted { phase, .. } => println!("  {} {}", "✓".green(), phase),
        ClusterEvent::HostCreated {
            host_name,
            node_type,
            ..
        } => println!("    + {} ({})", host_name, node_type),
        ClusterEvent::HostDeleted { host_id, .. } => println!("    - {}", host_id),
        ClusterEvent::FeatureInstalled {
            feature, target, ..
        } => println!("    {} on {}", feature.bold(), target),
        ClusterEvent::RollbackStarted { reason, .. } => {
            println!("{} rolling back: {}", "✗".red(), reason)
        }
        ClusterEvent::ConstructionSucceeded { state, .. } => {
            println!("{} construction succeeded ({})", "✓".green(), state)
        }
        ClusterEvent::ConstructionFailed {
            resources_kept, ..
        } => {
            if *resources_kept {
                println!("{} construction failed, resources kept", "✗".red());
            } else {
                println!("{} construction failed", "✗".red());
            }
        }
        ClusterEvent::ClusterDeleted { cluster, .. } => println!("- {}", cluster),
    }
}

fn print_outcome(outcome: &ConstructionOutcome, output: OutputFormat) -> Result<()> {
    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(outcome)?),
        OutputFormat::Text => {
            println!();
            println!("{} {}", "Cluster".bold(), outcome.cluster.bold());
            println!("  State: {}", outcome.state);
            println!("  Gateway: {}", outcome.gateway_ip);
            if let Some(public_ip) = &outcome.public_ip {
                println!("  Public IP: {}", public_ip);
            }
            println!(
                "  Hosts: {} masters, {} private nodes, {} public nodes",
                outcome.masters, outcome.private_nodes, outcome.public_nodes
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(name: &str) -> RequestArgs {
        RequestArgs {
            name: name.to_string(),
            flavor: Flavor::Swarm,
            complexity: Complexity::Small,
            cidr: "10.0.0.0/16".to_string(),
            tenant: String::new(),
            node_cores: None,
            node_ram: None,
            node_disk: None,
        }
    }

    #[test]
    fn test_request_without_node_overrides() {
        let request = args("demo").to_request();
        assert_eq!(request.flavor, Flavor::Swarm);
        assert!(request.nodes_def.is_none());
    }

    #[test]
    fn test_request_with_node_overrides() {
        let mut args = args("demo");
        args.node_cores = Some(8);
        let request = args.to_request();
        let def = request.nodes_def.unwrap();
        assert_eq!(def.cores, 8);
        assert_eq!(def.disk_size, 0);
    }

    #[test]
    fn test_registry_knows_swarm() {
        let registry = flavor_registry();
        assert!(registry.is_registered(Flavor::Swarm));
        assert!(!registry.is_registered(Flavor::K8s));
    }
}
