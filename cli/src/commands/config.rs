// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use nimbus_core::domain::config::{MetadataBackend, OrchestratorConfig};

pub const MINIMAL_TEMPLATE: &str = include_str!("../../templates/config-minimal.yaml");
pub const EXAMPLES_TEMPLATE: &str = include_str!("../../templates/config-with-examples.yaml");

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,

        /// Print the effective manifest as YAML
        #[arg(long)]
        yaml: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path (default: ./nimbus-config.yaml)
        #[arg(short, long, default_value = "./nimbus-config.yaml")]
        output: PathBuf,

        /// Include examples and comments
        #[arg(long)]
        examples: bool,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths, yaml } => show(config_override, paths, yaml).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output, examples } => generate(output, examples).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool, as_yaml: bool) -> Result<()> {
    let config = OrchestratorConfig::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. NIMBUS_CONFIG_PATH: {}",
            std::env::var("NIMBUS_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./nimbus-config.yaml");
        println!("  4. ~/.nimbus/config.yaml");
        println!("  5. /etc/nimbus/config.yaml");
        println!();
    }

    if as_yaml {
        let rendered = serde_yaml::to_string(&config).context("Failed to render configuration")?;
        print!("{}", rendered);
        return Ok(());
    }

    println!("{}", "Current configuration:".bold());
    println!("  Name: {}", config.metadata.name);
    println!();

    let orchestration = &config.spec.orchestration;
    println!("{}", "Orchestration:".bold());
    println!("  Max parallel hosts: {}", orchestration.max_parallel_hosts);
    println!("  Host timeout: {}s", orchestration.host_timeout_seconds);
    println!();

    let features = &config.spec.features;
    println!("{}", "Features:".bold());
    println!("  Proxy cache force-disabled: {}", features.force_disable_proxycache);
    if features.disabled.is_empty() {
        println!("  Disabled: {}", "(none)".dimmed());
    } else {
        println!("  Disabled: {}", features.disabled.join(", "));
    }
    println!();

    println!("{}", "Metadata:".bold());
    match config.spec.metadata.backend {
        MetadataBackend::InMemory => println!("  Backend: in-memory"),
        MetadataBackend::File => println!(
            "  Backend: file ({})",
            config
                .spec
                .metadata
                .path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "no path".to_string())
        ),
    }
    println!();

    let provider = &config.spec.provider;
    println!("{}", "Provider:".bold());
    println!("  Kind: {}", provider.kind);
    println!("  DNS servers: {}", provider.dns_servers.join(", "));
    println!("  Templates:");
    for template in &provider.templates {
        println!(
            "    - {} ({} cores, {} GB RAM, {} GB disk)",
            template.name.bold(),
            template.cores,
            template.ram_size,
            template.disk_size
        );
    }
    println!("  Images: {}", provider.images.len());
    println!();

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = OrchestratorConfig::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: PathBuf, with_examples: bool) -> Result<()> {
    let sample = if with_examples {
        EXAMPLES_TEMPLATE
    } else {
        MINIMAL_TEMPLATE
    };

    std::fs::write(&output, sample)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}
