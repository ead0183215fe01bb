// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Orchestrator Configuration Types
//
// Defines the configuration schema for the Nimbus cluster orchestrator:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Orchestration limits (fan-out width, host creation timeout)
// - Feature gating (proxy cache hard-disable, globally disabled features)
// - Metadata backend selection
// - Simulated provider catalog (templates, images, DNS servers)
// - Logging settings

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::provider::{HostTemplate, Image};

pub const API_VERSION: &str = "nimbus.io/v1";
pub const KIND: &str = "OrchestratorConfig";

/// Top-level Kubernetes-style orchestrator configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// API version (must be "nimbus.io/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "OrchestratorConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    #[serde(default)]
    pub spec: OrchestratorSpec,
}

/// Manifest metadata (Kubernetes-style)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OrchestratorSpec {
    #[serde(default)]
    pub orchestration: OrchestrationConfig,

    #[serde(default)]
    pub features: FeaturesConfig,

    #[serde(default)]
    pub metadata: MetadataConfig,

    #[serde(default)]
    pub provider: ProviderConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationConfig {
    /// Upper bound on hosts created or configured at the same time
    #[serde(default = "default_max_parallel_hosts")]
    pub max_parallel_hosts: usize,

    /// Base timeout for a single host creation, in seconds
    #[serde(default = "default_host_timeout_seconds")]
    pub host_timeout_seconds: u64,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            max_parallel_hosts: default_max_parallel_hosts(),
            host_timeout_seconds: default_host_timeout_seconds(),
        }
    }
}

impl OrchestrationConfig {
    pub fn host_timeout(&self) -> Duration {
        Duration::from_secs(self.host_timeout_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    /// Writes "proxycache" into each cluster's disabled set before any
    /// proxy cache installation is attempted.
    #[serde(default = "default_true")]
    pub force_disable_proxycache: bool,

    /// Features disabled on every cluster this orchestrator builds
    #[serde(default)]
    pub disabled: Vec<String>,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            force_disable_proxycache: true,
            disabled: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum MetadataBackend {
    #[default]
    InMemory,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MetadataConfig {
    #[serde(default)]
    pub backend: MetadataBackend,

    /// Root directory of the file backend
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider kind; only "simulated" ships with the orchestrator
    #[serde(default = "default_provider_kind")]
    pub kind: String,

    #[serde(default = "default_dns_servers")]
    pub dns_servers: Vec<String>,

    #[serde(default = "default_templates")]
    pub templates: Vec<HostTemplate>,

    #[serde(default = "default_images")]
    pub images: Vec<Image>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: default_provider_kind(),
            dns_servers: default_dns_servers(),
            templates: default_templates(),
            images: default_images(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format ("json" or "text")
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_parallel_hosts() -> usize {
    64
}

fn default_host_timeout_seconds() -> u64 {
    600
}

fn default_provider_kind() -> String {
    "simulated".to_string()
}

fn default_dns_servers() -> Vec<String> {
    vec!["1.1.1.1".to_string(), "8.8.8.8".to_string()]
}

fn default_templates() -> Vec<HostTemplate> {
    [
        ("s1-2", 2, 7.0, 60),
        ("s1-4", 4, 15.0, 100),
        ("s1-8", 8, 30.0, 200),
        ("s1-16", 16, 60.0, 400),
    ]
    .into_iter()
    .map(|(name, cores, ram_size, disk_size)| HostTemplate {
        id: format!("tpl-{}", name),
        name: name.to_string(),
        cores,
        ram_size,
        disk_size,
        gpu_number: 0,
    })
    .collect()
}

fn default_images() -> Vec<Image> {
    ["Ubuntu 18.04", "Ubuntu 20.04", "Ubuntu 22.04", "CentOS 7.3"]
        .into_iter()
        .map(|name| Image {
            id: format!("img-{}", name.to_lowercase().replace([' ', '.'], "-")),
            name: name.to_string(),
        })
        .collect()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "nimbus".to_string(),
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: OrchestratorSpec::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. NIMBUS_CONFIG_PATH environment variable
    /// 2. ./nimbus-config.yaml (working directory)
    /// 3. ~/.nimbus/config.yaml (user home)
    /// 4. /etc/nimbus/config.yaml (system, Unix)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("NIMBUS_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./nimbus-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".nimbus").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/nimbus/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit CLI path fails if missing or invalid
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path).map_err(|e| {
                anyhow::anyhow!("Failed to load config at {:?}: {}", path, e)
            })?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(val) = lookup("NIMBUS_MAX_PARALLEL_HOSTS") {
            match val.parse::<usize>() {
                Ok(n) => {
                    tracing::info!("Environment override: NIMBUS_MAX_PARALLEL_HOSTS={}", n);
                    self.spec.orchestration.max_parallel_hosts = n;
                }
                Err(_) => tracing::warn!(
                    "Invalid value for NIMBUS_MAX_PARALLEL_HOSTS: '{}'. Expected a number. Ignoring.",
                    val
                ),
            }
        }

        if let Some(val) = lookup("NIMBUS_FORCE_DISABLE_PROXYCACHE") {
            match val.to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => {
                    tracing::info!("Environment override: NIMBUS_FORCE_DISABLE_PROXYCACHE=true");
                    self.spec.features.force_disable_proxycache = true;
                }
                "false" | "0" | "no" | "off" => {
                    tracing::info!("Environment override: NIMBUS_FORCE_DISABLE_PROXYCACHE=false");
                    self.spec.features.force_disable_proxycache = false;
                }
                _ => tracing::warn!(
                    "Invalid value for NIMBUS_FORCE_DISABLE_PROXYCACHE: '{}'. Expected true/false. Ignoring.",
                    val
                ),
            }
        }

        if let Some(val) = lookup("NIMBUS_METADATA_PATH") {
            tracing::info!("Environment override: NIMBUS_METADATA_PATH={}", val);
            self.spec.metadata.backend = MetadataBackend::File;
            self.spec.metadata.path = Some(PathBuf::from(val));
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let orchestration = &self.spec.orchestration;
        if orchestration.max_parallel_hosts == 0 {
            anyhow::bail!("spec.orchestration.max_parallel_hosts must be at least 1");
        }
        if orchestration.host_timeout_seconds == 0 {
            anyhow::bail!("spec.orchestration.host_timeout_seconds must be at least 1");
        }

        if self.spec.metadata.backend == MetadataBackend::File && self.spec.metadata.path.is_none() {
            anyhow::bail!("spec.metadata.path is required for the file backend");
        }

        let provider = &self.spec.provider;
        if provider.kind != "simulated" {
            anyhow::bail!(
                "Unsupported provider kind: '{}'. Only 'simulated' is available",
                provider.kind
            );
        }
        if provider.templates.is_empty() {
            anyhow::bail!("spec.provider.templates must list at least one host template");
        }
        for template in &provider.templates {
            if template.name.is_empty() || template.id.is_empty() {
                anyhow::bail!("Host template id and name cannot be empty");
            }
        }

        match self.spec.logging.format.as_str() {
            "text" | "json" => {}
            other => anyhow::bail!("Invalid logging format: '{}'. Must be 'text' or 'json'", other),
        }

        Ok(())
    }
}
