// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Feature installation ports.
//!
//! A *feature* is a named, idempotent unit of remote software installation
//! (docker, a reverse proxy, a remote desktop...). The orchestrator asks a
//! [`FeatureInstaller`] for a feature by name and adds it to a host or to the
//! whole cluster. Flavors also ship shell templates that are rendered and run
//! on hosts through a [`RemoteScriptRunner`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use crate::domain::provider::Host;

/// Variables passed to a feature installation.
pub type Variables = BTreeMap<String, String>;

/// Where a feature gets installed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InstallTarget {
    Host(Host),
    /// Cluster-wide installation, driven from the masters.
    Cluster { name: String, masters: Vec<Host> },
}

impl InstallTarget {
    pub fn name(&self) -> &str {
        match self {
            InstallTarget::Host(host) => &host.name,
            InstallTarget::Cluster { name, .. } => name,
        }
    }
}

impl fmt::Display for InstallTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallTarget::Host(host) => write!(f, "host '{}'", host.name),
            InstallTarget::Cluster { name, .. } => write!(f, "cluster '{}'", name),
        }
    }
}

/// Installation settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Skip the preliminary check and reinstall unconditionally.
    pub skip_check: bool,
    /// Skip installation of the feature's own requirements.
    pub skip_feature_requirements: bool,
}

/// Per-step outcome of an installation on one or more hosts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstallResults {
    steps: BTreeMap<String, BTreeMap<String, Option<String>>>,
}

impl InstallResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&mut self, step: impl Into<String>, host: impl Into<String>) {
        self.steps.entry(step.into()).or_default().insert(host.into(), None);
    }

    pub fn record_failure(
        &mut self,
        step: impl Into<String>,
        host: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.steps
            .entry(step.into())
            .or_default()
            .insert(host.into(), Some(message.into()));
    }

    pub fn successful(&self) -> bool {
        self.steps
            .values()
            .all(|hosts| hosts.values().all(Option::is_none))
    }

    /// Every failure message, one per line, prefixed by step and host.
    pub fn all_error_messages(&self) -> String {
        let mut lines = Vec::new();
        for (step, hosts) in &self.steps {
            for (host, outcome) in hosts {
                if let Some(message) = outcome {
                    lines.push(format!("{}: {}: {}", step, host, message));
                }
            }
        }
        lines.join("\n")
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InstallError {
    #[error("unknown feature '{0}'")]
    UnknownFeature(String),

    #[error("template '{0}' not found")]
    TemplateNotFound(String),

    #[error("template rendering failed: {0}")]
    Render(String),

    #[error("remote execution failed on '{host}': {message}")]
    Remote { host: String, message: String },
}

/// A named installable unit.
#[async_trait]
pub trait Feature: Send + Sync {
    fn name(&self) -> &str;

    /// Installs the feature. Installation failures on the target are reported
    /// through [`InstallResults`]; `Err` is reserved for failures to even try.
    async fn add(
        &self,
        target: &InstallTarget,
        variables: &Variables,
        settings: Settings,
    ) -> Result<InstallResults, InstallError>;

    /// Verifies that the feature is present and healthy on the target.
    async fn check(
        &self,
        target: &InstallTarget,
        variables: &Variables,
        settings: Settings,
    ) -> Result<InstallResults, InstallError>;
}

#[async_trait]
pub trait FeatureInstaller: Send + Sync {
    async fn new_feature(&self, name: &str) -> Result<Box<dyn Feature>, InstallError>;
}

/// Exit status and captured output of a remote script.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScriptOutcome {
    pub retcode: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ScriptOutcome {
    pub fn success(&self) -> bool {
        self.retcode == 0
    }
}

/// Uploads and executes a rendered script on a host.
#[async_trait]
pub trait RemoteScriptRunner: Send + Sync {
    async fn run(
        &self,
        host: &Host,
        script_name: &str,
        content: &str,
    ) -> Result<ScriptOutcome, InstallError>;
}
