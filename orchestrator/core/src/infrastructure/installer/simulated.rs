// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::domain::installer::{
    Feature, FeatureInstaller, InstallError, InstallResults, InstallTarget, RemoteScriptRunner,
    ScriptOutcome, Settings, Variables,
};
use crate::domain::provider::Host;

/// Features the simulated installer knows how to install.
pub const KNOWN_FEATURES: &[&str] = &[
    "docker",
    "reverseproxy",
    "proxycache-client",
    "proxycache-server",
    "remotedesktop",
    "docker-swarm-manager",
    "docker-swarm-worker",
    "docker-swarm-network",
];

/// One `Feature::add` call.
#[derive(Debug, Clone)]
pub struct InstallRecord {
    pub feature: String,
    pub target: String,
    pub variables: Variables,
    pub succeeded: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Default)]
struct InstallerState {
    records: Vec<InstallRecord>,
    /// feature -> target name substrings that make `add` fail
    failures: HashMap<String, Vec<String>>,
    delays: HashMap<String, Duration>,
    unhealthy: Vec<String>,
}

#[derive(Clone, Default)]
pub struct SimulatedInstaller {
    state: Arc<Mutex<InstallerState>>,
}

impl SimulatedInstaller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `feature` fail on targets whose name contains `target_pattern`.
    pub fn fail_feature_on(&self, feature: &str, target_pattern: &str) {
        self.state
            .lock()
            .failures
            .entry(feature.to_string())
            .or_default()
            .push(target_pattern.to_string());
    }

    pub fn delay_feature(&self, feature: &str, delay: Duration) {
        self.state.lock().delays.insert(feature.to_string(), delay);
    }

    /// Makes `check` fail for `feature` even when installed.
    pub fn mark_unhealthy(&self, feature: &str) {
        self.state.lock().unhealthy.push(feature.to_string());
    }

    pub fn records(&self) -> Vec<InstallRecord> {
        self.state.lock().records.clone()
    }

    pub fn records_for(&self, feature: &str) -> Vec<InstallRecord> {
        self.state
            .lock()
            .records
            .iter()
            .filter(|r| r.feature == feature)
            .cloned()
            .collect()
    }

    pub fn installed_on(&self, feature: &str, target: &str) -> bool {
        self.state
            .lock()
            .records
            .iter()
            .any(|r| r.succeeded && r.feature == feature && r.target == target)
    }
}

#[async_trait]
impl FeatureInstaller for SimulatedInstaller {
    async fn new_feature(&self, name: &str) -> Result<Box<dyn Feature>, InstallError> {
        if !KNOWN_FEATURES.contains(&name) {
            return Err(InstallError::UnknownFeature(name.to_string()));
        }
        Ok(Box::new(SimulatedFeature {
            name: name.to_string(),
            installer: self.clone(),
        }))
    }
}

struct SimulatedFeature {
    name: String,
    installer: SimulatedInstaller,
}

fn target_hosts(target: &InstallTarget) -> Vec<String> {
    match target {
        InstallTarget::Host(host) => vec![host.name.clone()],
        InstallTarget::Cluster { masters, .. } => masters.iter().map(|m| m.name.clone()).collect(),
    }
}

#[async_trait]
impl Feature for SimulatedFeature {
    fn name(&self) -> &str {
        &self.name
    }

    async fn add(
        &self,
        target: &InstallTarget,
        variables: &Variables,
        _settings: Settings,
    ) -> Result<InstallResults, InstallError> {
        let started_at = Utc::now();
        let delay = self.installer.state.lock().delays.get(&self.name).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failing = self
            .installer
            .state
            .lock()
            .failures
            .get(&self.name)
            .map(|patterns| patterns.iter().any(|p| target.name().contains(p.as_str())))
            .unwrap_or(false);

        let mut results = InstallResults::new();
        for host in target_hosts(target) {
            if failing {
                results.record_failure("install", host, "simulated installation failure");
            } else {
                results.record_success("install", host);
            }
        }

        debug!(feature = %self.name, target = %target, success = !failing, "Simulated feature add");
        self.installer.state.lock().records.push(InstallRecord {
            feature: self.name.clone(),
            target: target.name().to_string(),
            variables: variables.clone(),
            succeeded: !failing,
            started_at,
            finished_at: Utc::now(),
        });
        Ok(results)
    }

    async fn check(
        &self,
        target: &InstallTarget,
        _variables: &Variables,
        _settings: Settings,
    ) -> Result<InstallResults, InstallError> {
        let healthy = self.installer.installed_on(&self.name, target.name())
            && !self.installer.state.lock().unhealthy.contains(&self.name);

        let mut results = InstallResults::new();
        for host in target_hosts(target) {
            if healthy {
                results.record_success("check", host);
            } else {
                results.record_failure("check", host, format!("feature '{}' not healthy", self.name));
            }
        }
        Ok(results)
    }
}

/// One script execution.
#[derive(Debug, Clone)]
pub struct ScriptRecord {
    pub host: String,
    pub script_name: String,
    pub content: String,
}

#[derive(Default)]
struct RunnerState {
    records: Vec<ScriptRecord>,
    retcodes: Vec<(String, i32)>,
}

#[derive(Clone, Default)]
pub struct SimulatedScriptRunner {
    state: Arc<Mutex<RunnerState>>,
}

impl SimulatedScriptRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts run on hosts whose name contains `host_pattern` exit with `retcode`.
    pub fn exit_with_on(&self, host_pattern: &str, retcode: i32) {
        self.state.lock().retcodes.push((host_pattern.to_string(), retcode));
    }

    pub fn records(&self) -> Vec<ScriptRecord> {
        self.state.lock().records.clone()
    }
}

#[async_trait]
impl RemoteScriptRunner for SimulatedScriptRunner {
    async fn run(
        &self,
        host: &Host,
        script_name: &str,
        content: &str,
    ) -> Result<ScriptOutcome, InstallError> {
        let mut state = self.state.lock();
        let retcode = state
            .retcodes
            .iter()
            .find(|(pattern, _)| host.name.contains(pattern.as_str()))
            .map(|(_, code)| *code)
            .unwrap_or(0);
        state.records.push(ScriptRecord {
            host: host.name.clone(),
            script_name: script_name.to_string(),
            content: content.to_string(),
        });
        Ok(ScriptOutcome {
            retcode,
            stdout: format!("{} executed on {}", script_name, host.name),
            stderr: if retcode == 0 {
                String::new()
            } else {
                format!("{} exited with {}", script_name, retcode)
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(name: &str) -> Host {
        Host {
            id: format!("id-{}", name),
            name: name.to_string(),
            private_ip: "10.0.0.5".to_string(),
            public_ip: None,
        }
    }

    #[tokio::test]
    async fn test_unknown_feature_is_rejected() {
        let installer = SimulatedInstaller::new();
        assert!(matches!(
            installer.new_feature("kubernetes-operator").await,
            Err(InstallError::UnknownFeature(_))
        ));
    }

    #[tokio::test]
    async fn test_add_then_check() {
        let installer = SimulatedInstaller::new();
        let feature = installer.new_feature("docker").await.unwrap();
        let target = InstallTarget::Host(host("demo-node-1"));

        let before = feature.check(&target, &Variables::new(), Settings::default()).await.unwrap();
        assert!(!before.successful());

        let results = feature.add(&target, &Variables::new(), Settings::default()).await.unwrap();
        assert!(results.successful());
        assert!(installer.installed_on("docker", "demo-node-1"));

        let after = feature.check(&target, &Variables::new(), Settings::default()).await.unwrap();
        assert!(after.successful());
    }

    #[tokio::test]
    async fn test_injected_failure_on_cluster_target_reports_every_master() {
        let installer = SimulatedInstaller::new();
        installer.fail_feature_on("remotedesktop", "demo");
        let feature = installer.new_feature("remotedesktop").await.unwrap();
        let target = InstallTarget::Cluster {
            name: "demo".to_string(),
            masters: vec![host("demo-master-1"), host("demo-master-2")],
        };

        let results = feature.add(&target, &Variables::new(), Settings::default()).await.unwrap();
        assert!(!results.successful());
        assert_eq!(results.all_error_messages().lines().count(), 2);
    }

    #[tokio::test]
    async fn test_script_runner_retcodes() {
        let runner = SimulatedScriptRunner::new();
        runner.exit_with_on("-node-3", 2);

        let ok = runner.run(&host("demo-node-1"), "node_install_requirements.sh", "echo ok").await.unwrap();
        assert!(ok.success());
        let failed = runner.run(&host("demo-node-3"), "node_install_requirements.sh", "exit 2").await.unwrap();
        assert_eq!(failed.retcode, 2);
        assert_eq!(runner.records().len(), 2);
    }
}
