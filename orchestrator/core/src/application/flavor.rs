// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Flavor actors.
//!
//! A flavor customizes the blueprint through [`FlavorActors`]: how many hosts
//! each complexity needs, how large they are, what gets installed on them and
//! how cluster health is assessed. Every method has a no-op default so a
//! flavor only overrides what it cares about.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::application::blueprint::Blueprint;
use crate::domain::cluster::{ClusterState, Complexity, Flavor, HostDefinition, NodeType};
use crate::domain::error::ClusterError;
use crate::domain::provider::Host;
use crate::infrastructure::script_template_engine::TemplateParams;

/// Node installation script chosen by a flavor: the template to render and
/// the flavor's own parameters.
#[derive(Debug, Clone, Default)]
pub struct InstallationScript {
    pub name: String,
    pub params: TemplateParams,
}

impl InstallationScript {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: TemplateParams::new(),
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// Minimum number of (masters, private nodes, public nodes).
pub type ServerCounts = (usize, usize, usize);

#[async_trait]
pub trait FlavorActors: Send + Sync {
    fn flavor(&self) -> Flavor;

    fn minimum_required_servers(&self, _complexity: Complexity) -> ServerCounts {
        (0, 0, 0)
    }

    fn default_gateway_sizing(&self) -> Option<HostDefinition> {
        None
    }

    fn default_master_sizing(&self) -> Option<HostDefinition> {
        None
    }

    fn default_node_sizing(&self) -> Option<HostDefinition> {
        None
    }

    fn default_image(&self) -> Option<String> {
        None
    }

    /// Template (and flavor parameters) installing node requirements.
    fn node_installation_script(&self, _node_type: NodeType) -> Option<InstallationScript> {
        None
    }

    /// Source of a template returned by [`FlavorActors::node_installation_script`].
    fn template(&self, _name: &str) -> Option<&'static str> {
        None
    }

    /// Preamble prepended to every node installation script.
    fn global_system_requirements(&self) -> Option<String> {
        None
    }

    async fn configure_gateway(&self, _blueprint: &Blueprint) -> Result<(), ClusterError> {
        Ok(())
    }

    async fn configure_master(
        &self,
        _blueprint: &Blueprint,
        _index: usize,
        _host: &Host,
    ) -> Result<(), ClusterError> {
        Ok(())
    }

    async fn configure_node(
        &self,
        _blueprint: &Blueprint,
        _index: usize,
        _host: &Host,
        _node_type: NodeType,
    ) -> Result<(), ClusterError> {
        Ok(())
    }

    async fn configure_cluster(&self, _blueprint: &Blueprint) -> Result<(), ClusterError> {
        Ok(())
    }

    /// Actively assesses cluster health.
    async fn get_state(&self, _blueprint: &Blueprint) -> Result<ClusterState, ClusterError> {
        Err(ClusterError::Configuration(
            "no actor defined for 'GetState'".to_string(),
        ))
    }
}

/// Actors of a flavor that customizes nothing.
#[derive(Debug, Clone, Copy)]
pub struct NoopActors(pub Flavor);

impl FlavorActors for NoopActors {
    fn flavor(&self) -> Flavor {
        self.0
    }
}

/// Maps each flavor tag to its actors.
#[derive(Clone, Default)]
pub struct FlavorRegistry {
    actors: HashMap<Flavor, Arc<dyn FlavorActors>>,
}

impl FlavorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, actors: Arc<dyn FlavorActors>) {
        self.actors.insert(actors.flavor(), actors);
    }

    pub fn with(mut self, actors: Arc<dyn FlavorActors>) -> Self {
        self.register(actors);
        self
    }

    /// Registered actors, or no-op actors for an unregistered flavor.
    pub fn get(&self, flavor: Flavor) -> Arc<dyn FlavorActors> {
        self.actors
            .get(&flavor)
            .cloned()
            .unwrap_or_else(|| Arc::new(NoopActors(flavor)))
    }

    pub fn is_registered(&self, flavor: Flavor) -> bool {
        self.actors.contains_key(&flavor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TwoMasters;

    impl FlavorActors for TwoMasters {
        fn flavor(&self) -> Flavor {
            Flavor::Dcos
        }

        fn minimum_required_servers(&self, _complexity: Complexity) -> ServerCounts {
            (2, 1, 0)
        }
    }

    #[test]
    fn test_defaults_are_noops() {
        let actors = NoopActors(Flavor::Boh);
        assert_eq!(actors.minimum_required_servers(Complexity::Large), (0, 0, 0));
        assert!(actors.default_master_sizing().is_none());
        assert!(actors.node_installation_script(NodeType::Master).is_none());
    }

    #[test]
    fn test_registry_falls_back_to_noop() {
        let registry = FlavorRegistry::new().with(Arc::new(TwoMasters));
        assert!(registry.is_registered(Flavor::Dcos));
        assert_eq!(registry.get(Flavor::Dcos).minimum_required_servers(Complexity::Small), (2, 1, 0));

        let fallback = registry.get(Flavor::K8s);
        assert_eq!(fallback.flavor(), Flavor::K8s);
        assert_eq!(fallback.minimum_required_servers(Complexity::Small), (0, 0, 0));
    }
}
