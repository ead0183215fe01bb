// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Infrastructure Provider Module
//!
//! Concrete implementations of the [`InfrastructureProvider`] port. Only the
//! in-process simulated provider ships with the orchestrator; it backs the
//! CLI rehearsal mode and every test.

pub mod simulated;

pub use simulated::SimulatedProvider;

use std::sync::Arc;

use crate::domain::config::ProviderConfig;
use crate::domain::provider::InfrastructureProvider;

/// Factory function to create a provider from configuration
pub fn create_provider(config: &ProviderConfig) -> anyhow::Result<Arc<dyn InfrastructureProvider>> {
    match config.kind.as_str() {
        "simulated" => Ok(Arc::new(SimulatedProvider::new(config.clone()))),
        other => anyhow::bail!("Unsupported provider kind: '{}'", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_simulated() {
        let provider = create_provider(&ProviderConfig::default()).unwrap();
        assert_eq!(provider.dns_servers(), vec!["1.1.1.1", "8.8.8.8"]);
    }

    #[test]
    fn test_factory_unknown_kind() {
        let config = ProviderConfig {
            kind: "openstack".to_string(),
            ..Default::default()
        };
        assert!(create_provider(&config).is_err());
    }
}
