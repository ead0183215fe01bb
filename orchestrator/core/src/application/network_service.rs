// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::application::rollback::RollbackGuard;
use crate::domain::cluster::HostDefinition;
use crate::domain::error::ClusterError;
use crate::domain::provider::{
    GatewayRequest, Host, InfrastructureProvider, IpVersion, Network, NetworkRequest,
    SizingRequirements,
};

/// Name of the key pair used to reach a network's gateway.
pub fn gateway_key_pair_name(network_name: &str) -> String {
    format!("kp_{}", network_name)
}

#[derive(Debug, Clone)]
pub struct NetworkWithGateway {
    pub network: Network,
    pub gateway: Host,
}

/// Creates and deletes private networks together with their gateway.
#[derive(Clone)]
pub struct NetworkService {
    provider: Arc<dyn InfrastructureProvider>,
}

impl NetworkService {
    pub fn new(provider: Arc<dyn InfrastructureProvider>) -> Self {
        Self { provider }
    }

    /// Creates the network, then its gateway. Anything created before a
    /// failure is deleted again before the error is returned.
    pub async fn create_network_with_gateway(
        &self,
        name: &str,
        cidr: &str,
        ip_version: IpVersion,
        gateway_def: &HostDefinition,
    ) -> Result<NetworkWithGateway, ClusterError> {
        info!(network = name, cidr, "Creating network");
        let network = self
            .provider
            .create_network(NetworkRequest {
                name: name.to_string(),
                cidr: cidr.to_string(),
                ip_version,
                dns_servers: self.provider.dns_servers(),
            })
            .await
            .map_err(|e| ClusterError::provider(format!("failed to create network '{}'", name), e))?;

        let mut guard = RollbackGuard::new(format!("network {}", name));
        {
            let provider = self.provider.clone();
            let network_id = network.id.clone();
            guard.register(format!("delete network '{}'", name), async move {
                provider
                    .delete_network(&network_id)
                    .await
                    .map_err(|e| ClusterError::provider("failed to delete network", e))
            });
        }

        match self.create_gateway(&network, gateway_def, &mut guard).await {
            Ok(gateway) => {
                guard.disarm();
                let mut network = network;
                network.gateway_id = gateway.id.clone();
                info!(network = name, gateway = %gateway.name, "Network and gateway created");
                Ok(NetworkWithGateway { network, gateway })
            }
            Err(e) => {
                error!(network = name, "Failed to set up network: {}", e);
                guard.unwind().await;
                Err(e)
            }
        }
    }

    async fn create_gateway(
        &self,
        network: &Network,
        gateway_def: &HostDefinition,
        guard: &mut RollbackGuard,
    ) -> Result<Host, ClusterError> {
        let templates = self
            .provider
            .select_templates_by_size(SizingRequirements::from(gateway_def))
            .await
            .map_err(|e| ClusterError::provider("failed to find a gateway template", e))?;
        let template = templates.into_iter().next().ok_or_else(|| {
            ClusterError::Sizing(format!(
                "no host template matches gateway sizing {} cores, {} GB RAM, {} GB disk",
                gateway_def.cores, gateway_def.ram_size, gateway_def.disk_size
            ))
        })?;
        debug!(template = %template.name, "Gateway template selected");

        let image = self
            .provider
            .search_image(&gateway_def.image_id)
            .await
            .map_err(|e| ClusterError::provider("failed to find gateway image", e))?;

        let kp_name = gateway_key_pair_name(&network.name);
        // Leftover from an earlier attempt
        if let Err(e) = self.provider.delete_key_pair(&kp_name).await {
            if !e.is_not_found() {
                warn!(key_pair = %kp_name, "Failed to delete stale key pair: {}", e);
            }
        }
        let key_pair = self
            .provider
            .create_key_pair(&kp_name)
            .await
            .map_err(|e| ClusterError::provider(format!("failed to create key pair '{}'", kp_name), e))?;
        {
            let provider = self.provider.clone();
            let kp_name = kp_name.clone();
            guard.register(format!("delete key pair '{}'", kp_name), async move {
                provider
                    .delete_key_pair(&kp_name)
                    .await
                    .map_err(|e| ClusterError::provider("failed to delete key pair", e))
            });
        }

        self.provider
            .create_gateway(GatewayRequest {
                network_id: network.id.clone(),
                template_id: template.id,
                image_id: image.id,
                key_pair,
            })
            .await
            .map_err(|e| ClusterError::provider("failed to create gateway", e))
    }

    /// Deletes the network (and its gateway), then the gateway key pair.
    pub async fn delete_network(&self, network_id: &str, network_name: &str) -> Result<(), ClusterError> {
        match self.provider.delete_network(network_id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!(network = network_name, "Network already gone");
            }
            Err(e) => {
                return Err(ClusterError::provider(
                    format!("failed to delete network '{}'", network_name),
                    e,
                ))
            }
        }
        match self.provider.delete_key_pair(&gateway_key_pair_name(network_name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(ClusterError::provider("failed to delete gateway key pair", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cluster::DEFAULT_IMAGE;
    use crate::infrastructure::providers::SimulatedProvider;

    #[tokio::test]
    async fn test_create_and_delete_network_with_gateway() {
        let provider = SimulatedProvider::with_defaults();
        let service = NetworkService::new(Arc::new(provider.clone()));

        let created = service
            .create_network_with_gateway(
                "net-demo",
                "10.1.0.0/16",
                IpVersion::IPv4,
                &HostDefinition::gateway_baseline(DEFAULT_IMAGE),
            )
            .await
            .unwrap();
        assert_eq!(created.network.gateway_id, created.gateway.id);
        assert!(created.gateway.public_ip.is_some());
        assert!(provider.key_pair_names().contains("kp_net-demo"));

        service
            .delete_network(&created.network.id, "net-demo")
            .await
            .unwrap();
        assert!(provider.is_empty());
    }

    #[tokio::test]
    async fn test_gateway_failure_cleans_up_network_and_key_pair() {
        let provider = SimulatedProvider::with_defaults();
        provider.fail_gateway_creation(true);
        let service = NetworkService::new(Arc::new(provider.clone()));

        let err = service
            .create_network_with_gateway(
                "net-demo",
                "10.1.0.0/16",
                IpVersion::IPv4,
                &HostDefinition::gateway_baseline(DEFAULT_IMAGE),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to create gateway"));
        assert!(provider.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_image_cleans_up_network() {
        let provider = SimulatedProvider::with_defaults();
        let service = NetworkService::new(Arc::new(provider.clone()));

        let result = service
            .create_network_with_gateway(
                "net-demo",
                "10.1.0.0/16",
                IpVersion::IPv4,
                &HostDefinition::gateway_baseline("BeOS 5"),
            )
            .await;
        assert!(result.is_err());
        assert!(provider.networks().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_gateway_has_no_template() {
        let provider = SimulatedProvider::with_defaults();
        let service = NetworkService::new(Arc::new(provider.clone()));

        let err = service
            .create_network_with_gateway(
                "net-demo",
                "10.1.0.0/16",
                IpVersion::IPv4,
                &HostDefinition::new(128, 1024.0, 60, DEFAULT_IMAGE),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::Sizing(_)));
        assert!(provider.is_empty());
    }
}
