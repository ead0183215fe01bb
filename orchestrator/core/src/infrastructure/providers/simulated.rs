// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Simulated Infrastructure Provider
//!
//! Keeps networks, hosts and key pairs in memory and hands out addresses from
//! each network's CIDR. Failures and latency can be injected per host name so
//! tests can exercise partial-failure paths of the orchestrator.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::domain::config::ProviderConfig;
use crate::domain::provider::{
    GatewayRequest, Host, HostRequest, HostTemplate, Image, InfrastructureProvider, KeyPair,
    Network, NetworkRequest, ProviderError, SizingRequirements,
};

struct NetworkRecord {
    network: Network,
    next_host: u32,
    base: u32,
    size: u32,
}

#[derive(Default)]
struct State {
    networks: HashMap<String, NetworkRecord>,
    hosts: BTreeMap<String, (Host, String)>,
    key_pairs: HashMap<String, KeyPair>,
    next_public: u32,
    created_host_names: Vec<String>,
}

#[derive(Default)]
struct Faults {
    host_name_patterns: Vec<String>,
    fail_network: bool,
    fail_gateway: bool,
    fail_host_deletion: bool,
    host_delays: Vec<(String, Duration)>,
}

#[derive(Clone)]
pub struct SimulatedProvider {
    config: Arc<ProviderConfig>,
    state: Arc<Mutex<State>>,
    faults: Arc<Mutex<Faults>>,
}

impl SimulatedProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            config: Arc::new(config),
            state: Arc::new(Mutex::new(State::default())),
            faults: Arc::new(Mutex::new(Faults::default())),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ProviderConfig::default())
    }

    /// Host creation fails for every host whose name contains `pattern`.
    pub fn fail_host_creation_matching(&self, pattern: impl Into<String>) {
        self.faults.lock().host_name_patterns.push(pattern.into());
    }

    pub fn fail_network_creation(&self, fail: bool) {
        self.faults.lock().fail_network = fail;
    }

    pub fn fail_gateway_creation(&self, fail: bool) {
        self.faults.lock().fail_gateway = fail;
    }

    pub fn fail_host_deletion(&self, fail: bool) {
        self.faults.lock().fail_host_deletion = fail;
    }

    /// Delays creation of hosts whose name contains `pattern`.
    pub fn delay_host_creation(&self, pattern: impl Into<String>, delay: Duration) {
        self.faults.lock().host_delays.push((pattern.into(), delay));
    }

    pub fn networks(&self) -> Vec<Network> {
        self.state
            .lock()
            .networks
            .values()
            .map(|r| r.network.clone())
            .collect()
    }

    /// Every live host, gateways included.
    pub fn hosts(&self) -> Vec<Host> {
        self.state.lock().hosts.values().map(|(h, _)| h.clone()).collect()
    }

    pub fn key_pair_names(&self) -> HashSet<String> {
        self.state.lock().key_pairs.keys().cloned().collect()
    }

    /// Names of every host ever created, in creation order.
    pub fn created_host_names(&self) -> Vec<String> {
        self.state.lock().created_host_names.clone()
    }

    pub fn is_empty(&self) -> bool {
        let state = self.state.lock();
        state.networks.is_empty() && state.hosts.is_empty() && state.key_pairs.is_empty()
    }

    fn parse_cidr(cidr: &str) -> Result<(u32, u32), ProviderError> {
        let invalid = || ProviderError::Failure(format!("invalid CIDR '{}'", cidr));
        let (address, prefix) = cidr.split_once('/').ok_or_else(invalid)?;
        let address: Ipv4Addr = address.parse().map_err(|_| invalid())?;
        let prefix: u32 = prefix.parse().map_err(|_| invalid())?;
        if !(8..=30).contains(&prefix) {
            return Err(invalid());
        }
        let size = 1u32 << (32 - prefix);
        let base = u32::from(address) & !(size - 1);
        Ok((base, size))
    }

    fn allocate_private_ip(record: &mut NetworkRecord) -> Result<String, ProviderError> {
        // .0 is the network address and the last one broadcast
        if record.next_host >= record.size - 1 {
            return Err(ProviderError::Failure(format!(
                "network '{}' has no free address left",
                record.network.name
            )));
        }
        let ip = Ipv4Addr::from(record.base + record.next_host);
        record.next_host += 1;
        Ok(ip.to_string())
    }

    fn allocate_public_ip(state: &mut State) -> String {
        state.next_public += 1;
        // 198.18.0.0/15 benchmark range
        Ipv4Addr::from(u32::from(Ipv4Addr::new(198, 18, 0, 0)) + state.next_public).to_string()
    }

    fn injected_delay(&self, name: &str) -> Option<Duration> {
        self.faults
            .lock()
            .host_delays
            .iter()
            .find(|(pattern, _)| name.contains(pattern.as_str()))
            .map(|(_, delay)| *delay)
    }
}

#[async_trait]
impl InfrastructureProvider for SimulatedProvider {
    async fn create_network(&self, request: NetworkRequest) -> Result<Network, ProviderError> {
        if self.faults.lock().fail_network {
            return Err(ProviderError::Failure(format!(
                "injected failure creating network '{}'",
                request.name
            )));
        }
        let (base, size) = Self::parse_cidr(&request.cidr)?;

        let mut state = self.state.lock();
        if state.networks.values().any(|r| r.network.name == request.name) {
            return Err(ProviderError::AlreadyExists {
                kind: "network",
                name: request.name,
            });
        }
        let network = Network {
            id: Uuid::new_v4().to_string(),
            name: request.name,
            cidr: request.cidr,
            ip_version: request.ip_version,
            gateway_id: String::new(),
        };
        state.networks.insert(
            network.id.clone(),
            NetworkRecord {
                network: network.clone(),
                next_host: 1,
                base,
                size,
            },
        );
        debug!(network = %network.name, id = %network.id, "Simulated network created");
        Ok(network)
    }

    async fn delete_network(&self, network_id: &str) -> Result<(), ProviderError> {
        let mut state = self.state.lock();
        let record = state
            .networks
            .remove(network_id)
            .ok_or_else(|| ProviderError::NotFound {
                kind: "network",
                name: network_id.to_string(),
            })?;
        if !record.network.gateway_id.is_empty() {
            state.hosts.remove(&record.network.gateway_id);
        }
        debug!(network = %record.network.name, "Simulated network deleted");
        Ok(())
    }

    async fn create_gateway(&self, request: GatewayRequest) -> Result<Host, ProviderError> {
        if self.faults.lock().fail_gateway {
            return Err(ProviderError::Failure("injected failure creating gateway".to_string()));
        }
        if !self.config.templates.iter().any(|t| t.id == request.template_id) {
            return Err(ProviderError::NotFound {
                kind: "template",
                name: request.template_id,
            });
        }

        let mut state = self.state.lock();
        if !state.key_pairs.contains_key(&request.key_pair.name) {
            return Err(ProviderError::NotFound {
                kind: "key pair",
                name: request.key_pair.name,
            });
        }
        let public_ip = Self::allocate_public_ip(&mut state);
        let record = state
            .networks
            .get_mut(&request.network_id)
            .ok_or_else(|| ProviderError::NotFound {
                kind: "network",
                name: request.network_id.clone(),
            })?;
        let host = Host {
            id: Uuid::new_v4().to_string(),
            name: format!("gw-{}", record.network.name),
            private_ip: Self::allocate_private_ip(record)?,
            public_ip: Some(public_ip),
        };
        record.network.gateway_id = host.id.clone();
        let network_id = record.network.id.clone();
        state.created_host_names.push(host.name.clone());
        state.hosts.insert(host.id.clone(), (host.clone(), network_id));
        Ok(host)
    }

    async fn create_host(&self, request: HostRequest) -> Result<Host, ProviderError> {
        if let Some(delay) = self.injected_delay(&request.name) {
            tokio::time::sleep(delay).await;
        }
        let injected = self
            .faults
            .lock()
            .host_name_patterns
            .iter()
            .any(|p| request.name.contains(p.as_str()));
        if injected {
            return Err(ProviderError::Failure(format!(
                "injected failure creating host '{}'",
                request.name
            )));
        }

        let mut state = self.state.lock();
        if state.hosts.values().any(|(h, _)| h.name == request.name) {
            return Err(ProviderError::AlreadyExists {
                kind: "host",
                name: request.name,
            });
        }
        let public_ip = request.public.then(|| Self::allocate_public_ip(&mut state));
        let record = state
            .networks
            .get_mut(&request.network_id)
            .ok_or_else(|| ProviderError::NotFound {
                kind: "network",
                name: request.network_id.clone(),
            })?;
        let host = Host {
            id: Uuid::new_v4().to_string(),
            name: request.name,
            private_ip: Self::allocate_private_ip(record)?,
            public_ip,
        };
        state.created_host_names.push(host.name.clone());
        state
            .hosts
            .insert(host.id.clone(), (host.clone(), request.network_id));
        debug!(host = %host.name, ip = %host.private_ip, "Simulated host created");
        Ok(host)
    }

    async fn delete_host(&self, host_id: &str) -> Result<(), ProviderError> {
        if self.faults.lock().fail_host_deletion {
            return Err(ProviderError::Failure(format!(
                "injected failure deleting host '{}'",
                host_id
            )));
        }
        self.state
            .lock()
            .hosts
            .remove(host_id)
            .map(|_| ())
            .ok_or_else(|| ProviderError::NotFound {
                kind: "host",
                name: host_id.to_string(),
            })
    }

    async fn inspect_host(&self, host_id: &str) -> Result<Host, ProviderError> {
        self.state
            .lock()
            .hosts
            .get(host_id)
            .map(|(h, _)| h.clone())
            .ok_or_else(|| ProviderError::NotFound {
                kind: "host",
                name: host_id.to_string(),
            })
    }

    async fn create_key_pair(&self, name: &str) -> Result<KeyPair, ProviderError> {
        let mut state = self.state.lock();
        if state.key_pairs.contains_key(name) {
            return Err(ProviderError::AlreadyExists {
                kind: "key pair",
                name: name.to_string(),
            });
        }
        let id = Uuid::new_v4();
        let key_pair = KeyPair {
            id: id.to_string(),
            name: name.to_string(),
            public_key: format!("ssh-ed25519 {} {}", id.simple(), name),
            private_key: format!("simulated-private-key-{}", id.simple()),
        };
        state.key_pairs.insert(name.to_string(), key_pair.clone());
        Ok(key_pair)
    }

    async fn delete_key_pair(&self, name: &str) -> Result<(), ProviderError> {
        self.state
            .lock()
            .key_pairs
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| ProviderError::NotFound {
                kind: "key pair",
                name: name.to_string(),
            })
    }

    async fn select_templates_by_size(
        &self,
        requirements: SizingRequirements,
    ) -> Result<Vec<HostTemplate>, ProviderError> {
        let mut matching: Vec<HostTemplate> = self
            .config
            .templates
            .iter()
            .filter(|t| requirements.is_satisfied_by(t))
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            (a.cores, a.disk_size)
                .cmp(&(b.cores, b.disk_size))
                .then(a.ram_size.total_cmp(&b.ram_size))
        });
        Ok(matching)
    }

    async fn search_image(&self, name: &str) -> Result<Image, ProviderError> {
        self.config
            .images
            .iter()
            .find(|image| image.name.eq_ignore_ascii_case(name) || image.id == name)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound {
                kind: "image",
                name: name.to_string(),
            })
    }

    fn dns_servers(&self) -> Vec<String> {
        self.config.dns_servers.clone()
    }
}
