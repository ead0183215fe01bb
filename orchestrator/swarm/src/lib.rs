// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # `nimbus-swarm` - Docker Swarm Cluster Flavor
//!
//! Turns a blueprint-built cluster into a Docker Swarm: masters become swarm
//! managers, private and public nodes become workers, and an overlay network
//! is created once every member has joined.
//!
//! ## Crate Layout
//!
//! | Module | Layer | Contents |
//! |--------|-------|----------|
//! | [`domain`] | Domain | server counts, tier sizings, `ManagerRole` |
//! | [`application`] | Application | `SwarmActors`, the `FlavorActors` implementation |
//!
//! Register it with the orchestrator's flavor registry:
//!
//! ```no_run
//! use std::sync::Arc;
//! use nimbus_core::application::flavor::FlavorRegistry;
//! use nimbus_swarm::application::SwarmActors;
//!
//! let registry = FlavorRegistry::new().with(Arc::new(SwarmActors::new()));
//! ```

pub mod domain;
pub mod application;

pub use application::SwarmActors;
