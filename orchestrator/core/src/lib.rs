// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Lib
//!
//! Cluster orchestration core: builds clusters of hosts on an infrastructure
//! provider, installs features on them and keeps their metadata.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Domain:** cluster model, property groups, provider and installer ports
//! - **Application:** blueprint state machine, flavor actors, cluster service
//! - **Infrastructure:** metadata stores, simulated provider and installer

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
