// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain Layer
//!
//! Cluster value objects, property groups, the metadata locking abstraction
//! and the ports the orchestrator consumes (provider, installer, script runner).
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Types and contracts with no infrastructure dependencies

pub mod cluster;
pub mod config;
pub mod error;
pub mod events;
pub mod installer;
pub mod metadata;
pub mod properties;
pub mod provider;
