// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Swarm Application Layer
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Flavor actors plugging Docker Swarm into the blueprint

pub mod actors;

pub use actors::SwarmActors;
