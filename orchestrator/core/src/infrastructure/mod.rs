// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Infrastructure Layer
//!
//! Adapters behind the domain ports: metadata stores, the simulated provider,
//! installer and script runner, the event bus and the script template engine.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Concrete implementations selected from configuration

pub mod event_bus;
pub mod installer;
pub mod metadata;
pub mod providers;
pub mod script_template_engine;
