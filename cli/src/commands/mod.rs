// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for Nimbus CLI

pub mod cluster;
pub mod config;

pub use self::cluster::ClusterCommand;
pub use self::config::ConfigCommand;
