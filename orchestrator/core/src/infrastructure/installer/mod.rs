// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Feature Installer Module
//!
//! In-process implementations of [`crate::domain::installer::FeatureInstaller`]
//! and [`crate::domain::installer::RemoteScriptRunner`]. They record every
//! call so tests and the CLI rehearsal mode can report what would have been
//! installed where.

pub mod simulated;

pub use simulated::{InstallRecord, ScriptRecord, SimulatedInstaller, SimulatedScriptRunner};
