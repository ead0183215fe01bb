// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Swarm Domain Layer
//!
//! Pure topology rules of the Docker Swarm flavor. No I/O dependencies.
//!
//! | Module | Key Types |
//! |--------|-----------|
//! | [`topology`] | `ManagerRole`, server counts, tier sizings |

pub mod topology;

pub use topology::*;
