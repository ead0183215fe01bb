// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Metadata Store Implementations
//!
//! Infrastructure implementations of [`MetadataStore`]:
//! - **InMemoryMetadataStore** - HashMap-backed, with failure and latency
//!   injection for tests
//! - **FileMetadataStore** - one JSON file per identity and property group
//!
//! The backend is selected from `spec.metadata` of the orchestrator
//! configuration through [`create_metadata_store`].

mod file;
mod in_memory;

pub use file::FileMetadataStore;
pub use in_memory::InMemoryMetadataStore;

use std::sync::Arc;

use crate::domain::config::{MetadataBackend, MetadataConfig};
use crate::domain::metadata::MetadataStore;

pub fn create_metadata_store(config: &MetadataConfig) -> anyhow::Result<Arc<dyn MetadataStore>> {
    match config.backend {
        MetadataBackend::InMemory => {
            tracing::info!("Using in-memory metadata store");
            Ok(Arc::new(InMemoryMetadataStore::new()))
        }
        MetadataBackend::File => {
            let path = config
                .path
                .clone()
                .ok_or_else(|| anyhow::anyhow!("file metadata backend requires a path"))?;
            tracing::info!("Using file metadata store at {:?}", path);
            Ok(Arc::new(FileMetadataStore::new(path)))
        }
    }
}
