// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! JSON-on-disk metadata store.
//!
//! Layout under the base directory:
//!
//! ```text
//! <base>/<entity>/identity.json
//! <base>/<entity>/<tag>.json      # {"version": N, "payload": {...}}
//! ```
//!
//! Every file is written to a sibling temp file first and renamed into place.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::domain::metadata::{MetadataError, MetadataStore, VersionedValue};

const IDENTITY_FILE: &str = "identity.json";

#[derive(Debug, Clone)]
pub struct FileMetadataStore {
    base: PathBuf,
}

impl FileMetadataStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    fn entity_dir(&self, entity: &str) -> Result<PathBuf, MetadataError> {
        if entity.is_empty()
            || entity.starts_with('/')
            || entity.split('/').any(|part| part.is_empty() || part == "." || part == "..")
        {
            return Err(MetadataError::Storage(format!("invalid entity key '{}'", entity)));
        }
        Ok(self.base.join(entity))
    }

    async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, MetadataError> {
        match fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| MetadataError::Storage(format!("corrupt file {:?}: {}", path, e))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(MetadataError::Storage(format!("failed to read {:?}: {}", path, e))),
        }
    }

    async fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), MetadataError> {
        let parent = path
            .parent()
            .ok_or_else(|| MetadataError::Storage(format!("no parent directory for {:?}", path)))?;
        fs::create_dir_all(parent)
            .await
            .map_err(|e| MetadataError::Storage(format!("failed to create {:?}: {}", parent, e)))?;

        let bytes = serde_json::to_vec_pretty(value)
            .map_err(|e| MetadataError::Storage(e.to_string()))?;
        let tmp = path.with_extension(format!("json.tmp-{}", uuid::Uuid::new_v4()));
        fs::write(&tmp, bytes)
            .await
            .map_err(|e| MetadataError::Storage(format!("failed to write {:?}: {}", tmp, e)))?;
        if let Err(e) = fs::rename(&tmp, path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(MetadataError::Storage(format!("failed to commit {:?}: {}", path, e)));
        }
        debug!("Wrote metadata file {:?}", path);
        Ok(())
    }

    fn collect_entities<'a>(
        dir: PathBuf,
        key: String,
        found: &'a mut Vec<String>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), MetadataError>> + Send + 'a>> {
        Box::pin(async move {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
                Err(e) => return Err(MetadataError::Storage(format!("failed to list {:?}: {}", dir, e))),
            };
            if !key.is_empty() && fs::try_exists(dir.join(IDENTITY_FILE)).await.unwrap_or(false) {
                found.push(key.clone());
            }
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| MetadataError::Storage(e.to_string()))?
            {
                let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
                if !is_dir {
                    continue;
                }
                let name = entry.file_name().to_string_lossy().to_string();
                let child_key = if key.is_empty() { name } else { format!("{}/{}", key, name) };
                Self::collect_entities(entry.path(), child_key, &mut *found).await?;
            }
            Ok(())
        })
    }
}

#[async_trait]
impl MetadataStore for FileMetadataStore {
    async fn read_identity(&self, entity: &str) -> Result<Option<serde_json::Value>, MetadataError> {
        let dir = self.entity_dir(entity)?;
        Self::read_json(&dir.join(IDENTITY_FILE)).await
    }

    async fn write_identity(&self, entity: &str, identity: serde_json::Value) -> Result<(), MetadataError> {
        let dir = self.entity_dir(entity)?;
        Self::write_json(&dir.join(IDENTITY_FILE), &identity).await
    }

    async fn read_group(&self, entity: &str, tag: &str) -> Result<Option<VersionedValue>, MetadataError> {
        let dir = self.entity_dir(entity)?;
        Self::read_json(&dir.join(format!("{}.json", tag))).await
    }

    async fn write_group(&self, entity: &str, tag: &str, value: VersionedValue) -> Result<(), MetadataError> {
        let dir = self.entity_dir(entity)?;
        Self::write_json(&dir.join(format!("{}.json", tag)), &value).await
    }

    async fn delete_entity(&self, entity: &str) -> Result<(), MetadataError> {
        let dir = self.entity_dir(entity)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(MetadataError::Storage(format!("failed to delete {:?}: {}", dir, e))),
        }
    }

    async fn list_entities(&self, prefix: &str) -> Result<Vec<String>, MetadataError> {
        let mut found = Vec::new();
        Self::collect_entities(self.base.clone(), String::new(), &mut found).await?;
        found.retain(|key| key.starts_with(prefix));
        found.sort();
        Ok(found)
    }
}
