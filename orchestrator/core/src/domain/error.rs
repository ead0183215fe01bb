// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use thiserror::Error;

use crate::domain::installer::InstallError;
use crate::domain::metadata::MetadataError;
use crate::domain::provider::ProviderError;

/// Errors surfaced by cluster construction and management.
#[derive(Debug, Error, Clone)]
pub enum ClusterError {
    #[error("{context}: {source}")]
    Provider {
        context: String,
        #[source]
        source: ProviderError,
    },

    /// Every sibling failure of a fan-out, one per line.
    #[error("{0}")]
    Aggregate(String),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error("failed to add feature '{feature}' on {target}: {message}")]
    FeatureInstall {
        feature: String,
        target: String,
        message: String,
    },

    #[error("cluster construction cancelled")]
    Cancelled,

    #[error("sizing error: {0}")]
    Sizing(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid node type '{0}' for this operation")]
    InvalidNodeType(String),

    #[error("cluster '{0}' not found")]
    NotFound(String),

    #[error("cluster '{0}' already exists")]
    AlreadyExists(String),
}

impl ClusterError {
    pub fn provider(context: impl Into<String>, source: ProviderError) -> Self {
        ClusterError::Provider {
            context: context.into(),
            source,
        }
    }

    pub fn feature(feature: &str, target: impl std::fmt::Display, message: impl Into<String>) -> Self {
        ClusterError::FeatureInstall {
            feature: feature.to_string(),
            target: target.to_string(),
            message: message.into(),
        }
    }

    /// Joins several errors into one, preserving each message. Errors that
    /// are all cancellations collapse into a single [`ClusterError::Cancelled`].
    pub fn aggregate(errors: Vec<ClusterError>) -> Self {
        if !errors.is_empty() && errors.iter().all(ClusterError::is_cancelled) {
            return ClusterError::Cancelled;
        }
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        ClusterError::Aggregate(messages.join("\n"))
    }

    /// Prefixes the message with where the error happened.
    pub fn context(self, context: impl std::fmt::Display) -> Self {
        match self {
            ClusterError::Cancelled => ClusterError::Cancelled,
            ClusterError::Provider { context: inner, source } => ClusterError::Provider {
                context: format!("{}: {}", context, inner),
                source,
            },
            other => ClusterError::Aggregate(format!("{}: {}", context, other)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ClusterError::Cancelled)
    }
}

impl From<InstallError> for ClusterError {
    fn from(err: InstallError) -> Self {
        ClusterError::Configuration(err.to_string())
    }
}

pub type ClusterResult<T> = Result<T, ClusterError>;
