// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Error types for checkpoint management
//!
//! Every caller-facing operation maps to exactly one of these outcomes:
//! - **UnknownDevice**: a device id in the request does not resolve
//! - **InvalidArguments**: device already checkpointed, bad flag combination
//! - **NotFound**: destroy/rollback of an id that is not live
//! - **ConstructionFailed**: the snapshot backend refused to build a checkpoint
//! - **PublishFailed**: an id collided with a live checkpoint (internal bug)
//! - **ServiceUnavailable**: the service loop has shut down

use crate::checkpoint::CheckpointId;
use thiserror::Error;

/// Boxed error reported by an external collaborator
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result alias for checkpoint operations
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Errors returned by the checkpoint manager and its service handle
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// A requested device id does not resolve to a live device
    #[error("device {0} does not exist")]
    UnknownDevice(String),

    /// The request is malformed or conflicts with a live checkpoint
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// No live checkpoint has this id
    #[error("checkpoint {0} does not exist")]
    NotFound(String),

    /// The snapshot backend failed; its message is passed through unchanged
    #[error("{source}")]
    ConstructionFailed { source: BoxError },

    /// A freshly published id collided with a live entry
    #[error("checkpoint id {0} is already in use")]
    PublishFailed(CheckpointId),

    /// The service loop is no longer running
    #[error("checkpoint service is not running")]
    ServiceUnavailable,
}

impl CheckpointError {
    /// Wrap a collaborator error as a construction failure
    pub fn construction(source: impl Into<BoxError>) -> Self {
        CheckpointError::ConstructionFailed {
            source: source.into(),
        }
    }

    /// Stable error code for logging and the remote surface
    pub fn error_code(&self) -> &'static str {
        match self {
            CheckpointError::UnknownDevice(_) => "UNKNOWN_DEVICE",
            CheckpointError::InvalidArguments(_) => "INVALID_ARGUMENTS",
            CheckpointError::NotFound(_) => "NOT_FOUND",
            CheckpointError::ConstructionFailed { .. } => "CONSTRUCTION_FAILED",
            CheckpointError::PublishFailed(_) => "PUBLISH_FAILED",
            CheckpointError::ServiceUnavailable => "SERVICE_UNAVAILABLE",
        }
    }

    /// Whether the caller can act on this error by changing the request
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            CheckpointError::UnknownDevice(_)
                | CheckpointError::InvalidArguments(_)
                | CheckpointError::NotFound(_)
        )
    }
}
