// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Boundary traits consumed by the checkpoint manager
//!
//! The manager never snapshots or restores device state itself. It works
//! against three collaborators:
//! - `DeviceResolver` maps request ids to live devices
//! - `CheckpointFactory` builds the snapshot unit (`Checkpoint`)
//! - `ObjectPublisher` assigns the externally visible id

use crate::checkpoint::types::{CheckpointId, CreateFlags, DeviceHandle, RollbackReport};
use crate::error::BoxError;
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

/// Snapshot of one or more devices' configuration
pub trait Checkpoint: Send {
    /// Whether this checkpoint claims `device`
    fn includes_device(&self, device: &DeviceHandle) -> bool;

    /// Absolute rollback deadline, `None` if the checkpoint never expires
    fn rollback_deadline(&self) -> Option<Instant>;

    /// Restore the snapshot. Called at most once per checkpoint.
    fn rollback(&mut self) -> RollbackReport;

    /// Devices covered by this checkpoint
    fn devices(&self) -> Vec<DeviceHandle>;
}

/// Resolves request ids to live devices
pub trait DeviceResolver: Send + Sync {
    fn resolve(&self, id: &str) -> Option<DeviceHandle>;

    /// Ids of every device currently known
    fn all_device_ids(&self) -> Vec<String>;
}

/// Everything needed to construct a checkpoint
#[derive(Debug, Clone)]
pub struct CheckpointRequest {
    pub devices: Vec<DeviceHandle>,
    pub rollback_timeout: Option<Duration>,
    pub flags: CreateFlags,
    pub created_at: Instant,
}

impl CheckpointRequest {
    /// `created_at + rollback_timeout`, if a timeout was requested and the
    /// sum is representable
    pub fn rollback_deadline(&self) -> Option<Instant> {
        self.rollback_timeout
            .and_then(|timeout| self.created_at.checked_add(timeout))
    }
}

/// Builds checkpoint units
pub trait CheckpointFactory: Send + Sync {
    fn create_checkpoint(
        &self,
        request: CheckpointRequest,
    ) -> std::result::Result<Box<dyn Checkpoint>, BoxError>;
}

/// The device-owning context a manager operates against.
///
/// The manager does not hold on to it; `create` borrows it for the duration
/// of the call. Whoever drives the manager must keep the context alive for
/// as long as checkpoints built from it may be rolled back.
pub trait DeviceContext: DeviceResolver + CheckpointFactory {}

impl<T: DeviceResolver + CheckpointFactory> DeviceContext for T {}

/// Makes checkpoints externally visible under a unique id
pub trait ObjectPublisher: Send {
    fn publish(&mut self, checkpoint: &dyn Checkpoint) -> CheckpointId;

    fn unpublish(&mut self, id: &CheckpointId);
}

/// Publishes checkpoints as `<prefix>/<n>` with `n` never reused
#[derive(Debug)]
pub struct PathPublisher {
    prefix: String,
    next_index: u64,
    exported: HashSet<CheckpointId>,
}

impl PathPublisher {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next_index: 1,
            exported: HashSet::new(),
        }
    }

    pub fn is_exported(&self, id: &CheckpointId) -> bool {
        self.exported.contains(id)
    }

    pub fn exported_count(&self) -> usize {
        self.exported.len()
    }
}

impl ObjectPublisher for PathPublisher {
    fn publish(&mut self, _checkpoint: &dyn Checkpoint) -> CheckpointId {
        let id = CheckpointId::new(format!("{}/{}", self.prefix, self.next_index));
        self.next_index += 1;
        self.exported.insert(id.clone());
        trace!(checkpoint = %id, "Exported checkpoint");
        id
    }

    fn unpublish(&mut self, id: &CheckpointId) {
        if self.exported.remove(id) {
            trace!(checkpoint = %id, "Unexported checkpoint");
        }
    }
}
