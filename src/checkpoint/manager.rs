// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Checkpoint manager
//!
//! Combines the store and the rollback scheduler behind the four management
//! operations (create, destroy, destroy-all, rollback) and the automatic
//! expiry sweep. Every mutation recomputes the rollback deadline and refreshes
//! the published checkpoint list.
//!
//! ## Lifecycle
//! `Active -> Committed` via destroy / destroy-all,
//! `Active -> RolledBack` via rollback or expiry. Both are terminal: the
//! entry leaves the store, its id is unpublished and never handed out again.
//!
//! The manager is driven from a single task (see `service`), so it needs no
//! internal locking.

use crate::checkpoint::collaborators::{
    Checkpoint, CheckpointRequest, DeviceContext, ObjectPublisher, PathPublisher,
};
use crate::checkpoint::scheduler::{ExpiredCheckpoint, RollbackScheduler};
use crate::checkpoint::store::{AlreadyExists, CheckpointStore};
use crate::checkpoint::types::{
    CheckpointId, CheckpointOutcome, CreateFlags, DeviceHandle, RollbackEvent, RollbackReport,
    RollbackTrigger, ROOT_ID,
};
use crate::config::CheckpointConfig;
use crate::error::{CheckpointError, Result};
use std::fmt;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Default capacity of the rollback event channel
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

pub struct CheckpointManager {
    store: CheckpointStore,
    scheduler: RollbackScheduler,
    publisher: Box<dyn ObjectPublisher>,
    checkpoints_tx: watch::Sender<Vec<CheckpointId>>,
    events_tx: broadcast::Sender<RollbackEvent>,
}

impl CheckpointManager {
    pub fn new(publisher: Box<dyn ObjectPublisher>) -> Self {
        Self::with_event_capacity(publisher, DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_event_capacity(publisher: Box<dyn ObjectPublisher>, capacity: usize) -> Self {
        let (checkpoints_tx, _) = watch::channel(Vec::new());
        let (events_tx, _) = broadcast::channel(capacity.max(1));

        Self {
            store: CheckpointStore::new(),
            scheduler: RollbackScheduler::new(),
            publisher,
            checkpoints_tx,
            events_tx,
        }
    }

    /// Manager publishing ids under the configured prefix
    pub fn from_config(config: &CheckpointConfig) -> Self {
        Self::with_event_capacity(
            Box::new(PathPublisher::new(config.object_path_prefix.clone())),
            config.rollback_event_capacity,
        )
    }

    /// Create a checkpoint over `device_ids`.
    ///
    /// An empty list means every device `ctx` knows about. On any error the
    /// store, the deadline and the published list are left as they were.
    pub fn create(
        &mut self,
        ctx: &dyn DeviceContext,
        device_ids: &[String],
        rollback_timeout: Option<Duration>,
        flags: CreateFlags,
    ) -> Result<CheckpointId> {
        let now = Instant::now();
        if let Some(timeout) = rollback_timeout {
            if now.checked_add(timeout).is_none() {
                return Err(CheckpointError::InvalidArguments(format!(
                    "rollback timeout of {}s is out of range",
                    timeout.as_secs()
                )));
            }
        }
        let devices = Self::resolve_devices(ctx, device_ids, flags)?;

        if !flags.destroy_all {
            for device in &devices {
                if let Some((owner, _)) = self.store.find_by_device(device) {
                    return Err(CheckpointError::InvalidArguments(format!(
                        "device '{}' is already included in checkpoint {}",
                        device.iface, owner
                    )));
                }
            }
        }

        let device_count = devices.len();
        let checkpoint = ctx
            .create_checkpoint(CheckpointRequest {
                devices,
                rollback_timeout,
                flags,
                created_at: now,
            })
            .map_err(CheckpointError::construction)?;

        // Only now that the new unit exists may the old ones go
        if flags.destroy_all {
            self.retire_all();
        }

        let id = self.publisher.publish(checkpoint.as_ref());
        if let Err(AlreadyExists { id, checkpoint }) = self.store.insert(id.clone(), checkpoint) {
            error!(checkpoint = %id, "Published checkpoint id collides with a live checkpoint");
            drop(checkpoint);
            // Keep the export table in step with the store
            if !self.store.contains(&id) {
                self.publisher.unpublish(&id);
            }
            if flags.destroy_all {
                self.refresh(now);
            }
            return Err(CheckpointError::PublishFailed(id));
        }

        info!(
            checkpoint = %id,
            devices = device_count,
            timeout_secs = rollback_timeout.map(|t| t.as_secs()),
            destroy_all = flags.destroy_all,
            "Checkpoint created"
        );

        self.refresh(now);
        Ok(id)
    }

    /// Commit a checkpoint; `"/"` commits all of them
    pub fn destroy(&mut self, id: &str) -> Result<()> {
        if id == ROOT_ID {
            return self.destroy_all();
        }

        let key = CheckpointId::new(id);
        let checkpoint = self
            .store
            .remove(&key)
            .ok_or_else(|| CheckpointError::NotFound(id.to_string()))?;
        self.retire(&key, checkpoint, CheckpointOutcome::Committed);

        info!(checkpoint = %key, "Checkpoint destroyed");
        self.refresh(Instant::now());
        Ok(())
    }

    /// Commit every checkpoint. Succeeds and notifies even when empty.
    pub fn destroy_all(&mut self) -> Result<()> {
        let count = self.retire_all();
        info!(count, "All checkpoints destroyed");
        self.refresh(Instant::now());
        Ok(())
    }

    /// Restore a checkpoint and retire it, whatever the report says
    pub fn rollback(&mut self, id: &str) -> Result<RollbackReport> {
        let key = CheckpointId::new(id);
        let mut checkpoint = self
            .store
            .remove(&key)
            .ok_or_else(|| CheckpointError::NotFound(id.to_string()))?;

        let report = checkpoint.rollback();
        self.retire(
            &key,
            checkpoint,
            CheckpointOutcome::RolledBack(RollbackTrigger::Explicit),
        );
        self.emit_rollback(key, RollbackTrigger::Explicit, report.clone());

        self.refresh(Instant::now());
        Ok(report)
    }

    /// Timer callback: roll back whatever has expired and re-arm.
    ///
    /// Never fails; results go out on the rollback event channel. Returns the
    /// number of checkpoints rolled back.
    pub fn on_rollback_timeout(&mut self) -> usize {
        let now = Instant::now();
        let expired = self.scheduler.on_fire(&mut self.store, now);
        let count = expired.len();

        for ExpiredCheckpoint {
            id,
            checkpoint,
            report,
        } in expired
        {
            warn!(checkpoint = %id, "Checkpoint expired, rolled back automatically");
            self.retire(
                &id,
                checkpoint,
                CheckpointOutcome::RolledBack(RollbackTrigger::Expired),
            );
            self.emit_rollback(id, RollbackTrigger::Expired, report);
        }

        if count > 0 {
            self.notify();
        }
        count
    }

    /// Live checkpoint ids in creation order
    pub fn checkpoints(&self) -> Vec<CheckpointId> {
        self.checkpoints_tx.borrow().clone()
    }

    /// Receiver refreshed after every mutation
    pub fn watch_checkpoints(&self) -> watch::Receiver<Vec<CheckpointId>> {
        self.checkpoints_tx.subscribe()
    }

    pub fn subscribe_rollbacks(&self) -> broadcast::Receiver<RollbackEvent> {
        self.events_tx.subscribe()
    }

    pub(crate) fn rollback_sender(&self) -> broadcast::Sender<RollbackEvent> {
        self.events_tx.clone()
    }

    /// When the rollback timer fires next
    pub fn next_deadline(&self) -> Option<Instant> {
        self.scheduler.deadline()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.store.contains(&CheckpointId::new(id))
    }

    pub fn checkpoint_for_device(&self, device: &DeviceHandle) -> Option<CheckpointId> {
        self.store.find_by_device(device).map(|(id, _)| id.clone())
    }

    pub fn devices_of(&self, id: &str) -> Option<Vec<DeviceHandle>> {
        self.store
            .get(&CheckpointId::new(id))
            .map(|checkpoint| checkpoint.devices())
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    fn resolve_devices(
        ctx: &dyn DeviceContext,
        device_ids: &[String],
        flags: CreateFlags,
    ) -> Result<Vec<DeviceHandle>> {
        let all_ids;
        let ids = if device_ids.is_empty() {
            if flags.disconnect_new_devices {
                return Err(CheckpointError::InvalidArguments(
                    "the DISCONNECT_NEW_DEVICES flag requires an explicit device list"
                        .to_string(),
                ));
            }
            all_ids = ctx.all_device_ids();
            all_ids.as_slice()
        } else {
            device_ids
        };

        let mut devices: Vec<DeviceHandle> = Vec::with_capacity(ids.len());
        for id in ids {
            let device = ctx
                .resolve(id)
                .ok_or_else(|| CheckpointError::UnknownDevice(id.clone()))?;
            if !devices.contains(&device) {
                devices.push(device);
            }
        }
        Ok(devices)
    }

    fn retire(&mut self, id: &CheckpointId, checkpoint: Box<dyn Checkpoint>, outcome: CheckpointOutcome) {
        self.publisher.unpublish(id);
        drop(checkpoint);
        debug!(checkpoint = %id, %outcome, "Checkpoint retired");
    }

    fn retire_all(&mut self) -> usize {
        let removed = self.store.remove_all();
        let count = removed.len();
        for (id, checkpoint) in removed {
            self.retire(&id, checkpoint, CheckpointOutcome::Committed);
        }
        count
    }

    fn emit_rollback(&self, id: CheckpointId, trigger: RollbackTrigger, report: RollbackReport) {
        if report.is_success() {
            info!(checkpoint = %id, ?trigger, devices = report.len(), "Rollback complete");
        } else {
            warn!(
                checkpoint = %id,
                ?trigger,
                failed = ?report.failed_devices(),
                "Rollback completed with failures"
            );
        }

        // No subscribers is fine
        let _ = self
            .events_tx
            .send(RollbackEvent::new(id, trigger, report));
    }

    fn refresh(&mut self, now: Instant) {
        self.scheduler.recompute(&self.store, now);
        self.notify();
    }

    fn notify(&self) {
        self.checkpoints_tx
            .send_replace(self.store.ids_in_creation_order());
    }
}

impl Drop for CheckpointManager {
    fn drop(&mut self) {
        self.scheduler.disarm();
        let count = self.retire_all();
        if count > 0 {
            debug!(count, "Released checkpoints on manager shutdown");
            self.notify();
        }
    }
}

impl fmt::Debug for CheckpointManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckpointManager")
            .field("checkpoints", &self.store.ids_in_creation_order())
            .field("next_deadline", &self.scheduler.deadline())
            .finish()
    }
}
