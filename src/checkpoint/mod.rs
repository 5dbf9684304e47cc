// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Configuration checkpoints with automatic rollback
//!
//! A checkpoint snapshots the configuration of a set of devices. It is later
//! either destroyed (the changes are kept) or rolled back (the snapshot is
//! restored), explicitly or because its rollback timeout elapsed.
//!
//! ## Flow
//! 1. `create` resolves the devices, refuses any already claimed by a live
//!    checkpoint, builds the snapshot and publishes it under a fresh id
//! 2. The rollback timer is re-armed for the earliest pending expiry
//! 3. `destroy` / `destroy_all` commit, `rollback` restores
//! 4. When the timer fires, every expired checkpoint is rolled back together
//!
//! ## Invariants
//! - A device belongs to at most one live checkpoint
//! - Ids are never reused, `"/"` is reserved to mean "all checkpoints"
//! - Every mutation publishes the new id list in creation order

pub mod collaborators;
pub mod manager;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod types;

pub use collaborators::{
    Checkpoint, CheckpointFactory, CheckpointRequest, DeviceContext, DeviceResolver,
    ObjectPublisher, PathPublisher,
};
pub use manager::{CheckpointManager, DEFAULT_EVENT_CAPACITY};
pub use scheduler::{ExpiredCheckpoint, RollbackScheduler};
pub use service::{CheckpointHandle, CheckpointService};
pub use store::{AlreadyExists, CheckpointStore};
pub use types::{
    CheckpointId, CheckpointOutcome, CreateFlags, DeviceHandle, RollbackEvent, RollbackReport,
    RollbackResult, RollbackTrigger, ROOT_ID,
};
