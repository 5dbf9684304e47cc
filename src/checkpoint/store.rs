// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! In-memory collection of live checkpoints
//!
//! Entries are keyed by their published id and remember their insertion
//! sequence so listings come out in creation order. Lookups by device are a
//! linear scan: checkpoint counts are operator-driven and small.

use crate::checkpoint::collaborators::Checkpoint;
use crate::checkpoint::types::{CheckpointId, DeviceHandle};
use std::collections::HashMap;
use std::fmt;

struct StoredCheckpoint {
    sequence: u64,
    checkpoint: Box<dyn Checkpoint>,
}

/// Returned by `insert` when the id is already live; hands the checkpoint back
pub struct AlreadyExists {
    pub id: CheckpointId,
    pub checkpoint: Box<dyn Checkpoint>,
}

impl fmt::Debug for AlreadyExists {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlreadyExists").field("id", &self.id).finish()
    }
}

/// Authoritative set of live checkpoints
#[derive(Default)]
pub struct CheckpointStore {
    entries: HashMap<CheckpointId, StoredCheckpoint>,
    next_sequence: u64,
}

impl CheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        id: CheckpointId,
        checkpoint: Box<dyn Checkpoint>,
    ) -> Result<(), AlreadyExists> {
        if id.as_str().is_empty() || self.entries.contains_key(&id) {
            return Err(AlreadyExists { id, checkpoint });
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.entries.insert(
            id,
            StoredCheckpoint {
                sequence,
                checkpoint,
            },
        );
        Ok(())
    }

    /// Remove an entry and hand ownership back for cleanup
    pub fn remove(&mut self, id: &CheckpointId) -> Option<Box<dyn Checkpoint>> {
        self.entries.remove(id).map(|stored| stored.checkpoint)
    }

    /// Clear the store, returning every entry in creation order
    pub fn remove_all(&mut self) -> Vec<(CheckpointId, Box<dyn Checkpoint>)> {
        let mut drained: Vec<_> = self.entries.drain().collect();
        drained.sort_by_key(|(_, stored)| stored.sequence);
        drained
            .into_iter()
            .map(|(id, stored)| (id, stored.checkpoint))
            .collect()
    }

    /// The live checkpoint claiming `device`, if any
    pub fn find_by_device(&self, device: &DeviceHandle) -> Option<(&CheckpointId, &dyn Checkpoint)> {
        self.entries
            .iter()
            .find(|(_, stored)| stored.checkpoint.includes_device(device))
            .map(|(id, stored)| (id, stored.checkpoint.as_ref()))
    }

    pub fn get(&self, id: &CheckpointId) -> Option<&dyn Checkpoint> {
        self.entries.get(id).map(|stored| stored.checkpoint.as_ref())
    }

    pub fn contains(&self, id: &CheckpointId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn ids_in_creation_order(&self) -> Vec<CheckpointId> {
        let mut ids: Vec<_> = self
            .entries
            .iter()
            .map(|(id, stored)| (stored.sequence, id.clone()))
            .collect();
        ids.sort_by_key(|(sequence, _)| *sequence);
        ids.into_iter().map(|(_, id)| id).collect()
    }

    /// Iterate `(id, checkpoint)` pairs in no particular order
    pub fn iter(&self) -> impl Iterator<Item = (&CheckpointId, &dyn Checkpoint)> {
        self.entries
            .iter()
            .map(|(id, stored)| (id, stored.checkpoint.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for CheckpointStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckpointStore")
            .field("checkpoints", &self.ids_in_creation_order())
            .finish()
    }
}
