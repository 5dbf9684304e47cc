// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Coalesced rollback timer
//!
//! A single deadline stands in for every live checkpoint's expiry: it is the
//! earliest non-null rollback deadline in the store, or unarmed when no
//! checkpoint expires. The owner recomputes it after every store mutation and
//! waits on it; when it elapses, `on_fire` rolls back everything that is due
//! and re-arms for whatever remains.

use crate::checkpoint::collaborators::Checkpoint;
use crate::checkpoint::store::CheckpointStore;
use crate::checkpoint::types::{CheckpointId, RollbackReport};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

/// A checkpoint removed by an expiry sweep, already rolled back
pub struct ExpiredCheckpoint {
    pub id: CheckpointId,
    pub checkpoint: Box<dyn Checkpoint>,
    pub report: RollbackReport,
}

#[derive(Debug, Default)]
pub struct RollbackScheduler {
    deadline: Option<Instant>,
}

impl RollbackScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Instant the armed timer fires at, `None` when unarmed
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Time left until the timer fires, zero if already due
    pub fn delay(&self, now: Instant) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    pub fn disarm(&mut self) {
        if self.deadline.take().is_some() {
            trace!("Rollback timer disarmed");
        }
    }

    /// Re-arm for the earliest pending expiry in `store`.
    ///
    /// An expiry at or before `now` arms with zero delay.
    pub fn recompute(&mut self, store: &CheckpointStore, now: Instant) -> Option<Instant> {
        let next = store
            .iter()
            .filter_map(|(_, checkpoint)| checkpoint.rollback_deadline())
            .min();

        self.deadline = next.map(|expiry| expiry.max(now));

        match self.deadline {
            Some(deadline) => debug!(
                delay_ms = deadline.saturating_duration_since(now).as_millis() as u64,
                "Rollback timer armed"
            ),
            None => trace!("No expiring checkpoints, rollback timer unarmed"),
        }

        self.deadline
    }

    /// Roll back and remove every checkpoint whose expiry is at or before
    /// `now`, then re-arm. A sweep that finds nothing due still re-arms.
    pub fn on_fire(&mut self, store: &mut CheckpointStore, now: Instant) -> Vec<ExpiredCheckpoint> {
        self.deadline = None;

        let due: Vec<CheckpointId> = store
            .iter()
            .filter(|(_, checkpoint)| {
                checkpoint
                    .rollback_deadline()
                    .map_or(false, |expiry| expiry <= now)
            })
            .map(|(id, _)| id.clone())
            .collect();

        let mut expired = Vec::with_capacity(due.len());
        for id in due {
            if let Some(mut checkpoint) = store.remove(&id) {
                let report = checkpoint.rollback();
                expired.push(ExpiredCheckpoint {
                    id,
                    checkpoint,
                    report,
                });
            }
        }

        if expired.is_empty() {
            trace!("Rollback timer fired with nothing due");
        }

        self.recompute(store, now);
        expired
    }
}
