// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Value types shared by the checkpoint store, scheduler and manager

use crate::error::{CheckpointError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Id that addresses "all checkpoints" in destroy requests
pub const ROOT_ID: &str = "/";

/// Published identifier of a live checkpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckpointId(String);

impl CheckpointId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for the sentinel that addresses every checkpoint
    pub fn is_root(&self) -> bool {
        self.0 == ROOT_ID
    }
}

impl fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CheckpointId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Live device as returned by a `DeviceResolver`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceHandle {
    /// Stable device path used in requests and rollback reports
    pub path: String,

    /// Interface name, used in user-facing messages
    pub iface: String,
}

impl DeviceHandle {
    pub fn new(path: impl Into<String>, iface: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            iface: iface.into(),
        }
    }
}

/// Flags accepted by checkpoint creation
///
/// Wire values: `DESTROY_ALL = 0x01`, `DISCONNECT_NEW_DEVICES = 0x04`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateFlags {
    /// Replace every existing checkpoint with the new one
    pub destroy_all: bool,

    /// Passed through to the checkpoint backend; requires explicit devices
    pub disconnect_new_devices: bool,
}

impl CreateFlags {
    pub const DESTROY_ALL: u32 = 0x01;
    pub const DISCONNECT_NEW_DEVICES: u32 = 0x04;
    const KNOWN: u32 = Self::DESTROY_ALL | Self::DISCONNECT_NEW_DEVICES;

    /// Decode a wire bitmask, rejecting unknown bits
    pub fn from_bits(bits: u32) -> Result<Self> {
        let unknown = bits & !Self::KNOWN;
        if unknown != 0 {
            return Err(CheckpointError::InvalidArguments(format!(
                "unknown checkpoint flags 0x{:x}",
                unknown
            )));
        }
        Ok(Self {
            destroy_all: bits & Self::DESTROY_ALL != 0,
            disconnect_new_devices: bits & Self::DISCONNECT_NEW_DEVICES != 0,
        })
    }

    pub fn bits(&self) -> u32 {
        let mut bits = 0;
        if self.destroy_all {
            bits |= Self::DESTROY_ALL;
        }
        if self.disconnect_new_devices {
            bits |= Self::DISCONNECT_NEW_DEVICES;
        }
        bits
    }

    pub fn with_destroy_all(mut self) -> Self {
        self.destroy_all = true;
        self
    }

    pub fn with_disconnect_new_devices(mut self) -> Self {
        self.disconnect_new_devices = true;
        self
    }
}

/// Per-device outcome of a rollback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackResult {
    Ok,
    NoDevice,
    DeviceUnmanaged,
    Failed,
}

impl RollbackResult {
    /// Numeric code used on the wire
    pub fn code(&self) -> u32 {
        match self {
            RollbackResult::Ok => 0,
            RollbackResult::NoDevice => 1,
            RollbackResult::DeviceUnmanaged => 2,
            RollbackResult::Failed => 3,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, RollbackResult::Ok)
    }
}

/// Result map of a rollback, keyed by device path
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackReport {
    pub results: BTreeMap<String, RollbackResult>,
}

impl RollbackReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, device_path: impl Into<String>, result: RollbackResult) {
        self.results.insert(device_path.into(), result);
    }

    pub fn get(&self, device_path: &str) -> Option<RollbackResult> {
        self.results.get(device_path).copied()
    }

    /// True when every device was restored
    pub fn is_success(&self) -> bool {
        self.results.values().all(RollbackResult::is_ok)
    }

    /// Paths of devices that did not roll back cleanly
    pub fn failed_devices(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|(_, result)| !result.is_ok())
            .map(|(path, _)| path.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// What caused a rollback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackTrigger {
    /// A caller invoked rollback
    Explicit,
    /// The checkpoint's expiry elapsed without a commit
    Expired,
}

/// Terminal state a checkpoint leaves the store in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointOutcome {
    /// Destroyed without restoring; changes since the snapshot are kept
    Committed,
    /// Configuration restored to the snapshot
    RolledBack(RollbackTrigger),
}

impl fmt::Display for CheckpointOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckpointOutcome::Committed => f.write_str("committed"),
            CheckpointOutcome::RolledBack(RollbackTrigger::Explicit) => f.write_str("rolled back"),
            CheckpointOutcome::RolledBack(RollbackTrigger::Expired) => {
                f.write_str("rolled back (expired)")
            }
        }
    }
}

/// Broadcast after every rollback, explicit or automatic
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackEvent {
    pub checkpoint: CheckpointId,
    pub trigger: RollbackTrigger,
    pub report: RollbackReport,
    pub occurred_at: DateTime<Utc>,
}

impl RollbackEvent {
    pub fn new(checkpoint: CheckpointId, trigger: RollbackTrigger, report: RollbackReport) -> Self {
        Self {
            checkpoint,
            trigger,
            report,
            occurred_at: Utc::now(),
        }
    }
}
