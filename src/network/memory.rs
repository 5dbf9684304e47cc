// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! In-memory device table with snapshot checkpoints

use crate::checkpoint::collaborators::{Checkpoint, CheckpointFactory, CheckpointRequest, DeviceResolver};
use crate::checkpoint::types::{DeviceHandle, RollbackReport, RollbackResult};
use crate::error::BoxError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info};

/// Device paths are `<DEVICE_PATH_PREFIX>/<iface>`
pub const DEVICE_PATH_PREFIX: &str = "/org/netcfg/Devices";

pub const DEFAULT_MTU: u32 = 1500;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("no device named {0}")]
    UnknownDevice(String),

    #[error("device {0} already exists")]
    DeviceExists(String),

    #[error("invalid MTU {mtu} for {iface}")]
    InvalidMtu { iface: String, mtu: u32 },

    #[error("snapshot of {devices} device(s) failed: {reason}")]
    SnapshotFailed { devices: usize, reason: String },
}

/// Configuration of one device, as captured by a checkpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub addresses: Vec<String>,
    pub mtu: u32,
    pub up: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            addresses: Vec::new(),
            mtu: DEFAULT_MTU,
            up: true,
        }
    }
}

#[derive(Debug, Clone)]
struct DeviceEntry {
    config: DeviceConfig,
    managed: bool,
}

#[derive(Debug, Default)]
struct NetworkState {
    devices: BTreeMap<String, DeviceEntry>,
    fail_next_checkpoint: Option<String>,
}

fn device_path(iface: &str) -> String {
    format!("{}/{}", DEVICE_PATH_PREFIX, iface)
}

fn lock(state: &Mutex<NetworkState>) -> MutexGuard<'_, NetworkState> {
    // The table stays consistent across a panicking holder
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Device table shared between the operator and the checkpoint service
#[derive(Debug, Clone, Default)]
pub struct InMemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl InMemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Network with `ifaces` up and at the default MTU
    pub fn with_devices(ifaces: &[&str]) -> Self {
        let network = Self::new();
        {
            let mut state = lock(&network.state);
            for iface in ifaces {
                state.devices.insert(
                    iface.to_string(),
                    DeviceEntry {
                        config: DeviceConfig::default(),
                        managed: true,
                    },
                );
            }
        }
        network
    }

    pub fn add_device(&self, iface: &str, config: DeviceConfig) -> Result<DeviceHandle, NetworkError> {
        let mut state = lock(&self.state);
        if state.devices.contains_key(iface) {
            return Err(NetworkError::DeviceExists(iface.to_string()));
        }
        state.devices.insert(
            iface.to_string(),
            DeviceEntry {
                config,
                managed: true,
            },
        );
        debug!(iface, "Device added");
        Ok(DeviceHandle::new(device_path(iface), iface))
    }

    pub fn remove_device(&self, iface: &str) -> Result<DeviceConfig, NetworkError> {
        let entry = lock(&self.state)
            .devices
            .remove(iface)
            .ok_or_else(|| NetworkError::UnknownDevice(iface.to_string()))?;
        debug!(iface, "Device removed");
        Ok(entry.config)
    }

    pub fn device_config(&self, iface: &str) -> Option<DeviceConfig> {
        lock(&self.state)
            .devices
            .get(iface)
            .map(|entry| entry.config.clone())
    }

    /// Interface names in sorted order
    pub fn device_names(&self) -> Vec<String> {
        lock(&self.state).devices.keys().cloned().collect()
    }

    pub fn set_mtu(&self, iface: &str, mtu: u32) -> Result<(), NetworkError> {
        if !(68..=65535).contains(&mtu) {
            return Err(NetworkError::InvalidMtu {
                iface: iface.to_string(),
                mtu,
            });
        }
        self.update(iface, |config| config.mtu = mtu)
    }

    pub fn set_up(&self, iface: &str, up: bool) -> Result<(), NetworkError> {
        self.update(iface, |config| config.up = up)
    }

    pub fn add_address(&self, iface: &str, address: impl Into<String>) -> Result<(), NetworkError> {
        let address = address.into();
        self.update(iface, |config| {
            if !config.addresses.contains(&address) {
                config.addresses.push(address);
            }
        })
    }

    /// Unmanaged devices are left alone by rollback
    pub fn set_managed(&self, iface: &str, managed: bool) -> Result<(), NetworkError> {
        let mut state = lock(&self.state);
        let entry = state
            .devices
            .get_mut(iface)
            .ok_or_else(|| NetworkError::UnknownDevice(iface.to_string()))?;
        entry.managed = managed;
        Ok(())
    }

    /// Make the next checkpoint construction fail with `reason`
    pub fn fail_next_checkpoint(&self, reason: impl Into<String>) {
        lock(&self.state).fail_next_checkpoint = Some(reason.into());
    }

    fn update(&self, iface: &str, apply: impl FnOnce(&mut DeviceConfig)) -> Result<(), NetworkError> {
        let mut state = lock(&self.state);
        let entry = state
            .devices
            .get_mut(iface)
            .ok_or_else(|| NetworkError::UnknownDevice(iface.to_string()))?;
        apply(&mut entry.config);
        Ok(())
    }
}

impl DeviceResolver for InMemoryNetwork {
    /// Accepts either the interface name or the full device path
    fn resolve(&self, id: &str) -> Option<DeviceHandle> {
        let iface = id
            .strip_prefix(DEVICE_PATH_PREFIX)
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(id);

        lock(&self.state)
            .devices
            .contains_key(iface)
            .then(|| DeviceHandle::new(device_path(iface), iface))
    }

    fn all_device_ids(&self) -> Vec<String> {
        self.device_names()
    }
}

impl CheckpointFactory for InMemoryNetwork {
    fn create_checkpoint(&self, request: CheckpointRequest) -> Result<Box<dyn Checkpoint>, BoxError> {
        let mut state = lock(&self.state);

        if let Some(reason) = state.fail_next_checkpoint.take() {
            return Err(NetworkError::SnapshotFailed {
                devices: request.devices.len(),
                reason,
            }
            .into());
        }

        let mut snapshot = BTreeMap::new();
        for device in &request.devices {
            let entry = state
                .devices
                .get(&device.iface)
                .ok_or_else(|| NetworkError::UnknownDevice(device.iface.clone()))?;
            snapshot.insert(device.iface.clone(), entry.config.clone());
        }

        let known_devices = state.devices.keys().cloned().collect();
        let rollback_deadline = request.rollback_deadline();

        Ok(Box::new(SnapshotCheckpoint {
            state: self.state.clone(),
            devices: request.devices,
            snapshot,
            known_devices,
            disconnect_new_devices: request.flags.disconnect_new_devices,
            rollback_deadline,
        }))
    }
}

/// Copy of the covered devices' configuration at creation time
struct SnapshotCheckpoint {
    state: Arc<Mutex<NetworkState>>,
    devices: Vec<DeviceHandle>,
    snapshot: BTreeMap<String, DeviceConfig>,
    known_devices: BTreeSet<String>,
    disconnect_new_devices: bool,
    rollback_deadline: Option<Instant>,
}

impl Checkpoint for SnapshotCheckpoint {
    fn includes_device(&self, device: &DeviceHandle) -> bool {
        self.devices.contains(device)
    }

    fn rollback_deadline(&self) -> Option<Instant> {
        self.rollback_deadline
    }

    fn rollback(&mut self) -> RollbackReport {
        let mut state = lock(&self.state);
        let mut report = RollbackReport::new();

        for device in &self.devices {
            let result = match (state.devices.get_mut(&device.iface), self.snapshot.get(&device.iface)) {
                (Some(entry), _) if !entry.managed => RollbackResult::DeviceUnmanaged,
                (Some(entry), Some(saved)) => {
                    entry.config = saved.clone();
                    RollbackResult::Ok
                }
                (Some(_), None) => RollbackResult::Failed,
                (None, _) => RollbackResult::NoDevice,
            };
            report.record(device.path.clone(), result);
        }

        if self.disconnect_new_devices {
            for (iface, entry) in state.devices.iter_mut() {
                if !self.known_devices.contains(iface) && entry.config.up {
                    entry.config.up = false;
                    info!(iface = %iface, "Disconnected device added after checkpoint");
                }
            }
        }

        report
    }

    fn devices(&self) -> Vec<DeviceHandle> {
        self.devices.clone()
    }
}
