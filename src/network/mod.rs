// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Device backend for the checkpoint manager
//!
//! `InMemoryNetwork` implements both `DeviceResolver` and `CheckpointFactory`
//! over a shared device table. Checkpoints copy each covered device's
//! `DeviceConfig` and write it back on rollback:
//! - devices removed since the snapshot report `NoDevice`
//! - devices marked unmanaged report `DeviceUnmanaged` and are left alone
//! - with `DISCONNECT_NEW_DEVICES`, devices added after the snapshot are
//!   brought down

pub mod memory;

pub use memory::{DeviceConfig, InMemoryNetwork, NetworkError, DEFAULT_MTU, DEVICE_PATH_PREFIX};
