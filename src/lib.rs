// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod error;
pub mod network;

pub use checkpoint::{
    Checkpoint, CheckpointFactory, CheckpointHandle, CheckpointId, CheckpointManager,
    CheckpointRequest, CheckpointService, CreateFlags, DeviceContext, DeviceHandle,
    DeviceResolver, RollbackEvent, RollbackReport, RollbackResult, RollbackTrigger,
};
pub use config::CheckpointConfig;
pub use error::{CheckpointError, Result};
pub use network::{DeviceConfig, InMemoryNetwork};
