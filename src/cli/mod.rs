// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Operator console
//!
//! `Cli` parses the process arguments. Each line read from stdin is parsed
//! into a `ConsoleCommand` and run against a checkpoint service and its
//! in-memory network.

use crate::checkpoint::{CheckpointHandle, CreateFlags, RollbackEvent};
use crate::error::CheckpointError;
use crate::network::InMemoryNetwork;
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

/// Network configuration checkpoint console
#[derive(Parser, Debug)]
#[command(name = "netcfg-checkpoint")]
#[command(version)]
#[command(about = "Checkpoint and roll back network device configuration", long_about = None)]
pub struct Cli {
    /// TOML file with a [checkpoint] table
    #[arg(long, env = "CHECKPOINT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Devices present at startup
    #[arg(long = "device", value_name = "IFACE", value_delimiter = ',', default_value = "eth0")]
    pub devices: Vec<String>,
}

/// One console line
#[derive(Parser, Debug)]
#[command(no_binary_name = true)]
pub struct ConsoleLine {
    #[command(subcommand)]
    pub command: ConsoleCommand,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Create a checkpoint over DEVICE..., or over every device if none given
    Create {
        /// Roll back automatically after this many seconds (0 = never)
        #[arg(long, default_value_t = 0)]
        timeout: u32,

        /// Replace all existing checkpoints
        #[arg(long)]
        destroy_all: bool,

        /// Bring down devices added after the checkpoint on rollback
        #[arg(long)]
        disconnect_new_devices: bool,

        devices: Vec<String>,
    },

    /// Commit a checkpoint ("/" commits all)
    Destroy { id: String },

    /// Commit every checkpoint
    DestroyAll,

    /// Restore a checkpoint
    Rollback { id: String },

    /// List live checkpoints
    List,

    /// Show a device's configuration
    Show { device: String },

    /// Change a device's MTU
    SetMtu { device: String, mtu: u32 },

    /// Exit the console
    Quit,
}

impl ConsoleCommand {
    /// Parse a console line; `None` for blank lines
    pub fn parse_line(line: &str) -> Option<std::result::Result<Self, clap::Error>> {
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.is_empty() {
            return None;
        }
        Some(ConsoleLine::try_parse_from(words).map(|parsed| parsed.command))
    }
}

/// What the console loop should do after a command
#[derive(Debug, PartialEq, Eq)]
pub enum Reply {
    Output(String),
    Quit,
}

pub struct Console {
    handle: CheckpointHandle,
    network: Arc<InMemoryNetwork>,
}

impl Console {
    pub fn new(handle: CheckpointHandle, network: Arc<InMemoryNetwork>) -> Self {
        Self { handle, network }
    }

    /// Run one command. Checkpoint errors are reported in the output.
    pub async fn execute(&self, command: ConsoleCommand) -> Result<Reply> {
        let output = match command {
            ConsoleCommand::Create {
                timeout,
                destroy_all,
                disconnect_new_devices,
                devices,
            } => {
                let flags = CreateFlags {
                    destroy_all,
                    disconnect_new_devices,
                };
                match self.handle.create(devices, timeout, flags.bits()).await {
                    Ok(id) => format!("created {}", id),
                    Err(e) => describe_error(&e),
                }
            }
            ConsoleCommand::Destroy { id } => match self.handle.destroy(&id).await {
                Ok(()) => format!("destroyed {}", id),
                Err(e) => describe_error(&e),
            },
            ConsoleCommand::DestroyAll => match self.handle.destroy_all().await {
                Ok(()) => "destroyed all checkpoints".to_string(),
                Err(e) => describe_error(&e),
            },
            ConsoleCommand::Rollback { id } => match self.handle.rollback(&id).await {
                Ok(report) => serde_json::to_string_pretty(&report)?,
                Err(e) => describe_error(&e),
            },
            ConsoleCommand::List => {
                let ids = self.handle.checkpoints();
                if ids.is_empty() {
                    "no checkpoints".to_string()
                } else {
                    ids.iter()
                        .map(|id| id.to_string())
                        .collect::<Vec<_>>()
                        .join("\n")
                }
            }
            ConsoleCommand::Show { device } => match self.network.device_config(&device) {
                Some(config) => serde_json::to_string_pretty(&config)?,
                None => format!("error: no device named {}", device),
            },
            ConsoleCommand::SetMtu { device, mtu } => match self.network.set_mtu(&device, mtu) {
                Ok(()) => format!("{} mtu {}", device, mtu),
                Err(e) => format!("error: {}", e),
            },
            ConsoleCommand::Quit => return Ok(Reply::Quit),
        };
        Ok(Reply::Output(output))
    }
}

fn describe_error(error: &CheckpointError) -> String {
    format!("error [{}]: {}", error.error_code(), error)
}

/// One-line summary of a rollback event
pub fn format_event(event: &RollbackEvent) -> String {
    let failed = event.report.failed_devices();
    let status = if failed.is_empty() {
        "ok".to_string()
    } else {
        format!("failed on {}", failed.join(", "))
    };
    format!(
        "[{}] {} rolled back ({:?}): {}",
        event.occurred_at.format("%H:%M:%S"),
        event.checkpoint,
        event.trigger,
        status
    )
}
