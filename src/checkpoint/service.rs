// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Checkpoint service loop
//!
//! One tokio task owns the `CheckpointManager` and serialises every operation:
//! management calls arrive over a command channel, and the rollback timer is a
//! `sleep_until` on the manager's next deadline. The sleep is rebuilt on every
//! iteration, so any mutation that moves the deadline also cancels the old
//! wait, and the timer can never outlive the manager.
//!
//! `CheckpointHandle` is the caller-facing surface: `Create`, `Destroy`,
//! `DestroyAll`, `Rollback` and the `Checkpoints` property.

use crate::checkpoint::collaborators::DeviceContext;
use crate::checkpoint::manager::CheckpointManager;
use crate::checkpoint::types::{CheckpointId, CreateFlags, RollbackEvent, RollbackReport};
use crate::config::CheckpointConfig;
use crate::error::{CheckpointError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Commands processed by the service loop
#[derive(Debug)]
enum ServiceCommand {
    Create {
        device_ids: Vec<String>,
        rollback_timeout: Option<Duration>,
        flags: CreateFlags,
        reply: oneshot::Sender<Result<CheckpointId>>,
    },
    Destroy {
        id: String,
        reply: oneshot::Sender<Result<()>>,
    },
    DestroyAll {
        reply: oneshot::Sender<Result<()>>,
    },
    Rollback {
        id: String,
        reply: oneshot::Sender<Result<RollbackReport>>,
    },
    /// Stop the loop with acknowledgment
    Shutdown(oneshot::Sender<()>),
}

/// Spawns the loop that drives a `CheckpointManager`
pub struct CheckpointService;

impl CheckpointService {
    /// Start the service with ids published under the configured prefix.
    ///
    /// `context` must stay valid for as long as the service runs; the loop
    /// keeps it alive through the `Arc`.
    pub fn spawn(config: &CheckpointConfig, context: Arc<dyn DeviceContext>) -> CheckpointHandle {
        Self::spawn_with_manager(config, context, CheckpointManager::from_config(config))
    }

    pub fn spawn_with_manager(
        config: &CheckpointConfig,
        context: Arc<dyn DeviceContext>,
        manager: CheckpointManager,
    ) -> CheckpointHandle {
        let (command_tx, command_rx) = mpsc::channel(config.command_queue_depth.max(1));
        let checkpoints_rx = manager.watch_checkpoints();
        let events_tx = manager.rollback_sender();

        let task = tokio::spawn(Self::run(manager, context, command_rx));

        CheckpointHandle {
            command_tx,
            checkpoints_rx,
            events_tx,
            task: Arc::new(std::sync::Mutex::new(Some(task))),
            shutdown_timeout: config.shutdown_timeout(),
        }
    }

    async fn run(
        mut manager: CheckpointManager,
        context: Arc<dyn DeviceContext>,
        mut command_rx: mpsc::Receiver<ServiceCommand>,
    ) {
        info!("Checkpoint service started");

        let ack = loop {
            let deadline = manager.next_deadline();

            tokio::select! {
                command = command_rx.recv() => {
                    let Some(command) = command else {
                        debug!("All checkpoint handles dropped");
                        break None;
                    };
                    if let Some(ack) = Self::handle(&mut manager, context.as_ref(), command) {
                        break Some(ack);
                    }
                }
                _ = wait_until(deadline) => {
                    let rolled_back = manager.on_rollback_timeout();
                    debug!(rolled_back, "Rollback timer fired");
                }
            }
        };

        drop(command_rx);
        drop(manager);
        if let Some(ack) = ack {
            let _ = ack.send(());
        }
        info!("Checkpoint service stopped");
    }

    /// Apply one command; returns the acknowledgment channel on shutdown
    fn handle(
        manager: &mut CheckpointManager,
        context: &dyn DeviceContext,
        command: ServiceCommand,
    ) -> Option<oneshot::Sender<()>> {
        // A caller that gave up on the reply is not an error
        match command {
            ServiceCommand::Create {
                device_ids,
                rollback_timeout,
                flags,
                reply,
            } => {
                let _ = reply.send(manager.create(context, &device_ids, rollback_timeout, flags));
            }
            ServiceCommand::Destroy { id, reply } => {
                let _ = reply.send(manager.destroy(&id));
            }
            ServiceCommand::DestroyAll { reply } => {
                let _ = reply.send(manager.destroy_all());
            }
            ServiceCommand::Rollback { id, reply } => {
                let _ = reply.send(manager.rollback(&id));
            }
            ServiceCommand::Shutdown(ack) => return Some(ack),
        }
        None
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Cloneable handle to a running checkpoint service
#[derive(Clone)]
pub struct CheckpointHandle {
    command_tx: mpsc::Sender<ServiceCommand>,
    checkpoints_rx: watch::Receiver<Vec<CheckpointId>>,
    events_tx: broadcast::Sender<RollbackEvent>,
    task: Arc<std::sync::Mutex<Option<JoinHandle<()>>>>,
    shutdown_timeout: Duration,
}

impl CheckpointHandle {
    /// Create a checkpoint.
    ///
    /// `timeout_secs == 0` means the checkpoint never expires; `flags` is the
    /// wire bitmask (see `CreateFlags`).
    pub async fn create(
        &self,
        device_ids: Vec<String>,
        timeout_secs: u32,
        flags: u32,
    ) -> Result<CheckpointId> {
        let flags = CreateFlags::from_bits(flags)?;
        let rollback_timeout =
            (timeout_secs > 0).then(|| Duration::from_secs(u64::from(timeout_secs)));

        self.request(|reply| ServiceCommand::Create {
            device_ids,
            rollback_timeout,
            flags,
            reply,
        })
        .await
    }

    /// Commit a checkpoint; `"/"` commits all of them
    pub async fn destroy(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.request(|reply| ServiceCommand::Destroy { id, reply })
            .await
    }

    pub async fn destroy_all(&self) -> Result<()> {
        self.request(|reply| ServiceCommand::DestroyAll { reply })
            .await
    }

    pub async fn rollback(&self, id: &str) -> Result<RollbackReport> {
        let id = id.to_string();
        self.request(|reply| ServiceCommand::Rollback { id, reply })
            .await
    }

    /// Current value of the `Checkpoints` property
    pub fn checkpoints(&self) -> Vec<CheckpointId> {
        self.checkpoints_rx.borrow().clone()
    }

    /// Receiver that changes whenever the checkpoint list is refreshed
    pub fn watch_checkpoints(&self) -> watch::Receiver<Vec<CheckpointId>> {
        self.checkpoints_rx.clone()
    }

    pub fn subscribe_rollbacks(&self) -> broadcast::Receiver<RollbackEvent> {
        self.events_tx.subscribe()
    }

    pub fn is_running(&self) -> bool {
        !self.command_tx.is_closed()
    }

    /// Stop the loop. Live checkpoints are released without rollback.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.command_tx.send(ServiceCommand::Shutdown(tx)).await.is_err() {
            debug!("Checkpoint service already stopped");
            return;
        }

        match tokio::time::timeout(self.shutdown_timeout, rx).await {
            Ok(Ok(())) => debug!("Checkpoint service acknowledged shutdown"),
            Ok(Err(_)) => warn!("Shutdown channel dropped"),
            Err(_) => {
                warn!("Checkpoint service shutdown timed out, aborting");
                if let Ok(mut task) = self.task.lock() {
                    if let Some(task) = task.take() {
                        task.abort();
                    }
                }
            }
        }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> ServiceCommand,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(build(reply))
            .await
            .map_err(|_| CheckpointError::ServiceUnavailable)?;
        rx.await.map_err(|_| CheckpointError::ServiceUnavailable)?
    }
}

impl std::fmt::Debug for CheckpointHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointHandle")
            .field("checkpoints", &*self.checkpoints_rx.borrow())
            .field("running", &self.is_running())
            .finish()
    }
}
