// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Service loop integration tests

use anyhow::Result;
use netcfg_checkpoint::checkpoint::{CheckpointHandle, CheckpointService, CreateFlags, RollbackTrigger};
use netcfg_checkpoint::config::CheckpointConfig;
use netcfg_checkpoint::network::InMemoryNetwork;
use netcfg_checkpoint::CheckpointError;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;

fn start(devices: &[&str]) -> (CheckpointHandle, Arc<InMemoryNetwork>) {
    let network = Arc::new(InMemoryNetwork::with_devices(devices));
    let config = CheckpointConfig::default().with_path_prefix("/test/Checkpoint");
    let handle = CheckpointService::spawn(&config, network.clone());
    (handle, network)
}

fn names(devices: &[&str]) -> Vec<String> {
    devices.iter().map(|d| d.to_string()).collect()
}

#[tokio::test(start_paused = true)]
async fn test_end_to_end_expiry() -> Result<()> {
    let (handle, network) = start(&["eth0"]);
    let mut events = handle.subscribe_rollbacks();

    let id1 = handle.create(names(&["eth0"]), 5, 0).await?;
    assert_eq!(handle.checkpoints(), vec![id1.clone()]);
    network.set_mtu("eth0", 1280)?;

    // Nothing happens before the deadline
    time::sleep(Duration::from_millis(4900)).await;
    assert_eq!(handle.checkpoints(), vec![id1.clone()]);

    time::sleep(Duration::from_millis(200)).await;
    let event = events.try_recv()?;
    assert_eq!(event.checkpoint, id1);
    assert_eq!(event.trigger, RollbackTrigger::Expired);
    assert!(event.report.is_success());

    assert!(handle.checkpoints().is_empty());
    assert_eq!(network.device_config("eth0").unwrap().mtu, 1500);

    let id2 = handle.create(names(&["eth0"]), 0, 0).await?;
    assert_eq!(id2.as_str(), "/test/Checkpoint/2");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_simultaneous_expiries_rolled_back_together() -> Result<()> {
    let (handle, _network) = start(&["a", "b", "c"]);
    let mut watch = handle.watch_checkpoints();

    handle.create(names(&["a"]), 3, 0).await?;
    handle.create(names(&["b"]), 3, 0).await?;
    let keep = handle.create(names(&["c"]), 0, 0).await?;
    watch.borrow_and_update();

    watch.changed().await?;
    assert_eq!(*watch.borrow(), vec![keep]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_explicit_rollback_broadcasts_event() -> Result<()> {
    let (handle, network) = start(&["eth0"]);
    let mut events = handle.subscribe_rollbacks();

    let id = handle.create(names(&["eth0"]), 30, 0).await?;
    network.set_up("eth0", false)?;

    let report = handle.rollback(id.as_str()).await?;
    assert!(report.is_success());
    assert!(network.device_config("eth0").unwrap().up);

    let event = events.recv().await?;
    assert_eq!(event.trigger, RollbackTrigger::Explicit);
    assert_eq!(event.report, report);

    // The expiry was cancelled with the checkpoint
    time::sleep(Duration::from_secs(60)).await;
    assert!(events.try_recv().is_err());
    Ok(())
}

#[tokio::test]
async fn test_destroy_all_is_idempotent() -> Result<()> {
    let (handle, _network) = start(&["eth0"]);
    let mut watch = handle.watch_checkpoints();

    handle.destroy_all().await?;
    assert!(watch.has_changed()?);
    watch.borrow_and_update();
    assert!(handle.checkpoints().is_empty());

    handle.destroy("/").await?;
    assert!(watch.has_changed()?);
    assert!(handle.checkpoints().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_error_mapping() -> Result<()> {
    let (handle, network) = start(&["eth0"]);

    assert!(matches!(
        handle.create(names(&["wlan0"]), 0, 0).await,
        Err(CheckpointError::UnknownDevice(ref id)) if id == "wlan0"
    ));
    assert!(matches!(
        handle
            .create(vec![], 0, CreateFlags::DISCONNECT_NEW_DEVICES)
            .await,
        Err(CheckpointError::InvalidArguments(_))
    ));
    assert!(matches!(
        handle.destroy("/test/Checkpoint/42").await,
        Err(CheckpointError::NotFound(_))
    ));

    network.fail_next_checkpoint("no space left");
    let err = handle.create(names(&["eth0"]), 0, 0).await.unwrap_err();
    assert_eq!(err.error_code(), "CONSTRUCTION_FAILED");
    assert!(!err.is_caller_error());

    assert!(handle.checkpoints().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_clones_share_one_service() -> Result<()> {
    let (handle, _network) = start(&["eth0", "eth1"]);
    let other = handle.clone();

    let id = handle.create(names(&["eth0"]), 0, 0).await?;
    assert_eq!(other.checkpoints(), vec![id.clone()]);

    other.destroy(id.as_str()).await?;
    assert!(handle.checkpoints().is_empty());

    other.shutdown().await;
    assert!(matches!(
        handle.create(names(&["eth1"]), 0, 0).await,
        Err(CheckpointError::ServiceUnavailable)
    ));
    Ok(())
}
