// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Manager scenarios against the in-memory network
//!
//! Drives `CheckpointManager` directly with a paused tokio clock, firing the
//! rollback timer by hand once its deadline has passed.

use netcfg_checkpoint::checkpoint::{
    CheckpointManager, CreateFlags, DeviceHandle, PathPublisher, RollbackResult,
};
use netcfg_checkpoint::network::InMemoryNetwork;
use netcfg_checkpoint::CheckpointError;
use std::time::Duration;
use tokio::time::{self, Instant};

fn manager() -> CheckpointManager {
    CheckpointManager::new(Box::new(PathPublisher::new("/org/netcfg/Checkpoint")))
}

fn ids(devices: &[&str]) -> Vec<String> {
    devices.iter().map(|d| d.to_string()).collect()
}

fn device(iface: &str) -> DeviceHandle {
    DeviceHandle::new(format!("/org/netcfg/Devices/{}", iface), iface)
}

/// Fire the timer the way the service loop does: once its deadline is reached
async fn run_timer_until(manager: &mut CheckpointManager, until: Instant) -> usize {
    let mut rolled_back = 0;
    while let Some(deadline) = manager.next_deadline() {
        if deadline > until {
            break;
        }
        time::sleep_until(deadline).await;
        rolled_back += manager.on_rollback_timeout();
    }
    time::sleep_until(until).await;
    rolled_back
}

// ==================== End-to-End ====================

#[tokio::test(start_paused = true)]
async fn test_expiry_rolls_back_and_releases_device() {
    let network = InMemoryNetwork::with_devices(&["eth0", "eth1"]);
    let mut manager = manager();
    let t0 = Instant::now();

    let id1 = manager
        .create(&network, &ids(&["eth0"]), Some(Duration::from_secs(5)), CreateFlags::default())
        .unwrap();
    assert_eq!(manager.checkpoints(), vec![id1.clone()]);

    network.set_mtu("eth0", 9000).unwrap();

    let rolled_back = run_timer_until(&mut manager, t0 + Duration::from_millis(5100)).await;
    assert_eq!(rolled_back, 1);
    assert!(manager.checkpoints().is_empty());
    assert_eq!(network.device_config("eth0").unwrap().mtu, 1500);

    let id2 = manager
        .create(&network, &ids(&["eth0"]), None, CreateFlags::default())
        .unwrap();
    assert_ne!(id1, id2);
    assert_eq!(manager.checkpoints(), vec![id2]);
}

// ==================== Mutual Exclusion ====================

#[tokio::test]
async fn test_overlapping_create_leaves_state_unchanged() {
    let network = InMemoryNetwork::with_devices(&["a", "b", "c"]);
    let mut manager = manager();

    let first = manager
        .create(&network, &ids(&["a", "b"]), Some(Duration::from_secs(60)), CreateFlags::default())
        .unwrap();
    let before = manager.checkpoints();
    let deadline = manager.next_deadline();

    let err = manager
        .create(&network, &ids(&["b", "c"]), None, CreateFlags::default())
        .unwrap_err();
    assert!(matches!(err, CheckpointError::InvalidArguments(_)));
    assert!(err.to_string().contains("'b'"));

    assert_eq!(manager.checkpoints(), before);
    assert_eq!(manager.next_deadline(), deadline);
    assert_eq!(manager.checkpoint_for_device(&device("b")), Some(first));
    assert_eq!(manager.checkpoint_for_device(&device("c")), None);
}

#[tokio::test]
async fn test_empty_list_claims_every_device() {
    let network = InMemoryNetwork::with_devices(&["eth0", "eth1"]);
    let mut manager = manager();

    let id = manager
        .create(&network, &[], None, CreateFlags::default())
        .unwrap();
    assert_eq!(manager.devices_of(id.as_str()).unwrap().len(), 2);

    let err = manager
        .create(&network, &ids(&["eth1"]), None, CreateFlags::default())
        .unwrap_err();
    assert_eq!(err.error_code(), "INVALID_ARGUMENTS");
}

#[tokio::test]
async fn test_unrepresentable_timeout_is_rejected() {
    let network = InMemoryNetwork::with_devices(&["eth0"]);
    let mut manager = manager();

    let err = manager
        .create(&network, &ids(&["eth0"]), Some(Duration::MAX), CreateFlags::default())
        .unwrap_err();
    assert!(matches!(err, CheckpointError::InvalidArguments(_)));
    assert!(manager.is_empty());

    // The device is still free
    assert!(manager
        .create(&network, &ids(&["eth0"]), Some(Duration::from_secs(30)), CreateFlags::default())
        .is_ok());
}

// ==================== Destroy All ====================

#[tokio::test]
async fn test_destroy_all_flag_replaces_everything() {
    let network = InMemoryNetwork::with_devices(&["a", "b", "c"]);
    let mut manager = manager();

    let x = manager
        .create(&network, &ids(&["a", "b"]), None, CreateFlags::default())
        .unwrap();
    let y = manager
        .create(&network, &ids(&["c"]), Some(Duration::from_secs(10)), CreateFlags::default())
        .unwrap();

    let z = manager
        .create(&network, &ids(&["a"]), None, CreateFlags::default().with_destroy_all())
        .unwrap();

    assert_eq!(manager.checkpoints(), vec![z.clone()]);
    assert!(!manager.contains(x.as_str()));
    assert!(!manager.contains(y.as_str()));
    assert_eq!(manager.checkpoint_for_device(&device("a")), Some(z));
    assert_eq!(manager.checkpoint_for_device(&device("c")), None);
    // y's expiry went with it
    assert_eq!(manager.next_deadline(), None);
}

#[tokio::test]
async fn test_destroy_all_flag_keeps_existing_when_construction_fails() {
    let network = InMemoryNetwork::with_devices(&["a", "b"]);
    let mut manager = manager();

    let x = manager
        .create(&network, &ids(&["a"]), None, CreateFlags::default())
        .unwrap();
    network.fail_next_checkpoint("backend offline");

    let err = manager
        .create(&network, &ids(&["b"]), None, CreateFlags::default().with_destroy_all())
        .unwrap_err();
    assert!(matches!(err, CheckpointError::ConstructionFailed { .. }));
    assert!(err.to_string().contains("backend offline"));
    assert_eq!(manager.checkpoints(), vec![x]);
}

#[tokio::test]
async fn test_root_destroy_matches_destroy_all() {
    let network = InMemoryNetwork::with_devices(&["a", "b"]);
    let mut first = manager();
    let mut second = manager();

    for manager in [&mut first, &mut second] {
        manager
            .create(&network, &ids(&["a"]), Some(Duration::from_secs(5)), CreateFlags::default())
            .unwrap();
        manager
            .create(&network, &ids(&["b"]), None, CreateFlags::default())
            .unwrap();
    }

    let mut first_rx = first.watch_checkpoints();
    let mut second_rx = second.watch_checkpoints();
    first_rx.borrow_and_update();
    second_rx.borrow_and_update();

    first.destroy("/").unwrap();
    second.destroy_all().unwrap();

    assert_eq!(first.checkpoints(), second.checkpoints());
    assert_eq!(first.next_deadline(), second.next_deadline());
    assert!(first_rx.has_changed().unwrap());
    assert!(second_rx.has_changed().unwrap());
}

// ==================== Rollback ====================

#[tokio::test]
async fn test_explicit_rollback_report_and_terminality() {
    let network = InMemoryNetwork::with_devices(&["eth0", "eth1"]);
    let mut manager = manager();

    let id = manager
        .create(&network, &ids(&["eth0", "eth1"]), None, CreateFlags::default())
        .unwrap();
    network.remove_device("eth1").unwrap();

    let report = manager.rollback(id.as_str()).unwrap();
    assert_eq!(report.get("/org/netcfg/Devices/eth0"), Some(RollbackResult::Ok));
    assert_eq!(
        report.get("/org/netcfg/Devices/eth1"),
        Some(RollbackResult::NoDevice)
    );

    assert!(matches!(
        manager.rollback(id.as_str()),
        Err(CheckpointError::NotFound(_))
    ));
    assert!(matches!(
        manager.destroy(id.as_str()),
        Err(CheckpointError::NotFound(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_rearms_for_next_expiry() {
    let network = InMemoryNetwork::with_devices(&["a", "b"]);
    let mut manager = manager();
    let t0 = Instant::now();

    manager
        .create(&network, &ids(&["a"]), Some(Duration::from_secs(10)), CreateFlags::default())
        .unwrap();
    let later = manager
        .create(&network, &ids(&["b"]), Some(Duration::from_secs(30)), CreateFlags::default())
        .unwrap();
    assert_eq!(manager.next_deadline(), Some(t0 + Duration::from_secs(10)));

    run_timer_until(&mut manager, t0 + Duration::from_secs(10)).await;

    assert_eq!(manager.checkpoints(), vec![later]);
    assert_eq!(manager.next_deadline(), Some(t0 + Duration::from_secs(30)));
}

#[tokio::test(start_paused = true)]
async fn test_destroy_before_expiry_cancels_rollback() {
    let network = InMemoryNetwork::with_devices(&["eth0"]);
    let mut manager = manager();
    let t0 = Instant::now();

    let id = manager
        .create(&network, &ids(&["eth0"]), Some(Duration::from_secs(5)), CreateFlags::default())
        .unwrap();
    network.set_mtu("eth0", 9000).unwrap();
    manager.destroy(id.as_str()).unwrap();
    assert_eq!(manager.next_deadline(), None);

    let rolled_back = run_timer_until(&mut manager, t0 + Duration::from_secs(10)).await;
    assert_eq!(rolled_back, 0);
    assert_eq!(network.device_config("eth0").unwrap().mtu, 9000);
}
