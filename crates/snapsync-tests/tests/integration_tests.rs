//! Integration tests for snapsync
//!
//! These tests drive complete scenarios through the driver, the sync engine
//! and the TCP protocol, with the filesystem emulated by `FakeBtrfs`.

use chrono::Duration as ChronoDuration;
use snapsync_config::ConfigLoader;
use snapsync_driver::DriverOptions;
use snapsync_network::PeerClient;
use snapsync_tests::{epoch, FakeBtrfs, FakeOp, ManualClock, TestNode};
use snapsync_types::{Error, ErrorKind, VolumeConfig, VolumeDriver};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const S1: &str = "btrfs_backup_20231230000000";
const S2: &str = "btrfs_backup_20231231000000";
const S3: &str = "btrfs_backup_20240101000000";

#[tokio::test]
async fn test_first_snapshot_end_to_end() {
    let node = TestNode::new("/data", ".snapshots").prepared().await;
    assert!(!node.fake.has_subvolume("/data/.snapshots"));

    let outcome = node
        .driver
        .snapshot(&node.config, node.volume_path())
        .await
        .unwrap();

    assert_eq!(
        outcome.path,
        PathBuf::from("/data/.snapshots/btrfs_backup_20240101000000")
    );
    assert_eq!(outcome.name, "btrfs_backup_20240101000000");
    assert_eq!(outcome.taken_at, epoch());
    assert!(node.fake.has_subvolume("/data/.snapshots"));
    assert!(node.fake.is_read_only(&outcome.path));

    let inventory = node.driver.list_snapshots(&node.config).await.unwrap();
    assert_eq!(inventory.names(), vec!["btrfs_backup_20240101000000"]);
    assert!(inventory.entries()[0].managed);
}

#[tokio::test]
async fn test_same_second_snapshots_get_distinct_names() {
    let node = TestNode::new("/data", ".snapshots").prepared().await;

    let first = node
        .driver
        .snapshot(&node.config, node.volume_path())
        .await
        .unwrap();
    let second = node
        .driver
        .snapshot(&node.config, node.volume_path())
        .await
        .unwrap();

    assert_ne!(first.name, second.name);
    assert_eq!(second.name, "btrfs_backup_20240101000001");

    let inventory = node.driver.list_snapshots(&node.config).await.unwrap();
    assert_eq!(inventory.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_snapshots_get_distinct_names() {
    let node = TestNode::new("/data", ".snapshots").prepared().await;
    node.fake.delay(FakeOp::Snapshot, Duration::from_millis(20));

    let tasks: Vec<_> = (0..5)
        .map(|_| {
            let driver = node.driver.clone();
            let config = node.config.clone();
            tokio::spawn(async move { driver.snapshot(&config, Path::new("/data")).await })
        })
        .collect();

    let mut names = Vec::new();
    for task in tasks {
        names.push(task.await.unwrap().unwrap().name);
    }
    names.sort();
    names.dedup();
    assert_eq!(names.len(), 5);

    let inventory = node.driver.list_snapshots(&node.config).await.unwrap();
    assert_eq!(inventory.len(), 5);
    assert_eq!(node.fake.count(FakeOp::Snapshot), 5);
}

#[tokio::test]
async fn test_snapshots_follow_the_clock() {
    let node = TestNode::new("/", ".snapshots").prepared().await;

    node.driver
        .snapshot(&node.config, Path::new("/"))
        .await
        .unwrap();
    node.clock.advance(ChronoDuration::days(1));
    let later = node
        .driver
        .snapshot(&node.config, Path::new("/"))
        .await
        .unwrap();

    assert_eq!(
        later.path,
        PathBuf::from("/.snapshots/btrfs_backup_20240102000000")
    );
}

#[tokio::test]
async fn test_prepare_rejects_non_volume() {
    let node = TestNode::new("/data", ".snapshots");
    let config = VolumeConfig::new("/srv", ".snapshots").unwrap();

    let error = node.driver.prepare(&config).await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::NotAVolume);

    let error = node.driver.list_snapshots(&config).await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::NotAVolume);
    assert_eq!(node.fake.count(FakeOp::List), 0);
}

#[tokio::test]
async fn test_loopback_reconciliation() {
    let client = TestNode::new("/data", ".snapshots")
        .with_snapshots(&[S1, S2])
        .prepared()
        .await;
    let server = TestNode::new("/backup", ".snapshots")
        .with_snapshots(&[S2, S3])
        .prepared()
        .await;
    let (addr, handle) = server.serve().await;

    let peer = PeerClient::new(addr.to_string());
    let reconciliation = peer
        .exchange_inventory(&[S1.to_string(), S2.to_string()])
        .await
        .unwrap();
    assert_eq!(reconciliation.caller_missing, vec![S3]);
    assert_eq!(reconciliation.peer_missing, vec![S1]);

    let plan = client.engine().plan(&peer).await.unwrap();
    assert_eq!(plan.to_send, vec![S1]);
    assert_eq!(plan.to_fetch, vec![S3]);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_loopback_in_sync() {
    let client = TestNode::new("/data", ".snapshots")
        .with_snapshots(&[S1, S2])
        .prepared()
        .await;
    let server = TestNode::new("/data", ".snapshots")
        .with_snapshots(&[S2, S1])
        .prepared()
        .await;
    let (addr, handle) = server.serve().await;

    let plan = client
        .engine()
        .plan(&PeerClient::new(addr.to_string()))
        .await
        .unwrap();
    assert!(plan.is_empty());
    assert!(plan.reconciliation.is_in_sync());

    handle.shutdown().await;
}

#[tokio::test]
async fn test_peer_list_failure_is_not_an_empty_result() {
    let server = TestNode::new("/backup", ".snapshots")
        .with_snapshots(&[S1])
        .prepared()
        .await;
    server
        .fake
        .fail(FakeOp::List, "ERROR: can't access '/backup/.snapshots'");
    let (addr, handle) = server.serve().await;

    let peer = PeerClient::new(addr.to_string());
    let error = peer.exchange_inventory(&[S1.to_string()]).await.unwrap_err();

    assert!(matches!(error, Error::PeerListFailed { ref peer, .. } if *peer == addr.to_string()));
    assert_eq!(error.kind(), ErrorKind::PeerListFailed);

    // The server keeps answering once the listing works again
    server.fake.recover(FakeOp::List);
    let reconciliation = peer.exchange_inventory(&[S1.to_string()]).await.unwrap();
    assert!(reconciliation.is_in_sync());

    handle.shutdown().await;
}

#[tokio::test]
async fn test_peer_down_is_unreachable() {
    let client = TestNode::new("/data", ".snapshots")
        .with_snapshots(&[S1])
        .prepared()
        .await;
    let server = TestNode::new("/backup", ".snapshots").prepared().await;
    let (addr, handle) = server.serve().await;
    handle.shutdown().await;
    // Let the accept loop observe the shutdown and drop the listener
    tokio::time::sleep(Duration::from_millis(50)).await;

    let error = client
        .engine()
        .plan(&PeerClient::new(addr.to_string()))
        .await
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::TransportUnreachable);
}

#[tokio::test]
async fn test_receive_announcement() {
    let server = TestNode::new("/backup", ".snapshots")
        .with_snapshots(&[S2])
        .prepared()
        .await;
    let (addr, handle) = server.serve().await;
    let peer = PeerClient::new(addr.to_string());

    let error = peer.announce_snapshot("../../etc", 9000).await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::InvalidSnapshotName);

    let existing = peer.announce_snapshot(S2, 9000).await.unwrap();
    assert!(!existing.ready);

    let fresh = peer.announce_snapshot(S1, 9000).await.unwrap();
    assert!(fresh.ready);
    assert_eq!(
        fresh.destination.as_deref(),
        Some("/backup/.snapshots/btrfs_backup_20231230000000")
    );

    // Announcing does not create anything
    assert!(!server
        .fake
        .has_subvolume("/backup/.snapshots/btrfs_backup_20231230000000"));

    handle.shutdown().await;
}

#[tokio::test]
async fn test_foreign_subvolumes_are_not_sent() {
    let client = TestNode::new("/data", ".snapshots")
        .with_snapshots(&[S1, "before-upgrade"])
        .prepared()
        .await;
    let server = TestNode::new("/backup", ".snapshots").prepared().await;
    let (addr, handle) = server.serve().await;

    let plan = client
        .engine()
        .plan(&PeerClient::new(addr.to_string()))
        .await
        .unwrap();

    assert_eq!(plan.reconciliation.peer_missing, vec![S1, "before-upgrade"]);
    assert_eq!(plan.to_send, vec![S1]);
    assert_eq!(plan.skipped_foreign(), vec!["before-upgrade"]);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_listing_waits_for_running_snapshot() {
    let node = TestNode::new("/data", ".snapshots").prepared().await;
    node.fake.delay(FakeOp::Snapshot, Duration::from_millis(200));

    let driver = node.driver.clone();
    let config = node.config.clone();
    let snapshot = tokio::spawn(async move { driver.snapshot(&config, Path::new("/data")).await });

    // Give the snapshot time to take the write lock
    tokio::time::sleep(Duration::from_millis(50)).await;
    let inventory = node.driver.list_snapshots(&node.config).await.unwrap();

    let outcome = snapshot.await.unwrap().unwrap();
    assert_eq!(inventory.names(), vec![outcome.name]);
}

#[tokio::test(start_paused = true)]
async fn test_hung_snapshot_reports_timeout() {
    let node = TestNode::with_options(
        "/data",
        ".snapshots",
        DriverOptions {
            command_timeout: Duration::from_secs(30),
            ..DriverOptions::default()
        },
    )
    .prepared()
    .await;
    node.fake.delay(FakeOp::Snapshot, Duration::from_secs(3600));

    let error = node
        .driver
        .snapshot(&node.config, node.volume_path())
        .await
        .unwrap_err();

    assert_eq!(error.kind(), ErrorKind::SnapshotFailed);
    assert!(error.is_timeout());
    assert!(error.is_recoverable());
}

#[tokio::test]
async fn test_config_file_drives_the_node() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let config_path = temp_dir.path().join("snapsync.yaml");
    std::fs::write(
        &config_path,
        "volume:\n  path: /data\n  snapshot_dir: snaps\n  auto_create_container: false\ntimeouts:\n  command_timeout: 15\n",
    )
    .unwrap();

    let config = ConfigLoader::load_from_file(&config_path).unwrap();
    let volume = config.volume_config().unwrap();
    assert_eq!(volume.snapshot_root(), PathBuf::from("/data/snaps"));

    let fake = FakeBtrfs::new().with_volume("/data");
    let driver = snapsync_driver::BtrfsDriver::new(Arc::new(fake.clone()))
        .with_clock(Arc::new(ManualClock::new(epoch())))
        .with_options(DriverOptions {
            command_timeout: config.timeout_config().command_timeout,
            auto_create_container: config.volume.auto_create_container,
            ..DriverOptions::default()
        });
    driver.prepare(&volume).await.unwrap();

    let error = driver
        .snapshot(&volume, Path::new("/data"))
        .await
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::DestMissing);
    assert_eq!(fake.count(FakeOp::Create), 0);
}
