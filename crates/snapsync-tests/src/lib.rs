//! snapsync integration test support
//!
//! This crate wires the driver, sync engine and network layers together
//! over the in-memory [`FakeBtrfs`], so end-to-end scenarios run without a
//! btrfs filesystem or root privileges.

pub use snapsync_driver::testing::{FakeBtrfs, FakeOp};
pub use snapsync_driver::ManualClock;

use chrono::{DateTime, TimeZone, Utc};
use snapsync_driver::{BtrfsDriver, DriverOptions};
use snapsync_network::{PeerServer, ServerConfig, ServerHandle};
use snapsync_sync::SyncEngine;
use snapsync_types::{VolumeConfig, VolumeDriver};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

/// 2024-01-01T00:00:00Z, the instant every [`TestNode`] clock starts at
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .expect("valid date")
}

/// One emulated node: a fake filesystem, a manual clock and a driver
#[derive(Debug)]
pub struct TestNode {
    /// Emulated btrfs tool, shared with the driver
    pub fake: FakeBtrfs,
    /// Clock the driver names snapshots by
    pub clock: Arc<ManualClock>,
    /// Driver under test
    pub driver: Arc<BtrfsDriver>,
    /// Volume the node manages
    pub config: VolumeConfig,
}

impl TestNode {
    /// Node whose volume at `volume` is a subvolume, not yet prepared
    pub fn new(volume: &str, snapshot_dir: &str) -> Self {
        Self::with_options(volume, snapshot_dir, DriverOptions::default())
    }

    /// Like [`TestNode::new`] with custom driver options
    pub fn with_options(volume: &str, snapshot_dir: &str, options: DriverOptions) -> Self {
        let fake = FakeBtrfs::new().with_volume(volume);
        let clock = Arc::new(ManualClock::new(epoch()));
        let driver = BtrfsDriver::new(Arc::new(fake.clone()))
            .with_clock(clock.clone())
            .with_options(options);

        Self {
            fake,
            clock,
            driver: Arc::new(driver),
            config: VolumeConfig::new(volume, snapshot_dir).expect("valid volume config"),
        }
    }

    /// Prepare the volume, panicking on failure
    pub async fn prepared(self) -> Self {
        self.driver
            .prepare(&self.config)
            .await
            .expect("volume should prepare");
        self
    }

    /// Place existing snapshots in the snapshot directory
    pub fn with_snapshots(self, names: &[&str]) -> Self {
        let root = self.config.snapshot_root();
        if !self.fake.has_subvolume(&root) {
            self.fake.add_subvolume(&root);
        }
        for name in names {
            self.fake.add_subvolume(root.join(name));
        }
        self
    }

    /// Volume path of this node
    pub fn volume_path(&self) -> &Path {
        self.config.volume_path()
    }

    /// Sync engine over this node's driver
    pub fn engine(&self) -> Arc<SyncEngine> {
        Arc::new(SyncEngine::new(self.driver.clone(), self.config.clone()))
    }

    /// Serve this node on an ephemeral loopback port
    pub async fn serve(&self) -> (SocketAddr, ServerHandle) {
        let mut server = PeerServer::new(
            ServerConfig {
                bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
                ..ServerConfig::default()
            },
            self.engine(),
            self.driver.namer().clone(),
        );
        let addr = server.bind().await.expect("loopback bind");
        let handle = server.handle();
        tokio::spawn(async move { server.start().await });
        (addr, handle)
    }
}
