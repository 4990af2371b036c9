//! Sync planning between two nodes

use crate::reconcile::reconcile;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use snapsync_types::{Inventory, Reconciliation, Result, VolumeConfig, VolumeDriver};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Something that can compare our inventory with a remote one
///
/// The returned reconciliation is seen from the caller: `caller_missing`
/// is what the peer has and we lack.
#[async_trait]
pub trait PeerExchange: Send + Sync {
    /// Address or other label of the peer, for logging
    fn peer_label(&self) -> String;

    /// Send our inventory and get the comparison back
    async fn exchange_inventory(&self, inventory: &[String]) -> Result<Reconciliation>;
}

/// What a client should do after one exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPlan {
    /// Plan ID for tracking
    pub plan_id: uuid::Uuid,
    /// Peer the plan was computed against
    pub peer: String,
    /// Local inventory at the time of the exchange
    pub local: Inventory,
    /// Raw comparison result
    pub reconciliation: Reconciliation,
    /// Managed snapshots the peer lacks
    pub to_send: Vec<String>,
    /// Snapshots only the peer holds
    pub to_fetch: Vec<String>,
    /// Time taken to compute the plan
    pub duration: Duration,
}

impl SyncPlan {
    /// Nothing to move in either direction
    pub fn is_empty(&self) -> bool {
        self.to_send.is_empty() && self.to_fetch.is_empty()
    }

    /// Peer-missing names that were left out because they are not ours
    pub fn skipped_foreign(&self) -> Vec<&str> {
        self.reconciliation
            .peer_missing
            .iter()
            .filter(|name| !self.to_send.contains(*name))
            .map(String::as_str)
            .collect()
    }
}

impl fmt::Display for SyncPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to send, {} held only by {}",
            self.to_send.len(),
            self.to_fetch.len(),
            self.peer
        )
    }
}

/// Reconciles one local volume against peers
pub struct SyncEngine {
    driver: Arc<dyn VolumeDriver>,
    config: VolumeConfig,
}

impl fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncEngine")
            .field("driver", &self.driver.driver_name())
            .field("config", &self.config)
            .finish()
    }
}

impl SyncEngine {
    /// Create an engine for `config`, which must already be prepared
    pub fn new(driver: Arc<dyn VolumeDriver>, config: VolumeConfig) -> Self {
        Self { driver, config }
    }

    /// Volume this engine works on
    pub fn config(&self) -> &VolumeConfig {
        &self.config
    }

    /// Driver this engine lists through
    pub fn driver(&self) -> &Arc<dyn VolumeDriver> {
        &self.driver
    }

    /// Client side: list locally, exchange, and decide what to move
    ///
    /// Only management-owned snapshots are scheduled for sending. Snapshots
    /// the peer holds and we lack are reported in `to_fetch` but not acted
    /// upon here.
    pub async fn plan<P: PeerExchange + ?Sized>(&self, peer: &P) -> Result<SyncPlan> {
        let start_time = Instant::now();
        let label = peer.peer_label();

        let local = self.driver.list_snapshots(&self.config).await?;
        info!(
            "Exchanging inventory of {} snapshots with {}",
            local.len(),
            label
        );

        let reconciliation = peer.exchange_inventory(&local.names()).await?;
        info!("Reconciled with {}: {}", label, reconciliation);

        let to_send: Vec<String> = reconciliation
            .peer_missing
            .iter()
            .filter(|name| local.get(name.as_str()).is_some_and(|entry| entry.managed))
            .cloned()
            .collect();
        let to_fetch = reconciliation.caller_missing.clone();

        let plan = SyncPlan {
            plan_id: uuid::Uuid::new_v4(),
            peer: label,
            local,
            reconciliation,
            to_send,
            to_fetch,
            duration: start_time.elapsed(),
        };

        for name in plan.skipped_foreign() {
            debug!("Not sending foreign subvolume: {}", name);
        }
        if !plan.to_fetch.is_empty() {
            warn!(
                "{} holds {} snapshots missing locally",
                plan.peer,
                plan.to_fetch.len()
            );
        }

        Ok(plan)
    }

    /// Responder side: compare a caller's inventory with a fresh listing
    ///
    /// The result is seen from the caller. A listing failure is returned as
    /// an error, never as an empty comparison.
    pub async fn respond(&self, caller_inventory: &[String]) -> Result<Reconciliation> {
        let local = self.driver.list_snapshots(&self.config).await?;
        let result = reconcile(caller_inventory, &local.names());
        debug!(
            "Caller sent {} names, we hold {}: {}",
            caller_inventory.len(),
            local.len(),
            result
        );
        Ok(result)
    }
}
