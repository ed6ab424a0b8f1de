//! Peer health probing, leader resolution and snapshot catch-up

use crate::client::{fetch_info, fetch_snapshot, PeerClient};
use crate::{Cluster, ClusterError, Result};
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// What one health cycle did
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CycleReport {
    pub reachable: usize,
    pub unreachable: usize,
    pub elected: Option<String>,
    /// Global version restored from the leader, if a sync happened
    pub synced_version: Option<i64>,
}

/// Periodic loop keeping one node's cluster view and registry current
pub struct ServerHealth {
    cluster: Arc<Cluster>,
    client: Arc<dyn PeerClient>,
}

impl ServerHealth {
    pub fn new(cluster: Arc<Cluster>, client: Arc<dyn PeerClient>) -> Self {
        Self { cluster, client }
    }

    /// One full cycle: probe every peer, resolve leadership, sync if behind.
    /// Peer failures are absorbed here and never returned.
    pub async fn check_once(&self) -> CycleReport {
        let mut report = CycleReport::default();

        let (reachable, unreachable) = self.update_servers().await;
        report.reachable = reachable;
        report.unreachable = unreachable;

        report.elected = self.resolve_leader().await;

        match self.sync_if_behind().await {
            Ok(version) => report.synced_version = version,
            Err(e) => error!("Snapshot sync from leader failed: {}", e),
        }

        report
    }

    /// Run cycles on a fixed period until `shutdown` flips to `true`.
    ///
    /// Cycles run back to back in this one task, so a slow cycle delays the
    /// next tick instead of overlapping it.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let period = self.cluster.config().probe_interval;
        debug!("Server health loop started with interval {:?}", period);

        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => break,
            }

            let report = self.check_once().await;
            debug!(
                "Health cycle: {} up, {} down, leader={}",
                report.reachable,
                report.unreachable,
                self.cluster.is_leader().await
            );
        }

        debug!("Server health loop stopped");
    }

    /// Probe every peer concurrently and apply each result to its own record
    async fn update_servers(&self) -> (usize, usize) {
        let peers = self.cluster.peers().await;

        let probes = peers.iter().map(|peer| async move {
            let result = fetch_info(self.client.as_ref(), &peer.url).await;
            (peer.url.as_str(), result)
        });

        let mut reachable = 0;
        let mut unreachable = 0;
        for (url, result) in join_all(probes).await {
            match result {
                Ok(info) => {
                    debug!("Health check succeeded for {}", url);
                    self.cluster.mark_up(url, &info).await;
                    reachable += 1;
                }
                Err(e) => {
                    warn!("Health check failed for {}: {}", url, e);
                    self.cluster.mark_down(url).await;
                    unreachable += 1;
                }
            }
        }

        (reachable, unreachable)
    }

    /// Elect again when zero or several reachable members claim leadership
    async fn resolve_leader(&self) -> Option<String> {
        match self.cluster.leader_count().await {
            1 => {
                debug!("Exactly one leader, no election needed");
                None
            }
            0 => {
                warn!("No leader among members, electing");
                Some(self.cluster.elect().await)
            }
            n => {
                warn!("{} members claim leadership, electing", n);
                Some(self.cluster.elect().await)
            }
        }
    }

    /// Pull and restore the leader's snapshot when this follower lags it
    async fn sync_if_behind(&self) -> Result<Option<i64>> {
        if self.cluster.is_leader().await {
            return Ok(None);
        }

        let myself = self.cluster.myself().await;
        let leader = self.cluster.leader().await.ok_or(ClusterError::NoLeader)?;
        if myself.version >= leader.version {
            return Ok(None);
        }

        info!(
            "Syncing snapshot from leader {} (local version {}, leader version {})",
            leader.url, myself.version, leader.version
        );
        let snapshot = fetch_snapshot(self.client.as_ref(), &leader.url).await?;
        let version = self.cluster.store().restore(snapshot).await;
        info!("Synced snapshot from {}, now at version {}", leader.url, version);

        Ok(Some(version))
    }
}
