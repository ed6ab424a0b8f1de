//! Liveness expiry for registered instances

use crate::registry::now_millis;
use crate::{InstanceMeta, RegistryStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time;
use tracing::{debug, info};

/// Instance health check configuration
#[derive(Clone, Debug)]
pub struct HealthCheckConfig {
    /// Delay before the first sweep
    pub initial_delay: Duration,
    /// Delay between the end of one sweep and the start of the next
    pub check_interval: Duration,
    /// Maximum time since the last renew before an instance is evicted
    pub ttl: Duration,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(10),
            check_interval: Duration::from_secs(30),
            ttl: Duration::from_secs(20),
        }
    }
}

/// Answers whether this node may currently change the registry
#[async_trait::async_trait]
pub trait Leadership: Send + Sync {
    async fn is_leader(&self) -> bool;
}

/// Evicts instances whose renew timestamp is older than the TTL
pub struct InstanceHealthChecker {
    config: HealthCheckConfig,
    store: Arc<RegistryStore>,
    leadership: Option<Arc<dyn Leadership>>,
}

impl InstanceHealthChecker {
    pub fn new(config: HealthCheckConfig, store: Arc<RegistryStore>) -> Self {
        Self {
            config,
            store,
            leadership: None,
        }
    }

    /// Only sweep while `leadership` reports this node as leader.
    ///
    /// Followers never see renew calls, so their timestamps only move on
    /// snapshot restore and would otherwise expire live instances.
    pub fn with_leadership(mut self, leadership: Arc<dyn Leadership>) -> Self {
        self.leadership = Some(leadership);
        self
    }

    /// Run one sweep against `now` (epoch millis), returning the evicted
    /// `(service, instance)` pairs
    pub async fn sweep(&self, now: i64) -> Vec<(String, InstanceMeta)> {
        let ttl = self.config.ttl.as_millis() as i64;
        self.store.evict_expired(now, ttl).await
    }

    /// Run sweeps forever on a fixed delay until `shutdown` flips to `true`
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        debug!(
            "Instance health checker started, ttl {:?}, interval {:?}",
            self.config.ttl, self.config.check_interval
        );

        let mut delay = self.config.initial_delay;
        loop {
            tokio::select! {
                _ = time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
            delay = self.config.check_interval;

            if let Some(leadership) = &self.leadership {
                if !leadership.is_leader().await {
                    debug!("Not leader, skipping instance health check");
                    continue;
                }
            }

            let evicted = self.sweep(now_millis()).await;
            if !evicted.is_empty() {
                info!("Instance health check evicted {} instances", evicted.len());
            }
        }

        debug!("Instance health checker stopped");
    }
}
