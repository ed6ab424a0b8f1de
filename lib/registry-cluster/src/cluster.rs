//! Static registry cluster membership and leader lookup

use crate::election;
use crate::{ClusterError, Result};
use registry_core::{Leadership, RegistryStore, Server};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Cluster configuration
#[derive(Clone, Debug)]
pub struct ClusterConfig {
    /// Advertised `host:port` of this node
    pub self_address: String,
    /// Configured registry node URLs, may include this node
    pub peers: Vec<String>,
    /// Period of the peer health and replication loop
    pub probe_interval: Duration,
    /// Timeout for a single peer request
    pub peer_timeout: Duration,
}

impl ClusterConfig {
    pub fn new(self_address: impl Into<String>, peers: Vec<String>) -> Self {
        Self {
            self_address: self_address.into(),
            peers,
            probe_interval: Duration::from_secs(5),
            peer_timeout: Duration::from_millis(300),
        }
    }

    /// URL of this node, `http://` + advertised address
    pub fn self_url(&self) -> String {
        format!("http://{}", self.self_address)
    }

    fn self_host(&self) -> &str {
        self.self_address
            .rsplit_once(':')
            .map(|(host, _)| host)
            .unwrap_or(&self.self_address)
    }

    /// Rewrite `localhost` and `127.0.0.1` in a configured URL to this node's host
    pub fn normalize_url(&self, url: &str) -> String {
        let host = self.self_host();
        if url.contains("localhost") {
            return url.replace("localhost", host);
        }
        if url.contains("127.0.0.1") {
            return url.replace("127.0.0.1", host);
        }
        url.to_string()
    }
}

/// Membership view of one registry node.
///
/// The member list is fixed at construction: one record per configured URL,
/// with this node's own record standing in for whichever URL resolves to it.
/// This node's record starts as `leader = true, status = false`. Nothing ever
/// probes a node's own record, so `status` stays `false`; leadership checks
/// treat the local node as reachable regardless.
pub struct Cluster {
    config: ClusterConfig,
    self_url: String,
    members: RwLock<Vec<Server>>,
    store: Arc<RegistryStore>,
}

impl Cluster {
    pub fn new(config: ClusterConfig, store: Arc<RegistryStore>) -> Result<Self> {
        if config.self_address.rsplit_once(':').is_none() {
            return Err(ClusterError::InvalidUrl(config.self_address.clone()));
        }

        let self_url = config.self_url();
        let myself = Server {
            url: self_url.clone(),
            leader: true,
            status: false,
            version: 0,
        };

        let mut members: Vec<Server> = Vec::with_capacity(config.peers.len() + 1);
        for url in &config.peers {
            let normalized = config.normalize_url(url);
            if url.eq_ignore_ascii_case(&self_url) || normalized == self_url {
                if members.iter().any(|m| m.url == self_url) {
                    continue;
                }
                debug!("Adding myself to members: {}", self_url);
                members.push(myself.clone());
            } else if members.iter().any(|m| m.url == normalized) {
                debug!("Skipping duplicate member {}", normalized);
            } else {
                debug!("Adding member {}", normalized);
                members.push(Server::peer(normalized));
            }
        }
        if !members.iter().any(|m| m.url == self_url) {
            info!("{} is not in the configured member list, adding it", self_url);
            members.push(myself);
        }

        info!("Cluster initialized with {} members", members.len());

        Ok(Self {
            config,
            self_url,
            members: RwLock::new(members),
            store,
        })
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<RegistryStore> {
        &self.store
    }

    pub fn self_url(&self) -> &str {
        &self.self_url
    }

    /// This node's record with `version` refreshed from the store
    pub async fn myself(&self) -> Server {
        let version = self.store.global_version().await;
        let mut members = self.members.write().await;
        match members.iter_mut().find(|m| m.url == self.self_url) {
            Some(myself) => {
                myself.version = version;
                myself.clone()
            }
            None => Server {
                url: self.self_url.clone(),
                leader: false,
                status: false,
                version,
            },
        }
    }

    /// All members, this node included
    pub async fn servers(&self) -> Vec<Server> {
        self.myself().await;
        self.members.read().await.clone()
    }

    /// Other members, this node excluded
    pub async fn peers(&self) -> Vec<Server> {
        self.members
            .read()
            .await
            .iter()
            .filter(|m| m.url != self.self_url)
            .cloned()
            .collect()
    }

    /// First reachable member flagged as leader
    pub async fn leader(&self) -> Option<Server> {
        self.myself().await;
        let members = self.members.read().await;
        members
            .iter()
            .find(|m| self.is_reachable(m) && m.leader)
            .cloned()
    }

    pub async fn is_leader(&self) -> bool {
        self.members
            .read()
            .await
            .iter()
            .any(|m| m.url == self.self_url && m.leader)
    }

    /// Flip this node's leader flag by hand, returning the updated record
    pub async fn toggle_leader(&self) -> Server {
        {
            let mut members = self.members.write().await;
            if let Some(myself) = members.iter_mut().find(|m| m.url == self.self_url) {
                myself.leader = !myself.leader;
                info!("Leader flag of {} set to {} by operator", myself.url, myself.leader);
            }
        }
        self.myself().await
    }

    /// Apply a successful probe of `url`
    pub async fn mark_up(&self, url: &str, report: &Server) {
        let mut members = self.members.write().await;
        if let Some(member) = members.iter_mut().find(|m| m.url == url) {
            if !member.status {
                info!("Registry node {} is up", url);
            }
            member.status = true;
            member.version = report.version;
            member.leader = report.leader;
        }
    }

    /// Apply a failed probe of `url`
    pub async fn mark_down(&self, url: &str) {
        let mut members = self.members.write().await;
        if let Some(member) = members.iter_mut().find(|m| m.url == url) {
            if member.status {
                info!("Registry node {} is down", url);
                member.status = false;
                member.leader = false;
            }
        }
    }

    /// Number of reachable members claiming leadership
    pub async fn leader_count(&self) -> usize {
        let members = self.members.read().await;
        members
            .iter()
            .filter(|m| self.is_reachable(m) && m.leader)
            .count()
    }

    /// Run [`election::elect`] over the current members, returning the winner
    pub async fn elect(&self) -> String {
        let myself = self.myself().await;
        let mut members = self.members.write().await;
        election::elect(&myself, &mut members)
    }

    fn is_reachable(&self, server: &Server) -> bool {
        server.status || server.url == self.self_url
    }
}

#[async_trait::async_trait]
impl Leadership for Cluster {
    async fn is_leader(&self) -> bool {
        Cluster::is_leader(self).await
    }
}
