//! Server configuration from defaults, an optional YAML file and the environment

use anyhow::{bail, Context, Result};
use registry_cluster::ClusterConfig;
use registry_core::HealthCheckConfig;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address
    pub bind: SocketAddr,
    /// Advertised `host:port` of this node; derived from `bind` when absent
    pub self_address: Option<String>,
    /// Registry node URLs, this node may be among them
    pub peers: Vec<String>,
    pub peer_timeout_ms: u64,
    pub probe_interval_secs: u64,
    pub instance_check_initial_delay_secs: u64,
    pub instance_check_interval_secs: u64,
    pub instance_ttl_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8484)),
            self_address: None,
            peers: Vec::new(),
            peer_timeout_ms: 300,
            probe_interval_secs: 5,
            instance_check_initial_delay_secs: 10,
            instance_check_interval_secs: 30,
            instance_ttl_secs: 20,
        }
    }
}

impl ServerConfig {
    /// Load from `path` (if any), then apply `REGISTRY_*` environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config file {}", path.display()))?;
                Self::from_yaml(&raw)
                    .with_context(|| format!("parsing config file {}", path.display()))?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Apply overrides looked up through `var`
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(bind) = var("REGISTRY_BIND") {
            self.bind = bind
                .parse()
                .with_context(|| format!("invalid REGISTRY_BIND {}", bind))?;
        }
        if let Some(address) = var("REGISTRY_SELF_ADDRESS") {
            self.self_address = Some(address);
        }
        if let Some(peers) = var("REGISTRY_PEERS") {
            self.peers = peers
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(timeout) = var("REGISTRY_PEER_TIMEOUT_MS") {
            self.peer_timeout_ms = timeout
                .parse()
                .with_context(|| format!("invalid REGISTRY_PEER_TIMEOUT_MS {}", timeout))?;
        }
        if let Some(ttl) = var("REGISTRY_INSTANCE_TTL_SECS") {
            self.instance_ttl_secs = ttl
                .parse()
                .with_context(|| format!("invalid REGISTRY_INSTANCE_TTL_SECS {}", ttl))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.peer_timeout_ms == 0 {
            bail!("peer_timeout_ms must be positive");
        }
        if self.probe_interval_secs == 0 {
            bail!("probe_interval_secs must be positive");
        }
        if self.instance_ttl_secs == 0 {
            bail!("instance_ttl_secs must be positive");
        }
        let address = self.advertised_address();
        match address.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => Ok(()),
            _ => bail!("self_address {} must be host:port", address),
        }
    }

    /// Explicit self address, or `bind` with an unspecified IP made loopback
    pub fn advertised_address(&self) -> String {
        match &self.self_address {
            Some(address) => address.clone(),
            None if self.bind.ip().is_unspecified() => format!("127.0.0.1:{}", self.bind.port()),
            None => self.bind.to_string(),
        }
    }

    pub fn cluster(&self) -> ClusterConfig {
        let mut cluster = ClusterConfig::new(self.advertised_address(), self.peers.clone());
        cluster.probe_interval = Duration::from_secs(self.probe_interval_secs);
        cluster.peer_timeout = Duration::from_millis(self.peer_timeout_ms);
        cluster
    }

    pub fn health_check(&self) -> HealthCheckConfig {
        HealthCheckConfig {
            initial_delay: Duration::from_secs(self.instance_check_initial_delay_secs),
            check_interval: Duration::from_secs(self.instance_check_interval_secs),
            ttl: Duration::from_secs(self.instance_ttl_secs),
        }
    }
}
