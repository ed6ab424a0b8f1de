//! Prometheus metrics for the registry node

use anyhow::Result;
use prometheus::{CounterVec, Encoder, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Prometheus metrics collector for registry requests and cluster state
#[derive(Clone)]
pub struct MetricsCollector {
    /// Total HTTP requests received, by path
    pub http_requests_total: CounterVec,
    /// HTTP responses by status code
    pub http_responses_total: CounterVec,
    /// Global registry version of this node
    pub global_version: IntGauge,
    /// Peers that answered their last probe
    pub reachable_peers: IntGauge,
    /// 1 when this node believes it is leader
    pub is_leader: IntGauge,
    registry: Arc<Registry>,
}

impl MetricsCollector {
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());

        let http_requests_total = CounterVec::new(
            Opts::new("registry_http_requests_total", "Total HTTP requests"),
            &["path"],
        )?;
        let http_responses_total = CounterVec::new(
            Opts::new("registry_http_responses_total", "Total HTTP responses by status"),
            &["status"],
        )?;
        let global_version = IntGauge::new(
            "registry_global_version",
            "Global registry version of this node",
        )?;
        let reachable_peers = IntGauge::new(
            "registry_cluster_reachable_peers",
            "Peers that answered their last health probe",
        )?;
        let is_leader = IntGauge::new("registry_is_leader", "Whether this node is the leader")?;

        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_responses_total.clone()))?;
        registry.register(Box::new(global_version.clone()))?;
        registry.register(Box::new(reachable_peers.clone()))?;
        registry.register(Box::new(is_leader.clone()))?;

        Ok(Self {
            http_requests_total,
            http_responses_total,
            global_version,
            reachable_peers,
            is_leader,
            registry,
        })
    }

    pub fn record_request(&self, path: &str) {
        self.http_requests_total.with_label_values(&[path]).inc();
    }

    pub fn record_response(&self, status: u16) {
        self.http_responses_total
            .with_label_values(&[&status.to_string()])
            .inc();
    }

    /// Gather all metrics in Prometheus text format
    pub fn gather(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = vec![];
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_collector_creation() {
        let collector = MetricsCollector::new().expect("Failed to create collector");
        assert!(collector.gather().is_ok());
    }

    #[test]
    fn test_metrics_text_format_structure() {
        let collector = MetricsCollector::new().expect("Failed to create collector");
        collector.record_request("/findall");
        collector.record_response(200);
        collector.global_version.set(3);

        let metrics = collector.gather().expect("Failed to gather metrics");
        assert!(metrics.contains("# HELP"));
        assert!(metrics.contains("# TYPE"));
        assert!(metrics.contains("registry_http_requests_total{path=\"/findall\"} 1"));
        assert!(metrics.contains("registry_http_responses_total{status=\"200\"} 1"));
        assert!(metrics.contains("registry_global_version 3"));
    }

    #[test]
    fn test_metrics_collector_clone_shares_registry() {
        let first = MetricsCollector::new().expect("Failed to create collector");
        let second = first.clone();
        second.record_request("/reg");

        let metrics = first.gather().expect("Failed to gather metrics");
        assert!(metrics.contains("registry_http_requests_total{path=\"/reg\"} 1"));
    }
}
