//! HTTP surface of a registry node
pub mod api;
pub mod metrics;
pub mod query;
pub mod response;

pub use api::RegistryApi;
pub use metrics::MetricsCollector;
