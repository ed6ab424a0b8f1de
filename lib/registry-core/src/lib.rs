//! Core service registry functionality
//!
//! This library provides:
//! - Instance and cluster member data types
//! - Versioned registry store with snapshot and restore
//! - Instance liveness expiry

pub mod error;
pub mod health_check;
pub mod instance;
pub mod registry;
pub mod server;
pub mod snapshot;

pub use error::{CoreError, Result};
pub use health_check::{HealthCheckConfig, InstanceHealthChecker, Leadership};
pub use instance::InstanceMeta;
pub use registry::RegistryStore;
pub use server::Server;
pub use snapshot::Snapshot;
