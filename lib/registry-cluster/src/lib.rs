//! Registry cluster coordination
//!
//! This library provides:
//! - Static membership and leader lookup
//! - Deterministic leader election
//! - Peer health probing and snapshot replication from the leader

pub mod client;
pub mod cluster;
pub mod election;
pub mod error;
pub mod server_health;

pub use client::{HttpPeerClient, PeerClient};
pub use cluster::{Cluster, ClusterConfig};
pub use election::elect;
pub use error::{ClusterError, Result};
pub use server_health::{CycleReport, ServerHealth};
