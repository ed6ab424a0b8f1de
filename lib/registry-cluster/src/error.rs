use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClusterError>;

#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("Peer {url} unreachable: {reason}")]
    PeerUnreachable { url: String, reason: String },

    #[error("Peer {url} did not answer within {timeout:?}")]
    PeerTimeout { url: String, timeout: Duration },

    #[error("Peer {url} answered with status {status}")]
    PeerStatus { url: String, status: u16 },

    #[error("Malformed response from {url}: {source}")]
    MalformedResponse {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("No leader is known")]
    NoLeader,

    #[error("Invalid url: {0}")]
    InvalidUrl(String),
}
