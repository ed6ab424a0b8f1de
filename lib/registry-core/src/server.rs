//! Registry cluster member record
use serde::{Deserialize, Serialize};

/// One registry node as seen by the local node.
///
/// `url` is the identity. `version` is the node's last reported global
/// registry version, `-1` until it has been probed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Server {
    pub url: String,
    #[serde(default)]
    pub leader: bool,
    #[serde(default)]
    pub status: bool,
    #[serde(default)]
    pub version: i64,
}

impl Server {
    /// A configured peer that has not been probed yet
    pub fn peer(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            leader: false,
            status: false,
            version: -1,
        }
    }
}

impl PartialEq for Server {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
    }
}

impl Eq for Server {}
