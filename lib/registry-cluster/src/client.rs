//! Outbound HTTP calls to other registry nodes

use crate::{ClusterError, Result};
use async_trait::async_trait;
use http_body_util::{BodyExt, Empty};
use hyper::{body::Bytes, Method, Request, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::tokio::TokioExecutor;
use registry_core::{Server, Snapshot};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::time::timeout as tokio_timeout;
use tracing::debug;

/// Bounded-time GET against a peer.
///
/// Implementations must give up after their configured timeout and report
/// every failure as an error, never panic.
#[async_trait]
pub trait PeerClient: Send + Sync {
    async fn get(&self, url: &str) -> Result<Bytes>;
}

/// GET `url` and decode the JSON body
pub async fn get_json<T: DeserializeOwned>(client: &dyn PeerClient, url: &str) -> Result<T> {
    let body = client.get(url).await?;
    serde_json::from_slice(&body).map_err(|source| ClusterError::MalformedResponse {
        url: url.to_string(),
        source,
    })
}

/// Fetch a peer's self-report from `/info`
pub async fn fetch_info(client: &dyn PeerClient, base_url: &str) -> Result<Server> {
    get_json(client, &format!("{}/info", base_url)).await
}

/// Fetch a peer's full registry from `/snapshot`
pub async fn fetch_snapshot(client: &dyn PeerClient, base_url: &str) -> Result<Snapshot> {
    get_json(client, &format!("{}/snapshot", base_url)).await
}

/// Pooled hyper client with a per-request timeout
pub struct HttpPeerClient {
    client: Client<HttpConnector, Empty<Bytes>>,
    timeout: Duration,
}

impl HttpPeerClient {
    pub fn new(timeout: Duration) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(timeout));
        connector.set_keepalive(Some(Duration::from_secs(60)));

        let client = Client::builder(TokioExecutor::new()).build::<_, Empty<Bytes>>(connector);

        Self { client, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn send(&self, url: &str, uri: Uri) -> Result<Bytes> {
        let unreachable = |reason: String| ClusterError::PeerUnreachable {
            url: url.to_string(),
            reason,
        };

        let request = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .header("accept", "application/json")
            .body(Empty::<Bytes>::new())
            .map_err(|e| unreachable(e.to_string()))?;

        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClusterError::PeerStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let collected = response
            .into_body()
            .collect()
            .await
            .map_err(|e| unreachable(e.to_string()))?;
        Ok(collected.to_bytes())
    }
}

#[async_trait]
impl PeerClient for HttpPeerClient {
    async fn get(&self, url: &str) -> Result<Bytes> {
        debug!("GET {}", url);

        let uri: Uri = url
            .parse()
            .map_err(|_| ClusterError::InvalidUrl(url.to_string()))?;

        // covers the body read as well as connect and headers
        match tokio_timeout(self.timeout, self.send(url, uri)).await {
            Ok(result) => result,
            Err(_) => Err(ClusterError::PeerTimeout {
                url: url.to_string(),
                timeout: self.timeout,
            }),
        }
    }
}
