//! Registry HTTP endpoints

use crate::metrics::MetricsCollector;
use crate::query::Query;
use crate::response::{self, ErrorBody, HttpResponse};
use http_body_util::BodyExt;
use hyper::{body::Bytes, Method, Request, StatusCode};
use registry_cluster::Cluster;
use registry_core::{CoreError, InstanceMeta, RegistryStore};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Failure of a single request
#[derive(Debug)]
pub enum ApiError {
    MissingParam(&'static str),
    BadBody(String),
    Core(CoreError),
}

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        ApiError::Core(e)
    }
}

impl ApiError {
    fn into_response(self) -> HttpResponse {
        match self {
            ApiError::MissingParam(name) => response::error(
                StatusCode::BAD_REQUEST,
                &ErrorBody {
                    err_code: "MISSING_PARAMETER",
                    err_message: format!("Required parameter '{}' is not present", name),
                    leader: None,
                },
            ),
            ApiError::BadBody(reason) => response::error(
                StatusCode::BAD_REQUEST,
                &ErrorBody {
                    err_code: "BAD_BODY",
                    err_message: reason,
                    leader: None,
                },
            ),
            ApiError::Core(e) => {
                let status = match e {
                    CoreError::NotLeader { .. } => StatusCode::MISDIRECTED_REQUEST,
                    CoreError::InvalidInstanceUrl(_) => StatusCode::BAD_REQUEST,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let leader = match &e {
                    CoreError::NotLeader { leader, .. } => leader.as_deref(),
                    _ => None,
                };
                response::error(
                    status,
                    &ErrorBody {
                        err_code: e.code(),
                        err_message: e.to_string(),
                        leader,
                    },
                )
            }
        }
    }
}

type ApiResult = std::result::Result<HttpResponse, ApiError>;

/// Request dispatch for one registry node
pub struct RegistryApi {
    cluster: Arc<Cluster>,
    store: Arc<RegistryStore>,
    metrics: MetricsCollector,
}

impl RegistryApi {
    pub fn new(cluster: Arc<Cluster>, metrics: MetricsCollector) -> Self {
        let store = cluster.store().clone();
        Self {
            cluster,
            store,
            metrics,
        }
    }

    /// Serve a hyper request
    pub async fn handle(
        &self,
        req: Request<hyper::body::Incoming>,
    ) -> Result<HttpResponse, hyper::Error> {
        let (parts, body) = req.into_parts();
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                debug!("Failed to read request body: {}", e);
                return Ok(ApiError::BadBody(e.to_string()).into_response());
            }
        };
        Ok(self
            .dispatch(&parts.method, parts.uri.path(), parts.uri.query(), body)
            .await)
    }

    /// Route a request that has already been read into memory.
    ///
    /// Endpoints accept any method, like the paths they mirror.
    pub async fn dispatch(
        &self,
        method: &Method,
        path: &str,
        query: Option<&str>,
        body: Bytes,
    ) -> HttpResponse {
        debug!("{} {}", method, path);
        let query = Query::parse(query);

        let result = match path {
            "/reg" => self.register(&query, &body).await,
            "/unreg" => self.unregister(&query, &body).await,
            "/findall" => self.find_all(&query).await,
            "/renew" => self.renew(&query, &body).await,
            "/renews" => self.renews(&query, &body).await,
            "/version" => self.version(&query).await,
            "/versions" => self.versions(&query).await,
            "/snapshot" => Ok(response::json(StatusCode::OK, &self.store.snapshot().await)),
            "/cluster" | "/" => Ok(response::json(StatusCode::OK, &self.cluster.servers().await)),
            "/info" | "/myself" => Ok(response::json(StatusCode::OK, &self.cluster.myself().await)),
            "/sm" => Ok(response::json(StatusCode::OK, &self.cluster.toggle_leader().await)),
            "/metrics" => Ok(self.metrics().await),
            "/healthz" => Ok(response::text(StatusCode::OK, "text/plain", "OK\n")),
            _ => Ok(response::not_found(path)),
        };

        let response = result.unwrap_or_else(ApiError::into_response);

        let known = !matches!(response.status(), StatusCode::NOT_FOUND);
        self.metrics.record_request(if known { path } else { "unknown" });
        self.metrics.record_response(response.status().as_u16());

        response
    }

    async fn register(&self, query: &Query, body: &[u8]) -> ApiResult {
        let service = required(query, "service")?;
        let instance: InstanceMeta = parse_body(body)?;
        info!("Register {} @ {}", service, instance.to_url());
        self.check_leader().await?;

        let registered = self.store.register(service, instance).await;
        Ok(response::json(StatusCode::OK, &registered))
    }

    async fn unregister(&self, query: &Query, body: &[u8]) -> ApiResult {
        let service = required(query, "service")?;
        let instance: InstanceMeta = parse_body(body)?;
        info!("Unregister {} @ {}", service, instance.to_url());
        self.check_leader().await?;

        let removed = self.store.unregister(service, instance).await;
        Ok(response::json(StatusCode::OK, &removed))
    }

    async fn find_all(&self, query: &Query) -> ApiResult {
        let service = required(query, "service")?;
        debug!("Find all instances of {}", service);
        Ok(response::json(
            StatusCode::OK,
            &self.store.get_all_instances(service).await,
        ))
    }

    async fn renew(&self, query: &Query, body: &[u8]) -> ApiResult {
        let service = required(query, "service")?;
        let instance: InstanceMeta = parse_body(body)?;
        debug!("Renew {} @ {}", service, instance.to_url());
        self.check_leader().await?;

        let at = self.store.renew(&instance, &[service]).await;
        Ok(response::json(StatusCode::OK, &at))
    }

    async fn renews(&self, query: &Query, body: &[u8]) -> ApiResult {
        let services = query
            .list("services")
            .ok_or(ApiError::MissingParam("services"))?;
        let instance: InstanceMeta = parse_body(body)?;
        debug!("Renew {:?} @ {}", services, instance.to_url());
        self.check_leader().await?;

        let at = self.store.renew(&instance, &services).await;
        Ok(response::json(StatusCode::OK, &at))
    }

    async fn version(&self, query: &Query) -> ApiResult {
        let service = required(query, "service")?;
        Ok(response::json(StatusCode::OK, &self.store.version(service).await))
    }

    async fn versions(&self, query: &Query) -> ApiResult {
        let services = query
            .list("services")
            .ok_or(ApiError::MissingParam("services"))?;
        Ok(response::json(StatusCode::OK, &self.store.versions(&services).await))
    }

    async fn metrics(&self) -> HttpResponse {
        let reachable = self
            .cluster
            .peers()
            .await
            .iter()
            .filter(|p| p.status)
            .count();
        self.metrics.global_version.set(self.store.global_version().await);
        self.metrics.reachable_peers.set(reachable as i64);
        self.metrics
            .is_leader
            .set(i64::from(self.cluster.is_leader().await));

        match self.metrics.gather() {
            Ok(text) => response::text(StatusCode::OK, "text/plain; version=0.0.4", text),
            Err(e) => {
                error!("Failed to gather metrics: {}", e);
                ApiError::Core(CoreError::Internal(e.to_string())).into_response()
            }
        }
    }

    /// Only the leader accepts writes
    async fn check_leader(&self) -> Result<(), CoreError> {
        if self.cluster.is_leader().await {
            return Ok(());
        }

        let leader = self.cluster.leader().await.map(|l| l.url);
        error!(
            "This server {} is a read-only follower, leader {} is writable",
            self.cluster.self_url(),
            leader.as_deref().unwrap_or("unknown")
        );
        Err(CoreError::NotLeader {
            myself: self.cluster.self_url().to_string(),
            leader,
        })
    }
}

fn required<'a>(query: &'a Query, name: &'static str) -> Result<&'a str, ApiError> {
    query
        .get(name)
        .filter(|v| !v.is_empty())
        .ok_or(ApiError::MissingParam(name))
}

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadBody(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use registry_cluster::ClusterConfig;
    use registry_core::{Server, Snapshot};
    use serde_json::Value;

    const LEADER: &str = "http://10.0.0.1:8484";

    fn api(self_address: &str) -> RegistryApi {
        let config = ClusterConfig::new(
            self_address,
            vec![LEADER.to_string(), "http://10.0.0.2:8484".to_string()],
        );
        let cluster = Cluster::new(config, Arc::new(RegistryStore::new())).unwrap();
        RegistryApi::new(Arc::new(cluster), MetricsCollector::new().unwrap())
    }

    /// Node 10.0.0.2 that has seen 10.0.0.1 as leader
    async fn follower() -> RegistryApi {
        let api = api("10.0.0.2:8484");
        let report = Server {
            url: LEADER.to_string(),
            leader: true,
            status: false,
            version: 0,
        };
        api.cluster.mark_up(LEADER, &report).await;
        api.cluster.toggle_leader().await;
        api
    }

    async fn call(api: &RegistryApi, path: &str, query: Option<&str>, body: &str) -> (StatusCode, Value) {
        let response = api
            .dispatch(&Method::POST, path, query, Bytes::from(body.to_string()))
            .await;
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    const INSTANCE: &str = r#"{"scheme":"http","host":"10.0.1.1","port":8080,"context":"rpcman","parameters":{"zone":"bj"}}"#;

    #[tokio::test]
    async fn test_register_and_find_all() {
        let api = api("10.0.0.1:8484");

        let (status, body) = call(&api, "/reg", Some("service=svc"), INSTANCE).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], true);
        assert_eq!(body["parameters"]["zone"], "bj");

        let (status, body) = call(&api, "/findall", Some("service=svc"), "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["host"], "10.0.1.1");

        let (_, body) = call(&api, "/version", Some("service=svc"), "").await;
        assert_eq!(body, 1);

        let (_, body) = call(&api, "/info", None, "").await;
        assert_eq!(body["version"], 1);
        assert_eq!(body["leader"], true);
    }

    #[tokio::test]
    async fn test_follower_rejects_writes() {
        let api = follower().await;

        for path in ["/reg", "/unreg", "/renew"] {
            let (status, body) = call(&api, path, Some("service=svc"), INSTANCE).await;
            assert_eq!(status, StatusCode::MISDIRECTED_REQUEST);
            assert_eq!(body["errCode"], "NOT_LEADER");
            assert_eq!(body["leader"], LEADER);
            assert!(body["errMessage"].as_str().unwrap().contains(LEADER));
        }
        let (status, _) = call(&api, "/renews", Some("services=a,b"), INSTANCE).await;
        assert_eq!(status, StatusCode::MISDIRECTED_REQUEST);

        assert!(api.store.get_all_instances("svc").await.is_empty());
        assert_eq!(api.store.global_version().await, 0);
        assert!(api.store.timestamps().await.is_empty());
    }

    #[tokio::test]
    async fn test_follower_serves_reads() {
        let api = follower().await;
        let (status, body) = call(&api, "/findall", Some("service=svc"), "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!([]));

        let (status, body) = call(&api, "/version", Some("service=svc"), "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Value::Null);
    }

    #[tokio::test]
    async fn test_unregister_unknown_service_returns_null() {
        let api = api("10.0.0.1:8484");
        let (status, body) = call(&api, "/unreg", Some("service=svc"), INSTANCE).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Value::Null);
        assert_eq!(api.store.global_version().await, 0);
    }

    #[tokio::test]
    async fn test_unregister_unmatched_instance_echoes_it_offline() {
        let api = api("10.0.0.1:8484");
        call(&api, "/reg", Some("service=svc"), INSTANCE).await;

        let other = r#"{"scheme":"http","host":"10.0.1.9","port":8080,"context":"rpcman"}"#;
        let (status, body) = call(&api, "/unreg", Some("service=svc"), other).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["host"], "10.0.1.9");
        assert_eq!(body["status"], false);
        assert_eq!(api.store.get_all_instances("svc").await.len(), 1);
        assert_eq!(api.store.version("svc").await, Some(2));
    }

    #[tokio::test]
    async fn test_renews_and_versions() {
        let api = api("10.0.0.1:8484");
        call(&api, "/reg", Some("service=a"), INSTANCE).await;
        call(&api, "/reg", Some("service=b"), INSTANCE).await;

        let (status, body) = call(&api, "/renews", Some("services=a,b"), INSTANCE).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.as_i64().unwrap() > 0);

        let (_, body) = call(&api, "/versions", Some("services=a,b,c"), "").await;
        assert_eq!(body, serde_json::json!({"a": 1, "b": 2}));
    }

    #[tokio::test]
    async fn test_snapshot_endpoint() {
        let api = api("10.0.0.1:8484");
        call(&api, "/reg", Some("service=svc"), INSTANCE).await;

        let response = api.dispatch(&Method::GET, "/snapshot", None, Bytes::new()).await;
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let snapshot: Snapshot = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(snapshot.version, 1);
        assert_eq!(snapshot.registry["svc"].len(), 1);
        assert_eq!(snapshot.versions["svc"], 1);
        assert!(snapshot.timestamps.contains_key("svc@http://10.0.1.1:8080/rpcman"));
    }

    #[tokio::test]
    async fn test_cluster_and_toggle() {
        let api = api("10.0.0.1:8484");
        let (_, body) = call(&api, "/", None, "").await;
        assert_eq!(body.as_array().unwrap().len(), 2);

        let (_, body) = call(&api, "/sm", None, "").await;
        assert_eq!(body["leader"], false);
        let (_, body) = call(&api, "/myself", None, "").await;
        assert_eq!(body["leader"], false);
    }

    #[tokio::test]
    async fn test_bad_requests() {
        let api = api("10.0.0.1:8484");

        let (status, body) = call(&api, "/reg", None, INSTANCE).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errCode"], "MISSING_PARAMETER");

        let (status, body) = call(&api, "/reg", Some("service=svc"), "{not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errCode"], "BAD_BODY");

        let (status, _) = call(&api, "/nope", None, "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let api = api("10.0.0.1:8484");
        call(&api, "/reg", Some("service=svc"), INSTANCE).await;

        let response = api.dispatch(&Method::GET, "/metrics", None, Bytes::new()).await;
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("registry_global_version 1"));
        assert!(text.contains("registry_is_leader 1"));
        assert!(text.contains("registry_http_requests_total{path=\"/reg\"} 1"));
    }
}
