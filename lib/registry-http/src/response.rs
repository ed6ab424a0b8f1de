//! Response builders for the registry API

use http_body_util::Full;
use hyper::{body::Bytes, header, Response, StatusCode};
use serde::Serialize;
use tracing::error;

pub type HttpResponse = Response<Full<Bytes>>;

/// Error body returned by every failing endpoint
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody<'a> {
    pub err_code: &'a str,
    pub err_message: String,
    /// Leader the caller should retry a write against
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leader: Option<&'a str>,
}

/// Serialize `value` as a JSON response
pub fn json<T: Serialize + ?Sized>(status: StatusCode, value: &T) -> HttpResponse {
    match serde_json::to_vec(value) {
        Ok(body) => build(status, "application/json", Bytes::from(body)),
        Err(e) => {
            error!("Failed to serialize response: {}", e);
            internal_error()
        }
    }
}

/// JSON error response
pub fn error(status: StatusCode, body: &ErrorBody<'_>) -> HttpResponse {
    json(status, body)
}

/// Plain text response
pub fn text(status: StatusCode, content_type: &str, body: impl Into<Bytes>) -> HttpResponse {
    build(status, content_type, body.into())
}

/// Create a 404 Not Found response
pub fn not_found(path: &str) -> HttpResponse {
    error(
        StatusCode::NOT_FOUND,
        &ErrorBody {
            err_code: "NOT_FOUND",
            err_message: format!("No handler for {}", path),
            leader: None,
        },
    )
}

fn build(status: StatusCode, content_type: &str, body: Bytes) -> HttpResponse {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type)
        .body(Full::new(body))
        .unwrap_or_else(|_| internal_error())
}

fn internal_error() -> HttpResponse {
    let mut response = Response::new(Full::new(Bytes::from_static(b"Internal Server Error\n")));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}
