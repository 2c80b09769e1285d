//! `/api/*` pass-through to the ingest server's HTTP interface.
//!
//! Lets the browser page read stream statistics without cross-origin access
//! to the ingest server.

use crate::config::TargetConfig;
use crate::error::{BridgeError, Result};
use crate::relay::server::AppState;
use axum::body::{Body, to_bytes};
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderName, StatusCode, header};
use axum::response::{IntoResponse, Response};
use reqwest::Url;
use std::time::Duration;

/// Largest request body forwarded upstream.
const MAX_BODY_BYTES: usize = 1024 * 1024;

const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(10);

/// Headers that describe one hop and must not be forwarded.
const HOP_BY_HOP: [HeaderName; 9] = [
    header::CONNECTION,
    header::HOST,
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
    header::TE,
    header::TRAILER,
    header::UPGRADE,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
];

/// Forwards requests below `/api` to `http://{host}:{port}/`.
#[derive(Debug, Clone)]
pub struct ApiProxy {
    client: reqwest::Client,
    upstream: Url,
}

impl ApiProxy {
    pub fn new(target: &TargetConfig) -> Result<Self> {
        let upstream = upstream_base(target)?;
        let client = reqwest::Client::builder()
            .timeout(UPSTREAM_TIMEOUT)
            .build()
            .map_err(|e| BridgeError::Server {
                message: format!("Failed to create HTTP client: {}", e),
            })?;
        Ok(Self { client, upstream })
    }

    pub fn upstream(&self) -> &Url {
        &self.upstream
    }

    /// Upstream URL for a request to `/api{rest}` with optional query.
    pub fn upstream_url(&self, rest: &str, query: Option<&str>) -> Url {
        let mut url = self.upstream.clone();
        let path = rest.trim_start_matches('/');
        url.set_path(&format!("/{}", path));
        url.set_query(query);
        url
    }
}

fn upstream_base(target: &TargetConfig) -> Result<Url> {
    let host = if target.host.contains(':') && !target.host.starts_with('[') {
        format!("[{}]", target.host)
    } else {
        target.host.clone()
    };
    Url::parse(&format!("http://{}:{}/", host, target.port)).map_err(|e| {
        BridgeError::ConfigInvalidValue {
            key: "target.host".to_string(),
            message: format!("'{}' is not a valid host: {}", target.host, e),
        }
    })
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in &HOP_BY_HOP {
        headers.remove(name);
    }
}

/// Handler for `/api/{*path}`.
pub async fn forward(State(state): State<AppState>, request: Request) -> Response {
    let proxy = state.proxy();
    let (parts, body) = request.into_parts();
    let rest = parts.uri.path().strip_prefix("/api").unwrap_or(parts.uri.path());
    let url = proxy.upstream_url(rest, parts.uri.query());

    let body = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(e) => {
            tracing::debug!(error = %e, "Rejected oversized proxy request body");
            return (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").into_response();
        }
    };

    let mut headers = parts.headers;
    strip_hop_by_hop(&mut headers);

    tracing::debug!(method = %parts.method, url = %url, "Proxying API request");
    let upstream = proxy
        .client
        .request(parts.method, url)
        .headers(headers)
        .body(body)
        .send()
        .await;

    let upstream = match upstream {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(error = %e, "Ingest server API unreachable");
            return (
                StatusCode::BAD_GATEWAY,
                format!("Ingest server unreachable: {}", e),
            )
                .into_response();
        }
    };

    let status = upstream.status();
    let mut response_headers = upstream.headers().clone();
    strip_hop_by_hop(&mut response_headers);

    let bytes = match upstream.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to read ingest server response");
            return (StatusCode::BAD_GATEWAY, "Incomplete upstream response").into_response();
        }
    };

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proxy_for(host: &str, port: u16) -> ApiProxy {
        ApiProxy::new(&TargetConfig {
            host: host.to_string(),
            port,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_upstream_base_uses_target() {
        let proxy = proxy_for("radio.example.org", 8010);
        assert_eq!(proxy.upstream().as_str(), "http://radio.example.org:8010/");
    }

    #[test]
    fn test_upstream_url_maps_rest_and_query() {
        let proxy = proxy_for("localhost", 8000);
        assert_eq!(
            proxy.upstream_url("/status-json.xsl", None).as_str(),
            "http://localhost:8000/status-json.xsl"
        );
        assert_eq!(
            proxy.upstream_url("/admin/stats", Some("mount=/stream")).as_str(),
            "http://localhost:8000/admin/stats?mount=/stream"
        );
        assert_eq!(
            proxy.upstream_url("", None).as_str(),
            "http://localhost:8000/"
        );
    }

    #[test]
    fn test_ipv6_host_is_bracketed() {
        let proxy = proxy_for("::1", 8000);
        assert_eq!(proxy.upstream().as_str(), "http://[::1]:8000/");
    }

    #[test]
    fn test_invalid_host_is_config_error() {
        let err = ApiProxy::new(&TargetConfig {
            host: "bad host".to_string(),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, BridgeError::ConfigInvalidValue { .. }));
    }

    #[test]
    fn test_hop_by_hop_headers_removed() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, "localhost:3000".parse().unwrap());
        headers.insert(header::CONNECTION, "keep-alive".parse().unwrap());
        headers.insert(header::ACCEPT, "application/json".parse().unwrap());
        strip_hop_by_hop(&mut headers);
        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key(header::ACCEPT));
    }
}
