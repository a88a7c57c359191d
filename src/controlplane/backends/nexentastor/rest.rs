//! NexentaStor REST transport
//!
//! Pure mechanism: one request, one decoded JSON body. No retries happen
//! here, and errors are classified by the caller.

use crate::context::RequestContext;
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

// =============================================================================
// Transport Port
// =============================================================================

/// Status code and decoded body of one appliance response
#[derive(Debug, Clone)]
pub struct RestResponse {
    pub status: StatusCode,
    /// `Value::Null` when the body was empty, `Value::String` for a non-2xx
    /// body that is not JSON
    pub body: Value,
}

/// Sends requests to one appliance management address
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        ctx: &RequestContext,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<RestResponse>;

    /// Replace the bearer token attached to subsequent requests
    fn set_auth_token(&self, token: String);

    fn address(&self) -> &str;
}

// =============================================================================
// URI helpers
// =============================================================================

/// Build `path?key=value&...` with every key and value percent-encoded.
/// Parameters are emitted in key order.
pub fn build_uri(path: &str, params: &BTreeMap<&str, &str>) -> String {
    if params.is_empty() {
        return path.to_string();
    }
    let query = params
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");
    format!("{}?{}", path, query)
}

/// Escape a value for use as a single URL path segment; embedded slashes
/// become `%2F`
pub fn escape_path(segment: &str) -> String {
    urlencoding::encode(segment).into_owned()
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the HTTP transport
#[derive(Debug, Clone)]
pub struct RestClientConfig {
    /// Per-request timeout, independent of the caller's deadline
    pub request_timeout: Duration,
    /// Accept self-signed appliance certificates
    pub insecure_skip_verify: bool,
}

impl Default for RestClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            insecure_skip_verify: true,
        }
    }
}

// =============================================================================
// REST Client
// =============================================================================

/// `reqwest`-backed transport for one appliance address
pub struct RestClient {
    address: String,
    client: reqwest::Client,
    token: RwLock<Option<String>>,
}

impl RestClient {
    /// Create a client for `address` (`scheme://host:port`)
    pub fn new(address: &str, config: &RestClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .danger_accept_invalid_certs(config.insecure_skip_verify)
            .build()
            .map_err(|e| Error::Configuration(format!("Cannot create HTTP client: {}", e)))?;

        Ok(Self {
            address: address.trim_end_matches('/').to_string(),
            client,
            token: RwLock::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.address, path.trim_start_matches('/'))
    }

    fn request_error(&self, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::Timeout {
                endpoint: self.address.clone(),
            }
        } else {
            Error::Transport {
                endpoint: self.address.clone(),
                reason: err.to_string(),
            }
        }
    }
}

impl std::fmt::Debug for RestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClient")
            .field("address", &self.address)
            .field("authenticated", &self.token.read().is_some())
            .finish()
    }
}

#[async_trait]
impl Transport for RestClient {
    async fn send(
        &self,
        ctx: &RequestContext,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<RestResponse> {
        let url = self.url(path);
        debug!("{} {}", method, url);

        let mut request = self
            .client
            .request(method.clone(), &url)
            .header(CONTENT_TYPE, "application/json");
        let token = self.token.read().clone();
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = ctx
            .run(path, request.send())
            .await?
            .map_err(|e| self.request_error(e))?;
        let status = response.status();
        let raw = ctx
            .run(path, response.text())
            .await?
            .map_err(|e| self.request_error(e))?;

        debug!("{} {} -> {}", method, url, status);

        Ok(RestResponse {
            status,
            body: decode_body(&self.address, status, &raw)?,
        })
    }

    fn set_auth_token(&self, token: String) {
        *self.token.write() = Some(token);
    }

    fn address(&self) -> &str {
        &self.address
    }
}

/// Non-2xx bodies that are not JSON (proxy error pages, plain text) are kept
/// as `Value::String` so the status code still drives classification
fn decode_body(endpoint: &str, status: StatusCode, raw: &str) -> Result<Value> {
    if raw.trim().is_empty() {
        return Ok(Value::Null);
    }
    if !status.is_success() {
        return Ok(serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())));
    }
    serde_json::from_str(raw).map_err(|e| Error::Decode {
        endpoint: endpoint.to_string(),
        status: status.as_u16(),
        body: raw.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use axum::http::{header::AUTHORIZATION, HeaderMap, StatusCode as AxumStatus};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::json;

    async fn spawn_appliance(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn fake_appliance() -> Router {
        Router::new()
            .route(
                "/whoami",
                get(|headers: HeaderMap| async move {
                    let auth = headers
                        .get(AUTHORIZATION)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    Json(json!({ "authorization": auth }))
                }),
            )
            .route(
                "/echo",
                post(|Json(body): Json<Value>| async move { (AxumStatus::CREATED, Json(body)) }),
            )
            .route(
                "/garbage",
                get(|| async { (AxumStatus::OK, "<html>not json</html>") }),
            )
            .route("/accepted", get(|| async { AxumStatus::ACCEPTED }))
            .route(
                "/maintenance",
                get(|| async {
                    (
                        AxumStatus::SERVICE_UNAVAILABLE,
                        "<html><body>503 Service Temporarily Unavailable</body></html>",
                    )
                }),
            )
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Json(json!({}))
                }),
            )
    }

    #[test]
    fn test_build_uri() {
        let mut params = BTreeMap::new();
        params.insert("path", "pool1/ds 1");
        params.insert("fields", "path,quotaSize");
        assert_eq!(
            build_uri("/storage/filesystems", &params),
            "/storage/filesystems?fields=path%2CquotaSize&path=pool1%2Fds%201"
        );
        assert_eq!(build_uri("/storage/pools", &BTreeMap::new()), "/storage/pools");
    }

    #[test]
    fn test_escape_path_round_trip() {
        let escaped = escape_path("pool1/ds1");
        assert_eq!(escaped, "pool1%2Fds1");
        assert_eq!(urlencoding::decode(&escaped).unwrap(), "pool1/ds1");
    }

    #[tokio::test]
    async fn test_token_attached_after_set() {
        let address = spawn_appliance(fake_appliance()).await;
        let client = RestClient::new(&address, &RestClientConfig::default()).unwrap();
        let ctx = RequestContext::background();

        let response = client.send(&ctx, Method::GET, "whoami", None).await.unwrap();
        assert_eq!(response.body["authorization"], Value::Null);

        client.set_auth_token("abc".into());
        client.set_auth_token("def".into());
        let response = client.send(&ctx, Method::GET, "/whoami", None).await.unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body["authorization"], "Bearer def");
    }

    #[tokio::test]
    async fn test_json_body_round_trip() {
        let address = spawn_appliance(fake_appliance()).await;
        let client = RestClient::new(&address, &RestClientConfig::default()).unwrap();
        let body = json!({ "path": "pool1/ds1" });

        let response = client
            .send(&RequestContext::background(), Method::POST, "/echo", Some(&body))
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::CREATED);
        assert_eq!(response.body, body);
    }

    #[tokio::test]
    async fn test_empty_body_is_null() {
        let address = spawn_appliance(fake_appliance()).await;
        let client = RestClient::new(&address, &RestClientConfig::default()).unwrap();

        let response = client
            .send(&RequestContext::background(), Method::GET, "/accepted", None)
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::ACCEPTED);
        assert_eq!(response.body, Value::Null);
    }

    #[tokio::test]
    async fn test_unparseable_body_is_decode_error() {
        let address = spawn_appliance(fake_appliance()).await;
        let client = RestClient::new(&address, &RestClientConfig::default()).unwrap();

        let result = client
            .send(&RequestContext::background(), Method::GET, "/garbage", None)
            .await;
        assert_matches!(result, Err(Error::Decode { status: 200, body, .. }) if body.contains("not json"));
    }

    #[tokio::test]
    async fn test_error_page_body_kept_as_text() {
        let address = spawn_appliance(fake_appliance()).await;
        let client = RestClient::new(&address, &RestClientConfig::default()).unwrap();

        let response = client
            .send(&RequestContext::background(), Method::GET, "/maintenance", None)
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_matches!(&response.body, Value::String(text) if text.contains("503 Service"));
    }

    #[test]
    fn test_decode_body_by_status() {
        let body = decode_body("https://a:8443", StatusCode::BAD_GATEWAY, "Bad Gateway").unwrap();
        assert_eq!(body, Value::String("Bad Gateway".into()));

        let body = decode_body("https://a:8443", StatusCode::NOT_FOUND, r#"{"code":"ENOENT"}"#)
            .unwrap();
        assert_eq!(body["code"], "ENOENT");

        let result = decode_body("https://a:8443", StatusCode::OK, "Bad Gateway");
        assert_matches!(result, Err(Error::Decode { status: 200, .. }));
    }

    #[tokio::test]
    async fn test_connection_failure_is_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let client = RestClient::new(&address, &RestClientConfig::default()).unwrap();
        let result = client
            .send(&RequestContext::background(), Method::GET, "/storage/pools", None)
            .await;
        assert_matches!(result, Err(Error::Transport { endpoint, .. }) if endpoint == address);
    }

    #[tokio::test]
    async fn test_request_timeout_is_endpoint_failure() {
        let address = spawn_appliance(fake_appliance()).await;
        let config = RestClientConfig {
            request_timeout: Duration::from_millis(100),
            ..Default::default()
        };
        let client = RestClient::new(&address, &config).unwrap();

        let err = client
            .send(&RequestContext::background(), Method::GET, "/slow", None)
            .await
            .unwrap_err();
        assert_matches!(err, Error::Timeout { .. });
        assert!(err.is_endpoint_failure());
    }

    #[tokio::test]
    async fn test_caller_deadline_is_not_endpoint_failure() {
        let address = spawn_appliance(fake_appliance()).await;
        let client = RestClient::new(&address, &RestClientConfig::default()).unwrap();
        let ctx = RequestContext::with_timeout(Duration::from_millis(100));

        let err = client.send(&ctx, Method::GET, "/slow", None).await.unwrap_err();
        assert_matches!(err, Error::DeadlineExceeded { .. });
        assert!(!err.is_endpoint_failure());
    }
}
