//! HTTP transport adapter.
//!
//! Every backend call goes through [`HttpTransport::request`]. HTTP-level
//! failures (4xx/5xx) come back as a non-ok [`ApiResponse`]; only the absence
//! of a usable response is a [`TransportError`]. Nothing here retries.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use platesync_shared::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

/// One backend call. The bearer token is passed explicitly so the caller
/// decides which credential is used, even while the session is rotating it.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the API base URL, query string included.
    pub path: String,
    pub body: Option<Value>,
    pub token: Option<String>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            token: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::Put, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    /// Decoded JSON body; `null` when the body was empty.
    pub body: Value,
}

impl ApiResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Machine-usable message carried by an error body, if any.
    pub fn error_message(&self) -> String {
        let from_body = match &self.body {
            Value::Object(map) => ["error", "message", "msg", "detail"]
                .iter()
                .find_map(|k| map.get(*k).and_then(Value::as_str))
                .map(str::to_string),
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            _ => None,
        };
        from_body.unwrap_or_else(|| format!("HTTP {}", self.status))
    }
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn request(&self, request: ApiRequest) -> Result<ApiResponse, TransportError>;

    /// Download raw bytes from an absolute URL (avatar images).
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, TransportError>;
}

/// Production transport backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: String,
}

impl ReqwestTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Network(e.to_string())
    }
}

/// Decode a response body. Successful responses must carry JSON (or
/// nothing); error responses may carry anything, e.g. a proxy's HTML page,
/// which is kept as a string for the caller.
fn decode_body(ok: bool, bytes: &[u8]) -> Result<Value, TransportError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    match serde_json::from_slice(bytes) {
        Ok(v) => Ok(v),
        Err(_) if !ok => Ok(Value::String(String::from_utf8_lossy(bytes).into_owned())),
        Err(e) => Err(TransportError::MalformedBody(e.to_string())),
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn request(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let url = self.url_for(&request.path);
        let mut builder = match request.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
            Method::Put => self.client.put(&url),
            Method::Delete => self.client.delete(&url),
        };

        if let Some(ref token) = request.token {
            builder = builder.bearer_auth(token);
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        let resp = builder.send().await.map_err(|e| {
            warn!(method = request.method.as_str(), path = %request.path, error = %e, "Request failed");
            map_reqwest_error(e)
        })?;

        let status = resp.status();
        let bytes = resp.bytes().await.map_err(map_reqwest_error)?;
        let body = decode_body(status.is_success(), &bytes)?;

        debug!(
            method = request.method.as_str(),
            path = %request.path,
            status = status.as_u16(),
            "Request completed"
        );

        Ok(ApiResponse::new(status.as_u16(), body))
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, TransportError> {
        let resp = self.client.get(url).send().await.map_err(map_reqwest_error)?;
        if !resp.status().is_success() {
            return Err(TransportError::HttpStatus(resp.status().as_u16()));
        }
        let bytes = resp.bytes().await.map_err(map_reqwest_error)?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_response_ok_range() {
        assert!(ApiResponse::new(200, Value::Null).is_ok());
        assert!(ApiResponse::new(204, Value::Null).is_ok());
        assert!(!ApiResponse::new(404, Value::Null).is_ok());
        assert!(!ApiResponse::new(500, Value::Null).is_ok());
    }

    #[test]
    fn test_error_message_from_body() {
        let resp = ApiResponse::new(400, json!({"error": "plate already registered"}));
        assert_eq!(resp.error_message(), "plate already registered");
        let resp = ApiResponse::new(502, Value::Null);
        assert_eq!(resp.error_message(), "HTTP 502");
    }

    #[test]
    fn test_decode_body() {
        assert_eq!(decode_body(true, b"").unwrap(), Value::Null);
        assert_eq!(decode_body(true, b"{\"a\":1}").unwrap(), json!({"a": 1}));
        assert!(matches!(
            decode_body(true, b"<html>"),
            Err(TransportError::MalformedBody(_))
        ));
        assert_eq!(
            decode_body(false, b"<html>").unwrap(),
            Value::String("<html>".into())
        );
    }

    #[test]
    fn test_url_join() {
        let t = ReqwestTransport::new("http://localhost:3000/api/", Duration::from_secs(1)).unwrap();
        assert_eq!(t.url_for("/posts/feed"), "http://localhost:3000/api/posts/feed");
        assert_eq!(t.url_for("chats"), "http://localhost:3000/api/chats");
    }

    #[test]
    fn test_request_builder() {
        let req = ApiRequest::post("/posts/7/like").with_token("tok");
        assert_eq!(req.method, Method::Post);
        assert_eq!(req.token.as_deref(), Some("tok"));
        assert!(req.body.is_none());
    }
}
