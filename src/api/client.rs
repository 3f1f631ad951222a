//! Authenticated HTTP client for the Spotify Web API
//!
//! Wraps reqwest::Client with bearer token injection and error message
//! extraction. There is no retry; a failed call fails the user action.

use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::{Method, Response, StatusCode};
use serde_json::Value;

pub const DEFAULT_API_BASE: &str = "https://api.spotify.com";

/// Used when neither the body nor the status line says anything useful.
const FALLBACK_MESSAGE: &str = "Spotify API error";

/// Errors from Web API calls.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Non-2xx answer. Displays as the best message available.
    #[error("{message}")]
    Status { status: u16, message: String },
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("unexpected response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Client for the player endpoints.
#[derive(Debug, Clone)]
pub struct PlayerClient {
    http: reqwest::Client,
    base_url: String,
}

impl PlayerClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_http(reqwest::Client::new(), base_url)
    }

    pub fn with_http(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send a request with bearer auth and a JSON content type.
    ///
    /// `headers` are merged last and win over the defaults.
    pub async fn send(
        &self,
        token: &str,
        method: Method,
        path: &str,
        body: Option<&Value>,
        headers: HeaderMap,
    ) -> Result<Response, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!("{} {}", method, url);

        let mut req = self
            .http
            .request(method.clone(), &url)
            .bearer_auth(token)
            .header(CONTENT_TYPE, "application/json");

        req = match body {
            Some(json) => req.body(json.to_string()),
            // PUT/POST without a body still needs Content-Length: 0
            None if method != Method::GET => req.body(Vec::new()),
            None => req,
        };

        let resp = req
            .headers(headers)
            .send()
            .await
            .map_err(|source| ApiError::Transport {
                url: url.clone(),
                source,
            })?;

        check_response(resp).await
    }

    pub(crate) async fn put(
        &self,
        token: &str,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Response, ApiError> {
        self.send(token, Method::PUT, path, body, HeaderMap::new())
            .await
    }

    pub(crate) async fn post(&self, token: &str, path: &str) -> Result<Response, ApiError> {
        self.send(token, Method::POST, path, None, HeaderMap::new())
            .await
    }

    pub(crate) async fn get(&self, token: &str, path: &str) -> Result<Response, ApiError> {
        self.send(token, Method::GET, path, None, HeaderMap::new())
            .await
    }
}

/// Turn a non-2xx response into an `ApiError` with the best message we can find.
async fn check_response(resp: Response) -> Result<Response, ApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let status_text = status.canonical_reason().unwrap_or_default().to_string();
    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|json| message_from_body(&json))
        .unwrap_or(status_text);
    let message = if message.is_empty() {
        FALLBACK_MESSAGE.to_string()
    } else {
        message
    };

    tracing::debug!("HTTP {}: {}", status.as_u16(), message);
    Err(ApiError::Status {
        status: status.as_u16(),
        message,
    })
}

/// Message carried by a Web API error body, if any.
///
/// Accepts `{"error": {"message": ..}}`, `{"message": ..}` and bare strings.
/// Empty strings count as missing.
pub fn message_from_body(body: &Value) -> Option<String> {
    let non_empty = |v: &Value| v.as_str().filter(|s| !s.is_empty()).map(str::to_string);
    match body {
        Value::String(_) => non_empty(body),
        Value::Object(map) => map
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(non_empty)
            .or_else(|| map.get("message").and_then(non_empty)),
        _ => None,
    }
}

/// True for statuses that mean the token is no good.
pub fn is_auth_failure(status: u16) -> bool {
    status == StatusCode::UNAUTHORIZED.as_u16()
}
