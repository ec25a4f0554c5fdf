//! HTTP plumbing between the ingestion engine and the YouTube API.
//!
//! The engine talks to an [`HttpExecutor`], which knows how to authenticate
//! and send a request but nothing about live chat. [`ReqwestExecutor`] is the
//! production implementation; tests substitute a scripted one.

use crate::error::Error;
use bytes::{Bytes, BytesMut};
use eyre::Context;
use http::{HeaderMap, Method, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::pin::Pin;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tokio_stream::{Stream, StreamExt};
use tracing::instrument;

/// Root of the YouTube Data API v3.
pub const API_BASE: &str = "https://www.googleapis.com/youtube/v3";

/// A response body delivered chunk by chunk.
pub type ByteStream = Pin<Box<dyn Stream<Item = eyre::Result<Bytes>> + Send>>;

/// One API call, relative to [`API_BASE`].
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    /// Path below the API root, e.g. `liveChat/messages`.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    pub fn query_opt(self, key: &str, value: Option<impl Into<String>>) -> Self {
        match value {
            Some(value) => self.query(key, value),
            None => self,
        }
    }

    pub fn json(mut self, body: &impl serde::Serialize) -> Result<Self, Error> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    /// Value of the first query parameter named `key`.
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Status, headers, and a streaming body.
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ByteStream,
}

impl fmt::Debug for ApiResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl ApiResponse {
    /// A response whose body is already fully known.
    pub fn from_bytes(status: StatusCode, body: impl Into<Bytes>) -> Self {
        let body: Bytes = body.into();
        Self {
            status,
            headers: HeaderMap::new(),
            body: Box::pin(tokio_stream::once(Ok(body))),
        }
    }

    /// A response whose body arrives as the given chunks.
    pub fn from_stream(status: StatusCode, body: ByteStream) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body,
        }
    }

    /// Reads the whole body into memory.
    pub async fn collect(mut self) -> eyre::Result<Bytes> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.body.next().await {
            buf.extend_from_slice(&chunk.context("read response body")?);
        }
        Ok(buf.freeze())
    }

    fn retry_after(&self) -> Option<Duration> {
        self.headers
            .get(http::header::RETRY_AFTER)?
            .to_str()
            .ok()?
            .trim()
            .parse::<u64>()
            .ok()
            .map(Duration::from_secs)
    }
}

/// Sends authenticated requests on behalf of the engine.
#[async_trait::async_trait]
pub trait HttpExecutor: Send + Sync {
    /// Sends `request` and returns the response regardless of its status.
    ///
    /// Errors are reserved for failures to get a response at all.
    async fn execute(&self, request: ApiRequest) -> eyre::Result<ApiResponse>;

    /// Replaces the bearer token used for subsequent requests.
    fn set_access_token(&self, token: String);
}

/// [`HttpExecutor`] backed by a shared [`reqwest::Client`].
#[derive(Debug)]
pub struct ReqwestExecutor {
    client: reqwest::Client,
    base_url: String,
    access_token: RwLock<Option<String>>,
}

impl Default for ReqwestExecutor {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

impl ReqwestExecutor {
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_base_url(client, API_BASE)
    }

    pub fn with_base_url(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token: RwLock::new(None),
        }
    }
}

#[async_trait::async_trait]
impl HttpExecutor for ReqwestExecutor {
    #[instrument(skip(self, request), fields(method = %request.method, path = %request.path), level = tracing::Level::TRACE)]
    async fn execute(&self, request: ApiRequest) -> eyre::Result<ApiResponse> {
        let url = format!("{}/{}", self.base_url, request.path);
        let mut builder = self.client.request(request.method.clone(), &url);

        let token = self
            .access_token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .with_context(|| format!("send {} request to YouTube API: {}", request.method, url))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = async_stream::stream! {
            let mut chunks = response.bytes_stream();
            while let Some(chunk) = chunks.next().await {
                yield chunk.context("read chunk from response body");
            }
        };

        Ok(ApiResponse {
            status,
            headers,
            body: Box::pin(body),
        })
    }

    fn set_access_token(&self, token: String) {
        *self
            .access_token
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(token);
    }
}

/// Google's standard error envelope.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ErrorItem>,
}

#[derive(Debug, Deserialize)]
struct ErrorItem {
    #[serde(default)]
    reason: String,
}

/// Turns a non-success response into the matching [`Error`].
pub(crate) async fn error_for_status(response: ApiResponse) -> Result<ApiResponse, Error> {
    let status = response.status;
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response.retry_after();
    let body = response
        .collect()
        .await
        .unwrap_or_else(|_| Bytes::from_static(b"unknown error"));
    Err(classify_failure(status, retry_after, &body))
}

fn classify_failure(status: StatusCode, retry_after: Option<Duration>, body: &[u8]) -> Error {
    let (reason, message) = match serde_json::from_slice::<ErrorEnvelope>(body) {
        Ok(envelope) => (
            envelope.error.errors.into_iter().next().map(|e| e.reason),
            envelope.error.message,
        ),
        Err(_) => (None, String::from_utf8_lossy(body).into_owned()),
    };

    match reason.as_deref() {
        Some("liveChatEnded" | "liveChatNotFound" | "liveChatDisabled") => Error::FeedEnded,
        Some("quotaExceeded" | "dailyLimitExceeded") => Error::QuotaExhausted,
        Some("rateLimitExceeded" | "userRateLimitExceeded") => Error::RateLimited { retry_after },
        _ if status == StatusCode::TOO_MANY_REQUESTS => Error::RateLimited { retry_after },
        _ => Error::Api {
            status,
            reason,
            message,
        },
    }
}

/// Sends `request`, rejects non-success statuses, and decodes the body as JSON.
pub(crate) async fn fetch_json<T: DeserializeOwned>(
    executor: &dyn HttpExecutor,
    request: ApiRequest,
) -> Result<T, Error> {
    let response = executor
        .execute(request)
        .await
        .map_err(Error::Transport)?;
    let response = error_for_status(response).await?;
    let body = response.collect().await.map_err(Error::Transport)?;
    Ok(serde_json::from_slice(&body)?)
}

/// Sends `request` and rejects non-success statuses, discarding the body.
pub(crate) async fn send(executor: &dyn HttpExecutor, request: ApiRequest) -> Result<(), Error> {
    let response = executor
        .execute(request)
        .await
        .map_err(Error::Transport)?;
    error_for_status(response).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(reason: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "error": {
                "code": 403,
                "message": "nope",
                "errors": [{ "reason": reason, "domain": "youtube.liveChat" }]
            }
        }))
        .unwrap()
    }

    #[test]
    fn ended_chat_is_terminal() {
        for reason in ["liveChatEnded", "liveChatNotFound", "liveChatDisabled"] {
            let err = classify_failure(StatusCode::FORBIDDEN, None, &envelope(reason));
            assert!(err.is_terminal(), "{reason} -> {err:?}");
        }
    }

    #[test]
    fn quota_and_rate_limits() {
        assert!(matches!(
            classify_failure(StatusCode::FORBIDDEN, None, &envelope("quotaExceeded")),
            Error::QuotaExhausted
        ));
        let limited = classify_failure(
            StatusCode::FORBIDDEN,
            Some(Duration::from_secs(3)),
            &envelope("rateLimitExceeded"),
        );
        assert_eq!(limited.retry_hint(), Some(Duration::from_secs(3)));
        assert!(matches!(
            classify_failure(StatusCode::TOO_MANY_REQUESTS, None, b"slow down"),
            Error::RateLimited { retry_after: None }
        ));
    }

    #[test]
    fn other_failures_keep_status_and_body() {
        let err = classify_failure(StatusCode::BAD_GATEWAY, None, b"upstream sad");
        let Error::Api {
            status,
            reason,
            message,
        } = err
        else {
            panic!("expected Api error");
        };
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(reason, None);
        assert_eq!(message, "upstream sad");
    }

    #[tokio::test]
    async fn retry_after_header_is_honoured() {
        let mut response = ApiResponse::from_bytes(StatusCode::TOO_MANY_REQUESTS, "");
        response
            .headers
            .insert(http::header::RETRY_AFTER, "12".parse().unwrap());
        let err = error_for_status(response).await.unwrap_err();
        assert_eq!(err.retry_hint(), Some(Duration::from_secs(12)));
    }

    #[test]
    fn request_builder() {
        let req = ApiRequest::get("liveChat/messages")
            .query("liveChatId", "c1")
            .query_opt("pageToken", None::<String>)
            .query_opt("maxResults", Some("200"));
        assert_eq!(req.query_value("liveChatId"), Some("c1"));
        assert_eq!(req.query_value("pageToken"), None);
        assert_eq!(req.query_value("maxResults"), Some("200"));
    }
}
