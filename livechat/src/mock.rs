//! Scripted collaborators for testing code built on this crate.
//!
//! [`ScriptedExecutor`] answers requests from a queue of canned responses
//! and records every request it sees, so tests can assert on both sides of
//! the conversation without a network. [`ScriptedTokens`] does the same for
//! access tokens.

use crate::auth::TokenProvider;
use crate::transport::{ApiRequest, ApiResponse, HttpExecutor};
use bytes::Bytes;
use http::StatusCode;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

enum Scripted {
    Body {
        status: StatusCode,
        headers: http::HeaderMap,
        body: Bytes,
    },
    Stream {
        status: StatusCode,
        chunks: mpsc::UnboundedReceiver<eyre::Result<Bytes>>,
    },
    Fail(String),
}

/// The sending half of a scripted streaming response body.
///
/// Dropping it ends the body, as if the server closed the connection.
#[derive(Debug, Clone)]
pub struct StreamHandle {
    tx: mpsc::UnboundedSender<eyre::Result<Bytes>>,
}

impl StreamHandle {
    /// Delivers `chunk` as the next piece of the body.
    pub fn send(&self, chunk: impl Into<Bytes>) {
        let _ = self.tx.send(Ok(chunk.into()));
    }

    /// Delivers one `data:` frame carrying `batch`.
    pub fn send_batch(&self, batch: &serde_json::Value) {
        self.send(format!("data: {batch}\n\n"));
    }

    /// Breaks the body with a read error.
    pub fn fail(&self, message: &str) {
        let _ = self.tx.send(Err(eyre::eyre!(message.to_string())));
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// An [`HttpExecutor`] that replays canned responses in order.
///
/// Once the queue is empty it answers with the fallback response if one is
/// set, and with a transport failure otherwise.
#[derive(Default)]
pub struct ScriptedExecutor {
    queue: Mutex<VecDeque<Scripted>>,
    fallback: Mutex<Option<(StatusCode, Bytes)>>,
    requests: Mutex<Vec<ApiRequest>>,
    tokens: Mutex<Vec<String>>,
}

impl std::fmt::Debug for ScriptedExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedExecutor")
            .field("queued", &lock(&self.queue).len())
            .field("requests", &lock(&self.requests).len())
            .finish()
    }
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_json(&self, status: StatusCode, body: serde_json::Value) {
        self.push_body(status, body.to_string());
    }

    pub fn push_status(&self, status: StatusCode, body: &str) {
        self.push_body(status, body.to_string());
    }

    pub fn push_body(&self, status: StatusCode, body: impl Into<Bytes>) {
        self.push_with_headers(status, http::HeaderMap::new(), body);
    }

    pub fn push_with_headers(
        &self,
        status: StatusCode,
        headers: http::HeaderMap,
        body: impl Into<Bytes>,
    ) {
        lock(&self.queue).push_back(Scripted::Body {
            status,
            headers,
            body: body.into(),
        });
    }

    /// Queues a response whose body stays open until the handle is dropped.
    pub fn push_stream(&self, status: StatusCode) -> StreamHandle {
        let (tx, chunks) = mpsc::unbounded_channel();
        lock(&self.queue).push_back(Scripted::Stream { status, chunks });
        StreamHandle { tx }
    }

    /// Queues a failure to get any response at all.
    pub fn push_failure(&self, message: &str) {
        lock(&self.queue).push_back(Scripted::Fail(message.to_string()));
    }

    /// Answers every request with `body` once the queue runs dry.
    pub fn respond_by_default(&self, status: StatusCode, body: serde_json::Value) {
        *lock(&self.fallback) = Some((status, Bytes::from(body.to_string())));
    }

    /// Every request executed so far, oldest first.
    pub fn requests(&self) -> Vec<ApiRequest> {
        lock(&self.requests).clone()
    }

    /// Every token installed so far, oldest first.
    pub fn tokens(&self) -> Vec<String> {
        lock(&self.tokens).clone()
    }

    pub fn current_token(&self) -> Option<String> {
        lock(&self.tokens).last().cloned()
    }
}

#[async_trait::async_trait]
impl HttpExecutor for ScriptedExecutor {
    async fn execute(&self, request: ApiRequest) -> eyre::Result<ApiResponse> {
        tracing::trace!(method = %request.method, path = %request.path, "scripted request");
        lock(&self.requests).push(request);

        let next = lock(&self.queue).pop_front();
        match next {
            Some(Scripted::Body {
                status,
                headers,
                body,
            }) => {
                let mut response = ApiResponse::from_bytes(status, body);
                response.headers = headers;
                Ok(response)
            }
            Some(Scripted::Stream { status, chunks }) => Ok(ApiResponse::from_stream(
                status,
                Box::pin(UnboundedReceiverStream::new(chunks)),
            )),
            Some(Scripted::Fail(message)) => Err(eyre::eyre!(message)),
            None => match lock(&self.fallback).clone() {
                Some((status, body)) => Ok(ApiResponse::from_bytes(status, body)),
                None => Err(eyre::eyre!("no scripted response left")),
            },
        }
    }

    fn set_access_token(&self, token: String) {
        lock(&self.tokens).push(token);
    }
}

/// A [`TokenProvider`] that hands out numbered tokens and can be told to fail.
#[derive(Debug, Default)]
pub struct ScriptedTokens {
    issued: Mutex<u32>,
    failures: Mutex<VecDeque<String>>,
}

impl ScriptedTokens {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next call fail with `message`.
    pub fn fail_next(&self, message: &str) {
        lock(&self.failures).push_back(message.to_string());
    }

    /// Number of tokens successfully issued.
    pub fn issued(&self) -> u32 {
        *lock(&self.issued)
    }
}

#[async_trait::async_trait]
impl TokenProvider for ScriptedTokens {
    async fn access_token(&self) -> eyre::Result<String> {
        if let Some(message) = lock(&self.failures).pop_front() {
            eyre::bail!(message);
        }
        let mut issued = lock(&self.issued);
        *issued += 1;
        Ok(format!("token-{}", *issued))
    }
}
