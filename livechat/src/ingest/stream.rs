//! `liveChatMessages.streamList` ingestion over a long-lived connection.
//!
//! The response body is a sequence of line-delimited frames:
//!
//! ```text
//! retry: 2000
//! data: {"items": [...], "nextPageToken": "..."}
//!
//! ```
//!
//! `data:` lines accumulate until a blank line ends the event, at which point
//! the accumulated text is parsed as one [`ChatMessageList`]. `retry:` lines
//! set how long to wait before reconnecting. Anything else is ignored.

use super::{
    Cursor, FeedEvent, IngestionLoop, Recovery, dispatch_batch, pause, recover, reserve_quota,
};
use crate::backoff::Backoff;
use crate::config::StreamConfig;
use crate::dispatch::Dispatcher;
use crate::error::Error;
use crate::lifecycle::{Lifecycle, State};
use crate::quota::QuotaLedger;
use crate::transport::{ApiRequest, HttpExecutor, error_for_status};
use crate::youtube_api::chat::ChatMessageList;
use bytes::BytesMut;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

const OPERATION: &str = "liveChatMessages.streamList";

/// One decoded unit of the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// The JSON text of one complete event.
    Data(String),
    /// Server-requested reconnect delay.
    Retry(Duration),
}

/// Longest line or event, in bytes, a [`FrameDecoder`] buffers by default.
pub const MAX_LINE_LEN: usize = 4 * 1024 * 1024;

/// Splits a chunked body into [`Frame`]s.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    /// Prefix of `buffer` already searched for a newline.
    scanned: usize,
    pending: Vec<String>,
    pending_len: usize,
    max_line: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_LEN)
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A decoder that gives up once a line or event outgrows `max_line` bytes.
    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            scanned: 0,
            pending: Vec::new(),
            pending_len: 0,
            max_line,
        }
    }

    /// Feeds `chunk` and returns every frame it completes.
    ///
    /// Fails with [`Error::Transport`] if an unterminated line or an
    /// unfinished event grows past the decoder's limit.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Frame>, Error> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(offset) = self.buffer[self.scanned..].iter().position(|&b| b == b'\n') {
            let newline = self.scanned + offset;
            self.scanned = 0;
            let line = self.buffer.split_to(newline + 1);
            let line = String::from_utf8_lossy(&line[..newline]);
            let line = line.trim_end_matches('\r');

            if line.is_empty() {
                if !self.pending.is_empty() {
                    frames.push(Frame::Data(self.pending.join("\n")));
                    self.pending.clear();
                    self.pending_len = 0;
                }
            } else if let Some(data) = line.strip_prefix("data:") {
                let data = data.strip_prefix(' ').unwrap_or(data);
                self.pending_len += data.len();
                if self.pending_len > self.max_line {
                    return Err(Error::Transport(eyre::eyre!(
                        "stream event exceeds {} bytes",
                        self.max_line
                    )));
                }
                self.pending.push(data.to_string());
            } else if let Some(retry) = line.strip_prefix("retry:") {
                match retry.trim().parse::<u64>() {
                    Ok(millis) => frames.push(Frame::Retry(Duration::from_millis(millis))),
                    Err(_) => tracing::debug!(line = %line, "ignoring malformed retry line"),
                }
            } else {
                tracing::trace!(line = %line, "ignoring unrecognized stream line");
            }
        }

        self.scanned = self.buffer.len();
        if self.buffer.len() > self.max_line {
            return Err(Error::Transport(eyre::eyre!(
                "stream line exceeds {} bytes without a newline",
                self.max_line
            )));
        }
        Ok(frames)
    }
}

/// Follows a live chat over a persistent `streamList` connection.
pub struct StreamLoop {
    worker: Worker,
    lifecycle: Lifecycle,
}

#[derive(Clone)]
struct Worker {
    config: StreamConfig,
    executor: Arc<dyn HttpExecutor>,
    dispatcher: Dispatcher<FeedEvent>,
    backoff: Backoff,
    ledger: Option<Arc<QuotaLedger>>,
    cursor: Cursor,
}

impl std::fmt::Debug for StreamLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamLoop")
            .field("live_chat_id", &self.worker.config.live_chat_id)
            .field("state", &self.lifecycle.state())
            .field("cursor", &self.worker.cursor.get())
            .finish_non_exhaustive()
    }
}

impl StreamLoop {
    pub fn new(config: StreamConfig, executor: Arc<dyn HttpExecutor>) -> Self {
        let backoff = Backoff::new(config.backoff.clone());
        Self {
            worker: Worker {
                config,
                executor,
                dispatcher: Dispatcher::new(),
                backoff,
                ledger: None,
                cursor: Cursor::default(),
            },
            lifecycle: Lifecycle::new("stream"),
        }
    }

    /// Charges every connection against `ledger` and holds off once it is spent.
    pub fn with_quota(mut self, ledger: Arc<QuotaLedger>) -> Self {
        self.worker.ledger = Some(ledger);
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.worker.backoff = backoff;
        self
    }
}

#[async_trait::async_trait]
impl IngestionLoop for StreamLoop {
    fn dispatcher(&self) -> &Dispatcher<FeedEvent> {
        &self.worker.dispatcher
    }

    async fn start(&self) -> Result<(), Error> {
        let worker = self.worker.clone();
        self.lifecycle
            .start(move |cancel| worker.run(cancel))
            .await
    }

    async fn stop(&self) {
        self.lifecycle.stop().await;
    }

    fn state(&self) -> State {
        self.lifecycle.state()
    }

    fn cursor(&self) -> Option<String> {
        self.worker.cursor.get()
    }

    fn set_cursor(&self, cursor: Option<String>) {
        self.worker.cursor.set(cursor);
    }
}

/// Per-session bookkeeping that survives reconnects.
#[derive(Debug)]
struct Session {
    attempt: u32,
    /// Last `retry:` hint, used between clean reconnects and as the quota cadence.
    reconnect_hint: Option<Duration>,
    /// Set while the server's history replay should still be swallowed.
    skip_next_batch: bool,
}

impl Worker {
    #[instrument(skip_all, fields(live_chat_id = %self.config.live_chat_id))]
    async fn run(self, cancel: CancellationToken) {
        tracing::info!("streaming live chat");
        self.dispatcher.dispatch(FeedEvent::Connected);

        let mut session = Session {
            attempt: 0,
            reconnect_hint: None,
            skip_next_batch: self.config.skip_initial_batch && self.cursor.get().is_none(),
        };
        loop {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => Err(Error::Cancelled),
                closed = self.connect(&mut session) => closed,
            };

            let cadence = session
                .reconnect_hint
                .unwrap_or(self.config.backoff.base)
                .min(self.config.reconnect_ceiling());
            let wait = match outcome {
                Ok(()) => {
                    tracing::debug!(?cadence, "stream closed by server, reconnecting");
                    cadence
                }
                Err(e) => match recover(
                    &self.dispatcher,
                    &self.backoff,
                    e,
                    &mut session.attempt,
                    cadence,
                ) {
                    Recovery::Exit => break,
                    Recovery::RetryAfter(delay) => delay.min(self.config.reconnect_ceiling()),
                },
            };

            if !pause(&cancel, wait).await {
                break;
            }
        }

        self.dispatcher.dispatch(FeedEvent::Disconnected);
        tracing::info!("stopped streaming live chat");
    }

    /// Holds one connection open until the server closes it or it fails.
    async fn connect(&self, session: &mut Session) -> Result<(), Error> {
        reserve_quota(self.ledger.as_deref(), OPERATION)?;
        let request = ApiRequest::get("liveChat/messages/streamList")
            .query("liveChatId", &self.config.live_chat_id)
            .query("part", &self.config.parts)
            .query("maxResults", self.config.max_results.to_string())
            .query_opt("pageToken", self.cursor.get());

        let response = self
            .executor
            .execute(request)
            .await
            .map_err(Error::Transport)?;
        let mut body = error_for_status(response).await?.body;
        tracing::debug!("stream connected");

        let mut decoder = FrameDecoder::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(Error::Transport)?;
            for frame in decoder.push(&chunk)? {
                match frame {
                    Frame::Retry(delay) => session.reconnect_hint = Some(delay),
                    Frame::Data(json) => {
                        let batch: ChatMessageList = serde_json::from_str(&json)?;
                        self.deliver(batch, session)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn deliver(&self, batch: ChatMessageList, session: &mut Session) -> Result<(), Error> {
        session.attempt = 0;
        self.cursor.advance(batch.next_page_token);

        if std::mem::take(&mut session.skip_next_batch) {
            tracing::debug!(items = batch.items.len(), "skipping initial history batch");
        } else {
            dispatch_batch(&self.dispatcher, batch.items);
        }

        if batch.offline_at.is_some() {
            return Err(Error::FeedEnded);
        }
        Ok(())
    }
}
