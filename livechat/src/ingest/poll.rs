//! `liveChatMessages.list` polling.

use super::{
    Cursor, FeedEvent, IngestionLoop, Recovery, dispatch_batch, pause, recover, reserve_quota,
};
use crate::backoff::Backoff;
use crate::config::PollConfig;
use crate::dispatch::Dispatcher;
use crate::error::Error;
use crate::lifecycle::{Lifecycle, State};
use crate::quota::QuotaLedger;
use crate::transport::{ApiRequest, HttpExecutor, fetch_json};
use crate::youtube_api::chat::ChatMessageList;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

const OPERATION: &str = "liveChatMessages.list";

/// Polls a live chat at the interval the server suggests.
pub struct PollLoop {
    worker: Worker,
    lifecycle: Lifecycle,
}

/// Everything the background task needs, cloned into it on `start`.
#[derive(Clone)]
struct Worker {
    config: PollConfig,
    executor: Arc<dyn HttpExecutor>,
    dispatcher: Dispatcher<FeedEvent>,
    backoff: Backoff,
    ledger: Option<Arc<QuotaLedger>>,
    cursor: Cursor,
}

impl std::fmt::Debug for PollLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollLoop")
            .field("live_chat_id", &self.worker.config.live_chat_id)
            .field("state", &self.lifecycle.state())
            .field("cursor", &self.worker.cursor.get())
            .finish_non_exhaustive()
    }
}

impl PollLoop {
    pub fn new(config: PollConfig, executor: Arc<dyn HttpExecutor>) -> Self {
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
            lifecycle: Lifecycle::new("poll"),
        }
    }

    /// Charges every fetch against `ledger` and skips fetches once it is spent.
    pub fn with_quota(mut self, ledger: Arc<QuotaLedger>) -> Self {
        self.worker.ledger = Some(ledger);
        self
    }

    /// Replaces the retry delay calculator, e.g. with a deterministic one.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.worker.backoff = backoff;
        self
    }
}

#[async_trait::async_trait]
impl IngestionLoop for PollLoop {
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

impl Worker {
    #[instrument(skip_all, fields(live_chat_id = %self.config.live_chat_id))]
    async fn run(self, cancel: CancellationToken) {
        tracing::info!("polling live chat");
        self.dispatcher.dispatch(FeedEvent::Connected);

        let mut attempt = 0;
        let mut interval = self.config.min_interval;
        loop {
            let fetched = tokio::select! {
                _ = cancel.cancelled() => Err(Error::Cancelled),
                page = self.fetch() => page,
            };

            let wait = match fetched {
                Ok(page) => {
                    attempt = 0;
                    interval = self.next_interval(page.polling_interval_millis);
                    self.cursor.advance(page.next_page_token);
                    let ended = page.offline_at.is_some();
                    tracing::debug!(items = page.items.len(), ?interval, "fetched chat page");
                    dispatch_batch(&self.dispatcher, page.items);
                    if ended {
                        tracing::info!("broadcast went offline");
                        self.dispatcher.dispatch(FeedEvent::error(Error::FeedEnded));
                        break;
                    }
                    interval
                }
                Err(e) => {
                    match recover(&self.dispatcher, &self.backoff, e, &mut attempt, interval) {
                        Recovery::Exit => break,
                        Recovery::RetryAfter(delay) => delay,
                    }
                }
            };

            if !pause(&cancel, wait).await {
                break;
            }
        }

        self.dispatcher.dispatch(FeedEvent::Disconnected);
        tracing::info!("stopped polling live chat");
    }

    async fn fetch(&self) -> Result<ChatMessageList, Error> {
        reserve_quota(self.ledger.as_deref(), OPERATION)?;
        let request = ApiRequest::get("liveChat/messages")
            .query("liveChatId", &self.config.live_chat_id)
            .query("part", &self.config.parts)
            .query("maxResults", self.config.page_size.to_string())
            .query_opt("pageToken", self.cursor.get());
        fetch_json(self.executor.as_ref(), request).await
    }

    /// The server's suggested wait, clamped into the configured bounds.
    fn next_interval(&self, suggested_millis: Option<u64>) -> Duration {
        let min = self.config.min_interval;
        let max = self.config.max_interval.max(min);
        Duration::from_millis(suggested_millis.unwrap_or(0)).clamp(min, max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackoffConfig;
    use crate::ingest::testing::{page, record, wait_for};
    use crate::mock::ScriptedExecutor;
    use http::StatusCode;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn poller(executor: &Arc<ScriptedExecutor>) -> PollLoop {
        let mut config = PollConfig::new("chat-1");
        config.backoff = BackoffConfig::without_jitter();
        PollLoop::new(config, Arc::clone(executor) as Arc<dyn HttpExecutor>)
    }

    #[test]
    fn interval_is_clamped() {
        let executor = Arc::new(ScriptedExecutor::new());
        let poller = poller(&executor);
        let w = &poller.worker;
        assert_eq!(w.next_interval(Some(5_000)), Duration::from_secs(5));
        assert_eq!(w.next_interval(Some(60_000)), Duration::from_secs(30));
        assert_eq!(w.next_interval(Some(0)), Duration::from_secs(1));
        assert_eq!(w.next_interval(None), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn dispatches_batches_in_order_and_follows_cursor() {
        let executor = Arc::new(ScriptedExecutor::new());
        executor.push_json(
            StatusCode::OK,
            page(
                &[
                    ("a", "textMessageEvent"),
                    ("b", "messageDeletedEvent"),
                    ("c", "textMessageEvent"),
                    ("d", "userBannedEvent"),
                ],
                "page-2",
                5_000,
            ),
        );
        executor.push_json(
            StatusCode::OK,
            page(&[("e", "textMessageEvent")], "page-3", 5_000),
        );

        let poller = poller(&executor);
        let (log, _subs) = record(poller.dispatcher());
        poller.start().await.unwrap();

        wait_for(&log, 5).await;
        tokio::time::advance(Duration::from_secs(5)).await;
        wait_for(&log, 6).await;
        poller.stop().await;

        assert_eq!(
            *log.lock().unwrap(),
            [
                "connect",
                "message:a",
                "delete:b",
                "message:c",
                "ban:d",
                "message:e",
                "disconnect"
            ]
        );
        assert_eq!(poller.cursor().as_deref(), Some("page-3"));

        let requests = executor.requests();
        assert_eq!(requests[0].path, "liveChat/messages");
        assert_eq!(requests[0].query_value("pageToken"), None);
        assert_eq!(requests[0].query_value("maxResults"), Some("200"));
        assert_eq!(requests[1].query_value("pageToken"), Some("page-2"));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_back_off_then_recover() {
        let executor = Arc::new(ScriptedExecutor::new());
        executor.push_status(StatusCode::INTERNAL_SERVER_ERROR, "oops");
        executor.push_status(StatusCode::INTERNAL_SERVER_ERROR, "oops");
        executor.push_json(
            StatusCode::OK,
            page(&[("a", "textMessageEvent")], "p2", 1_000),
        );

        let poller = poller(&executor);
        let (log, _subs) = record(poller.dispatcher());
        poller.start().await.unwrap();

        wait_for(&log, 2).await;
        assert_eq!(executor.requests().len(), 1);
        // first retry after 1s, second after 2s
        tokio::time::advance(Duration::from_secs(1)).await;
        wait_for(&log, 3).await;
        assert_eq!(executor.requests().len(), 2);
        tokio::time::advance(Duration::from_secs(2)).await;
        wait_for(&log, 4).await;
        poller.stop().await;

        let log = log.lock().unwrap();
        assert_eq!(log[0], "connect");
        assert!(log[1].starts_with("error:"), "{log:?}");
        assert!(log[2].starts_with("error:"), "{log:?}");
        assert_eq!(log[3], "message:a");
        assert_eq!(log.last().map(String::as_str), Some("disconnect"));
    }

    #[tokio::test(start_paused = true)]
    async fn ended_feed_exits_for_good() {
        let executor = Arc::new(ScriptedExecutor::new());
        executor.push_json(
            StatusCode::FORBIDDEN,
            json!({
                "error": {
                    "code": 403,
                    "message": "The live chat is no longer live.",
                    "errors": [{ "reason": "liveChatEnded" }]
                }
            }),
        );

        let poller = poller(&executor);
        let (log, _subs) = record(poller.dispatcher());
        poller.start().await.unwrap();
        wait_for(&log, 3).await;

        assert_eq!(
            *log.lock().unwrap(),
            ["connect", "error:live chat has ended", "disconnect"]
        );
        for _ in 0..100 {
            if poller.state() == State::Stopped {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(poller.state(), State::Stopped);
        assert_eq!(executor.requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn offline_page_is_dispatched_then_ends_the_feed() {
        let executor = Arc::new(ScriptedExecutor::new());
        let mut last = page(&[("z", "textMessageEvent")], "p9", 1_000);
        last["offlineAt"] = json!("2025-01-01T01:00:00Z");
        executor.push_json(StatusCode::OK, last);

        let poller = poller(&executor);
        let (log, _subs) = record(poller.dispatcher());
        poller.start().await.unwrap();
        wait_for(&log, 4).await;

        assert_eq!(
            *log.lock().unwrap(),
            ["connect", "message:z", "error:live chat has ended", "disconnect"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_quota_skips_fetches() {
        use jiff::tz::TimeZone;
        let ledger = Arc::new(QuotaLedger::with_clock(
            5,
            TimeZone::UTC,
            Arc::new(|| "2025-01-01T12:00:00Z".parse::<jiff::Timestamp>().unwrap()),
        ));
        let executor = Arc::new(ScriptedExecutor::new());
        executor.push_json(
            StatusCode::OK,
            page(&[("a", "textMessageEvent")], "p2", 1_000),
        );

        let poller = poller(&executor).with_quota(Arc::clone(&ledger));
        let (log, _subs) = record(poller.dispatcher());
        poller.start().await.unwrap();
        wait_for(&log, 2).await;
        tokio::time::advance(Duration::from_secs(1)).await;
        wait_for(&log, 3).await;
        poller.stop().await;

        let log = log.lock().unwrap();
        assert_eq!(log[1], "message:a");
        assert_eq!(log[2], "error:daily quota exhausted");
        assert_eq!(executor.requests().len(), 1);
        assert!(ledger.is_exhausted());
    }

    #[tokio::test]
    async fn imported_cursor_is_used_on_start() {
        let executor = Arc::new(ScriptedExecutor::new());
        executor.push_json(StatusCode::OK, page(&[], "p2", 1_000));

        let poller = poller(&executor);
        poller.set_cursor(Some("resume-here".to_string()));
        let (log, _subs) = record(poller.dispatcher());
        poller.start().await.unwrap();
        assert!(matches!(poller.start().await, Err(Error::AlreadyRunning)));
        wait_for(&log, 1).await;
        while executor.requests().is_empty() {
            tokio::task::yield_now().await;
        }
        poller.stop().await;
        poller.stop().await;

        assert_eq!(
            executor.requests()[0].query_value("pageToken"),
            Some("resume-here")
        );
        assert_eq!(
            log.lock().unwrap().last().map(String::as_str),
            Some("disconnect")
        );
    }
}
