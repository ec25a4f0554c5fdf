//! Ingestion loops that pull live chat events and fan them out to handlers.
//!
//! Two transports are provided: [`poll::PollLoop`] issues discrete
//! `liveChatMessages.list` requests at the cadence the server asks for, and
//! [`stream::StreamLoop`] holds a `streamList` connection open and decodes
//! events as they arrive. Both share the [`Lifecycle`](crate::lifecycle::Lifecycle)
//! state machine, report through a [`Dispatcher<FeedEvent>`], and never return
//! errors from their background task: every failure is either retried or
//! delivered to the `error` category.

use crate::backoff::Backoff;
use crate::dispatch::{Category, Dispatchable, Dispatcher};
use crate::error::Error;
use crate::lifecycle::State;
use crate::quota::QuotaLedger;
use crate::youtube_api::chat::{ChatMessage, MessageDetails};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub mod poll;
pub mod stream;

pub use poll::PollLoop;
pub use stream::StreamLoop;

/// Something an ingestion loop reports to its handlers.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// Fired once when the loop's background task begins.
    Connected,
    /// Any chat event other than deletions and bans.
    Message(ChatMessage),
    /// A `messageDeletedEvent`.
    Deleted(ChatMessage),
    /// A `userBannedEvent`.
    Banned(ChatMessage),
    Error(Arc<Error>),
    /// Fired once on every exit of the background task.
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedCategory {
    Message,
    Delete,
    Ban,
    Error,
    Connect,
    Disconnect,
}

impl Category for FeedCategory {
    fn name(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Delete => "delete",
            Self::Ban => "ban",
            Self::Error => "error",
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
        }
    }
}

impl Dispatchable for FeedEvent {
    type Category = FeedCategory;
    const ERROR: FeedCategory = FeedCategory::Error;

    fn category(&self) -> FeedCategory {
        match self {
            Self::Connected => FeedCategory::Connect,
            Self::Message(_) => FeedCategory::Message,
            Self::Deleted(_) => FeedCategory::Delete,
            Self::Banned(_) => FeedCategory::Ban,
            Self::Error(_) => FeedCategory::Error,
            Self::Disconnected => FeedCategory::Disconnect,
        }
    }

    fn from_fault(fault: Error) -> Self {
        Self::Error(Arc::new(fault))
    }
}

impl FeedEvent {
    /// Wraps a raw chat event, routing deletions and bans to their own category.
    pub fn from_message(message: ChatMessage) -> Self {
        match message.details() {
            MessageDetails::MessageDeleted { .. } => Self::Deleted(message),
            MessageDetails::UserBanned { .. } => Self::Banned(message),
            _ => Self::Message(message),
        }
    }

    pub fn error(error: Error) -> Self {
        Self::Error(Arc::new(error))
    }
}

/// Common surface of the poll and stream loops.
#[async_trait::async_trait]
pub trait IngestionLoop: Send + Sync {
    /// The dispatcher this loop reports through.
    fn dispatcher(&self) -> &Dispatcher<FeedEvent>;

    /// Spawns the background task. Fails with [`Error::AlreadyRunning`]
    /// unless the loop is stopped.
    async fn start(&self) -> Result<(), Error>;

    /// Cancels the background task and waits for it to exit.
    async fn stop(&self);

    fn state(&self) -> State;

    /// The page token the next fetch would resume from.
    fn cursor(&self) -> Option<String>;

    /// Replaces the resume position. Takes effect on the next fetch, or on
    /// the next `start` if the loop is stopped.
    fn set_cursor(&self, cursor: Option<String>);
}

/// Resume position shared between a loop and its background task.
#[derive(Debug, Clone, Default)]
pub(crate) struct Cursor(Arc<Mutex<Option<String>>>);

impl Cursor {
    pub(crate) fn get(&self) -> Option<String> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub(crate) fn set(&self, cursor: Option<String>) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = cursor;
    }

    /// Advances to `next`, keeping the current position if the server sent none.
    pub(crate) fn advance(&self, next: Option<String>) {
        if next.is_some() {
            self.set(next);
        }
    }
}

/// Dispatches one batch, one event per item, in server order.
pub(crate) fn dispatch_batch(dispatcher: &Dispatcher<FeedEvent>, items: Vec<ChatMessage>) {
    for message in items {
        tracing::trace!(id = %message.id, kind = %message.details(), "dispatching chat event");
        dispatcher.dispatch(FeedEvent::from_message(message));
    }
}

/// Charges `operation` against the ledger, refusing once the budget is spent.
pub(crate) fn reserve_quota(ledger: Option<&QuotaLedger>, operation: &str) -> Result<(), Error> {
    let Some(ledger) = ledger else {
        return Ok(());
    };
    if ledger.is_exhausted() {
        return Err(Error::QuotaExhausted);
    }
    ledger.charge(operation);
    Ok(())
}

/// What a loop should do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Recovery {
    Exit,
    RetryAfter(Duration),
}

/// Reports `error` and decides whether and when to try again.
///
/// Quota exhaustion is retried at `cadence` without growing the backoff.
/// Every other transient failure bumps `attempt`.
pub(crate) fn recover(
    dispatcher: &Dispatcher<FeedEvent>,
    backoff: &Backoff,
    error: Error,
    attempt: &mut u32,
    cadence: Duration,
) -> Recovery {
    if error.is_cancellation() {
        return Recovery::Exit;
    }
    if error.is_terminal() {
        tracing::info!(error = %error, "live chat feed ended");
        dispatcher.dispatch(FeedEvent::error(error));
        return Recovery::Exit;
    }

    let delay = if matches!(error, Error::QuotaExhausted) {
        cadence
    } else {
        let computed = backoff.delay(*attempt);
        *attempt = attempt.saturating_add(1);
        error.retry_hint().map_or(computed, |hint| computed.max(hint))
    };
    tracing::warn!(
        error = %error,
        attempt = *attempt,
        ?delay,
        "ingestion attempt failed, retrying"
    );
    dispatcher.dispatch(FeedEvent::error(error));
    Recovery::RetryAfter(delay)
}

/// Sleeps for `duration`; returns `false` if cancelled first.
pub(crate) async fn pause(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
