//! Error types shared by the ingestion engine and the bot facade.

use std::time::Duration;

/// Errors surfaced by the live chat ingestion engine.
///
/// Ingestion loops never return these to their caller; they are delivered to
/// `error` handlers instead. Facade actions and lifecycle calls return them
/// directly.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// `start` was called on a loop that is not stopped.
    #[error("ingestion loop is already running")]
    AlreadyRunning,

    /// An action was attempted while the facade is not connected.
    #[error("not connected to a live chat")]
    NotRunning,

    /// The live chat has ended, been disabled, or no longer exists.
    ///
    /// This is terminal: the loop exits and is not retried.
    #[error("live chat has ended")]
    FeedEnded,

    /// The ingestion session was cancelled by `stop`.
    #[error("ingestion cancelled")]
    Cancelled,

    /// The daily quota budget is spent, either by our own accounting or
    /// according to the provider.
    #[error("daily quota exhausted")]
    QuotaExhausted,

    /// The provider asked us to slow down.
    #[error("rate limited by provider")]
    RateLimited { retry_after: Option<Duration> },

    /// The provider returned a non-success status that did not map onto a
    /// more specific variant.
    #[error("YouTube API request failed with status {status}: {message}")]
    Api {
        status: http::StatusCode,
        reason: Option<String>,
        message: String,
    },

    /// The request could not be sent or the response body could not be read.
    #[error("transport error: {0:#}")]
    Transport(eyre::Report),

    /// The response body was not the JSON we expected.
    #[error("failed to parse response: {0}")]
    Parse(#[from] serde_json::Error),

    /// The token provider failed to produce a fresh access token.
    #[error("failed to obtain access token: {0:#}")]
    Token(eyre::Report),

    /// A registered handler returned an error or panicked.
    #[error("handler for {category} failed: {message}")]
    HandlerFault {
        category: &'static str,
        message: String,
    },
}

impl Error {
    /// Whether this error ends ingestion permanently.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::FeedEnded)
    }

    /// Whether this error is the loop's own cancellation.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Server-supplied minimum delay before the next attempt, if any.
    pub fn retry_hint(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
