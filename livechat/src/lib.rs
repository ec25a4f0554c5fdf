//! Live chat ingestion for YouTube broadcasts.
//!
//! The crate is layered bottom-up:
//!
//! - [`backoff`], [`quota`], [`cache`] and [`dispatch`] are standalone
//!   building blocks: retry delays, daily quota accounting, a TTL cache, and
//!   a fault-isolating handler registry.
//! - [`lifecycle`] is the start/stop state machine shared by the loops in
//!   [`ingest`], which pull raw chat events over either a polling or a
//!   streaming transport.
//! - [`bot`] wraps one loop into a [`Bot`] that classifies events, keeps
//!   access tokens fresh, and performs moderation actions.
//!
//! All network access goes through a [`transport::HttpExecutor`], so any of
//! the above can be driven without a network; see the `mock` feature.

pub mod auth;
pub mod backoff;
pub mod bot;
pub mod cache;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod ingest;
pub mod lifecycle;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod quota;
pub mod transport;
pub mod youtube_api;

pub use auth::{OAuthRefresher, StaticToken, TokenProvider};
pub use bot::{Bot, ChatCategory, ChatEvent};
pub use config::{
    BackoffConfig, BotConfig, CacheConfig, PollConfig, QuotaConfig, Settings, StreamConfig,
    Transport,
};
pub use dispatch::{Dispatcher, Subscription};
pub use error::{Error, Result};
pub use ingest::{FeedCategory, FeedEvent, IngestionLoop, PollLoop, StreamLoop};
pub use lifecycle::State;
pub use quota::QuotaLedger;
pub use transport::{HttpExecutor, ReqwestExecutor};
