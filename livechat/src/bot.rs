//! High-level chat bot built on top of an ingestion loop.
//!
//! A [`Bot`] owns one [`IngestionLoop`] and turns its raw feed into semantic
//! [`ChatEvent`]s: text, Super Chats, memberships and so on. It also keeps
//! the shared [`HttpExecutor`] supplied with fresh access tokens, and exposes
//! the moderation actions a bot typically needs.
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use youtube_livechat::{Bot, BotConfig, PollConfig, PollLoop, ReqwestExecutor, StaticToken};
//! # async fn example() -> eyre::Result<()> {
//! let executor = Arc::new(ReqwestExecutor::default());
//! let feed = Arc::new(PollLoop::new(PollConfig::new("chat-id"), executor.clone()));
//! let tokens = Arc::new(StaticToken::new("ya29..."));
//! let bot = Bot::new(feed, executor, tokens, BotConfig::new("chat-id"));
//!
//! let _sub = bot.on_text(|message| {
//!     let text = message.snippet.display_message.as_deref().unwrap_or_default();
//!     println!("{}: {text}", message.author_name());
//!     Ok(())
//! });
//! bot.connect().await?;
//! # Ok(())
//! # }
//! ```

use crate::auth::TokenProvider;
use crate::cache::Cache;
use crate::config::{BotConfig, CacheConfig, Settings, Transport};
use crate::dispatch::{Category, Dispatchable, Dispatcher, Subscription};
use crate::error::{Error, Result};
use crate::ingest::{FeedCategory, FeedEvent, IngestionLoop, PollLoop, StreamLoop, reserve_quota};
use crate::lifecycle::State;
use crate::quota::QuotaLedger;
use crate::transport::{self, ApiRequest, HttpExecutor};
use crate::youtube_api::chat::{ChatMessage, MessageDetails};
use crate::youtube_api::moderation::{
    Created, InsertBan, InsertMessage, InsertModerator, Moderator, ModeratorList,
};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// A classified chat event.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    Connected,
    Text(ChatMessage),
    SuperChat(ChatMessage),
    SuperSticker(ChatMessage),
    /// A new or upgraded membership.
    Membership(ChatMessage),
    Milestone(ChatMessage),
    /// Someone bought memberships for others.
    Gift(ChatMessage),
    GiftReceived(ChatMessage),
    Deleted(ChatMessage),
    Banned(ChatMessage),
    Error(Arc<Error>),
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChatCategory {
    Text,
    SuperChat,
    SuperSticker,
    Membership,
    Milestone,
    Gift,
    GiftReceived,
    Delete,
    Ban,
    Error,
    Connect,
    Disconnect,
}

impl Category for ChatCategory {
    fn name(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::SuperChat => "super_chat",
            Self::SuperSticker => "super_sticker",
            Self::Membership => "membership",
            Self::Milestone => "milestone",
            Self::Gift => "gift",
            Self::GiftReceived => "gift_received",
            Self::Delete => "delete",
            Self::Ban => "ban",
            Self::Error => "error",
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
        }
    }
}

impl Dispatchable for ChatEvent {
    type Category = ChatCategory;
    const ERROR: ChatCategory = ChatCategory::Error;

    fn category(&self) -> ChatCategory {
        match self {
            Self::Connected => ChatCategory::Connect,
            Self::Text(_) => ChatCategory::Text,
            Self::SuperChat(_) => ChatCategory::SuperChat,
            Self::SuperSticker(_) => ChatCategory::SuperSticker,
            Self::Membership(_) => ChatCategory::Membership,
            Self::Milestone(_) => ChatCategory::Milestone,
            Self::Gift(_) => ChatCategory::Gift,
            Self::GiftReceived(_) => ChatCategory::GiftReceived,
            Self::Deleted(_) => ChatCategory::Delete,
            Self::Banned(_) => ChatCategory::Ban,
            Self::Error(_) => ChatCategory::Error,
            Self::Disconnected => ChatCategory::Disconnect,
        }
    }

    fn from_fault(fault: Error) -> Self {
        Self::Error(Arc::new(fault))
    }
}

impl ChatEvent {
    /// Sorts a raw chat event into its semantic category.
    ///
    /// Returns `None` for event types the bot does not surface, such as polls
    /// or members-only mode changes.
    pub fn classify(message: ChatMessage) -> Option<Self> {
        let event = match message.details() {
            MessageDetails::Text { .. } => Self::Text,
            MessageDetails::SuperChat { .. } => Self::SuperChat,
            MessageDetails::SuperSticker { .. } => Self::SuperSticker,
            MessageDetails::NewSponsor { .. } => Self::Membership,
            MessageDetails::MemberMilestone { .. } => Self::Milestone,
            MessageDetails::MembershipGifting { .. } => Self::Gift,
            MessageDetails::GiftMembershipReceived { .. } => Self::GiftReceived,
            MessageDetails::MessageDeleted { .. } => Self::Deleted,
            MessageDetails::UserBanned { .. } => Self::Banned,
            MessageDetails::Poll { .. }
            | MessageDetails::MessageRetracted
            | MessageDetails::ChatEnded
            | MessageDetails::SponsorOnlyModeStarted
            | MessageDetails::SponsorOnlyModeEnded
            | MessageDetails::Unknown => return None,
        };
        Some(event(message))
    }

    /// The chat message behind this event, if it has one.
    pub fn message(&self) -> Option<&ChatMessage> {
        match self {
            Self::Text(m)
            | Self::SuperChat(m)
            | Self::SuperSticker(m)
            | Self::Membership(m)
            | Self::Milestone(m)
            | Self::Gift(m)
            | Self::GiftReceived(m)
            | Self::Deleted(m)
            | Self::Banned(m) => Some(m),
            Self::Connected | Self::Error(_) | Self::Disconnected => None,
        }
    }
}

#[derive(Default)]
struct Connection {
    subscriptions: Vec<Subscription>,
    refresher: Option<(CancellationToken, JoinHandle<()>)>,
}

/// A live chat bot: classified events in, moderation actions out.
pub struct Bot {
    feed: Arc<dyn IngestionLoop>,
    executor: Arc<dyn HttpExecutor>,
    tokens: Arc<dyn TokenProvider>,
    ledger: Option<Arc<QuotaLedger>>,
    dispatcher: Dispatcher<ChatEvent>,
    moderators: Cache<Vec<Moderator>>,
    config: BotConfig,
    connection: Mutex<Connection>,
}

impl std::fmt::Debug for Bot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bot")
            .field("live_chat_id", &self.config.live_chat_id)
            .field("state", &self.feed.state())
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

impl Bot {
    pub fn new(
        feed: Arc<dyn IngestionLoop>,
        executor: Arc<dyn HttpExecutor>,
        tokens: Arc<dyn TokenProvider>,
        config: BotConfig,
    ) -> Self {
        Self {
            feed,
            executor,
            tokens,
            ledger: None,
            dispatcher: Dispatcher::new(),
            moderators: Cache::new(&CacheConfig::default()),
            config,
            connection: Mutex::new(Connection::default()),
        }
    }

    /// Builds the transport named in `settings`, sharing one quota ledger
    /// between the feed and the bot's own actions.
    pub fn from_settings(
        settings: &Settings,
        executor: Arc<dyn HttpExecutor>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        let ledger = Arc::new(QuotaLedger::new(&settings.quota));
        let feed: Arc<dyn IngestionLoop> = match settings.transport {
            Transport::Poll => Arc::new(
                PollLoop::new(settings.poll.clone(), Arc::clone(&executor))
                    .with_quota(Arc::clone(&ledger)),
            ),
            Transport::Stream => Arc::new(
                StreamLoop::new(settings.stream.clone(), Arc::clone(&executor))
                    .with_quota(Arc::clone(&ledger)),
            ),
        };
        Self::new(feed, executor, tokens, settings.bot.clone()).with_quota(ledger)
    }

    /// Charges every action against `ledger`.
    pub fn with_quota(mut self, ledger: Arc<QuotaLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn state(&self) -> State {
        self.feed.state()
    }

    pub fn is_connected(&self) -> bool {
        self.feed.state() == State::Running
    }

    pub fn feed(&self) -> &Arc<dyn IngestionLoop> {
        &self.feed
    }

    pub fn quota(&self) -> Option<&Arc<QuotaLedger>> {
        self.ledger.as_ref()
    }

    /// Installs a fresh token, wires the feed into the bot's handlers, and
    /// starts ingesting.
    ///
    /// Fails if the first token cannot be fetched. Later refresh failures are
    /// reported to `error` handlers and retried on the next tick.
    #[instrument(skip(self), fields(live_chat_id = %self.config.live_chat_id))]
    pub async fn connect(&self) -> Result<()> {
        let mut connection = self.connection.lock().await;
        if self.feed.state() != State::Stopped {
            return Err(Error::AlreadyRunning);
        }

        for subscription in connection.subscriptions.drain(..) {
            subscription.unsubscribe();
        }
        // a feed that ended on its own has already cancelled this
        stop_refresher(&mut connection).await;

        let token = fetch_token(self.tokens.as_ref(), self.config.refresh_timeout).await?;
        self.executor.set_access_token(token);

        let cancel = CancellationToken::new();
        connection.subscriptions = self.forward_feed(&cancel);
        self.feed.start().await?;

        let task = tokio::spawn(refresh_tokens(
            Arc::clone(&self.tokens),
            Arc::clone(&self.executor),
            self.dispatcher.clone(),
            self.config.refresh_interval,
            self.config.refresh_timeout,
            cancel.clone(),
        ));
        connection.refresher = Some((cancel, task));
        tracing::info!("bot connected");
        Ok(())
    }

    /// Stops ingesting and refreshing tokens.
    ///
    /// Handlers stay registered so they observe the final `disconnect`.
    pub async fn disconnect(&self) {
        let mut connection = self.connection.lock().await;
        self.feed.stop().await;
        stop_refresher(&mut connection).await;
        tracing::info!("bot disconnected");
    }

    /// Subscribes the bot's dispatcher to every feed category.
    ///
    /// The feed's `disconnect` also cancels `session`, so the token refresher
    /// never outlives the feed it was started with.
    fn forward_feed(&self, session: &CancellationToken) -> Vec<Subscription> {
        let feed = self.feed.dispatcher();
        let forward = |category: FeedCategory| {
            let bot = self.dispatcher.clone();
            let session = session.clone();
            feed.subscribe(category, move |event: &FeedEvent| {
                if matches!(event, FeedEvent::Disconnected) {
                    session.cancel();
                }
                let classified = match event {
                    FeedEvent::Connected => Some(ChatEvent::Connected),
                    FeedEvent::Message(m) => ChatEvent::classify(m.clone()),
                    FeedEvent::Deleted(m) => Some(ChatEvent::Deleted(m.clone())),
                    FeedEvent::Banned(m) => Some(ChatEvent::Banned(m.clone())),
                    FeedEvent::Error(e) => Some(ChatEvent::Error(Arc::clone(e))),
                    FeedEvent::Disconnected => Some(ChatEvent::Disconnected),
                };
                match classified {
                    Some(event) => bot.dispatch(event),
                    None => tracing::trace!("dropping unclassified chat event"),
                }
                Ok(())
            })
        };
        [
            FeedCategory::Message,
            FeedCategory::Delete,
            FeedCategory::Ban,
            FeedCategory::Error,
            FeedCategory::Connect,
            FeedCategory::Disconnect,
        ]
        .into_iter()
        .map(forward)
        .collect()
    }

    /// Registers `handler` for every event of `category`.
    pub fn subscribe<F>(&self, category: ChatCategory, handler: F) -> Subscription
    where
        F: Fn(&ChatEvent) -> eyre::Result<()> + Send + Sync + 'static,
    {
        self.dispatcher.subscribe(category, handler)
    }

    fn on_message<F>(&self, category: ChatCategory, handler: F) -> Subscription
    where
        F: Fn(&ChatMessage) -> eyre::Result<()> + Send + Sync + 'static,
    {
        self.dispatcher
            .subscribe(category, move |event| match event.message() {
                Some(message) => handler(message),
                None => Ok(()),
            })
    }

    pub fn on_text<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ChatMessage) -> eyre::Result<()> + Send + Sync + 'static,
    {
        self.on_message(ChatCategory::Text, handler)
    }

    pub fn on_super_chat<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ChatMessage) -> eyre::Result<()> + Send + Sync + 'static,
    {
        self.on_message(ChatCategory::SuperChat, handler)
    }

    pub fn on_super_sticker<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ChatMessage) -> eyre::Result<()> + Send + Sync + 'static,
    {
        self.on_message(ChatCategory::SuperSticker, handler)
    }

    pub fn on_membership<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ChatMessage) -> eyre::Result<()> + Send + Sync + 'static,
    {
        self.on_message(ChatCategory::Membership, handler)
    }

    pub fn on_milestone<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ChatMessage) -> eyre::Result<()> + Send + Sync + 'static,
    {
        self.on_message(ChatCategory::Milestone, handler)
    }

    pub fn on_gift<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ChatMessage) -> eyre::Result<()> + Send + Sync + 'static,
    {
        self.on_message(ChatCategory::Gift, handler)
    }

    pub fn on_gift_received<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ChatMessage) -> eyre::Result<()> + Send + Sync + 'static,
    {
        self.on_message(ChatCategory::GiftReceived, handler)
    }

    pub fn on_delete<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ChatMessage) -> eyre::Result<()> + Send + Sync + 'static,
    {
        self.on_message(ChatCategory::Delete, handler)
    }

    pub fn on_ban<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ChatMessage) -> eyre::Result<()> + Send + Sync + 'static,
    {
        self.on_message(ChatCategory::Ban, handler)
    }

    pub fn on_error<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&Error) -> eyre::Result<()> + Send + Sync + 'static,
    {
        self.dispatcher
            .subscribe(ChatCategory::Error, move |event| match event {
                ChatEvent::Error(e) => handler(e),
                _ => Ok(()),
            })
    }

    pub fn on_connect<F>(&self, handler: F) -> Subscription
    where
        F: Fn() -> eyre::Result<()> + Send + Sync + 'static,
    {
        self.dispatcher.subscribe(ChatCategory::Connect, move |_| handler())
    }

    pub fn on_disconnect<F>(&self, handler: F) -> Subscription
    where
        F: Fn() -> eyre::Result<()> + Send + Sync + 'static,
    {
        self.dispatcher.subscribe(ChatCategory::Disconnect, move |_| handler())
    }

    fn precheck(&self, operation: &str) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotRunning);
        }
        reserve_quota(self.ledger.as_deref(), operation)
    }

    async fn call<T: DeserializeOwned>(&self, operation: &str, request: ApiRequest) -> Result<T> {
        self.precheck(operation)?;
        transport::fetch_json(self.executor.as_ref(), request).await
    }

    async fn call_no_content(&self, operation: &str, request: ApiRequest) -> Result<()> {
        self.precheck(operation)?;
        transport::send(self.executor.as_ref(), request).await
    }

    /// Posts `text` to the chat and returns the new message's id.
    #[instrument(skip(self, text))]
    pub async fn send_message(&self, text: &str) -> Result<String> {
        let request = ApiRequest::post("liveChat/messages")
            .query("part", "snippet")
            .json(&InsertMessage::text(&self.config.live_chat_id, text))?;
        let created: Created = self.call("liveChatMessages.insert", request).await?;
        Ok(created.id)
    }

    #[instrument(skip(self))]
    pub async fn delete_message(&self, message_id: &str) -> Result<()> {
        let request = ApiRequest::delete("liveChat/messages").query("id", message_id);
        self.call_no_content("liveChatMessages.delete", request).await
    }

    /// Bans `channel_id` permanently and returns the ban's id.
    #[instrument(skip(self))]
    pub async fn ban(&self, channel_id: &str) -> Result<String> {
        let body = InsertBan::permanent(&self.config.live_chat_id, channel_id);
        self.insert_ban(body).await
    }

    /// Bans `channel_id` for `duration` and returns the ban's id.
    #[instrument(skip(self))]
    pub async fn timeout(&self, channel_id: &str, duration: Duration) -> Result<String> {
        let body = InsertBan::temporary(&self.config.live_chat_id, channel_id, duration);
        self.insert_ban(body).await
    }

    async fn insert_ban(&self, body: InsertBan<'_>) -> Result<String> {
        let request = ApiRequest::post("liveChat/bans")
            .query("part", "snippet")
            .json(&body)?;
        let created: Created = self.call("liveChatBans.insert", request).await?;
        Ok(created.id)
    }

    /// Lifts the ban with id `ban_id`, as returned by [`Self::ban`].
    #[instrument(skip(self))]
    pub async fn unban(&self, ban_id: &str) -> Result<()> {
        let request = ApiRequest::delete("liveChat/bans").query("id", ban_id);
        self.call_no_content("liveChatBans.delete", request).await
    }

    /// Makes `channel_id` a moderator and returns the moderator resource id.
    #[instrument(skip(self))]
    pub async fn add_moderator(&self, channel_id: &str) -> Result<String> {
        let request = ApiRequest::post("liveChat/moderators")
            .query("part", "snippet")
            .json(&InsertModerator::new(&self.config.live_chat_id, channel_id))?;
        let created: Created = self.call("liveChatModerators.insert", request).await?;
        self.moderators.delete(&self.config.live_chat_id);
        Ok(created.id)
    }

    /// Removes the moderator with resource id `moderator_id`.
    #[instrument(skip(self))]
    pub async fn remove_moderator(&self, moderator_id: &str) -> Result<()> {
        let request = ApiRequest::delete("liveChat/moderators").query("id", moderator_id);
        self.call_no_content("liveChatModerators.delete", request).await?;
        self.moderators.delete(&self.config.live_chat_id);
        Ok(())
    }

    /// Lists the chat's moderators.
    ///
    /// Listing is expensive in quota, so results are cached for a few
    /// minutes and dropped whenever this bot adds or removes a moderator.
    pub async fn moderators(&self) -> Result<Vec<Moderator>> {
        // a cached list must not answer for a disconnected bot
        if !self.is_connected() {
            return Err(Error::NotRunning);
        }
        let live_chat_id = &self.config.live_chat_id;
        self.moderators
            .get_or_set(live_chat_id, || async {
                let mut all = Vec::new();
                let mut page_token = None;
                loop {
                    let request = ApiRequest::get("liveChat/moderators")
                        .query("liveChatId", live_chat_id)
                        .query("part", "snippet")
                        .query("maxResults", "50")
                        .query_opt("pageToken", page_token.take());
                    let page: ModeratorList =
                        self.call("liveChatModerators.list", request).await?;
                    all.extend(page.items);
                    match page.next_page_token {
                        Some(next) if !next.is_empty() => page_token = Some(next),
                        _ => break,
                    }
                }
                Ok::<_, Error>(all)
            })
            .await
    }
}

async fn fetch_token(tokens: &dyn TokenProvider, deadline: Duration) -> Result<String> {
    match tokio::time::timeout(deadline, tokens.access_token()).await {
        Ok(Ok(token)) => Ok(token),
        Ok(Err(e)) => Err(Error::Token(e)),
        Err(_) => Err(Error::Token(eyre::eyre!(
            "token provider did not answer within {deadline:?}"
        ))),
    }
}

async fn stop_refresher(connection: &mut Connection) {
    if let Some((cancel, task)) = connection.refresher.take() {
        cancel.cancel();
        if let Err(e) = task.await
            && e.is_panic()
        {
            tracing::error!(error = %e, "token refresher panicked");
        }
    }
}

/// Installs a fresh token every `interval` until cancelled.
async fn refresh_tokens(
    tokens: Arc<dyn TokenProvider>,
    executor: Arc<dyn HttpExecutor>,
    dispatcher: Dispatcher<ChatEvent>,
    interval: Duration,
    deadline: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let fetched = tokio::select! {
            _ = cancel.cancelled() => break,
            fetched = fetch_token(tokens.as_ref(), deadline) => fetched,
        };
        match fetched {
            Ok(token) => {
                tracing::debug!("installed refreshed access token");
                executor.set_access_token(token);
            }
            Err(e) => {
                tracing::warn!(error = %e, "token refresh failed, will retry next tick");
                dispatcher.dispatch(ChatEvent::Error(Arc::new(e)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PollConfig;
    use crate::mock::{ScriptedExecutor, ScriptedTokens};
    use serde_json::json;

    fn message(kind: &str, details: serde_json::Value) -> ChatMessage {
        let mut snippet = json!({
            "type": kind,
            "liveChatId": "chat-1",
            "publishedAt": "2025-01-01T00:00:00Z",
        });
        if let (Some(snippet), Some(details)) = (snippet.as_object_mut(), details.as_object()) {
            snippet.extend(details.clone());
        }
        serde_json::from_value(json!({ "id": "m1", "snippet": snippet })).unwrap()
    }

    #[test]
    fn classification() {
        let cases = [
            (
                message("textMessageEvent", json!({ "textMessageDetails": { "messageText": "hi" } })),
                Some(ChatCategory::Text),
            ),
            (
                message(
                    "superChatEvent",
                    json!({ "superChatDetails": {
                        "amountMicros": "5000000", "currency": "USD",
                        "amountDisplayString": "$5.00", "tier": 2
                    } }),
                ),
                Some(ChatCategory::SuperChat),
            ),
            (
                message(
                    "newSponsorEvent",
                    json!({ "newSponsorDetails": { "memberLevelName": "Gold" } }),
                ),
                Some(ChatCategory::Membership),
            ),
            (
                message(
                    "membershipGiftingEvent",
                    json!({ "membershipGiftingDetails": {
                        "giftMembershipsCount": 5, "giftMembershipsLevelName": "Gold"
                    } }),
                ),
                Some(ChatCategory::Gift),
            ),
            (
                message(
                    "messageDeletedEvent",
                    json!({ "messageDeletedDetails": { "deletedMessageId": "x" } }),
                ),
                Some(ChatCategory::Delete),
            ),
            (
                message(
                    "superStickerEvent",
                    json!({ "superStickerDetails": {
                        "superStickerMetadata": { "stickerId": "s1", "altText": "wave" },
                        "amountMicros": "2000000", "currency": "EUR",
                        "amountDisplayString": "€2.00", "tier": 1
                    } }),
                ),
                Some(ChatCategory::SuperSticker),
            ),
            (
                message(
                    "memberMilestoneChatEvent",
                    json!({ "memberMilestoneChatDetails": {
                        "memberMonth": 12, "memberLevelName": "Gold"
                    } }),
                ),
                Some(ChatCategory::Milestone),
            ),
            (
                message(
                    "giftMembershipReceivedEvent",
                    json!({ "giftMembershipReceivedDetails": {
                        "memberLevelName": "Gold",
                        "gifterChannelId": "UCgifter",
                        "associatedMembershipGiftingMessageId": "g1"
                    } }),
                ),
                Some(ChatCategory::GiftReceived),
            ),
            (
                message(
                    "userBannedEvent",
                    json!({ "userBannedDetails": {
                        "bannedUserDetails": { "channelId": "UCbad", "displayName": "Troll" },
                        "banType": "permanent"
                    } }),
                ),
                Some(ChatCategory::Ban),
            ),
            (
                message(
                    "pollEvent",
                    json!({ "pollDetails": {
                        "metadata": { "questionText": "Best map?" },
                        "status": "active"
                    } }),
                ),
                None,
            ),
            (message("sponsorOnlyModeStartedEvent", json!({})), None),
            (message("brandNewEvent", json!({})), None),
        ];

        for (message, expected) in cases {
            let tag = message.details().tag();
            let got = ChatEvent::classify(message).map(|e| e.category());
            assert_eq!(got, expected, "{tag}");
        }
    }

    fn bot() -> (Bot, Arc<ScriptedExecutor>) {
        let executor = Arc::new(ScriptedExecutor::new());
        let feed = Arc::new(PollLoop::new(
            PollConfig::new("chat-1"),
            Arc::clone(&executor) as Arc<dyn HttpExecutor>,
        ));
        let bot = Bot::new(
            feed,
            Arc::clone(&executor) as Arc<dyn HttpExecutor>,
            Arc::new(ScriptedTokens::new()),
            BotConfig::new("chat-1"),
        );
        (bot, executor)
    }

    #[tokio::test]
    async fn actions_require_a_connection() {
        let (bot, executor) = bot();
        assert!(matches!(bot.send_message("hi").await, Err(Error::NotRunning)));
        assert!(matches!(bot.delete_message("m1").await, Err(Error::NotRunning)));
        assert!(matches!(bot.ban("UCx").await, Err(Error::NotRunning)));
        assert!(matches!(
            bot.timeout("UCx", Duration::from_secs(60)).await,
            Err(Error::NotRunning)
        ));
        assert!(matches!(bot.unban("b1").await, Err(Error::NotRunning)));
        assert!(matches!(bot.add_moderator("UCx").await, Err(Error::NotRunning)));
        assert!(matches!(bot.remove_moderator("mod1").await, Err(Error::NotRunning)));
        assert!(matches!(bot.moderators().await, Err(Error::NotRunning)));
        assert!(executor.requests().is_empty());
    }

    #[tokio::test]
    async fn failed_first_token_aborts_connect() {
        let executor = Arc::new(ScriptedExecutor::new());
        let tokens = Arc::new(ScriptedTokens::new());
        tokens.fail_next("credentials revoked");
        let feed = Arc::new(PollLoop::new(
            PollConfig::new("chat-1"),
            Arc::clone(&executor) as Arc<dyn HttpExecutor>,
        ));
        let bot = Bot::new(
            feed,
            Arc::clone(&executor) as Arc<dyn HttpExecutor>,
            tokens,
            BotConfig::new("chat-1"),
        );

        let err = bot.connect().await.unwrap_err();
        assert!(matches!(err, Error::Token(_)), "{err:?}");
        assert_eq!(bot.state(), State::Stopped);
        assert!(executor.requests().is_empty());
    }
}
