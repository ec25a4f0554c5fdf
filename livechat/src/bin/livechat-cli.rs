use eyre::{Context, OptionExt};
use std::io::IsTerminal;
use std::sync::Arc;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use youtube_livechat::youtube_api::ChatMessage;
use youtube_livechat::{Bot, OAuthRefresher, ReqwestExecutor, Settings, StaticToken, TokenProvider};

const USAGE: &str = "usage: livechat-cli <settings.json> [live-chat-id]

Credentials come from the environment: either YOUTUBE_ACCESS_TOKEN, or
YOUTUBE_CLIENT_ID, YOUTUBE_CLIENT_SECRET and YOUTUBE_REFRESH_TOKEN.";

fn tokens_from_env() -> eyre::Result<Arc<dyn TokenProvider>> {
    if let Ok(token) = std::env::var("YOUTUBE_ACCESS_TOKEN") {
        return Ok(Arc::new(StaticToken::new(token)));
    }
    let var = |name: &str| std::env::var(name).with_context(|| format!("read ${name}"));
    let refresher = OAuthRefresher::new(
        var("YOUTUBE_CLIENT_ID")?,
        var("YOUTUBE_CLIENT_SECRET")?,
        var("YOUTUBE_REFRESH_TOKEN")?,
    )?;
    Ok(Arc::new(refresher))
}

fn text_of(message: &ChatMessage) -> &str {
    message.snippet.display_message.as_deref().unwrap_or("")
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_ansi(std::io::stdout().is_terminal())
        .init();

    let mut args = std::env::args().skip(1);
    let path = args.next().ok_or_eyre(USAGE)?;
    let mut settings = Settings::load(&path).await?;
    if let Some(live_chat_id) = args.next() {
        settings.bot.live_chat_id = live_chat_id.clone();
        settings.poll.live_chat_id = live_chat_id.clone();
        settings.stream.live_chat_id = live_chat_id;
    }
    if settings.bot.live_chat_id.is_empty() {
        eyre::bail!("no live chat id given\n\n{USAGE}");
    }

    let tokens = tokens_from_env().context("set up credentials")?;
    let executor = Arc::new(ReqwestExecutor::default());
    let bot = Bot::from_settings(&settings, executor, tokens);

    let _subscriptions = [
        bot.on_connect(|| {
            tracing::info!("connected to live chat");
            Ok(())
        }),
        bot.on_text(|m| {
            tracing::info!(author = m.author_name(), "{}", text_of(m));
            Ok(())
        }),
        bot.on_super_chat(|m| {
            tracing::info!(author = m.author_name(), "super chat: {}", text_of(m));
            Ok(())
        }),
        bot.on_super_sticker(|m| {
            tracing::info!(author = m.author_name(), "super sticker: {}", text_of(m));
            Ok(())
        }),
        bot.on_membership(|m| {
            tracing::info!(author = m.author_name(), "new member: {}", text_of(m));
            Ok(())
        }),
        bot.on_milestone(|m| {
            tracing::info!(author = m.author_name(), "milestone: {}", text_of(m));
            Ok(())
        }),
        bot.on_gift(|m| {
            tracing::info!(author = m.author_name(), "gifted: {}", text_of(m));
            Ok(())
        }),
        bot.on_gift_received(|m| {
            tracing::info!(author = m.author_name(), "gift received: {}", text_of(m));
            Ok(())
        }),
        bot.on_delete(|m| {
            tracing::info!(id = %m.id, "message deleted: {}", text_of(m));
            Ok(())
        }),
        bot.on_ban(|m| {
            tracing::info!(id = %m.id, "user banned: {}", text_of(m));
            Ok(())
        }),
        bot.on_error(|e| {
            tracing::warn!(error = %e, "live chat error");
            Ok(())
        }),
        bot.on_disconnect(|| {
            tracing::info!("disconnected from live chat");
            Ok(())
        }),
    ];

    bot.connect().await.context("connect to live chat")?;
    tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;
    bot.disconnect().await;

    if let Some(cursor) = bot.feed().cursor() {
        tracing::info!(%cursor, "resume from this page token next time");
    }
    if let Some(ledger) = bot.quota() {
        let usage = ledger.usage();
        tracing::info!(
            used = usage.used,
            limit = usage.limit,
            resets_at = %usage.resets_at,
            "quota usage"
        );
    }
    Ok(())
}
