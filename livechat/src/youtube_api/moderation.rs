//! Request bodies for chat actions: posting, bans and moderators.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Body of `liveChatMessages.insert`.
///
/// See: <https://developers.google.com/youtube/v3/live/docs/liveChatMessages/insert>
#[derive(Debug, Clone, Serialize)]
pub struct InsertMessage<'a> {
    pub snippet: InsertMessageSnippet<'a>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertMessageSnippet<'a> {
    pub live_chat_id: &'a str,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub text_message_details: InsertTextDetails<'a>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertTextDetails<'a> {
    pub message_text: &'a str,
}

impl<'a> InsertMessage<'a> {
    pub fn text(live_chat_id: &'a str, message_text: &'a str) -> Self {
        Self {
            snippet: InsertMessageSnippet {
                live_chat_id,
                kind: "textMessageEvent",
                text_message_details: InsertTextDetails { message_text },
            },
        }
    }
}

/// Body of `liveChatBans.insert`.
///
/// See: <https://developers.google.com/youtube/v3/live/docs/liveChatBans/insert>
#[derive(Debug, Clone, Serialize)]
pub struct InsertBan<'a> {
    pub snippet: InsertBanSnippet<'a>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertBanSnippet<'a> {
    pub live_chat_id: &'a str,
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ban_duration_seconds: Option<u64>,
    pub banned_user_details: ChannelRef<'a>,
}

impl<'a> InsertBan<'a> {
    pub fn permanent(live_chat_id: &'a str, channel_id: &'a str) -> Self {
        Self {
            snippet: InsertBanSnippet {
                live_chat_id,
                kind: "permanent",
                ban_duration_seconds: None,
                banned_user_details: ChannelRef { channel_id },
            },
        }
    }

    /// A timeout. Durations below one second are rounded up to one second.
    pub fn temporary(live_chat_id: &'a str, channel_id: &'a str, duration: Duration) -> Self {
        Self {
            snippet: InsertBanSnippet {
                live_chat_id,
                kind: "temporary",
                ban_duration_seconds: Some(duration.as_secs().max(1)),
                banned_user_details: ChannelRef { channel_id },
            },
        }
    }
}

/// Body of `liveChatModerators.insert`.
///
/// See: <https://developers.google.com/youtube/v3/live/docs/liveChatModerators/insert>
#[derive(Debug, Clone, Serialize)]
pub struct InsertModerator<'a> {
    pub snippet: InsertModeratorSnippet<'a>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertModeratorSnippet<'a> {
    pub live_chat_id: &'a str,
    pub moderator_details: ChannelRef<'a>,
}

impl<'a> InsertModerator<'a> {
    pub fn new(live_chat_id: &'a str, channel_id: &'a str) -> Self {
        Self {
            snippet: InsertModeratorSnippet {
                live_chat_id,
                moderator_details: ChannelRef { channel_id },
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelRef<'a> {
    pub channel_id: &'a str,
}

/// The part of any inserted resource we care about: its id.
#[derive(Debug, Clone, Deserialize)]
pub struct Created {
    pub id: String,
}

/// Response body of `liveChatModerators.list`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeratorList {
    #[serde(default)]
    pub items: Vec<Moderator>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Moderator {
    /// Pass this to `liveChatModerators.delete`; it is not the channel id.
    pub id: String,
    pub snippet: ModeratorSnippet,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeratorSnippet {
    pub moderator_details: ModeratorDetails,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeratorDetails {
    pub channel_id: String,
    pub display_name: String,
    #[serde(default)]
    pub channel_url: String,
    #[serde(default)]
    pub profile_image_url: String,
}
