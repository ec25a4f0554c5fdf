//! Live chat message resources.
//!
//! See: <https://developers.google.com/youtube/v3/live/docs/liveChatMessages#resource>

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Response body of `liveChatMessages.list`, and of each event on a
/// `liveChatMessages.streamList` connection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageList {
    #[serde(default)]
    pub items: Vec<ChatMessage>,
    /// Cursor to pass as `pageToken` on the next request.
    pub next_page_token: Option<String>,
    /// How long the server would like us to wait before polling again.
    pub polling_interval_millis: Option<u64>,
    /// Set once the broadcast has gone offline; no further messages will arrive.
    pub offline_at: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_poll_item: Option<serde_json::Value>,
}

/// One chat event: a message, a paid highlight, a moderation notice, and so on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub snippet: ChatMessageSnippet,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_details: Option<Author>,
}

impl ChatMessage {
    pub fn details(&self) -> &MessageDetails {
        &self.snippet.details
    }

    /// Author display name, or `"Anonymous"` for system events.
    pub fn author_name(&self) -> &str {
        self.author_details
            .as_ref()
            .map_or("Anonymous", |a| a.display_name.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageSnippet {
    pub live_chat_id: String,
    #[serde(default)]
    pub author_channel_id: String,
    pub published_at: Timestamp,
    /// Rendered text. Absent for events that have nothing to display.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_message: Option<String>,
    #[serde(flatten)]
    pub details: MessageDetails,
}

/// The type-specific payload of a chat event, keyed by `snippet.type`.
///
/// Modelled as a tagged union so a payload can only exist alongside the tag
/// it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum MessageDetails {
    #[serde(rename = "textMessageEvent")]
    Text { text_message_details: TextDetails },
    /// Super Chat: a paid, highlighted message.
    #[serde(rename = "superChatEvent")]
    SuperChat { super_chat_details: SuperChatDetails },
    /// Super Sticker: a paid animated sticker.
    #[serde(rename = "superStickerEvent")]
    SuperSticker {
        super_sticker_details: SuperStickerDetails,
    },
    /// A viewer joined or upgraded a membership.
    #[serde(rename = "newSponsorEvent")]
    NewSponsor { new_sponsor_details: NewSponsorDetails },
    #[serde(rename = "memberMilestoneChatEvent")]
    MemberMilestone {
        member_milestone_chat_details: MemberMilestoneDetails,
    },
    /// A viewer bought memberships for others.
    #[serde(rename = "membershipGiftingEvent")]
    MembershipGifting {
        membership_gifting_details: MembershipGiftingDetails,
    },
    /// A viewer received one of the memberships bought by a gifter.
    #[serde(rename = "giftMembershipReceivedEvent")]
    GiftMembershipReceived {
        gift_membership_received_details: GiftReceivedDetails,
    },
    /// A moderator removed a message.
    #[serde(rename = "messageDeletedEvent")]
    MessageDeleted {
        message_deleted_details: MessageDeletedDetails,
    },
    #[serde(rename = "userBannedEvent")]
    UserBanned { user_banned_details: UserBannedDetails },
    #[serde(rename = "pollEvent")]
    Poll { poll_details: PollDetails },
    #[serde(rename = "messageRetractedEvent")]
    MessageRetracted,
    #[serde(rename = "chatEndedEvent")]
    ChatEnded,
    #[serde(rename = "sponsorOnlyModeStartedEvent")]
    SponsorOnlyModeStarted,
    #[serde(rename = "sponsorOnlyModeEndedEvent")]
    SponsorOnlyModeEnded,
    /// Any event type this crate does not know about yet.
    #[serde(other)]
    Unknown,
}

impl MessageDetails {
    /// The provider's tag for this event type.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Text { .. } => "textMessageEvent",
            Self::SuperChat { .. } => "superChatEvent",
            Self::SuperSticker { .. } => "superStickerEvent",
            Self::NewSponsor { .. } => "newSponsorEvent",
            Self::MemberMilestone { .. } => "memberMilestoneChatEvent",
            Self::MembershipGifting { .. } => "membershipGiftingEvent",
            Self::GiftMembershipReceived { .. } => "giftMembershipReceivedEvent",
            Self::MessageDeleted { .. } => "messageDeletedEvent",
            Self::UserBanned { .. } => "userBannedEvent",
            Self::Poll { .. } => "pollEvent",
            Self::MessageRetracted => "messageRetractedEvent",
            Self::ChatEnded => "chatEndedEvent",
            Self::SponsorOnlyModeStarted => "sponsorOnlyModeStartedEvent",
            Self::SponsorOnlyModeEnded => "sponsorOnlyModeEndedEvent",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for MessageDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Snapshot of the author at the time the message was sent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    pub channel_id: String,
    #[serde(default)]
    pub channel_url: String,
    pub display_name: String,
    #[serde(default)]
    pub profile_image_url: String,
    #[serde(default)]
    pub is_verified: bool,
    /// The broadcaster.
    #[serde(default)]
    pub is_chat_owner: bool,
    /// A channel member.
    #[serde(default)]
    pub is_chat_sponsor: bool,
    #[serde(default)]
    pub is_chat_moderator: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextDetails {
    pub message_text: String,
}

/// Amounts are in micros of `currency`, carried as strings by the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuperChatDetails {
    pub amount_micros: String,
    pub currency: String,
    pub amount_display_string: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_comment: Option<String>,
    pub tier: u32,
}

impl SuperChatDetails {
    /// Amount in whole currency units, or `None` if the API sent garbage.
    pub fn amount(&self) -> Option<f64> {
        micros_to_units(&self.amount_micros)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuperStickerDetails {
    pub super_sticker_metadata: SuperStickerMetadata,
    pub amount_micros: String,
    pub currency: String,
    pub amount_display_string: String,
    pub tier: u32,
}

impl SuperStickerDetails {
    pub fn amount(&self) -> Option<f64> {
        micros_to_units(&self.amount_micros)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuperStickerMetadata {
    pub sticker_id: String,
    pub alt_text: String,
    #[serde(default)]
    pub language: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSponsorDetails {
    pub member_level_name: String,
    #[serde(default)]
    pub is_upgrade: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberMilestoneDetails {
    pub user_comment: Option<String>,
    pub member_month: u32,
    pub member_level_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipGiftingDetails {
    pub gift_memberships_count: u32,
    pub gift_memberships_level_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GiftReceivedDetails {
    pub member_level_name: String,
    pub gifter_channel_id: String,
    pub associated_membership_gifting_message_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDeletedDetails {
    pub deleted_message_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserBannedDetails {
    pub banned_user_details: BannedUser,
    /// `"permanent"` or `"temporary"`.
    pub ban_type: String,
    pub ban_duration_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BannedUser {
    pub channel_id: String,
    #[serde(default)]
    pub channel_url: String,
    pub display_name: String,
    #[serde(default)]
    pub profile_image_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollDetails {
    pub metadata: PollMetadata,
    /// `"active"` or `"closed"`.
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollMetadata {
    pub question_text: String,
    #[serde(default)]
    pub options: Vec<PollOption>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollOption {
    pub option_text: String,
    #[serde(default)]
    pub tally: String,
}

fn micros_to_units(micros: &str) -> Option<f64> {
    micros.parse::<u64>().ok().map(|m| m as f64 / 1_000_000.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(details: serde_json::Value) -> serde_json::Value {
        let mut snippet = json!({
            "liveChatId": "chat-1",
            "authorChannelId": "UC123",
            "publishedAt": "2024-05-01T18:30:00Z",
            "displayMessage": "hello",
        });
        snippet
            .as_object_mut()
            .unwrap()
            .extend(details.as_object().unwrap().clone());
        json!({
            "id": "m1",
            "snippet": snippet,
            "authorDetails": {
                "channelId": "UC123",
                "displayName": "Viewer",
                "profileImageUrl": "https://example.com/a.png",
                "isVerified": false,
                "isChatOwner": false,
                "isChatSponsor": true,
                "isChatModerator": false
            }
        })
    }

    #[test]
    fn parses_text_message() {
        let raw = message(json!({
            "type": "textMessageEvent",
            "hasDisplayContent": true,
            "textMessageDetails": { "messageText": "hello" }
        }));
        let msg: ChatMessage = serde_json::from_value(raw).unwrap();
        let MessageDetails::Text {
            text_message_details,
        } = msg.details()
        else {
            panic!("expected text, got {}", msg.details());
        };
        assert_eq!(text_message_details.message_text, "hello");
        assert_eq!(msg.author_name(), "Viewer");
        assert!(msg.author_details.unwrap().is_chat_sponsor);
    }

    #[test]
    fn parses_super_chat_amount() {
        let raw = message(json!({
            "type": "superChatEvent",
            "superChatDetails": {
                "amountMicros": "1750000",
                "currency": "USD",
                "amountDisplayString": "$1.75",
                "userComment": "gg",
                "tier": 2
            }
        }));
        let msg: ChatMessage = serde_json::from_value(raw).unwrap();
        let MessageDetails::SuperChat { super_chat_details } = msg.details() else {
            panic!("expected super chat");
        };
        assert_eq!(super_chat_details.amount(), Some(1.75));
        assert_eq!(super_chat_details.user_comment.as_deref(), Some("gg"));
    }

    #[test]
    fn parses_ban_and_delete() {
        let ban: ChatMessage = serde_json::from_value(message(json!({
            "type": "userBannedEvent",
            "userBannedDetails": {
                "bannedUserDetails": {
                    "channelId": "UCbad",
                    "displayName": "Troll"
                },
                "banType": "temporary",
                "banDurationSeconds": 300
            }
        })))
        .unwrap();
        let MessageDetails::UserBanned { user_banned_details } = ban.details() else {
            panic!("expected ban, got {}", ban.details());
        };
        assert_eq!(user_banned_details.banned_user_details.channel_id, "UCbad");
        assert_eq!(user_banned_details.banned_user_details.display_name, "Troll");
        assert_eq!(user_banned_details.ban_type, "temporary");
        assert_eq!(user_banned_details.ban_duration_seconds, Some(300));

        let del: ChatMessage = serde_json::from_value(message(json!({
            "type": "messageDeletedEvent",
            "messageDeletedDetails": { "deletedMessageId": "m0" }
        })))
        .unwrap();
        assert!(matches!(
            del.details(),
            MessageDetails::MessageDeleted { message_deleted_details } if message_deleted_details.deleted_message_id == "m0"
        ));
    }

    #[test]
    fn parses_super_sticker() {
        let msg: ChatMessage = serde_json::from_value(message(json!({
            "type": "superStickerEvent",
            "superStickerDetails": {
                "superStickerMetadata": {
                    "stickerId": "sticker-7",
                    "altText": "A waving cat",
                    "language": "en"
                },
                "amountMicros": "2500000",
                "currency": "EUR",
                "amountDisplayString": "€2.50",
                "tier": 1
            }
        })))
        .unwrap();
        let MessageDetails::SuperSticker {
            super_sticker_details,
        } = msg.details()
        else {
            panic!("expected super sticker, got {}", msg.details());
        };
        assert_eq!(super_sticker_details.amount(), Some(2.5));
        assert_eq!(super_sticker_details.super_sticker_metadata.sticker_id, "sticker-7");
        assert_eq!(super_sticker_details.super_sticker_metadata.alt_text, "A waving cat");
    }

    #[test]
    fn parses_member_milestone() {
        let msg: ChatMessage = serde_json::from_value(message(json!({
            "type": "memberMilestoneChatEvent",
            "memberMilestoneChatDetails": {
                "userComment": "a year already",
                "memberMonth": 12,
                "memberLevelName": "Gold"
            }
        })))
        .unwrap();
        let MessageDetails::MemberMilestone {
            member_milestone_chat_details: details,
        } = msg.details()
        else {
            panic!("expected milestone, got {}", msg.details());
        };
        assert_eq!(details.member_month, 12);
        assert_eq!(details.member_level_name, "Gold");
        assert_eq!(details.user_comment.as_deref(), Some("a year already"));

        // the comment is optional
        let quiet: ChatMessage = serde_json::from_value(message(json!({
            "type": "memberMilestoneChatEvent",
            "memberMilestoneChatDetails": { "memberMonth": 3, "memberLevelName": "Gold" }
        })))
        .unwrap();
        assert!(matches!(
            quiet.details(),
            MessageDetails::MemberMilestone { member_milestone_chat_details } if member_milestone_chat_details.user_comment.is_none()
        ));
    }

    #[test]
    fn parses_gift_received() {
        let msg: ChatMessage = serde_json::from_value(message(json!({
            "type": "giftMembershipReceivedEvent",
            "giftMembershipReceivedDetails": {
                "memberLevelName": "Gold",
                "gifterChannelId": "UCgifter",
                "associatedMembershipGiftingMessageId": "gift-1"
            }
        })))
        .unwrap();
        let MessageDetails::GiftMembershipReceived {
            gift_membership_received_details: details,
        } = msg.details()
        else {
            panic!("expected gift received, got {}", msg.details());
        };
        assert_eq!(details.gifter_channel_id, "UCgifter");
        assert_eq!(details.associated_membership_gifting_message_id, "gift-1");
        assert_eq!(details.member_level_name, "Gold");
    }

    #[test]
    fn parses_poll() {
        let msg: ChatMessage = serde_json::from_value(message(json!({
            "type": "pollEvent",
            "pollDetails": {
                "metadata": {
                    "questionText": "Best map?",
                    "options": [
                        { "optionText": "Dust", "tally": "14" },
                        { "optionText": "Mirage" }
                    ]
                },
                "status": "closed"
            }
        })))
        .unwrap();
        let MessageDetails::Poll { poll_details } = msg.details() else {
            panic!("expected poll, got {}", msg.details());
        };
        assert_eq!(poll_details.status, "closed");
        assert_eq!(poll_details.metadata.question_text, "Best map?");
        let tallies: Vec<_> = poll_details
            .metadata
            .options
            .iter()
            .map(|o| (o.option_text.as_str(), o.tally.as_str()))
            .collect();
        assert_eq!(tallies, [("Dust", "14"), ("Mirage", "")]);
    }

    #[test]
    fn unknown_types_do_not_break_parsing() {
        let raw = message(json!({ "type": "somethingNewEvent", "somethingNewDetails": {} }));
        let msg: ChatMessage = serde_json::from_value(raw).unwrap();
        assert!(matches!(msg.details(), MessageDetails::Unknown));

        let ended: ChatMessage =
            serde_json::from_value(message(json!({ "type": "chatEndedEvent" }))).unwrap();
        assert!(matches!(ended.details(), MessageDetails::ChatEnded));
    }

    #[test]
    fn list_response_defaults() {
        let list: ChatMessageList =
            serde_json::from_str(r#"{"nextPageToken": "abc", "pollingIntervalMillis": 5000}"#)
                .unwrap();
        assert!(list.items.is_empty());
        assert_eq!(list.next_page_token.as_deref(), Some("abc"));
        assert_eq!(list.polling_interval_millis, Some(5000));
        assert!(list.offline_at.is_none());
    }
}
