//! Wire types for the live chat endpoints of the YouTube Data API v3.

pub mod chat;
pub mod moderation;

pub use chat::{Author, ChatMessage, ChatMessageList, ChatMessageSnippet, MessageDetails};
