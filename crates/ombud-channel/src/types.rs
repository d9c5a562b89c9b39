//! Wire types for the Telegram Bot API.
//!
//! Only the fields this gateway reads are deserialized; everything else
//! in the upstream payloads is ignored.

use serde::{Deserialize, Serialize};

/// Generic Bot API response wrapper.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub description: Option<String>,
    pub result: Option<T>,
}

/// One update from `getUpdates`.
#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub callback_query: Option<CallbackQuery>,
}

/// An incoming or sent message.
#[derive(Debug, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub from: Option<User>,
    pub chat: Chat,
    pub text: Option<String>,
}

/// A Telegram user.
#[derive(Debug, Deserialize)]
pub struct User {
    pub id: i64,
    pub first_name: String,
    pub username: Option<String>,
}

/// A Telegram chat.
#[derive(Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

/// A callback query from an inline keyboard button press.
#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    pub message: Option<Message>,
    pub data: Option<String>,
}

/// Sent-message result; only the id matters here.
#[derive(Debug, Deserialize)]
pub struct SentMessage {
    pub message_id: i64,
}

/// Inline keyboard markup.
#[derive(Debug, Clone, Serialize)]
pub struct InlineKeyboardMarkup {
    pub inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

/// A single inline keyboard button.
#[derive(Debug, Clone, Serialize)]
pub struct InlineKeyboardButton {
    pub text: String,
    pub callback_data: String,
}

/// Markup that prompts the user to reply directly to the bot's message.
#[derive(Debug, Clone, Serialize)]
pub struct ForceReply {
    pub force_reply: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_field_placeholder: Option<String>,
}

/// A one-button keyboard carrying `resolve:<displayId>`.
pub fn resolve_keyboard(display_id: &str) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup {
        inline_keyboard: vec![vec![InlineKeyboardButton {
            text: "\u{2705} Mark as Resolved".to_string(),
            callback_data: format!("resolve:{display_id}"),
        }]],
    }
}

/// An empty keyboard; editing a message with this strips its buttons.
pub fn empty_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup {
        inline_keyboard: Vec::new(),
    }
}
