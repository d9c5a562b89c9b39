//! HTTP layer of the Telegram gateway.
//!
//! Wraps reqwest for `sendMessage`, `editMessageText`, `deleteMessage`,
//! `answerCallbackQuery`, and `getUpdates`. All methods return typed
//! results. Messages use HTML parse mode throughout.

use std::time::Duration;

use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, warn};

use ombud_types::OmbudError;

use crate::types::{ApiResponse, SentMessage, Update};

/// HTTP timeout for every Bot API call. Must exceed the 30 s server-side
/// long-poll window on `getUpdates`.
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Low-level Telegram Bot API client.
pub struct TelegramApi {
    client: Client,
    base_url: String,
}

impl TelegramApi {
    /// Create a client for the given bot token.
    pub fn new(bot_token: &str) -> Self {
        Self::with_base_url(bot_token, "https://api.telegram.org")
    }

    /// Create a client against a custom base URL (for testing).
    pub fn with_base_url(bot_token: &str, base_url: &str) -> Self {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .expect("reqwest client construction cannot fail with static options");
        Self {
            client,
            base_url: format!("{}/bot{}", base_url.trim_end_matches('/'), bot_token),
        }
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        body: Value,
    ) -> Result<T, OmbudError> {
        debug!(method, "Telegram API call");

        let resp = self
            .client
            .post(format!("{}/{method}", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| OmbudError::Chat(format!("{method} request failed: {e}")))?;

        let api_resp: ApiResponse<T> = resp
            .json()
            .await
            .map_err(|e| OmbudError::Chat(format!("{method} returned invalid JSON: {e}")))?;

        if !api_resp.ok {
            let desc = api_resp.description.unwrap_or_default();
            warn!(method, error = %desc, "Telegram API error");
            return Err(OmbudError::Chat(format!("{method}: {desc}")));
        }

        api_resp
            .result
            .ok_or_else(|| OmbudError::Chat(format!("{method}: missing result")))
    }

    /// Send an HTML message; returns the new message's id.
    ///
    /// `reply_markup` takes any serialized markup (inline keyboard or
    /// force-reply). `reply_to` threads the message under an earlier one.
    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_markup: Option<Value>,
        reply_to: Option<i64>,
    ) -> Result<i64, OmbudError> {
        let mut body = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
            "disable_web_page_preview": true,
        });
        if let Some(markup) = reply_markup {
            body["reply_markup"] = markup;
        }
        if let Some(message_id) = reply_to {
            body["reply_to_message_id"] = json!(message_id);
        }

        let sent: SentMessage = self.call("sendMessage", body).await?;
        Ok(sent.message_id)
    }

    /// Replace the text (and optionally the keyboard) of an existing message.
    pub async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        reply_markup: Option<Value>,
    ) -> Result<(), OmbudError> {
        let mut body = json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "text": text,
            "parse_mode": "HTML",
        });
        if let Some(markup) = reply_markup {
            body["reply_markup"] = markup;
        }

        // editMessageText returns the edited Message (or `true` for inline
        // messages); the payload itself is not needed.
        let _: Value = self.call("editMessageText", body).await?;
        Ok(())
    }

    /// Delete a message.
    pub async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), OmbudError> {
        let _: Value = self
            .call(
                "deleteMessage",
                json!({ "chat_id": chat_id, "message_id": message_id }),
            )
            .await?;
        Ok(())
    }

    /// Acknowledge a callback query (dismisses the button spinner and
    /// optionally flashes a short notice to the user).
    pub async fn answer_callback_query(
        &self,
        callback_query_id: &str,
        text: Option<&str>,
    ) -> Result<(), OmbudError> {
        let mut body = json!({
            "callback_query_id": callback_query_id,
            "show_alert": false,
        });
        if let Some(t) = text {
            body["text"] = json!(t);
        }

        let _: Value = self.call("answerCallbackQuery", body).await?;
        Ok(())
    }

    /// Long-poll for updates.
    ///
    /// `offset` must be `last_update_id + 1` to acknowledge everything
    /// already processed.
    pub async fn get_updates(
        &self,
        offset: Option<i64>,
        timeout_secs: u64,
    ) -> Result<Vec<Update>, OmbudError> {
        let mut body = json!({
            "timeout": timeout_secs,
            "allowed_updates": ["message", "callback_query"],
        });
        if let Some(off) = offset {
            body["offset"] = json!(off);
        }

        self.call("getUpdates", body).await
    }
}
