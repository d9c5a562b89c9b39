//! Outbound message templates and the debug-mode short circuit.

use std::sync::Arc;

use chrono::Local;
use tracing::info;

use ombud_types::{ComplaintDetail, OmbudError};

use crate::api::TelegramApi;
use crate::types::{empty_keyboard, resolve_keyboard, ForceReply};

/// Outbound side of the chat gateway.
///
/// In debug mode every method logs what it would have sent and returns a
/// neutral value without touching the network; sends report an empty
/// message id, so nothing reaches the ledger's durability gate.
pub struct Notifier {
    api: Arc<TelegramApi>,
    chat_id: i64,
    debug: bool,
}

impl Notifier {
    pub fn new(api: Arc<TelegramApi>, chat_id: i64, debug: bool) -> Self {
        Self { api, chat_id, debug }
    }

    /// Announce a new complaint with its "Mark as Resolved" button.
    ///
    /// Returns the chat message id, the ledger's durability gate.
    pub async fn send_complaint(&self, detail: &ComplaintDetail) -> Result<String, OmbudError> {
        let text = format_complaint(detail);
        if self.debug {
            info!(display_id = %detail.display_id, "debug mode: complaint notification\n{text}");
            return Ok(String::new());
        }

        let markup = serde_json::to_value(resolve_keyboard(&detail.display_id))
            .map_err(|e| OmbudError::Chat(format!("serialize keyboard: {e}")))?;
        let id = self
            .api
            .send_message(self.chat_id, &text, Some(markup), None)
            .await?;
        Ok(id.to_string())
    }

    /// Plain-text alert for exhausted retries; no button.
    pub async fn send_critical_alert(
        &self,
        kind: &str,
        message: &str,
        retries: u32,
    ) -> Result<(), OmbudError> {
        let text = format!(
            "\u{1F6A8} <b>CRITICAL ALERT - OMBUD SERVICE</b>\n\n\
             <b>Error Type:</b> {kind}\n\
             <b>Error Message:</b> {message}\n\
             <b>Retry Attempts:</b> {retries}\n\
             <b>Timestamp:</b> {}\n\n\
             \u{26A0} <b>Action Required:</b> Please check the service immediately.",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
        );
        if self.debug {
            info!("debug mode: critical alert\n{text}");
            return Ok(());
        }
        self.api.send_message(self.chat_id, &text, None, None).await?;
        Ok(())
    }

    /// Rewrite a notification to its RESOLVED form and strip the button.
    ///
    /// A no-op when `message_id` is empty (degraded ledger rows).
    pub async fn edit_resolved(
        &self,
        message_id: &str,
        display_id: &str,
        cached_name: &str,
    ) -> Result<(), OmbudError> {
        if message_id.is_empty() {
            info!(display_id, "no message id recorded, skipping resolved edit");
            return Ok(());
        }
        let name = if cached_name.is_empty() { "Unknown" } else { cached_name };
        let text = format!(
            "\u{2705} <b>RESOLVED</b>\n\n\
             Complaint #{display_id}\n\
             \u{1F464} {name}\n\
             \u{1F550} {}",
            Local::now().format("%d %b %Y, %I:%M %p"),
        );
        if self.debug {
            info!(display_id, message_id, "debug mode: resolved edit\n{text}");
            return Ok(());
        }

        let id = parse_message_id(message_id)?;
        let markup = serde_json::to_value(empty_keyboard())
            .map_err(|e| OmbudError::Chat(format!("serialize keyboard: {e}")))?;
        self.api
            .edit_message_text(self.chat_id, id, &text, Some(markup))
            .await
    }

    /// Ask the operator for a resolution remark via force-reply.
    ///
    /// Returns the prompt's message id so it can be deleted later.
    pub async fn send_prompt(
        &self,
        display_id: &str,
        cached_name: &str,
        reply_to: &str,
    ) -> Result<i64, OmbudError> {
        let name = if cached_name.is_empty() { "Unknown" } else { cached_name };
        let text = format!(
            "\u{1F4DD} Remarks for complaint <b>{display_id}</b>\n\u{1F464} {name}:"
        );
        if self.debug {
            info!(display_id, "debug mode: remark prompt\n{text}");
            return Ok(0);
        }

        let markup = serde_json::to_value(ForceReply {
            force_reply: true,
            input_field_placeholder: Some("Enter resolution details...".to_string()),
        })
        .map_err(|e| OmbudError::Chat(format!("serialize markup: {e}")))?;

        self.api
            .send_message(self.chat_id, &text, Some(markup), parse_message_id(reply_to).ok())
            .await
    }

    /// Send a plain HTML message (cancellations, error replies).
    pub async fn send_plain(&self, text: &str) -> Result<(), OmbudError> {
        if self.debug {
            info!("debug mode: message\n{text}");
            return Ok(());
        }
        self.api.send_message(self.chat_id, text, None, None).await?;
        Ok(())
    }

    /// Delete a previously sent message (prompt cleanup).
    pub async fn delete_message(&self, message_id: i64) -> Result<(), OmbudError> {
        if self.debug {
            info!(message_id, "debug mode: delete message");
            return Ok(());
        }
        self.api.delete_message(self.chat_id, message_id).await
    }

    /// Acknowledge a button press.
    pub async fn answer_callback(&self, callback_id: &str, text: &str) -> Result<(), OmbudError> {
        if self.debug {
            info!(callback_id, text, "debug mode: callback answer");
            return Ok(());
        }
        self.api.answer_callback_query(callback_id, Some(text)).await
    }
}

fn parse_message_id(raw: &str) -> Result<i64, OmbudError> {
    raw.trim()
        .parse()
        .map_err(|_| OmbudError::Chat(format!("invalid message id {raw:?}")))
}

/// Render the operator-facing notification for one complaint.
pub fn format_complaint(d: &ComplaintDetail) -> String {
    format!(
        "\u{1F4CB} Complaint : {}\n\n\
         \u{1F464} {}\n\
         \u{1F4DE} {}\n\
         \u{1F194} Consumer: {}\n\
         \u{1F4C5} {}\n\n\
         \u{1F4AC} <b>Details:</b>\n{}\n\n\
         \u{1F4CD} {}, {}",
        d.display_id,
        d.complainant_name,
        d.mobile_number,
        d.consumer_id,
        d.filed_at,
        d.description,
        d.exact_location,
        d.area,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn detail() -> ComplaintDetail {
        ComplaintDetail {
            display_id: "C1".into(),
            consumer_id: "67890".into(),
            complainant_name: "Asha Patel".into(),
            mobile_number: "9876543210".into(),
            description: "No power since morning".into(),
            filed_at: "2026-07-30".into(),
            exact_location: "Near the school".into(),
            area: "Ward 4".into(),
        }
    }

    fn notifier(server_uri: &str, debug: bool) -> Notifier {
        Notifier::new(
            Arc::new(TelegramApi::with_base_url("token", server_uri)),
            -100,
            debug,
        )
    }

    #[test]
    fn complaint_template_includes_every_field() {
        let text = format_complaint(&detail());
        for expected in [
            "C1",
            "Asha Patel",
            "9876543210",
            "67890",
            "2026-07-30",
            "No power since morning",
            "Near the school",
            "Ward 4",
        ] {
            assert!(text.contains(expected), "missing {expected:?} in {text}");
        }
    }

    #[tokio::test]
    async fn send_complaint_returns_message_id_and_button() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bottoken/sendMessage"))
            .and(body_partial_json(json!({
                "reply_markup": {
                    "inline_keyboard": [[{ "callback_data": "resolve:C1" }]]
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": { "message_id": 90 }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let id = notifier(&server.uri(), false)
            .send_complaint(&detail())
            .await
            .unwrap();
        assert_eq!(id, "90");
    }

    #[tokio::test]
    async fn debug_mode_sends_nothing() {
        // No mock server mounted: any HTTP call would fail the test.
        let n = notifier("http://127.0.0.1:1", true);
        assert_eq!(n.send_complaint(&detail()).await.unwrap(), "");
        n.send_critical_alert("Fetch/Login Failure", "boom", 2).await.unwrap();
        n.edit_resolved("90", "C1", "Asha").await.unwrap();
        assert_eq!(n.send_prompt("C1", "Asha", "90").await.unwrap(), 0);
        n.send_plain("hello").await.unwrap();
        n.delete_message(91).await.unwrap();
        n.answer_callback("cb-1", "ok").await.unwrap();
    }

    #[tokio::test]
    async fn edit_resolved_strips_keyboard() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bottoken/editMessageText"))
            .and(body_partial_json(json!({
                "message_id": 90,
                "reply_markup": { "inline_keyboard": [] }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": { "message_id": 90 }
            })))
            .expect(1)
            .mount(&server)
            .await;

        notifier(&server.uri(), false)
            .edit_resolved("90", "C1", "Asha Patel")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn edit_resolved_with_empty_message_id_is_noop() {
        // Unroutable server: an HTTP call would error, a no-op succeeds.
        notifier("http://127.0.0.1:1", false)
            .edit_resolved("", "C1", "Asha")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn prompt_uses_force_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bottoken/sendMessage"))
            .and(body_partial_json(json!({
                "reply_to_message_id": 90,
                "reply_markup": { "force_reply": true }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": { "message_id": 91 }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let prompt_id = notifier(&server.uri(), false)
            .send_prompt("C1", "Asha Patel", "90")
            .await
            .unwrap();
        assert_eq!(prompt_id, 91);
    }
}
