//! Long-polling loop for inbound Telegram updates.
//!
//! Updates are filtered to the configured chat, converted into
//! [`InboundEvent`]s, and forwarded in ascending `update_id` order. The
//! update cursor (`offset = last_update_id + 1`) is process-local; the
//! platform re-delivers anything not yet acknowledged, and restart gaps
//! are acceptable.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::api::TelegramApi;

/// Server-side long-poll window for `getUpdates`.
const POLL_TIMEOUT_SECS: u64 = 30;

/// Fixed backoff after a failed poll.
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// One inbound operator interaction, ready for the resolution state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// An inline-keyboard button press.
    ButtonPress {
        user_id: i64,
        user_name: String,
        /// Callback query id; must be acknowledged.
        callback_id: String,
        /// Raw callback payload, e.g. `resolve:C1`.
        data: String,
        /// Id of the message the button was attached to.
        message_id: i64,
        /// Text of that message at press time.
        message_text: String,
    },
    /// A free-text message from an operator.
    Reply {
        user_id: i64,
        user_name: String,
        text: String,
    },
}

/// Run the long-polling loop until the cancellation token fires.
///
/// Events are sent through `event_tx`; a closed receiver stops the loop.
pub async fn poll_loop(
    api: Arc<TelegramApi>,
    chat_id: i64,
    event_tx: mpsc::Sender<InboundEvent>,
    mut cancel: watch::Receiver<bool>,
) {
    let mut offset: Option<i64> = None;

    info!(chat_id, "chat update poller started");

    loop {
        if *cancel.borrow() {
            info!("chat update poller shutting down");
            return;
        }

        let updates = tokio::select! {
            result = api.get_updates(offset, POLL_TIMEOUT_SECS) => result,
            _ = cancel.changed() => {
                info!("chat update poller cancelled");
                return;
            }
        };

        let updates = match updates {
            Ok(updates) => updates,
            Err(e) => {
                warn!(error = %e, "getUpdates failed, backing off");
                tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                continue;
            }
        };

        for update in updates {
            // Advance the cursor first so a bad update is never re-fetched.
            offset = Some(update.update_id + 1);

            if let Some(msg) = update.message {
                if msg.chat.id != chat_id {
                    debug!(from_chat = msg.chat.id, "ignoring message from another chat");
                    continue;
                }
                let (Some(from), Some(text)) = (msg.from, msg.text) else {
                    continue;
                };
                let event = InboundEvent::Reply {
                    user_id: from.id,
                    user_name: from.first_name,
                    text,
                };
                if event_tx.send(event).await.is_err() {
                    warn!("event channel closed, stopping poller");
                    return;
                }
            }

            if let Some(cb) = update.callback_query {
                let from_chat = cb.message.as_ref().map(|m| m.chat.id);
                if from_chat != Some(chat_id) {
                    debug!("ignoring callback from another chat");
                    // Still clear the spinner.
                    let _ = api.answer_callback_query(&cb.id, None).await;
                    continue;
                }
                let Some(data) = cb.data else {
                    continue;
                };
                let (message_id, message_text) = cb
                    .message
                    .map(|m| (m.message_id, m.text.unwrap_or_default()))
                    .unwrap_or_default();

                let event = InboundEvent::ButtonPress {
                    user_id: cb.from.id,
                    user_name: cb.from.first_name,
                    callback_id: cb.id,
                    data,
                    message_id,
                    message_text,
                };
                if event_tx.send(event).await.is_err() {
                    warn!("event channel closed, stopping poller");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn updates_response(result: serde_json::Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({ "ok": true, "result": result }))
    }

    async fn run_one_batch(server: &MockServer) -> Vec<InboundEvent> {
        let api = Arc::new(TelegramApi::with_base_url("token", &server.uri()));
        let (event_tx, mut event_rx) = mpsc::channel(16);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let poller = tokio::spawn(poll_loop(api, -100, event_tx, cancel_rx));

        let mut events = Vec::new();
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_secs(2), event_rx.recv()).await
        {
            events.push(event);
            if events.len() >= 2 {
                break;
            }
        }

        cancel_tx.send(true).unwrap();
        let _ = tokio::time::timeout(Duration::from_secs(2), poller).await;
        events
    }

    #[tokio::test]
    async fn forwards_messages_and_callbacks_in_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bottoken/getUpdates"))
            .respond_with(updates_response(json!([
                {
                    "update_id": 1,
                    "callback_query": {
                        "id": "cb-1",
                        "from": { "id": 7, "first_name": "Asha" },
                        "message": {
                            "message_id": 90,
                            "chat": { "id": -100 },
                            "text": "Complaint : C1"
                        },
                        "data": "resolve:C1"
                    }
                },
                {
                    "update_id": 2,
                    "message": {
                        "message_id": 91,
                        "from": { "id": 7, "first_name": "Asha" },
                        "chat": { "id": -100 },
                        "text": "fixed"
                    }
                }
            ])))
            .mount(&server)
            .await;

        let events = run_one_batch(&server).await;
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0],
            InboundEvent::ButtonPress { data, message_id: 90, .. } if data == "resolve:C1"
        ));
        assert!(matches!(
            &events[1],
            InboundEvent::Reply { text, user_id: 7, .. } if text == "fixed"
        ));
    }

    #[tokio::test]
    async fn ignores_traffic_from_other_chats() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bottoken/getUpdates"))
            .respond_with(updates_response(json!([
                {
                    "update_id": 1,
                    "message": {
                        "message_id": 10,
                        "from": { "id": 99, "first_name": "Mallory" },
                        "chat": { "id": -999 },
                        "text": "hi"
                    }
                }
            ])))
            .mount(&server)
            .await;

        let events = run_one_batch(&server).await;
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn advances_offset_after_processing() {
        let server = MockServer::start().await;
        // First call (no offset) delivers update 41; subsequent calls must
        // acknowledge with offset 42.
        Mock::given(method("POST"))
            .and(path("/bottoken/getUpdates"))
            .and(body_partial_json(json!({ "offset": 42 })))
            .respond_with(updates_response(json!([])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/bottoken/getUpdates"))
            .respond_with(updates_response(json!([
                {
                    "update_id": 41,
                    "message": {
                        "message_id": 10,
                        "from": { "id": 7, "first_name": "Asha" },
                        "chat": { "id": -100 },
                        "text": "note"
                    }
                }
            ])))
            .mount(&server)
            .await;

        let api = Arc::new(TelegramApi::with_base_url("token", &server.uri()));
        let (event_tx, mut event_rx) = mpsc::channel(16);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let poller = tokio::spawn(poll_loop(api, -100, event_tx, cancel_rx));

        // One event from the first batch; give the poller time to issue the
        // follow-up request that carries the advanced offset.
        let first = tokio::time::timeout(Duration::from_secs(2), event_rx.recv())
            .await
            .unwrap();
        assert!(first.is_some());
        tokio::time::sleep(Duration::from_millis(200)).await;

        cancel_tx.send(true).unwrap();
        let _ = tokio::time::timeout(Duration::from_secs(2), poller).await;

        let acknowledged = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.url.path().ends_with("/getUpdates"))
            .any(|r| {
                serde_json::from_slice::<serde_json::Value>(&r.body)
                    .ok()
                    .and_then(|b| b.get("offset").and_then(|o| o.as_i64()))
                    == Some(42)
            });
        assert!(acknowledged, "no getUpdates call carried offset 42");
    }
}
