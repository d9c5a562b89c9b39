//! Per-operator resolution state machine.
//!
//! A button press on a notification opens a pending resolution for that
//! operator; their next free-text message becomes the resolution remark.
//! Pressing the same button again toggles the flow off, pressing a
//! different complaint's button switches the pending entry over to it,
//! and the literal word "cancel" aborts. Entries die with the process;
//! no timeout is enforced.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use ombud_browser::SessionHandle;
use ombud_channel::{InboundEvent, Notifier};
use ombud_ledger::Ledger;
use ombud_portal::resolve;
use ombud_types::Config;

/// Callback payload prefix carried by the notification button.
const RESOLVE_PREFIX: &str = "resolve:";

/// Keyword that aborts a pending resolution (case-insensitive, trimmed).
const CANCEL_KEYWORD: &str = "cancel";

/// Marker line in the notification text that precedes the complainant
/// name, used as a fallback when the ledger has no cached name.
const NAME_MARKER: &str = "\u{1F464} ";

/// A half-finished "mark resolved" interaction.
#[derive(Debug, Clone)]
struct PendingResolution {
    display_id: String,
    /// Chat message id of the original notification.
    message_id: String,
    /// Notification text at press time (name extraction fallback).
    original_text: String,
    /// Prompt message to delete once the operator replies; 0 when the
    /// prompt never went out (debug mode).
    prompt_message_id: i64,
}

/// Drives pending resolutions from inbound chat events.
pub struct ResolutionEngine {
    ledger: Arc<Ledger>,
    notifier: Arc<Notifier>,
    sessions: Arc<SessionHandle>,
    cfg: Arc<Config>,
    pending: Mutex<HashMap<i64, PendingResolution>>,
}

impl ResolutionEngine {
    pub fn new(
        ledger: Arc<Ledger>,
        notifier: Arc<Notifier>,
        sessions: Arc<SessionHandle>,
        cfg: Arc<Config>,
    ) -> Self {
        Self {
            ledger,
            notifier,
            sessions,
            cfg,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Consume inbound events until cancellation.
    ///
    /// Event-handling failures are logged and never escalate; the next
    /// update is processed regardless.
    pub async fn run(
        &self,
        mut events: mpsc::Receiver<InboundEvent>,
        mut cancel: watch::Receiver<bool>,
    ) {
        info!("resolution engine started");
        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Some(event) => self.dispatch(event).await,
                        None => {
                            info!("inbound event channel closed, stopping resolution engine");
                            return;
                        }
                    }
                }
                _ = cancel.changed() => {
                    if *cancel.borrow() {
                        info!("resolution engine shutting down");
                        return;
                    }
                }
            }
        }
    }

    /// Route one inbound event.
    pub async fn dispatch(&self, event: InboundEvent) {
        match event {
            InboundEvent::ButtonPress {
                user_id,
                user_name,
                callback_id,
                data,
                message_id,
                message_text,
            } => {
                self.handle_button_press(user_id, &user_name, &callback_id, &data, message_id, message_text)
                    .await
            }
            InboundEvent::Reply {
                user_id,
                user_name,
                text,
            } => self.handle_reply(user_id, &user_name, &text).await,
        }
    }

    async fn handle_button_press(
        &self,
        user_id: i64,
        user_name: &str,
        callback_id: &str,
        data: &str,
        message_id: i64,
        message_text: String,
    ) {
        let Some(display_id) = data.strip_prefix(RESOLVE_PREFIX) else {
            warn!(data, "unrecognized callback payload");
            self.answer(callback_id, "Invalid action").await;
            return;
        };

        // Toggle-cancel on a second press of the same button; a press for
        // a different complaint replaces the pending entry.
        let previous = self.pending.lock().unwrap().remove(&user_id);
        if let Some(prev) = previous {
            self.delete_prompt(prev.prompt_message_id).await;
            if prev.display_id == display_id {
                info!(user = user_name, display_id, "resolution cancelled by toggle");
                self.answer(callback_id, "Resolution cancelled").await;
                return;
            }
            info!(
                user = user_name,
                from = %prev.display_id,
                to = display_id,
                "pending resolution switched to another complaint"
            );
        }

        let message_id_str = self.ledger.message_id(display_id);
        if message_id_str.is_empty() {
            warn!(display_id, "button press for a complaint the ledger does not know");
            self.answer(callback_id, "Error: message not found").await;
            return;
        }

        let cached_name = self.display_name(display_id, &message_text);
        let reply_to = if message_id > 0 {
            message_id.to_string()
        } else {
            message_id_str.clone()
        };

        let prompt_message_id = match self
            .notifier
            .send_prompt(display_id, &cached_name, &reply_to)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                warn!(display_id, error = %e, "failed to send remark prompt");
                self.answer(callback_id, "Error sending prompt").await;
                return;
            }
        };

        self.pending.lock().unwrap().insert(
            user_id,
            PendingResolution {
                display_id: display_id.to_string(),
                message_id: message_id_str,
                original_text: message_text,
                prompt_message_id,
            },
        );

        info!(user = user_name, display_id, "awaiting resolution remark");
        self.answer(callback_id, "Please send your remarks").await;
    }

    async fn handle_reply(&self, user_id: i64, user_name: &str, text: &str) {
        let Some(pending) = self.pending.lock().unwrap().remove(&user_id) else {
            return; // not part of a resolution flow
        };

        self.delete_prompt(pending.prompt_message_id).await;

        if text.trim().eq_ignore_ascii_case(CANCEL_KEYWORD) {
            info!(user = user_name, display_id = %pending.display_id, "resolution cancelled by keyword");
            self.send("\u{274C} Resolution cancelled.").await;
            return;
        }

        // The complaint may have been resolved concurrently (another
        // operator, or the resolved-elsewhere sweep).
        if self.ledger.is_new(&pending.display_id) {
            info!(display_id = %pending.display_id, "complaint already resolved");
            self.send(&format!(
                "\u{2139} Complaint <b>{}</b> was already resolved.",
                pending.display_id
            ))
            .await;
            return;
        }

        let portal_id = self.ledger.portal_id(&pending.display_id);
        if portal_id.is_empty() {
            warn!(display_id = %pending.display_id, "no portal id recorded, cannot resolve");
            self.send(&format!(
                "\u{274C} Error: Cannot resolve complaint {} (portal id not found).",
                pending.display_id
            ))
            .await;
            return;
        }

        info!(display_id = %pending.display_id, "calling portal resolution endpoint");
        let session = self.sessions.current().await;
        if let Err(e) = resolve::resolve_complaint(
            &session,
            &self.cfg.resolve_url(),
            &portal_id,
            text,
            self.cfg.debug_mode,
        )
        .await
        {
            warn!(display_id = %pending.display_id, error = %e, "portal resolution failed");
            self.send(&format!(
                "\u{274C} Failed to mark complaint {} as resolved on the portal: {e}\nPlease try again or contact support.",
                pending.display_id
            ))
            .await;
            return;
        }

        let name = self.display_name(&pending.display_id, &pending.original_text);
        if let Err(e) = self
            .notifier
            .edit_resolved(&pending.message_id, &pending.display_id, &name)
            .await
        {
            // The portal is updated but the chat still shows the complaint
            // as open; tell the operator instead of pretending otherwise.
            // The ledger entry stays, so the next resolved-elsewhere sweep
            // retries the edit.
            warn!(display_id = %pending.display_id, error = %e, "resolved on portal but edit failed");
            self.send(&format!(
                "\u{274C} Error updating the chat message for complaint {}. The complaint was marked as resolved on the portal.",
                pending.display_id
            ))
            .await;
            return;
        }

        match self.ledger.remove_if_present(&pending.display_id) {
            Ok(true) => info!(display_id = %pending.display_id, "complaint resolved and removed"),
            Ok(false) => info!(display_id = %pending.display_id, "ledger entry already removed"),
            Err(e) => warn!(display_id = %pending.display_id, error = %e, "failed to remove ledger entry"),
        }
    }

    /// Best display name: the ledger's cached name, falling back to the
    /// name line embedded in the notification text.
    fn display_name(&self, display_id: &str, original_text: &str) -> String {
        let cached = self.ledger.cached_name(display_id);
        if !cached.is_empty() {
            return cached;
        }
        extract_name(original_text).unwrap_or_default()
    }

    async fn delete_prompt(&self, prompt_message_id: i64) {
        if prompt_message_id > 0 {
            if let Err(e) = self.notifier.delete_message(prompt_message_id).await {
                warn!(prompt_message_id, error = %e, "failed to delete prompt message");
            }
        }
    }

    async fn answer(&self, callback_id: &str, text: &str) {
        if let Err(e) = self.notifier.answer_callback(callback_id, text).await {
            warn!(error = %e, "failed to answer callback query");
        }
    }

    async fn send(&self, text: &str) {
        if let Err(e) = self.notifier.send_plain(text).await {
            warn!(error = %e, "failed to send chat message");
        }
    }

    /// Number of in-flight pending resolutions (tests and diagnostics).
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}

/// Pull the complainant name out of a notification body.
fn extract_name(text: &str) -> Option<String> {
    let start = text.find(NAME_MARKER)? + NAME_MARKER.len();
    let rest = &text[start..];
    let name = rest.lines().next()?.trim();
    (!name.is_empty()).then(|| name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ombud_browser::{CdpClient, PortalSession};
    use ombud_channel::TelegramApi;
    use ombud_types::LedgerRecord;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn extracts_name_from_notification_text() {
        let text = "\u{1F4CB} Complaint : C1\n\n\u{1F464} Asha Patel\n\u{1F4DE} 987";
        assert_eq!(extract_name(text).as_deref(), Some("Asha Patel"));
        assert_eq!(extract_name("no marker here"), None);
        assert_eq!(extract_name("\u{1F464} \n"), None);
    }

    // -- async harness -----------------------------------------------------

    struct Harness {
        _dir: tempfile::TempDir,
        server: MockServer,
        engine: ResolutionEngine,
        ledger: Arc<Ledger>,
    }

    /// Engine wired to a wiremock Telegram, a temp ledger seeded with C1,
    /// and debug mode on so the portal resolution call is a logged no-op.
    async fn harness() -> Harness {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();

        let ledger = Arc::new(Ledger::open(dir.path().join("c.csv")).unwrap());
        ledger
            .save_batch(&[LedgerRecord {
                display_id: "C1".into(),
                message_id: "90".into(),
                portal_id: "456".into(),
                cached_name: "Asha Patel".into(),
            }])
            .unwrap();

        let api = Arc::new(TelegramApi::with_base_url("token", &server.uri()));
        let notifier = Arc::new(Notifier::new(Arc::clone(&api), -100, false));

        let cfg = Arc::new(
            Config::from_lookup(|key| {
                match key {
                    "PORTAL_USERNAME" => Some("u".into()),
                    "PORTAL_PASSWORD" => Some("p".into()),
                    "TELEGRAM_BOT_TOKEN" => Some("token".into()),
                    "TELEGRAM_CHAT_ID" => Some("-100".into()),
                    "DEBUG_MODE" => Some("true".into()),
                    _ => None,
                }
            })
            .unwrap(),
        );

        // Debug mode short-circuits the portal resolution call, so the
        // session only has to exist. A throwaway local WebSocket listener
        // stands in for the browser.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    if let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await {
                        use futures_util::StreamExt;
                        while ws.next().await.is_some() {}
                    }
                });
            }
        });
        let client = CdpClient::connect(&format!("ws://{addr}/"))
            .await
            .unwrap();
        let sessions = Arc::new(SessionHandle::new(PortalSession::from_client(client)));

        let engine = ResolutionEngine::new(Arc::clone(&ledger), notifier, sessions, cfg);
        Harness {
            _dir: dir,
            server,
            engine,
            ledger,
        }
    }

    fn press(data: &str) -> InboundEvent {
        InboundEvent::ButtonPress {
            user_id: 7,
            user_name: "Asha".into(),
            callback_id: "cb-1".into(),
            data: data.into(),
            message_id: 90,
            message_text: "\u{1F4CB} Complaint : C1\n\u{1F464} Asha Patel".into(),
        }
    }

    fn reply(text: &str) -> InboundEvent {
        InboundEvent::Reply {
            user_id: 7,
            user_name: "Asha".into(),
            text: text.into(),
        }
    }

    fn ok_message(id: i64) -> ResponseTemplate {
        ResponseTemplate::new(200)
            .set_body_json(json!({ "ok": true, "result": { "message_id": id } }))
    }

    fn ok_bool() -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({ "ok": true, "result": true }))
    }

    async fn mount_common(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/bottoken/sendMessage"))
            .respond_with(ok_message(91))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/bottoken/answerCallbackQuery"))
            .respond_with(ok_bool())
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/bottoken/deleteMessage"))
            .respond_with(ok_bool())
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/bottoken/editMessageText"))
            .respond_with(ok_message(90))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn button_press_creates_pending_and_prompts() {
        let h = harness().await;
        mount_common(&h.server).await;

        h.engine.dispatch(press("resolve:C1")).await;
        assert_eq!(h.engine.pending_count(), 1);

        // A force-reply prompt went out.
        let sent_prompt = h
            .server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .any(|r| {
                r.url.path().ends_with("/sendMessage")
                    && String::from_utf8_lossy(&r.body).contains("force_reply")
            });
        assert!(sent_prompt);
    }

    #[tokio::test]
    async fn resolve_via_chat_edits_and_removes() {
        let h = harness().await;
        mount_common(&h.server).await;

        h.engine.dispatch(press("resolve:C1")).await;
        h.engine.dispatch(reply("fixed the transformer")).await;

        assert_eq!(h.engine.pending_count(), 0);
        assert!(h.ledger.is_new("C1"), "C1 should be removed from the ledger");

        // The original message was edited to the RESOLVED template with an
        // empty keyboard.
        let requests = h.server.received_requests().await.unwrap();
        let edit = requests
            .iter()
            .find(|r| r.url.path().ends_with("/editMessageText"))
            .expect("no edit request");
        let body: serde_json::Value = serde_json::from_slice(&edit.body).unwrap();
        assert_eq!(body["message_id"], 90);
        assert!(body["text"].as_str().unwrap().contains("RESOLVED"));
        assert_eq!(body["reply_markup"]["inline_keyboard"], json!([]));
    }

    #[tokio::test]
    async fn toggle_cancel_clears_pending_and_deletes_prompt() {
        let h = harness().await;
        mount_common(&h.server).await;

        h.engine.dispatch(press("resolve:C1")).await;
        h.engine.dispatch(press("resolve:C1")).await;

        assert_eq!(h.engine.pending_count(), 0);
        assert!(!h.ledger.is_new("C1"), "toggle-cancel must not touch the ledger");

        let requests = h.server.received_requests().await.unwrap();
        let deleted = requests
            .iter()
            .any(|r| r.url.path().ends_with("/deleteMessage"));
        assert!(deleted, "prompt message should be deleted");
    }

    #[tokio::test]
    async fn cancel_keyword_aborts_without_resolving() {
        let h = harness().await;
        mount_common(&h.server).await;

        h.engine.dispatch(press("resolve:C1")).await;
        h.engine.dispatch(reply("  CANCEL  ")).await;

        assert_eq!(h.engine.pending_count(), 0);
        assert!(!h.ledger.is_new("C1"));
    }

    #[tokio::test]
    async fn reply_for_already_resolved_complaint_reports_it() {
        let h = harness().await;
        mount_common(&h.server).await;

        h.engine.dispatch(press("resolve:C1")).await;
        // Concurrent removal (e.g. the resolved-elsewhere sweep).
        h.ledger.remove("C1").unwrap();
        h.engine.dispatch(reply("fixed")).await;

        let requests = h.server.received_requests().await.unwrap();
        let informed = requests.iter().any(|r| {
            r.url.path().ends_with("/sendMessage")
                && String::from_utf8_lossy(&r.body).contains("already resolved")
        });
        assert!(informed);
    }

    #[tokio::test]
    async fn different_button_overwrites_pending() {
        let h = harness().await;
        mount_common(&h.server).await;
        h.ledger
            .save_batch(&[LedgerRecord {
                display_id: "C2".into(),
                message_id: "95".into(),
                portal_id: "457".into(),
                cached_name: "Ravi".into(),
            }])
            .unwrap();

        h.engine.dispatch(press("resolve:C1")).await;
        h.engine
            .dispatch(InboundEvent::ButtonPress {
                user_id: 7,
                user_name: "Asha".into(),
                callback_id: "cb-2".into(),
                data: "resolve:C2".into(),
                message_id: 95,
                message_text: "Complaint : C2".into(),
            })
            .await;

        assert_eq!(h.engine.pending_count(), 1);

        // Resolving now targets C2, not C1.
        h.engine.dispatch(reply("sorted")).await;
        assert!(h.ledger.is_new("C2"));
        assert!(!h.ledger.is_new("C1"));
    }

    #[tokio::test]
    async fn unknown_complaint_button_answers_error() {
        let h = harness().await;
        mount_common(&h.server).await;

        h.engine.dispatch(press("resolve:NOPE")).await;
        assert_eq!(h.engine.pending_count(), 0);
    }

    #[tokio::test]
    async fn stray_reply_is_ignored() {
        let h = harness().await;
        mount_common(&h.server).await;

        h.engine.dispatch(reply("hello bot")).await;
        assert_eq!(h.engine.pending_count(), 0);
        assert!(!h.ledger.is_new("C1"));
        // Nothing was sent in response.
        assert!(h.server.received_requests().await.unwrap().is_empty());
    }
}
