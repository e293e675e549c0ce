//! Turn handler: load, gate, commands, backend, save, reply.

use std::sync::Arc;

use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::auth::sso::{GateDecision, SsoGate};
use crate::backend::BackendAdapter;
use crate::bot::commands::Command;
use crate::conversation::session::ConversationSession;
use crate::conversation::store::ConversationStore;
use crate::conversation::turn::ConversationHistory;
use crate::core::config::BotConfig;
use crate::core::errors::{BotError, BotResult};
use crate::transport::activity::{Activity, ActivityType, InboundMessage};
use crate::transport::cards::citations_card;
use crate::transport::sink::ActivitySink;

/// Reply sent after `clear`.
pub const CLEARED_TEXT: &str = "Conversation cleared.";
/// First line of the error report.
pub const ERROR_TEXT: &str = "The bot encountered an error or bug.";
/// Second line of the error report.
pub const ERROR_HINT_TEXT: &str = "To continue to run this bot, please fix the bot source code.";

/// Handles one inbound activity at a time.
pub struct BotHandler {
    backend: BackendAdapter,
    store: Arc<dyn ConversationStore>,
    sso: Option<SsoGate>,
    instructions: String,
    welcome_message: String,
    max_turns: usize,
    debug: bool,
}

impl BotHandler {
    /// Create a handler. `sso` is consulted only when present and enabled.
    #[must_use]
    pub fn new(
        config: &BotConfig,
        backend: BackendAdapter,
        store: Arc<dyn ConversationStore>,
        sso: Option<SsoGate>,
    ) -> Self {
        Self {
            backend,
            store,
            sso: sso.filter(SsoGate::enabled),
            instructions: config.conversation.instructions.clone(),
            welcome_message: config.conversation.welcome_message.clone(),
            max_turns: config.conversation.max_turns,
            debug: config.debug,
        }
    }

    /// Configured backend.
    #[must_use]
    pub const fn backend(&self) -> &BackendAdapter {
        &self.backend
    }

    /// Process one activity. Message failures are reported to the user and
    /// swallowed; only a failure to deliver that report is returned.
    ///
    /// # Errors
    /// Returns an error if a reply cannot be delivered.
    pub async fn on_turn(&self, activity: &Activity, sink: &dyn ActivitySink) -> BotResult<()> {
        let turn_id = Uuid::new_v4();
        let span = info_span!(
            "turn",
            %turn_id,
            kind = ?activity.kind,
            channel = activity.channel_id.as_deref().unwrap_or_default(),
        );
        async {
            match activity.kind {
                ActivityType::ConversationUpdate => self.on_members_added(activity, sink).await,
                ActivityType::Message => match self.on_message(activity, sink).await {
                    Ok(()) => Ok(()),
                    Err(err) => self.report_error(&err, sink).await,
                },
                other => {
                    debug!(kind = ?other, "activity ignored");
                    Ok(())
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn on_members_added(&self, activity: &Activity, sink: &dyn ActivitySink) -> BotResult<()> {
        let joined = activity.members_joined().count();
        if joined == 0 {
            return Ok(());
        }
        info!(joined, "members added");
        for _ in 0..joined {
            sink.send_text(&self.welcome_message).await?;
        }
        if let Some(gate) = &self.sso {
            gate.ensure_signed_in(activity, sink).await?;
        }
        Ok(())
    }

    async fn on_message(&self, activity: &Activity, sink: &dyn ActivitySink) -> BotResult<()> {
        let Some(inbound) = InboundMessage::from_activity(activity) else {
            warn!("message without a conversation reference");
            return Ok(());
        };

        if let Some(gate) = &self.sso {
            if gate.check(activity, sink).await? == GateDecision::Handled {
                return Ok(());
            }
        }

        let key = inbound.conversation_key.as_str();
        let mut session = self.load(key).await?;
        let command = Command::parse(&inbound.text);

        if command == Some(Command::Clear) {
            session.reset();
            self.store.save(key, &session).await?;
            info!(%key, "conversation cleared");
            sink.send_text(CLEARED_TEXT).await?;
            return Ok(());
        }

        for attachment in &inbound.attachments {
            session.attachments.push(attachment.clone());
            self.backend
                .register_attachment(&mut session, attachment, sink)
                .await?;
        }

        if inbound.text.is_empty() {
            return self.store.save(key, &session).await;
        }

        if let Some(Command::Upload { tools, file_name }) = command {
            let feedback = match self
                .backend
                .attach_to_tools(&mut session, &tools, &file_name)
                .await
            {
                Ok(feedback) => feedback,
                Err(BotError::AttachmentNotFound(name)) => {
                    format!("The file {name} was not found in this conversation.")
                }
                Err(err) => return Err(err),
            };
            sink.send_text(&feedback).await?;
            return self.store.save(key, &session).await;
        }

        info!(%key, backend = %self.backend.kind(), "message received");
        let reply = self.backend.respond(&mut session, &inbound.text, sink).await?;
        if !reply.delivered {
            sink.send_text(&reply.text).await?;
        }
        if !reply.citations.is_empty() {
            sink.send(citations_card(&reply.citations)).await?;
        }
        self.store.save(key, &session).await
    }

    async fn load(&self, key: &str) -> BotResult<ConversationSession> {
        let default = ConversationSession::new(self.max_turns, &self.instructions);
        let mut session = self.store.get(key, default).await?;
        if session.history.is_empty() {
            session.history = ConversationHistory::with_instructions(
                session.history.max_turns(),
                &self.instructions,
            );
        }
        Ok(session)
    }

    async fn report_error(&self, err: &BotError, sink: &dyn ActivitySink) -> BotResult<()> {
        error!(error = %err, retryable = err.is_retryable(), "turn failed");
        sink.send_text(ERROR_TEXT).await?;
        sink.send_text(ERROR_HINT_TEXT).await?;
        if self.debug {
            sink.send_text(&err.to_string()).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use axum::Json;
    use axum::Router;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::post;
    use serde_json::{Value, json};

    use super::*;
    use crate::conversation::store::MemoryConversationStore;
    use crate::conversation::turn::TurnRole;
    use crate::core::config::{BackendKind, CustomEndpointConfig};
    use crate::test_support::{RecordingSink, serve};

    type Requests = Arc<Mutex<Vec<Value>>>;

    async fn endpoint(fail: bool) -> (String, Requests) {
        let seen = Requests::default();
        let router = Router::new()
            .route(
                "/score",
                post(
                    |State((seen, fail)): State<(Requests, bool)>, Json(body): Json<Value>| async move {
                        seen.lock().unwrap().push(body);
                        if fail {
                            return (StatusCode::BAD_GATEWAY, Json(json!({"error": "down"})));
                        }
                        (
                            StatusCode::OK,
                            Json(json!({"choices": [{"message": {"content": "pong"}}]})),
                        )
                    },
                ),
            )
            .with_state((Arc::clone(&seen), fail));
        (format!("{}/score", serve(router).await), seen)
    }

    async fn handler(fail: bool, debug: bool) -> (BotHandler, Arc<MemoryConversationStore>, Requests) {
        let (url, seen) = endpoint(fail).await;
        let mut config = BotConfig {
            backend: BackendKind::Phi,
            custom: CustomEndpointConfig {
                endpoint: Some(url),
                api_key: None,
            },
            debug,
            ..BotConfig::default()
        };
        config.conversation.instructions = "be brief".to_string();
        let backend = BackendAdapter::from_config(&config, &reqwest::Client::new()).unwrap();
        let store = Arc::new(MemoryConversationStore::new());
        let handler = BotHandler::new(&config, backend, Arc::clone(&store) as Arc<dyn ConversationStore>, None);
        (handler, store, seen)
    }

    fn message(text: &str) -> Activity {
        serde_json::from_value(json!({
            "type": "message",
            "id": "in-1",
            "text": text,
            "channelId": "msteams",
            "from": {"id": "user-1"},
            "recipient": {"id": "bot"},
            "conversation": {"id": "conv-1"}
        }))
        .unwrap()
    }

    const KEY: &str = "msteams/conversations/conv-1";

    #[tokio::test]
    async fn test_message_round_trip_saves_history() {
        let (handler, store, seen) = handler(false, false).await;
        let sink = RecordingSink::default();

        handler.on_turn(&message("ping"), &sink).await.unwrap();

        assert_eq!(sink.texts(), vec!["pong"]);
        let session = store.load(KEY).await.unwrap().unwrap();
        let roles: Vec<TurnRole> = session.history.iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![TurnRole::System, TurnRole::User, TurnRole::Assistant]);
        let sent = seen.lock().unwrap()[0]["messages"].clone();
        assert_eq!(sent[0]["content"], "be brief");
        assert_eq!(sent[1]["content"], "ping");
    }

    #[tokio::test]
    async fn test_clear_resets_the_session() {
        let (handler, store, _) = handler(false, false).await;
        let sink = RecordingSink::default();
        handler.on_turn(&message("ping"), &sink).await.unwrap();

        handler.on_turn(&message("clear"), &sink).await.unwrap();

        assert_eq!(sink.texts().last().map(String::as_str), Some(CLEARED_TEXT));
        let session = store.load(KEY).await.unwrap().unwrap();
        assert!(session.history.is_empty());
        assert!(session.thread_id.is_none());
    }

    #[tokio::test]
    async fn test_backend_error_is_reported_and_history_kept() {
        let (handler, store, _) = handler(true, true).await;
        let sink = RecordingSink::default();

        handler.on_turn(&message("ping"), &sink).await.unwrap();

        let texts = sink.texts();
        assert_eq!(texts[0], ERROR_TEXT);
        assert_eq!(texts[1], ERROR_HINT_TEXT);
        assert!(texts[2].contains("502"));
        assert!(store.load(KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_welcome_skips_the_bot() {
        let (handler, _, _) = handler(false, false).await;
        let sink = RecordingSink::default();
        let update: Activity = serde_json::from_value(json!({
            "type": "conversationUpdate",
            "channelId": "msteams",
            "recipient": {"id": "bot"},
            "conversation": {"id": "conv-1"},
            "membersAdded": [{"id": "bot"}, {"id": "user-1"}]
        }))
        .unwrap();

        handler.on_turn(&update, &sink).await.unwrap();
        assert_eq!(sink.texts(), vec!["Hello and welcome to the GenAI Bot!"]);
    }

    #[tokio::test]
    async fn test_attachment_only_message_is_recorded() {
        let (handler, store, seen) = handler(false, false).await;
        let sink = RecordingSink::default();
        let mut activity = message("");
        activity.attachments = vec![crate::transport::activity::ActivityAttachment {
            content_type: Some("image/png".to_string()),
            content_url: Some("https://files/cat.png".to_string()),
            ..Default::default()
        }];

        handler.on_turn(&activity, &sink).await.unwrap();

        assert!(sink.deliveries().is_empty());
        assert!(seen.lock().unwrap().is_empty());
        let session = store.load(KEY).await.unwrap().unwrap();
        assert_eq!(session.attachments[0].name, "cat.png");
    }

    #[tokio::test]
    async fn test_upload_command_unsupported_backend_reports_error() {
        let (handler, _, _) = handler(false, false).await;
        let sink = RecordingSink::default();

        handler
            .on_turn(&message("#UPLOAD_FILE#file_search#a.txt"), &sink)
            .await
            .unwrap();
        assert_eq!(sink.texts(), vec![ERROR_TEXT, ERROR_HINT_TEXT]);
    }
}
