// chat.rs: Streaming response reconciler.
//
// Owns the conversation transcript, sends one prompt at a time to the remote
// chat session and folds the reply fragments into a single assistant message
// as they arrive. Observers get snapshots or a `ChatEvent` feed.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::Mutex as TokioMutex;

use crate::ai::{AiProvider, ChatSession, Role};
use crate::locale;

/// Id of the seed greeting inserted by [`ChatReconciler::initialize`].
pub const GREETING_ID: &str = "initial";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationMessage {
    pub id: String,
    pub role: Role,
    pub text: String,
}

impl ConversationMessage {
    fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            text: text.into(),
        }
    }
}

/// How an assistant message was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamOutcome {
    Completed,
    Failed,
}

/// Transcript mutations, in the order they happen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ChatEvent {
    Reset { messages: Vec<ConversationMessage> },
    MessageAdded { message: ConversationMessage },
    /// `text` is the cumulative reply so far, not the new fragment.
    MessageUpdated { id: String, text: String },
    MessageClosed { id: String, outcome: StreamOutcome },
}

/// Why a submission was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    EmptyMessage,
    ReplyInFlight,
    NotInitialized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Rejected(Rejection),
    Closed(StreamOutcome),
}

/// An accepted submission whose reply has not been streamed yet.
#[must_use = "an accepted turn keeps the reconciler locked until it is streamed"]
pub struct Turn {
    message: String,
    reply_id: String,
}

impl Turn {
    pub fn reply_id(&self) -> &str {
        &self.reply_id
    }
}

#[derive(Default)]
struct ReconcilerState {
    messages: Vec<ConversationMessage>,
    /// Assistant message currently receiving fragments.
    open: Option<String>,
    initialized: bool,
}

pub struct ChatReconciler {
    provider: Arc<dyn AiProvider>,
    system_instruction: String,
    state: Mutex<ReconcilerState>,
    session: TokioMutex<Option<Box<dyn ChatSession>>>,
    events: Mutex<Option<mpsc::UnboundedSender<ChatEvent>>>,
}

impl ChatReconciler {
    pub fn new(provider: Arc<dyn AiProvider>, system_instruction: impl Into<String>) -> Self {
        Self {
            provider,
            system_instruction: system_instruction.into(),
            state: Mutex::new(ReconcilerState::default()),
            session: TokioMutex::new(None),
            events: Mutex::new(None),
        }
    }

    fn state(&self) -> MutexGuard<'_, ReconcilerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: ChatEvent) {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = events.as_ref() {
            if tx.send(event).is_err() {
                *events = None;
            }
        }
    }

    /// Receive every transcript mutation from now on. A new subscriber
    /// replaces the previous one.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ChatEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.events.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        rx
    }

    /// Start a fresh remote conversation and reset the transcript to the
    /// greeting. Any reply still streaming is orphaned and its late
    /// fragments are dropped.
    pub async fn initialize(&self) {
        let session = self.provider.start_chat(&self.system_instruction);
        *self.session.lock().await = Some(session);

        let messages = vec![ConversationMessage {
            id: GREETING_ID.to_string(),
            role: Role::Assistant,
            text: locale::GREETING.to_string(),
        }];
        {
            let mut state = self.state();
            state.messages = messages.clone();
            state.open = None;
            state.initialized = true;
        }
        log::info!("Chat initialized with {}", self.provider.name());
        self.emit(ChatEvent::Reset { messages });
    }

    pub fn transcript(&self) -> Vec<ConversationMessage> {
        self.state().messages.clone()
    }

    pub fn is_streaming(&self) -> bool {
        self.state().open.is_some()
    }

    /// Accept a message if nothing is in flight: append the user message and
    /// an empty, open assistant message. Synchronous, no network activity.
    pub fn begin(&self, message_text: &str) -> Result<Turn, Rejection> {
        if message_text.trim().is_empty() {
            return Err(Rejection::EmptyMessage);
        }

        let user = ConversationMessage::new(Role::User, message_text);
        let reply = ConversationMessage::new(Role::Assistant, "");
        {
            let mut state = self.state();
            if !state.initialized {
                return Err(Rejection::NotInitialized);
            }
            if state.open.is_some() {
                return Err(Rejection::ReplyInFlight);
            }
            state.messages.push(user.clone());
            state.messages.push(reply.clone());
            state.open = Some(reply.id.clone());
        }

        let turn = Turn {
            message: message_text.to_string(),
            reply_id: reply.id.clone(),
        };
        self.emit(ChatEvent::MessageAdded { message: user });
        self.emit(ChatEvent::MessageAdded { message: reply });
        Ok(turn)
    }

    /// Stream the reply for an accepted turn into its assistant message.
    /// Failures never escape: they become the localized apology.
    pub async fn stream_reply(&self, turn: Turn) -> StreamOutcome {
        let Turn { message, reply_id } = turn;

        let stream = {
            let mut session = self.session.lock().await;
            match session.as_mut() {
                Some(session) => session.send_message_stream(&message).await,
                None => Err(crate::ai::AiError::ModelError("chat not initialized".into())),
            }
        };

        let outcome = match stream {
            Ok(mut stream) => {
                let mut full_response = String::new();
                let mut outcome = StreamOutcome::Completed;
                while let Some(chunk) = stream.next_chunk().await {
                    match chunk {
                        Ok(fragment) => {
                            full_response.push_str(&fragment);
                            if !self.apply_fragment(&reply_id, &full_response) {
                                log::warn!("Dropping fragments for closed message {reply_id}");
                                break;
                            }
                        }
                        Err(e) => {
                            log::error!("Chat stream error: {e}");
                            outcome = StreamOutcome::Failed;
                            break;
                        }
                    }
                }
                outcome
            }
            Err(e) => {
                log::error!("Error sending message: {e}");
                StreamOutcome::Failed
            }
        };

        self.close(&reply_id, outcome);
        outcome
    }

    /// `begin` followed by `stream_reply`.
    pub async fn submit(&self, message_text: &str) -> SubmitOutcome {
        match self.begin(message_text) {
            Ok(turn) => SubmitOutcome::Closed(self.stream_reply(turn).await),
            Err(rejection) => {
                log::debug!("Submission rejected: {rejection:?}");
                SubmitOutcome::Rejected(rejection)
            }
        }
    }

    /// Replace the open message's text with the cumulative reply. Returns
    /// false if `id` is no longer the open message.
    fn apply_fragment(&self, id: &str, cumulative: &str) -> bool {
        {
            let mut state = self.state();
            if state.open.as_deref() != Some(id) {
                return false;
            }
            match state.messages.iter_mut().find(|m| m.id == id) {
                Some(message) => message.text = cumulative.to_string(),
                None => return false,
            }
        }
        self.emit(ChatEvent::MessageUpdated {
            id: id.to_string(),
            text: cumulative.to_string(),
        });
        true
    }

    fn close(&self, id: &str, outcome: StreamOutcome) {
        {
            let mut state = self.state();
            if state.open.as_deref() != Some(id) {
                return;
            }
            if outcome == StreamOutcome::Failed {
                if let Some(message) = state.messages.iter_mut().find(|m| m.id == id) {
                    message.text = locale::CHAT_FAILURE.to_string();
                }
            }
            state.open = None;
        }
        if outcome == StreamOutcome::Failed {
            self.emit(ChatEvent::MessageUpdated {
                id: id.to_string(),
                text: locale::CHAT_FAILURE.to_string(),
            });
        }
        self.emit(ChatEvent::MessageClosed {
            id: id.to_string(),
            outcome,
        });
    }
}
