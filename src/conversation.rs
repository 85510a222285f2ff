// conversation.rs: Chat mode as the user drives it: a text field that can be
// typed into or filled by dictation, a send action and a microphone toggle.

use std::sync::Arc;
use std::time::Duration;

use crate::chat::{ChatReconciler, ConversationMessage, Rejection, SubmitOutcome};
use crate::dictation::DictationBridge;

/// How long switching the microphone off waits for the recognizer to hand
/// over its last words.
pub const DICTATION_END_TIMEOUT: Duration = Duration::from_secs(3);

pub struct ConversationController {
    chat: Arc<ChatReconciler>,
    dictation: DictationBridge,
    pending_input: String,
    /// Last dictation transcript mirrored into the input.
    mirrored: String,
}

impl ConversationController {
    pub fn new(chat: Arc<ChatReconciler>, dictation: DictationBridge) -> Self {
        Self {
            chat,
            dictation,
            pending_input: String::new(),
            mirrored: String::new(),
        }
    }

    pub fn chat(&self) -> &Arc<ChatReconciler> {
        &self.chat
    }

    pub fn pending_input(&self) -> &str {
        &self.pending_input
    }

    /// Typing replaces the whole field.
    pub fn set_input(&mut self, text: impl Into<String>) {
        self.pending_input = text.into();
    }

    pub fn transcript(&self) -> Vec<ConversationMessage> {
        self.chat.transcript()
    }

    pub fn is_bot_typing(&self) -> bool {
        self.chat.is_streaming()
    }

    pub fn is_listening(&self) -> bool {
        self.dictation.is_listening()
    }

    pub fn speech_error(&self) -> Option<&str> {
        self.dictation.last_error()
    }

    pub fn dictation(&self) -> &DictationBridge {
        &self.dictation
    }

    /// Copy a new, non-empty dictation transcript into the input field.
    /// Returns true if the field changed.
    pub fn sync_dictation(&mut self) -> bool {
        let transcript = self.dictation.transcript();
        if transcript.is_empty() || transcript == self.mirrored {
            return false;
        }
        self.mirrored = transcript.to_string();
        self.pending_input = self.mirrored.clone();
        true
    }

    /// Wait for the next recognizer event, apply it and mirror the result.
    pub async fn next_dictation_event(&mut self) -> bool {
        self.dictation.next_event().await;
        self.sync_dictation()
    }

    /// Submit the pending input. It is cleared only if the chat accepted it.
    pub async fn send(&mut self) -> SubmitOutcome {
        let turn = match self.chat.begin(&self.pending_input) {
            Ok(turn) => turn,
            Err(rejection) => return SubmitOutcome::Rejected(rejection),
        };
        self.pending_input.clear();
        SubmitOutcome::Closed(self.chat.stream_reply(turn).await)
    }

    /// Start listening when idle. When listening, stop, wait (bounded) for
    /// the recognizer to end and send whatever dictation produced. Returns
    /// the send outcome, if one was tried.
    pub async fn toggle_microphone(&mut self) -> Option<SubmitOutcome> {
        if !self.dictation.is_listening() {
            self.mirrored.clear();
            self.dictation.start_listening();
            return None;
        }

        self.dictation.stop_listening();
        if !self.dictation.wait_for_end(DICTATION_END_TIMEOUT).await {
            self.dictation.drain_events();
        }
        self.sync_dictation();
        if self.pending_input.trim().is_empty() {
            return Some(SubmitOutcome::Rejected(Rejection::EmptyMessage));
        }
        Some(self.send().await)
    }
}
