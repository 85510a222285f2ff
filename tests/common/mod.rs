//! Scripted provider shared by the integration tests. No network, no
//! audio hardware: every reply and every edit result is queued up front.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use smart_studio_lib::ai::{AiError, AiProvider, ChatSession, InlineImage, TextStream};
use tokio::sync::mpsc;

/// What the next `send_message_stream` call produces.
pub enum Reply {
    Fragments(Vec<Result<String, AiError>>),
    /// Fragments fed by the test through the paired sender.
    Channel(mpsc::UnboundedReceiver<Result<String, AiError>>),
    SendFails(AiError),
}

pub fn fragments(parts: &[&str]) -> Reply {
    Reply::Fragments(parts.iter().map(|p| Ok(p.to_string())).collect())
}

pub fn channel_reply() -> (mpsc::UnboundedSender<Result<String, AiError>>, Reply) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, Reply::Channel(rx))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditCall {
    pub image_len: usize,
    pub mime_type: String,
    pub instruction: String,
}

#[derive(Default)]
pub struct ScriptedProvider {
    replies: Arc<Mutex<VecDeque<Reply>>>,
    sent: Arc<Mutex<Vec<String>>>,
    chats_started: Mutex<usize>,
    edit_result: Mutex<Option<Result<Option<InlineImage>, AiError>>>,
    edit_calls: Mutex<Vec<EditCall>>,
}

impl ScriptedProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn provider(self: &Arc<Self>) -> Arc<dyn AiProvider> {
        self.clone()
    }

    pub fn push_reply(&self, reply: Reply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    /// Result of the next edit call. Without one, edits return no image.
    pub fn set_edit_result(&self, result: Result<Option<InlineImage>, AiError>) {
        *self.edit_result.lock().unwrap() = Some(result);
    }

    pub fn sent_messages(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn chats_started(&self) -> usize {
        *self.chats_started.lock().unwrap()
    }

    pub fn edit_calls(&self) -> Vec<EditCall> {
        self.edit_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AiProvider for ScriptedProvider {
    fn start_chat(&self, _system_instruction: &str) -> Box<dyn ChatSession> {
        *self.chats_started.lock().unwrap() += 1;
        Box::new(ScriptedChat {
            replies: Arc::clone(&self.replies),
            sent: Arc::clone(&self.sent),
        })
    }

    async fn edit_image(
        &self,
        image: &[u8],
        mime_type: &str,
        instruction: &str,
    ) -> Result<Option<InlineImage>, AiError> {
        self.edit_calls.lock().unwrap().push(EditCall {
            image_len: image.len(),
            mime_type: mime_type.to_string(),
            instruction: instruction.to_string(),
        });
        self.edit_result.lock().unwrap().take().unwrap_or(Ok(None))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

struct ScriptedChat {
    replies: Arc<Mutex<VecDeque<Reply>>>,
    sent: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ChatSession for ScriptedChat {
    async fn send_message_stream(
        &mut self,
        message: &str,
    ) -> Result<Box<dyn TextStream>, AiError> {
        self.sent.lock().unwrap().push(message.to_string());
        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(Reply::Fragments(items)) => Ok(Box::new(VecStream(items.into()))),
            Some(Reply::Channel(rx)) => Ok(Box::new(ChannelStream(rx))),
            Some(Reply::SendFails(e)) => Err(e),
            None => Ok(Box::new(VecStream(VecDeque::new()))),
        }
    }
}

struct VecStream(VecDeque<Result<String, AiError>>);

#[async_trait]
impl TextStream for VecStream {
    async fn next_chunk(&mut self) -> Option<Result<String, AiError>> {
        self.0.pop_front()
    }
}

struct ChannelStream(mpsc::UnboundedReceiver<Result<String, AiError>>);

#[async_trait]
impl TextStream for ChannelStream {
    async fn next_chunk(&mut self) -> Option<Result<String, AiError>> {
        self.0.recv().await
    }
}
