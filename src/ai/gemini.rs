use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex, PoisonError};

use super::{AiError, AiProvider, ChatSession, InlineImage, TextStream};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_CHAT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image-preview";

/// Gemini REST client. Constructed once with the credential and handed to
/// whichever component needs it.
#[derive(Clone)]
pub struct GeminiClient {
    base_url: String,
    api_key: String,
    chat_model: String,
    image_model: String,
    client: Client,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            client: Client::new(),
        }
    }

    /// Point the client at another host (a proxy, or a mock server in tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_models(mut self, chat_model: impl Into<String>, image_model: impl Into<String>) -> Self {
        self.chat_model = chat_model.into();
        self.image_model = image_model.into();
        self
    }

    fn model_url(&self, model: &str, method: &str) -> String {
        format!(
            "{}/v1beta/models/{}:{}",
            self.base_url.trim_end_matches('/'),
            model,
            method
        )
    }

    async fn post(&self, url: &str, body: &Value) -> Result<reqwest::Response, AiError> {
        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| AiError::ConnectionError(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let error_body = response
            .text()
            .await
            .unwrap_or_else(|_| "failed to read error body".into());
        Err(status_error(status.as_u16(), error_body))
    }
}

fn status_error(status: u16, body: String) -> AiError {
    match status {
        401 | 403 => AiError::AuthError(body),
        429 => AiError::RateLimited {
            retry_after_ms: 1000,
        },
        _ => AiError::ConnectionError(format!("HTTP {}: {}", status, body)),
    }
}

fn build_edit_body(image_b64: &str, mime_type: &str, instruction: &str) -> Value {
    json!({
        "contents": [
            {
                "parts": [
                    { "inlineData": { "mimeType": mime_type, "data": image_b64 } },
                    { "text": instruction }
                ]
            }
        ],
        "generationConfig": {
            "responseModalities": ["IMAGE", "TEXT"]
        }
    })
}

fn user_turn(message: &str) -> Value {
    json!({ "role": "user", "parts": [{ "text": message }] })
}

fn build_chat_body(system_instruction: &str, history: &[Value], message: &str) -> Value {
    let mut contents = history.to_vec();
    contents.push(user_turn(message));

    let mut body = json!({ "contents": contents });
    if !system_instruction.is_empty() {
        body["systemInstruction"] = json!({ "parts": [{ "text": system_instruction }] });
    }
    body
}

/// Pull the first inline image out of a `generateContent` response.
/// A response without candidates or without an image part is "no result".
fn extract_inline_image(response: &Value) -> Result<Option<InlineImage>, AiError> {
    let Some(parts) = response
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
    else {
        return Ok(None);
    };

    for part in parts {
        let Some(inline) = part.get("inlineData").or_else(|| part.get("inline_data")) else {
            continue;
        };
        let data = inline
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| AiError::InvalidResponse("inlineData without data".into()))?;
        let mime_type = inline
            .get("mimeType")
            .or_else(|| inline.get("mime_type"))
            .and_then(Value::as_str)
            .unwrap_or("image/png")
            .to_string();
        let data = BASE64
            .decode(data)
            .map_err(|e| AiError::InvalidResponse(format!("bad base64 image: {e}")))?;
        return Ok(Some(InlineImage { mime_type, data }));
    }
    Ok(None)
}

#[async_trait]
impl AiProvider for GeminiClient {
    fn start_chat(&self, system_instruction: &str) -> Box<dyn ChatSession> {
        log::info!("Starting Gemini chat (model={})", self.chat_model);
        Box::new(GeminiChat {
            client: self.clone(),
            system_instruction: system_instruction.to_string(),
            history: Arc::new(Mutex::new(Vec::new())),
        })
    }

    async fn edit_image(
        &self,
        image: &[u8],
        mime_type: &str,
        instruction: &str,
    ) -> Result<Option<InlineImage>, AiError> {
        let body = build_edit_body(&BASE64.encode(image), mime_type, instruction);
        let url = self.model_url(&self.image_model, "generateContent");
        log::debug!("Sending image edit request ({} bytes, {})", image.len(), mime_type);

        let response = self.post(&url, &body).await?;
        let parsed: Value = response
            .json()
            .await
            .map_err(|e| AiError::InvalidResponse(e.to_string()))?;
        extract_inline_image(&parsed)
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

/// Remote conversation context. Gemini's REST API is stateless, so the
/// turns are kept here and replayed with every request.
pub struct GeminiChat {
    client: GeminiClient,
    system_instruction: String,
    history: Arc<Mutex<Vec<Value>>>,
}

impl GeminiChat {
    /// Number of committed contents (user and model turns).
    pub fn history_len(&self) -> usize {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl ChatSession for GeminiChat {
    async fn send_message_stream(
        &mut self,
        message: &str,
    ) -> Result<Box<dyn TextStream>, AiError> {
        let history = self
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let body = build_chat_body(&self.system_instruction, &history, message);
        let url = format!(
            "{}?alt=sse",
            self.client
                .model_url(&self.client.chat_model, "streamGenerateContent")
        );

        let response = self.client.post(&url, &body).await?;
        Ok(Box::new(GeminiTextStream::new(
            response,
            Arc::clone(&self.history),
            user_turn(message),
        )))
    }
}

/// Streaming SSE reader for `streamGenerateContent?alt=sse`.
pub struct GeminiTextStream {
    /// Raw bytes not yet split into lines. Kept as bytes so multi-byte
    /// characters cut across network chunks are decoded whole.
    buffer: Vec<u8>,
    done: bool,
    response: Option<reqwest::Response>,
    history: Arc<Mutex<Vec<Value>>>,
    pending_turn: Option<Value>,
    reply: String,
}

impl GeminiTextStream {
    fn new(response: reqwest::Response, history: Arc<Mutex<Vec<Value>>>, turn: Value) -> Self {
        Self {
            buffer: Vec::new(),
            done: false,
            response: Some(response),
            history,
            pending_turn: Some(turn),
            reply: String::new(),
        }
    }

    fn handle_line(&mut self, line: &str) -> Option<Result<String, AiError>> {
        let data = line.strip_prefix("data:")?;
        match parse_sse_data(data) {
            ParseResult::Delta(text) => {
                self.reply.push_str(&text);
                Some(Ok(text))
            }
            ParseResult::Skip => None,
            ParseResult::Error(e) => {
                self.fail();
                Some(Err(e))
            }
        }
    }

    fn fail(&mut self) {
        self.done = true;
        self.response = None;
        self.pending_turn = None;
    }

    /// The turn only enters the history once the reply arrived in full.
    fn commit(&mut self) {
        if let Some(turn) = self.pending_turn.take() {
            let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
            history.push(turn);
            history.push(json!({ "role": "model", "parts": [{ "text": self.reply }] }));
        }
    }
}

/// Outcome of parsing one SSE `data:` payload.
enum ParseResult {
    Delta(String),
    Skip,
    Error(AiError),
}

fn parse_sse_data(data: &str) -> ParseResult {
    let trimmed = data.trim();
    if trimmed.is_empty() {
        return ParseResult::Skip;
    }

    let parsed: Value = match serde_json::from_str(trimmed) {
        Ok(v) => v,
        Err(e) => {
            return ParseResult::Error(AiError::InvalidResponse(format!(
                "Invalid JSON in SSE: {}",
                e
            )));
        }
    };

    if let Some(error) = parsed.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        let status = error.get("status").and_then(Value::as_str).unwrap_or("");
        return ParseResult::Error(AiError::ModelError(format!("[{status}] {message}")));
    }

    if let Some(reason) = parsed
        .pointer("/promptFeedback/blockReason")
        .and_then(Value::as_str)
    {
        return ParseResult::Error(AiError::ModelError(format!("prompt blocked: {reason}")));
    }

    let text: String = parsed
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter(|p| !p.get("thought").and_then(Value::as_bool).unwrap_or(false))
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();

    if text.is_empty() {
        ParseResult::Skip
    } else {
        ParseResult::Delta(text)
    }
}

#[async_trait]
impl TextStream for GeminiTextStream {
    async fn next_chunk(&mut self) -> Option<Result<String, AiError>> {
        if self.done {
            return None;
        }

        loop {
            if let Some(newline_pos) = self.buffer.iter().position(|&b| b == b'\n') {
                let raw: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
                let line = String::from_utf8_lossy(&raw);
                let line = line.trim_end_matches(['\n', '\r']).to_string();
                if let Some(item) = self.handle_line(&line) {
                    return Some(item);
                }
                continue;
            }

            let Some(response) = self.response.as_mut() else {
                self.done = true;
                self.commit();
                return None;
            };

            match response.chunk().await {
                Ok(Some(bytes)) => self.buffer.extend_from_slice(&bytes),
                Ok(None) => {
                    // Body finished; a last event may lack its trailing newline.
                    self.response = None;
                    let rest = std::mem::take(&mut self.buffer);
                    let line = String::from_utf8_lossy(&rest).trim().to_string();
                    if let Some(item) = self.handle_line(&line) {
                        return Some(item);
                    }
                }
                Err(e) => {
                    self.fail();
                    return Some(Err(AiError::ConnectionError(format!(
                        "Stream read error: {}",
                        e
                    ))));
                }
            }
        }
    }
}
