// gemini_live.rs: Speech recognition over the Gemini Live WebSocket.
//
// Microphone PCM is streamed as `realtimeInput` and the server's input
// transcription is reshaped into recognition batches for the dictation
// bridge: finished utterances are final results, the utterance still being
// spoken is an interim one.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use super::AiError;
use crate::capture::{AudioCapture, AudioSource, TARGET_SAMPLE_RATE};
use crate::dictation::{
    RecognitionBatch, RecognitionConfig, RecognitionError, RecognitionEvent, RecognitionEventRx,
    RecognitionEventTx, RecognitionResult, SpeechRecognizer,
};

pub const DEFAULT_LIVE_MODEL: &str = "gemini-live-2.5-flash-preview";

const LIVE_PATH: &str =
    "/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Recognizer backed by a Live API session per listening session.
pub struct LiveTranscriber {
    base_url: String,
    api_key: String,
    model: String,
    source: Arc<dyn AudioSource>,
    events: RecognitionEventTx,
    active: Option<ActiveSession>,
}

/// The most recent session task. It counts as running until it has sent
/// its end event, even after a stop request.
struct ActiveSession {
    close_sender: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl LiveTranscriber {
    /// Returns the recognizer and the receiver its events arrive on.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        source: Arc<dyn AudioSource>,
    ) -> (Self, RecognitionEventRx) {
        let (events, rx) = mpsc::unbounded_channel();
        let transcriber = Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            source,
            events,
            active: None,
        };
        (transcriber, rx)
    }
}

impl SpeechRecognizer for LiveTranscriber {
    fn start(&mut self, config: &RecognitionConfig) -> Result<(), RecognitionError> {
        if self.active.as_ref().is_some_and(|s| !s.task.is_finished()) {
            return Err(RecognitionError::AlreadyStarted);
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| RecognitionError::Start(e.to_string()))?;
        let url = live_url(&self.base_url, &self.api_key)
            .map_err(|e| RecognitionError::Start(e.to_string()))?;
        let audio = self
            .source
            .start()
            .map_err(|e| RecognitionError::Start(e.to_string()))?;

        let (close_sender, close_rx) = mpsc::channel(1);
        let session = LiveSession {
            url,
            setup: build_setup(&self.model, config),
            config: config.clone(),
            events: self.events.clone(),
        };
        let task = runtime.spawn(session.run(audio, close_rx));
        self.active = Some(ActiveSession { close_sender, task });
        log::info!("Live transcription session starting (model={})", self.model);
        Ok(())
    }

    /// The session settles what it has heard, stops its own capture and
    /// then sends its end event.
    fn stop(&mut self) {
        if let Some(session) = &self.active {
            let _ = session.close_sender.try_send(());
        }
    }
}

// ── helpers (also used by tests) ────────────────────────────────────

fn live_url(base_url: &str, api_key: &str) -> Result<Url, AiError> {
    let mut url = Url::parse(base_url)
        .map_err(|e| AiError::ConnectionError(format!("bad endpoint URL: {e}")))?;
    let scheme = if url.scheme() == "http" { "ws" } else { "wss" };
    url.set_scheme(scheme).map_err(|()| {
        AiError::ConnectionError(format!("cannot use {base_url} as a WebSocket endpoint"))
    })?;
    url.set_path(LIVE_PATH);
    url.query_pairs_mut().clear().append_pair("key", api_key);
    Ok(url)
}

/// First message of every session.
fn build_setup(model: &str, config: &RecognitionConfig) -> Value {
    json!({
        "setup": {
            "model": format!("models/{model}"),
            "generationConfig": { "responseModalities": ["TEXT"] },
            "systemInstruction": {
                "parts": [{
                    "text": format!(
                        "The user speaks {}. Only listen; do not answer.",
                        config.language
                    )
                }]
            },
            "inputAudioTranscription": {}
        }
    })
}

fn build_audio_message(pcm: &[u8]) -> Value {
    json!({
        "realtimeInput": {
            "audio": {
                "data": BASE64.encode(pcm),
                "mimeType": format!("audio/pcm;rate={TARGET_SAMPLE_RATE}")
            }
        }
    })
}

#[derive(Debug, PartialEq)]
enum LiveEvent {
    SetupComplete,
    Transcription(String),
    TurnComplete,
    GoAway,
}

/// One server message can carry several updates at once.
fn parse_server_message(text: &str) -> Result<Vec<LiveEvent>, AiError> {
    let v: Value = serde_json::from_str(text)
        .map_err(|e| AiError::InvalidResponse(format!("bad JSON: {e}")))?;

    if let Some(error) = v.get("error") {
        let msg = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(AiError::ModelError(msg.to_string()));
    }

    let mut events = Vec::new();
    if v.get("setupComplete").is_some() {
        events.push(LiveEvent::SetupComplete);
    }
    if let Some(content) = v.get("serverContent") {
        if let Some(text) = content
            .pointer("/inputTranscription/text")
            .and_then(Value::as_str)
        {
            if !text.is_empty() {
                events.push(LiveEvent::Transcription(text.to_string()));
            }
        }
        if content
            .get("turnComplete")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            events.push(LiveEvent::TurnComplete);
        }
    }
    if v.get("goAway").is_some() {
        events.push(LiveEvent::GoAway);
    }
    Ok(events)
}

/// Utterances heard so far in one listening session.
#[derive(Debug, Default)]
struct TranscriptAccumulator {
    finished: Vec<String>,
    current: String,
}

impl TranscriptAccumulator {
    fn push(&mut self, fragment: &str) {
        self.current.push_str(fragment);
    }

    /// Settle the current utterance. Returns false if nothing was pending.
    fn finish_turn(&mut self) -> bool {
        if self.current.trim().is_empty() {
            self.current.clear();
            return false;
        }
        self.finished.push(std::mem::take(&mut self.current));
        true
    }

    fn batch(&self, include_interim: bool) -> RecognitionBatch {
        let mut results: Vec<RecognitionResult> = self
            .finished
            .iter()
            .map(|text| RecognitionResult::final_text(text.clone()))
            .collect();
        if include_interim && !self.current.is_empty() {
            results.push(RecognitionResult::interim_text(self.current.clone()));
        }
        RecognitionBatch {
            result_index: 0,
            results,
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum SessionFailure {
    #[error(transparent)]
    Service(#[from] AiError),
    #[error("audio capture ended unexpectedly")]
    AudioCapture,
}

impl SessionFailure {
    /// Error code in the vocabulary of browser speech recognition.
    fn code(&self) -> String {
        match self {
            SessionFailure::AudioCapture => "audio-capture".into(),
            SessionFailure::Service(AiError::AuthError(_)) => "not-allowed".into(),
            SessionFailure::Service(AiError::ConnectionError(_))
            | SessionFailure::Service(AiError::RateLimited { .. }) => "network".into(),
            SessionFailure::Service(AiError::ModelError(_))
            | SessionFailure::Service(AiError::InvalidResponse(_)) => "aborted".into(),
        }
    }
}

fn close_result(frame: Option<CloseFrame>) -> Result<(), SessionFailure> {
    let Some(frame) = frame else {
        return Ok(());
    };
    let code = u16::from(frame.code);
    let reason = frame.reason.as_str();
    match code {
        1000 => Ok(()),
        1008 => Err(AiError::AuthError(reason.to_string()).into()),
        _ => Err(AiError::ConnectionError(format!("closed {code}: {reason}")).into()),
    }
}

// ── session task ────────────────────────────────────────────────────

struct LiveSession {
    url: Url,
    setup: Value,
    config: RecognitionConfig,
    events: RecognitionEventTx,
}

impl LiveSession {
    async fn run(self, mut audio: AudioCapture, mut close_rx: mpsc::Receiver<()>) {
        let result = self.drive(&mut audio, &mut close_rx).await;
        audio.stop();
        if let Err(e) = result {
            log::error!("Live transcription failed: {e}");
            let _ = self.events.send(RecognitionEvent::Error(e.code()));
        }
        let _ = self.events.send(RecognitionEvent::End);
        log::info!("Live transcription session ended");
    }

    async fn drive(
        &self,
        audio: &mut AudioCapture,
        close_rx: &mut mpsc::Receiver<()>,
    ) -> Result<(), SessionFailure> {
        let ws_stream = tokio::select! {
            _ = close_rx.recv() => return Ok(()),
            connected = tokio_tungstenite::connect_async(self.url.as_str()) => {
                connected
                    .map_err(|e| AiError::ConnectionError(format!("WebSocket connect: {e}")))?
                    .0
            }
        };
        let (mut sink, mut source) = ws_stream.split();

        sink.send(Message::Text(self.setup.to_string().into()))
            .await
            .map_err(|e| AiError::ConnectionError(format!("send setup: {e}")))?;

        let mut transcript = TranscriptAccumulator::default();
        loop {
            tokio::select! {
                _ = close_rx.recv() => {
                    self.settle(&mut transcript);
                    let _ = sink.send(Message::Close(None)).await;
                    return Ok(());
                }
                chunk = audio.recv() => {
                    let Some(pcm) = chunk else {
                        self.settle(&mut transcript);
                        let _ = sink.send(Message::Close(None)).await;
                        return Err(SessionFailure::AudioCapture);
                    };
                    let message = build_audio_message(&pcm);
                    sink.send(Message::Text(message.to_string().into()))
                        .await
                        .map_err(|e| AiError::ConnectionError(format!("send audio: {e}")))?;
                }
                msg = source.next() => {
                    let keep_going = match msg {
                        Some(Ok(Message::Text(text))) => self.handle_payload(text.as_str(), &mut transcript)?,
                        Some(Ok(Message::Binary(bytes))) => {
                            let text = std::str::from_utf8(&bytes)
                                .map_err(|e| AiError::InvalidResponse(format!("non UTF-8 frame: {e}")))?;
                            self.handle_payload(text, &mut transcript)?
                        }
                        Some(Ok(Message::Close(frame))) => return close_result(frame),
                        Some(Ok(_)) => true,
                        Some(Err(e)) => {
                            return Err(AiError::ConnectionError(format!("WebSocket read: {e}")).into());
                        }
                        None => return Ok(()),
                    };
                    if !keep_going {
                        let _ = sink.send(Message::Close(None)).await;
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Returns false once a single-utterance session has its result.
    fn handle_payload(
        &self,
        text: &str,
        transcript: &mut TranscriptAccumulator,
    ) -> Result<bool, SessionFailure> {
        for event in parse_server_message(text)? {
            match event {
                LiveEvent::SetupComplete => log::info!("Live transcription session ready"),
                LiveEvent::Transcription(fragment) => {
                    transcript.push(&fragment);
                    if self.config.interim_results {
                        self.publish(transcript.batch(true));
                    }
                }
                LiveEvent::TurnComplete => {
                    if transcript.finish_turn() {
                        self.publish(transcript.batch(self.config.interim_results));
                        if !self.config.continuous {
                            return Ok(false);
                        }
                    }
                }
                LiveEvent::GoAway => log::warn!("Live session is about to be closed by the server"),
            }
        }
        Ok(true)
    }

    /// Treat the utterance in progress as finished, the way a stopped
    /// recognizer reports what it heard before ending.
    fn settle(&self, transcript: &mut TranscriptAccumulator) {
        if transcript.finish_turn() {
            self.publish(transcript.batch(false));
        }
    }

    fn publish(&self, batch: RecognitionBatch) {
        let _ = self.events.send(RecognitionEvent::Result(batch));
    }
}

// ── Tests ───────────────────────────────────────────────────────────
