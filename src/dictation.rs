// dictation.rs: Wraps an event-driven speech recognizer into a plain value
// (the current transcript) plus a listening flag.
//
// The recognizer pushes `RecognitionEvent`s on a channel; the bridge applies
// them in delivery order. Nothing outside this module sees the events.

use std::time::Duration;

use tokio::sync::mpsc;

use crate::locale;

/// One ranked hypothesis for a recognition result.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionAlternative {
    pub transcript: String,
    pub confidence: Option<f32>,
}

impl RecognitionAlternative {
    pub fn new(transcript: impl Into<String>) -> Self {
        Self {
            transcript: transcript.into(),
            confidence: None,
        }
    }
}

/// A recognition result, settled (`is_final`) or still being re-scored.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionResult {
    pub is_final: bool,
    /// Best alternative first.
    pub alternatives: Vec<RecognitionAlternative>,
}

impl RecognitionResult {
    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            is_final: true,
            alternatives: vec![RecognitionAlternative::new(text)],
        }
    }

    pub fn interim_text(text: impl Into<String>) -> Self {
        Self {
            is_final: false,
            alternatives: vec![RecognitionAlternative::new(text)],
        }
    }
}

/// One delivery of results. Entries before `result_index` are unchanged
/// since the previous batch.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecognitionBatch {
    pub result_index: usize,
    pub results: Vec<RecognitionResult>,
}

impl RecognitionBatch {
    /// Concatenation of the top alternative of every final result from
    /// `result_index` on. Interim results are ignored.
    pub fn final_transcript(&self) -> String {
        self.results
            .iter()
            .skip(self.result_index)
            .filter(|r| r.is_final)
            .filter_map(|r| r.alternatives.first())
            .map(|a| a.transcript.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionEvent {
    Result(RecognitionBatch),
    /// Raw error code reported by the capability (e.g. `no-speech`).
    Error(String),
    /// The capability stopped capturing, for whatever reason.
    End,
}

pub type RecognitionEventRx = mpsc::UnboundedReceiver<RecognitionEvent>;
pub type RecognitionEventTx = mpsc::UnboundedSender<RecognitionEvent>;

/// How the capability is asked to listen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionConfig {
    pub continuous: bool,
    pub interim_results: bool,
    pub language: String,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            continuous: true,
            interim_results: true,
            language: "ar-SA".into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RecognitionError {
    #[error("speech recognition is not available on this host")]
    Unavailable,
    #[error("speech recognition already started")]
    AlreadyStarted,
    #[error("failed to start speech recognition: {0}")]
    Start(String),
}

impl RecognitionError {
    /// Text shown to the user for a failed start.
    pub fn user_message(&self) -> String {
        match self {
            RecognitionError::Unavailable => locale::SPEECH_UNSUPPORTED.to_string(),
            RecognitionError::AlreadyStarted => locale::SPEECH_ALREADY_STARTED.to_string(),
            RecognitionError::Start(detail) => locale::speech_error(detail),
        }
    }
}

/// Platform speech-recognition capability. Events are delivered on the
/// receiver handed to [`DictationBridge::new`] alongside the recognizer.
pub trait SpeechRecognizer: Send {
    fn start(&mut self, config: &RecognitionConfig) -> Result<(), RecognitionError>;
    /// Request teardown. The end event may arrive later.
    fn stop(&mut self);
}

/// Observable state of the bridge.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DictationSession {
    pub listening: bool,
    pub transcript: String,
    pub last_error: Option<String>,
}

struct Capability {
    recognizer: Box<dyn SpeechRecognizer>,
    events: RecognitionEventRx,
}

pub struct DictationBridge {
    capability: Option<Capability>,
    config: RecognitionConfig,
    session: DictationSession,
    /// A recognizer session was started and its end event has not arrived.
    session_open: bool,
}

impl DictationBridge {
    /// `None` means the host has no recognizer; that is surfaced once via
    /// `last_error` and every later start is a no-op.
    pub fn new(
        capability: Option<(Box<dyn SpeechRecognizer>, RecognitionEventRx)>,
        config: RecognitionConfig,
    ) -> Self {
        let mut session = DictationSession::default();
        let capability = match capability {
            Some((recognizer, events)) => Some(Capability { recognizer, events }),
            None => {
                log::warn!("Speech recognition unavailable on this host");
                session.last_error = Some(locale::SPEECH_UNSUPPORTED.to_string());
                None
            }
        };
        Self {
            capability,
            config,
            session,
            session_open: false,
        }
    }

    pub fn is_supported(&self) -> bool {
        self.capability.is_some()
    }

    pub fn session(&self) -> &DictationSession {
        &self.session
    }

    pub fn is_listening(&self) -> bool {
        self.session.listening
    }

    pub fn transcript(&self) -> &str {
        &self.session.transcript
    }

    pub fn last_error(&self) -> Option<&str> {
        self.session.last_error.as_deref()
    }

    /// Events still queued belong to the previous session and are applied
    /// first. While that session has not ended, starting again is refused
    /// the way an already started recognizer refuses it.
    pub fn start_listening(&mut self) {
        if self.capability.is_none() || self.session.listening {
            return;
        }
        self.drain_events();

        self.session.transcript.clear();
        self.session.last_error = None;
        if self.session_open {
            log::warn!("Dictation start refused: previous session has not ended");
            self.session.last_error = Some(RecognitionError::AlreadyStarted.user_message());
            return;
        }
        let Some(capability) = self.capability.as_mut() else {
            return;
        };
        match capability.recognizer.start(&self.config) {
            Ok(()) => {
                self.session.listening = true;
                self.session_open = true;
                log::info!("Dictation started ({})", self.config.language);
            }
            Err(e) => {
                log::warn!("Dictation start failed: {e}");
                self.session.last_error = Some(e.user_message());
            }
        }
    }

    /// Flips `listening` off right away; the capability's own end event
    /// follows whenever its teardown completes.
    pub fn stop_listening(&mut self) {
        let Some(capability) = self.capability.as_mut() else {
            return;
        };
        if !self.session.listening {
            return;
        }
        capability.recognizer.stop();
        self.session.listening = false;
        log::info!("Dictation stopped");
    }

    pub fn handle_event(&mut self, event: RecognitionEvent) {
        match event {
            RecognitionEvent::Result(batch) => {
                // Replace, never append: the capability re-scores whole batches.
                self.session.transcript = batch.final_transcript();
                log::debug!("Dictation transcript: {} chars", self.session.transcript.len());
            }
            RecognitionEvent::Error(code) => {
                log::error!("Speech recognition error: {code}");
                self.session.last_error = Some(locale::speech_error(&code));
            }
            RecognitionEvent::End => {
                self.session.listening = false;
                self.session_open = false;
            }
        }
    }

    /// Apply every event already queued without waiting. Returns how many
    /// were applied.
    pub fn drain_events(&mut self) -> usize {
        let mut pending = Vec::new();
        if let Some(capability) = self.capability.as_mut() {
            while let Ok(event) = capability.events.try_recv() {
                pending.push(event);
            }
        }
        let applied = pending.len();
        for event in pending {
            self.handle_event(event);
        }
        applied
    }

    /// Apply events until the current session's end event arrives or
    /// `limit` passes. Returns false on timeout. Used after
    /// [`stop_listening`](Self::stop_listening) to collect the results the
    /// capability settles while tearing down.
    pub async fn wait_for_end(&mut self, limit: Duration) -> bool {
        let ended = tokio::time::timeout(limit, async {
            while self.session_open {
                let event = match self.capability.as_mut() {
                    Some(capability) => capability.events.recv().await,
                    None => None,
                };
                match event {
                    Some(event) => self.handle_event(event),
                    // The recognizer is gone; nothing more will arrive.
                    None => self.session_open = false,
                }
            }
        })
        .await
        .is_ok();
        if !ended {
            log::warn!("Dictation session did not end within {limit:?}");
        }
        ended
    }

    /// Wait for the next capability event and apply it. Never resolves when
    /// the host has no recognizer or the recognizer is gone, so it can sit
    /// in a `select!` next to other input sources.
    pub async fn next_event(&mut self) {
        let event = match self.capability.as_mut() {
            Some(capability) => capability.events.recv().await,
            None => None,
        };
        match event {
            Some(event) => self.handle_event(event),
            None => std::future::pending::<()>().await,
        }
    }
}
