// cli.rs: Terminal front end: a chat REPL with optional dictation and a
// one-shot `edit` command.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crate::ai::gemini::GeminiClient;
use crate::ai::{AiProvider, Role};
use crate::chat::{ChatEvent, ChatReconciler, StreamOutcome, SubmitOutcome};
use crate::conversation::ConversationController;
use crate::dictation::{DictationBridge, RecognitionConfig, RecognitionEventRx, SpeechRecognizer};
use crate::image_edit::{EditError, EditOutcome, ImageEditor, DEFAULT_DOWNLOAD_NAME};
use crate::locale;
use crate::settings::{Settings, SettingsError};

#[derive(Debug, Parser)]
#[command(name = "smart-studio", version, about = "Smart image editor and chat, powered by Gemini")]
pub struct Cli {
    /// Settings file to use instead of the platform default.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Chat with the assistant. `/mic` toggles dictation, `/quit` exits.
    Chat,
    /// Edit an image with a natural-language instruction.
    Edit {
        /// PNG, JPEG or WEBP image, at most 4 MiB.
        #[arg(long)]
        image: PathBuf,
        #[arg(long)]
        prompt: String,
        /// Text to write onto the image. Repeat for several.
        #[arg(long = "text")]
        texts: Vec<String>,
        #[arg(long, default_value = DEFAULT_DOWNLOAD_NAME)]
        output: PathBuf,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error("{}", .0.user_message())]
    Edit(#[from] EditError),
    #[error("terminal I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("{}", locale::IMAGE_NO_RESULT)]
    NoResult,
}

pub async fn run(cli: Cli) -> Result<(), CliError> {
    let settings = match &cli.config {
        Some(path) => {
            let mut settings = Settings::load_from(path)?;
            settings.apply_env_overrides(|key| std::env::var(key).ok());
            settings
        }
        None => Settings::load()?,
    };

    let client = GeminiClient::new(settings.api_key()?)
        .with_base_url(settings.base_url.as_str())
        .with_models(settings.chat_model.as_str(), settings.image_model.as_str());
    let provider: Arc<dyn AiProvider> = Arc::new(client);

    match cli.command {
        Command::Chat => run_chat(provider, &settings).await,
        Command::Edit {
            image,
            prompt,
            texts,
            output,
        } => run_edit(provider, image, prompt, texts, output).await,
    }
}

#[cfg(feature = "microphone")]
fn speech_capability(
    settings: &Settings,
) -> Option<(Box<dyn SpeechRecognizer>, RecognitionEventRx)> {
    use crate::ai::gemini_live::LiveTranscriber;
    use crate::capture::microphone::MicrophoneCapture;

    let api_key = settings.api_key().ok()?;
    let (transcriber, events) = LiveTranscriber::new(
        settings.base_url.as_str(),
        api_key,
        settings.live_model.as_str(),
        Arc::new(MicrophoneCapture::default()),
    );
    Some((Box::new(transcriber), events))
}

#[cfg(not(feature = "microphone"))]
fn speech_capability(
    _settings: &Settings,
) -> Option<(Box<dyn SpeechRecognizer>, RecognitionEventRx)> {
    None
}

async fn run_chat(provider: Arc<dyn AiProvider>, settings: &Settings) -> Result<(), CliError> {
    let chat = Arc::new(ChatReconciler::new(
        provider,
        settings.system_instruction.as_str(),
    ));
    let events = chat.subscribe();
    let printer = tokio::spawn(print_events(events));
    chat.initialize().await;

    let config = RecognitionConfig {
        language: settings.recognition_language.clone(),
        ..RecognitionConfig::default()
    };
    let dictation = DictationBridge::new(speech_capability(settings), config);
    let mut controller = ConversationController::new(Arc::clone(&chat), dictation);
    if let Some(error) = controller.speech_error() {
        println!("! {error}");
    }
    println!("{} (/mic, /quit)", locale::INPUT_PROMPT);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match line.trim() {
                    "/quit" => break,
                    "/mic" => {
                        let outcome = controller.toggle_microphone().await;
                        if controller.is_listening() {
                            println!("{}", locale::LISTENING);
                        } else if outcome.is_some() {
                            println!("{}", locale::STOPPED_LISTENING);
                        }
                        if let Some(error) = controller.speech_error() {
                            println!("! {error}");
                        }
                    }
                    "" => {}
                    _ => {
                        controller.set_input(line);
                        if let SubmitOutcome::Rejected(reason) = controller.send().await {
                            log::debug!("Message not sent: {reason:?}");
                        }
                    }
                }
            }
            changed = controller.next_dictation_event() => {
                if changed {
                    println!("🎤 {}", controller.pending_input());
                }
                if let Some(error) = controller.speech_error() {
                    println!("! {error}");
                }
            }
        }
    }

    // The event channel closes once the last reconciler handle is gone.
    drop(controller);
    drop(chat);
    let _ = printer.await;
    Ok(())
}

async fn print_events(mut events: mpsc::UnboundedReceiver<ChatEvent>) {
    let mut printer = ReplyPrinter::default();
    let mut stdout = std::io::stdout();
    while let Some(event) = events.recv().await {
        if let Some(text) = printer.render(&event) {
            let _ = write!(stdout, "{text}");
            let _ = stdout.flush();
        }
    }
}

/// Turns transcript events into terminal output, printing each reply
/// incrementally.
#[derive(Default)]
struct ReplyPrinter {
    open_id: Option<String>,
    printed: String,
}

impl ReplyPrinter {
    fn render(&mut self, event: &ChatEvent) -> Option<String> {
        match event {
            ChatEvent::Reset { messages } => Some(
                messages
                    .iter()
                    .map(|m| format!("{}{}\n", label(m.role), m.text))
                    .collect(),
            ),
            ChatEvent::MessageAdded { message } if message.role == Role::Assistant => {
                self.open_id = Some(message.id.clone());
                self.printed.clear();
                Some(label(Role::Assistant).to_string())
            }
            ChatEvent::MessageAdded { .. } => None,
            ChatEvent::MessageUpdated { id, text } if self.open_id.as_ref() == Some(id) => {
                let out = match text.strip_prefix(self.printed.as_str()) {
                    Some(rest) => rest.to_string(),
                    // The text was replaced (failure notice), not extended.
                    None => format!("\n{text}"),
                };
                self.printed = text.clone();
                Some(out)
            }
            ChatEvent::MessageUpdated { .. } => None,
            ChatEvent::MessageClosed { id, outcome } if self.open_id.as_ref() == Some(id) => {
                self.open_id = None;
                if *outcome == StreamOutcome::Failed {
                    log::warn!("Reply {id} failed");
                }
                Some("\n".to_string())
            }
            ChatEvent::MessageClosed { .. } => None,
        }
    }
}

fn label(role: Role) -> &'static str {
    match role {
        Role::User => "أنت> ",
        Role::Assistant => "المساعد> ",
    }
}

async fn run_edit(
    provider: Arc<dyn AiProvider>,
    image: PathBuf,
    prompt: String,
    texts: Vec<String>,
    output: PathBuf,
) -> Result<(), CliError> {
    let mut editor = ImageEditor::new(provider);
    editor.select_file(&image)?;
    editor.set_prompt(prompt);
    for (index, text) in texts.into_iter().enumerate() {
        editor.add_text();
        editor.set_text(index, text);
    }

    println!("{}", locale::EDIT_IN_PROGRESS);
    match editor.submit().await? {
        EditOutcome::Edited(_) => {
            editor.save_edited(&output)?;
            println!("{} {}", locale::EDIT_SAVED, output.display());
            Ok(())
        }
        EditOutcome::NoResult => Err(CliError::NoResult),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::ConversationMessage;

    fn assistant(id: &str) -> ChatEvent {
        ChatEvent::MessageAdded {
            message: ConversationMessage {
                id: id.into(),
                role: Role::Assistant,
                text: String::new(),
            },
        }
    }

    fn updated(id: &str, text: &str) -> ChatEvent {
        ChatEvent::MessageUpdated {
            id: id.into(),
            text: text.into(),
        }
    }

    #[test]
    fn printer_emits_only_new_suffix() {
        let mut printer = ReplyPrinter::default();
        assert_eq!(printer.render(&assistant("a")).as_deref(), Some("المساعد> "));
        assert_eq!(printer.render(&updated("a", "مر")).as_deref(), Some("مر"));
        assert_eq!(printer.render(&updated("a", "مرحبا")).as_deref(), Some("حبا"));
        assert_eq!(printer.render(&updated("a", "مرحبا بك")).as_deref(), Some(" بك"));
        let closed = ChatEvent::MessageClosed {
            id: "a".into(),
            outcome: StreamOutcome::Completed,
        };
        assert_eq!(printer.render(&closed).as_deref(), Some("\n"));
    }

    #[test]
    fn printer_reprints_replaced_text() {
        let mut printer = ReplyPrinter::default();
        printer.render(&assistant("a"));
        printer.render(&updated("a", "partial"));
        assert_eq!(
            printer.render(&updated("a", locale::CHAT_FAILURE)),
            Some(format!("\n{}", locale::CHAT_FAILURE))
        );
    }

    #[test]
    fn printer_ignores_user_messages_and_other_ids() {
        let mut printer = ReplyPrinter::default();
        let user = ChatEvent::MessageAdded {
            message: ConversationMessage {
                id: "u".into(),
                role: Role::User,
                text: "hi".into(),
            },
        };
        assert!(printer.render(&user).is_none());
        assert!(printer.render(&updated("other", "x")).is_none());
    }

    #[test]
    fn edit_command_parses_repeated_texts() {
        let cli = Cli::parse_from([
            "smart-studio",
            "edit",
            "--image",
            "in.png",
            "--prompt",
            "أضف قبعة",
            "--text",
            "SALE",
            "--text",
            "50%",
        ]);
        match cli.command {
            Command::Edit { texts, output, .. } => {
                assert_eq!(texts, vec!["SALE", "50%"]);
                assert_eq!(output, PathBuf::from("edited-image.png"));
            }
            Command::Chat => panic!("expected edit"),
        }
    }
}
