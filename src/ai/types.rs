use serde::{Deserialize, Serialize};

/// Author of a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Raster image returned inline by the image-edit model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// Error type for AI operations
#[derive(Debug, thiserror::Error)]
pub enum AiError {
    #[error("Connection failed: {0}")]
    ConnectionError(String),
    #[error("Authentication failed: {0}")]
    AuthError(String),
    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
    #[error("Model error: {0}")]
    ModelError(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Trait for streaming text responses (chunk by chunk)
#[async_trait::async_trait]
pub trait TextStream: Send {
    /// Get the next text chunk. Returns None when the stream is complete.
    async fn next_chunk(&mut self) -> Option<Result<String, AiError>>;
}

/// A remote conversation context. Each call sends one user turn and
/// returns the reply as a finite, non-restartable stream of fragments.
#[async_trait::async_trait]
pub trait ChatSession: Send {
    async fn send_message_stream(&mut self, message: &str)
        -> Result<Box<dyn TextStream>, AiError>;
}
