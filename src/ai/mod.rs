use async_trait::async_trait;

pub mod gemini;
pub mod gemini_live;
pub mod types;
pub use types::*;

/// Trait for generative AI providers.
/// The chat reconciler and the image editor only see this seam, so tests
/// can swap in scripted providers.
#[async_trait]
pub trait AiProvider: Send + Sync {
    /// Open a fresh remote conversation with no prior turns.
    fn start_chat(&self, system_instruction: &str) -> Box<dyn ChatSession>;

    /// Ask the image model to edit `image` according to `instruction`.
    /// `Ok(None)` means the call succeeded but no image came back.
    async fn edit_image(
        &self,
        image: &[u8],
        mime_type: &str,
        instruction: &str,
    ) -> Result<Option<InlineImage>, AiError>;

    /// Provider name for logging/display
    fn name(&self) -> &str;
}
