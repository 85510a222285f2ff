// image_edit.rs: Single-shot image edit: size gate, instruction assembly,
// one call to the image model, and the editor panel state around it.

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::ImageFormat;

use crate::ai::{AiError, AiProvider, InlineImage};
use crate::locale;

/// Largest image accepted for editing: 4 MiB.
pub const MAX_IMAGE_BYTES: usize = 4 * 1024 * 1024;

pub const SUPPORTED_MIME_TYPES: [&str; 3] = ["image/png", "image/jpeg", "image/webp"];

/// Suggested file name for the downloaded result.
pub const DEFAULT_DOWNLOAD_NAME: &str = "edited-image.png";

#[derive(Debug, thiserror::Error)]
pub enum EditError {
    #[error("image is {size} bytes, limit is {limit}")]
    ImageTooLarge { size: usize, limit: usize },
    #[error("unsupported image type: {0}")]
    UnsupportedFormat(String),
    #[error("an image and an instruction are both required")]
    MissingInput,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("image codec error: {0}")]
    Codec(#[from] image::ImageError),
    #[error(transparent)]
    Remote(#[from] AiError),
}

impl EditError {
    /// Localized text for the error panel.
    pub fn user_message(&self) -> &'static str {
        match self {
            EditError::ImageTooLarge { .. } => locale::IMAGE_TOO_LARGE,
            EditError::UnsupportedFormat(_) => locale::IMAGE_UNSUPPORTED_FORMAT,
            EditError::MissingInput => locale::IMAGE_MISSING_INPUT,
            EditError::Io(_) => locale::IMAGE_READ_FAILURE,
            EditError::Codec(_) | EditError::Remote(_) => locale::IMAGE_REMOTE_FAILURE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditOutcome {
    Edited(InlineImage),
    /// The model answered but produced no image.
    NoResult,
}

/// An image that passed the size gate and has a supported media type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceImage {
    bytes: Vec<u8>,
    mime_type: String,
}

fn check_size(size: usize) -> Result<(), EditError> {
    if size > MAX_IMAGE_BYTES {
        return Err(EditError::ImageTooLarge {
            size,
            limit: MAX_IMAGE_BYTES,
        });
    }
    Ok(())
}

impl SourceImage {
    /// Validate raw image content. The declared media type wins; without one
    /// the format is sniffed from the bytes.
    pub fn from_bytes(bytes: Vec<u8>, declared_mime: Option<&str>) -> Result<Self, EditError> {
        check_size(bytes.len())?;

        let mime_type = match declared_mime {
            Some(mime) => mime.to_ascii_lowercase(),
            None => image::guess_format(&bytes)
                .map(|format| format.to_mime_type().to_string())
                .map_err(|_| EditError::UnsupportedFormat("unknown".into()))?,
        };
        if !SUPPORTED_MIME_TYPES.contains(&mime_type.as_str()) {
            return Err(EditError::UnsupportedFormat(mime_type));
        }

        Ok(Self { bytes, mime_type })
    }

    /// Read an image from disk. Oversized files are rejected from their
    /// metadata before any content is read.
    pub fn load(path: &Path) -> Result<Self, EditError> {
        let size = std::fs::metadata(path)?.len();
        check_size(usize::try_from(size).unwrap_or(usize::MAX))?;

        let declared = ImageFormat::from_path(path)
            .ok()
            .map(|format| format.to_mime_type());
        let bytes = std::fs::read(path)?;
        Self::from_bytes(bytes, declared)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn data_url(&self) -> String {
        data_url(&self.mime_type, &self.bytes)
    }
}

fn data_url(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime_type, BASE64.encode(bytes))
}

/// Fold the non-blank overlay texts into the instruction.
pub fn compose_instruction(prompt: &str, overlay_texts: &[String]) -> String {
    let quoted: Vec<String> = overlay_texts
        .iter()
        .filter(|t| !t.trim().is_empty())
        .map(|t| format!("\"{t}\""))
        .collect();
    if quoted.is_empty() {
        return prompt.to_string();
    }
    format!(
        "{prompt}. {} {}",
        locale::OVERLAY_TEXTS_PREFIX,
        quoted.join(", ")
    )
}

/// Send one edit request. No retry, no partial state.
pub async fn edit_image(
    provider: &dyn AiProvider,
    image: &SourceImage,
    instruction: &str,
) -> Result<EditOutcome, EditError> {
    // Re-checked here: the remote call must never see an oversized payload.
    check_size(image.bytes.len())?;

    match provider
        .edit_image(&image.bytes, &image.mime_type, instruction)
        .await?
    {
        Some(edited) => Ok(EditOutcome::Edited(edited)),
        None => Ok(EditOutcome::NoResult),
    }
}

/// Encode the result as PNG bytes, re-encoding other raster formats.
pub fn to_png(image: &InlineImage) -> Result<Vec<u8>, EditError> {
    if image.mime_type == "image/png" {
        return Ok(image.data.clone());
    }
    let decoded = image::load_from_memory(&image.data)?;
    let mut out = Cursor::new(Vec::new());
    decoded.write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}

/// State of the image editor panel.
pub struct ImageEditor {
    provider: Arc<dyn AiProvider>,
    original: Option<SourceImage>,
    edited: Option<InlineImage>,
    prompt: String,
    overlay_texts: Vec<String>,
    loading: bool,
    error: Option<String>,
}

impl ImageEditor {
    pub fn new(provider: Arc<dyn AiProvider>) -> Self {
        Self {
            provider,
            original: None,
            edited: None,
            prompt: String::new(),
            overlay_texts: Vec::new(),
            loading: false,
            error: None,
        }
    }

    pub fn original(&self) -> Option<&SourceImage> {
        self.original.as_ref()
    }

    pub fn edited(&self) -> Option<&InlineImage> {
        self.edited.as_ref()
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn overlay_texts(&self) -> &[String] {
        &self.overlay_texts
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn dismiss_error(&mut self) {
        self.error = None;
    }

    /// Pick a new source image. On rejection the previous image stays.
    pub fn select_image(&mut self, bytes: Vec<u8>, declared_mime: Option<&str>) -> Result<(), EditError> {
        let result = SourceImage::from_bytes(bytes, declared_mime);
        self.accept(result)
    }

    /// Same as [`ImageEditor::select_image`], reading from disk.
    pub fn select_file(&mut self, path: &Path) -> Result<(), EditError> {
        let result = SourceImage::load(path);
        self.accept(result)
    }

    fn accept(&mut self, result: Result<SourceImage, EditError>) -> Result<(), EditError> {
        match result {
            Ok(image) => {
                self.original = Some(image);
                self.edited = None;
                self.overlay_texts.clear();
                self.error = None;
                Ok(())
            }
            Err(e) => {
                log::warn!("Image rejected: {e}");
                self.error = Some(e.user_message().to_string());
                Err(e)
            }
        }
    }

    pub fn set_prompt(&mut self, prompt: impl Into<String>) {
        self.prompt = prompt.into();
    }

    pub fn add_text(&mut self) {
        self.overlay_texts.push(String::new());
    }

    pub fn set_text(&mut self, index: usize, value: impl Into<String>) {
        if let Some(slot) = self.overlay_texts.get_mut(index) {
            *slot = value.into();
        }
    }

    pub fn remove_text(&mut self, index: usize) {
        if index < self.overlay_texts.len() {
            self.overlay_texts.remove(index);
        }
    }

    /// Run the edit. Every outcome ends in panel state; the return value is
    /// for callers that want to branch on it too.
    pub async fn submit(&mut self) -> Result<EditOutcome, EditError> {
        let Some(original) = self.original.clone().filter(|_| !self.prompt.trim().is_empty()) else {
            self.error = Some(locale::IMAGE_MISSING_INPUT.to_string());
            return Err(EditError::MissingInput);
        };

        self.error = None;
        self.loading = true;
        self.edited = None;

        let instruction = compose_instruction(&self.prompt, &self.overlay_texts);
        let result = edit_image(self.provider.as_ref(), &original, &instruction).await;
        self.loading = false;

        match &result {
            Ok(EditOutcome::Edited(image)) => {
                log::info!("Image edited ({} bytes, {})", image.data.len(), image.mime_type);
                self.edited = Some(image.clone());
            }
            Ok(EditOutcome::NoResult) => {
                log::warn!("Image model returned no image");
                self.error = Some(locale::IMAGE_NO_RESULT.to_string());
            }
            Err(e) => {
                log::error!("Error editing image: {e}");
                self.error = Some(e.user_message().to_string());
            }
        }
        result
    }

    pub fn edited_data_url(&self) -> Option<String> {
        self.edited
            .as_ref()
            .map(|image| data_url(&image.mime_type, &image.data))
    }

    /// Write the edited image as PNG. Returns false if there is nothing to save.
    pub fn save_edited(&self, path: &Path) -> Result<bool, EditError> {
        let Some(edited) = self.edited.as_ref() else {
            return Ok(false);
        };
        std::fs::write(path, to_png(edited)?)?;
        log::info!("Edited image saved to {}", path.display());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_png() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(2, 2, image::Rgb([200, 10, 10]));
        let mut out = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn compose_without_overlay_texts_keeps_prompt() {
        assert_eq!(compose_instruction("أضف قبعة", &[]), "أضف قبعة");
    }

    #[test]
    fn compose_quotes_and_joins_overlay_texts() {
        let texts = vec!["SALE".to_string(), "  ".to_string(), "50%".to_string()];
        assert_eq!(
            compose_instruction("أضف قبعة", &texts),
            "أضف قبعة. بالإضافة إلى ذلك، قم بإضافة النصوص التالية إلى الصورة: \"SALE\", \"50%\""
        );
    }

    #[test]
    fn size_gate_boundary() {
        assert!(SourceImage::from_bytes(vec![0; MAX_IMAGE_BYTES], Some("image/png")).is_ok());
        assert!(matches!(
            SourceImage::from_bytes(vec![0; MAX_IMAGE_BYTES + 1], Some("image/png")),
            Err(EditError::ImageTooLarge { size, limit }) if size == MAX_IMAGE_BYTES + 1 && limit == MAX_IMAGE_BYTES
        ));
    }

    #[test]
    fn format_is_sniffed_without_declared_type() {
        let image = SourceImage::from_bytes(tiny_png(), None).unwrap();
        assert_eq!(image.mime_type(), "image/png");
    }

    #[test]
    fn unsupported_formats_are_rejected() {
        assert!(matches!(
            SourceImage::from_bytes(vec![1, 2, 3], Some("image/gif")),
            Err(EditError::UnsupportedFormat(m)) if m == "image/gif"
        ));
        assert!(matches!(
            SourceImage::from_bytes(b"plain text".to_vec(), None),
            Err(EditError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn data_url_prefix() {
        let image = SourceImage::from_bytes(vec![1, 2, 3], Some("image/jpeg")).unwrap();
        assert_eq!(image.data_url(), "data:image/jpeg;base64,AQID");
    }

    #[test]
    fn png_passes_through_and_other_formats_are_reencoded() {
        let png = InlineImage {
            mime_type: "image/png".into(),
            data: vec![9, 9, 9],
        };
        assert_eq!(to_png(&png).unwrap(), vec![9, 9, 9]);

        let img = image::RgbImage::from_pixel(2, 2, image::Rgb([0, 0, 255]));
        let mut jpeg = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut jpeg, ImageFormat::Jpeg)
            .unwrap();
        let converted = to_png(&InlineImage {
            mime_type: "image/jpeg".into(),
            data: jpeg.into_inner(),
        })
        .unwrap();
        assert_eq!(image::guess_format(&converted).unwrap(), ImageFormat::Png);
    }

    #[test]
    fn error_messages_are_localized() {
        assert_eq!(
            EditError::ImageTooLarge { size: 1, limit: 0 }.user_message(),
            locale::IMAGE_TOO_LARGE
        );
        assert_eq!(
            EditError::Remote(AiError::ConnectionError("x".into())).user_message(),
            locale::IMAGE_REMOTE_FAILURE
        );
    }
}
