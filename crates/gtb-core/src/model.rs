use std::path::Path;

use async_trait::async_trait;

use crate::Result;

/// Generative-model port (Gemini in production).
///
/// Implementations return the generated text or an error; they never talk to
/// the chat user. `model` is a provider model name such as
/// `gemini-1.5-flash-latest`.
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    async fn generate_text(&self, model: &str, prompt: &str) -> Result<String>;

    /// Ask about an image stored at `image_path`.
    async fn generate_with_image(
        &self,
        model: &str,
        prompt: &str,
        image_path: &Path,
        mime_type: &str,
    ) -> Result<String>;
}
