use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use crate::{
    config::Config,
    domain::ChatId,
    errors::Error,
    messaging::{port::MessagingPort, types::ChatAction},
    model::GenerativeModel,
    Result,
};

static IMAGE_COUNTER: AtomicUsize = AtomicUsize::new(1);

/// Prompt/model settings for [`AnswerService`].
#[derive(Clone, Debug)]
pub struct AnswerSettings {
    pub text_model: String,
    pub vision_model: String,
    pub image_prompt: String,
    pub temp_dir: PathBuf,
}

impl AnswerSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            text_model: cfg.text_model.clone(),
            vision_model: cfg.vision_model.clone(),
            image_prompt: cfg.effective_image_prompt(),
            temp_dir: cfg.temp_dir.clone(),
        }
    }
}

/// Turns questions into reply text.
///
/// Model failures never escape: they come back as a formatted error string
/// that the caller sends to the chat like any other answer.
pub struct AnswerService {
    model: Arc<dyn GenerativeModel>,
    messenger: Arc<dyn MessagingPort>,
    settings: AnswerSettings,
}

impl AnswerService {
    pub fn new(
        model: Arc<dyn GenerativeModel>,
        messenger: Arc<dyn MessagingPort>,
        settings: AnswerSettings,
    ) -> Self {
        Self {
            model,
            messenger,
            settings,
        }
    }

    pub async fn answer_text(&self, chat_id: ChatId, question: &str) -> String {
        self.typing(chat_id).await;

        match self.generate_text(question).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(chat_id = chat_id.0, error = %e, "text answer failed");
                format!("⚠️ Error: {e}")
            }
        }
    }

    /// `caption` is appended to the image prompt when present.
    pub async fn answer_image(
        &self,
        chat_id: ChatId,
        image: &[u8],
        caption: Option<&str>,
    ) -> String {
        self.typing(chat_id).await;

        match self.generate_for_image(image, caption).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(chat_id = chat_id.0, error = %e, "image answer failed");
                image_error_reply(&e)
            }
        }
    }

    async fn typing(&self, chat_id: ChatId) {
        if !self.messenger.capabilities().supports_chat_actions {
            return;
        }
        if let Err(e) = self
            .messenger
            .send_chat_action(chat_id, ChatAction::Typing)
            .await
        {
            tracing::debug!(chat_id = chat_id.0, error = %e, "typing indicator failed");
        }
    }

    async fn generate_text(&self, question: &str) -> Result<String> {
        let text = self
            .model
            .generate_text(&self.settings.text_model, question)
            .await?;
        non_empty_answer(text)
    }

    async fn generate_for_image(&self, image: &[u8], caption: Option<&str>) -> Result<String> {
        let mime = sniff_image_mime(image);
        let file = TempImage::write(&self.settings.temp_dir, image, mime).await?;

        let prompt = match caption.map(str::trim).filter(|c| !c.is_empty()) {
            Some(c) => format!("{}\n\n{c}", self.settings.image_prompt),
            None => self.settings.image_prompt.clone(),
        };

        let result = self
            .model
            .generate_with_image(&self.settings.vision_model, &prompt, file.path(), mime)
            .await;
        file.remove().await;

        non_empty_answer(result?)
    }
}

pub fn image_error_reply(e: &Error) -> String {
    format!("⚠️ Error processing image: {e}")
}

fn non_empty_answer(text: String) -> Result<String> {
    if text.trim().is_empty() {
        return Err(Error::External("model returned an empty answer".to_string()));
    }
    Ok(text)
}

/// Best-effort content sniffing; Telegram photos are JPEG.
pub fn sniff_image_mime(bytes: &[u8]) -> &'static str {
    match bytes {
        [0x89, b'P', b'N', b'G', ..] => "image/png",
        [b'G', b'I', b'F', b'8', ..] => "image/gif",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "image/webp",
        _ => "image/jpeg",
    }
}

/// Transient image file, removed by `remove()` or, failing that, on drop.
struct TempImage {
    path: PathBuf,
    removed: bool,
}

impl TempImage {
    async fn write(dir: &Path, bytes: &[u8], mime: &str) -> Result<Self> {
        tokio::fs::create_dir_all(dir).await?;

        let ext = mime.rsplit('/').next().unwrap_or("jpg");
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let n = IMAGE_COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = dir.join(format!("image_{ts}_{}_{n}.{ext}", std::process::id()));

        let file = Self {
            path,
            removed: false,
        };
        // On a failed write the guard drops here and cleans up the partial file.
        tokio::fs::write(&file.path, bytes).await?;
        Ok(file)
    }

    fn path(&self) -> &Path {
        &self.path
    }

    async fn remove(mut self) {
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove temp image");
            }
        }
        self.removed = true;
    }
}

impl Drop for TempImage {
    fn drop(&mut self) {
        if !self.removed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}
