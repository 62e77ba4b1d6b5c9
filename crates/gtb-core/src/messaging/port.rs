use async_trait::async_trait;

use crate::{
    domain::{ChatId, MessageId, MessageRef},
    messaging::types::{ChatAction, MessagingCapabilities},
    Result,
};

/// Messenger port used by the dispatcher and the answer service.
///
/// Telegram is the only implementation; tests substitute an in-memory recorder.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    fn capabilities(&self) -> MessagingCapabilities;

    /// Send plain text, optionally as a reply to `reply_to`.
    async fn send_text(
        &self,
        chat_id: ChatId,
        text: &str,
        reply_to: Option<MessageId>,
    ) -> Result<MessageRef>;

    async fn send_chat_action(&self, chat_id: ChatId, action: ChatAction) -> Result<()>;

    /// Download a file previously received from the messenger into memory.
    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>>;
}
