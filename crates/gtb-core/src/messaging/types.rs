use crate::domain::{ChatId, MessageId, UserId};

/// Messenger-agnostic incoming update.
///
/// Commands arrive as `Text`; the dispatcher parses them so that a pending
/// question can swallow a slash-command like any other text.
#[derive(Clone, Debug)]
pub enum IncomingUpdate {
    Text(TextMessage),
    Photo(PhotoMessage),
}

impl IncomingUpdate {
    pub fn chat_id(&self) -> ChatId {
        match self {
            IncomingUpdate::Text(m) => m.chat_id,
            IncomingUpdate::Photo(m) => m.chat_id,
        }
    }

    pub fn user_id(&self) -> Option<UserId> {
        match self {
            IncomingUpdate::Text(m) => m.user_id,
            IncomingUpdate::Photo(m) => m.user_id,
        }
    }
}

#[derive(Clone, Debug)]
pub struct TextMessage {
    pub chat_id: ChatId,
    /// Absent for channel posts.
    pub user_id: Option<UserId>,
    pub message_id: MessageId,
    pub text: String,
}

#[derive(Clone, Debug)]
pub struct PhotoMessage {
    pub chat_id: ChatId,
    pub user_id: Option<UserId>,
    pub message_id: MessageId,
    /// File id of the largest available size.
    pub file_id: String,
    pub caption: Option<String>,
}

/// Outgoing "chat action" (typing indicator, etc).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatAction {
    Typing,
}

#[derive(Clone, Copy, Debug)]
pub struct MessagingCapabilities {
    pub supports_chat_actions: bool,
    pub max_message_len: usize,
}
