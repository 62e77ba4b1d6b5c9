//! Routes incoming updates to command handlers, the `/ask` continuation, and
//! photo questions.

use std::sync::Arc;

use crate::{
    answer::{image_error_reply, AnswerService},
    domain::{ChatId, MessageId, UserId},
    errors::Error,
    formatting::split_message,
    messaging::{
        port::MessagingPort,
        types::{IncomingUpdate, PhotoMessage, TextMessage},
    },
    pending::PendingQuestions,
    security::AuthorizationGate,
    Result,
};

pub const WELCOME: &str = "👋 Welcome to the Gemini AI Bot!\nUse /ask to ask a question or /image to solve from a photo.";
pub const DENIED: &str = "🚫 You are not authorized to use this bot.";
pub const ASK_PROMPT: &str = "🧠 Send your question now...";
pub const IMAGE_PROMPT: &str = "📸 Please send an image of the question.";
pub const OWNER_ONLY: &str = "❌ Only the owner can use this command.";
pub const AUTH_USAGE: &str = "⚙️ Usage: /auth <telegram_id>";
pub const ALREADY_AUTHORIZED: &str = "ℹ️ User already authorized.";
pub const NO_AUTHORIZED_USERS: &str = "❌ No authorized users yet.";

/// Bot commands understood by the dispatcher.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BotCommand {
    Start,
    Help,
    Ask,
    Image,
    Auth(String),
    AuthList,
    Unknown(String),
}

impl BotCommand {
    /// Parse `/cmd@botname args`. Returns `None` for text that is not a command.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if !text.starts_with('/') {
            return None;
        }

        let mut parts = text.splitn(2, char::is_whitespace);
        let first = parts.next().unwrap_or("");
        let rest = parts.next().unwrap_or("").trim().to_string();

        let name = first
            .trim_start_matches('/')
            .split('@')
            .next()
            .unwrap_or("")
            .to_lowercase();

        Some(match name.as_str() {
            "start" => BotCommand::Start,
            "help" => BotCommand::Help,
            "ask" => BotCommand::Ask,
            "image" => BotCommand::Image,
            "auth" => BotCommand::Auth(rest),
            "authlist" => BotCommand::AuthList,
            _ => BotCommand::Unknown(name),
        })
    }
}

/// Parse the single numeric argument of `/auth`.
pub fn parse_auth_arg(args: &str) -> Result<i64> {
    let Some(first) = args.split_whitespace().next() else {
        return Err(Error::Usage(AUTH_USAGE.to_string()));
    };
    first
        .parse::<i64>()
        .map_err(|_| Error::Usage(AUTH_USAGE.to_string()))
}

pub fn format_auth_list(ids: &std::collections::BTreeSet<i64>) -> String {
    if ids.is_empty() {
        return NO_AUTHORIZED_USERS.to_string();
    }
    let lines = ids
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join("\n");
    format!("👥 Authorized Users:\n{lines}")
}

/// Per-update application logic. Shared across webhook deliveries.
pub struct Dispatcher {
    gate: AuthorizationGate,
    pending: Arc<PendingQuestions>,
    answers: AnswerService,
    messenger: Arc<dyn MessagingPort>,
}

impl Dispatcher {
    pub fn new(
        gate: AuthorizationGate,
        pending: Arc<PendingQuestions>,
        answers: AnswerService,
        messenger: Arc<dyn MessagingPort>,
    ) -> Self {
        Self {
            gate,
            pending,
            answers,
            messenger,
        }
    }

    pub fn pending(&self) -> &Arc<PendingQuestions> {
        &self.pending
    }

    /// Handle one update. Errors are for logging only; user-facing failures
    /// have already been replied to.
    pub async fn handle(&self, update: IncomingUpdate) -> Result<()> {
        match update {
            IncomingUpdate::Text(msg) => self.handle_text(msg).await,
            IncomingUpdate::Photo(msg) => self.handle_photo(msg).await,
        }
    }

    async fn handle_text(&self, msg: TextMessage) -> Result<()> {
        // A pending `/ask` swallows the next text verbatim, commands included.
        if self.pending.consume(msg.chat_id) {
            return self.answer_question(msg).await;
        }

        let Some(cmd) = BotCommand::parse(&msg.text) else {
            tracing::debug!(chat_id = msg.chat_id.0, "ignoring plain text without pending question");
            return Ok(());
        };

        match cmd {
            BotCommand::Start | BotCommand::Help => {
                if self.authorize(&msg).await? {
                    self.reply(msg.chat_id, msg.message_id, WELCOME).await?;
                }
            }
            BotCommand::Ask => {
                if self.authorize(&msg).await? {
                    // The question can arrive while the prompt is still being sent.
                    self.pending.register(msg.chat_id);
                    self.reply(msg.chat_id, msg.message_id, ASK_PROMPT).await?;
                }
            }
            BotCommand::Image => {
                if self.authorize(&msg).await? {
                    self.reply(msg.chat_id, msg.message_id, IMAGE_PROMPT)
                        .await?;
                }
            }
            BotCommand::Auth(args) => self.handle_auth(&msg, &args).await?,
            BotCommand::AuthList => self.handle_auth_list(&msg).await?,
            BotCommand::Unknown(name) => {
                tracing::debug!(chat_id = msg.chat_id.0, command = %name, "ignoring unknown command");
            }
        }
        Ok(())
    }

    async fn answer_question(&self, msg: TextMessage) -> Result<()> {
        if !self.authorize(&msg).await? {
            return Ok(());
        }
        tracing::info!(
            chat_id = msg.chat_id.0,
            user_id = msg.user_id.map(|u| u.0),
            "answering question"
        );
        let answer = self.answers.answer_text(msg.chat_id, &msg.text).await;
        self.reply(msg.chat_id, msg.message_id, &answer).await
    }

    async fn handle_photo(&self, msg: PhotoMessage) -> Result<()> {
        if !self
            .authorize_sender(msg.user_id, msg.chat_id, msg.message_id)
            .await?
        {
            return Ok(());
        }

        let image = match self.messenger.download_file(&msg.file_id).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(chat_id = msg.chat_id.0, error = %e, "photo download failed");
                return self
                    .reply(msg.chat_id, msg.message_id, &image_error_reply(&e))
                    .await;
            }
        };

        tracing::info!(
            chat_id = msg.chat_id.0,
            user_id = msg.user_id.map(|u| u.0),
            bytes = image.len(),
            "answering image question"
        );
        let answer = self
            .answers
            .answer_image(msg.chat_id, &image, msg.caption.as_deref())
            .await;
        self.reply(msg.chat_id, msg.message_id, &answer).await
    }

    async fn handle_auth(&self, msg: &TextMessage, args: &str) -> Result<()> {
        if !self.gate.is_owner(msg.user_id) {
            return self.reply(msg.chat_id, msg.message_id, OWNER_ONLY).await;
        }

        let id = match parse_auth_arg(args) {
            Ok(id) => id,
            Err(Error::Usage(usage)) => {
                return self.reply(msg.chat_id, msg.message_id, &usage).await
            }
            Err(e) => return Err(e),
        };

        let reply = match self.gate.store().add(id).await {
            Ok(true) => {
                tracing::info!(authorized_id = id, "allow-list entry added");
                format!("✅ User {id} authorized successfully.")
            }
            Ok(false) => ALREADY_AUTHORIZED.to_string(),
            Err(e) => {
                tracing::error!(authorized_id = id, error = %e, "allow-list update failed");
                format!("⚠️ Error: {e}")
            }
        };
        self.reply(msg.chat_id, msg.message_id, &reply).await
    }

    async fn handle_auth_list(&self, msg: &TextMessage) -> Result<()> {
        if !self.gate.is_owner(msg.user_id) {
            return self.reply(msg.chat_id, msg.message_id, OWNER_ONLY).await;
        }
        let ids = self.gate.store().load().await?;
        self.reply(msg.chat_id, msg.message_id, &format_auth_list(&ids))
            .await
    }

    async fn authorize(&self, msg: &TextMessage) -> Result<bool> {
        self.authorize_sender(msg.user_id, msg.chat_id, msg.message_id)
            .await
    }

    /// Gate check plus the denial reply.
    async fn authorize_sender(
        &self,
        user_id: Option<UserId>,
        chat_id: ChatId,
        message_id: MessageId,
    ) -> Result<bool> {
        if self.gate.is_authorized(user_id, chat_id).await? {
            return Ok(true);
        }
        tracing::info!(
            chat_id = chat_id.0,
            user_id = user_id.map(|u| u.0),
            policy = %self.gate.policy(),
            "unauthorized"
        );
        self.reply(chat_id, message_id, DENIED).await?;
        Ok(false)
    }

    async fn reply(&self, chat_id: ChatId, message_id: MessageId, text: &str) -> Result<()> {
        let limit = self.messenger.capabilities().max_message_len;
        for (i, chunk) in split_message(text, limit).iter().enumerate() {
            // Only the first chunk is threaded as a reply.
            let reply_to = (i == 0).then_some(message_id);
            self.messenger.send_text(chat_id, chunk, reply_to).await?;
        }
        Ok(())
    }
}
