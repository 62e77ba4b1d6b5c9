use teloxide::types::{Message, Update, UpdateKind};

use gtb_core::{
    domain::{ChatId, MessageId, UserId},
    messaging::types::{IncomingUpdate, PhotoMessage, TextMessage},
};

/// Map a Telegram update to the core model. Returns `None` for update kinds the
/// bot does not handle (edits, callbacks, stickers, ...).
pub fn incoming_from_update(update: &Update) -> Option<IncomingUpdate> {
    match &update.kind {
        UpdateKind::Message(msg) | UpdateKind::ChannelPost(msg) => incoming_from_message(msg),
        _ => None,
    }
}

pub fn incoming_from_message(msg: &Message) -> Option<IncomingUpdate> {
    let chat_id = ChatId(msg.chat.id.0);
    let user_id = msg.from().map(|u| UserId(u.id.0 as i64));
    let message_id = MessageId(msg.id.0);

    if let Some(text) = msg.text() {
        return Some(IncomingUpdate::Text(TextMessage {
            chat_id,
            user_id,
            message_id,
            text: text.to_string(),
        }));
    }

    if let Some(photos) = msg.photo() {
        // Sizes are ordered smallest to largest.
        let best = photos.last()?;
        return Some(IncomingUpdate::Photo(PhotoMessage {
            chat_id,
            user_id,
            message_id,
            file_id: best.file.id.clone(),
            caption: msg.caption().map(|s| s.to_string()),
        }));
    }

    None
}
