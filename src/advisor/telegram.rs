//! Telegram client using teloxide.

use teloxide::prelude::*;
use teloxide::types::{
    CallbackQueryId, ChatAction, InlineKeyboardButton, InlineKeyboardMarkup, InputFile, LinkPreviewOptions,
    MessageId, ParseMode,
};
use tracing::{debug, warn};

use crate::format::markup::{chunk, escape, to_plain};
use crate::persona::Persona;

fn no_preview() -> LinkPreviewOptions {
    LinkPreviewOptions {
        is_disabled: true,
        url: None,
        prefer_small_media: false,
        prefer_large_media: false,
        show_above_text: false,
    }
}

/// Advisor picker shown by /start.
pub fn persona_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(
        Persona::ALL
            .iter()
            .map(|p| vec![InlineKeyboardButton::callback(p.name(), format!("select_{}", p.tag()))]),
    )
}

pub fn export_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
        "📝 Markdown",
        "export_markdown",
    )]])
}

/// Telegram API client.
pub struct TelegramClient {
    bot: Bot,
    max_message_length: usize,
}

impl TelegramClient {
    pub fn new(bot: Bot, max_message_length: usize) -> Self {
        Self { bot, max_message_length }
    }

    /// Send plain text as MarkdownV2: escaped, chunked, plain on rejection.
    pub async fn send_formatted(&self, chat_id: i64, text: &str) -> Result<(), String> {
        self.send_markdown(chat_id, &escape(text)).await
    }

    /// Send text that is already MarkdownV2, chunked, each chunk degrading
    /// to plain text if Telegram refuses the markup.
    pub async fn send_markdown(&self, chat_id: i64, markdown: &str) -> Result<(), String> {
        let chunks = chunk(markdown, self.max_message_length);
        debug!("Sending {} chunk(s) to {chat_id}", chunks.len());
        for piece in chunks {
            self.send_markdown_chunk(chat_id, &piece, None).await?;
        }
        Ok(())
    }

    /// One MarkdownV2 message with an optional inline keyboard.
    pub async fn send_markdown_with_keyboard(
        &self,
        chat_id: i64,
        markdown: &str,
        keyboard: InlineKeyboardMarkup,
    ) -> Result<(), String> {
        self.send_markdown_chunk(chat_id, markdown, Some(keyboard)).await
    }

    async fn send_markdown_chunk(
        &self,
        chat_id: i64,
        markdown: &str,
        keyboard: Option<InlineKeyboardMarkup>,
    ) -> Result<(), String> {
        let mut request = self
            .bot
            .send_message(ChatId(chat_id), markdown)
            .parse_mode(ParseMode::MarkdownV2)
            .link_preview_options(no_preview());
        if let Some(ref kb) = keyboard {
            request = request.reply_markup(kb.clone());
        }

        if let Err(e) = request.await {
            warn!("MarkdownV2 send failed, retrying as plain text: {e}");
            let mut plain = self
                .bot
                .send_message(ChatId(chat_id), to_plain(markdown))
                .link_preview_options(no_preview());
            if let Some(kb) = keyboard {
                plain = plain.reply_markup(kb);
            }
            plain.await.map_err(|e| {
                let msg = format!("Failed to send: {e}");
                warn!("{}", msg);
                msg
            })?;
        }
        Ok(())
    }

    /// Replace the text of a message the bot sent (callback answers).
    pub async fn edit_markdown(&self, chat_id: i64, message_id: i32, markdown: &str) -> Result<(), String> {
        let request = self
            .bot
            .edit_message_text(ChatId(chat_id), MessageId(message_id), markdown)
            .parse_mode(ParseMode::MarkdownV2);
        if let Err(e) = request.await {
            warn!("MarkdownV2 edit failed, retrying as plain text: {e}");
            self.bot
                .edit_message_text(ChatId(chat_id), MessageId(message_id), to_plain(markdown))
                .await
                .map_err(|e| {
                    let msg = format!("Failed to edit message: {e}");
                    warn!("{}", msg);
                    msg
                })?;
        }
        Ok(())
    }

    pub async fn send_typing(&self, chat_id: i64) {
        if let Err(e) = self.bot.send_chat_action(ChatId(chat_id), ChatAction::Typing).await {
            debug!("Failed to send typing action: {e}");
        }
    }

    pub async fn send_document(
        &self,
        chat_id: i64,
        data: Vec<u8>,
        file_name: &str,
        caption: &str,
    ) -> Result<(), String> {
        let file = InputFile::memory(data).file_name(file_name.to_string());
        self.bot
            .send_document(ChatId(chat_id), file)
            .caption(caption)
            .await
            .map_err(|e| {
                let msg = format!("Failed to send document: {e}");
                warn!("{}", msg);
                msg
            })?;
        Ok(())
    }

    pub async fn answer_callback(&self, callback_id: CallbackQueryId) {
        if let Err(e) = self.bot.answer_callback_query(callback_id).await {
            debug!("Failed to answer callback: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use teloxide::types::InlineKeyboardButtonKind;

    fn callback_data(kb: &InlineKeyboardMarkup) -> Vec<String> {
        kb.inline_keyboard
            .iter()
            .flatten()
            .filter_map(|b| match &b.kind {
                InlineKeyboardButtonKind::CallbackData(d) => Some(d.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_persona_keyboard() {
        let kb = persona_keyboard();
        assert_eq!(kb.inline_keyboard.len(), 2);
        assert_eq!(callback_data(&kb), vec!["select_pm", "select_vc"]);
    }

    #[test]
    fn test_export_keyboard() {
        assert_eq!(callback_data(&export_keyboard()), vec!["export_markdown"]);
    }
}
