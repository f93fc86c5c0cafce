//! Common helpers to be used by various bot modules.

use std::sync::Arc;

use teloxide::prelude::*;
use teloxide::types::{InputFile, ReplyMarkup};
use teloxide::RequestError;

use crate::audit::AuditSink;
use crate::config::Config;
use crate::models::StoredFile;
use crate::repo::Repository;
use crate::transport::FileTransport;

#[cfg(test)]
pub mod test_api;

/// Wrapper around [`teloxide::dispatching::UpdateHandler`] to be used in this
/// crate.
pub type UpdateHandler = teloxide::dispatching::UpdateHandler<anyhow::Error>;

/// Bot environment: state shared between all handlers, injected into every
/// one of them by the dispatcher.
pub struct BotEnv {
    pub repo: Repository,
    pub config: Arc<Config>,
    pub transport: Arc<dyn FileTransport>,
    pub audit: Option<Arc<dyn AuditSink>>,
}

/// An answer to the user, decided before anything is sent.
#[derive(Debug)]
pub enum Reply {
    Text(String),
    Markup(String, ReplyMarkup),
    /// Send the stored contents back, typed by MIME prefix.
    File(StoredFile),
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Text of the reply, if it has one.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) | Self::Markup(text, _) => Some(text),
            Self::File(_) => None,
        }
    }

    pub async fn send(self, bot: &Bot, chat_id: ChatId) -> Result<(), RequestError> {
        match self {
            Self::Text(text) => {
                bot.send_message(chat_id, text).await?;
            }
            Self::Markup(text, markup) => {
                bot.send_message(chat_id, text).reply_markup(markup).await?;
            }
            Self::File(file) => send_file(bot, chat_id, file).await?,
        }
        Ok(())
    }
}

const SEND_FAILED: &str = "Failed to send the file.";

/// Telegram method a stored file is sent back with.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SendAs {
    Photo,
    Video,
    Audio,
    Document,
}

impl SendAs {
    /// Methods to try in order. Typed methods have tighter size limits than
    /// documents, so a document is always the last resort.
    pub fn attempts(file_type: &str) -> &'static [Self] {
        if file_type.starts_with("image/") {
            &[Self::Photo, Self::Document]
        } else if file_type.starts_with("video/") {
            &[Self::Video, Self::Document]
        } else if file_type.starts_with("audio/") {
            &[Self::Audio, Self::Document]
        } else {
            &[Self::Document]
        }
    }
}

/// Send stored contents back, falling back to a plain document and finally
/// to a text notice, so that the user always gets an answer.
async fn send_file(
    bot: &Bot,
    chat_id: ChatId,
    file: StoredFile,
) -> Result<(), RequestError> {
    let id = file.meta.id;
    let input = InputFile::memory(file.data).file_name(file.meta.name);
    for &send_as in SendAs::attempts(&file.meta.file_type) {
        let sent = match send_as {
            SendAs::Photo => bot.send_photo(chat_id, input.clone()).await,
            SendAs::Video => bot.send_video(chat_id, input.clone()).await,
            SendAs::Audio => bot.send_audio(chat_id, input.clone()).await,
            SendAs::Document => bot.send_document(chat_id, input.clone()).await,
        };
        match sent {
            Ok(_) => return Ok(()),
            Err(e) => log::warn!("Failed to send file {id} as {send_as:?}: {e}"),
        }
    }
    bot.send_message(chat_id, SEND_FAILED).await?;
    Ok(())
}

#[cfg(test)]
pub fn test_env(
    admins: &[(&str, bool)],
    transport: Arc<dyn FileTransport>,
) -> (BotEnv, Arc<crate::file_store::memory::MemoryFileStore>) {
    let files = Arc::new(crate::file_store::memory::MemoryFileStore::default());
    let env = test_env_with(
        crate::db::in_memory(),
        Arc::clone(&files) as _,
        admins,
        transport,
    );
    (env, files)
}

#[cfg(test)]
pub fn test_env_with(
    conn: diesel::SqliteConnection,
    files: Arc<dyn crate::file_store::FileStore>,
    admins: &[(&str, bool)],
    transport: Arc<dyn FileTransport>,
) -> BotEnv {
    BotEnv {
        repo: Repository::new(conn, files),
        config: Arc::new(crate::config::test_config(admins)),
        transport,
        audit: None,
    }
}
