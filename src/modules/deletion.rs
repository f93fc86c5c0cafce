//! Two-step deletion: a request answered with a confirm/cancel keyboard, and
//! the callback that carries the choice.
//!
//! The intent travels inside the callback data. Rights are checked when the
//! prompt is issued, not when it is answered.

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, ReplyMarkup};

use crate::audit::{self, Removed};
use crate::common::{BotEnv, Reply, UpdateHandler};
use crate::db::DbUserId;
use crate::error::Error;
use crate::models::User;
use crate::utils::ResultExt as _;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DeleteTarget {
    File(i64),
    /// Every file owned by whoever answers the prompt.
    All,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DeleteIntent {
    Confirm(DeleteTarget),
    Cancel(DeleteTarget),
}

impl DeleteIntent {
    /// Decode callback data such as `confirm_delete_12` or
    /// `cancel_delete_all`.
    pub fn parse(data: &str) -> Option<Self> {
        let (confirm, target) = match data.strip_prefix("confirm_delete_") {
            Some(target) => (true, target),
            None => (false, data.strip_prefix("cancel_delete_")?),
        };
        let target = match target {
            "all" => DeleteTarget::All,
            id => DeleteTarget::File(id.parse().ok()?),
        };
        Some(if confirm { Self::Confirm(target) } else { Self::Cancel(target) })
    }
}

impl fmt::Display for DeleteIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (action, target) = match self {
            Self::Confirm(target) => ("confirm", target),
            Self::Cancel(target) => ("cancel", target),
        };
        match target {
            DeleteTarget::File(id) => write!(f, "{action}_delete_{id}"),
            DeleteTarget::All => write!(f, "{action}_delete_all"),
        }
    }
}

fn confirmation_keyboard(target: DeleteTarget) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new([[
        InlineKeyboardButton::callback(
            "✅ Confirm",
            DeleteIntent::Confirm(target).to_string(),
        ),
        InlineKeyboardButton::callback(
            "❌ Cancel",
            DeleteIntent::Cancel(target).to_string(),
        ),
    ]])
}

/// Build the confirmation prompt, after checking that `user` may delete the
/// file.
pub async fn request(
    env: &BotEnv,
    user: &User,
    target: DeleteTarget,
) -> Result<Reply, Error> {
    let text = match target {
        DeleteTarget::File(id) => {
            let file =
                env.repo.get_file_meta(id).await?.ok_or(Error::NotFound)?;
            if !user.can_access(&file) {
                return Err(Error::PermissionDenied);
            }
            format!("Are you sure you want to delete the file {}?", file.name)
        }
        DeleteTarget::All => "Are you sure you want to delete all your files? \
                              This cannot be undone."
            .to_string(),
    };
    Ok(Reply::Markup(
        text,
        ReplyMarkup::InlineKeyboard(confirmation_keyboard(target)),
    ))
}

/// Carry out the choice made in the prompt. Returns the notice for the user.
pub async fn resolve(
    env: &BotEnv,
    requester: DbUserId,
    intent: DeleteIntent,
) -> String {
    match intent {
        DeleteIntent::Confirm(DeleteTarget::File(id)) => {
            match env.repo.delete_file(id).await {
                Ok(removed) => {
                    if removed {
                        log::info!("User {requester} deleted file {id}");
                        crate::metrics::files_deleted(1);
                        audit::spawn_mark_deleted(
                            env.audit.as_ref(),
                            Removed::File(id),
                        );
                    }
                    "File deleted.".to_string()
                }
                Err(e) => {
                    log::error!("Failed to delete file {id}: {e}");
                    "Failed to delete the file.".to_string()
                }
            }
        }
        DeleteIntent::Confirm(DeleteTarget::All) => {
            match env.repo.delete_files_by_owner(requester).await {
                Ok(count) => {
                    log::info!("User {requester} deleted all {count} files");
                    crate::metrics::files_deleted(count);
                    audit::spawn_mark_deleted(
                        env.audit.as_ref(),
                        Removed::AllOf(requester),
                    );
                    "All your files have been deleted.".to_string()
                }
                Err(e) => {
                    log::error!("Failed to delete files of {requester}: {e}");
                    "Failed to delete the files.".to_string()
                }
            }
        }
        DeleteIntent::Cancel(DeleteTarget::File(_)) => {
            "File deletion cancelled.".to_string()
        }
        DeleteIntent::Cancel(DeleteTarget::All) => {
            "Deletion of your files cancelled.".to_string()
        }
    }
}

pub fn callback_handler() -> UpdateHandler {
    dptree::filter_map(filter_callbacks).endpoint(handle_callback)
}

fn filter_callbacks(callback: CallbackQuery) -> Option<DeleteIntent> {
    DeleteIntent::parse(callback.data.as_deref()?)
}

async fn handle_callback(
    bot: Bot,
    env: Arc<BotEnv>,
    callback: CallbackQuery,
    intent: DeleteIntent,
) -> Result<()> {
    // Answered once, whatever happens below.
    bot.answer_callback_query(&callback.id)
        .await
        .warn_ok("Failed to answer callback query");

    let chat_id = callback
        .message
        .as_ref()
        .map_or_else(|| callback.from.id.into(), |m| m.chat.id);
    let notice = resolve(&env, callback.from.id.into(), intent).await;
    bot.send_message(chat_id, notice).await?;
    Ok(())
}
