use std::fmt::Write as _;
use std::sync::Arc;

use anyhow::Result;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;

use crate::common::{BotEnv, Reply, UpdateHandler};
use crate::error::Error;
use crate::models::User;
use crate::modules::deletion::{self, DeleteTarget};
use crate::transport::MAX_FILE_SIZE;

const UNKNOWN_COMMAND: &str = "Sorry, there is no such command. \
                               Use /start to see the available commands.";

#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
pub enum Command {
    #[command(description = "show this help.")]
    Start,

    #[command(description = "list your files.")]
    List,

    #[command(description = "show a file by its ID.")]
    Show(String),

    #[command(description = "delete a file by its ID.")]
    Delete(String),

    #[command(description = "delete all your files.")]
    Deleteall,
}

pub fn command_handler() -> UpdateHandler {
    teloxide::filter_command::<Command, _>().endpoint(handle_command)
}

async fn handle_command(
    bot: Bot,
    env: Arc<BotEnv>,
    msg: Message,
    user: User,
    command: Command,
) -> Result<()> {
    log::info!("User {} sent {command:?}", user.id);
    execute(&env, &user, command).await.send(&bot, msg.chat.id).await?;
    Ok(())
}

/// Answer to anything that is neither a command nor a file.
pub async fn handle_text(bot: Bot, msg: Message, user: User) -> Result<()> {
    let text = if msg.text().is_some_and(|t| t.starts_with('/')) {
        UNKNOWN_COMMAND.to_string()
    } else {
        status_text(&user)
    };
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

fn status_text(user: &User) -> String {
    let role = if user.is_admin { "administrator" } else { "user" };
    format!(
        "Your message has been received, {}.\nYour status: {role}",
        user.first_name
    )
}

pub async fn execute(env: &BotEnv, user: &User, command: Command) -> Reply {
    match command {
        Command::Start => Reply::text(help_text()),
        Command::List => Reply::text(list(env, user).await),
        Command::Show(arg) => show(env, user, &arg)
            .await
            .unwrap_or_else(|e| Reply::text(failure_text("show", &e))),
        Command::Delete(arg) => delete(env, user, &arg)
            .await
            .unwrap_or_else(|e| Reply::text(failure_text("delete", &e))),
        Command::Deleteall => deletion::request(env, user, DeleteTarget::All)
            .await
            .unwrap_or_else(|e| Reply::text(failure_text("delete", &e))),
    }
}

fn help_text() -> String {
    format!(
        "Welcome! I keep your files safe.\n\n\
         {}\n\n\
         Limits:\n\
         - Maximum file size: {} MB\n\
         - Supported files: documents, photos, videos, audio and voice \
         messages\n\n\
         Just send me any file to get started!",
        Command::descriptions(),
        MAX_FILE_SIZE / 1024 / 1024,
    )
}

/// Administrators see every file, others only their own.
async fn list(env: &BotEnv, user: &User) -> String {
    let files = if user.is_admin {
        env.repo.get_all_files().await
    } else {
        env.repo.get_files_by_owner(user.id).await
    };
    let files = match files {
        Ok(files) => files,
        Err(e) => {
            log::error!("Failed to list files for {}: {e}", user.id);
            return "Failed to get the list of files.".to_string();
        }
    };
    if files.is_empty() {
        return "You have no files.".to_string();
    }

    let mut text =
        if user.is_admin { "All files:\n" } else { "Your files:\n" }.to_string();
    for (idx, file) in files.iter().enumerate() {
        writeln!(text, "{}. {} (ID: {})", idx + 1, file.name, file.id).unwrap();
    }
    text
}

async fn show(env: &BotEnv, user: &User, arg: &str) -> Result<Reply, Error> {
    let id = parse_id(arg)?;
    let meta = env.repo.get_file_meta(id).await?.ok_or(Error::NotFound)?;
    if !user.can_access(&meta) {
        return Err(Error::PermissionDenied);
    }
    let file = env.repo.get_file(id).await?.ok_or(Error::NotFound)?;
    log::info!("Sending file {id} to {}", user.id);
    Ok(Reply::File(file))
}

async fn delete(env: &BotEnv, user: &User, arg: &str) -> Result<Reply, Error> {
    let id = parse_id(arg)?;
    deletion::request(env, user, DeleteTarget::File(id)).await
}

fn parse_id(arg: &str) -> Result<i64, Error> {
    let arg = arg.trim();
    arg.parse().map_err(|_| Error::MalformedInput(arg.to_string()))
}

fn failure_text(command: &str, error: &Error) -> String {
    match error {
        Error::MalformedInput(arg) if arg.is_empty() => {
            format!("Please specify a file ID, e.g. /{command} 1")
        }
        Error::MalformedInput(_) => "Invalid file ID.".to_string(),
        Error::NotFound => "File not found.".to_string(),
        Error::PermissionDenied => {
            format!("You do not have permission to {command} this file.")
        }
        e => {
            log::error!("/{command} failed: {e}");
            match command {
                "delete" => "Failed to delete the file.",
                _ => "Failed to get the file.",
            }
            .to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use teloxide::types::ReplyMarkup;

    use super::*;
    use crate::common::{test_env, test_env_with};
    use crate::db::DbUserId;
    use crate::file_store::failing::FailingFileStore;
    use crate::file_store::memory::MemoryFileStore;
    use crate::models::{test_user, NewFile};
    use crate::transport::stub::StubTransport;

    async fn env_with_files() -> (BotEnv, Arc<MemoryFileStore>) {
        let (env, files) = test_env(
            &[],
            Arc::new(StubTransport::serving(Vec::new())),
        );
        for (owner, name, file_type) in [
            (1, "cat.jpg", "image/jpeg"),
            (2, "notes.txt", "text/plain"),
        ] {
            env.repo
                .save_file(&NewFile {
                    owner: DbUserId(owner),
                    name: name.to_string(),
                    file_type: file_type.to_string(),
                    data: name.as_bytes().to_vec(),
                    created_at: Utc::now(),
                })
                .await
                .unwrap();
        }
        (env, files)
    }

    async fn text(env: &BotEnv, user: &User, command: Command) -> String {
        let reply = execute(env, user, command).await;
        reply.as_text().expect("text reply").to_string()
    }

    #[test]
    fn parse_commands() {
        let parse = |text: &str| Command::parse(text, "filekeeper_bot").ok();
        assert_eq!(parse("/start"), Some(Command::Start));
        assert_eq!(parse("/list@filekeeper_bot"), Some(Command::List));
        assert_eq!(parse("/show 12"), Some(Command::Show("12".to_string())));
        assert_eq!(parse("/delete 3"), Some(Command::Delete("3".to_string())));
        assert_eq!(parse("/deleteall"), Some(Command::Deleteall));
        assert_eq!(parse("/upload"), None);
    }

    #[tokio::test]
    async fn help_lists_commands() {
        let (env, _) = env_with_files().await;
        let help = text(&env, &test_user(1, "alice", false), Command::Start).await;
        for command in ["/list", "/show", "/delete", "/deleteall", "100 MB"] {
            assert!(help.contains(command), "{command} missing from {help}");
        }
    }

    #[tokio::test]
    async fn list_by_role() {
        let (env, _) = env_with_files().await;
        assert_eq!(
            text(&env, &test_user(1, "alice", false), Command::List).await,
            "Your files:\n1. cat.jpg (ID: 1)\n"
        );
        assert_eq!(
            text(&env, &test_user(9, "root", true), Command::List).await,
            "All files:\n1. cat.jpg (ID: 1)\n2. notes.txt (ID: 2)\n"
        );
        assert_eq!(
            text(&env, &test_user(3, "carol", false), Command::List).await,
            "You have no files."
        );
    }

    #[tokio::test]
    async fn show_checks_rights() {
        let (env, _) = env_with_files().await;
        let owner = test_user(1, "alice", false);
        let show = |arg: &str| Command::Show(arg.to_string());

        let Reply::File(file) = execute(&env, &owner, show("1")).await else {
            panic!("file expected");
        };
        assert_eq!(file.meta.name, "cat.jpg");
        assert_eq!(file.data, b"cat.jpg");

        assert_eq!(
            text(&env, &owner, show("2")).await,
            "You do not have permission to show this file."
        );
        let admin = test_user(9, "root", true);
        assert!(matches!(
            execute(&env, &admin, show("2")).await,
            Reply::File(_)
        ));

        assert_eq!(text(&env, &owner, show("7")).await, "File not found.");
        assert_eq!(text(&env, &owner, show("one")).await, "Invalid file ID.");
        assert_eq!(
            text(&env, &owner, show("")).await,
            "Please specify a file ID, e.g. /show 1"
        );
    }

    #[tokio::test]
    async fn delete_asks_for_confirmation() {
        let (env, files) = env_with_files().await;
        let owner = test_user(1, "alice", false);

        let reply = execute(&env, &owner, Command::Delete(" 1 ".into())).await;
        assert!(matches!(
            reply,
            Reply::Markup(_, ReplyMarkup::InlineKeyboard(_))
        ));
        assert_eq!(
            text(&env, &owner, Command::Delete("2".into())).await,
            "You do not have permission to delete this file."
        );
        assert!(matches!(
            execute(&env, &owner, Command::Deleteall).await,
            Reply::Markup(_, ReplyMarkup::InlineKeyboard(_))
        ));
        assert_eq!(files.ids(), [1, 2]);
    }

    #[tokio::test]
    async fn storage_failures_name_the_command() {
        let env = test_env_with(
            crate::db::in_memory(),
            Arc::new(FailingFileStore::everything()),
            &[],
            Arc::new(StubTransport::serving(Vec::new())),
        );
        let user = test_user(1, "alice", false);
        assert_eq!(
            text(&env, &user, Command::Show("1".into())).await,
            "Failed to get the file."
        );
        assert_eq!(
            text(&env, &user, Command::Delete("1".into())).await,
            "Failed to delete the file."
        );
        assert_eq!(
            text(&env, &user, Command::List).await,
            "Failed to get the list of files."
        );
    }

    #[test]
    fn status_by_role() {
        assert_eq!(
            status_text(&test_user(1, "alice", false)),
            "Your message has been received, ALICE.\nYour status: user"
        );
        assert!(status_text(&test_user(2, "root", true))
            .ends_with("Your status: administrator"));
    }
}
