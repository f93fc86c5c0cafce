#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
// Restriction lints
#![warn(
    clippy::clone_on_ref_ptr,
    clippy::deref_by_slicing,
    clippy::if_then_some_else_none,
    clippy::undocumented_unsafe_blocks,
    clippy::unnecessary_cast,
    clippy::unnecessary_safety_comment
)]
// False positives
#![allow(clippy::needless_pass_by_value)] // for dptree handlers
// Style
#![allow(clippy::items_after_statements)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::redundant_closure_for_method_calls)]
#![allow(clippy::module_name_repetitions)]
// Style in tests
#![cfg_attr(
    test,
    allow(clippy::iter_on_empty_collections, clippy::iter_on_single_items)
)]

use std::ffi::{OsStr, OsString};
use std::fs::File;
use std::sync::{Arc, OnceLock};

use anyhow::{Context as _, Result};
use argh::FromArgs;
use metrics_exporter_prometheus::PrometheusBuilder;
use teloxide::dispatching::{Dispatcher, UpdateFilterExt};
use teloxide::payloads::AnswerCallbackQuerySetters;
use teloxide::requests::Requester;
use teloxide::types::{CallbackQuery, Message, Update};
use teloxide::Bot;

use crate::audit::{AuditSink, SheetsAuditSink};
use crate::file_store::MongoFileStore;
use crate::repo::Repository;
use crate::transport::TelegramTransport;

mod audit;
mod common;
mod config;
mod db;
mod error;
mod file_store;
mod metrics;
mod models;
mod modules;
mod repo;
mod schema;
mod transport;
mod utils;

static VERSION: OnceLock<String> = OnceLock::new();

fn version() -> &'static str {
    VERSION.get().map_or("unknown", String::as_str)
}

/// filekeeper
#[derive(FromArgs, PartialEq, Debug)]
struct Args {
    #[argh(option, hidden_help = true, long = "-set-revision")]
    set_revision: Option<String>,

    #[argh(subcommand)]
    subcommand: SubCommand,
}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand)]
enum SubCommand {
    Bot(SubCommandBot),
    CheckConfig(SubCommandCheckConfig),
}

/// run the bot
#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand, name = "bot")]
struct SubCommandBot {
    /// config file
    #[argh(positional)]
    config_file: OsString,
}

/// parse and validate a config file, then exit
#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand, name = "check-config")]
struct SubCommandCheckConfig {
    /// config file
    #[argh(positional)]
    config_file: OsString,
}

#[tokio::main]
async fn main() -> Result<()> {
    if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "info");
    }
    pretty_env_logger::init();
    let args: Args = argh::from_env();
    VERSION.get_or_init(|| {
        args.set_revision.clone().unwrap_or_else(|| {
            git_version::git_version!(fallback = "unknown").to_string()
        })
    });
    log::info!("Version {}", version());
    match args.subcommand {
        SubCommand::Bot(c) => run_bot(&c.config_file).await?,
        SubCommand::CheckConfig(c) => {
            load_config(&c.config_file)?;
            log::info!("Config is valid");
        }
    }
    Ok(())
}

fn load_config(config_fpath: &OsStr) -> Result<config::Config> {
    let file = File::open(config_fpath).with_context(|| {
        format!("Failed to open config {}", config_fpath.to_string_lossy())
    })?;
    let config: config::Config = serde_yaml::from_reader(file)
        .map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))?;
    config.validate()?;
    Ok(config)
}

async fn run_bot(config_fpath: &OsStr) -> Result<()> {
    let config = load_config(config_fpath)?;

    if let Some(addr) = config.metrics_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("Failed to start the metrics exporter")?;
        log::info!("Serving metrics on {addr}");
    }
    metrics::register_metrics();

    let conn = db::establish(&config.storage.sqlite)
        .context("Failed to open the user database")?;
    let files = MongoFileStore::connect(
        &config.storage.mongo_uri,
        &config.storage.mongo_db,
    )
    .await
    .context("Failed to connect to MongoDB")?;
    let repo = Repository::new(conn, Arc::new(files));
    let admins = repo
        .reconcile_admins(&config.admins)
        .context("Failed to update administrator flags")?;
    log::info!("{admins} registered users are administrators");

    let bot = Bot::new(&config.telegram.token);
    let reqwest_client = reqwest::Client::new();
    let audit = match &config.audit {
        Some(sheet) => {
            let tokens = audit::service_account(&sheet.credentials)
                .await
                .context("Failed to load audit sheet credentials")?;
            log::info!("Logging uploads to spreadsheet {}", sheet.spreadsheet_id);
            Some(Arc::new(SheetsAuditSink::new(
                reqwest_client.clone(),
                sheet,
                Arc::new(tokens),
            )) as Arc<dyn AuditSink>)
        }
        None => None,
    };
    let worker_queue_size = config.telegram.worker_queue_size;

    let bot_env = Arc::new(common::BotEnv {
        repo,
        transport: Arc::new(TelegramTransport::new(bot.clone(), reqwest_client)),
        audit,
        config: Arc::new(config),
    });

    let mut dispatcher = Dispatcher::builder(
        bot,
        dptree::entry()
            .branch(
                Update::filter_message()
                    .filter(|msg: Message| !msg.chat.is_channel())
                    .filter_map_async(modules::session::filter_active)
                    .branch(modules::commands::command_handler())
                    .branch(modules::files::message_handler())
                    .endpoint(modules::commands::handle_text),
            )
            .branch(
                Update::filter_callback_query()
                    .branch(modules::deletion::callback_handler())
                    .endpoint(drop_callback_query),
            )
            .endpoint(drop_endpoint),
    )
    .dependencies(dptree::deps![Arc::clone(&bot_env)])
    // Updates of one user are handled in order, one at a time.
    .distribution_function(|upd: &Update| upd.user().map(|u| u.id))
    .worker_queue_size(worker_queue_size)
    .build();

    run_signal_handler(dispatcher.shutdown_token());
    dispatcher.dispatch().await;

    Ok(())
}

async fn drop_callback_query(
    bot: Bot,
    callback_query: CallbackQuery,
) -> Result<()> {
    log::warn!(
        "Unexpected callback query from {}: {:?}",
        callback_query.from.id.0,
        callback_query.data,
    );
    bot.answer_callback_query(&callback_query.id)
        .text("Error: unexpected callback query")
        .await?;
    Ok(())
}

async fn drop_endpoint() -> Result<()> {
    Ok(())
}

/// What stops the bot: ^C, and SIGTERM where the platform has it.
struct StopSignals {
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl StopSignals {
    fn new() -> std::io::Result<Self> {
        Ok(Self {
            #[cfg(unix)]
            terminate: tokio::signal::unix::signal(
                tokio::signal::unix::SignalKind::terminate(),
            )?,
        })
    }

    /// Wait for the next signal, returns its name.
    #[cfg(unix)]
    async fn recv(&mut self) -> std::io::Result<&'static str> {
        #[allow(clippy::redundant_pub_crate)]
        let name = tokio::select! {
            r = tokio::signal::ctrl_c() => r.map(|()| "^C")?,
            _ = self.terminate.recv() => "SIGTERM",
        };
        Ok(name)
    }

    #[cfg(not(unix))]
    async fn recv(&mut self) -> std::io::Result<&'static str> {
        tokio::signal::ctrl_c().await.map(|()| "^C")
    }
}

fn run_signal_handler(bot_shutdown_token: teloxide::dispatching::ShutdownToken) {
    tokio::spawn(async move {
        let mut signals = match StopSignals::new() {
            Ok(signals) => signals,
            Err(e) => {
                log::error!("Failed to install signal handlers: {e}");
                return;
            }
        };
        loop {
            let signal = match signals.recv().await {
                Ok(signal) => signal,
                Err(e) => {
                    log::error!("Failed to listen for signals: {e}");
                    return;
                }
            };
            match bot_shutdown_token.shutdown() {
                #[allow(
                    clippy::redundant_pub_crate,
                    // reason = "https://github.com/rust-lang/rust-clippy/issues/10636"
                )]
                Ok(f) => {
                    log::info!(
                        "{signal} received, trying to shutdown the dispatcher..."
                    );
                    tokio::select! {
                        () = f => {
                            log::info!("dispatcher is shutdown...");
                        }
                        _ = signals.recv() => {
                            log::info!("Got another signal, exiting immediately");
                            std::process::exit(0);
                        }
                    }
                }
                Err(_) => {
                    log::info!("{signal} received, the dispatcher isn't running, ignoring the signal");
                }
            }
        }
    });
}
