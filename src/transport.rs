//! Downloading files referenced by Telegram messages.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{StatusCode, Url};
use teloxide::requests::Requester;
use teloxide::Bot;

use crate::error::Error;

/// Largest accepted upload, 100 MiB.
pub const MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// A direct link to the contents of a Telegram file.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub url: Url,
    pub size: Option<u64>,
}

/// A response body. Error statuses only get this far when the body is a
/// JSON error object, anything else is an [`Error::Transport`].
#[derive(Debug, Clone)]
pub struct Fetched {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl Fetched {
    /// The API answers with a JSON error object instead of file contents
    /// when the link is wrong.
    pub fn is_error_object(&self) -> bool {
        is_json(self.content_type.as_deref())
    }
}

fn is_json(content_type: Option<&str>) -> bool {
    content_type.is_some_and(|t| t.contains("application/json"))
}

#[async_trait]
pub trait FileTransport: Send + Sync {
    /// Resolve a file id via the `getFile` API method.
    async fn resolve(&self, file_id: &str) -> Result<Resolved, Error>;

    /// Link built from the file id alone, for when `getFile` fails.
    fn fallback_url(&self, file_id: &str) -> Result<Url, Error>;

    /// Read the whole body at `url`, failing with [`Error::Oversize`] as soon
    /// as it is known to exceed `limit`.
    async fn fetch(&self, url: &Url, limit: u64) -> Result<Fetched, Error>;
}

pub struct TelegramTransport {
    bot: Bot,
    client: reqwest::Client,
}

impl TelegramTransport {
    pub const fn new(bot: Bot, client: reqwest::Client) -> Self {
        Self { bot, client }
    }

    fn file_url(&self, path: &str) -> Result<Url, Error> {
        let mut url = self.bot.api_url();
        url.path_segments_mut()
            .map_err(|()| Error::Transport("API url cannot be a base".into()))?
            .pop_if_empty()
            .push("file")
            .push(&format!("bot{}", self.bot.token()))
            .extend(path.split('/'));
        Ok(url)
    }
}

#[async_trait]
impl FileTransport for TelegramTransport {
    async fn resolve(&self, file_id: &str) -> Result<Resolved, Error> {
        let file = self
            .bot
            .get_file(file_id)
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        Ok(Resolved {
            url: self.file_url(&file.path)?,
            size: Some(u64::from(file.meta.size)),
        })
    }

    fn fallback_url(&self, file_id: &str) -> Result<Url, Error> {
        self.file_url(file_id)
    }

    async fn fetch(&self, url: &Url, limit: u64) -> Result<Fetched, Error> {
        // Errors are stripped of the url, it contains the bot token.
        let transport_error =
            |e: reqwest::Error| Error::Transport(e.without_url().to_string());

        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        // The file server answers a bad link with a JSON error object and an
        // error status. The body is kept so the caller can tell it apart.
        if !status.is_success() && !is_json(content_type.as_deref()) {
            return Err(Error::Transport(format!("file server answered {status}")));
        }
        if let Some(size) = response.content_length() {
            check_size(size, limit)?;
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(transport_error)? {
            check_size((bytes.len() + chunk.len()) as u64, limit)?;
            bytes.extend_from_slice(&chunk);
        }
        Ok(Fetched { status, content_type, bytes })
    }
}

pub fn check_size(size: u64, limit: u64) -> Result<(), Error> {
    if size > limit {
        return Err(Error::Oversize { size, limit });
    }
    Ok(())
}
