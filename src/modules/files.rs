//! Ingestion of uploaded media: download, size ceiling, dedup, store.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use teloxide::prelude::*;
use teloxide::types::FileMeta as TgFileMeta;

use crate::audit::{self, UploadEntry};
use crate::common::{BotEnv, Reply, UpdateHandler};
use crate::error::Error;
use crate::models::{FileMeta, NewFile, User};
use crate::transport::{check_size, FileTransport, MAX_FILE_SIZE};
use crate::utils::ResultExt as _;

const PLEASE_WAIT: &str = "⏳ Uploading the file, please wait...";

/// Kind of media attached to a message.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MediaKind {
    Document,
    Photo,
    Voice,
    Audio,
    Video,
    VideoNote,
}

/// A file referenced by a message, with the name and type it will be
/// stored under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSource {
    pub file_id: String,
    pub name: String,
    pub file_type: String,
    pub size_hint: Option<u64>,
}

impl MediaSource {
    pub fn from_message(msg: &Message) -> Option<Self> {
        let caption = msg.caption();
        if let Some(doc) = msg.document() {
            return Some(Self::new(
                MediaKind::Document,
                &doc.file,
                doc.file_name.clone(),
                doc.mime_type.as_ref().map(|m| m.essence_str().to_string()),
                caption,
            ));
        }
        if let Some(photo) = msg.photo().and_then(|sizes| sizes.last()) {
            return Some(Self::new(
                MediaKind::Photo,
                &photo.file,
                None,
                None,
                caption,
            ));
        }
        if let Some(voice) = msg.voice() {
            return Some(Self::new(
                MediaKind::Voice,
                &voice.file,
                None,
                None,
                caption,
            ));
        }
        if let Some(audio) = msg.audio() {
            return Some(Self::new(
                MediaKind::Audio,
                &audio.file,
                audio.file_name.clone(),
                audio.mime_type.as_ref().map(|m| m.essence_str().to_string()),
                caption,
            ));
        }
        if let Some(video) = msg.video() {
            return Some(Self::new(
                MediaKind::Video,
                &video.file,
                video.file_name.clone(),
                video.mime_type.as_ref().map(|m| m.essence_str().to_string()),
                caption,
            ));
        }
        let note = msg.video_note()?;
        Some(Self::new(MediaKind::VideoNote, &note.file, None, None, caption))
    }

    fn new(
        kind: MediaKind,
        file: &TgFileMeta,
        name: Option<String>,
        file_type: Option<String>,
        caption: Option<&str>,
    ) -> Self {
        let (name, file_type) = describe(kind, name, file_type, caption);
        Self {
            file_id: file.id.clone(),
            name,
            file_type,
            size_hint: (file.size > 0).then(|| u64::from(file.size)),
        }
    }
}

/// Name and type to store a file under. Declared values win; missing ones
/// are guessed from the media kind, and a caption ending in `.heic` or
/// `.mov` refines the guess for photos and videos.
pub fn describe(
    kind: MediaKind,
    name: Option<String>,
    file_type: Option<String>,
    caption: Option<&str>,
) -> (String, String) {
    let caption_ends_with = |ext: &str| {
        caption.is_some_and(|c| c.trim_end().to_lowercase().ends_with(ext))
    };
    let (default_name, default_type) = match kind {
        MediaKind::Document => ("document", "application/octet-stream"),
        MediaKind::Photo if caption_ends_with(".heic") => {
            ("photo.heic", "image/heic")
        }
        MediaKind::Photo => ("photo.jpg", "image/jpeg"),
        // Telegram always encodes voice notes as OGG/Opus.
        MediaKind::Voice => return ("voice.ogg".into(), "audio/ogg".into()),
        MediaKind::Audio => ("audio.mp3", "audio/mpeg"),
        MediaKind::Video if caption_ends_with(".mov") => {
            ("video.mov", "video/mp4")
        }
        MediaKind::Video => ("video.mp4", "video/mp4"),
        MediaKind::VideoNote => ("video_note.mp4", "video/mp4"),
    };
    let or_default = |value: Option<String>, default: &str| {
        value.filter(|v| !v.is_empty()).unwrap_or_else(|| default.to_string())
    };
    (or_default(name, default_name), or_default(file_type, default_type))
}

/// Fetch the whole file into memory.
///
/// When `getFile` fails, the file is fetched through a link built from the
/// file id alone, and a JSON body on that path means Telegram refused.
pub async fn download(
    transport: &dyn FileTransport,
    source: &MediaSource,
    limit: u64,
) -> Result<Vec<u8>, Error> {
    if let Some(size) = source.size_hint {
        check_size(size, limit)?;
    }
    let fetched = match transport.resolve(&source.file_id).await {
        Ok(resolved) => {
            if let Some(size) = resolved.size {
                check_size(size, limit)?;
            }
            transport.fetch(&resolved.url, limit).await?
        }
        Err(e) => {
            log::warn!(
                "getFile failed for {}, trying the direct link: {e}",
                source.file_id
            );
            let url = transport.fallback_url(&source.file_id)?;
            let fetched = transport.fetch(&url, limit).await?;
            if fetched.is_error_object() {
                let body = String::from_utf8_lossy(&fetched.bytes);
                return Err(Error::MalformedResponse(
                    body.chars().take(200).collect(),
                ));
            }
            fetched
        }
    };
    if !fetched.status.is_success() {
        return Err(Error::Transport(format!(
            "file server answered {}",
            fetched.status
        )));
    }
    check_size(fetched.bytes.len() as u64, limit)?;
    Ok(fetched.bytes)
}

/// Download and store a file for `owner`. Nothing is persisted on failure.
pub async fn ingest(
    env: &BotEnv,
    owner: &User,
    source: &MediaSource,
) -> Result<FileMeta, Error> {
    let data = download(env.transport.as_ref(), source, MAX_FILE_SIZE).await?;
    let file = NewFile {
        owner: owner.id,
        name: source.name.clone(),
        file_type: source.file_type.clone(),
        data,
        created_at: Utc::now(),
    };
    let meta = env.repo.save_file(&file).await?;
    audit::spawn_record_upload(env.audit.as_ref(), UploadEntry::new(&meta, owner));
    Ok(meta)
}

pub fn outcome_text(outcome: &Result<FileMeta, Error>) -> String {
    match outcome {
        Ok(meta) => format!(
            "✅ File saved.\nFile ID: {}\nFile name: {}\nFile type: {}",
            meta.id, meta.name, meta.file_type
        ),
        Err(Error::Oversize { .. }) => format!(
            "Sorry, the file is too large. The maximum file size is {} MB.",
            MAX_FILE_SIZE / 1024 / 1024
        ),
        Err(Error::Transport(_)) => "Failed to download the file.".into(),
        Err(Error::MalformedResponse(_)) => {
            "Telegram returned an error instead of the file.".into()
        }
        Err(Error::DuplicateFile) => {
            "This file has already been uploaded.".into()
        }
        Err(_) => "Failed to save the file.".into(),
    }
}

pub fn message_handler() -> UpdateHandler {
    dptree::filter_map(|msg: Message| MediaSource::from_message(&msg))
        .endpoint(handle_upload)
}

async fn handle_upload(
    bot: Bot,
    env: Arc<BotEnv>,
    msg: Message,
    user: User,
    source: MediaSource,
) -> Result<()> {
    log::info!(
        "Upload from {}: {} ({}, {:?} bytes)",
        user.id,
        source.name,
        source.file_type,
        source.size_hint,
    );
    if source.size_hint.map_or(true, |size| size <= MAX_FILE_SIZE) {
        bot.send_message(msg.chat.id, PLEASE_WAIT)
            .await
            .log_error("Failed to send upload notice");
    }

    let outcome = ingest(&env, &user, &source).await;
    match &outcome {
        Ok(meta) => {
            log::info!("Stored file {} for user {}", meta.id, user.id);
            crate::metrics::upload_stored();
        }
        Err(e) => {
            log::warn!("Upload from {} rejected ({}): {e}", user.id, e.kind());
            crate::metrics::upload_failed(e);
        }
    }
    Reply::Text(outcome_text(&outcome))
        .send(&bot, msg.chat.id)
        .await?;
    Ok(())
}
