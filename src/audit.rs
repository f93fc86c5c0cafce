//! Optional export of upload and deletion events to a Google Sheets
//! spreadsheet. The sheet is a log for humans, never read back by the bot,
//! so every call here is best effort.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::Audit as AuditConfig;
use crate::db::DbUserId;
use crate::models::{FileMeta, User};
use crate::utils::ResultExt as _;

const SHEETS_API: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
const STATUS_ACTIVE: &str = "Active";
const STATUS_DELETED: &str = "Deleted";
/// Column holding the status, the 8th one.
const STATUS_COLUMN: char = 'H';

/// One row of the audit log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadEntry {
    pub file_id: i64,
    pub owner: DbUserId,
    pub username: String,
    pub file_name: String,
    pub file_type: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

impl UploadEntry {
    pub fn new(file: &FileMeta, owner: &User) -> Self {
        Self {
            file_id: file.id,
            owner: file.owner,
            username: owner.display_name(),
            file_name: file.name.clone(),
            file_type: file.file_type.clone(),
            size: file.size,
            created_at: file.created_at,
        }
    }

    fn row(&self) -> Value {
        json!([
            self.file_id,
            self.owner.0,
            self.username,
            self.file_name,
            self.file_type,
            self.size,
            self.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            STATUS_ACTIVE,
        ])
    }
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record_upload(&self, entry: &UploadEntry) -> Result<()>;

    async fn mark_deleted(&self, file_id: i64) -> Result<()>;

    async fn mark_owner_deleted(&self, owner: DbUserId) -> Result<()>;
}

/// Log an upload in the background.
pub fn spawn_record_upload(sink: Option<&Arc<dyn AuditSink>>, entry: UploadEntry) {
    let Some(sink) = sink.map(Arc::clone) else { return };
    tokio::spawn(async move {
        if sink
            .record_upload(&entry)
            .await
            .log_ok("Failed to log upload to the audit sheet")
            .is_some()
        {
            log::info!(
                "Upload logged to the audit sheet: id={}, user={}",
                entry.file_id,
                entry.username,
            );
        }
    });
}

/// What a confirmed deletion removed.
#[derive(Debug, Copy, Clone)]
pub enum Removed {
    File(i64),
    AllOf(DbUserId),
}

/// Mark deleted rows in the background.
pub fn spawn_mark_deleted(sink: Option<&Arc<dyn AuditSink>>, removed: Removed) {
    let Some(sink) = sink.map(Arc::clone) else { return };
    tokio::spawn(async move {
        let result = match removed {
            Removed::File(id) => sink.mark_deleted(id).await,
            Removed::AllOf(owner) => sink.mark_owner_deleted(owner).await,
        };
        result.log_error(&format!("Failed to mark {removed:?} as deleted"));
    });
}

/// Source of short-lived OAuth access tokens.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// A token valid right now. Cached tokens are refreshed before they
    /// expire.
    async fn access_token(&self) -> Result<String>;
}

#[async_trait]
impl TokenSource for yup_oauth2::authenticator::DefaultAuthenticator {
    async fn access_token(&self) -> Result<String> {
        let token = self
            .token(&[SHEETS_SCOPE])
            .await
            .context("Failed to obtain an access token")?;
        token
            .token()
            .map(str::to_string)
            .context("Token response without an access token")
    }
}

/// Authenticate as the service account whose JSON key is at `path`.
pub async fn service_account(
    path: &Path,
) -> Result<yup_oauth2::authenticator::DefaultAuthenticator> {
    let key = yup_oauth2::read_service_account_key(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    yup_oauth2::ServiceAccountAuthenticator::builder(key)
        .build()
        .await
        .context("Failed to build the service account authenticator")
}

pub struct SheetsAuditSink {
    client: reqwest::Client,
    api: String,
    spreadsheet_id: String,
    sheet: String,
    tokens: Arc<dyn TokenSource>,
}

#[derive(Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

impl SheetsAuditSink {
    pub fn new(
        client: reqwest::Client,
        config: &AuditConfig,
        tokens: Arc<dyn TokenSource>,
    ) -> Self {
        Self {
            client,
            api: SHEETS_API.to_string(),
            spreadsheet_id: config.spreadsheet_id.clone(),
            sheet: config.sheet.clone(),
            tokens,
        }
    }

    fn values_url(&self, range: &str) -> String {
        format!("{}/{}/values/{range}", self.api, self.spreadsheet_id)
    }

    async fn rows(&self) -> Result<Vec<Vec<Value>>> {
        let range: ValueRange = self
            .client
            .get(self.values_url(&format!("{}!A:{STATUS_COLUMN}", self.sheet)))
            .bearer_auth(self.tokens.access_token().await?)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("Failed to parse sheet values")?;
        Ok(range.values)
    }

    /// Set the status of the given 1-based rows.
    async fn set_status(&self, rows: &[usize], status: &str) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let data: Vec<Value> = rows
            .iter()
            .map(|row| {
                json!({
                    "range": format!("{}!{STATUS_COLUMN}{row}", self.sheet),
                    "values": [[status]],
                })
            })
            .collect();
        self.client
            .post(format!(
                "{}/{}/values:batchUpdate",
                self.api, self.spreadsheet_id
            ))
            .bearer_auth(self.tokens.access_token().await?)
            .json(&json!({ "valueInputOption": "USER_ENTERED", "data": data }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl AuditSink for SheetsAuditSink {
    async fn record_upload(&self, entry: &UploadEntry) -> Result<()> {
        self.client
            .post(format!(
                "{}:append",
                self.values_url(&format!("{}!A1:{STATUS_COLUMN}1", self.sheet))
            ))
            .query(&[
                ("valueInputOption", "USER_ENTERED"),
                ("insertDataOption", "INSERT_ROWS"),
            ])
            .bearer_auth(self.tokens.access_token().await?)
            .json(&json!({ "values": [entry.row()] }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn mark_deleted(&self, file_id: i64) -> Result<()> {
        let rows = matching_rows(&self.rows().await?, 0, file_id);
        if rows.is_empty() {
            anyhow::bail!("File {file_id} is not in the sheet");
        }
        self.set_status(&rows, STATUS_DELETED).await
    }

    async fn mark_owner_deleted(&self, owner: DbUserId) -> Result<()> {
        let rows = matching_rows(&self.rows().await?, 1, owner.0);
        self.set_status(&rows, STATUS_DELETED).await
    }
}

/// 1-based numbers of rows whose `column` holds `id`, written either as a
/// number or as text.
fn matching_rows(rows: &[Vec<Value>], column: usize, id: i64) -> Vec<usize> {
    rows.iter()
        .enumerate()
        .filter(|(_, row)| row.get(column).and_then(cell_as_i64) == Some(id))
        .map(|(idx, _)| idx + 1)
        .collect()
}

#[allow(clippy::cast_possible_truncation)] // Ids are integral.
fn cell_as_i64(cell: &Value) -> Option<i64> {
    match cell {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::common::test_api::FakeApi;

    /// Hands out `token-1`, `token-2`, ... one per call.
    #[derive(Default)]
    struct CountingTokens(AtomicUsize);

    #[async_trait]
    impl TokenSource for CountingTokens {
        async fn access_token(&self) -> Result<String> {
            let n = self.0.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("token-{n}"))
        }
    }

    fn entry() -> UploadEntry {
        UploadEntry {
            file_id: 7,
            owner: DbUserId(42),
            username: "alice".to_string(),
            file_name: "voice.ogg".to_string(),
            file_type: "audio/ogg".to_string(),
            size: 2048,
            created_at: DateTime::<Utc>::from_timestamp(1_700_000_000, 0)
                .unwrap(),
        }
    }

    #[tokio::test]
    async fn every_request_gets_a_fresh_token() {
        let api = FakeApi::answering("200 OK", r#"{"values":[["7","42"]]}"#)
            .await;
        let sink = SheetsAuditSink {
            api: api.url().as_str().trim_end_matches('/').to_string(),
            ..SheetsAuditSink::new(
                reqwest::Client::new(),
                &AuditConfig {
                    spreadsheet_id: "sheet-id".to_string(),
                    sheet: "Sheet1".to_string(),
                    credentials: "key.json".into(),
                },
                Arc::new(CountingTokens::default()),
            )
        };

        sink.record_upload(&entry()).await.unwrap();
        sink.mark_deleted(7).await.unwrap();

        let authorizations: Vec<_> = api
            .seen()
            .into_iter()
            .map(|s| s.authorization.unwrap_or_default())
            .collect();
        assert_eq!(
            authorizations,
            ["Bearer token-1", "Bearer token-2", "Bearer token-3"]
        );
        assert_eq!(api.methods()[2], "values:batchupdate");
    }

    #[test]
    fn rows_are_matched_by_numeric_or_text_cells() {
        let rows: Vec<Vec<Value>> = serde_json::from_value(json!([
            ["File ID", "User ID", "Username"],
            [1, 10, "alice"],
            ["2", "20", "bob"],
            [],
            [3.0, 10, "alice"],
            ["x", " 10 ", "alice"],
        ]))
        .unwrap();
        assert_eq!(matching_rows(&rows, 0, 1), [2]);
        assert_eq!(matching_rows(&rows, 0, 2), [3]);
        assert_eq!(matching_rows(&rows, 0, 3), [5]);
        assert_eq!(matching_rows(&rows, 1, 10), [2, 5, 6]);
        assert!(matching_rows(&rows, 1, 30).is_empty());
    }

    #[test]
    fn upload_row_layout() {
        similar_asserts::assert_serde_eq!(
            entry().row(),
            json!([
                7,
                42,
                "alice",
                "voice.ogg",
                "audio/ogg",
                2048,
                "2023-11-14 22:13:20",
                "Active",
            ])
        );
    }
}
