//! Document store for uploaded files. Metadata lives in the `files`
//! collection, contents in a GridFS bucket under the same integer id, so that
//! payloads up to the upload limit fit past the BSON document size limit.

#[cfg(test)]
pub mod failing;
#[cfg(test)]
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::io::{AsyncReadExt as _, AsyncWriteExt as _};
use futures::TryStreamExt as _;
use mongodb::bson::{doc, Bson, Document};
use mongodb::error::{ErrorKind, GridFsErrorKind, WriteFailure};
use mongodb::gridfs::GridFsBucket;
use mongodb::options::{
    FindOneOptions, FindOptions, GridFsBucketOptions, IndexOptions,
};
use mongodb::{Collection, IndexModel};
use serde::{Deserialize, Serialize};

use crate::db::DbUserId;
use crate::error::StorageError;
use crate::models::{FileMeta, StoredFile};
use crate::utils::ResultExt as _;

const FILES_COLLECTION: &str = "files";
const PAYLOAD_BUCKET: &str = "payloads";
const DUPLICATE_KEY: i32 = 11000;

/// Result of an insert attempt.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Insert {
    Done,
    /// Either the id or the (owner, name, type) key is already taken.
    Conflict,
}

#[async_trait]
pub trait FileStore: Send + Sync {
    async fn find_by_key(
        &self,
        owner: DbUserId,
        name: &str,
        file_type: &str,
    ) -> Result<Option<FileMeta>, StorageError>;

    /// Largest id in use, 0 if the store is empty.
    async fn max_id(&self) -> Result<i64, StorageError>;

    async fn insert(
        &self,
        meta: &FileMeta,
        data: &[u8],
    ) -> Result<Insert, StorageError>;

    async fn meta(&self, id: i64) -> Result<Option<FileMeta>, StorageError>;

    async fn get(&self, id: i64) -> Result<Option<StoredFile>, StorageError>;

    async fn list_by_owner(
        &self,
        owner: DbUserId,
    ) -> Result<Vec<FileMeta>, StorageError>;

    async fn list_all(&self) -> Result<Vec<FileMeta>, StorageError>;

    /// Returns whether the file existed.
    async fn delete(&self, id: i64) -> Result<bool, StorageError>;

    /// Returns the number of deleted files.
    async fn delete_by_owner(&self, owner: DbUserId)
        -> Result<u64, StorageError>;
}

#[derive(Serialize, Deserialize, Debug)]
struct FileDoc {
    #[serde(rename = "_id")]
    id: i64,
    user_id: i64,
    file_name: String,
    file_type: String,
    size: i64,
    created_at: mongodb::bson::DateTime,
}

impl From<&FileMeta> for FileDoc {
    #[allow(clippy::cast_possible_wrap)] // Sizes are capped far below i64::MAX.
    fn from(meta: &FileMeta) -> Self {
        Self {
            id: meta.id,
            user_id: meta.owner.0,
            file_name: meta.name.clone(),
            file_type: meta.file_type.clone(),
            size: meta.size as i64,
            created_at: mongodb::bson::DateTime::from_millis(
                meta.created_at.timestamp_millis(),
            ),
        }
    }
}

impl From<FileDoc> for FileMeta {
    #[allow(clippy::cast_sign_loss)]
    fn from(doc: FileDoc) -> Self {
        Self {
            id: doc.id,
            owner: DbUserId(doc.user_id),
            name: doc.file_name,
            file_type: doc.file_type,
            size: doc.size.max(0) as u64,
            created_at: DateTime::<Utc>::from_timestamp_millis(
                doc.created_at.timestamp_millis(),
            )
            .unwrap_or_default(),
        }
    }
}

pub struct MongoFileStore {
    files: Collection<FileDoc>,
    payloads: GridFsBucket,
}

impl MongoFileStore {
    pub async fn connect(uri: &str, db_name: &str) -> Result<Self, StorageError> {
        let client = mongodb::Client::with_uri_str(uri).await?;
        let db = client.database(db_name);
        let files = db.collection::<FileDoc>(FILES_COLLECTION);
        files
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "user_id": 1, "file_name": 1, "file_type": 1 })
                    .options(IndexOptions::builder().unique(true).build())
                    .build(),
                None,
            )
            .await?;
        let payloads = db.gridfs_bucket(
            GridFsBucketOptions::builder()
                .bucket_name(PAYLOAD_BUCKET.to_string())
                .build(),
        );
        log::info!("Connected to MongoDB database {db_name}");
        Ok(Self { files, payloads })
    }

    async fn find(
        &self,
        filter: Document,
    ) -> Result<Vec<FileMeta>, StorageError> {
        let cursor = self
            .files
            .find(filter, FindOptions::builder().sort(doc! { "_id": 1 }).build())
            .await?;
        let docs: Vec<FileDoc> = cursor.try_collect().await?;
        Ok(docs.into_iter().map(FileMeta::from).collect())
    }

    /// Remove a payload stored under an id whose metadata row was just
    /// claimed. Such a payload is left over from a failed delete.
    async fn clear_orphan_payload(
        &self,
        id: i64,
    ) -> Result<(), mongodb::error::Error> {
        match self.payloads.delete(Bson::Int64(id)).await {
            Ok(()) => {
                log::warn!("Removed orphaned payload under file id {id}");
                Ok(())
            }
            Err(e) if is_missing_payload(&e) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn delete_payload(&self, id: i64) {
        self.payloads
            .delete(Bson::Int64(id))
            .await
            .log_error(&format!("Failed to delete payload of file {id}"));
    }
}

fn is_duplicate_key(e: &mongodb::error::Error) -> bool {
    matches!(
        *e.kind,
        ErrorKind::Write(WriteFailure::WriteError(ref we))
            if we.code == DUPLICATE_KEY
    )
}

fn is_missing_payload(e: &mongodb::error::Error) -> bool {
    matches!(
        *e.kind,
        ErrorKind::GridFs { 0: GridFsErrorKind::FileNotFound { .. }, .. }
    )
}

#[async_trait]
impl FileStore for MongoFileStore {
    async fn find_by_key(
        &self,
        owner: DbUserId,
        name: &str,
        file_type: &str,
    ) -> Result<Option<FileMeta>, StorageError> {
        let found = self
            .files
            .find_one(
                doc! {
                    "user_id": owner.0,
                    "file_name": name,
                    "file_type": file_type,
                },
                None,
            )
            .await?;
        Ok(found.map(FileMeta::from))
    }

    async fn max_id(&self) -> Result<i64, StorageError> {
        let last = self
            .files
            .find_one(
                None,
                FindOneOptions::builder().sort(doc! { "_id": -1 }).build(),
            )
            .await?;
        Ok(last.map_or(0, |d| d.id))
    }

    async fn insert(
        &self,
        meta: &FileMeta,
        data: &[u8],
    ) -> Result<Insert, StorageError> {
        match self.files.insert_one(FileDoc::from(meta), None).await {
            Ok(_) => {}
            Err(e) if is_duplicate_key(&e) => return Ok(Insert::Conflict),
            Err(e) => return Err(e.into()),
        }

        let written: Result<(), StorageError> = async {
            self.clear_orphan_payload(meta.id).await?;
            let mut upload = self.payloads.open_upload_stream_with_id(
                Bson::Int64(meta.id),
                &meta.name,
                None,
            );
            upload.write_all(data).await?;
            upload.close().await?;
            Ok(())
        }
        .await;
        if let Err(e) = written {
            // Without contents the metadata row is useless.
            self.files
                .delete_one(doc! { "_id": meta.id }, None)
                .await
                .log_error("Failed to roll back file metadata");
            return Err(e);
        }
        Ok(Insert::Done)
    }

    async fn meta(&self, id: i64) -> Result<Option<FileMeta>, StorageError> {
        let found = self.files.find_one(doc! { "_id": id }, None).await?;
        Ok(found.map(FileMeta::from))
    }

    async fn get(&self, id: i64) -> Result<Option<StoredFile>, StorageError> {
        let Some(meta) = self.meta(id).await? else { return Ok(None) };
        let mut download =
            self.payloads.open_download_stream(Bson::Int64(id)).await?;
        let mut data = Vec::with_capacity(usize::try_from(meta.size).unwrap_or(0));
        download.read_to_end(&mut data).await?;
        Ok(Some(StoredFile { meta, data }))
    }

    async fn list_by_owner(
        &self,
        owner: DbUserId,
    ) -> Result<Vec<FileMeta>, StorageError> {
        self.find(doc! { "user_id": owner.0 }).await
    }

    async fn list_all(&self) -> Result<Vec<FileMeta>, StorageError> {
        self.find(doc! {}).await
    }

    async fn delete(&self, id: i64) -> Result<bool, StorageError> {
        let result = self.files.delete_one(doc! { "_id": id }, None).await?;
        if result.deleted_count == 0 {
            return Ok(false);
        }
        self.delete_payload(id).await;
        Ok(true)
    }

    async fn delete_by_owner(
        &self,
        owner: DbUserId,
    ) -> Result<u64, StorageError> {
        let ids: Vec<i64> = self
            .list_by_owner(owner)
            .await?
            .into_iter()
            .map(|f| f.id)
            .collect();
        let result = self
            .files
            .delete_many(doc! { "user_id": owner.0 }, None)
            .await?;
        for id in ids {
            self.delete_payload(id).await;
        }
        Ok(result.deleted_count)
    }
}
