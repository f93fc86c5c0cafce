//! [`FileStore`] whose backend is down, used by tests of failure paths.

use async_trait::async_trait;

use super::memory::MemoryFileStore;
use super::{FileStore, Insert};
use crate::db::DbUserId;
use crate::error::StorageError;
use crate::models::{FileMeta, StoredFile};

/// Writes always fail. Reads are served from `inner` unless `reads_fail`.
#[derive(Default)]
pub struct FailingFileStore {
    pub inner: MemoryFileStore,
    pub reads_fail: bool,
}

impl FailingFileStore {
    pub fn everything() -> Self {
        Self { reads_fail: true, ..Self::default() }
    }

    fn read(&self) -> Result<&MemoryFileStore, StorageError> {
        if self.reads_fail {
            return Err(unavailable());
        }
        Ok(&self.inner)
    }
}

fn unavailable() -> StorageError {
    StorageError::Io(std::io::Error::new(
        std::io::ErrorKind::ConnectionRefused,
        "document store unavailable",
    ))
}

#[async_trait]
impl FileStore for FailingFileStore {
    async fn find_by_key(
        &self,
        owner: DbUserId,
        name: &str,
        file_type: &str,
    ) -> Result<Option<FileMeta>, StorageError> {
        self.read()?.find_by_key(owner, name, file_type).await
    }

    async fn max_id(&self) -> Result<i64, StorageError> {
        self.read()?.max_id().await
    }

    async fn insert(
        &self,
        _meta: &FileMeta,
        _data: &[u8],
    ) -> Result<Insert, StorageError> {
        Err(unavailable())
    }

    async fn meta(&self, id: i64) -> Result<Option<FileMeta>, StorageError> {
        self.read()?.meta(id).await
    }

    async fn get(&self, id: i64) -> Result<Option<StoredFile>, StorageError> {
        self.read()?.get(id).await
    }

    async fn list_by_owner(
        &self,
        owner: DbUserId,
    ) -> Result<Vec<FileMeta>, StorageError> {
        self.read()?.list_by_owner(owner).await
    }

    async fn list_all(&self) -> Result<Vec<FileMeta>, StorageError> {
        self.read()?.list_all().await
    }

    async fn delete(&self, _id: i64) -> Result<bool, StorageError> {
        Err(unavailable())
    }

    async fn delete_by_owner(
        &self,
        _owner: DbUserId,
    ) -> Result<u64, StorageError> {
        Err(unavailable())
    }
}
