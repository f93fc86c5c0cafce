//! In-process [`FileStore`] used by tests.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{FileStore, Insert};
use crate::db::DbUserId;
use crate::error::StorageError;
use crate::models::{FileMeta, StoredFile};

#[derive(Default)]
pub struct MemoryFileStore {
    files: Mutex<BTreeMap<i64, StoredFile>>,
    /// Payloads without a metadata row, as a failed delete leaves them.
    orphans: Mutex<BTreeMap<i64, Vec<u8>>>,
}

impl MemoryFileStore {
    fn files(&self) -> MutexGuard<'_, BTreeMap<i64, StoredFile>> {
        self.files.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.files().len()
    }

    pub fn ids(&self) -> Vec<i64> {
        self.files().keys().copied().collect()
    }

    fn orphans(&self) -> MutexGuard<'_, BTreeMap<i64, Vec<u8>>> {
        self.orphans.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn leave_orphan_payload(&self, id: i64, data: &[u8]) {
        self.orphans().insert(id, data.to_vec());
    }

    pub fn orphan_ids(&self) -> Vec<i64> {
        self.orphans().keys().copied().collect()
    }
}

#[async_trait]
impl FileStore for MemoryFileStore {
    async fn find_by_key(
        &self,
        owner: DbUserId,
        name: &str,
        file_type: &str,
    ) -> Result<Option<FileMeta>, StorageError> {
        Ok(self
            .files()
            .values()
            .find(|f| {
                f.meta.owner == owner
                    && f.meta.name == name
                    && f.meta.file_type == file_type
            })
            .map(|f| f.meta.clone()))
    }

    async fn max_id(&self) -> Result<i64, StorageError> {
        Ok(self.files().keys().next_back().copied().unwrap_or(0))
    }

    async fn insert(
        &self,
        meta: &FileMeta,
        data: &[u8],
    ) -> Result<Insert, StorageError> {
        let mut files = self.files();
        let key_taken = files.values().any(|f| {
            f.meta.owner == meta.owner
                && f.meta.name == meta.name
                && f.meta.file_type == meta.file_type
        });
        if key_taken || files.contains_key(&meta.id) {
            return Ok(Insert::Conflict);
        }
        // The id is claimed, whatever payload sits under it is stale.
        self.orphans().remove(&meta.id);
        files.insert(
            meta.id,
            StoredFile { meta: meta.clone(), data: data.to_vec() },
        );
        Ok(Insert::Done)
    }

    async fn meta(&self, id: i64) -> Result<Option<FileMeta>, StorageError> {
        Ok(self.files().get(&id).map(|f| f.meta.clone()))
    }

    async fn get(&self, id: i64) -> Result<Option<StoredFile>, StorageError> {
        Ok(self.files().get(&id).cloned())
    }

    async fn list_by_owner(
        &self,
        owner: DbUserId,
    ) -> Result<Vec<FileMeta>, StorageError> {
        Ok(self
            .files()
            .values()
            .filter(|f| f.meta.owner == owner)
            .map(|f| f.meta.clone())
            .collect())
    }

    async fn list_all(&self) -> Result<Vec<FileMeta>, StorageError> {
        Ok(self.files().values().map(|f| f.meta.clone()).collect())
    }

    async fn delete(&self, id: i64) -> Result<bool, StorageError> {
        Ok(self.files().remove(&id).is_some())
    }

    async fn delete_by_owner(
        &self,
        owner: DbUserId,
    ) -> Result<u64, StorageError> {
        let mut files = self.files();
        let before = files.len();
        files.retain(|_, f| f.meta.owner != owner);
        Ok((before - files.len()) as u64)
    }
}
