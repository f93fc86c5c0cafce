//! Dual-store repository: users live in SQLite, files in the document store.
//! Nothing here is atomic across the two stores.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use diesel::prelude::*;
use diesel::{QueryResult, SqliteConnection};

use crate::config::AdminSet;
use crate::db::DbUserId;
use crate::error::{Error, StorageError};
use crate::file_store::{FileStore, Insert};
use crate::models::{FileMeta, NewFile, StoredFile, User};
use crate::schema;

/// Attempts to claim a fresh id before giving up on a busy store.
const MAX_ID_ATTEMPTS: usize = 8;

pub struct Repository {
    conn: Mutex<SqliteConnection>,
    files: Arc<dyn FileStore>,
}

impl Repository {
    pub fn new(conn: SqliteConnection, files: Arc<dyn FileStore>) -> Self {
        Self { conn: Mutex::new(conn), files }
    }

    fn conn(&self) -> MutexGuard<'_, SqliteConnection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transaction<T>(
        &self,
        f: impl FnOnce(&mut SqliteConnection) -> QueryResult<T>,
    ) -> QueryResult<T> {
        self.conn().exclusive_transaction(f)
    }

    // Users

    pub fn get_user(&self, id: DbUserId) -> Result<Option<User>, StorageError> {
        use schema::users::dsl as u;
        Ok(u::users
            .filter(u::id.eq(id))
            .select(User::as_select())
            .first(&mut *self.conn())
            .optional()?)
    }

    /// Insert the user or overwrite every column of an existing row.
    pub fn save_user(&self, user: &User) -> Result<(), StorageError> {
        diesel::insert_into(schema::users::table)
            .values(user)
            .on_conflict(schema::users::id)
            .do_update()
            .set(user)
            .execute(&mut *self.conn())?;
        Ok(())
    }

    /// Returns whether the user exists.
    pub fn set_user_phone(
        &self,
        id: DbUserId,
        phone: &str,
    ) -> Result<bool, StorageError> {
        use schema::users::dsl as u;
        let updated = diesel::update(u::users.filter(u::id.eq(id)))
            .set(u::phone.eq(phone))
            .execute(&mut *self.conn())?;
        Ok(updated > 0)
    }

    /// Make the admin flags of all users match `admins` in one transaction.
    /// Returns the number of users flagged as administrators.
    pub fn reconcile_admins(
        &self,
        admins: &AdminSet,
    ) -> Result<usize, StorageError> {
        use schema::users::dsl as u;
        let names: Vec<&str> = admins
            .iter()
            .filter(|(_, &is_admin)| is_admin)
            .map(|(name, _)| name.as_str())
            .collect();
        let flagged = self.transaction(|conn| {
            diesel::update(u::users).set(u::is_admin.eq(false)).execute(conn)?;
            diesel::update(u::users.filter(u::username.eq_any(names)))
                .set(u::is_admin.eq(true))
                .execute(conn)
        })?;
        Ok(flagged)
    }

    // Files

    /// Store a new file under the next free id.
    ///
    /// Fails with [`Error::DuplicateFile`] when the owner already has a file
    /// with the same name and type.
    pub async fn save_file(&self, file: &NewFile) -> Result<FileMeta, Error> {
        for _ in 0..MAX_ID_ATTEMPTS {
            if self.is_duplicate(file).await? {
                return Err(Error::DuplicateFile);
            }
            let meta = file.with_id(self.files.max_id().await? + 1);
            match self.files.insert(&meta, &file.data).await? {
                Insert::Done => return Ok(meta),
                Insert::Conflict => {
                    log::debug!("File id {} was taken, retrying", meta.id);
                }
            }
        }
        Err(StorageError::IdExhausted(MAX_ID_ATTEMPTS).into())
    }

    async fn is_duplicate(&self, file: &NewFile) -> Result<bool, StorageError> {
        Ok(self
            .files
            .find_by_key(file.owner, &file.name, &file.file_type)
            .await?
            .is_some())
    }

    pub async fn get_file(
        &self,
        id: i64,
    ) -> Result<Option<StoredFile>, StorageError> {
        self.files.get(id).await
    }

    /// Like [`Self::get_file`], without loading the contents.
    pub async fn get_file_meta(
        &self,
        id: i64,
    ) -> Result<Option<FileMeta>, StorageError> {
        self.files.meta(id).await
    }

    pub async fn get_files_by_owner(
        &self,
        owner: DbUserId,
    ) -> Result<Vec<FileMeta>, StorageError> {
        self.files.list_by_owner(owner).await
    }

    pub async fn get_all_files(&self) -> Result<Vec<FileMeta>, StorageError> {
        self.files.list_all().await
    }

    pub async fn delete_file(&self, id: i64) -> Result<bool, StorageError> {
        self.files.delete(id).await
    }

    pub async fn delete_files_by_owner(
        &self,
        owner: DbUserId,
    ) -> Result<u64, StorageError> {
        self.files.delete_by_owner(owner).await
    }
}
