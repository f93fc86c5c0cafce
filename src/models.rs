use chrono::{DateTime, Utc};
use diesel::prelude::*;

use crate::config::Config;
use crate::db::DbUserId;

// Relational models

#[derive(
    Clone, Debug, PartialEq, Eq, Insertable, Queryable, Selectable, AsChangeset,
)]
#[diesel(table_name = crate::schema::users)]
pub struct User {
    pub id: DbUserId,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub is_admin: bool,
}

impl User {
    /// Build a not yet registered user from a Telegram sender. The admin
    /// flag comes from the configured admin set.
    pub fn from_telegram(user: &teloxide::types::User, config: &Config) -> Self {
        let username = user.username.clone().unwrap_or_default();
        Self {
            id: user.id.into(),
            is_admin: config.is_admin(&username),
            username,
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone().unwrap_or_default(),
            phone: String::new(),
        }
    }

    pub fn has_phone(&self) -> bool {
        !self.phone.is_empty()
    }

    /// Owners and administrators may read and delete a file.
    pub fn can_access(&self, file: &FileMeta) -> bool {
        self.is_admin || file.owner == self.id
    }

    /// Name recorded in the audit log.
    pub fn display_name(&self) -> String {
        if self.username.is_empty() {
            format!("{} {}", self.first_name, self.last_name)
                .trim()
                .to_string()
        } else {
            self.username.clone()
        }
    }
}

// Document models

/// Everything about a stored file except its contents.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileMeta {
    pub id: i64,
    pub owner: DbUserId,
    pub name: String,
    pub file_type: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct StoredFile {
    pub meta: FileMeta,
    pub data: Vec<u8>,
}

/// A file accepted by the ingestion pipeline, not yet assigned an id.
#[derive(Clone, Debug)]
pub struct NewFile {
    pub owner: DbUserId,
    pub name: String,
    pub file_type: String,
    pub data: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

impl NewFile {
    pub fn with_id(&self, id: i64) -> FileMeta {
        FileMeta {
            id,
            owner: self.owner,
            name: self.name.clone(),
            file_type: self.file_type.clone(),
            size: self.data.len() as u64,
            created_at: self.created_at,
        }
    }
}

#[cfg(test)]
pub fn test_user(id: i64, username: &str, is_admin: bool) -> User {
    User {
        id: DbUserId(id),
        username: username.to_string(),
        first_name: username.to_uppercase(),
        last_name: String::new(),
        phone: String::new(),
        is_admin,
    }
}
