use std::path::Path;

use diesel::connection::SimpleConnection;
use diesel::{Connection, ConnectionResult, QueryResult, SqliteConnection};
use diesel_derive_newtype::DieselNewType;
use serde::{Deserialize, Serialize};
use teloxide::types::UserId;

/// Schema of the relational store. Applied on every start.
const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY,
    username TEXT NOT NULL DEFAULT '',
    first_name TEXT NOT NULL DEFAULT '',
    last_name TEXT NOT NULL DEFAULT '',
    phone TEXT NOT NULL DEFAULT '',
    is_admin BOOLEAN NOT NULL DEFAULT 0
);
";

/// Open the SQLite database and make sure the schema exists. Missing parent
/// directories are created.
pub fn establish(path: &str) -> ConnectionResult<SqliteConnection> {
    if let Some(dir) =
        Path::new(path).parent().filter(|d| !d.as_os_str().is_empty())
    {
        std::fs::create_dir_all(dir).map_err(|e| {
            diesel::ConnectionError::BadConnection(format!(
                "Failed to create {}: {e}",
                dir.display()
            ))
        })?;
    }
    let mut conn = SqliteConnection::establish(path)?;
    init(&mut conn).map_err(|e| {
        diesel::ConnectionError::BadConnection(format!(
            "Failed to initialize {path}: {e}"
        ))
    })?;
    Ok(conn)
}

fn init(conn: &mut SqliteConnection) -> QueryResult<()> {
    conn.batch_execute("PRAGMA busy_timeout = 10000;")?;
    conn.batch_execute(SCHEMA)
}

macro_rules! make_db_newtype {
    ($name:ident, $inner:ty) => {
        #[derive(
            Copy,
            Clone,
            Debug,
            Eq,
            PartialEq,
            Ord,
            PartialOrd,
            Hash,
            Serialize,
            Deserialize,
            DieselNewType,
        )]
        #[doc = "A newtype wrapper for a Telegram type to be stored in the database."]
        pub struct $name(pub $inner);
    };
}

make_db_newtype!(DbUserId, i64);

impl From<UserId> for DbUserId {
    #[allow(clippy::cast_possible_wrap)] // Telegram ids fit in 52 bits.
    fn from(id: UserId) -> Self {
        Self(id.0 as i64)
    }
}

impl std::fmt::Display for DbUserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
pub fn in_memory() -> SqliteConnection {
    establish(":memory:").expect("in-memory sqlite")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn establish_creates_missing_directories() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("state/db/users.sqlite");
        establish(path.to_str().unwrap()).unwrap();
        assert!(path.exists());

        // Reopening keeps the schema in place.
        establish(path.to_str().unwrap()).unwrap();
    }
}
