use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Username → administrator intent, reconciled into the user store at
/// startup.
pub type AdminSet = BTreeMap<String, bool>;

const PLACEHOLDER_TOKEN: &str = "YOUR_BOT_TOKEN_HERE";

#[derive(Serialize, Deserialize, Debug)]
pub struct Config {
    pub telegram: Telegram,
    pub storage: Storage,
    pub admins: AdminSet,
    pub audit: Option<Audit>,
    pub metrics_addr: Option<SocketAddr>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct Telegram {
    pub token: String,
    /// Capacity of the per-user update queue in the dispatcher.
    pub worker_queue_size: usize,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct Storage {
    /// Path to the SQLite database holding users.
    pub sqlite: String,
    pub mongo_uri: String,
    pub mongo_db: String,
}

/// Spreadsheet receiving one row per uploaded file.
#[derive(Serialize, Deserialize, Debug)]
pub struct Audit {
    pub spreadsheet_id: String,
    pub sheet: String,
    /// JSON key of the service account the sheet is shared with.
    pub credentials: PathBuf,
}

impl Config {
    pub fn is_admin(&self, username: &str) -> bool {
        self.admins.get(username).copied().unwrap_or(false)
    }

    /// Reject configs that were copied from the example without editing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.telegram.token.is_empty()
            || self.telegram.token == PLACEHOLDER_TOKEN
        {
            anyhow::bail!("telegram.token is not set");
        }
        if self.storage.mongo_uri.is_empty() {
            anyhow::bail!("storage.mongo_uri is not set");
        }
        if self.telegram.worker_queue_size == 0 {
            anyhow::bail!("telegram.worker_queue_size must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
pub fn test_config(admins: &[(&str, bool)]) -> Config {
    Config {
        telegram: Telegram {
            token: "123:test".to_string(),
            worker_queue_size: 8,
        },
        storage: Storage {
            sqlite: ":memory:".to_string(),
            mongo_uri: "mongodb://localhost:27017".to_string(),
            mongo_db: "test".to_string(),
        },
        admins: admins.iter().map(|&(u, a)| (u.to_string(), a)).collect(),
        audit: None,
        metrics_addr: None,
    }
}
