//! Failure taxonomy shared by the bot modules. Each module turns these into
//! its own one-line notice for the user.

/// A failure of either backing store.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] diesel::result::Error),
    #[error("mongodb: {0}")]
    Mongo(#[from] mongodb::error::Error),
    #[error("payload i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not allocate a file id after {0} attempts")]
    IdExhausted(usize),
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("expected file contents, got {0}")]
    MalformedResponse(String),
    #[error("file of {size} bytes exceeds the {limit} bytes limit")]
    Oversize { size: u64, limit: u64 },
    #[error("file already exists")]
    DuplicateFile,
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("permission denied")]
    PermissionDenied,
    #[error("not found")]
    NotFound,
    #[error("malformed input: {0:?}")]
    MalformedInput(String),
}

impl From<diesel::result::Error> for Error {
    fn from(e: diesel::result::Error) -> Self {
        Self::Storage(e.into())
    }
}

impl From<mongodb::error::Error> for Error {
    fn from(e: mongodb::error::Error) -> Self {
        Self::Storage(e.into())
    }
}

impl Error {
    /// Short label used in logs and metrics.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::MalformedResponse(_) => "malformed_response",
            Self::Oversize { .. } => "oversize",
            Self::DuplicateFile => "duplicate",
            Self::Storage(_) => "storage",
            Self::PermissionDenied => "permission_denied",
            Self::NotFound => "not_found",
            Self::MalformedInput(_) => "malformed_input",
        }
    }
}
