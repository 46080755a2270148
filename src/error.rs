use std::path::PathBuf;

/// Credential problems. Kept apart from other connection failures so callers
/// can tell a bad password from a flaky network.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("credentials rejected by server: {0}")]
    Rejected(String),

    #[error("no usable credentials configured: {0}")]
    MissingCredentials(String),
}

/// Failure to establish (or keep) a mailbox connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("network error: {0}")]
    Network(String),

    #[error("TLS handshake failed: {0}")]
    Tls(String),

    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("timed out after {0}s")]
    Timeout(u64),

    #[error("unsupported connection type '{0}'")]
    Unsupported(String),
}

impl ConnectionError {
    pub fn is_auth(&self) -> bool {
        matches!(self, ConnectionError::Auth(_))
    }
}

/// Malformed or interrupted server data while enumerating a mailbox.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The enumeration itself broke; nothing after this point can be read.
    #[error("mailbox enumeration failed: {0}")]
    Transport(String),

    /// A single message could not be decoded; enumeration may continue.
    #[error("malformed message {message}: {reason}")]
    Malformed { message: String, reason: String },

    /// A single message could not be read this time (throttled, server
    /// hiccup). Enumeration continues but the message must be retried.
    #[error("message {message} temporarily unavailable: {reason}")]
    Unavailable { message: String, reason: String },
}

impl ProtocolError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProtocolError::Transport(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("refusing unsafe attachment filename {0:?}")]
    UnsafeFilename(String),

    #[error("stored reference {0:?} escapes the content directory")]
    OutsideContentDir(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(String),

    #[error("duplicate record: {0}")]
    Duplicate(String),
}

impl From<sea_orm::DbErr> for PersistenceError {
    fn from(err: sea_orm::DbErr) -> Self {
        match err.sql_err() {
            Some(sea_orm::SqlErr::UniqueConstraintViolation(detail)) => {
                PersistenceError::Duplicate(detail)
            }
            _ => PersistenceError::Database(err.to_string()),
        }
    }
}

/// Everything that can end one account's run, plus the per-attachment errors
/// that are collected without ending it.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("mailbox lock failed: {0}")]
    Lock(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("cancelled")]
    Cancelled,

    #[error("worker panicked: {0}")]
    Panicked(String),
}

impl SyncError {
    pub fn is_auth(&self) -> bool {
        matches!(self, SyncError::Connection(e) if e.is_auth())
    }

    /// Failures that will recur on every retry of the same message.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            SyncError::Storage(StorageError::UnsafeFilename(_))
                | SyncError::Protocol(ProtocolError::Malformed { .. })
        )
    }
}

/// Run-level failures of the orchestrator (before any account starts).
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("an ingestion run is already in progress")]
    AlreadyRunning,

    #[error("failed to load accounts: {0}")]
    Accounts(#[from] PersistenceError),
}
