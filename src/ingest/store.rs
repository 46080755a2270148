use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::account::AccountConfig;
use crate::error::PersistenceError;

/// Metadata for one attachment whose bytes are already on the file store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredAttachment {
    pub file_path: String,
    pub attachment_file_name: String,
    pub from_address: String,
    pub date_received: DateTime<Utc>,
    pub subject: String,
    pub account_id: i32,
    pub content_hash: String,
}

/// Where stored-attachment metadata goes.
#[async_trait]
pub trait MetadataRecorder: Send + Sync {
    /// Insert one record, returning its id.
    async fn record(&self, attachment: &StoredAttachment) -> Result<i32, PersistenceError>;

    /// Whether this account already has an attachment with this content hash.
    async fn contains(&self, account_id: i32, content_hash: &str) -> Result<bool, PersistenceError>;
}

/// Read-only source of configured accounts.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Every enabled account.
    async fn list_accounts(&self) -> Result<Vec<AccountConfig>, PersistenceError>;
}

/// High-water mark of a mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncCursor {
    /// IMAP UIDVALIDITY the position belongs to.
    pub validity: Option<u32>,
    pub position: u64,
}

impl SyncCursor {
    /// The position to resume after, or `None` when the mailbox has to be
    /// enumerated from the start (first run, or the server renumbered it).
    pub fn resume_after(&self, current_validity: Option<u32>) -> Option<u64> {
        if self.validity != current_validity || self.position == 0 {
            None
        } else {
            Some(self.position)
        }
    }
}

#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn load(&self, account_id: i32) -> Result<Option<SyncCursor>, PersistenceError>;

    async fn save(&self, account_id: i32, cursor: SyncCursor) -> Result<(), PersistenceError>;
}
