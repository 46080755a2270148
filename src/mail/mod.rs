pub mod gmail_api;
pub mod imap;
pub mod mime;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::account::{AccountConfig, ConnectionType};
use crate::error::{ConnectionError, ProtocolError, SyncError};

/// Sender, date and subject of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub from_address: String,
    pub date: DateTime<Utc>,
    pub subject: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Lowercased MIME type without parameters.
    pub content_type: String,
    pub filename: Option<String>,
    pub content: Bytes,
}

/// One fetched message with all attachment bodies already downloaded.
#[derive(Debug, Clone)]
pub struct Message {
    /// Monotonic position within the mailbox: the IMAP UID, or the Gmail
    /// internal date in milliseconds.
    pub position: u64,
    pub envelope: Envelope,
    pub attachments: Vec<Attachment>,
}

pub type MessageStream<'a> = BoxStream<'a, Result<Message, ProtocolError>>;

/// Proof of exclusive access to one mailbox on one connection.
///
/// Dropping the guard releases the lock, which covers early returns, errors
/// and cancelled futures alike.
#[derive(Debug)]
pub struct MailboxLock {
    mailbox: String,
    validity: Option<u32>,
    _guard: OwnedMutexGuard<()>,
}

impl MailboxLock {
    pub fn mailbox(&self) -> &str {
        &self.mailbox
    }

    /// IMAP UIDVALIDITY of the opened mailbox; positions from an older
    /// validity are meaningless.
    pub fn validity(&self) -> Option<u32> {
        self.validity
    }
}

/// Per-connection lock slot. Each client owns one; only a single
/// [`MailboxLock`] can be outstanding at a time.
#[derive(Debug, Clone, Default)]
pub struct LockSlot(Arc<Mutex<()>>);

impl LockSlot {
    pub fn acquire(&self, mailbox: &str, validity: Option<u32>) -> Result<MailboxLock, SyncError> {
        let guard = self.0.clone().try_lock_owned().map_err(|_| {
            SyncError::Lock(format!(
                "a mailbox lock is already held on this connection (requested {})",
                mailbox
            ))
        })?;

        Ok(MailboxLock {
            mailbox: mailbox.to_string(),
            validity,
            _guard: guard,
        })
    }

    #[cfg(test)]
    pub fn is_held(&self) -> bool {
        self.0.try_lock().is_err()
    }
}

/// Capability set shared by every mailbox backend.
#[async_trait]
pub trait MailClient: Send {
    /// Open the connection and authenticate.
    async fn connect(&mut self) -> Result<(), ConnectionError>;

    /// Open `mailbox` read-only and take the connection's exclusive lock.
    async fn lock_mailbox(&mut self, mailbox: &str) -> Result<MailboxLock, SyncError>;

    /// Stream every message after `after` (or the whole mailbox) in
    /// ascending position order. Backends whose positions are not unique
    /// also return messages at exactly `after`. Each call re-enumerates from
    /// the server.
    fn fetch_all<'a>(&'a mut self, lock: &'a MailboxLock, after: Option<u64>) -> MessageStream<'a>;

    /// Close the connection. Safe to call repeatedly and after a failed connect.
    async fn disconnect(&mut self);
}

/// Builds the right [`MailClient`] for an account.
pub trait MailClientFactory: Send + Sync {
    fn build(&self, account: &AccountConfig) -> Result<Box<dyn MailClient>, ConnectionError>;
}

/// Production factory: IMAP for IMAP/Outlook accounts, the Gmail REST API for
/// vendor API accounts.
pub struct ProviderClientFactory {
    gmail_api_base: String,
    io_timeout: Duration,
    http: reqwest::Client,
}

impl ProviderClientFactory {
    pub fn new(gmail_api_base: String, io_timeout: Duration) -> Self {
        Self {
            gmail_api_base,
            io_timeout,
            http: reqwest::Client::new(),
        }
    }
}

impl MailClientFactory for ProviderClientFactory {
    fn build(&self, account: &AccountConfig) -> Result<Box<dyn MailClient>, ConnectionError> {
        match &account.connection_type {
            ConnectionType::Imap | ConnectionType::Outlook => Ok(Box::new(imap::ImapClient::new(
                account.imap_endpoint(),
                account.imap_credentials()?,
                self.io_timeout,
            ))),
            ConnectionType::VendorApi => Ok(Box::new(gmail_api::GmailApiClient::new(
                self.http.clone(),
                self.gmail_api_base.clone(),
                account.api_token()?.to_string(),
                self.io_timeout,
            ))),
            ConnectionType::Unsupported(raw) => Err(ConnectionError::Unsupported(raw.clone())),
        }
    }
}
