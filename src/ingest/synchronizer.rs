use std::future::Future;
use std::sync::Arc;

use futures::StreamExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::file_store::FileStore;
use super::filter;
use super::hasher;
use super::store::{CursorStore, MetadataRecorder, StoredAttachment, SyncCursor};
use crate::account::AccountConfig;
use crate::error::{PersistenceError, SyncError};
use crate::mail::{Attachment, MailClient, MailClientFactory, MailboxLock, Message};

/// Where an account run is (or where it stopped).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Idle,
    Connecting,
    Locked,
    Enumerating,
    Extracting,
    Disconnecting,
    Done,
    Failed,
}

/// The error that ended an account's run, and the phase it hit.
#[derive(Debug)]
pub struct SyncFailure {
    pub phase: SyncPhase,
    pub error: SyncError,
}

/// An attachment (or undecodable message) that was skipped while the run went on.
#[derive(Debug)]
pub struct AttachmentFailure {
    /// Mailbox position of the message, when known.
    pub position: Option<u64>,
    pub filename: Option<String>,
    pub error: SyncError,
}

#[derive(Debug)]
pub struct SyncResult {
    pub account_id: i32,
    pub email_address: String,
    pub phase: SyncPhase,
    pub messages_seen: usize,
    pub stored_count: usize,
    pub duplicate_count: usize,
    pub attachment_failures: Vec<AttachmentFailure>,
    pub failure: Option<SyncFailure>,
}

impl SyncResult {
    pub fn new(account: &AccountConfig) -> Self {
        Self {
            account_id: account.id,
            email_address: account.email_address.clone(),
            phase: SyncPhase::Idle,
            messages_seen: 0,
            stored_count: 0,
            duplicate_count: 0,
            attachment_failures: Vec::new(),
            failure: None,
        }
    }

    /// Result for an account that never got to run.
    pub fn failed(account: &AccountConfig, phase: SyncPhase, error: SyncError) -> Self {
        let mut result = Self::new(account);
        result.phase = SyncPhase::Failed;
        result.failure = Some(SyncFailure { phase, error });
        result
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    pub fn is_auth_failure(&self) -> bool {
        self.failure.as_ref().is_some_and(|f| f.error.is_auth())
    }
}

enum Stored {
    New,
    Duplicate,
}

/// Tracks how far the mailbox can safely be marked as processed.
struct CursorTracker {
    validity: Option<u32>,
    position: u64,
    blocked: bool,
    advanced: bool,
}

impl CursorTracker {
    /// Everything after a failed message has to be seen again next run.
    fn block(&mut self) {
        self.blocked = true;
    }

    fn observe(&mut self, position: u64, clean: bool) {
        if !clean {
            self.block();
        } else if !self.blocked && position > self.position {
            self.position = position;
            self.advanced = true;
        }
    }
}

async fn cancellable<T, E, F>(cancel: &CancellationToken, fut: F) -> Result<T, SyncError>
where
    F: Future<Output = Result<T, E>>,
    SyncError: From<E>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SyncError::Cancelled),
        res = fut => res.map_err(SyncError::from),
    }
}

/// Runs one account: connect, lock, enumerate, store, disconnect.
pub struct AccountSynchronizer {
    clients: Arc<dyn MailClientFactory>,
    files: FileStore,
    recorder: Arc<dyn MetadataRecorder>,
    cursors: Arc<dyn CursorStore>,
    mailbox: String,
}

impl AccountSynchronizer {
    pub fn new(
        clients: Arc<dyn MailClientFactory>,
        files: FileStore,
        recorder: Arc<dyn MetadataRecorder>,
        cursors: Arc<dyn CursorStore>,
        mailbox: String,
    ) -> Self {
        Self {
            clients,
            files,
            recorder,
            cursors,
            mailbox,
        }
    }

    /// Synchronize one account. Never panics on mailbox or storage errors;
    /// they end up in the returned result.
    pub async fn synchronize(&self, account: &AccountConfig, cancel: &CancellationToken) -> SyncResult {
        let span = tracing::info_span!("sync", account_id = account.id, email = %account.email_address);
        self.synchronize_inner(account, cancel).instrument(span).await
    }

    async fn synchronize_inner(&self, account: &AccountConfig, cancel: &CancellationToken) -> SyncResult {
        let mut result = SyncResult::new(account);

        result.phase = SyncPhase::Connecting;
        let mut client = match self.clients.build(account) {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!("Cannot build mail client: {}", e);
                return SyncResult::failed(account, SyncPhase::Connecting, e.into());
            }
        };

        let outcome = self.run_session(client.as_mut(), account, &mut result, cancel).await;

        // The mailbox lock was dropped when run_session returned.
        result.phase = SyncPhase::Disconnecting;
        client.disconnect().await;

        match outcome {
            Ok(()) => {
                result.phase = SyncPhase::Done;
                tracing::info!(
                    "Sync done: {} messages, {} stored, {} duplicates, {} skipped",
                    result.messages_seen,
                    result.stored_count,
                    result.duplicate_count,
                    result.attachment_failures.len()
                );
            }
            Err((phase, error)) => {
                tracing::warn!("Sync failed while {:?}: {}", phase, error);
                result.phase = SyncPhase::Failed;
                result.failure = Some(SyncFailure { phase, error });
            }
        }
        result
    }

    async fn run_session(
        &self,
        client: &mut dyn MailClient,
        account: &AccountConfig,
        result: &mut SyncResult,
        cancel: &CancellationToken,
    ) -> Result<(), (SyncPhase, SyncError)> {
        cancellable(cancel, client.connect())
            .await
            .map_err(|e| (SyncPhase::Connecting, e))?;

        let stored_cursor = match self.cursors.load(account.id).await {
            Ok(cursor) => cursor,
            Err(e) => {
                // Rescanning is safe: known attachments are skipped by content hash.
                tracing::warn!("Could not load sync cursor, rescanning mailbox: {}", e);
                None
            }
        };

        result.phase = SyncPhase::Locked;
        let lock = cancellable(cancel, client.lock_mailbox(&self.mailbox))
            .await
            .map_err(|e| (SyncPhase::Locked, e))?;

        let after = stored_cursor.and_then(|c| c.resume_after(lock.validity()));
        if stored_cursor.is_some() && after.is_none() {
            tracing::info!("Mailbox {} was renumbered, rescanning from the start", lock.mailbox());
        }

        let mut tracker = CursorTracker {
            validity: lock.validity(),
            position: after.unwrap_or(0),
            blocked: false,
            advanced: false,
        };

        result.phase = SyncPhase::Enumerating;
        let outcome = self
            .drain(client, &lock, after, account, result, &mut tracker, cancel)
            .await;
        drop(lock);

        if tracker.advanced {
            let cursor = SyncCursor {
                validity: tracker.validity,
                position: tracker.position,
            };
            if let Err(e) = self.cursors.save(account.id, cursor).await {
                tracing::warn!("Could not persist sync cursor: {}", e);
                if outcome.is_ok() {
                    return Err((SyncPhase::Enumerating, e.into()));
                }
            }
        }

        outcome
    }

    #[allow(clippy::too_many_arguments)]
    async fn drain(
        &self,
        client: &mut dyn MailClient,
        lock: &MailboxLock,
        after: Option<u64>,
        account: &AccountConfig,
        result: &mut SyncResult,
        tracker: &mut CursorTracker,
        cancel: &CancellationToken,
    ) -> Result<(), (SyncPhase, SyncError)> {
        let mut messages = client.fetch_all(lock, after);

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err((SyncPhase::Enumerating, SyncError::Cancelled)),
                next = messages.next() => next,
            };

            let message = match next {
                None => return Ok(()),
                Some(Ok(message)) => message,
                Some(Err(e)) if e.is_fatal() => return Err((SyncPhase::Enumerating, e.into())),
                Some(Err(e)) => {
                    let error = SyncError::from(e);
                    if error.is_permanent() {
                        tracing::warn!("Skipping undecodable message: {}", error);
                    } else {
                        tracing::warn!("Message left for the next run: {}", error);
                        tracker.block();
                    }
                    result.attachment_failures.push(AttachmentFailure {
                        position: None,
                        filename: None,
                        error,
                    });
                    continue;
                }
            };

            result.messages_seen += 1;
            result.phase = SyncPhase::Extracting;
            let clean = self.extract(account, &message, result).await;
            tracker.observe(message.position, clean);
            result.phase = SyncPhase::Enumerating;
        }
    }

    /// Store every selected attachment of `message`. Returns false when a
    /// failure means the message must be looked at again next run.
    async fn extract(&self, account: &AccountConfig, message: &Message, result: &mut SyncResult) -> bool {
        let mut clean = true;

        for attachment in filter::select(message) {
            match self.store_attachment(account.id, message, attachment).await {
                Ok(Stored::New) => result.stored_count += 1,
                Ok(Stored::Duplicate) => result.duplicate_count += 1,
                Err(error) => {
                    tracing::warn!(
                        "Attachment {:?} of message {} not stored: {}",
                        attachment.filename,
                        message.position,
                        error
                    );
                    if !error.is_permanent() {
                        clean = false;
                    }
                    result.attachment_failures.push(AttachmentFailure {
                        position: Some(message.position),
                        filename: attachment.filename.clone(),
                        error,
                    });
                }
            }
        }

        clean
    }

    /// File first, then metadata. If the metadata insert fails the file is
    /// deleted again so no stored file lacks a record.
    async fn store_attachment(
        &self,
        account_id: i32,
        message: &Message,
        attachment: &Attachment,
    ) -> Result<Stored, SyncError> {
        let content_hash = hasher::content_hash(&attachment.content);
        if self.recorder.contains(account_id, &content_hash).await? {
            tracing::debug!("Attachment {:?} already ingested", attachment.filename);
            return Ok(Stored::Duplicate);
        }

        let original_name = attachment.filename.clone().unwrap_or_default();
        let file_path = self
            .files
            .save(account_id, &original_name, &attachment.content)
            .await?;

        let record = StoredAttachment {
            file_path,
            attachment_file_name: original_name,
            from_address: message.envelope.from_address.clone(),
            date_received: message.envelope.date,
            subject: message.envelope.subject.clone(),
            account_id,
            content_hash,
        };

        match self.recorder.record(&record).await {
            Ok(id) => {
                tracing::info!(
                    "Stored {} as {} (record {})",
                    record.attachment_file_name,
                    record.file_path,
                    id
                );
                Ok(Stored::New)
            }
            Err(e) => {
                if let Err(rm) = self.files.remove(&record.file_path).await {
                    tracing::error!("Orphaned file {} left behind: {}", record.file_path, rm);
                }
                match e {
                    PersistenceError::Duplicate(_) => Ok(Stored::Duplicate),
                    other => Err(other.into()),
                }
            }
        }
    }
}
