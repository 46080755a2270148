//! In-memory fakes for the mail backends and stores.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{TimeZone, Utc};
use futures::stream::{self, StreamExt};

use crate::account::{AccountConfig, ConnectionType};
use crate::error::{AuthError, ConnectionError, PersistenceError, ProtocolError, SyncError};
use crate::ingest::store::{ConfigStore, CursorStore, MetadataRecorder, StoredAttachment, SyncCursor};
use crate::mail::{
    Attachment, Envelope, LockSlot, MailClient, MailClientFactory, MailboxLock, Message,
    MessageStream,
};

pub fn imap_account(id: i32, email: &str) -> AccountConfig {
    AccountConfig {
        id,
        email_address: email.to_string(),
        connection_type: ConnectionType::Imap,
        host: Some("imap.example.test".to_string()),
        port: Some(993),
        tls: Some(true),
        username: None,
        password: Some("secret".to_string()),
        api_token: None,
    }
}

pub fn pdf(filename: &str, content: &[u8]) -> Attachment {
    Attachment {
        content_type: "application/pdf".to_string(),
        filename: Some(filename.to_string()),
        content: Bytes::copy_from_slice(content),
    }
}

type ConnectFailure = Arc<dyn Fn() -> ConnectionError + Send + Sync>;
type StreamFailure = Arc<dyn Fn() -> ProtocolError + Send + Sync>;
type Checkpoint = Arc<dyn Fn() + Send + Sync>;

enum Entry {
    Message(Message),
    Malformed(String),
    Unavailable(String),
    Checkpoint(Checkpoint),
}

/// One step of a scripted enumeration. Checkpoints run when the consumer
/// polls past them and yield nothing.
enum Step {
    Item(Result<Message, ProtocolError>),
    Run(Checkpoint),
}

/// Keep steps up to (not including) the item after the first `count` items.
fn truncate_items(steps: &mut Vec<Step>, count: usize) {
    let mut seen = 0;
    let cut = steps
        .iter()
        .position(|step| {
            if matches!(step, Step::Item(_)) {
                seen += 1;
            }
            seen > count
        })
        .unwrap_or(steps.len());
    steps.truncate(cut);
}

enum Tail {
    End,
    FailAfter(usize, StreamFailure),
    StallAfter(usize),
}

/// Scripted mailbox contents and failures.
pub struct FakeMailbox {
    validity: Option<u32>,
    entries: Vec<Entry>,
    tail: Tail,
    connect_error: Option<ConnectFailure>,
    connect_delay: Option<Duration>,
    panic_on_connect: bool,
}

impl FakeMailbox {
    pub fn new() -> Self {
        Self {
            validity: None,
            entries: Vec::new(),
            tail: Tail::End,
            connect_error: None,
            connect_delay: None,
            panic_on_connect: false,
        }
    }

    pub fn validity(mut self, validity: u32) -> Self {
        self.validity = Some(validity);
        self
    }

    pub fn message(mut self, position: u64, attachments: Vec<Attachment>) -> Self {
        self.entries.push(Entry::Message(Message {
            position,
            envelope: Envelope {
                from_address: "billing@vendor.test".to_string(),
                date: Utc.with_ymd_and_hms(2024, 3, 4, 9, 30, 0).unwrap(),
                subject: format!("Invoice {}", position),
            },
            attachments,
        }));
        self
    }

    pub fn malformed(mut self, label: &str) -> Self {
        self.entries.push(Entry::Malformed(label.to_string()));
        self
    }

    /// A message the server could not hand out this time.
    pub fn unavailable(mut self, label: &str) -> Self {
        self.entries.push(Entry::Unavailable(label.to_string()));
        self
    }

    /// Run `f` once enumeration has moved past everything before it.
    pub fn checkpoint<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.entries.push(Entry::Checkpoint(Arc::new(f)));
        self
    }

    /// Yield `count` entries, then a stream error.
    pub fn fail_after<F>(mut self, count: usize, error: F) -> Self
    where
        F: Fn() -> ProtocolError + Send + Sync + 'static,
    {
        self.tail = Tail::FailAfter(count, Arc::new(error));
        self
    }

    /// Yield `count` entries, then never finish.
    pub fn stall_after(mut self, count: usize) -> Self {
        self.tail = Tail::StallAfter(count);
        self
    }

    pub fn fail_connect<F>(mut self, error: F) -> Self
    where
        F: Fn() -> ConnectionError + Send + Sync + 'static,
    {
        self.connect_error = Some(Arc::new(error));
        self
    }

    pub fn connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    pub fn panic_on_connect(mut self) -> Self {
        self.panic_on_connect = true;
        self
    }
}

#[derive(Default)]
struct ProbeState {
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    last_after: Mutex<Option<u64>>,
    slot: LockSlot,
}

/// What a fake client observed, for assertions.
#[derive(Clone)]
pub struct Probe(Arc<ProbeState>);

impl Probe {
    pub fn connects(&self) -> usize {
        self.0.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.0.disconnects.load(Ordering::SeqCst)
    }

    pub fn lock_held(&self) -> bool {
        self.0.slot.is_held()
    }

    /// The `after` argument of the most recent enumeration.
    pub fn last_after(&self) -> Option<u64> {
        *self.0.last_after.lock().unwrap()
    }
}

#[derive(Default)]
struct Gauge {
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

struct FakeClient {
    mailbox: Arc<FakeMailbox>,
    probe: Arc<ProbeState>,
    gauge: Arc<Gauge>,
    entered: bool,
}

#[async_trait]
impl MailClient for FakeClient {
    async fn connect(&mut self) -> Result<(), ConnectionError> {
        self.probe.connects.fetch_add(1, Ordering::SeqCst);
        if self.mailbox.panic_on_connect {
            panic!("fake client exploded");
        }

        self.gauge.enter();
        self.entered = true;

        if let Some(delay) = self.mailbox.connect_delay {
            tokio::time::sleep(delay).await;
        }
        match &self.mailbox.connect_error {
            Some(error) => Err(error()),
            None => Ok(()),
        }
    }

    async fn lock_mailbox(&mut self, mailbox: &str) -> Result<MailboxLock, SyncError> {
        self.probe.slot.acquire(mailbox, self.mailbox.validity)
    }

    fn fetch_all<'a>(&'a mut self, _lock: &'a MailboxLock, after: Option<u64>) -> MessageStream<'a> {
        *self.probe.last_after.lock().unwrap() = after;

        let mut steps: Vec<Step> = Vec::new();
        for entry in &self.mailbox.entries {
            match entry {
                Entry::Message(m) if after.map_or(true, |a| m.position > a) => {
                    steps.push(Step::Item(Ok(m.clone())))
                }
                Entry::Message(_) => {}
                Entry::Malformed(label) => steps.push(Step::Item(Err(ProtocolError::Malformed {
                    message: label.clone(),
                    reason: "unparseable headers".to_string(),
                }))),
                Entry::Unavailable(label) => {
                    steps.push(Step::Item(Err(ProtocolError::Unavailable {
                        message: label.clone(),
                        reason: "server answered 429 Too Many Requests".to_string(),
                    })))
                }
                Entry::Checkpoint(f) => steps.push(Step::Run(f.clone())),
            }
        }

        let stalled = match &self.mailbox.tail {
            Tail::End => false,
            Tail::FailAfter(count, error) => {
                truncate_items(&mut steps, *count);
                steps.push(Step::Item(Err(error())));
                false
            }
            Tail::StallAfter(count) => {
                truncate_items(&mut steps, *count);
                true
            }
        };

        let items = stream::iter(steps).filter_map(|step| async move {
            match step {
                Step::Item(item) => Some(item),
                Step::Run(f) => {
                    f();
                    None
                }
            }
        });
        if stalled {
            items.chain(stream::pending()).boxed()
        } else {
            items.boxed()
        }
    }

    async fn disconnect(&mut self) {
        self.probe.disconnects.fetch_add(1, Ordering::SeqCst);
        if self.entered {
            self.entered = false;
            self.gauge.leave();
        }
    }
}

/// Hands out [`FakeClient`]s for registered account ids.
#[derive(Default)]
pub struct FakeClientFactory {
    mailboxes: Mutex<HashMap<i32, (Arc<FakeMailbox>, Arc<ProbeState>)>>,
    rejected: Mutex<HashSet<i32>>,
    gauge: Arc<Gauge>,
}

impl FakeClientFactory {
    /// Register (or replace) the mailbox served for `account_id`.
    pub fn register(&self, account_id: i32, mailbox: FakeMailbox) -> Probe {
        let state = Arc::new(ProbeState::default());
        self.mailboxes
            .lock()
            .unwrap()
            .insert(account_id, (Arc::new(mailbox), state.clone()));
        Probe(state)
    }

    /// Make `build` fail as if the account had no credentials.
    pub fn reject_build(&self, account_id: i32) {
        self.rejected.lock().unwrap().insert(account_id);
    }

    /// Most connections that were open at the same time.
    pub fn peak_connections(&self) -> usize {
        self.gauge.peak.load(Ordering::SeqCst)
    }
}

impl MailClientFactory for FakeClientFactory {
    fn build(&self, account: &AccountConfig) -> Result<Box<dyn MailClient>, ConnectionError> {
        if self.rejected.lock().unwrap().contains(&account.id) {
            return Err(AuthError::MissingCredentials(account.email_address.clone()).into());
        }

        let (mailbox, probe) = self
            .mailboxes
            .lock()
            .unwrap()
            .get(&account.id)
            .cloned()
            .ok_or_else(|| ConnectionError::Network("no fake mailbox registered".to_string()))?;

        Ok(Box::new(FakeClient {
            mailbox,
            probe,
            gauge: self.gauge.clone(),
            entered: false,
        }))
    }
}

#[derive(Default)]
pub struct MemoryRecorder {
    records: Mutex<Vec<StoredAttachment>>,
    fail_on: Mutex<HashSet<String>>,
}

impl MemoryRecorder {
    pub fn records(&self) -> Vec<StoredAttachment> {
        self.records.lock().unwrap().clone()
    }

    /// Make inserts for this attachment filename fail.
    pub fn fail_on(&self, filename: &str) {
        self.fail_on.lock().unwrap().insert(filename.to_string());
    }
}

#[async_trait]
impl MetadataRecorder for MemoryRecorder {
    async fn record(&self, attachment: &StoredAttachment) -> Result<i32, PersistenceError> {
        if self
            .fail_on
            .lock()
            .unwrap()
            .contains(&attachment.attachment_file_name)
        {
            return Err(PersistenceError::Database("simulated insert failure".to_string()));
        }

        let mut records = self.records.lock().unwrap();
        if records
            .iter()
            .any(|r| r.account_id == attachment.account_id && r.content_hash == attachment.content_hash)
        {
            return Err(PersistenceError::Duplicate(attachment.content_hash.clone()));
        }
        records.push(attachment.clone());
        Ok(records.len() as i32)
    }

    async fn contains(&self, account_id: i32, content_hash: &str) -> Result<bool, PersistenceError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .any(|r| r.account_id == account_id && r.content_hash == content_hash))
    }
}

#[derive(Default)]
pub struct MemoryCursorStore {
    cursors: Mutex<HashMap<i32, SyncCursor>>,
}

impl MemoryCursorStore {
    pub fn get(&self, account_id: i32) -> Option<SyncCursor> {
        self.cursors.lock().unwrap().get(&account_id).copied()
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn load(&self, account_id: i32) -> Result<Option<SyncCursor>, PersistenceError> {
        Ok(self.get(account_id))
    }

    async fn save(&self, account_id: i32, cursor: SyncCursor) -> Result<(), PersistenceError> {
        self.cursors.lock().unwrap().insert(account_id, cursor);
        Ok(())
    }
}

pub struct MemoryConfigStore {
    accounts: Vec<AccountConfig>,
    unavailable: bool,
}

impl MemoryConfigStore {
    pub fn new(accounts: Vec<AccountConfig>) -> Self {
        Self {
            accounts,
            unavailable: false,
        }
    }

    pub fn unavailable() -> Self {
        Self {
            accounts: Vec::new(),
            unavailable: true,
        }
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn list_accounts(&self) -> Result<Vec<AccountConfig>, PersistenceError> {
        if self.unavailable {
            return Err(PersistenceError::Database("connection refused".to_string()));
        }
        Ok(self.accounts.clone())
    }
}
