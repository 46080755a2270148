use std::future::Future;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;

use async_imap::Session;
use async_native_tls::TlsStream;
use async_trait::async_trait;
use futures::io::{AsyncRead, AsyncWrite};
use futures::{StreamExt, TryFutureExt, TryStreamExt};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};

use super::{mime, LockSlot, MailClient, MailboxLock, Message, MessageStream};
use crate::account::{ImapCredentials, ImapEndpoint};
use crate::error::{AuthError, ConnectionError, ProtocolError, SyncError};

/// Items requested per message. `BODY.PEEK[]` leaves `\Seen` untouched.
const FETCH_QUERY: &str = "(UID INTERNALDATE BODY.PEEK[])";

/// Wrapper for either TLS or Plain IMAP stream
enum StreamWrapper {
    Tls(TlsStream<Compat<TcpStream>>),
    Plain(Compat<TcpStream>),
}

impl AsyncRead for StreamWrapper {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &mut [u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            StreamWrapper::Tls(s) => Pin::new(s).poll_read(cx, buf),
            StreamWrapper::Plain(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for StreamWrapper {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            StreamWrapper::Tls(s) => Pin::new(s).poll_write(cx, buf),
            StreamWrapper::Plain(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            StreamWrapper::Tls(s) => Pin::new(s).poll_flush(cx),
            StreamWrapper::Plain(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            StreamWrapper::Tls(s) => Pin::new(s).poll_close(cx),
            StreamWrapper::Plain(s) => Pin::new(s).poll_close(cx),
        }
    }
}

impl std::fmt::Debug for StreamWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamWrapper::Tls(_) => write!(f, "StreamWrapper::Tls"),
            StreamWrapper::Plain(_) => write!(f, "StreamWrapper::Plain"),
        }
    }
}

/// IMAP mailbox client, also used for the Outlook preset.
pub struct ImapClient {
    endpoint: ImapEndpoint,
    credentials: ImapCredentials,
    io_timeout: Duration,
    session: Option<Session<StreamWrapper>>,
    lock: LockSlot,
}

impl ImapClient {
    pub fn new(endpoint: ImapEndpoint, credentials: ImapCredentials, io_timeout: Duration) -> Self {
        Self {
            endpoint,
            credentials,
            io_timeout,
            session: None,
            lock: LockSlot::default(),
        }
    }

    async fn timed<T, F>(&self, fut: F) -> Result<T, ConnectionError>
    where
        F: Future<Output = Result<T, ConnectionError>>,
    {
        tokio::time::timeout(self.io_timeout, fut)
            .await
            .map_err(|_| ConnectionError::Timeout(self.io_timeout.as_secs()))?
    }

    /// Establish a new IMAP connection
    async fn open_session(&self) -> Result<Session<StreamWrapper>, ConnectionError> {
        let ImapEndpoint { host, port, tls } = &self.endpoint;
        tracing::info!("Connecting to IMAP {}:{}", host, port);

        let tcp = TcpStream::connect((host.as_str(), *port))
            .await
            .map_err(|e| ConnectionError::Network(format!("{}:{}: {}", host, port, e)))?;

        let stream = if *tls {
            let tls_stream = async_native_tls::TlsConnector::new()
                .connect(host.as_str(), tcp.compat())
                .await
                .map_err(|e| ConnectionError::Tls(e.to_string()))?;
            StreamWrapper::Tls(tls_stream)
        } else {
            tracing::warn!("Using plain IMAP to {}, credentials travel unencrypted", host);
            StreamWrapper::Plain(tcp.compat())
        };

        let client = async_imap::Client::new(stream);

        let session = client
            .login(&self.credentials.user, &self.credentials.password)
            .await
            .map_err(|(err, _)| login_error(err))?;

        tracing::info!("IMAP login successful for {}", self.credentials.user);
        Ok(session)
    }
}

/// Server refusals (`NO`/`BAD`) on LOGIN mean bad credentials; anything else
/// is a transport problem.
fn login_error(err: async_imap::error::Error) -> ConnectionError {
    match err {
        async_imap::error::Error::No(msg) | async_imap::error::Error::Bad(msg) => {
            AuthError::Rejected(msg).into()
        }
        other => ConnectionError::Network(other.to_string()),
    }
}

/// UID set for an incremental fetch. `N:*` always matches the highest UID
/// even when it is below `N`, so callers still filter by position.
fn uid_range(after: Option<u64>) -> String {
    match after {
        Some(uid) => format!("{}:*", uid.saturating_add(1)),
        None => "1:*".to_string(),
    }
}

fn decode_fetch(fetch: &async_imap::types::Fetch) -> Result<Message, ProtocolError> {
    let uid = fetch.uid.ok_or_else(|| ProtocolError::Malformed {
        message: format!("seq {}", fetch.message),
        reason: "server omitted UID".to_string(),
    })?;

    let raw = fetch.body().ok_or_else(|| ProtocolError::Malformed {
        message: format!("uid {}", uid),
        reason: "server returned no message body".to_string(),
    })?;

    let internal_date = fetch.internal_date().map(|d| d.with_timezone(&chrono::Utc));
    let decoded = mime::decode_message(raw, internal_date).map_err(|e| ProtocolError::Malformed {
        message: format!("uid {}", uid),
        reason: e.to_string(),
    })?;

    Ok(Message {
        position: u64::from(uid),
        envelope: decoded.envelope,
        attachments: decoded.attachments,
    })
}

#[async_trait]
impl MailClient for ImapClient {
    async fn connect(&mut self) -> Result<(), ConnectionError> {
        if self.session.is_some() {
            return Ok(());
        }
        let session = self.timed(self.open_session()).await?;
        self.session = Some(session);
        Ok(())
    }

    async fn lock_mailbox(&mut self, mailbox: &str) -> Result<MailboxLock, SyncError> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| SyncError::Lock("not connected".to_string()))?;
        let mut lock = self.lock.acquire(mailbox, None)?;

        let selected = tokio::time::timeout(self.io_timeout, session.examine(mailbox))
            .await
            .map_err(|_| ConnectionError::Timeout(self.io_timeout.as_secs()))?
            .map_err(|e| SyncError::Lock(format!("EXAMINE {} failed: {}", mailbox, e)))?;

        tracing::debug!(
            "Opened {} read-only: {} messages, uidvalidity {:?}",
            mailbox,
            selected.exists,
            selected.uid_validity
        );

        lock.validity = selected.uid_validity;
        Ok(lock)
    }

    fn fetch_all<'a>(&'a mut self, _lock: &'a MailboxLock, after: Option<u64>) -> MessageStream<'a> {
        let Some(session) = self.session.as_mut() else {
            return futures::stream::once(async {
                Err::<Message, _>(ProtocolError::Transport("not connected".to_string()))
            })
            .boxed();
        };

        let range = uid_range(after);
        tracing::debug!("UID FETCH {} {}", range, FETCH_QUERY);

        session
            .uid_fetch(range, FETCH_QUERY)
            .map_err(|e| ProtocolError::Transport(format!("UID FETCH failed: {}", e)))
            .map_ok(|fetches| {
                fetches.map(|item| {
                    item.map_err(|e| ProtocolError::Transport(e.to_string()))
                        .and_then(|fetch| decode_fetch(&fetch))
                })
            })
            .try_flatten_stream()
            .try_filter(move |message| {
                let keep = after.map_or(true, |cursor| message.position > cursor);
                futures::future::ready(keep)
            })
            .boxed()
    }

    async fn disconnect(&mut self) {
        if let Some(mut session) = self.session.take() {
            match tokio::time::timeout(self.io_timeout, session.logout()).await {
                Ok(Ok(())) => tracing::debug!("IMAP logout for {}", self.credentials.user),
                Ok(Err(e)) => tracing::warn!("IMAP logout failed: {}", e),
                Err(_) => tracing::warn!("IMAP logout timed out, dropping connection"),
            }
        }
    }
}
