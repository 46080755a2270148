//! Gmail REST API backend. Listed messages are ordered by internal date,
//! then fetched in `raw` format and decoded with the same MIME code as IMAP.

use std::time::Duration;

use async_trait::async_trait;
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use chrono::{TimeZone, Utc};
use futures::{StreamExt, TryFutureExt, TryStreamExt};
use reqwest::StatusCode;
use serde::Deserialize;
use url::Url;

use super::{mime, LockSlot, MailClient, MailboxLock, Message, MessageStream};
use crate::error::{AuthError, ConnectionError, ProtocolError, SyncError};

/// Gmail pads `raw` inconsistently.
const RAW_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

const PAGE_SIZE: &str = "500";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Profile {
    email_address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListMessagesResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageDate {
    internal_date: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMessage {
    id: String,
    /// Milliseconds since the epoch, serialized as a string.
    internal_date: Option<String>,
    raw: String,
}

/// Gmail API client authenticated with an OAuth access token.
pub struct GmailApiClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    io_timeout: Duration,
    connected: bool,
    lock: LockSlot,
}

impl GmailApiClient {
    pub fn new(http: reqwest::Client, base_url: String, token: String, io_timeout: Duration) -> Self {
        Self {
            http,
            base_url,
            token,
            io_timeout,
            connected: false,
            lock: LockSlot::default(),
        }
    }

    fn url(&self, path: &str) -> Result<Url, String> {
        Url::parse(&format!("{}/users/me/{}", self.base_url, path))
            .map_err(|e| format!("invalid Gmail API URL: {}", e))
    }

    async fn get(&self, url: Url) -> Result<reqwest::Response, reqwest::Error> {
        self.http
            .get(url)
            .bearer_auth(&self.token)
            .timeout(self.io_timeout)
            .send()
            .await
    }

    /// Message ids in `label` listed by the API for anything newer than
    /// `after_ms`. The order is whatever the server returns.
    async fn list_ids(&self, label: &str, after_ms: Option<u64>) -> Result<Vec<String>, ProtocolError> {
        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = self.url("messages").map_err(ProtocolError::Transport)?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("labelIds", label);
                query.append_pair("maxResults", PAGE_SIZE);
                if let Some(ms) = after_ms {
                    // `after:` has whole-second resolution; step back one so
                    // the cursor's own second is listed too.
                    query.append_pair("q", &format!("after:{}", (ms / 1000).saturating_sub(1)));
                }
                if let Some(token) = &page_token {
                    query.append_pair("pageToken", token);
                }
            }

            let page: ListMessagesResponse = self
                .get(url)
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(|e| ProtocolError::Transport(format!("listing messages failed: {}", e)))?
                .json()
                .await
                .map_err(|e| ProtocolError::Transport(format!("bad message listing: {}", e)))?;

            ids.extend(page.messages.into_iter().map(|m| m.id));

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        tracing::debug!("Gmail listing for {} returned {} messages", label, ids.len());
        Ok(ids)
    }

    /// Ids at or after `after_ms`, sorted by internal date. The listing is
    /// not guaranteed to be in date order, and the cursor needs positions to
    /// rise.
    async fn dated_ids(
        &self,
        label: &str,
        after_ms: Option<u64>,
    ) -> Result<Vec<(u64, String)>, ProtocolError> {
        let mut dated = Vec::new();
        for id in self.list_ids(label, after_ms).await? {
            match self.internal_date(&id).await {
                Ok(date) => dated.push((date, id)),
                Err(ProtocolError::Malformed { reason, .. }) => {
                    tracing::debug!("Skipping message {}: {}", id, reason);
                }
                // Unplaced messages would break the ordering, so stop and
                // let the next run list them again.
                Err(e) => {
                    return Err(ProtocolError::Transport(format!(
                        "reading date of message {}: {}",
                        id, e
                    )))
                }
            }
        }

        dated.retain(|(date, _)| after_ms.map_or(true, |cursor| *date >= cursor));
        dated.sort_by_key(|(date, _)| *date);
        Ok(dated)
    }

    async fn get_message(&self, id: &str, format: &str) -> Result<reqwest::Response, ProtocolError> {
        let mut url = self
            .url(&format!("messages/{}", id))
            .map_err(ProtocolError::Transport)?;
        url.query_pairs_mut().append_pair("format", format);

        let response = self
            .get(url)
            .await
            .map_err(|e| ProtocolError::Transport(format!("fetching message {}: {}", id, e)))?;

        match status_error(id, response.status()) {
            Some(e) => Err(e),
            None => Ok(response),
        }
    }

    async fn internal_date(&self, id: &str) -> Result<u64, ProtocolError> {
        let meta: MessageDate = self
            .get_message(id, "minimal")
            .await?
            .json()
            .await
            .map_err(|e| ProtocolError::Transport(format!("bad metadata for {}: {}", id, e)))?;

        meta.internal_date
            .as_deref()
            .and_then(|d| d.parse().ok())
            .ok_or_else(|| ProtocolError::Malformed {
                message: id.to_string(),
                reason: "missing internalDate".to_string(),
            })
    }

    async fn fetch_message(&self, id: String) -> Result<Message, ProtocolError> {
        let raw: RawMessage = self
            .get_message(&id, "raw")
            .await?
            .json()
            .await
            .map_err(|e| ProtocolError::Malformed {
                message: id.clone(),
                reason: e.to_string(),
            })?;

        decode_raw(raw)
    }
}

/// How a non-success answer for a single message is treated. Deleted
/// messages are skipped for good. Throttling and server errors leave the
/// message for the next run. Anything else, such as a token that expired
/// mid-run, ends the enumeration.
fn status_error(id: &str, status: StatusCode) -> Option<ProtocolError> {
    if status.is_success() {
        return None;
    }

    let reason = format!("server answered {}", status);
    let transient = status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error();

    let error = match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => ProtocolError::Malformed {
            message: id.to_string(),
            reason,
        },
        _ if transient => ProtocolError::Unavailable {
            message: id.to_string(),
            reason,
        },
        _ => ProtocolError::Transport(format!("message {}: {}", id, reason)),
    };
    Some(error)
}

fn is_auth_status(status: StatusCode) -> bool {
    status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN
}

fn decode_raw(raw: RawMessage) -> Result<Message, ProtocolError> {
    let malformed = |reason: String| ProtocolError::Malformed {
        message: raw.id.clone(),
        reason,
    };

    let position: u64 = raw
        .internal_date
        .as_deref()
        .and_then(|d| d.parse().ok())
        .ok_or_else(|| malformed("missing internalDate".to_string()))?;

    let source = RAW_ENGINE
        .decode(raw.raw.trim())
        .map_err(|e| malformed(format!("raw is not base64url: {}", e)))?;

    let internal_date = i64::try_from(position)
        .ok()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single());
    let decoded =
        mime::decode_message(&source, internal_date).map_err(|e| malformed(e.to_string()))?;

    Ok(Message {
        position,
        envelope: decoded.envelope,
        attachments: decoded.attachments,
    })
}

#[async_trait]
impl MailClient for GmailApiClient {
    async fn connect(&mut self) -> Result<(), ConnectionError> {
        let url = self.url("profile").map_err(ConnectionError::Network)?;
        let response = self.get(url).await.map_err(|e| {
            if e.is_timeout() {
                ConnectionError::Timeout(self.io_timeout.as_secs())
            } else {
                ConnectionError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if is_auth_status(status) {
            return Err(AuthError::Rejected(format!("Gmail API answered {}", status)).into());
        }

        let profile: Profile = response
            .error_for_status()
            .map_err(|e| ConnectionError::Network(e.to_string()))?
            .json()
            .await
            .map_err(|e| ConnectionError::Network(format!("bad profile response: {}", e)))?;

        tracing::info!("Gmail API session ready for {}", profile.email_address);
        self.connected = true;
        Ok(())
    }

    async fn lock_mailbox(&mut self, mailbox: &str) -> Result<MailboxLock, SyncError> {
        if !self.connected {
            return Err(SyncError::Lock("not connected".to_string()));
        }
        self.lock.acquire(mailbox, None)
    }

    fn fetch_all<'a>(&'a mut self, lock: &'a MailboxLock, after: Option<u64>) -> MessageStream<'a> {
        if !self.connected {
            return futures::stream::once(async {
                Err::<Message, _>(ProtocolError::Transport("not connected".to_string()))
            })
            .boxed();
        }

        // Internal dates are not unique, so messages sharing the cursor's
        // millisecond are read again; their content hashes make them
        // duplicates.
        let this = &*self;
        this.dated_ids(lock.mailbox(), after)
            .map_ok(move |ids| {
                futures::stream::iter(ids).then(move |(_, id)| this.fetch_message(id))
            })
            .try_flatten_stream()
            .try_filter(move |message| {
                let keep = after.map_or(true, |cursor| message.position >= cursor);
                futures::future::ready(keep)
            })
            .boxed()
    }

    async fn disconnect(&mut self) {
        self.connected = false;
    }
}
