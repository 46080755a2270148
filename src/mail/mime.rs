//! RFC 5322 / MIME decoding shared by the IMAP and Gmail backends. Both hand
//! us the raw message source, so the envelope and attachments are always read
//! the same way.

use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use mailparse::{DispositionType, MailAddr, MailHeaderMap, ParsedMail};

use super::{Attachment, Envelope};

pub const NO_SUBJECT: &str = "No Subject";

/// Result of decoding one raw message.
#[derive(Debug)]
pub struct DecodedMessage {
    pub envelope: Envelope,
    pub attachments: Vec<Attachment>,
}

/// Decode `raw`. `fallback_date` is the server's internal date, used when the
/// `Date` header is missing or unparseable.
pub fn decode_message(
    raw: &[u8],
    fallback_date: Option<DateTime<Utc>>,
) -> Result<DecodedMessage, mailparse::MailParseError> {
    let parsed = mailparse::parse_mail(raw)?;

    let envelope = Envelope {
        from_address: parsed
            .headers
            .get_first_value("From")
            .as_deref()
            .and_then(first_address)
            .unwrap_or_default(),
        date: parsed
            .headers
            .get_first_value("Date")
            .and_then(|d| mailparse::dateparse(&d).ok())
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
            .or(fallback_date)
            .unwrap_or_else(Utc::now),
        subject: parsed
            .headers
            .get_first_value("Subject")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| NO_SUBJECT.to_string()),
    };

    let mut attachments = Vec::new();
    for part in parsed.parts() {
        if let Some(attachment) = leaf_attachment(part)? {
            attachments.push(attachment);
        }
    }

    Ok(DecodedMessage {
        envelope,
        attachments,
    })
}

fn first_address(header: &str) -> Option<String> {
    let list = mailparse::addrparse(header).ok()?;
    list.iter().find_map(|addr| match addr {
        MailAddr::Single(single) => Some(single.addr.clone()),
        MailAddr::Group(group) => group.addrs.first().map(|s| s.addr.clone()),
    })
}

/// A leaf part counts as an attachment when it is marked as one or carries a
/// filename (inline PDFs from some mailers only set `name=` on the type).
fn leaf_attachment(part: &ParsedMail<'_>) -> Result<Option<Attachment>, mailparse::MailParseError> {
    if !part.subparts.is_empty() {
        return Ok(None);
    }

    let disposition = part.get_content_disposition();
    let filename = disposition
        .params
        .get("filename")
        .or_else(|| part.ctype.params.get("name"))
        .map(|name| name.trim().to_string());

    if disposition.disposition != DispositionType::Attachment && filename.is_none() {
        return Ok(None);
    }

    Ok(Some(Attachment {
        content_type: part.ctype.mimetype.to_ascii_lowercase(),
        filename,
        content: Bytes::from(part.get_body_raw()?),
    }))
}
