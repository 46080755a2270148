use crate::mail::{Attachment, Message};

pub const PDF_CONTENT_TYPE: &str = "application/pdf";

/// Whether an attachment should be stored: a PDF that carries a filename.
pub fn is_pdf_attachment(attachment: &Attachment) -> bool {
    let mime = attachment
        .content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim();

    mime.eq_ignore_ascii_case(PDF_CONTENT_TYPE)
        && attachment
            .filename
            .as_deref()
            .is_some_and(|name| !name.trim().is_empty())
}

/// The message's PDF attachments, in the order the message lists them.
pub fn select(message: &Message) -> Vec<&Attachment> {
    message
        .attachments
        .iter()
        .filter(|a| is_pdf_attachment(a))
        .collect()
}
