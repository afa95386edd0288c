//! Gmail API response normalization
//!
//! Converts Gmail API responses to the transient domain models consumed by
//! the rule pipeline.

use anyhow::{Context, Result};
use base64::prelude::*;

use super::api::{GmailMessage, MessagePayload};
use crate::models::{AttachmentPart, HeaderMap, MessageDetail, MessageId};

/// Normalize a Gmail API message to a [`MessageDetail`]
///
/// Headers are indexed once here so the pipeline never rescans them.
pub fn normalize_message(gmail_msg: GmailMessage) -> Result<MessageDetail> {
    let payload = gmail_msg
        .payload
        .as_ref()
        .context("Message has no payload")?;

    Ok(MessageDetail {
        id: MessageId::new(&gmail_msg.id),
        headers: build_header_map(payload),
        attachments: extract_attachments(payload),
        inline_body: extract_inline_body(payload),
    })
}

fn build_header_map(payload: &MessagePayload) -> HeaderMap {
    let headers = payload.headers.as_deref().unwrap_or_default();
    HeaderMap::from_pairs(headers.iter().map(|h| (h.name.as_str(), h.value.as_str())))
}

/// Collect the top-level parts that are downloadable attachments
///
/// Only parts carrying both a filename and an attachment ID qualify.
fn extract_attachments(payload: &MessagePayload) -> Vec<AttachmentPart> {
    let Some(parts) = &payload.parts else {
        return Vec::new();
    };

    parts
        .iter()
        .filter_map(|part| {
            let filename = part.filename.as_deref().filter(|f| !f.is_empty())?;
            let attachment_id = part
                .body
                .as_ref()?
                .attachment_id
                .as_deref()
                .filter(|id| !id.is_empty())?;
            Some(AttachmentPart {
                filename: filename.to_string(),
                attachment_id: attachment_id.to_string(),
            })
        })
        .collect()
}

/// Inline body data on the payload itself (single-part messages only)
fn extract_inline_body(payload: &MessagePayload) -> Option<String> {
    payload
        .body
        .as_ref()?
        .data
        .as_ref()
        .filter(|data| !data.is_empty())
        .cloned()
}

/// Decode base64-encoded body or attachment data
///
/// Gmail uses URL-safe base64 but padding can vary, so we try multiple decoders.
pub fn decode_base64(data: &str) -> Result<Vec<u8>> {
    use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE};

    let decoders: &[&base64::engine::GeneralPurpose] =
        &[&BASE64_URL_SAFE_NO_PAD, &URL_SAFE, &STANDARD, &STANDARD_NO_PAD];

    for decoder in decoders {
        if let Ok(decoded) = decoder.decode(data) {
            return Ok(decoded);
        }
    }

    anyhow::bail!("Data is not valid base64 ({} bytes)", data.len())
}

/// Decode base64 data into text, replacing invalid UTF-8 sequences
pub fn decode_base64_text(data: &str) -> Result<String> {
    let bytes = decode_base64(data)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
