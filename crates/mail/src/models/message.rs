//! Message model representing a fetched Gmail message

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Unique identifier for a message (Gmail message ID)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Case-insensitive header lookup built once per message
///
/// When a header appears more than once the first occurrence wins.
#[derive(Debug, Clone, Default)]
pub struct HeaderMap {
    values: HashMap<String, String>,
}

impl HeaderMap {
    /// Build the lookup from (name, value) pairs in message order
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut values = HashMap::new();
        for (name, value) in pairs {
            values
                .entry(name.to_ascii_lowercase())
                .or_insert_with(|| value.to_string());
        }
        Self { values }
    }

    /// Get a header value by name
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A message part that can be downloaded as an attachment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentPart {
    /// Filename declared by the sender
    pub filename: String,
    /// Gmail attachment ID used to fetch the bytes
    pub attachment_id: String,
}

/// Transient view of a message used by the rule pipeline
///
/// Created from the Gmail API response, consumed by one pass of the
/// pipeline and then dropped.
#[derive(Debug, Clone)]
pub struct MessageDetail {
    pub id: MessageId,
    pub headers: HeaderMap,
    /// Top-level parts carrying both a filename and an attachment ID
    pub attachments: Vec<AttachmentPart>,
    /// Encoded inline body of a single-part message, if any
    pub inline_body: Option<String>,
}

impl MessageDetail {
    /// Subject line, or "No Subject" when absent
    pub fn subject(&self) -> &str {
        self.headers.get("Subject").unwrap_or("No Subject")
    }

    /// Raw Date header
    pub fn date_header(&self) -> Option<&str> {
        self.headers.get("Date")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_map_case_insensitive() {
        let headers = HeaderMap::from_pairs([("SUBJECT", "Invoice"), ("date", "today")]);
        assert_eq!(headers.get("Subject"), Some("Invoice"));
        assert_eq!(headers.get("Date"), Some("today"));
        assert_eq!(headers.get("From"), None);
    }

    #[test]
    fn test_header_map_first_wins() {
        let headers = HeaderMap::from_pairs([("Received", "first"), ("Received", "second")]);
        assert_eq!(headers.get("received"), Some("first"));
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn test_subject_default() {
        let detail = MessageDetail {
            id: MessageId::new("m1"),
            headers: HeaderMap::default(),
            attachments: Vec::new(),
            inline_body: None,
        };
        assert_eq!(detail.subject(), "No Subject");
        assert_eq!(detail.date_header(), None);
    }
}
