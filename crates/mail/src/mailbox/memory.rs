//! In-memory mailbox implementation
//!
//! Used by tests to drive the rule engine without a network. It understands
//! the `label:` and `subject:` operators the engine emits, paginates with a
//! configurable page size, and can be told to fail specific operations.

use anyhow::{Result, anyhow, bail};
use base64::prelude::*;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::Mailbox;
use crate::gmail::api::{
    AttachmentBody, GmailMessage, Header, ListMessagesResponse, MessageBody, MessagePart,
    MessagePayload, MessageRef,
};
use crate::models::MessageId;

/// A message held by [`InMemoryMailbox`]
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub id: String,
    pub labels: Vec<String>,
    pub subject: Option<String>,
    pub date: Option<String>,
    pub body: Option<Vec<u8>>,
    pub attachments: Vec<(String, Vec<u8>)>,
    deleted: bool,
}

impl StoredMessage {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            labels: Vec::new(),
            subject: None,
            date: None,
            body: None,
            attachments: Vec::new(),
            deleted: false,
        }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.labels.push(label.into());
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn date(mut self, date: impl Into<String>) -> Self {
        self.date = Some(date.into());
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn attachment(mut self, filename: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        self.attachments.push((filename.into(), data.into()));
        self
    }

    fn attachment_id(&self, index: usize) -> String {
        format!("{}-att-{}", self.id, index)
    }

    fn matches(&self, query: &Query) -> bool {
        if self.deleted {
            return false;
        }
        if let Some(label) = &query.label
            && !self.labels.iter().any(|l| l.eq_ignore_ascii_case(label))
        {
            return false;
        }
        match &query.subject {
            Some(wanted) => self
                .subject
                .as_deref()
                .is_some_and(|s| s.to_lowercase().contains(&wanted.to_lowercase())),
            None => true,
        }
    }

    /// Render as the Gmail API would return it
    ///
    /// A message with attachments is multipart, so its text body lives in a
    /// part rather than on the payload.
    fn to_gmail(&self) -> GmailMessage {
        let mut headers = Vec::new();
        if let Some(subject) = &self.subject {
            headers.push(Header {
                name: "Subject".to_string(),
                value: subject.clone(),
            });
        }
        if let Some(date) = &self.date {
            headers.push(Header {
                name: "Date".to_string(),
                value: date.clone(),
            });
        }

        let encoded_body = self.body.as_ref().map(|b| BASE64_URL_SAFE.encode(b));

        let payload = if self.attachments.is_empty() {
            MessagePayload {
                headers: Some(headers),
                body: Some(MessageBody {
                    data: encoded_body,
                    ..Default::default()
                }),
                parts: None,
                mime_type: Some("text/plain".to_string()),
            }
        } else {
            let mut parts = Vec::new();
            if let Some(data) = encoded_body {
                parts.push(MessagePart {
                    mime_type: Some("text/plain".to_string()),
                    filename: Some(String::new()),
                    body: Some(MessageBody {
                        data: Some(data),
                        ..Default::default()
                    }),
                    ..Default::default()
                });
            }
            for (index, (filename, data)) in self.attachments.iter().enumerate() {
                parts.push(MessagePart {
                    mime_type: Some("application/octet-stream".to_string()),
                    filename: Some(filename.clone()),
                    body: Some(MessageBody {
                        attachment_id: Some(self.attachment_id(index)),
                        size: u32::try_from(data.len()).ok(),
                        data: None,
                    }),
                    ..Default::default()
                });
            }
            MessagePayload {
                headers: Some(headers),
                body: Some(MessageBody::default()),
                parts: Some(parts),
                mime_type: Some("multipart/mixed".to_string()),
            }
        };

        GmailMessage {
            id: self.id.clone(),
            thread_id: self.id.clone(),
            label_ids: Some(self.labels.clone()),
            payload: Some(payload),
        }
    }
}

/// Parsed form of the `label:X subject:Y` queries the engine builds
#[derive(Debug, Default)]
struct Query {
    label: Option<String>,
    subject: Option<String>,
}

impl Query {
    fn parse(query: &str) -> Self {
        let mut parsed = Query::default();
        let (head, subject) = match query.find("subject:") {
            Some(pos) => (&query[..pos], Some(query[pos + "subject:".len()..].trim())),
            None => (query, None),
        };
        parsed.subject = subject.filter(|s| !s.is_empty()).map(str::to_string);
        parsed.label = head
            .split_whitespace()
            .find_map(|term| term.strip_prefix("label:"))
            .map(str::to_string);
        parsed
    }
}

#[derive(Debug, Default)]
struct Failures {
    listing_labels: HashSet<String>,
    messages: HashSet<String>,
    attachments: HashSet<String>,
    mutations: bool,
}

/// In-memory implementation of [`Mailbox`]
pub struct InMemoryMailbox {
    messages: Mutex<Vec<StoredMessage>>,
    page_size: usize,
    list_calls: Mutex<Vec<String>>,
    failures: Mutex<Failures>,
}

impl InMemoryMailbox {
    pub const DEFAULT_PAGE_SIZE: usize = 100;

    /// Create a new empty mailbox
    pub fn new() -> Self {
        Self::with_page_size(Self::DEFAULT_PAGE_SIZE)
    }

    /// Create a mailbox that returns at most `page_size` references per page
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            page_size: page_size.max(1),
            list_calls: Mutex::new(Vec::new()),
            failures: Mutex::new(Failures::default()),
        }
    }

    pub fn insert(&self, message: StoredMessage) {
        lock(&self.messages).push(message);
    }

    /// Make every listing for `label` fail
    pub fn fail_listing_for(&self, label: impl Into<String>) {
        lock(&self.failures).listing_labels.insert(label.into());
    }

    /// Make fetching message `id` fail
    pub fn fail_message(&self, id: impl Into<String>) {
        lock(&self.failures).messages.insert(id.into());
    }

    /// Make fetching any attachment named `filename` fail
    pub fn fail_attachment(&self, filename: impl Into<String>) {
        lock(&self.failures).attachments.insert(filename.into());
    }

    /// Make label changes and deletes fail
    pub fn fail_mutations(&self) {
        lock(&self.failures).mutations = true;
    }

    /// Queries passed to `list_messages`, one entry per page request
    pub fn list_calls(&self) -> Vec<String> {
        lock(&self.list_calls).clone()
    }

    pub fn contains(&self, id: &str) -> bool {
        lock(&self.messages)
            .iter()
            .any(|m| m.id == id && !m.deleted)
    }

    pub fn labels_of(&self, id: &str) -> Vec<String> {
        lock(&self.messages)
            .iter()
            .find(|m| m.id == id)
            .map(|m| m.labels.clone())
            .unwrap_or_default()
    }

    fn find<T>(&self, id: &str, f: impl FnOnce(&mut StoredMessage) -> T) -> Result<T> {
        let mut messages = lock(&self.messages);
        let message = messages
            .iter_mut()
            .find(|m| m.id == id && !m.deleted)
            .ok_or_else(|| anyhow!("Message not found: {}", id))?;
        Ok(f(message))
    }
}

impl Default for InMemoryMailbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Mailbox for InMemoryMailbox {
    fn list_messages(&self, query: &str, page_token: Option<&str>) -> Result<ListMessagesResponse> {
        lock(&self.list_calls).push(query.to_string());
        let parsed = Query::parse(query);

        if let Some(label) = &parsed.label
            && lock(&self.failures).listing_labels.contains(label)
        {
            bail!("Listing failed for label {}", label);
        }

        // Page tokens are store positions, so deleting already-returned
        // messages does not shift later pages
        let start = match page_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| anyhow!("Invalid page token: {}", token))?,
            None => 0,
        };

        let messages = lock(&self.messages);
        let mut refs = Vec::new();
        let mut next_page_token = None;
        for (position, message) in messages.iter().enumerate().skip(start) {
            if !message.matches(&parsed) {
                continue;
            }
            if refs.len() == self.page_size {
                next_page_token = Some(position.to_string());
                break;
            }
            refs.push(MessageRef {
                id: message.id.clone(),
                thread_id: message.id.clone(),
            });
        }

        Ok(ListMessagesResponse {
            result_size_estimate: u32::try_from(refs.len()).ok(),
            messages: if refs.is_empty() { None } else { Some(refs) },
            next_page_token,
        })
    }

    fn get_message(&self, id: &MessageId) -> Result<GmailMessage> {
        if lock(&self.failures).messages.contains(id.as_str()) {
            bail!("Failed to fetch message {}", id);
        }
        self.find(id.as_str(), |m| m.to_gmail())
    }

    fn get_attachment(
        &self,
        message_id: &MessageId,
        attachment_id: &str,
    ) -> Result<AttachmentBody> {
        let (filename, data) = self.find(message_id.as_str(), |m| {
            (0..m.attachments.len())
                .find(|&i| m.attachment_id(i) == attachment_id)
                .map(|i| m.attachments[i].clone())
        })?
        .ok_or_else(|| anyhow!("Attachment not found: {}", attachment_id))?;

        if lock(&self.failures).attachments.contains(&filename) {
            bail!("Failed to fetch attachment {}", filename);
        }

        Ok(AttachmentBody {
            size: u32::try_from(data.len()).ok(),
            data: BASE64_URL_SAFE.encode(data),
        })
    }

    fn modify_labels(&self, id: &MessageId, add: &[&str], remove: &[&str]) -> Result<()> {
        if lock(&self.failures).mutations {
            bail!("Failed to modify message {}", id);
        }
        self.find(id.as_str(), |m| {
            m.labels.retain(|l| !remove.contains(&l.as_str()));
            for label in add {
                if !m.labels.iter().any(|l| l == label) {
                    m.labels.push(label.to_string());
                }
            }
        })
    }

    fn delete_message(&self, id: &MessageId) -> Result<()> {
        if lock(&self.failures).mutations {
            bail!("Failed to delete message {}", id);
        }
        self.find(id.as_str(), |m| m.deleted = true)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_mailbox(page_size: usize) -> InMemoryMailbox {
        let mailbox = InMemoryMailbox::with_page_size(page_size);
        for i in 0..5 {
            mailbox.insert(
                StoredMessage::new(format!("m{}", i))
                    .label("Bills")
                    .subject(format!("Invoice {}", i)),
            );
        }
        mailbox.insert(StoredMessage::new("other").label("Bills").subject("Newsletter"));
        mailbox
    }

    #[test]
    fn test_query_parse() {
        let q = Query::parse("label:Bills subject:Monthly Invoice");
        assert_eq!(q.label.as_deref(), Some("Bills"));
        assert_eq!(q.subject.as_deref(), Some("Monthly Invoice"));

        let q = Query::parse("label:Bills");
        assert_eq!(q.subject, None);
    }

    #[test]
    fn test_pagination() {
        let mailbox = sample_mailbox(2);
        let mut seen = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = mailbox
                .list_messages("label:Bills subject:Invoice", token.as_deref())
                .unwrap();
            seen.extend(page.messages.unwrap_or_default().into_iter().map(|m| m.id));
            match page.next_page_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        assert_eq!(seen, vec!["m0", "m1", "m2", "m3", "m4"]);
        assert_eq!(mailbox.list_calls().len(), 3);
    }

    #[test]
    fn test_delete_hides_message() {
        let mailbox = sample_mailbox(10);
        mailbox.delete_message(&MessageId::new("m1")).unwrap();
        assert!(!mailbox.contains("m1"));
        assert!(mailbox.get_message(&MessageId::new("m1")).is_err());
    }

    #[test]
    fn test_modify_labels() {
        let mailbox = InMemoryMailbox::new();
        mailbox.insert(StoredMessage::new("m").label("INBOX").label("UNREAD"));
        mailbox
            .modify_labels(&MessageId::new("m"), &[], &["UNREAD"])
            .unwrap();
        assert_eq!(mailbox.labels_of("m"), vec!["INBOX"]);
    }

    #[test]
    fn test_multipart_has_no_inline_body() {
        let message = StoredMessage::new("m")
            .body("hello")
            .attachment("a.pdf", b"%PDF".to_vec())
            .to_gmail();
        let payload = message.payload.unwrap();
        assert!(payload.body.unwrap().data.is_none());
        assert_eq!(payload.parts.unwrap().len(), 2);
    }
}
