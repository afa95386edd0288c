//! Mailbox trait definition

use anyhow::Result;

use crate::gmail::api::{AttachmentBody, GmailMessage, ListMessagesResponse};
use crate::models::MessageId;

/// Label IDs used by Gmail for common states
pub mod labels {
    pub const UNREAD: &str = "UNREAD";
}

/// Operations the rule engine needs from a remote mail store
///
/// Query syntax is the store's own (Gmail search operators such as
/// `label:` and `subject:`).
pub trait Mailbox {
    /// List one page of message references matching `query`
    fn list_messages(&self, query: &str, page_token: Option<&str>) -> Result<ListMessagesResponse>;

    /// Fetch a full message
    fn get_message(&self, id: &MessageId) -> Result<GmailMessage>;

    /// Fetch the encoded bytes of one attachment
    fn get_attachment(&self, message_id: &MessageId, attachment_id: &str) -> Result<AttachmentBody>;

    /// Add and remove labels on a message
    fn modify_labels(&self, id: &MessageId, add: &[&str], remove: &[&str]) -> Result<()>;

    /// Permanently delete a message
    fn delete_message(&self, id: &MessageId) -> Result<()>;
}
