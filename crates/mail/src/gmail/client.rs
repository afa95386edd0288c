//! Gmail API HTTP client
//!
//! Implements [`Mailbox`] over the Gmail REST API.
//! Uses synchronous HTTP (ureq) to be executor-agnostic.

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use log::{info, warn};
use std::sync::Mutex;

use super::api::{
    AttachmentBody, GmailMessage, ListMessagesResponse, ModifyMessageRequest,
};
use super::{Credential, GmailAuth};
use crate::mailbox::Mailbox;
use crate::models::MessageId;

/// Gmail API client bound to one mailbox
pub struct GmailClient {
    auth: GmailAuth,
    credential: Mutex<Credential>,
    user_id: String,
}

impl GmailClient {
    /// Gmail API base URL
    const BASE_URL: &'static str = "https://gmail.googleapis.com/gmail/v1";

    /// Create a new Gmail client
    ///
    /// # Arguments
    /// * `auth` - Used to refresh `credential` once it expires
    /// * `credential` - Credential obtained from [`GmailAuth::authorize`]
    /// * `user_id` - Mailbox to operate on ("me" for the authenticated user)
    pub fn new(auth: GmailAuth, credential: Credential, user_id: impl Into<String>) -> Self {
        Self {
            auth,
            credential: Mutex::new(credential),
            user_id: user_id.into(),
        }
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/users/{}/messages",
            Self::BASE_URL,
            urlencoding::encode(&self.user_id)
        )
    }

    /// Authorization header value, refreshing the token first when needed
    fn authorization(&self) -> Result<String> {
        let mut credential = self
            .credential
            .lock()
            .map_err(|_| anyhow!("Credential lock poisoned"))?;

        if credential.is_expired(Utc::now()) && !credential.refresh_token.is_empty() {
            info!("Access token expired, refreshing");
            let refreshed = self.auth.refresh(&credential)?;
            if let Err(e) = self.auth.cache().save(&refreshed) {
                warn!("Failed to cache refreshed token: {:#}", e);
            }
            *credential = refreshed;
        }

        Ok(credential.authorization_header())
    }
}

impl Mailbox for GmailClient {
    fn list_messages(&self, query: &str, page_token: Option<&str>) -> Result<ListMessagesResponse> {
        let authorization = self.authorization()?;

        let mut url = format!("{}?q={}", self.messages_url(), urlencoding::encode(query));
        if let Some(token) = page_token {
            url.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
        }

        let mut response = ureq::get(&url)
            .header("Authorization", &authorization)
            .call()
            .context("Failed to send list messages request")?;

        let list: ListMessagesResponse = response
            .body_mut()
            .read_json()
            .context("Failed to parse list messages response")?;

        Ok(list)
    }

    fn get_message(&self, id: &MessageId) -> Result<GmailMessage> {
        let authorization = self.authorization()?;

        let url = format!("{}/{}?format=full", self.messages_url(), id.as_str());

        let mut response = ureq::get(&url)
            .header("Authorization", &authorization)
            .call()
            .with_context(|| format!("Failed to send get message request for {}", id))?;

        let message: GmailMessage = response
            .body_mut()
            .read_json()
            .context("Failed to parse message response")?;

        Ok(message)
    }

    fn get_attachment(
        &self,
        message_id: &MessageId,
        attachment_id: &str,
    ) -> Result<AttachmentBody> {
        let authorization = self.authorization()?;

        let url = format!(
            "{}/{}/attachments/{}",
            self.messages_url(),
            message_id.as_str(),
            attachment_id
        );

        let mut response = ureq::get(&url)
            .header("Authorization", &authorization)
            .call()
            .with_context(|| format!("Failed to fetch attachment for message {}", message_id))?;

        let body: AttachmentBody = response
            .body_mut()
            .read_json()
            .context("Failed to parse attachment response")?;

        Ok(body)
    }

    fn modify_labels(&self, id: &MessageId, add: &[&str], remove: &[&str]) -> Result<()> {
        let authorization = self.authorization()?;

        let url = format!("{}/{}/modify", self.messages_url(), id.as_str());
        let request = ModifyMessageRequest {
            add_label_ids: add.iter().map(|s| s.to_string()).collect(),
            remove_label_ids: remove.iter().map(|s| s.to_string()).collect(),
        };

        ureq::post(&url)
            .header("Authorization", &authorization)
            .send_json(&request)
            .with_context(|| format!("Failed to modify message {}", id))?;

        Ok(())
    }

    fn delete_message(&self, id: &MessageId) -> Result<()> {
        let authorization = self.authorization()?;

        let url = format!("{}/{}", self.messages_url(), id.as_str());

        ureq::delete(&url)
            .header("Authorization", &authorization)
            .call()
            .with_context(|| format!("Failed to delete message {}", id))?;

        Ok(())
    }
}
