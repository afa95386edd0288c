//! Gmail OAuth2 authentication
//!
//! Implements OAuth2 authorization code flow for Gmail API authentication.
//! Uses a local HTTP listener ([`AuthBroker`]) to receive the OAuth callback.
//! Uses synchronous HTTP (ureq) to be executor-agnostic.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use log::info;
use serde::Deserialize;

use super::callback::{AuthBroker, BrowserLauncher, CallbackConfig};
use super::token::{Credential, TokenCache};
use crate::config::GmailCredentials;

/// OAuth2 configuration and credential acquisition for Gmail
pub struct GmailAuth {
    credentials: GmailCredentials,
    cache: TokenCache,
    callback: CallbackConfig,
}

/// Token response from Google
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<u64>,
    pub token_type: Option<String>,
}

impl TokenResponse {
    /// Convert to a credential, keeping `previous_refresh` when Google omits one
    pub fn into_credential(self, now: DateTime<Utc>, previous_refresh: Option<&str>) -> Credential {
        let refresh_token = self
            .refresh_token
            .filter(|t| !t.is_empty())
            .or_else(|| previous_refresh.map(str::to_string))
            .unwrap_or_default();

        Credential {
            access_token: self.access_token,
            token_type: self.token_type.unwrap_or_else(|| "Bearer".to_string()),
            refresh_token,
            expiry: self
                .expires_in
                .map(|secs| now + Duration::seconds(secs as i64)),
        }
    }
}

impl GmailAuth {
    /// Full mailbox scope; permanent deletion is not allowed with gmail.modify
    const GMAIL_SCOPE: &'static str = "https://mail.google.com/";

    /// Create a new GmailAuth instance
    ///
    /// # Arguments
    /// * `credentials` - OAuth2 client ID and secret from Google Cloud Console
    /// * `cache` - Where the credential is cached between runs
    pub fn new(credentials: GmailCredentials, cache: TokenCache) -> Self {
        Self {
            credentials,
            cache,
            callback: CallbackConfig::default(),
        }
    }

    /// Override the callback listener settings
    pub fn with_callback_config(mut self, callback: CallbackConfig) -> Self {
        self.callback = callback;
        self
    }

    pub fn cache(&self) -> &TokenCache {
        &self.cache
    }

    /// Return the cached credential, or run the authorization flow and cache its result
    ///
    /// No expiry check happens here; refreshing is the job of the client
    /// that uses the credential.
    pub fn authorize(&self, launcher: &dyn BrowserLauncher) -> Result<Credential> {
        match self.cache.load() {
            Ok(credential) => {
                info!("Using cached credential from {}", self.cache.path().display());
                return Ok(credential);
            }
            Err(e) => {
                info!("No usable cached credential ({:#}), starting authorization", e);
            }
        }

        let credential = self.authorization_code_auth(launcher)?;
        self.cache.save(&credential)?;
        Ok(credential)
    }

    /// Build the consent URL the operator opens in a browser
    pub fn authorization_url(&self, redirect_uri: &str, state: &str) -> String {
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent&state={}",
            self.credentials.auth_uri,
            urlencoding::encode(&self.credentials.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(Self::GMAIL_SCOPE),
            urlencoding::encode(state),
        )
    }

    /// Perform authorization code flow authentication
    fn authorization_code_auth(&self, launcher: &dyn BrowserLauncher) -> Result<Credential> {
        let state = generate_state();
        let mut broker = AuthBroker::bind(self.callback.clone())
            .context("Unable to start local server")?
            .with_expected_state(state.clone());
        let redirect_uri = broker.redirect_uri();
        let auth_url = self.authorization_url(&redirect_uri, &state);

        let code = broker.obtain_authorization_code(&auth_url, launcher)?;

        info!("Exchanging authorization code for tokens...");
        let credential = self.exchange_code(&code, &redirect_uri)?;
        info!("Authentication successful");
        Ok(credential)
    }

    /// Exchange an authorization code for a credential
    pub fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<Credential> {
        let mut response = ureq::post(&self.credentials.token_uri)
            .send_form([
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("code", code),
                ("grant_type", "authorization_code"),
                ("redirect_uri", redirect_uri),
            ])
            .context("Unable to retrieve token from web")?;

        let token: TokenResponse = response
            .body_mut()
            .read_json()
            .context("Failed to parse token response")?;

        Ok(token.into_credential(Utc::now(), None))
    }

    /// Refresh an access token using the credential's refresh token
    pub fn refresh(&self, credential: &Credential) -> Result<Credential> {
        if credential.refresh_token.is_empty() {
            anyhow::bail!("Credential has no refresh token");
        }

        let mut response = ureq::post(&self.credentials.token_uri)
            .send_form([
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("refresh_token", credential.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .context("Failed to refresh access token")?;

        let token: TokenResponse = response
            .body_mut()
            .read_json()
            .context("Failed to parse refresh token response")?;

        Ok(token.into_credential(Utc::now(), Some(&credential.refresh_token)))
    }
}

/// Generate an unguessable value for the OAuth `state` parameter
fn generate_state() -> String {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let high = RandomState::new().build_hasher().finish();
    let low = RandomState::new().build_hasher().finish();
    format!("{:016x}{:016x}", high, low)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_auth(dir: &TempDir) -> GmailAuth {
        let credentials = GmailCredentials::from_json(
            r#"{"installed": {"client_id": "client.apps.googleusercontent.com", "client_secret": "shh"}}"#,
        )
        .unwrap();
        GmailAuth::new(credentials, TokenCache::new(dir.path().join("token.json")))
    }

    #[test]
    fn test_authorization_url() {
        let dir = TempDir::new().unwrap();
        let auth = make_auth(&dir);
        let url = auth.authorization_url("http://localhost:9901/callback", "nonce");

        assert!(url.starts_with("https://accounts.google.com/o/oauth2/auth?"));
        assert!(url.contains("client_id=client.apps.googleusercontent.com"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A9901%2Fcallback"));
        assert!(url.contains("scope=https%3A%2F%2Fmail.google.com%2F"));
        assert!(url.contains("access_type=offline"));
        assert!(url.contains("state=nonce"));
    }

    #[test]
    fn test_authorize_uses_cache_without_listening() {
        let dir = TempDir::new().unwrap();
        let auth = make_auth(&dir);
        let cached = Credential {
            access_token: "cached".to_string(),
            token_type: "Bearer".to_string(),
            refresh_token: "refresh".to_string(),
            expiry: None,
        };
        auth.cache().save(&cached).unwrap();

        let launcher = |_: &str| -> std::io::Result<()> { panic!("browser must not open") };
        let credential = auth.authorize(&launcher).unwrap();
        assert_eq!(credential, cached);
    }

    #[test]
    fn test_token_response_keeps_previous_refresh() {
        let now = Utc::now();
        let response = TokenResponse {
            access_token: "new".to_string(),
            refresh_token: None,
            expires_in: Some(3600),
            token_type: Some("Bearer".to_string()),
        };

        let credential = response.into_credential(now, Some("old-refresh"));
        assert_eq!(credential.access_token, "new");
        assert_eq!(credential.refresh_token, "old-refresh");
        assert_eq!(credential.expiry, Some(now + Duration::seconds(3600)));
    }

    #[test]
    fn test_token_response_defaults() {
        let response: TokenResponse =
            serde_json::from_str(r#"{"access_token": "abc"}"#).unwrap();
        let credential = response.into_credential(Utc::now(), None);
        assert_eq!(credential.token_type, "Bearer");
        assert!(credential.refresh_token.is_empty());
        assert!(credential.expiry.is_none());
    }

    #[test]
    fn test_refresh_without_token_fails() {
        let dir = TempDir::new().unwrap();
        let auth = make_auth(&dir);
        let credential = Credential {
            access_token: "a".to_string(),
            token_type: "Bearer".to_string(),
            refresh_token: String::new(),
            expiry: None,
        };
        assert!(auth.refresh(&credential).is_err());
    }

    #[test]
    fn test_generate_state_unique() {
        let a = generate_state();
        let b = generate_state();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }
}
