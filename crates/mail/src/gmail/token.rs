//! Cached OAuth credential
//!
//! The cache file is the single source of truth across runs. It is written
//! with owner-only permissions and replaced atomically on every save.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// OAuth access/refresh token pair granting mailbox access
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
}

impl Credential {
    /// Tokens are treated as expired this long before their actual expiry
    const EXPIRY_DELTA_SECS: i64 = 10;

    /// Whether the access token should be refreshed before use
    ///
    /// A credential without an expiry never expires.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expiry {
            Some(expiry) => expiry - Duration::seconds(Self::EXPIRY_DELTA_SECS) <= now,
            None => false,
        }
    }

    /// Value for the HTTP Authorization header
    pub fn authorization_header(&self) -> String {
        let token_type = if self.token_type.is_empty() {
            "Bearer"
        } else {
            self.token_type.as_str()
        };
        format!("{} {}", token_type, self.access_token)
    }
}

/// Reads and writes the credential cache file
#[derive(Debug, Clone)]
pub struct TokenCache {
    path: PathBuf,
}

impl TokenCache {
    /// Cache filename inside the mailrules config directory
    pub const DEFAULT_FILENAME: &'static str = "token.json";

    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Default cache location (~/.config/mailrules/token.json)
    pub fn default_path() -> Option<PathBuf> {
        config::config_path(Self::DEFAULT_FILENAME)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the cached credential
    pub fn load(&self) -> Result<Credential> {
        config::load_json_file(&self.path)
            .with_context(|| format!("Failed to load cached token: {}", self.path.display()))
    }

    /// Save a credential, replacing any previous value
    pub fn save(&self, credential: &Credential) -> Result<()> {
        log::info!("Saving credential file to: {}", self.path.display());
        config::save_json_atomic(&self.path, credential).context("Unable to cache oauth token")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_credential(access: &str) -> Credential {
        Credential {
            access_token: access.to_string(),
            token_type: "Bearer".to_string(),
            refresh_token: "test-refresh-token".to_string(),
            expiry: Some(Utc::now() + Duration::hours(1)),
        }
    }

    #[test]
    fn test_round_trip() {
        let dir = TempDir::new().unwrap();
        let cache = TokenCache::new(dir.path().join("token.json"));
        let credential = make_credential("test-access-token");

        cache.save(&credential).unwrap();
        let loaded = cache.load().unwrap();
        assert_eq!(loaded, credential);
    }

    #[test]
    fn test_overwrite_existing() {
        let dir = TempDir::new().unwrap();
        let cache = TokenCache::new(dir.path().join("token.json"));

        cache.save(&make_credential("old-token")).unwrap();
        cache.save(&make_credential("new-token")).unwrap();

        assert_eq!(cache.load().unwrap().access_token, "new-token");
    }

    #[test]
    fn test_load_missing() {
        let dir = TempDir::new().unwrap();
        let cache = TokenCache::new(dir.path().join("missing.json"));
        assert!(cache.load().is_err());
    }

    #[test]
    fn test_load_invalid_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("invalid.json");
        std::fs::write(&path, "invalid json").unwrap();
        assert!(TokenCache::new(path).load().is_err());
    }

    #[test]
    fn test_reads_go_style_token_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("token.json");
        std::fs::write(
            &path,
            r#"{"access_token":"ya29.abc","token_type":"Bearer","refresh_token":"1//xyz","expiry":"2024-03-27T15:05:14.123456789+01:00"}"#,
        )
        .unwrap();

        let credential = TokenCache::new(path).load().unwrap();
        assert_eq!(credential.access_token, "ya29.abc");
        assert_eq!(credential.refresh_token, "1//xyz");
        assert_eq!(
            credential.expiry.unwrap().to_rfc3339(),
            "2024-03-27T14:05:14.123456789+00:00"
        );
    }

    #[test]
    fn test_is_expired() {
        let now = Utc::now();
        let mut credential = make_credential("a");

        credential.expiry = None;
        assert!(!credential.is_expired(now));

        credential.expiry = Some(now + Duration::minutes(5));
        assert!(!credential.is_expired(now));

        credential.expiry = Some(now + Duration::seconds(5));
        assert!(credential.is_expired(now));

        credential.expiry = Some(now - Duration::hours(1));
        assert!(credential.is_expired(now));
    }

    #[test]
    fn test_authorization_header() {
        let mut credential = make_credential("abc");
        assert_eq!(credential.authorization_header(), "Bearer abc");
        credential.token_type.clear();
        assert_eq!(credential.authorization_header(), "Bearer abc");
    }
}
