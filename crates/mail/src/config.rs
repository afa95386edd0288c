//! Runtime configuration
//!
//! [`Settings`] is built once at startup from environment variables and
//! passed down explicitly; nothing below `main` reads the environment.
//! [`GmailCredentials`] parses the OAuth client file downloaded from the
//! Google Cloud Console.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::gmail::TokenCache;

/// Environment variable names
pub mod env {
    /// Path to the Google OAuth client secret file (required)
    pub const CREDENTIALS_JSON: &str = "CREDENTIALS_JSON";
    /// Path to the rule file (required)
    pub const CONFIG_FILE: &str = "CONFIG_FILE";
    /// Mailbox to operate on (optional, defaults to the authenticated user)
    pub const USER_ID: &str = "USER_ID";
    /// Credential cache path override (optional)
    pub const CLIENT_TOKEN_FILE: &str = "CLIENT_TOKEN_FILE";
}

/// Special Gmail user ID meaning "the authenticated user"
pub const DEFAULT_USER_ID: &str = "me";

/// Everything a run needs to know about its environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub credentials_path: PathBuf,
    pub rules_path: PathBuf,
    pub user_id: String,
    pub token_path: PathBuf,
}

impl Settings {
    /// Load settings from process environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let credentials_path = get(env::CREDENTIALS_JSON)
            .with_context(|| format!("Env variable {} not set", env::CREDENTIALS_JSON))?;
        let rules_path = get(env::CONFIG_FILE)
            .with_context(|| format!("Env variable {} not set", env::CONFIG_FILE))?;
        let user_id = get(env::USER_ID).unwrap_or_else(|| DEFAULT_USER_ID.to_string());
        let token_path = match get(env::CLIENT_TOKEN_FILE) {
            Some(path) => PathBuf::from(path),
            None => TokenCache::default_path().context("Could not determine config directory")?,
        };

        Ok(Self {
            credentials_path: PathBuf::from(credentials_path),
            rules_path: PathBuf::from(rules_path),
            user_id,
            token_path,
        })
    }
}

/// OAuth credentials for Gmail API access
#[derive(Debug, Clone)]
pub struct GmailCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub auth_uri: String,
    pub token_uri: String,
}

/// Google Cloud Console credential file format (installed app)
#[derive(Deserialize)]
struct GoogleCredentialFile {
    installed: Option<InstalledCredentials>,
    web: Option<InstalledCredentials>,
}

#[derive(Deserialize)]
struct InstalledCredentials {
    client_id: String,
    client_secret: String,
    #[serde(default = "default_auth_uri")]
    auth_uri: String,
    #[serde(default = "default_token_uri")]
    token_uri: String,
}

fn default_auth_uri() -> String {
    "https://accounts.google.com/o/oauth2/auth".to_string()
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

impl GmailCredentials {
    /// Load credentials from a specific JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let creds: GoogleCredentialFile = config::load_json_file(path)
            .context("unable to read client secret file")?;
        Self::from_credential_file(creds)
    }

    /// Parse credentials from a GoogleCredentialFile
    fn from_credential_file(creds: GoogleCredentialFile) -> Result<Self> {
        // Support both "installed" (desktop) and "web" credential types
        let installed = creds
            .installed
            .or(creds.web)
            .context("Credentials file missing 'installed' or 'web' section")?;

        Ok(Self {
            client_id: installed.client_id,
            client_secret: installed.client_secret,
            auth_uri: installed.auth_uri,
            token_uri: installed.token_uri,
        })
    }

    /// Parse credentials from JSON string (Google Cloud Console format)
    pub fn from_json(json: &str) -> Result<Self> {
        let creds: GoogleCredentialFile =
            serde_json::from_str(json).context("Failed to parse credentials JSON")?;
        Self::from_credential_file(creds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_parse_installed_credentials() {
        let json = r#"{
            "installed": {
                "client_id": "test-client-id.apps.googleusercontent.com",
                "client_secret": "test-secret",
                "auth_uri": "https://accounts.google.com/o/oauth2/auth",
                "token_uri": "https://oauth2.googleapis.com/token"
            }
        }"#;

        let creds = GmailCredentials::from_json(json).unwrap();
        assert_eq!(creds.client_id, "test-client-id.apps.googleusercontent.com");
        assert_eq!(creds.client_secret, "test-secret");
        assert_eq!(creds.token_uri, "https://oauth2.googleapis.com/token");
    }

    #[test]
    fn test_parse_web_credentials() {
        let json = r#"{
            "web": {
                "client_id": "web-client-id.apps.googleusercontent.com",
                "client_secret": "web-secret"
            }
        }"#;

        let creds = GmailCredentials::from_json(json).unwrap();
        assert_eq!(creds.client_id, "web-client-id.apps.googleusercontent.com");
        assert_eq!(creds.client_secret, "web-secret");
        assert_eq!(creds.auth_uri, "https://accounts.google.com/o/oauth2/auth");
    }

    #[test]
    fn test_invalid_json() {
        let json = r#"{ "other": {} }"#;
        assert!(GmailCredentials::from_json(json).is_err());
    }

    #[test]
    fn test_from_file_missing() {
        assert!(GmailCredentials::from_file(Path::new("does-not-exist.json")).is_err());
    }

    #[test]
    fn test_settings_from_lookup() {
        let settings = Settings::from_lookup(lookup(&[
            ("CREDENTIALS_JSON", "/etc/mailrules/credentials.json"),
            ("CONFIG_FILE", "/etc/mailrules/rules.json"),
            ("USER_ID", "owner@example.com"),
            ("CLIENT_TOKEN_FILE", "/var/lib/mailrules/token.json"),
        ]))
        .unwrap();

        assert_eq!(
            settings.credentials_path,
            PathBuf::from("/etc/mailrules/credentials.json")
        );
        assert_eq!(settings.rules_path, PathBuf::from("/etc/mailrules/rules.json"));
        assert_eq!(settings.user_id, "owner@example.com");
        assert_eq!(
            settings.token_path,
            PathBuf::from("/var/lib/mailrules/token.json")
        );
    }

    #[test]
    fn test_settings_defaults() {
        let settings = Settings::from_lookup(lookup(&[
            ("CREDENTIALS_JSON", "credentials.json"),
            ("CONFIG_FILE", "rules.json"),
        ]))
        .unwrap();

        assert_eq!(settings.user_id, DEFAULT_USER_ID);
        assert!(settings.token_path.ends_with("mailrules/token.json"));
    }

    #[test]
    fn test_settings_missing_required() {
        let err = Settings::from_lookup(lookup(&[("CONFIG_FILE", "rules.json")])).unwrap_err();
        assert!(err.to_string().contains("CREDENTIALS_JSON"));

        let err = Settings::from_lookup(lookup(&[
            ("CREDENTIALS_JSON", "credentials.json"),
            ("CONFIG_FILE", ""),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("CONFIG_FILE"));
    }
}
