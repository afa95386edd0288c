//! Mail crate - Rule-driven Gmail automation
//!
//! This crate provides:
//! - Gmail OAuth authorization with a loopback callback listener
//! - A Gmail REST client behind the [`Mailbox`] trait
//! - The rule model and the engine that applies it
//! - Output adapters for attachments and PDFs
//!
//! Everything is synchronous; the binary drives a single run from `main`.

pub mod config;
pub mod gmail;
pub mod mailbox;
pub mod models;
pub mod output;
pub mod rules;

pub use self::config::{GmailCredentials, Settings};
pub use gmail::{
    AuthBroker, AuthError, Credential, GmailAuth, GmailClient, SystemBrowser, TokenCache,
};
pub use mailbox::{InMemoryMailbox, Mailbox, StoredMessage};
pub use models::{AttachmentPart, HeaderMap, MessageDetail, MessageId};
pub use output::{AttachmentSink, LopdfDecryptor, LopdfRenderer, PdfDecryptor, PdfRenderer};
pub use rules::{
    Action, CanonicalDate, LabelAction, RuleEngine, RuleError, RuleSet, RunStats,
    format_filename, normalize_date,
};
