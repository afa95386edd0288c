//! Declarative mailbox rules
//!
//! A [`RuleSet`] is an ordered list of [`LabelAction`]s read from a JSON file.
//! Each action selects messages by label and subject and says what to do with
//! them; [`RuleEngine`] carries the actions out.

mod date;
mod engine;
mod filename;

pub use date::{CANONICAL_FORMAT, CanonicalDate, UNKNOWN, normalize_date};
pub use engine::{RuleEngine, RuleError, RunStats, build_query};
pub use filename::format_filename;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// What to do with messages matching one label and subject filter
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Action {
    pub subject_filter: String,
    pub download_attachment: bool,
    pub mark_as_read: bool,
    pub delete_email: bool,
    pub save_to: PathBuf,
    pub pdf_password: Option<String>,
    pub filename_pattern: Option<String>,
    pub save_as_pdf: bool,
}

impl Action {
    /// Password for downloaded PDFs, if one is configured
    pub fn pdf_password(&self) -> Option<&str> {
        self.pdf_password.as_deref().filter(|p| !p.is_empty())
    }

    /// Template for downloaded attachment names, if one is configured
    pub fn filename_pattern(&self) -> Option<&str> {
        self.filename_pattern.as_deref().filter(|p| !p.is_empty())
    }

    /// Whether this action writes anything to `save_to`
    pub fn writes_files(&self) -> bool {
        self.download_attachment || self.save_as_pdf
    }

    /// The output directory, which must be set and must exist
    pub fn save_dir(&self) -> Result<&Path, RuleError> {
        if self.save_to.as_os_str().is_empty() {
            return Err(RuleError::EmptySaveDir {
                subject_filter: self.subject_filter.clone(),
            });
        }
        if !self.save_to.is_dir() {
            return Err(RuleError::MissingSaveDir {
                dir: self.save_to.clone(),
            });
        }
        Ok(&self.save_to)
    }
}

/// Actions for one Gmail label, run in declared order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelAction {
    pub label: String,
    #[serde(default)]
    pub actions: Vec<Action>,
}

/// The complete rule file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub label_actions: Vec<LabelAction>,
}

impl RuleSet {
    /// Load rules from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        config::load_json_file(path)
            .with_context(|| format!("Unable to read config file: {}", path.display()))
    }

    /// Check every action that writes files has a usable `save_to`
    ///
    /// Run before touching the mailbox so a bad directory fails the run
    /// before any message is changed.
    pub fn validate(&self) -> Result<(), RuleError> {
        for label_action in &self.label_actions {
            for action in label_action.actions.iter().filter(|a| a.writes_files()) {
                action.save_dir()?;
            }
        }
        Ok(())
    }

    pub fn action_count(&self) -> usize {
        self.label_actions.iter().map(|la| la.actions.len()).sum()
    }
}
