//! Rule execution
//!
//! Runs every action of a [`RuleSet`] against a [`Mailbox`], one message at a
//! time. For each matching message the steps run in a fixed order: download
//! attachments (decrypting PDFs as they land), export the body as PDF, mark
//! read, delete.
//!
//! Failures are contained to the smallest unit they affect. A listing error
//! ends the current action, a fetch error skips the message, a bad attachment
//! skips that attachment, and failed label changes or deletes are only
//! logged. Configuration problems and decryption failures abort the run.

use log::{debug, error, info, warn};
use std::fmt;
use std::path::PathBuf;

use super::{Action, CanonicalDate, RuleSet, format_filename};
use crate::gmail::{decode_base64, decode_base64_text, normalize_message};
use crate::mailbox::{Mailbox, labels};
use crate::models::{AttachmentPart, MessageDetail, MessageId};
use crate::output::{AttachmentSink, EmailDocument, PdfDecryptor, PdfRenderer};

/// Conditions that stop a run
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("save_to directory is empty for action with subject filter {subject_filter:?}")]
    EmptySaveDir { subject_filter: String },

    #[error("save_to directory does not exist: {}", .dir.display())]
    MissingSaveDir { dir: PathBuf },

    #[error("Failed to decrypt PDF file {}: {source:#}", .path.display())]
    Decrypt {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
}

/// Counters for one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub messages_processed: usize,
    pub messages_failed: usize,
    pub attachments_saved: usize,
    pub attachments_failed: usize,
    pub pdfs_decrypted: usize,
    pub pdfs_exported: usize,
    pub marked_read: usize,
    pub deleted: usize,
    pub listing_errors: usize,
    pub mutation_errors: usize,
}

impl fmt::Display for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} messages ({} failed), {} attachments saved ({} failed), {} PDFs decrypted, \
             {} exported, {} marked read, {} deleted, {} listing errors, {} mutation errors",
            self.messages_processed,
            self.messages_failed,
            self.attachments_saved,
            self.attachments_failed,
            self.pdfs_decrypted,
            self.pdfs_exported,
            self.marked_read,
            self.deleted,
            self.listing_errors,
            self.mutation_errors,
        )
    }
}

/// Search query for one action
///
/// An empty subject filter selects every message under the label.
pub fn build_query(label: &str, subject_filter: &str) -> String {
    if subject_filter.is_empty() {
        format!("label:{}", label)
    } else {
        format!("label:{} subject:{}", label, subject_filter)
    }
}

/// Applies rules to a mailbox
pub struct RuleEngine<'a> {
    mailbox: &'a dyn Mailbox,
    renderer: &'a dyn PdfRenderer,
    decryptor: &'a dyn PdfDecryptor,
}

impl<'a> RuleEngine<'a> {
    pub fn new(
        mailbox: &'a dyn Mailbox,
        renderer: &'a dyn PdfRenderer,
        decryptor: &'a dyn PdfDecryptor,
    ) -> Self {
        Self {
            mailbox,
            renderer,
            decryptor,
        }
    }

    /// Run every action of every label in order
    pub fn run(&self, rules: &RuleSet) -> Result<RunStats, RuleError> {
        let mut stats = RunStats::default();
        for label_action in &rules.label_actions {
            info!("Processing label: {}", label_action.label);
            for action in &label_action.actions {
                self.run_action(&label_action.label, action, &mut stats)?;
            }
        }
        Ok(stats)
    }

    fn run_action(
        &self,
        label: &str,
        action: &Action,
        stats: &mut RunStats,
    ) -> Result<(), RuleError> {
        let query = build_query(label, &action.subject_filter);
        debug!("Searching with query: {}", query);

        let mut page_token: Option<String> = None;
        loop {
            let page = match self.mailbox.list_messages(&query, page_token.as_deref()) {
                Ok(page) => page,
                Err(e) => {
                    error!("Unable to list messages for label {}: {:#}", label, e);
                    stats.listing_errors += 1;
                    break;
                }
            };

            for message_ref in page.messages.unwrap_or_default() {
                self.process_message(&MessageId::new(message_ref.id), action, stats)?;
            }

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        Ok(())
    }

    fn process_message(
        &self,
        id: &MessageId,
        action: &Action,
        stats: &mut RunStats,
    ) -> Result<(), RuleError> {
        let detail = match self.mailbox.get_message(id).and_then(normalize_message) {
            Ok(detail) => detail,
            Err(e) => {
                error!("Unable to retrieve message {}: {:#}", id, e);
                stats.messages_failed += 1;
                return Ok(());
            }
        };
        stats.messages_processed += 1;

        let date = CanonicalDate::from_header(detail.date_header());

        if action.download_attachment {
            self.download_attachments(&detail, action, date, stats)?;
        }
        if action.save_as_pdf {
            self.export_pdf(&detail, action, date, stats)?;
        }
        if action.mark_as_read {
            match self.mailbox.modify_labels(&detail.id, &[], &[labels::UNREAD]) {
                Ok(()) => stats.marked_read += 1,
                Err(e) => {
                    error!("Failed to mark email {} as read: {:#}", detail.id, e);
                    stats.mutation_errors += 1;
                }
            }
        }
        if action.delete_email {
            info!("Deleting email with ID: {}", detail.id);
            match self.mailbox.delete_message(&detail.id) {
                Ok(()) => stats.deleted += 1,
                Err(e) => {
                    error!("Failed to delete email {}: {:#}", detail.id, e);
                    stats.mutation_errors += 1;
                }
            }
        }
        Ok(())
    }

    fn download_attachments(
        &self,
        detail: &MessageDetail,
        action: &Action,
        date: CanonicalDate,
        stats: &mut RunStats,
    ) -> Result<(), RuleError> {
        for part in &detail.attachments {
            // Checked per part so a directory removed mid-run still stops us
            let sink = AttachmentSink::new(action.save_dir()?);

            let Some(path) = self.save_attachment(&sink, detail, part, action, date) else {
                stats.attachments_failed += 1;
                continue;
            };
            stats.attachments_saved += 1;

            if let Some(password) = action.pdf_password()
                && is_pdf(&path)
            {
                self.decryptor
                    .decrypt(&path, password)
                    .map_err(|source| RuleError::Decrypt {
                        path: path.clone(),
                        source,
                    })?;
                info!("Successfully decrypted PDF: {}", path.display());
                stats.pdfs_decrypted += 1;
            }
        }
        Ok(())
    }

    /// Fetch, decode and store one attachment; failures are logged here
    fn save_attachment(
        &self,
        sink: &AttachmentSink,
        detail: &MessageDetail,
        part: &AttachmentPart,
        action: &Action,
        date: CanonicalDate,
    ) -> Option<PathBuf> {
        let body = match self.mailbox.get_attachment(&detail.id, &part.attachment_id) {
            Ok(body) => body,
            Err(e) => {
                error!("Unable to retrieve attachment {}: {:#}", part.filename, e);
                return None;
            }
        };

        let data = match decode_base64(&body.data) {
            Ok(data) => data,
            Err(e) => {
                error!("Failed to decode attachment {}: {:#}", part.filename, e);
                return None;
            }
        };

        let filename = match action.filename_pattern() {
            Some(pattern) => format_filename(pattern, &part.filename, &date.to_string()),
            None => part.filename.clone(),
        };

        match sink.write(&filename, &data) {
            Ok(path) => {
                info!("Saved attachment: {}", path.display());
                Some(path)
            }
            Err(e) => {
                error!("{:#}", e);
                None
            }
        }
    }

    fn export_pdf(
        &self,
        detail: &MessageDetail,
        action: &Action,
        date: CanonicalDate,
        stats: &mut RunStats,
    ) -> Result<(), RuleError> {
        let Some(encoded) = detail.inline_body.as_deref() else {
            debug!("Message {} has no inline body, skipping PDF export", detail.id);
            return Ok(());
        };
        let dir = action.save_dir()?;

        let body = decode_base64_text(encoded).unwrap_or_else(|e| {
            warn!("Failed to decode body of message {}: {:#}", detail.id, e);
            String::new()
        });
        let date = date.to_string();
        let document = EmailDocument {
            id: detail.id.as_str(),
            date: &date,
            subject: detail.subject(),
            body: &body,
        };

        let path = dir.join(format!("email_{}_{}.pdf", date, detail.id));
        let written = self
            .renderer
            .render(&document)
            .and_then(|bytes| std::fs::write(&path, bytes).map_err(anyhow::Error::from));
        match written {
            Ok(()) => {
                info!("Saved email as PDF: {}", path.display());
                stats.pdfs_exported += 1;
            }
            Err(e) => error!("Failed to save email as PDF {}: {:#}", path.display(), e),
        }
        Ok(())
    }
}

fn is_pdf(path: &std::path::Path) -> bool {
    path.to_string_lossy().ends_with(".pdf")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gmail::api::{AttachmentBody, GmailMessage, ListMessagesResponse, MessageRef};
    use crate::rules::LabelAction;
    use anyhow::{Result, bail};
    use std::cell::RefCell;
    use std::path::Path;

    /// Mailbox returning scripted pages and recording each call
    struct ScriptedMailbox {
        pages: Vec<(Vec<&'static str>, Option<&'static str>)>,
        calls: RefCell<Vec<Option<String>>>,
    }

    impl Mailbox for ScriptedMailbox {
        fn list_messages(
            &self,
            _query: &str,
            page_token: Option<&str>,
        ) -> Result<ListMessagesResponse> {
            let index = self.calls.borrow().len();
            self.calls.borrow_mut().push(page_token.map(str::to_string));
            let Some((ids, next)) = self.pages.get(index) else {
                bail!("no more pages");
            };
            Ok(ListMessagesResponse {
                messages: Some(
                    ids.iter()
                        .map(|id| MessageRef {
                            id: id.to_string(),
                            thread_id: String::new(),
                        })
                        .collect(),
                ),
                next_page_token: next.map(str::to_string),
                result_size_estimate: None,
            })
        }

        fn get_message(&self, id: &MessageId) -> Result<GmailMessage> {
            bail!("not scripted: {}", id)
        }

        fn get_attachment(&self, _: &MessageId, _: &str) -> Result<AttachmentBody> {
            bail!("not scripted")
        }

        fn modify_labels(&self, _: &MessageId, _: &[&str], _: &[&str]) -> Result<()> {
            Ok(())
        }

        fn delete_message(&self, _: &MessageId) -> Result<()> {
            Ok(())
        }
    }

    struct NoPdf;

    impl PdfRenderer for NoPdf {
        fn render(&self, _: &EmailDocument<'_>) -> Result<Vec<u8>> {
            bail!("unused")
        }
    }

    impl PdfDecryptor for NoPdf {
        fn decrypt(&self, _: &Path, _: &str) -> Result<()> {
            bail!("unused")
        }
    }

    fn one_action(action: Action) -> RuleSet {
        RuleSet {
            label_actions: vec![LabelAction {
                label: "Bills".to_string(),
                actions: vec![action],
            }],
        }
    }

    #[test]
    fn test_build_query() {
        assert_eq!(build_query("Bills", "Invoice"), "label:Bills subject:Invoice");
        assert_eq!(build_query("Bills", ""), "label:Bills");
    }

    #[test]
    fn test_paginates_until_empty_token() {
        let mailbox = ScriptedMailbox {
            pages: vec![
                (vec!["m1"], Some("A")),
                (vec!["m2"], Some("B")),
                (vec!["m3"], Some("")),
                (vec!["m4"], None),
            ],
            calls: RefCell::new(Vec::new()),
        };
        let engine = RuleEngine::new(&mailbox, &NoPdf, &NoPdf);

        let stats = engine.run(&one_action(Action::default())).unwrap();

        assert_eq!(
            *mailbox.calls.borrow(),
            vec![None, Some("A".to_string()), Some("B".to_string())]
        );
        assert_eq!(stats.messages_failed, 3);
        assert_eq!(stats.listing_errors, 0);
    }

    #[test]
    fn test_listing_error_ends_action_only() {
        let mailbox = ScriptedMailbox {
            pages: vec![(vec![], Some("A"))],
            calls: RefCell::new(Vec::new()),
        };
        let engine = RuleEngine::new(&mailbox, &NoPdf, &NoPdf);
        let mut rules = one_action(Action::default());
        rules.label_actions[0].actions.push(Action::default());

        let stats = engine.run(&rules).unwrap();

        // Second page of the first action fails; the second action then
        // asks past the end of the script and fails on its first call
        assert_eq!(mailbox.calls.borrow().len(), 3);
        assert_eq!(stats.listing_errors, 2);
    }

    #[test]
    fn test_is_pdf() {
        assert!(is_pdf(Path::new("/tmp/statement.pdf")));
        assert!(!is_pdf(Path::new("/tmp/statement.PDF")));
        assert!(!is_pdf(Path::new("/tmp/pdf")));
    }

    #[test]
    fn test_run_stats_display() {
        let stats = RunStats {
            messages_processed: 2,
            deleted: 1,
            ..RunStats::default()
        };
        let text = stats.to_string();
        assert!(text.starts_with("2 messages (0 failed)"));
        assert!(text.contains("1 deleted"));
    }
}
