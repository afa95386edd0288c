//! Attachment file writer

use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};

/// Writes attachment bytes into a single directory
///
/// Only the final component of a filename is used, so a sender-supplied
/// name cannot place a file outside the directory.
#[derive(Debug, Clone)]
pub struct AttachmentSink {
    dir: PathBuf,
}

impl AttachmentSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path a file called `filename` would be written to
    pub fn target(&self, filename: &str) -> Result<PathBuf> {
        let Some(name) = Path::new(filename).file_name() else {
            bail!("Attachment filename {:?} has no usable name", filename);
        };
        Ok(self.dir.join(name))
    }

    /// Store `data` under `filename`, replacing any existing file
    pub fn write(&self, filename: &str, data: &[u8]) -> Result<PathBuf> {
        let path = self.target(filename)?;
        std::fs::write(&path, data)
            .with_context(|| format!("Failed to save attachment: {}", path.display()))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write() {
        let dir = TempDir::new().unwrap();
        let sink = AttachmentSink::new(dir.path());

        let path = sink.write("invoice.pdf", b"%PDF-1.4").unwrap();
        assert_eq!(path, dir.path().join("invoice.pdf"));
        assert_eq!(std::fs::read(&path).unwrap(), b"%PDF-1.4");

        sink.write("invoice.pdf", b"second").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");
    }

    #[test]
    fn test_strips_directories() {
        let dir = TempDir::new().unwrap();
        let sink = AttachmentSink::new(dir.path());

        assert_eq!(
            sink.target("../../etc/passwd").unwrap(),
            dir.path().join("passwd")
        );
        assert_eq!(sink.target("/tmp/a.txt").unwrap(), dir.path().join("a.txt"));
    }

    #[test]
    fn test_rejects_empty_names() {
        let sink = AttachmentSink::new("/tmp");
        assert!(sink.target("").is_err());
        assert!(sink.target("..").is_err());
        assert!(sink.target("/").is_err());
    }

    #[test]
    fn test_missing_directory() {
        let dir = TempDir::new().unwrap();
        let sink = AttachmentSink::new(dir.path().join("missing"));
        assert!(sink.write("a.txt", b"data").is_err());
    }
}
