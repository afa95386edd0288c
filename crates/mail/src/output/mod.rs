//! Where rule results end up on disk
//!
//! - [`AttachmentSink`] stores attachment bytes in an action's directory
//! - [`PdfRenderer`] turns an email into a PDF document
//! - [`PdfDecryptor`] strips the password from a saved PDF

mod pdf;
mod sink;

pub use pdf::{EmailDocument, LopdfDecryptor, LopdfRenderer, PdfDecryptor, PdfRenderer};
pub use sink::AttachmentSink;
