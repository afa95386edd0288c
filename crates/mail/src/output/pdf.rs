//! PDF rendering and decryption
//!
//! Both sit behind traits so the rule engine can be tested without real
//! documents. The lopdf implementations are what the binary uses.

use anyhow::{Context, Result};
use log::debug;
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, ObjectId, Stream, dictionary};
use std::path::Path;

/// Email fields laid out on the rendered page
#[derive(Debug, Clone, Copy)]
pub struct EmailDocument<'a> {
    pub id: &'a str,
    pub date: &'a str,
    pub subject: &'a str,
    pub body: &'a str,
}

/// Renders an email as a PDF file
pub trait PdfRenderer {
    fn render(&self, document: &EmailDocument<'_>) -> Result<Vec<u8>>;
}

/// Removes password protection from a PDF file in place
pub trait PdfDecryptor {
    fn decrypt(&self, path: &Path, password: &str) -> Result<()>;
}

/// Plain text renderer using the built-in Helvetica font
#[derive(Debug, Clone, Copy, Default)]
pub struct LopdfRenderer;

impl LopdfRenderer {
    /// A4 in points
    const PAGE_WIDTH: i64 = 595;
    const PAGE_HEIGHT: i64 = 842;
    const MARGIN: i64 = 50;
    const FONT_SIZE: i64 = 12;
    const LEADING: i64 = 16;
    /// Characters per line at an average Helvetica glyph width
    const WRAP_COLUMNS: usize = 85;

    fn lines_per_page() -> usize {
        ((Self::PAGE_HEIGHT - 2 * Self::MARGIN) / Self::LEADING) as usize
    }

    fn lines(document: &EmailDocument<'_>) -> Vec<String> {
        let mut lines = Vec::new();
        for header in [
            format!("Email ID: {}", document.id),
            format!("Date: {}", document.date),
            format!("Subject: {}", document.subject),
        ] {
            lines.extend(wrap(&header, Self::WRAP_COLUMNS));
        }
        lines.push(String::new());
        for paragraph in document.body.lines() {
            lines.extend(wrap(paragraph, Self::WRAP_COLUMNS));
        }
        lines
    }

    fn page_content(lines: &[String]) -> Result<Vec<u8>> {
        let mut operations = vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), Self::FONT_SIZE.into()]),
            Operation::new("TL", vec![Self::LEADING.into()]),
            Operation::new(
                "Td",
                vec![
                    Self::MARGIN.into(),
                    (Self::PAGE_HEIGHT - Self::MARGIN).into(),
                ],
            ),
        ];
        for line in lines {
            operations.push(Operation::new(
                "Tj",
                vec![Object::string_literal(encode_win_ansi(line))],
            ));
            operations.push(Operation::new("T*", vec![]));
        }
        operations.push(Operation::new("ET", vec![]));

        Content { operations }
            .encode()
            .context("Failed to encode page content")
    }
}

impl PdfRenderer for LopdfRenderer {
    fn render(&self, document: &EmailDocument<'_>) -> Result<Vec<u8>> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! {
                "F1" => font_id,
            },
        });

        let lines = Self::lines(document);
        let mut kids: Vec<ObjectId> = Vec::new();
        for chunk in lines.chunks(Self::lines_per_page()) {
            let content = Self::page_content(chunk)?;
            let content_id = doc.add_object(Stream::new(dictionary! {}, content));
            kids.push(doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            }));
        }

        let pages = dictionary! {
            "Type" => "Pages",
            "Count" => kids.len() as i64,
            "Kids" => kids.into_iter().map(Object::from).collect::<Vec<_>>(),
            "Resources" => resources_id,
            "MediaBox" => vec![
                0.into(),
                0.into(),
                Self::PAGE_WIDTH.into(),
                Self::PAGE_HEIGHT.into(),
            ],
        };
        doc.objects.insert(pages_id, Object::Dictionary(pages));

        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc.compress();

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).context("Failed to write PDF")?;
        Ok(bytes)
    }
}

/// Decrypts with lopdf and rewrites the file without its encryption dictionary
///
/// Handles the standard security handler in all its revisions: RC4 (V1, V2)
/// and AES-128 or AES-256 crypt filters (V4, V5).
#[derive(Debug, Clone, Copy, Default)]
pub struct LopdfDecryptor;

impl PdfDecryptor for LopdfDecryptor {
    fn decrypt(&self, path: &Path, password: &str) -> Result<()> {
        // The reader authenticates and decrypts every object while loading
        let mut doc = Document::load_with_password(path, password).with_context(|| {
            format!(
                "Failed to open PDF (wrong password or unsupported encryption): {}",
                path.display()
            )
        })?;

        if !doc.was_encrypted() && !doc.is_encrypted() {
            debug!("{} is not encrypted, leaving it unchanged", path.display());
            return Ok(());
        }

        if doc.is_encrypted() {
            let encrypt_id = doc
                .trailer
                .get(b"Encrypt")
                .and_then(Object::as_reference)
                .ok();
            doc.decrypt(password).with_context(|| {
                format!("Wrong password or unsupported encryption: {}", path.display())
            })?;
            doc.trailer.remove(b"Encrypt");
            if let Some(id) = encrypt_id {
                doc.objects.remove(&id);
            }
        }

        doc.save(path)
            .with_context(|| format!("Failed to write decrypted PDF: {}", path.display()))?;
        debug!("Removed password protection from {}", path.display());
        Ok(())
    }
}

/// Greedy word wrap; words longer than a line are split
fn wrap(text: &str, columns: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut width = 0;

    for word in text.split_whitespace() {
        let mut chars: Vec<char> = word.chars().collect();
        while chars.len() > columns {
            if width > 0 {
                lines.push(std::mem::take(&mut current));
                width = 0;
            }
            let rest = chars.split_off(columns);
            lines.push(chars.into_iter().collect());
            chars = rest;
        }

        let len = chars.len();
        if width > 0 && width + 1 + len > columns {
            lines.push(std::mem::take(&mut current));
            width = 0;
        }
        if width > 0 {
            current.push(' ');
            width += 1;
        }
        current.extend(chars);
        width += len;
    }

    if width > 0 || lines.is_empty() {
        lines.push(current);
    }
    lines
}

/// Latin-1 bytes for the standard font; anything else becomes `?`
fn encode_win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match u32::from(c) {
            0x20..=0x7E | 0xA0..=0xFF => c as u8,
            0x09 => b' ',
            _ => b'?',
        })
        .collect()
}
