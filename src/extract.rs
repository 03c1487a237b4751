//! PDF text extraction.

use anyhow::{anyhow, Context, Result};
use pdfium_render::prelude::*;

/// Turns a binary PDF into plain text for the segmenter.
pub trait TextExtractor: Send + Sync + 'static {
    fn extract_text(&self, bytes: &[u8]) -> Result<String>;
}

/// Extracts text with the system pdfium library, one blank line between
/// pages.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfiumExtractor;

impl TextExtractor for PdfiumExtractor {
    fn extract_text(&self, bytes: &[u8]) -> Result<String> {
        let bindings = Pdfium::bind_to_system_library()
            .map_err(|err| anyhow!("pdfium library unavailable: {err}"))?;
        let pdfium = Pdfium::new(bindings);
        let document = pdfium
            .load_pdf_from_byte_slice(bytes, None)
            .map_err(|err| anyhow!("load pdf: {err}"))?;

        let mut pages = Vec::new();
        for (index, page) in document.pages().iter().enumerate() {
            let text = page
                .text()
                .map_err(|err| anyhow!("read text of page {index}: {err}"))
                .context("pdf text extraction failed")?;
            pages.push(text.all());
        }
        Ok(pages.join("\n\n"))
    }
}

/// Accepts a payload as a PDF when its declared type or extension says so
/// and the bytes start with the PDF header.
pub fn looks_like_pdf(file_name: &str, content_type: Option<&str>, bytes: &[u8]) -> bool {
    let declared = content_type
        .map(|value| value.eq_ignore_ascii_case("application/pdf"))
        .unwrap_or(false)
        || file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.eq_ignore_ascii_case("pdf"))
            .unwrap_or(false);
    declared && bytes.starts_with(b"%PDF-")
}
