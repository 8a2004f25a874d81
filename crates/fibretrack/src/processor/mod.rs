//! Text acquisition from raw document payloads.

pub mod ocr;
pub mod pdf;

pub use ocr::OcrEngine;
pub use pdf::PdfProcessor;

/// Per-page text pulled out of a document, with a flag recording whether
/// the OCR fallback produced it.
#[derive(Debug, Clone, Default)]
pub struct ExtractedText {
    pub pages: Vec<String>,
    pub ocr_used: bool,
}

impl ExtractedText {
    pub fn joined(&self) -> String {
        self.pages.join("\n")
    }

    pub fn is_blank(&self) -> bool {
        self.pages.iter().all(|p| p.trim().is_empty())
    }
}

/// Last-resort acquisition tier: lossy byte-to-text decode. Never fails;
/// undecodable bytes become replacement characters.
pub fn decode_plain_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}
