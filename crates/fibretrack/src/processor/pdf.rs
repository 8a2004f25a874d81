//! PDF text acquisition: embedded text per page first, page-by-page OCR
//! when the document is scanned or the embedded text is garbled.

use std::process::Command;

use crate::error::ProcessError;
use crate::processor::ocr::OcrEngine;
use crate::processor::ExtractedText;

pub struct PdfProcessor {
    ocr: Option<OcrEngine>,
}

impl PdfProcessor {
    pub fn new(ocr: Option<OcrEngine>) -> Self {
        Self { ocr }
    }

    /// Extracts per-page text from a PDF byte payload.
    ///
    /// Page boundaries are kept so the segmenter can run per page as well
    /// as over the whole document.
    pub fn extract(&self, pdf_bytes: &[u8]) -> Result<ExtractedText, ProcessError> {
        let _span = tracing::info_span!("processor.pdf").entered();

        match lopdf::Document::load_mem(pdf_bytes) {
            Ok(doc) => {
                let pages = extract_page_texts(&doc);
                let joined = pages.join("\n");

                if should_use_ocr(&joined) {
                    if let Some(ref ocr) = self.ocr {
                        let _ocr_span =
                            tracing::info_span!("processor.ocr_fallback", reason = "text_quality")
                                .entered();
                        return self.ocr_pages(pdf_bytes, doc.get_pages().len(), ocr);
                    }
                }

                Ok(ExtractedText {
                    pages,
                    ocr_used: false,
                })
            }
            Err(e) => {
                // lopdf can't parse this PDF (e.g. invalid cross-reference
                // table). Poppler handles more variants, so OCR the pages.
                tracing::warn!("lopdf failed to parse PDF: {}. Falling back to OCR.", e);
                if let Some(ref ocr) = self.ocr {
                    let _ocr_span =
                        tracing::info_span!("processor.ocr_fallback", reason = "lopdf_parse_failed")
                            .entered();
                    let page_count = count_pdf_pages(pdf_bytes)?;
                    self.ocr_pages(pdf_bytes, page_count, ocr)
                } else {
                    Err(ProcessError::PdfProcessing(format!(
                        "Failed to load PDF: {}. OCR fallback unavailable.",
                        e
                    )))
                }
            }
        }
    }

    /// OCRs every page. A page that fails to render or recognize yields an
    /// empty string for that page, silently — parsing stays best-effort.
    fn ocr_pages(
        &self,
        pdf_bytes: &[u8],
        page_count: usize,
        ocr: &OcrEngine,
    ) -> Result<ExtractedText, ProcessError> {
        let mut pages = Vec::with_capacity(page_count);

        for page_num in 1..=page_count {
            let page_text = render_pdf_page_to_image(pdf_bytes, page_num as u32, ocr.dpi())
                .and_then(|image_data| ocr.ocr_page(&image_data))
                .unwrap_or_default();
            pages.push(page_text);
        }

        Ok(ExtractedText {
            pages,
            ocr_used: true,
        })
    }
}

fn extract_page_texts(doc: &lopdf::Document) -> Vec<String> {
    doc.get_pages()
        .keys()
        .map(|page_num| doc.extract_text(&[*page_num]).unwrap_or_default())
        .collect()
}

/// Pattern for Identity-H Unimplemented errors (common with CID fonts).
const IDENTITY_H_PATTERN: &str = "?Identity-H Unimplemented?";

/// Minimum number of characters required before applying the alphanumeric
/// ratio check. Shorter text is considered valid regardless of composition.
const MIN_TOTAL_CHARS: usize = 50;

/// Minimum percentage of alphanumeric characters for text to count as
/// readable; below this the page is treated as scanned/garbled.
const MIN_ALPHANUMERIC_PERCENT: usize = 10;

/// True when the embedded text is unusable and the pages should be OCRed:
/// empty text, font encoding error markers only, or a very high ratio of
/// non-printable characters.
fn should_use_ocr(text: &str) -> bool {
    let trimmed = text.trim();

    if trimmed.is_empty() {
        return true;
    }

    let cleaned = trimmed
        .replace(IDENTITY_H_PATTERN, "")
        .replace(['\n', ' '], "");
    if cleaned.is_empty() {
        return true;
    }

    let total_chars = trimmed.chars().count();
    let alphanumeric_chars = trimmed.chars().filter(|c| c.is_alphanumeric()).count();

    total_chars > MIN_TOTAL_CHARS
        && alphanumeric_chars * 100 < total_chars * MIN_ALPHANUMERIC_PERCENT
}

/// Page count via pdfinfo (poppler-utils), for PDFs lopdf cannot parse.
fn count_pdf_pages(pdf_bytes: &[u8]) -> Result<usize, ProcessError> {
    let temp_dir = std::env::temp_dir();
    let pdf_path = temp_dir.join(format!("fibretrack_pagecount_{}.pdf", uuid::Uuid::new_v4()));

    std::fs::write(&pdf_path, pdf_bytes)
        .map_err(|e| ProcessError::PdfProcessing(format!("Failed to write temp PDF: {}", e)))?;

    let output = Command::new("pdfinfo").arg(&pdf_path).output().map_err(|e| {
        let _ = std::fs::remove_file(&pdf_path);
        ProcessError::PdfProcessing(format!(
            "Failed to run pdfinfo: {}. Make sure poppler-utils is installed.",
            e
        ))
    })?;

    let _ = std::fs::remove_file(&pdf_path);

    if !output.status.success() {
        return Err(ProcessError::PdfProcessing(format!(
            "pdfinfo failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    for line in stdout.lines() {
        if let Some(count_str) = line.strip_prefix("Pages:") {
            if let Ok(count) = count_str.trim().parse::<usize>() {
                return Ok(count);
            }
        }
    }

    Ok(1)
}

fn render_pdf_page_to_image(
    pdf_bytes: &[u8],
    page_num: u32,
    dpi: u32,
) -> Result<Vec<u8>, ProcessError> {
    let temp_dir = std::env::temp_dir();
    let pdf_path = temp_dir.join(format!("fibretrack_temp_{}.pdf", uuid::Uuid::new_v4()));
    let output_prefix = temp_dir.join(format!("fibretrack_page_{}", uuid::Uuid::new_v4()));

    std::fs::write(&pdf_path, pdf_bytes)
        .map_err(|e| ProcessError::PdfProcessing(format!("Failed to write temp PDF: {}", e)))?;

    let output = Command::new("pdftoppm")
        .args([
            "-png",
            "-r",
            &dpi.to_string(),
            "-f",
            &page_num.to_string(),
            "-l",
            &page_num.to_string(),
        ])
        .arg(&pdf_path)
        .arg(&output_prefix)
        .output()
        .map_err(|e| {
            ProcessError::PdfProcessing(format!(
                "Failed to run pdftoppm: {}. Make sure poppler-utils is installed.",
                e
            ))
        })?;

    let _ = std::fs::remove_file(&pdf_path);

    if !output.status.success() {
        return Err(ProcessError::PdfProcessing(format!(
            "pdftoppm failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    // pdftoppm pads the page-number suffix depending on the page count.
    let candidates = [
        format!("{}-{}.png", output_prefix.display(), page_num),
        format!("{}-{:02}.png", output_prefix.display(), page_num),
        format!("{}-{:03}.png", output_prefix.display(), page_num),
    ];
    let image_path = candidates
        .iter()
        .find(|p| std::path::Path::new(p).exists())
        .ok_or_else(|| {
            ProcessError::PdfProcessing("Failed to find rendered page image".to_string())
        })?;

    let image_data = std::fs::read(image_path).map_err(|e| {
        ProcessError::PdfProcessing(format!("Failed to read rendered image: {}", e))
    })?;

    let _ = std::fs::remove_file(image_path);

    Ok(image_data)
}
