//! Parse orchestration: from a raw document payload to structured entries.
//!
//! Text is acquired through a ladder of tiers (embedded PDF text, per-page
//! OCR, lossy byte decode), then interpreted either as a literal JSON
//! payload or through the segmentation heuristics. Parsing never fails on
//! malformed input — the worst case is zero entries plus whatever text
//! could be decoded, which is a reportable condition, not a crash.

pub mod entry;
pub mod extract;
pub mod segment;

pub use entry::{ExtractionMethod, ParseDebug, ParsedEntry};
pub use extract::extract_fields;
pub use segment::segment_entries;

use serde::Serialize;

use crate::config::OcrConfig;
use crate::normalize::normalize_identifier;
use crate::processor::{decode_plain_text, ExtractedText, OcrEngine, PdfProcessor};

/// The result of parsing one document. Serializes to the externally stable
/// parse-result shape (`entries`, `raw_text`, `parse_debug`); the apply
/// engine later adds `applied_work_order_ids` alongside these keys.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ParseOutcome {
    pub entries: Vec<ParsedEntry>,
    pub raw_text: String,
    pub parse_debug: ParseDebug,
}

impl ParseOutcome {
    /// Serializes the outcome for persistence on the document row.
    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            // Entries are plain string maps; this should never happen, and
            // parse results must degrade rather than fail.
            log::error!("Failed to serialize parse outcome: {}", e);
            "{}".to_string()
        })
    }
}

pub struct Parser {
    pdf: PdfProcessor,
}

impl Parser {
    pub fn new(ocr: &OcrConfig) -> Self {
        let engine = ocr
            .enabled
            .then(|| OcrEngine::new(&ocr.languages, ocr.dpi));
        Self {
            pdf: PdfProcessor::new(engine),
        }
    }

    /// Builds a parser around an already-configured PDF processor.
    pub fn with_processor(pdf: PdfProcessor) -> Self {
        Self { pdf }
    }

    /// Parses one document payload into structured entries.
    pub fn parse(&self, filename: &str, mime: Option<&str>, content: &[u8]) -> ParseOutcome {
        let _span = tracing::info_span!("parse.document", filename = %filename).entered();

        let extracted = self.acquire_text(filename, mime, content);
        let raw_text = extracted.joined();

        let entries = parse_literal_payload(&raw_text)
            .unwrap_or_else(|| segment_document(&raw_text, &extracted.pages));

        let mut entries = dedupe_entries(entries);

        let mut parse_debug = ParseDebug::default();
        for entry in &mut entries {
            entry.refresh_validity();
            parse_debug.absorb(&entry.debug);
        }
        if extracted.ocr_used {
            parse_debug.push_method(ExtractionMethod::Ocr);
        }

        tracing::info!(
            entries = entries.len(),
            ocr = extracted.ocr_used,
            "parsed document"
        );

        ParseOutcome {
            entries,
            raw_text,
            parse_debug,
        }
    }

    /// Text-acquisition ladder: PDF extraction (with its internal OCR
    /// fallback) when the payload looks like a PDF, then lossy byte decode.
    fn acquire_text(&self, filename: &str, mime: Option<&str>, content: &[u8]) -> ExtractedText {
        if looks_like_pdf(filename, mime, content) {
            match self.pdf.extract(content) {
                Ok(text) if !text.is_blank() => return text,
                Ok(_) => tracing::debug!("PDF extraction produced no text, decoding raw bytes"),
                Err(e) => tracing::warn!("PDF extraction failed: {}. Decoding raw bytes.", e),
            }
        }

        ExtractedText {
            pages: vec![decode_plain_text(content)],
            ocr_used: false,
        }
    }
}

fn looks_like_pdf(filename: &str, mime: Option<&str>, content: &[u8]) -> bool {
    content.starts_with(b"%PDF-")
        || filename.to_lowercase().ends_with(".pdf")
        || mime.is_some_and(|m| m.to_lowercase().contains("pdf"))
}

/// Literal-payload branch: a document whose text is itself a JSON record
/// (or an explicit list of records) is trusted as-is, skipping heuristics.
fn parse_literal_payload(text: &str) -> Option<Vec<ParsedEntry>> {
    match serde_json::from_str::<serde_json::Value>(text.trim()) {
        Ok(serde_json::Value::Object(map)) => Some(vec![ParsedEntry::from_field_map(&map)]),
        Ok(serde_json::Value::Array(items)) => Some(
            items
                .iter()
                .filter_map(|item| item.as_object().map(ParsedEntry::from_field_map))
                .collect(),
        ),
        _ => None,
    }
}

/// Heuristic branch: segment the whole text and, when page boundaries are
/// available, each page as well; fall back to one whole-document extraction
/// if segmentation found nothing.
fn segment_document(raw_text: &str, pages: &[String]) -> Vec<ParsedEntry> {
    let mut entries = segment_entries(raw_text);
    if pages.len() > 1 {
        for page in pages {
            entries.extend(segment_entries(page));
        }
    }

    if entries.is_empty() {
        let mut entry = extract_fields(raw_text);
        if entry.has_content() {
            entry.raw = Some(raw_text.to_string());
            entries.push(entry);
        }
    }

    entries
}

/// In-document dedupe by normalized identifier, first occurrence wins.
/// Identifier-less entries are kept unless they are exact span duplicates
/// (the per-page pass re-finds the same spans the full-text pass did).
fn dedupe_entries(entries: Vec<ParsedEntry>) -> Vec<ParsedEntry> {
    let mut seen_ids: Vec<String> = Vec::new();
    let mut seen_spans: Vec<String> = Vec::new();
    let mut deduped = Vec::new();

    for mut entry in entries {
        let normalized = entry.identifier.as_deref().and_then(normalize_identifier);
        match normalized {
            Some(nid) => {
                if seen_ids.contains(&nid) {
                    continue;
                }
                seen_ids.push(nid.clone());
                entry.identifier = Some(nid);
                deduped.push(entry);
            }
            None => {
                let span = entry.raw.clone().unwrap_or_default();
                if !span.is_empty() && seen_spans.contains(&span) {
                    continue;
                }
                seen_spans.push(span);
                deduped.push(entry);
            }
        }
    }

    deduped
}
