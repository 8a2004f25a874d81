//! Entry segmentation: splitting one document's text into independent
//! ticket spans when a page bundles several tickets.

use std::sync::LazyLock;

use regex::Regex;

use crate::parse::entry::ParsedEntry;
use crate::parse::extract::{extract_fields, preceded_by_uid};

/// Any identifier-label occurrence starts a new entry span. The short
/// labels carry a trailing boundary so words like "identificativo" or
/// "praticamente" do not open spurious entries.
static RE_ENTRY_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:Numero\s*WR|Numero\s*Pratica|Nr\.?\s*WR|WR|Pratica\b|NW\b|N(?:°|r|\.)?\s*Impianto|ID\b)\s*[:#-]?\s*[A-Za-z0-9\-_/]+",
    )
    .unwrap()
});

/// Fallback boundaries for documents whose tickets carry no identifier label.
static RE_SECTION_BOUNDARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:Cliente|Intestatario|Indirizzo)[: ]+").unwrap());

/// Splits `text` into entry spans and extracts each independently.
///
/// Only entries that identify a ticket or name a customer are returned; the
/// original span text is preserved on each entry for audit.
pub fn segment_entries(text: &str) -> Vec<ParsedEntry> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let starts: Vec<usize> = RE_ENTRY_START
        .find_iter(text)
        .filter(|m| !preceded_by_uid(text, m.start()))
        .map(|m| m.start())
        .collect();

    if starts.is_empty() {
        segment_by_section_boundaries(text)
    } else {
        // One occurrence spans to the end of the text; with more, each
        // entry runs from its label up to the next one.
        extract_spans(text, &starts)
    }
}

fn extract_spans(text: &str, starts: &[usize]) -> Vec<ParsedEntry> {
    let mut bounds = starts.to_vec();
    bounds.push(text.len());

    let mut entries = Vec::new();
    for window in bounds.windows(2) {
        let span = &text[window[0]..window[1]];
        let mut entry = extract_fields(span);
        if entry.has_content() {
            entry.raw = Some(span.to_string());
            entries.push(entry);
        }
    }
    entries
}

fn segment_by_section_boundaries(text: &str) -> Vec<ParsedEntry> {
    let boundaries: Vec<usize> = RE_SECTION_BOUNDARY
        .find_iter(text)
        .map(|m| m.start())
        .collect();

    if boundaries.len() > 1 {
        let entries = extract_spans(text, &boundaries);
        if !entries.is_empty() {
            return entries;
        }
    }

    // One boundary or none: the whole text is a single entry.
    let mut entry = extract_fields(text);
    if entry.has_content() {
        entry.raw = Some(text.to_string());
        vec![entry]
    } else {
        Vec::new()
    }
}
