//! Field extraction from one chunk of ticket text.
//!
//! The identifier is located by an ordered rule list evaluated in priority
//! order until one yields a value; the tie-break policy stays declarative so
//! each tier is testable on its own. All heuristics are best-effort: OCR
//! noise, odd label vocabularies and missing fields degrade the result, they
//! never fail it.

use std::sync::LazyLock;

use regex::Regex;

use crate::parse::entry::{ExtractionMethod, ParsedEntry};

static RE_WR_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:Numero\s*WR|Nr\.?\s*WR|WR)\s*[:#-]?\s*([A-Za-z0-9\-_/]+)\b").unwrap()
});
static RE_UID_TAIL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bUID\s*$").unwrap());
static RE_PRATICA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bPratica(?:\s*(?:N(?:r|°|\.)?)?)\s*[:#-]?\s*([A-Za-z0-9\-_/]+)\b").unwrap()
});
static RE_PRATICA_REVERSED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bN(?:°|r|\.)\s*Pratica\s*[:#-]?\s*([A-Za-z0-9\-_/]+)\b").unwrap()
});
static RE_ID_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:Pratica\s+ID|ID)\b[^0-9\n]{0,10}([0-9][0-9.,\-_/]*)").unwrap()
});
static RE_NW_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bNW[:#\s-]+([0-9A-Za-z\-_/]+)\b").unwrap());
static RE_IMPIANTO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bN(?:°|r|\.)?\s*Impianto[:#\s-]*([0-9A-Za-z\-_/]+)\b").unwrap()
});
static RE_DIGITS_ONLY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+$").unwrap());
static RE_NUMERIC_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b(\d{7,})\b").unwrap());

static RE_OPERATOR_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:Operatore|ISP|Fornitore)[: ]+([^\n]+)").unwrap()
});
static RE_ADDRESS_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:Indirizzo|Address)[: ]+([^\n]+)").unwrap());
static RE_STREET_KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:Via|Piazza|P\.zza|Corso|Strada|Viale)\b").unwrap()
});
static RE_CUSTOMER_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:Cliente|Intestatario|Nome\s+cliente)[: ]+([^\n]+)").unwrap()
});
static RE_JOB_TYPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:Tipo\s*lavoro|Lavoro|Intervento)[: ]+(attivazione|guasto|manutenzione)\b")
        .unwrap()
});
static RE_APPOINTMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:Appuntamento|Data|Orario)[: ]+([^\n]+)").unwrap()
});
static RE_TECHNICAL_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(Splitter|PTE|ODF|OLT|Porta)[: ]+([^\s\n]+)").unwrap()
});

/// Operators recognized by bare substring scan when no label is present.
const KNOWN_OPERATORS: &[&str] = &["Open Fiber", "Fastweb", "ENI", "Vodafone", "TIM", "WindTre"];

/// One labeled identifier tier: a method tag plus the extractor that runs it.
struct IdentifierRule {
    method: ExtractionMethod,
    extract: fn(&str) -> Option<String>,
}

/// Labeled tiers, highest priority first. The free-standing numeric run is
/// deliberately not in this list — it is a candidate, not a rule, and only
/// commits when every tier here came up empty.
const IDENTIFIER_RULES: &[IdentifierRule] = &[
    IdentifierRule {
        method: ExtractionMethod::LabelWr,
        extract: find_wr_label,
    },
    IdentifierRule {
        method: ExtractionMethod::LabelPratica,
        extract: find_pratica_label,
    },
    IdentifierRule {
        method: ExtractionMethod::LabelId,
        extract: find_id_label,
    },
    IdentifierRule {
        method: ExtractionMethod::LabelNw,
        extract: find_nw_label,
    },
    IdentifierRule {
        method: ExtractionMethod::LabelImpianto,
        extract: find_impianto_label,
    },
];

/// Extracts identifier and attributes from one text chunk. Total: worst
/// case returns an all-empty entry with `valid == false`.
pub fn extract_fields(text: &str) -> ParsedEntry {
    let joined = squash_lines(text);
    let mut entry = ParsedEntry::default();

    for rule in IDENTIFIER_RULES {
        if let Some(value) = (rule.extract)(&joined) {
            entry.identifier = Some(value);
            entry.debug.push_method(rule.method);
            break;
        }
    }

    entry.operator = find_operator(&joined);
    entry.address = find_address(&joined);
    entry.customer_name = RE_CUSTOMER_LABEL
        .captures(&joined)
        .map(|c| trim_value(&c[1]));
    entry.job_type = RE_JOB_TYPE
        .captures(&joined)
        .map(|c| c[1].to_lowercase());
    entry.appointment = RE_APPOINTMENT
        .captures(&joined)
        .map(|c| trim_value(&c[1]));

    for caps in RE_TECHNICAL_LABEL.captures_iter(&joined) {
        entry
            .extra_fields
            .entry(caps[1].to_string())
            .or_insert_with(|| caps[2].to_string());
    }

    // Last resort: a free-standing 7+ digit run is recorded as a
    // low-confidence candidate and committed only because nothing else
    // matched (it can false-positive on phone numbers or VLAN ids).
    if entry.identifier.is_none() {
        if let Some(candidate) = RE_NUMERIC_RUN
            .captures(&joined)
            .map(|c| c[1].to_string())
        {
            entry.debug.candidates.push(candidate.clone());
            entry.debug.push_method(ExtractionMethod::CandidateNumeric);
            entry.identifier = Some(candidate);
        }
    }

    entry.refresh_validity();
    entry
}

/// Joins trimmed non-empty lines, the shape every pattern expects.
fn squash_lines(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// True when the 10 characters before `start` end with a `UID` label, so a
/// match there is a UID artifact rather than a work-order identifier.
pub(crate) fn preceded_by_uid(text: &str, start: usize) -> bool {
    let mut begin = start.saturating_sub(10);
    while begin > 0 && !text.is_char_boundary(begin) {
        begin -= 1;
    }
    RE_UID_TAIL.is_match(&text[begin..start])
}

/// WR tier: collect every label match, drop UID artifacts, prefer a
/// pure-digit candidate over the first one.
fn find_wr_label(text: &str) -> Option<String> {
    let mut matches = Vec::new();
    for caps in RE_WR_LABEL.captures_iter(text) {
        let whole = caps.get(0).unwrap();
        if preceded_by_uid(text, whole.start()) {
            continue;
        }
        matches.push(caps[1].trim().to_string());
    }
    if matches.is_empty() {
        return None;
    }
    let numeric = matches.iter().find(|m| RE_DIGITS_ONLY.is_match(m));
    Some(numeric.unwrap_or(&matches[0]).clone())
}

fn find_pratica_label(text: &str) -> Option<String> {
    RE_PRATICA
        .captures(text)
        .or_else(|| RE_PRATICA_REVERSED.captures(text))
        .map(|c| c[1].trim().to_string())
}

/// ID tier: digits may carry thousands/decimal separators ("ID Xme: 283.233"),
/// which are stripped before use.
fn find_id_label(text: &str) -> Option<String> {
    RE_ID_LABEL
        .captures(text)
        .map(|c| c[1].replace(['.', ','], "").trim().to_string())
        .filter(|v| !v.is_empty())
}

fn find_nw_label(text: &str) -> Option<String> {
    RE_NW_LABEL.captures(text).map(|c| c[1].trim().to_string())
}

fn find_impianto_label(text: &str) -> Option<String> {
    RE_IMPIANTO.captures(text).map(|c| c[1].trim().to_string())
}

fn find_operator(text: &str) -> Option<String> {
    if let Some(caps) = RE_OPERATOR_LABEL.captures(text) {
        return Some(trim_value(&caps[1]));
    }
    let upper = text.to_uppercase();
    KNOWN_OPERATORS
        .iter()
        .find(|op| upper.contains(&op.to_uppercase()))
        .map(|op| op.to_string())
}

fn find_address(text: &str) -> Option<String> {
    if let Some(caps) = RE_ADDRESS_LABEL.captures(text) {
        return Some(trim_value(&caps[1]));
    }
    text.lines()
        .find(|line| RE_STREET_KEYWORD.is_match(line))
        .map(|line| line.trim().to_string())
}

/// Trims whitespace plus trailing label punctuation from a captured value.
fn trim_value(raw: &str) -> String {
    raw.trim()
        .trim_end_matches(|c: char| c.is_whitespace() || matches!(c, ':' | ';' | ','))
        .to_string()
}
