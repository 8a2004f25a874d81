//! Identifier normalization.
//!
//! Every component that compares two work orders for "same ticket" goes
//! through [`normalize_identifier`] — it is the sole equality basis across
//! parsing, upsert and duplicate merging.

use std::sync::LazyLock;

use regex::Regex;

static RE_WR_PREFIXED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^WR[-_]?(\d+)$").unwrap());
static RE_NUMERIC: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+$").unwrap());

/// Canonicalizes a raw work-order identifier.
///
/// - `"1764902551"` → `WR-1764902551`
/// - `"wr1764902551"` → `WR-1764902551`
/// - `"WR-1764902551"` → `WR-1764902551`
/// - `"  "` → `None`
///
/// Non-numeric identifiers are uppercased and stripped of characters
/// outside `[A-Z0-9\-_/]` but otherwise returned unchanged. Never fails.
pub fn normalize_identifier(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let upper = trimmed.to_uppercase();
    let cleaned: String = upper
        .chars()
        .filter(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '/'))
        .collect();
    if cleaned.is_empty() {
        return None;
    }

    if let Some(caps) = RE_WR_PREFIXED.captures(&cleaned) {
        return Some(format!("WR-{}", &caps[1]));
    }
    if RE_NUMERIC.is_match(&cleaned) {
        return Some(format!("WR-{}", cleaned));
    }

    Some(cleaned)
}
