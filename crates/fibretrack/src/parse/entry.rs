//! Parsed-entry data model and its externally stable serialized shape.
//!
//! An entry is one structured ticket extracted from a document. Entries are
//! transient — they live inside a document's stored parse result, never as
//! rows of their own.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Which heuristic tier produced a value. Recorded per entry so downstream
/// consumers can reason about extraction confidence programmatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtractionMethod {
    #[serde(rename = "label:WR")]
    LabelWr,
    #[serde(rename = "label:Pratica")]
    LabelPratica,
    #[serde(rename = "label:ID")]
    LabelId,
    #[serde(rename = "label:NW")]
    LabelNw,
    #[serde(rename = "label:N-IMPIANTO")]
    LabelImpianto,
    /// Free-standing 7+ digit run. Low confidence — committed as the
    /// identifier only when no labeled tier fired.
    #[serde(rename = "candidate:numeric")]
    CandidateNumeric,
    /// Document-level tag: the OCR fallback produced the text.
    #[serde(rename = "ocr")]
    Ocr,
}

impl std::fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            Self::LabelWr => "label:WR",
            Self::LabelPratica => "label:Pratica",
            Self::LabelId => "label:ID",
            Self::LabelNw => "label:NW",
            Self::LabelImpianto => "label:N-IMPIANTO",
            Self::CandidateNumeric => "candidate:numeric",
            Self::Ocr => "ocr",
        };
        f.write_str(tag)
    }
}

/// Extraction provenance for one entry (or aggregated over a document).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParseDebug {
    #[serde(default)]
    pub methods: Vec<ExtractionMethod>,
    #[serde(default)]
    pub candidates: Vec<String>,
}

impl ParseDebug {
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty() && self.candidates.is_empty()
    }

    /// Merges another debug record in, deduplicating while preserving the
    /// order tags first appeared in.
    pub fn absorb(&mut self, other: &ParseDebug) {
        for m in &other.methods {
            if !self.methods.contains(m) {
                self.methods.push(*m);
            }
        }
        for c in &other.candidates {
            if !self.candidates.contains(c) {
                self.candidates.push(c.clone());
            }
        }
    }

    pub fn push_method(&mut self, method: ExtractionMethod) {
        if !self.methods.contains(&method) {
            self.methods.push(method);
        }
    }
}

/// One structured ticket extracted from a span of document text.
///
/// Serializes to the stable parse-result entry shape: plain field keys plus
/// `_raw` (the original span), `_parse_debug` and `_parsed_valid`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParsedEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub appointment: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_fields: BTreeMap<String, String>,
    /// Original span text the entry was extracted from, kept for audit.
    #[serde(rename = "_raw", skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
    #[serde(rename = "_parse_debug", skip_serializing_if = "ParseDebug::is_empty")]
    pub debug: ParseDebug,
    /// True iff the identifier is present.
    #[serde(rename = "_parsed_valid")]
    pub valid: bool,
}

const FIELD_KEYS: &[&str] = &[
    "identifier",
    "operator",
    "address",
    "customer_name",
    "job_type",
    "appointment",
];

impl ParsedEntry {
    /// An entry is worth keeping when it identifies a ticket or at least
    /// names a customer for human review.
    pub fn has_content(&self) -> bool {
        self.identifier.is_some() || self.customer_name.is_some()
    }

    pub fn refresh_validity(&mut self) {
        self.valid = self.identifier.is_some();
    }

    fn field_mut(&mut self, key: &str) -> Option<&mut Option<String>> {
        match key {
            "identifier" => Some(&mut self.identifier),
            "operator" => Some(&mut self.operator),
            "address" => Some(&mut self.address),
            "customer_name" => Some(&mut self.customer_name),
            "job_type" => Some(&mut self.job_type),
            "appointment" => Some(&mut self.appointment),
            _ => None,
        }
    }

    /// Builds an entry from a free-form field map — a literal JSON payload
    /// or a stored parse-result entry. Unknown scalar keys land in
    /// `extra_fields` so open-ended technical labels survive the round trip.
    pub fn from_field_map(map: &serde_json::Map<String, serde_json::Value>) -> Self {
        let mut entry = ParsedEntry::default();
        for (key, value) in map {
            if let Some(slot) = entry.field_mut(key) {
                *slot = value_to_string(value);
                continue;
            }
            match key.as_str() {
                "extra_fields" => {
                    if let Some(obj) = value.as_object() {
                        for (k, v) in obj {
                            if let Some(s) = value_to_string(v) {
                                entry.extra_fields.insert(k.clone(), s);
                            }
                        }
                    }
                }
                "_raw" => entry.raw = value_to_string(value),
                "_parse_debug" => {
                    if let Ok(debug) = serde_json::from_value(value.clone()) {
                        entry.debug = debug;
                    }
                }
                "_parsed_valid" => {}
                _ => {
                    if let Some(s) = value_to_string(value) {
                        entry.extra_fields.insert(key.clone(), s);
                    }
                }
            }
        }
        entry.refresh_validity();
        entry
    }

    /// Applies an override map on top of this entry. Override values win;
    /// `extra_fields` objects are merged key-by-key; keys outside the fixed
    /// field set are ignored.
    pub fn apply_override(&mut self, map: &serde_json::Map<String, serde_json::Value>) {
        for (key, value) in map {
            if FIELD_KEYS.contains(&key.as_str()) {
                if let Some(s) = value_to_string(value) {
                    if let Some(slot) = self.field_mut(key) {
                        *slot = Some(s);
                    }
                }
            } else if key == "extra_fields" {
                if let Some(obj) = value.as_object() {
                    for (k, v) in obj {
                        if let Some(s) = value_to_string(v) {
                            self.extra_fields.insert(k.clone(), s);
                        }
                    }
                }
            }
        }
        self.refresh_validity();
    }
}

/// Scalar JSON values become strings; null, arrays and objects are dropped.
fn value_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_field_map_known_fields() {
        let map = serde_json::json!({
            "identifier": "WR-15699897",
            "customer_name": "RAINONE DANILO",
            "job_type": "attivazione"
        });
        let entry = ParsedEntry::from_field_map(map.as_object().unwrap());
        assert_eq!(entry.identifier.as_deref(), Some("WR-15699897"));
        assert_eq!(entry.customer_name.as_deref(), Some("RAINONE DANILO"));
        assert!(entry.valid);
    }

    #[test]
    fn test_from_field_map_unknown_keys_become_extras() {
        let map = serde_json::json!({
            "identifier": "123",
            "Splitter": "SPL-4",
            "vlan": 835
        });
        let entry = ParsedEntry::from_field_map(map.as_object().unwrap());
        assert_eq!(entry.extra_fields.get("Splitter").unwrap(), "SPL-4");
        assert_eq!(entry.extra_fields.get("vlan").unwrap(), "835");
    }

    #[test]
    fn test_from_field_map_merges_extra_fields_object() {
        let map = serde_json::json!({
            "extra_fields": {"ODF": "12", "porta": "7"}
        });
        let entry = ParsedEntry::from_field_map(map.as_object().unwrap());
        assert_eq!(entry.extra_fields.len(), 2);
        assert!(!entry.valid);
    }

    #[test]
    fn test_override_wins_and_merges_extras() {
        let mut entry = ParsedEntry {
            identifier: Some("WR-1".to_string()),
            operator: Some("Fastweb".to_string()),
            ..Default::default()
        };
        entry
            .extra_fields
            .insert("Splitter".to_string(), "SPL-1".to_string());

        let map = serde_json::json!({
            "operator": "Open Fiber",
            "extra_fields": {"ODF": "3"},
            "bogus_key": "dropped"
        });
        entry.apply_override(map.as_object().unwrap());

        assert_eq!(entry.operator.as_deref(), Some("Open Fiber"));
        assert_eq!(entry.identifier.as_deref(), Some("WR-1"));
        assert_eq!(entry.extra_fields.get("Splitter").unwrap(), "SPL-1");
        assert_eq!(entry.extra_fields.get("ODF").unwrap(), "3");
        assert!(!entry.extra_fields.contains_key("bogus_key"));
    }

    #[test]
    fn test_serialized_shape_uses_underscore_keys() {
        let mut entry = ParsedEntry {
            identifier: Some("WR-9".to_string()),
            raw: Some("WR: 9".to_string()),
            ..Default::default()
        };
        entry.debug.push_method(ExtractionMethod::LabelWr);
        entry.refresh_validity();

        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["_raw"], "WR: 9");
        assert_eq!(value["_parse_debug"]["methods"][0], "label:WR");
        assert_eq!(value["_parsed_valid"], true);
        assert!(value.get("operator").is_none());
    }

    #[test]
    fn test_debug_absorb_dedupes_preserving_order() {
        let mut a = ParseDebug {
            methods: vec![ExtractionMethod::LabelWr],
            candidates: vec!["1234567".to_string()],
        };
        let b = ParseDebug {
            methods: vec![ExtractionMethod::LabelWr, ExtractionMethod::LabelPratica],
            candidates: vec!["1234567".to_string(), "7654321".to_string()],
        };
        a.absorb(&b);
        assert_eq!(
            a.methods,
            vec![ExtractionMethod::LabelWr, ExtractionMethod::LabelPratica]
        );
        assert_eq!(a.candidates, vec!["1234567", "7654321"]);
    }
}
