//! Apply/upsert engine.
//!
//! Takes a document's stored parse result and turns selected entries
//! into work orders: existing orders (matched by normalized
//! identifier) are updated field-by-field, unknown ones are created.
//! Each entry is one transaction, so a failing entry never corrupts
//! the ones already applied.

use std::sync::Arc;

use chrono::Utc;

use crate::db::{document_repo, work_order_repo, Database};
use crate::db::work_order_repo::WorkOrderRow;
use crate::error::ApplyError;
use crate::normalize::normalize_identifier;
use crate::notify::Notifier;
use crate::parse::ParsedEntry;

/// Override payloads accepted alongside an apply request.
#[derive(Debug, Clone)]
pub enum ApplyOverrides {
    /// One map applied to every selected entry.
    Single(serde_json::Map<String, serde_json::Value>),
    /// One map per selected entry; length must match the selection.
    PerEntry(Vec<serde_json::Map<String, serde_json::Value>>),
}

/// Options controlling which entries are applied and with what edits.
#[derive(Debug, Clone, Default)]
pub struct ApplyOptions {
    /// Indices into the document's entry list. `None` selects all.
    pub selected_indices: Option<Vec<usize>>,
    pub overrides: Option<ApplyOverrides>,
}

/// Result of applying a document: the affected work orders, in entry
/// order.
#[derive(Debug, Clone)]
pub struct AppliedOutcome {
    pub work_order_ids: Vec<i64>,
}

/// Applies parsed documents to the work-order store.
pub struct ApplyEngine {
    db: Database,
    notifier: Option<Arc<dyn Notifier>>,
    recipients: Vec<String>,
}

impl ApplyEngine {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            notifier: None,
            recipients: Vec::new(),
        }
    }

    /// Wires a notifier; recipients each get one message per applied
    /// document. Delivery failures are logged, never propagated.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>, recipients: Vec<String>) -> Self {
        self.notifier = Some(notifier);
        self.recipients = recipients;
        self
    }

    /// Applies the stored parse result of `document_id`.
    pub fn apply(
        &self,
        document_id: i64,
        options: &ApplyOptions,
    ) -> Result<AppliedOutcome, ApplyError> {
        let _span = tracing::info_span!("apply.document", document_id).entered();

        let document = self
            .db
            .with_conn(|conn| document_repo::find_by_id(conn, document_id))?
            .ok_or(ApplyError::DocumentNotFound(document_id))?;

        let entries = stored_entries(document.parse_result.as_deref())?;
        let mut entries = select_entries(entries, options.selected_indices.as_deref())?;
        apply_overrides(&mut entries, options.overrides.as_ref())?;

        log::info!(
            "Applying {} entries from document {} ({})",
            entries.len(),
            document_id,
            document.filename
        );

        let mut work_order_ids = Vec::with_capacity(entries.len());
        for entry in &entries {
            let id = self.upsert_entry(document_id, entry)?;
            work_order_ids.push(id);
        }

        self.db.with_tx(|conn| {
            document_repo::set_applied_work_order_ids(conn, document_id, &work_order_ids)?;
            if let Some(&first) = work_order_ids.first() {
                work_order_repo::insert_event(
                    conn,
                    first,
                    "applied_from_document",
                    Some(&format!(
                        "{} entries applied from document {}",
                        work_order_ids.len(),
                        document_id
                    )),
                )?;
            }
            Ok(())
        })?;

        self.send_notifications(document_id, &document.filename, work_order_ids.len());

        Ok(AppliedOutcome { work_order_ids })
    }

    /// One transaction: match by normalized identifier, then update or
    /// create. Returns the affected work-order id.
    fn upsert_entry(&self, document_id: i64, entry: &ParsedEntry) -> Result<i64, ApplyError> {
        let identifier = entry
            .identifier
            .as_deref()
            .and_then(normalize_identifier)
            .unwrap_or_else(synthesize_identifier);

        let result = self.db.with_tx(|conn| {
            let now = Utc::now().to_rfc3339();

            let id = match work_order_repo::find_by_identifier(conn, &identifier)? {
                Some(mut existing) => {
                    update_present_fields(&mut existing, entry);
                    work_order_repo::update(conn, &existing)?;
                    work_order_repo::insert_event(
                        conn,
                        existing.id,
                        "updated",
                        Some(&format!("updated from document {}", document_id)),
                    )?;
                    existing.id
                }
                None => {
                    let row = WorkOrderRow {
                        id: 0,
                        identifier: identifier.clone(),
                        operator: Some(field_or_unknown(entry.operator.as_deref())),
                        address: Some(field_or_unknown(entry.address.as_deref())),
                        customer_name: Some(field_or_unknown(entry.customer_name.as_deref())),
                        job_type: Some(
                            entry
                                .job_type
                                .clone()
                                .unwrap_or_else(|| "attivazione".to_string()),
                        ),
                        status: "aperto".to_string(),
                        opened_at: entry.appointment.clone().or_else(|| Some(now.clone())),
                        closed_at: None,
                        assigned_technician_id: None,
                        closing_technician_id: None,
                        note: None,
                        extra_fields: entry.extra_fields.clone(),
                        created_at: now.clone(),
                    };
                    let id = work_order_repo::insert(conn, &row)?;
                    work_order_repo::insert_event(
                        conn,
                        id,
                        "created",
                        Some(&format!("created from document {}", document_id)),
                    )?;
                    id
                }
            };

            work_order_repo::ensure_association(conn, document_id, id)?;
            Ok(id)
        });

        match result {
            Ok(id) => Ok(id),
            Err(e) if e.is_unique_violation() => Err(ApplyError::IdentifierConflict(identifier)),
            Err(e) => Err(e.into()),
        }
    }

    fn send_notifications(&self, document_id: i64, filename: &str, applied: usize) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        let message = format!(
            "{} work orders applied from document '{}' (id {})",
            applied, filename, document_id
        );
        for recipient in &self.recipients {
            if !notifier.notify(recipient, &message) {
                log::warn!("Notification to {} failed", recipient);
            }
        }
    }
}

/// Decodes the entries list out of a stored parse result.
fn stored_entries(parse_result: Option<&str>) -> Result<Vec<ParsedEntry>, ApplyError> {
    let raw = parse_result.ok_or(ApplyError::NoEntries)?;
    let value: serde_json::Value = serde_json::from_str(raw).map_err(|_| ApplyError::NoEntries)?;
    let entries: Vec<ParsedEntry> = value
        .get("entries")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_object().map(ParsedEntry::from_field_map))
                .collect()
        })
        .unwrap_or_default();

    if entries.is_empty() {
        return Err(ApplyError::NoEntries);
    }
    Ok(entries)
}

/// Narrows entries to the selected indices (deduplicated, sorted).
fn select_entries(
    entries: Vec<ParsedEntry>,
    selected: Option<&[usize]>,
) -> Result<Vec<ParsedEntry>, ApplyError> {
    let Some(selected) = selected else {
        return Ok(entries);
    };

    let mut indices: Vec<usize> = selected.to_vec();
    indices.sort_unstable();
    indices.dedup();

    let count = entries.len();
    if let Some(&bad) = indices.iter().find(|&&i| i >= count) {
        return Err(ApplyError::IndexOutOfRange { index: bad, count });
    }

    let picked = indices
        .into_iter()
        .map(|i| entries[i].clone())
        .collect::<Vec<_>>();
    if picked.is_empty() {
        return Err(ApplyError::NoEntries);
    }
    Ok(picked)
}

fn apply_overrides(
    entries: &mut [ParsedEntry],
    overrides: Option<&ApplyOverrides>,
) -> Result<(), ApplyError> {
    match overrides {
        None => Ok(()),
        Some(ApplyOverrides::Single(map)) => {
            for entry in entries.iter_mut() {
                entry.apply_override(map);
            }
            Ok(())
        }
        Some(ApplyOverrides::PerEntry(maps)) => {
            if maps.len() != entries.len() {
                return Err(ApplyError::OverrideMismatch {
                    expected: entries.len(),
                    got: maps.len(),
                });
            }
            for (entry, map) in entries.iter_mut().zip(maps) {
                entry.apply_override(map);
            }
            Ok(())
        }
    }
}

/// Copies present entry fields onto an existing row. Absent fields
/// never blank stored values. Entry extras win on key conflicts.
fn update_present_fields(row: &mut WorkOrderRow, entry: &ParsedEntry) {
    if let Some(operator) = &entry.operator {
        row.operator = Some(operator.clone());
    }
    if let Some(address) = &entry.address {
        row.address = Some(address.clone());
    }
    if let Some(customer_name) = &entry.customer_name {
        row.customer_name = Some(customer_name.clone());
    }
    if let Some(job_type) = &entry.job_type {
        row.job_type = Some(job_type.clone());
    }
    if let Some(appointment) = &entry.appointment {
        row.opened_at = Some(appointment.clone());
    }
    for (key, value) in &entry.extra_fields {
        row.extra_fields.insert(key.clone(), value.clone());
    }
}

fn field_or_unknown(value: Option<&str>) -> String {
    match value {
        Some(v) if !v.trim().is_empty() => v.to_string(),
        _ => "unknown".to_string(),
    }
}

/// Identifier for entries that parsed without one. Unique enough in
/// practice; a collision surfaces as an identifier conflict.
fn synthesize_identifier() -> String {
    format!("WR-{}", Utc::now().timestamp_millis())
}
