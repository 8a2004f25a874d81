//! Work-order repository — CRUD for `work_orders`, plus the audit
//! trail (`work_order_events`) and document associations
//! (`document_work_orders`).
//!
//! Functions take a `&Connection` so the apply and merge engines can
//! compose them inside one transaction.

use std::collections::BTreeMap;

use chrono::Utc;
use rusqlite::{params, Connection, Row};

use super::DatabaseError;

/// A work-order row. `extra_fields` is stored as a JSON object in a
/// TEXT column and decoded at the row boundary.
#[derive(Debug, Clone)]
pub struct WorkOrderRow {
    pub id: i64,
    pub identifier: String,
    pub operator: Option<String>,
    pub address: Option<String>,
    pub customer_name: Option<String>,
    pub job_type: Option<String>,
    pub status: String,
    pub opened_at: Option<String>,
    pub closed_at: Option<String>,
    pub assigned_technician_id: Option<i64>,
    pub closing_technician_id: Option<i64>,
    pub note: Option<String>,
    pub extra_fields: BTreeMap<String, String>,
    pub created_at: String,
}

impl WorkOrderRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let extra_raw: Option<String> = row.get("extra_fields")?;
        let extra_fields = match extra_raw {
            Some(raw) if !raw.trim().is_empty() => serde_json::from_str(&raw)
                .map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        0,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })?,
            _ => BTreeMap::new(),
        };

        Ok(Self {
            id: row.get("id")?,
            identifier: row.get("identifier")?,
            operator: row.get("operator")?,
            address: row.get("address")?,
            customer_name: row.get("customer_name")?,
            job_type: row.get("job_type")?,
            status: row.get("status")?,
            opened_at: row.get("opened_at")?,
            closed_at: row.get("closed_at")?,
            assigned_technician_id: row.get("assigned_technician_id")?,
            closing_technician_id: row.get("closing_technician_id")?,
            note: row.get("note")?,
            extra_fields,
            created_at: row.get("created_at")?,
        })
    }

    fn extra_fields_json(&self) -> Result<Option<String>, DatabaseError> {
        if self.extra_fields.is_empty() {
            return Ok(None);
        }
        serde_json::to_string(&self.extra_fields)
            .map(Some)
            .map_err(|e| DatabaseError::CorruptJson {
                column: "extra_fields",
                reason: e.to_string(),
            })
    }
}

/// An audit trail event attached to a work order.
#[derive(Debug, Clone)]
pub struct WorkOrderEvent {
    pub id: i64,
    pub work_order_id: i64,
    pub timestamp: String,
    pub event_type: String,
    pub description: Option<String>,
}

impl WorkOrderEvent {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            work_order_id: row.get("work_order_id")?,
            timestamp: row.get("timestamp")?,
            event_type: row.get("event_type")?,
            description: row.get("description")?,
        })
    }
}

/// Inserts a new work order. Returns the new row id.
pub fn insert(conn: &Connection, wo: &WorkOrderRow) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO work_orders (identifier, operator, address, customer_name, job_type,
         status, opened_at, closed_at, assigned_technician_id, closing_technician_id,
         note, extra_fields, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            wo.identifier,
            wo.operator,
            wo.address,
            wo.customer_name,
            wo.job_type,
            wo.status,
            wo.opened_at,
            wo.closed_at,
            wo.assigned_technician_id,
            wo.closing_technician_id,
            wo.note,
            wo.extra_fields_json()?,
            wo.created_at,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Updates an existing work order. All fields except `id` and
/// `created_at` are overwritten.
pub fn update(conn: &Connection, wo: &WorkOrderRow) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE work_orders SET identifier=?2, operator=?3, address=?4, customer_name=?5,
         job_type=?6, status=?7, opened_at=?8, closed_at=?9, assigned_technician_id=?10,
         closing_technician_id=?11, note=?12, extra_fields=?13
         WHERE id=?1",
        params![
            wo.id,
            wo.identifier,
            wo.operator,
            wo.address,
            wo.customer_name,
            wo.job_type,
            wo.status,
            wo.opened_at,
            wo.closed_at,
            wo.assigned_technician_id,
            wo.closing_technician_id,
            wo.note,
            wo.extra_fields_json()?,
        ],
    )?;
    Ok(())
}

/// Finds a work order by its ID.
pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<WorkOrderRow>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM work_orders WHERE id = ?1")?;
    let mut rows = stmt.query_map(params![id], WorkOrderRow::from_row)?;
    match rows.next() {
        Some(Ok(row)) => Ok(Some(row)),
        Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
        None => Ok(None),
    }
}

/// Finds a work order by its exact identifier.
pub fn find_by_identifier(
    conn: &Connection,
    identifier: &str,
) -> Result<Option<WorkOrderRow>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM work_orders WHERE identifier = ?1")?;
    let mut rows = stmt.query_map(params![identifier], WorkOrderRow::from_row)?;
    match rows.next() {
        Some(Ok(row)) => Ok(Some(row)),
        Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
        None => Ok(None),
    }
}

/// Lists all work orders, oldest first (stable id tiebreak).
pub fn list_all(conn: &Connection) -> Result<Vec<WorkOrderRow>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM work_orders ORDER BY created_at ASC, id ASC")?;
    let rows: Vec<WorkOrderRow> = stmt
        .query_map([], WorkOrderRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Deletes a work order. Events and associations cascade.
pub fn delete(conn: &Connection, id: i64) -> Result<bool, DatabaseError> {
    let affected = conn.execute("DELETE FROM work_orders WHERE id = ?1", params![id])?;
    Ok(affected > 0)
}

/// Records an audit trail event for a work order.
pub fn insert_event(
    conn: &Connection,
    work_order_id: i64,
    event_type: &str,
    description: Option<&str>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO work_order_events (work_order_id, timestamp, event_type, description)
         VALUES (?1, ?2, ?3, ?4)",
        params![work_order_id, Utc::now().to_rfc3339(), event_type, description],
    )?;
    Ok(())
}

/// Lists the audit trail for a work order, oldest first.
pub fn list_events(
    conn: &Connection,
    work_order_id: i64,
) -> Result<Vec<WorkOrderEvent>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM work_order_events WHERE work_order_id = ?1 ORDER BY timestamp ASC, id ASC",
    )?;
    let rows: Vec<WorkOrderEvent> = stmt
        .query_map(params![work_order_id], WorkOrderEvent::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Moves the entire audit trail of one work order onto another.
pub fn repoint_events(conn: &Connection, from: i64, to: i64) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE work_order_events SET work_order_id = ?2 WHERE work_order_id = ?1",
        params![from, to],
    )?;
    Ok(())
}

/// Links a document to a work order. Idempotent: an existing pair is
/// left untouched. Returns true when a new link was created.
pub fn ensure_association(
    conn: &Connection,
    document_id: i64,
    work_order_id: i64,
) -> Result<bool, DatabaseError> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM document_work_orders
         WHERE document_id = ?1 AND work_order_id = ?2)",
        params![document_id, work_order_id],
        |r| r.get(0),
    )?;
    if exists {
        return Ok(false);
    }
    conn.execute(
        "INSERT INTO document_work_orders (document_id, work_order_id, applied_at)
         VALUES (?1, ?2, ?3)",
        params![document_id, work_order_id, Utc::now().to_rfc3339()],
    )?;
    Ok(true)
}

/// Returns the ids of documents linked to a work order.
pub fn documents_for_work_order(
    conn: &Connection,
    work_order_id: i64,
) -> Result<Vec<i64>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT document_id FROM document_work_orders
         WHERE work_order_id = ?1 ORDER BY document_id ASC",
    )?;
    let ids: Vec<i64> = stmt
        .query_map(params![work_order_id], |r| r.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

/// Returns the ids of work orders linked to a document.
pub fn work_orders_for_document(
    conn: &Connection,
    document_id: i64,
) -> Result<Vec<i64>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT work_order_id FROM document_work_orders
         WHERE document_id = ?1 ORDER BY work_order_id ASC",
    )?;
    let ids: Vec<i64> = stmt
        .query_map(params![document_id], |r| r.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

/// Repoints every association of one work order onto another. Pairs
/// that would duplicate an existing link on the target are dropped
/// instead of repointed.
pub fn repoint_associations(conn: &Connection, from: i64, to: i64) -> Result<(), DatabaseError> {
    conn.execute(
        "DELETE FROM document_work_orders
         WHERE work_order_id = ?1
           AND document_id IN (
             SELECT document_id FROM document_work_orders WHERE work_order_id = ?2
           )",
        params![from, to],
    )?;
    conn.execute(
        "UPDATE document_work_orders SET work_order_id = ?2 WHERE work_order_id = ?1",
        params![from, to],
    )?;
    Ok(())
}

/// Collapses any duplicate (document, work order) pairs, keeping the
/// earliest link. Safety net run after merge repointing.
pub fn collapse_duplicate_associations(conn: &Connection) -> Result<usize, DatabaseError> {
    let removed = conn.execute(
        "DELETE FROM document_work_orders
         WHERE id NOT IN (
           SELECT MIN(id) FROM document_work_orders
           GROUP BY document_id, work_order_id
         )",
        [],
    )?;
    Ok(removed)
}
