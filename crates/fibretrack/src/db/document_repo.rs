//! Document repository — CRUD operations for the `documents` table.
//!
//! Functions take a `&Connection` so callers can compose them inside
//! a single transaction (`Database::with_tx`) or run them standalone
//! (`Database::with_conn`).

use chrono::Utc;
use rusqlite::{params, Connection, Row};

use super::DatabaseError;

/// A raw document row from the database.
#[derive(Debug, Clone)]
pub struct DocumentRow {
    pub id: i64,
    pub filename: String,
    pub mime: Option<String>,
    pub content: Vec<u8>,
    pub uploaded_at: String,
    pub parsed: bool,
    pub parse_result: Option<String>,
}

impl DocumentRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            filename: row.get("filename")?,
            mime: row.get("mime")?,
            content: row.get("content")?,
            uploaded_at: row.get("uploaded_at")?,
            parsed: row.get::<_, i64>("parsed")? != 0,
            parse_result: row.get("parse_result")?,
        })
    }
}

/// Stores a new document, guessing the MIME type from the filename
/// when none is given. Returns the new row id.
pub fn store(
    conn: &Connection,
    filename: &str,
    mime: Option<&str>,
    content: &[u8],
) -> Result<i64, DatabaseError> {
    let mime = match mime {
        Some(m) if !m.trim().is_empty() => Some(m.to_string()),
        _ => mime_guess::from_path(filename)
            .first()
            .map(|m| m.essence_str().to_string()),
    };
    let uploaded_at = Utc::now().to_rfc3339();

    conn.execute(
        "INSERT INTO documents (filename, mime, content, uploaded_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![filename, mime, content, uploaded_at],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Finds a document by its ID.
pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<DocumentRow>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM documents WHERE id = ?1")?;
    let mut rows = stmt.query_map(params![id], DocumentRow::from_row)?;
    match rows.next() {
        Some(Ok(row)) => Ok(Some(row)),
        Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
        None => Ok(None),
    }
}

/// Lists all documents, newest first.
pub fn list(conn: &Connection) -> Result<Vec<DocumentRow>, DatabaseError> {
    let mut stmt =
        conn.prepare("SELECT * FROM documents ORDER BY uploaded_at DESC, id DESC")?;
    let rows: Vec<DocumentRow> = stmt
        .query_map([], DocumentRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Deletes a document. Associations cascade.
pub fn delete(conn: &Connection, id: i64) -> Result<bool, DatabaseError> {
    let affected = conn.execute("DELETE FROM documents WHERE id = ?1", params![id])?;
    Ok(affected > 0)
}

/// Stores the JSON parse result for a document and marks it parsed.
pub fn set_parse_result(
    conn: &Connection,
    id: i64,
    parse_result: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE documents SET parsed = 1, parse_result = ?2 WHERE id = ?1",
        params![id, parse_result],
    )?;
    Ok(())
}

/// Lists ids of documents that carry a stored parse result.
pub fn list_parsed_ids(conn: &Connection) -> Result<Vec<i64>, DatabaseError> {
    let mut stmt =
        conn.prepare("SELECT id FROM documents WHERE parse_result IS NOT NULL")?;
    let ids: Vec<i64> = stmt
        .query_map([], |r| r.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

/// Rewrites work-order ids inside a stored parse result's
/// `applied_work_order_ids` list, replacing `from` with `to` and
/// deduplicating. Used when merging duplicates repoints history.
pub fn rewrite_applied_work_order_id(
    conn: &Connection,
    document_id: i64,
    from: i64,
    to: i64,
) -> Result<(), DatabaseError> {
    let stored: Option<String> = conn.query_row(
        "SELECT parse_result FROM documents WHERE id = ?1",
        params![document_id],
        |r| r.get(0),
    )?;
    let Some(raw) = stored else {
        return Ok(());
    };

    let mut value: serde_json::Value =
        serde_json::from_str(&raw).map_err(|e| DatabaseError::CorruptJson {
            column: "parse_result",
            reason: e.to_string(),
        })?;

    let Some(ids) = value
        .get_mut("applied_work_order_ids")
        .and_then(|v| v.as_array_mut())
    else {
        return Ok(());
    };

    let mut seen = Vec::new();
    let mut changed = false;
    for entry in ids.iter() {
        let mut id = match entry.as_i64() {
            Some(id) => id,
            None => continue,
        };
        if id == from {
            id = to;
            changed = true;
        }
        if !seen.contains(&id) {
            seen.push(id);
        } else {
            changed = true;
        }
    }
    if !changed {
        return Ok(());
    }

    *ids = seen.into_iter().map(serde_json::Value::from).collect();
    let rewritten = serde_json::to_string(&value).map_err(|e| DatabaseError::CorruptJson {
        column: "parse_result",
        reason: e.to_string(),
    })?;
    conn.execute(
        "UPDATE documents SET parse_result = ?2 WHERE id = ?1",
        params![document_id, rewritten],
    )?;
    Ok(())
}

/// Replaces the `applied_work_order_ids` list in a stored parse
/// result. Each apply records its own outcome over the previous one;
/// the association table keeps the full history.
pub fn set_applied_work_order_ids(
    conn: &Connection,
    document_id: i64,
    work_order_ids: &[i64],
) -> Result<(), DatabaseError> {
    let stored: Option<String> = conn.query_row(
        "SELECT parse_result FROM documents WHERE id = ?1",
        params![document_id],
        |r| r.get(0),
    )?;
    let Some(raw) = stored else {
        return Ok(());
    };

    let mut value: serde_json::Value =
        serde_json::from_str(&raw).map_err(|e| DatabaseError::CorruptJson {
            column: "parse_result",
            reason: e.to_string(),
        })?;
    let Some(obj) = value.as_object_mut() else {
        return Ok(());
    };

    obj.insert(
        "applied_work_order_ids".to_string(),
        serde_json::Value::from(work_order_ids.to_vec()),
    );

    let rewritten = serde_json::to_string(&value).map_err(|e| DatabaseError::CorruptJson {
        column: "parse_result",
        reason: e.to_string(),
    })?;
    conn.execute(
        "UPDATE documents SET parse_result = ?2 WHERE id = ?1",
        params![document_id, rewritten],
    )?;
    Ok(())
}
