//! Duplicate-merge engine.
//!
//! Work orders whose identifiers normalize to the same value get
//! collapsed into the earliest-created row. Each group is one
//! transaction: a failing group rolls back alone and the rest stand.

use std::collections::BTreeMap;

use chrono::Utc;
use rusqlite::Connection;

use crate::db::work_order_repo::WorkOrderRow;
use crate::db::{document_repo, work_order_repo, Database, DatabaseError};
use crate::normalize::normalize_identifier;

/// Result of merging one duplicate group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub keeper_id: i64,
    pub merged_count: usize,
}

/// Merges all duplicate work-order groups. Returns one outcome per
/// merged group; failing groups are logged and skipped.
pub fn merge_duplicates(db: &Database) -> Result<Vec<MergeOutcome>, DatabaseError> {
    let _span = tracing::info_span!("merge.duplicates").entered();

    let all = db.with_conn(work_order_repo::list_all)?;

    // list_all orders by created_at then id, so the first row of every
    // group is the keeper.
    let mut groups: BTreeMap<String, Vec<WorkOrderRow>> = BTreeMap::new();
    for row in all {
        let Some(normalized) = normalize_identifier(&row.identifier) else {
            continue;
        };
        groups.entry(normalized).or_default().push(row);
    }

    let mut outcomes = Vec::new();
    for (normalized, group) in groups {
        if group.len() < 2 {
            continue;
        }
        let keeper_id = group[0].id;
        let merged_count = group.len() - 1;

        let result = db.with_tx(|conn| merge_group(conn, &normalized, group));
        match result {
            Ok(()) => {
                log::info!(
                    "Merged {} duplicates of {} into work order {}",
                    merged_count,
                    normalized,
                    keeper_id
                );
                outcomes.push(MergeOutcome {
                    keeper_id,
                    merged_count,
                });
            }
            Err(e) => {
                log::warn!("Skipping duplicate group {}: {}", normalized, e);
            }
        }
    }

    // Two losers from different groups can leave duplicate links on a
    // shared document; collapse whatever remains.
    let removed = db.with_conn(work_order_repo::collapse_duplicate_associations)?;
    if removed > 0 {
        log::info!("Collapsed {} residual duplicate associations", removed);
    }

    Ok(outcomes)
}

fn merge_group(
    conn: &Connection,
    normalized: &str,
    mut group: Vec<WorkOrderRow>,
) -> Result<(), DatabaseError> {
    let mut keeper = group.remove(0);
    let losers = group;
    let merged_count = losers.len();

    for loser in losers {
        work_order_repo::repoint_associations(conn, loser.id, keeper.id)?;

        for document_id in document_repo::list_parsed_ids(conn)? {
            document_repo::rewrite_applied_work_order_id(conn, document_id, loser.id, keeper.id)?;
        }

        work_order_repo::repoint_events(conn, loser.id, keeper.id)?;

        absorb_fields(&mut keeper, &loser);

        if loser.status == "chiuso" && keeper.status != "chiuso" {
            keeper.status = "chiuso".to_string();
            keeper.closed_at = loser
                .closed_at
                .clone()
                .or_else(|| Some(Utc::now().to_rfc3339()));
            keeper.closing_technician_id =
                keeper.closing_technician_id.or(loser.closing_technician_id);
        }

        work_order_repo::delete(conn, loser.id)?;
    }

    keeper.identifier = normalized.to_string();
    work_order_repo::update(conn, &keeper)?;
    work_order_repo::insert_event(
        conn,
        keeper.id,
        "merged_duplicates",
        Some(&format!(
            "absorbed {} duplicates of {}",
            merged_count, normalized
        )),
    )?;
    Ok(())
}

/// Fills empty keeper fields from the loser. The keeper wins every
/// conflict; a literal "unknown" placeholder counts as empty.
fn absorb_fields(keeper: &mut WorkOrderRow, loser: &WorkOrderRow) {
    fill_if_empty(&mut keeper.operator, &loser.operator);
    fill_if_empty(&mut keeper.address, &loser.address);
    fill_if_empty(&mut keeper.customer_name, &loser.customer_name);
    fill_if_empty(&mut keeper.job_type, &loser.job_type);
    fill_if_empty(&mut keeper.opened_at, &loser.opened_at);
    fill_if_empty(&mut keeper.note, &loser.note);
    if keeper.assigned_technician_id.is_none() {
        keeper.assigned_technician_id = loser.assigned_technician_id;
    }
    for (key, value) in &loser.extra_fields {
        keeper
            .extra_fields
            .entry(key.clone())
            .or_insert_with(|| value.clone());
    }
}

fn is_empty_field(value: &Option<String>) -> bool {
    match value {
        None => true,
        Some(v) => {
            let v = v.trim();
            v.is_empty() || v.eq_ignore_ascii_case("unknown")
        }
    }
}

fn fill_if_empty(slot: &mut Option<String>, from: &Option<String>) {
    if is_empty_field(slot) && !is_empty_field(from) {
        *slot = from.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::document_repo;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn insert_work_order(db: &Database, identifier: &str, created_at: &str) -> i64 {
        db.with_conn(|conn| {
            work_order_repo::insert(
                conn,
                &WorkOrderRow {
                    id: 0,
                    identifier: identifier.to_string(),
                    operator: None,
                    address: None,
                    customer_name: None,
                    job_type: None,
                    status: "aperto".to_string(),
                    opened_at: None,
                    closed_at: None,
                    assigned_technician_id: None,
                    closing_technician_id: None,
                    note: None,
                    extra_fields: Default::default(),
                    created_at: created_at.to_string(),
                },
            )
        })
        .unwrap()
    }

    #[test]
    fn test_merge_keeps_earliest_created() {
        let db = test_db();
        let late = insert_work_order(&db, "WR-100", "2026-02-01T00:00:00Z");
        let early = insert_work_order(&db, "100", "2026-01-01T00:00:00Z");

        let outcomes = merge_duplicates(&db).unwrap();
        assert_eq!(
            outcomes,
            vec![MergeOutcome {
                keeper_id: early,
                merged_count: 1
            }]
        );

        let keeper = db
            .with_conn(|conn| work_order_repo::find_by_id(conn, early))
            .unwrap()
            .unwrap();
        assert_eq!(keeper.identifier, "WR-100");
        assert!(db
            .with_conn(|conn| work_order_repo::find_by_id(conn, late))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_merge_fills_empty_keeper_fields() {
        let db = test_db();
        let keeper = insert_work_order(&db, "WR-200", "2026-01-01T00:00:00Z");
        db.with_conn(|conn| {
            let mut row = work_order_repo::find_by_id(conn, keeper)?.unwrap();
            row.operator = Some("unknown".to_string());
            row.customer_name = Some("Mario Rossi".to_string());
            work_order_repo::update(conn, &row)
        })
        .unwrap();

        let loser = insert_work_order(&db, "200", "2026-02-01T00:00:00Z");
        db.with_conn(|conn| {
            let mut row = work_order_repo::find_by_id(conn, loser)?.unwrap();
            row.operator = Some("Open Fiber".to_string());
            row.customer_name = Some("Conflicting Name".to_string());
            row.extra_fields
                .insert("Splitter".to_string(), "SPL-9".to_string());
            work_order_repo::update(conn, &row)
        })
        .unwrap();

        merge_duplicates(&db).unwrap();

        let merged = db
            .with_conn(|conn| work_order_repo::find_by_id(conn, keeper))
            .unwrap()
            .unwrap();
        // "unknown" counts as empty, so the loser's operator lands.
        assert_eq!(merged.operator.as_deref(), Some("Open Fiber"));
        // The keeper's real value wins the conflict.
        assert_eq!(merged.customer_name.as_deref(), Some("Mario Rossi"));
        assert_eq!(merged.extra_fields.get("Splitter").unwrap(), "SPL-9");
    }

    #[test]
    fn test_merge_promotes_closed_status() {
        let db = test_db();
        let keeper = insert_work_order(&db, "WR-300", "2026-01-01T00:00:00Z");
        let loser = insert_work_order(&db, "300", "2026-02-01T00:00:00Z");
        db.with_conn(|conn| {
            let mut row = work_order_repo::find_by_id(conn, loser)?.unwrap();
            row.status = "chiuso".to_string();
            row.closed_at = Some("2026-02-15T00:00:00Z".to_string());
            work_order_repo::update(conn, &row)
        })
        .unwrap();

        merge_duplicates(&db).unwrap();

        let merged = db
            .with_conn(|conn| work_order_repo::find_by_id(conn, keeper))
            .unwrap()
            .unwrap();
        assert_eq!(merged.status, "chiuso");
        assert_eq!(merged.closed_at.as_deref(), Some("2026-02-15T00:00:00Z"));
    }

    #[test]
    fn test_merge_repoints_associations_and_events() {
        let db = test_db();
        let doc = db
            .with_conn(|conn| document_repo::store(conn, "d.pdf", None, b"x"))
            .unwrap();
        let keeper = insert_work_order(&db, "WR-400", "2026-01-01T00:00:00Z");
        let loser = insert_work_order(&db, "400", "2026-02-01T00:00:00Z");

        db.with_conn(|conn| {
            work_order_repo::ensure_association(conn, doc, keeper)?;
            work_order_repo::ensure_association(conn, doc, loser)?;
            work_order_repo::insert_event(conn, loser, "created", None)?;
            Ok(())
        })
        .unwrap();

        merge_duplicates(&db).unwrap();

        let docs = db
            .with_conn(|conn| work_order_repo::documents_for_work_order(conn, keeper))
            .unwrap();
        assert_eq!(docs, vec![doc]);

        let links: u32 = db
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM document_work_orders",
                    [],
                    |r| r.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(links, 1);

        let events = db
            .with_conn(|conn| work_order_repo::list_events(conn, keeper))
            .unwrap();
        let types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert!(types.contains(&"created"));
        assert!(types.contains(&"merged_duplicates"));
    }

    #[test]
    fn test_merge_rewrites_applied_ids_in_parse_results() {
        let db = test_db();
        let keeper = insert_work_order(&db, "WR-500", "2026-01-01T00:00:00Z");
        let loser = insert_work_order(&db, "500", "2026-02-01T00:00:00Z");

        let doc = db
            .with_conn(|conn| {
                let id = document_repo::store(conn, "d.pdf", None, b"x")?;
                document_repo::set_parse_result(
                    conn,
                    id,
                    &format!(
                        r#"{{"entries":[],"applied_work_order_ids":[{},{}]}}"#,
                        keeper, loser
                    ),
                )?;
                Ok(id)
            })
            .unwrap();

        merge_duplicates(&db).unwrap();

        let stored = db
            .with_conn(|conn| document_repo::find_by_id(conn, doc))
            .unwrap()
            .unwrap();
        let value: serde_json::Value =
            serde_json::from_str(stored.parse_result.as_deref().unwrap()).unwrap();
        assert_eq!(
            value["applied_work_order_ids"],
            serde_json::json!([keeper])
        );
    }

    #[test]
    fn test_merge_ignores_singletons_and_unnormalizable() {
        let db = test_db();
        insert_work_order(&db, "WR-600", "2026-01-01T00:00:00Z");
        insert_work_order(&db, "ABC/XYZ", "2026-01-01T00:00:00Z");

        let outcomes = merge_duplicates(&db).unwrap();
        assert!(outcomes.is_empty());

        let rows = db.with_conn(work_order_repo::list_all).unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_three_duplicates_on_one_document_leave_one_association() {
        let db = test_db();
        let doc = db
            .with_conn(|conn| document_repo::store(conn, "d.pdf", None, b"x"))
            .unwrap();
        let a = insert_work_order(&db, "800", "2026-01-01T00:00:00Z");
        let b = insert_work_order(&db, "WR-800", "2026-02-01T00:00:00Z");
        let c = insert_work_order(&db, "WR_800", "2026-03-01T00:00:00Z");
        db.with_conn(|conn| {
            for wo in [a, b, c] {
                work_order_repo::ensure_association(conn, doc, wo)?;
            }
            Ok(())
        })
        .unwrap();

        merge_duplicates(&db).unwrap();

        let links: u32 = db
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM document_work_orders",
                    [],
                    |r| r.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(links, 1);
        let docs = db
            .with_conn(|conn| work_order_repo::documents_for_work_order(conn, a))
            .unwrap();
        assert_eq!(docs, vec![doc]);
    }

    #[test]
    fn test_merge_three_way_group() {
        let db = test_db();
        let keeper = insert_work_order(&db, "700", "2026-01-01T00:00:00Z");
        insert_work_order(&db, "WR-700", "2026-02-01T00:00:00Z");
        insert_work_order(&db, "WR_700", "2026-03-01T00:00:00Z");

        let outcomes = merge_duplicates(&db).unwrap();
        assert_eq!(
            outcomes,
            vec![MergeOutcome {
                keeper_id: keeper,
                merged_count: 2
            }]
        );

        let rows = db.with_conn(work_order_repo::list_all).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].identifier, "WR-700");
    }
}
