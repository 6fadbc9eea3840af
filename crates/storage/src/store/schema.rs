#![forbid(unsafe_code)]

use super::StoreError;
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::BTreeSet;

pub(super) const SCHEMA_VERSION: i64 = 1;

const REQUIRED_TABLES: [&str; 4] = [
    "store_state",
    "executions",
    "resolved_plan_nodes",
    "report_nodes",
];

/// Refuses databases written by something else or by another schema version.
pub(super) fn preflight_gate(conn: &Connection) -> Result<(), StoreError> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
    )?;
    let mut rows = stmt.query([])?;
    let mut tables = BTreeSet::new();
    while let Some(row) = rows.next()? {
        tables.insert(row.get::<_, String>(0)?);
    }

    if tables.is_empty() {
        return Ok(());
    }

    let required: BTreeSet<&str> = REQUIRED_TABLES.into_iter().collect();
    // Time series tables may share the file.
    if tables
        .iter()
        .any(|table| !required.contains(table.as_str()) && !table.starts_with("ts_"))
    {
        return Err(StoreError::InvalidInput(
            "RESET_REQUIRED: unsupported tables detected",
        ));
    }

    for table in required {
        if !tables.contains(table) {
            return Err(StoreError::InvalidInput(
                "RESET_REQUIRED: required table is missing",
            ));
        }
    }

    let version = conn
        .query_row(
            "SELECT schema_version FROM store_state WHERE singleton=1",
            [],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;

    match version {
        Some(v) if v == SCHEMA_VERSION => Ok(()),
        Some(_) => Err(StoreError::InvalidInput(
            "RESET_REQUIRED: schema version mismatch",
        )),
        None => Err(StoreError::InvalidInput(
            "RESET_REQUIRED: schema state row is missing",
        )),
    }
}

pub(super) fn install_schema(conn: &Connection, now_ms: i64) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS store_state (
          singleton INTEGER PRIMARY KEY CHECK(singleton = 1),
          schema_version INTEGER NOT NULL,
          created_at_ms INTEGER NOT NULL,
          updated_at_ms INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS executions (
          id TEXT PRIMARY KEY,
          status TEXT NOT NULL,
          resolved_plan_root_node_id TEXT,
          updated_at_ms INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS resolved_plan_nodes (
          id TEXT PRIMARY KEY,
          seq INTEGER NOT NULL,
          parent_id TEXT,
          artefact_hash TEXT NOT NULL,
          parent_source TEXT NOT NULL,
          artefact_json TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS report_nodes (
          id TEXT PRIMARY KEY,
          seq INTEGER NOT NULL,
          execution_id TEXT NOT NULL,
          parent_id TEXT,
          artefact_hash TEXT NOT NULL,
          name TEXT NOT NULL,
          status TEXT NOT NULL,
          duration_ms INTEGER,
          execution_time_ms INTEGER NOT NULL,
          path_json TEXT NOT NULL,
          resolved_artefact_json TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_resolved_plan_nodes_parent
          ON resolved_plan_nodes(parent_id, seq);
        CREATE INDEX IF NOT EXISTS idx_report_nodes_status
          ON report_nodes(execution_id, status, execution_time_ms, seq);
        CREATE INDEX IF NOT EXISTS idx_report_nodes_hash
          ON report_nodes(execution_id, artefact_hash, execution_time_ms, seq);
        CREATE INDEX IF NOT EXISTS idx_report_nodes_parent
          ON report_nodes(parent_id, execution_time_ms, seq);
        "#,
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO store_state(singleton, schema_version, created_at_ms, updated_at_ms) \
         VALUES (1, ?1, ?2, ?2)",
        params![SCHEMA_VERSION, now_ms],
    )?;
    Ok(())
}
