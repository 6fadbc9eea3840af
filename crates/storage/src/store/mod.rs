#![forbid(unsafe_code)]

mod error;
mod schema;

pub use error::StoreError;

use crate::sources::{ExecutionSource, ReportNodeSource, ResolvedPlanSource};
use crate::timeseries::now_ms;
use agg_core::ids::canonical_identifier;
use agg_core::{
    Artefact, Execution, ExecutionStatus, ParentSource, Range, ReportNode, ReportNodeStatus,
    ResolvedPlanNode,
};
use rusqlite::{Connection, Row, params};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DB_FILE_NAME: &str = "aggregated_report.db";
const MAX_PATH_DEPTH: usize = 1024;

const REPORT_NODE_COLUMNS: &str = "id, execution_id, parent_id, artefact_hash, name, status, \
     duration_ms, execution_time_ms, path_json, resolved_artefact_json";

/// Raw side of the report: executions, the resolved plan tree and every report node occurrence.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
    storage_dir: PathBuf,
}

impl SqliteStore {
    pub fn open(storage_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let storage_dir = storage_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&storage_dir)?;

        let conn = Connection::open(storage_dir.join(DB_FILE_NAME))?;
        conn.busy_timeout(Duration::from_secs(5))?;

        schema::preflight_gate(&conn)?;
        schema::install_schema(&conn, now_ms())?;

        Ok(Self { conn, storage_dir })
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub fn db_path(&self) -> PathBuf {
        self.storage_dir.join(DB_FILE_NAME)
    }

    pub fn save_execution(&mut self, execution: &Execution) -> Result<(), StoreError> {
        let id = canonicalize("execution_id", &execution.id)?;
        let root_id = execution
            .resolved_plan_root_node_id
            .as_deref()
            .map(|value| canonicalize("resolved_plan_root_node_id", value))
            .transpose()?;

        self.conn.execute(
            "INSERT INTO executions(id, status, resolved_plan_root_node_id, updated_at_ms) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(id) DO UPDATE SET \
               status=excluded.status, \
               resolved_plan_root_node_id=excluded.resolved_plan_root_node_id, \
               updated_at_ms=excluded.updated_at_ms",
            params![id, execution.status.as_str(), root_id, now_ms()],
        )?;
        Ok(())
    }

    /// Children are returned in the order they were first saved.
    pub fn save_resolved_plan_node(&mut self, node: &ResolvedPlanNode) -> Result<(), StoreError> {
        let id = canonicalize("resolved_plan_node_id", &node.id)?;
        let parent_id = node
            .parent_id
            .as_deref()
            .map(|value| canonicalize("parent_id", value))
            .transpose()?;
        let artefact_json = serde_json::to_string(&node.artefact)?;

        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO resolved_plan_nodes(id, seq, parent_id, artefact_hash, parent_source, artefact_json) \
             VALUES (?1, (SELECT COALESCE(MAX(seq), 0) + 1 FROM resolved_plan_nodes), ?2, ?3, ?4, ?5) \
             ON CONFLICT(id) DO UPDATE SET \
               parent_id=excluded.parent_id, \
               artefact_hash=excluded.artefact_hash, \
               parent_source=excluded.parent_source, \
               artefact_json=excluded.artefact_json",
            params![
                id,
                parent_id,
                node.artefact_hash,
                node.parent_source.as_str(),
                artefact_json,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Upsert: status transitions of one occurrence overwrite it in place.
    pub fn save_report_node(&mut self, node: &ReportNode) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        upsert_report_node_tx(&tx, node)?;
        tx.commit()?;
        Ok(())
    }

    pub fn save_report_nodes<'a>(
        &mut self,
        nodes: impl IntoIterator<Item = &'a ReportNode>,
    ) -> Result<usize, StoreError> {
        let tx = self.conn.transaction()?;
        let mut saved = 0;
        for node in nodes {
            upsert_report_node_tx(&tx, node)?;
            saved += 1;
        }
        tx.commit()?;
        Ok(saved)
    }

    fn query_report_nodes(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
        visit: &mut dyn FnMut(ReportNode),
    ) -> Result<(), StoreError> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(params)?;
        while let Some(row) = rows.next()? {
            visit(report_node_from_row(row)?);
        }
        Ok(())
    }
}

impl ExecutionSource for SqliteStore {
    fn execution(&self, execution_id: &str) -> Result<Option<Execution>, StoreError> {
        let id = canonicalize("execution_id", execution_id)?;
        let mut stmt = self.conn.prepare(
            "SELECT id, status, resolved_plan_root_node_id FROM executions WHERE id=?1",
        )?;
        let mut rows = stmt.query(params![id])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        let status = row.get::<_, String>(1)?;
        Ok(Some(Execution {
            id: row.get(0)?,
            status: ExecutionStatus::parse(&status)
                .ok_or(StoreError::InvalidInput("invalid execution status row"))?,
            resolved_plan_root_node_id: row.get(2)?,
        }))
    }
}

impl ResolvedPlanSource for SqliteStore {
    fn resolved_plan_node(&self, id: &str) -> Result<Option<ResolvedPlanNode>, StoreError> {
        let id = canonicalize("resolved_plan_node_id", id)?;
        let mut stmt = self.conn.prepare(
            "SELECT id, parent_id, artefact_hash, parent_source, artefact_json \
             FROM resolved_plan_nodes WHERE id=?1",
        )?;
        let mut rows = stmt.query(params![id])?;
        match rows.next()? {
            Some(row) => Ok(Some(resolved_plan_node_from_row(row)?)),
            None => Ok(None),
        }
    }

    fn for_each_child(
        &self,
        parent_id: &str,
        visit: &mut dyn FnMut(ResolvedPlanNode),
    ) -> Result<(), StoreError> {
        let parent_id = canonicalize("parent_id", parent_id)?;
        let mut stmt = self.conn.prepare(
            "SELECT id, parent_id, artefact_hash, parent_source, artefact_json \
             FROM resolved_plan_nodes WHERE parent_id=?1 ORDER BY seq ASC",
        )?;
        let mut rows = stmt.query(params![parent_id])?;
        while let Some(row) = rows.next()? {
            visit(resolved_plan_node_from_row(row)?);
        }
        Ok(())
    }
}

impl ReportNodeSource for SqliteStore {
    fn report_node(&self, id: &str) -> Result<Option<ReportNode>, StoreError> {
        let id = canonicalize("report_node_id", id)?;
        let mut found = None;
        self.query_report_nodes(
            &format!("SELECT {REPORT_NODE_COLUMNS} FROM report_nodes WHERE id=?1"),
            params![id],
            &mut |node| found = Some(node),
        )?;
        Ok(found)
    }

    fn stream_running(
        &self,
        execution_id: &str,
        range: Option<Range>,
        visit: &mut dyn FnMut(ReportNode),
    ) -> Result<(), StoreError> {
        let execution_id = canonicalize("execution_id", execution_id)?;
        let (from, to) = range_bounds(range);
        self.query_report_nodes(
            &format!(
                "SELECT {REPORT_NODE_COLUMNS} FROM report_nodes \
                 WHERE execution_id=?1 AND status=?2 \
                   AND (?3 IS NULL OR execution_time_ms >= ?3) \
                   AND (?4 IS NULL OR execution_time_ms < ?4) \
                 ORDER BY execution_time_ms ASC, seq ASC"
            ),
            params![execution_id, ReportNodeStatus::Running.as_str(), from, to],
            visit,
        )
    }

    fn stream_by_artefact_hash(
        &self,
        execution_id: &str,
        artefact_hash: &str,
        range: Option<Range>,
        skip: usize,
        limit: usize,
        visit: &mut dyn FnMut(ReportNode),
    ) -> Result<(), StoreError> {
        let execution_id = canonicalize("execution_id", execution_id)?;
        let (from, to) = range_bounds(range);
        let offset = to_sqlite_i64(skip)?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.query_report_nodes(
            &format!(
                "SELECT {REPORT_NODE_COLUMNS} FROM report_nodes \
                 WHERE execution_id=?1 AND artefact_hash=?2 \
                   AND (?3 IS NULL OR execution_time_ms >= ?3) \
                   AND (?4 IS NULL OR execution_time_ms < ?4) \
                 ORDER BY execution_time_ms ASC, seq ASC \
                 LIMIT ?5 OFFSET ?6"
            ),
            params![execution_id, artefact_hash, from, to, limit, offset],
            visit,
        )
    }

    fn path_to_root(&self, id: &str) -> Result<Vec<ReportNode>, StoreError> {
        let mut out = Vec::new();
        let mut seen = BTreeSet::new();
        let mut current = self.report_node(id)?;
        while let Some(node) = current {
            if !seen.insert(node.id.clone()) || out.len() >= MAX_PATH_DEPTH {
                return Err(StoreError::InvalidInput("report node ancestry is cyclic"));
            }
            current = match node.parent_id.as_deref() {
                Some(parent_id) => self.report_node(parent_id)?,
                None => None,
            };
            out.push(node);
        }
        Ok(out)
    }

    fn children_of(&self, id: &str) -> Result<Vec<ReportNode>, StoreError> {
        let id = canonicalize("report_node_id", id)?;
        let mut out = Vec::new();
        self.query_report_nodes(
            &format!(
                "SELECT {REPORT_NODE_COLUMNS} FROM report_nodes WHERE parent_id=?1 \
                 ORDER BY execution_time_ms ASC, seq ASC"
            ),
            params![id],
            &mut |node| out.push(node),
        )?;
        Ok(out)
    }
}

fn upsert_report_node_tx(tx: &rusqlite::Transaction<'_>, node: &ReportNode) -> Result<(), StoreError> {
    let id = canonicalize("report_node_id", &node.id)?;
    let execution_id = canonicalize("execution_id", &node.execution_id)?;
    let parent_id = node
        .parent_id
        .as_deref()
        .map(|value| canonicalize("parent_id", value))
        .transpose()?;
    let path_json = serde_json::to_string(&node.path)?;
    let resolved_artefact_json = node
        .resolved_artefact
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    tx.execute(
        "INSERT INTO report_nodes(id, seq, execution_id, parent_id, artefact_hash, name, status, \
           duration_ms, execution_time_ms, path_json, resolved_artefact_json) \
         VALUES (?1, (SELECT COALESCE(MAX(seq), 0) + 1 FROM report_nodes), ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) \
         ON CONFLICT(id) DO UPDATE SET \
           execution_id=excluded.execution_id, \
           parent_id=excluded.parent_id, \
           artefact_hash=excluded.artefact_hash, \
           name=excluded.name, \
           status=excluded.status, \
           duration_ms=excluded.duration_ms, \
           execution_time_ms=excluded.execution_time_ms, \
           path_json=excluded.path_json, \
           resolved_artefact_json=excluded.resolved_artefact_json",
        params![
            id,
            execution_id,
            parent_id,
            node.artefact_hash,
            node.name,
            node.status.as_str(),
            node.duration_ms,
            node.execution_time_ms,
            path_json,
            resolved_artefact_json,
        ],
    )?;
    Ok(())
}

fn report_node_from_row(row: &Row<'_>) -> Result<ReportNode, StoreError> {
    let status = row.get::<_, String>(5)?;
    let path_json = row.get::<_, String>(8)?;
    let resolved_artefact = row
        .get::<_, Option<String>>(9)?
        .map(|raw| serde_json::from_str::<Artefact>(&raw))
        .transpose()?;

    Ok(ReportNode {
        id: row.get(0)?,
        execution_id: row.get(1)?,
        parent_id: row.get(2)?,
        artefact_hash: row.get(3)?,
        name: row.get(4)?,
        status: ReportNodeStatus::parse(&status)
            .ok_or(StoreError::InvalidInput("invalid report node status row"))?,
        duration_ms: row.get(6)?,
        execution_time_ms: row.get(7)?,
        path: serde_json::from_str(&path_json)?,
        resolved_artefact,
    })
}

fn resolved_plan_node_from_row(row: &Row<'_>) -> Result<ResolvedPlanNode, StoreError> {
    let parent_source = row.get::<_, String>(3)?;
    let artefact_json = row.get::<_, String>(4)?;
    Ok(ResolvedPlanNode {
        id: row.get(0)?,
        parent_id: row.get(1)?,
        artefact_hash: row.get(2)?,
        parent_source: ParentSource::parse(&parent_source)
            .ok_or(StoreError::InvalidInput("invalid parent source row"))?,
        artefact: serde_json::from_str(&artefact_json)?,
    })
}

fn range_bounds(range: Option<Range>) -> (Option<i64>, Option<i64>) {
    match range {
        Some(range) => (Some(range.from), Some(range.to)),
        None => (None, None),
    }
}

fn to_sqlite_i64(value: usize) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::InvalidInput("numeric overflow"))
}

fn canonicalize(field: &'static str, value: &str) -> Result<String, StoreError> {
    canonical_identifier(field, value).map_err(|err| {
        tracing::debug!(error = %err, "rejected identifier");
        StoreError::InvalidInput("invalid identifier")
    })
}
