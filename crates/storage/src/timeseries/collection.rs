#![forbid(unsafe_code)]

use crate::StoreError;
use agg_core::{Bucket, BucketAttributes, Range};
use rusqlite::{Connection, params_from_iter, types::Value};
use std::collections::BTreeMap;

/// One resolution of a time series: a SQLite table plus the in-memory buckets not flushed yet.
#[derive(Debug)]
pub(super) struct TimeSeriesCollection {
    name: String,
    resolution_ms: i64,
    flush_interval_ms: i64,
    queue_size: usize,
    pending: BTreeMap<(i64, String), Bucket>,
    last_flush_ms: i64,
}

impl TimeSeriesCollection {
    pub(super) fn new(
        name: String,
        resolution_ms: i64,
        flush_interval_ms: i64,
        queue_size: usize,
        now_ms: i64,
    ) -> Result<Self, StoreError> {
        validate_sql_name(&name)?;
        if resolution_ms <= 0 {
            return Err(StoreError::InvalidInput("resolution must be positive"));
        }
        Ok(Self {
            name,
            resolution_ms,
            flush_interval_ms,
            queue_size: queue_size.max(1),
            pending: BTreeMap::new(),
            last_flush_ms: now_ms,
        })
    }

    pub(super) fn name(&self) -> &str {
        &self.name
    }

    pub(super) fn resolution_ms(&self) -> i64 {
        self.resolution_ms
    }

    pub(super) fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn table(&self) -> String {
        table_name(&self.name)
    }

    pub(super) fn install(&self, conn: &Connection) -> Result<(), StoreError> {
        let table = self.table();
        conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
              begin_ms INTEGER NOT NULL,
              end_ms INTEGER NOT NULL,
              attributes TEXT NOT NULL,
              point_count INTEGER NOT NULL,
              sum_value INTEGER NOT NULL,
              min_value INTEGER NOT NULL,
              max_value INTEGER NOT NULL,
              PRIMARY KEY(begin_ms, attributes)
            );
            "#
        ))?;
        Ok(())
    }

    pub(super) fn create_index(&self, conn: &Connection, attribute: &str) -> Result<(), StoreError> {
        validate_sql_name(attribute)?;
        let table = self.table();
        conn.execute_batch(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_{attribute} \
             ON {table}(json_extract(attributes, '$.{attribute}'), begin_ms);"
        ))?;
        Ok(())
    }

    pub(super) fn ingest(
        &mut self,
        conn: &mut Connection,
        attributes_json: &str,
        ts_ms: i64,
        value: i64,
        now_ms: i64,
    ) -> Result<(), StoreError> {
        let begin = ts_ms - ts_ms.rem_euclid(self.resolution_ms);
        let end = begin.saturating_add(self.resolution_ms);
        let point = Bucket::point(begin, end, value);
        self.pending
            .entry((begin, attributes_json.to_string()))
            .and_modify(|bucket| bucket.accumulate(&point))
            .or_insert(point);

        let interval_due =
            self.flush_interval_ms > 0 && now_ms - self.last_flush_ms >= self.flush_interval_ms;
        if interval_due || self.pending.len() >= self.queue_size {
            self.flush(conn, now_ms)?;
        }
        Ok(())
    }

    pub(super) fn flush(&mut self, conn: &mut Connection, now_ms: i64) -> Result<(), StoreError> {
        self.last_flush_ms = now_ms;
        if self.pending.is_empty() {
            return Ok(());
        }

        let table = self.table();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {table}(begin_ms, end_ms, attributes, point_count, sum_value, min_value, max_value) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
                 ON CONFLICT(begin_ms, attributes) DO UPDATE SET \
                   end_ms=MAX(end_ms, excluded.end_ms), \
                   point_count=point_count + excluded.point_count, \
                   sum_value=sum_value + excluded.sum_value, \
                   min_value=MIN(min_value, excluded.min_value), \
                   max_value=MAX(max_value, excluded.max_value)"
            ))?;
            for ((begin, attributes), bucket) in &self.pending {
                let count = i64::try_from(bucket.count)
                    .map_err(|_| StoreError::InvalidInput("bucket count overflow"))?;
                stmt.execute(rusqlite::params![
                    begin,
                    bucket.end,
                    attributes,
                    count,
                    bucket.sum,
                    bucket.min,
                    bucket.max,
                ])?;
            }
        }
        tx.commit()?;

        tracing::trace!(
            collection = %self.name,
            buckets = self.pending.len(),
            "time series flushed"
        );
        self.pending.clear();
        Ok(())
    }

    /// Persisted buckets with `from <= begin < to` whose attributes equal every filter entry.
    pub(super) fn select(
        &self,
        conn: &Connection,
        filter: &BucketAttributes,
        range: Option<Range>,
    ) -> Result<Vec<(BucketAttributes, Bucket)>, StoreError> {
        let mut sql = format!(
            "SELECT begin_ms, end_ms, attributes, point_count, sum_value, min_value, max_value \
             FROM {} WHERE 1=1",
            self.table()
        );
        let mut args: Vec<Value> = Vec::new();
        for (key, value) in filter {
            validate_sql_name(key)?;
            args.push(Value::Text(value.clone()));
            sql.push_str(&format!(
                " AND json_extract(attributes, '$.{key}') = ?{}",
                args.len()
            ));
        }
        if let Some(range) = range {
            args.push(Value::Integer(range.from));
            sql.push_str(&format!(" AND begin_ms >= ?{}", args.len()));
            args.push(Value::Integer(range.to));
            sql.push_str(&format!(" AND begin_ms < ?{}", args.len()));
        }
        sql.push_str(" ORDER BY begin_ms ASC");

        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(args))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let attributes: BucketAttributes = serde_json::from_str(&row.get::<_, String>(2)?)?;
            let count = u64::try_from(row.get::<_, i64>(3)?)
                .map_err(|_| StoreError::InvalidInput("negative bucket count"))?;
            out.push((
                attributes,
                Bucket {
                    begin: row.get(0)?,
                    end: row.get(1)?,
                    count,
                    sum: row.get(4)?,
                    min: row.get(5)?,
                    max: row.get(6)?,
                },
            ));
        }
        Ok(out)
    }
}

pub(super) fn table_name(collection_name: &str) -> String {
    format!("ts_{collection_name}")
}

/// Names end up inlined in SQL text; only `[A-Za-z0-9_]` is accepted.
pub(super) fn validate_sql_name(value: &str) -> Result<(), StoreError> {
    if value.is_empty() || value.len() > 64 {
        return Err(StoreError::InvalidInput("invalid time series name"));
    }
    if !value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(StoreError::InvalidInput("invalid time series name"));
    }
    Ok(())
}
