#![forbid(unsafe_code)]

mod collection;
mod settings;

pub use settings::*;

use crate::StoreError;
use agg_core::{Bucket, BucketAttributes, Range};
use collection::{TimeSeriesCollection, table_name, validate_sql_name};
use rusqlite::Connection;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Grouped range query over one time series.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TimeSeriesQuery {
    pub filter: BucketAttributes,
    pub group_by: Vec<String>,
    pub range: Option<Range>,
    /// Coarsest collection not exceeding this resolution is used; the main one when unset.
    pub resolution_ms: Option<i64>,
}

impl TimeSeriesQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filter.insert(key.into(), value.into());
        self
    }

    pub fn group_by(mut self, keys: &[&str]) -> Self {
        self.group_by = keys.iter().map(|key| key.to_string()).collect();
        self
    }

    pub fn range(mut self, range: Option<Range>) -> Self {
        self.range = range;
        self
    }

    pub fn resolution(mut self, resolution_ms: i64) -> Self {
        self.resolution_ms = Some(resolution_ms);
        self
    }
}

/// Bucketed counter store: points are aligned to each collection's resolution, buffered in
/// memory and upserted into SQLite on flush.
#[derive(Debug)]
pub struct TimeSeries {
    conn: Connection,
    collections: Vec<TimeSeriesCollection>,
    closed: bool,
}

impl TimeSeries {
    pub fn open(
        path: impl AsRef<Path>,
        name: &str,
        settings: &TimeSeriesSettings,
    ) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::with_connection(conn, name, settings)
    }

    /// Private to this instance; everything is gone once it is dropped.
    pub fn in_memory(name: &str, settings: &TimeSeriesSettings) -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?, name, settings)
    }

    fn with_connection(
        conn: Connection,
        name: &str,
        settings: &TimeSeriesSettings,
    ) -> Result<Self, StoreError> {
        validate_sql_name(name)?;
        let now = now_ms();
        let mut collections = vec![TimeSeriesCollection::new(
            name.to_string(),
            settings.main_resolution_ms,
            settings.main_flush_interval_ms,
            settings.flush_series_queue_size,
            now,
        )?];

        for (resolution, resolution_settings) in &settings.resolutions {
            let collection_name = format!("{name}_{}", resolution.name());
            if resolution_settings.enabled {
                collections.push(TimeSeriesCollection::new(
                    collection_name,
                    resolution.millis(),
                    resolution_settings.flush_interval_ms,
                    settings.flush_series_queue_size,
                    now,
                )?);
            } else {
                // Disabled resolutions are dropped entirely.
                conn.execute_batch(&format!(
                    "DROP TABLE IF EXISTS {};",
                    table_name(&collection_name)
                ))?;
            }
        }

        for collection in &collections {
            collection.install(&conn)?;
        }

        Ok(Self {
            conn,
            collections,
            closed: false,
        })
    }

    pub fn create_indexes(&self, attributes: &[&str]) -> Result<(), StoreError> {
        self.ensure_open()?;
        for collection in &self.collections {
            for attribute in attributes {
                collection.create_index(&self.conn, attribute)?;
            }
        }
        Ok(())
    }

    /// `(name, resolution)` of every active collection, main first.
    pub fn collections(&self) -> Vec<(String, i64)> {
        self.collections
            .iter()
            .map(|c| (c.name().to_string(), c.resolution_ms()))
            .collect()
    }

    pub fn pending_buckets(&self) -> usize {
        self.collections.iter().map(|c| c.pending_len()).sum()
    }

    pub fn ingest(
        &mut self,
        attributes: &BucketAttributes,
        ts_ms: i64,
        value: i64,
    ) -> Result<(), StoreError> {
        self.ensure_open()?;
        let attributes_json = serde_json::to_string(attributes)?;
        let now = now_ms();
        for collection in &mut self.collections {
            collection.ingest(&mut self.conn, &attributes_json, ts_ms, value, now)?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.flush_all()
    }

    fn flush_all(&mut self) -> Result<(), StoreError> {
        let now = now_ms();
        for collection in &mut self.collections {
            collection.flush(&mut self.conn, now)?;
        }
        Ok(())
    }

    /// Only flushed data is visible.
    pub fn query(
        &self,
        query: &TimeSeriesQuery,
    ) -> Result<BTreeMap<BucketAttributes, Bucket>, StoreError> {
        self.ensure_open()?;
        let collection = self.pick_collection(query);
        let mut out: BTreeMap<BucketAttributes, Bucket> = BTreeMap::new();
        for (attributes, bucket) in collection.select(&self.conn, &query.filter, query.range)? {
            let key: BucketAttributes = query
                .group_by
                .iter()
                .filter_map(|name| {
                    attributes
                        .get(name)
                        .map(|value| (name.clone(), value.clone()))
                })
                .collect();
            match out.get_mut(&key) {
                Some(existing) => existing.accumulate(&bucket),
                None => {
                    out.insert(key, bucket);
                }
            }
        }
        Ok(out)
    }

    fn pick_collection(&self, query: &TimeSeriesQuery) -> &TimeSeriesCollection {
        let main = &self.collections[0];
        let Some(wanted) = query.resolution_ms else {
            return main;
        };
        self.collections
            .iter()
            .filter(|c| c.resolution_ms() <= wanted)
            .filter(|c| {
                query.range.is_none_or(|range| {
                    range.from.rem_euclid(c.resolution_ms()) == 0
                        && range.to.rem_euclid(c.resolution_ms()) == 0
                })
            })
            .max_by_key(|c| c.resolution_ms())
            .unwrap_or(main)
    }

    /// Flushes what is pending, then refuses further use.
    pub fn close(&mut self) -> Result<(), StoreError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.flush_all()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }
}

impl Drop for TimeSeries {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(err) = self.flush_all() {
            tracing::error!(error = %err, "unable to flush time series on drop");
        }
    }
}

pub(crate) fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    let now = match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration,
        Err(_) => return 0,
    };

    i64::try_from(now.as_millis()).unwrap_or(i64::MAX)
}
