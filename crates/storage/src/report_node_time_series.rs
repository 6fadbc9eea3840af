#![forbid(unsafe_code)]

use crate::StoreError;
use crate::timeseries::{TimeSeries, TimeSeriesQuery, TimeSeriesSettings, now_ms};
use agg_core::{Bucket, BucketAttributes, Configuration, Range, ReportNode, ReportNodeStatus};
use std::collections::BTreeMap;
use std::path::Path;

pub const REPORT_NODE_TIME_SERIES: &str = "reportNodeTimeSeries";
pub const EXECUTION_ID: &str = "executionId";
pub const ARTEFACT_HASH: &str = "artefactHash";
pub const STATUS: &str = "status";

/// One point per completed report node, grouped by `(executionId, artefactHash, status)`.
#[derive(Debug)]
pub struct ReportNodeTimeSeries {
    series: TimeSeries,
}

impl ReportNodeTimeSeries {
    pub fn open(path: impl AsRef<Path>, configuration: &Configuration) -> Result<Self, StoreError> {
        let settings = TimeSeriesSettings::read(configuration, REPORT_NODE_TIME_SERIES)?;
        Self::from_series(TimeSeries::open(path, REPORT_NODE_TIME_SERIES, &settings)?)
    }

    pub fn in_memory(settings: &TimeSeriesSettings) -> Result<Self, StoreError> {
        Self::from_series(TimeSeries::in_memory(REPORT_NODE_TIME_SERIES, settings)?)
    }

    /// Single unbounded bucket, flushed only on demand. Owned by one partial report build.
    pub fn ephemeral() -> Result<Self, StoreError> {
        Self::in_memory(&TimeSeriesSettings::single_resolution(i64::MAX, 0))
    }

    fn from_series(series: TimeSeries) -> Result<Self, StoreError> {
        series.create_indexes(&[EXECUTION_ID])?;
        Ok(Self { series })
    }

    /// Returns whether a point was recorded: running, skipped and untimed nodes are ignored.
    pub fn ingest_report_node(&mut self, node: &ReportNode) -> Result<bool, StoreError> {
        self.ingest_report_node_at(node, now_ms())
    }

    pub fn ingest_report_node_at(&mut self, node: &ReportNode, ts_ms: i64) -> Result<bool, StoreError> {
        if !node.is_completed() {
            return Ok(false);
        }
        let attributes: BucketAttributes = [
            (EXECUTION_ID.to_string(), node.execution_id.clone()),
            (ARTEFACT_HASH.to_string(), node.artefact_hash.clone()),
            (STATUS.to_string(), node.status.as_str().to_string()),
        ]
        .into_iter()
        .collect();
        self.series.ingest(&attributes, ts_ms, 1)?;
        Ok(true)
    }

    pub fn query_by_execution_id_and_group_by_artefact_hash_and_statuses(
        &self,
        execution_id: &str,
        range: Option<Range>,
    ) -> Result<BTreeMap<String, BTreeMap<ReportNodeStatus, Bucket>>, StoreError> {
        let query = TimeSeriesQuery::new()
            .with_filter(EXECUTION_ID, execution_id)
            .group_by(&[ARTEFACT_HASH, STATUS])
            .range(range);

        let mut out: BTreeMap<String, BTreeMap<ReportNodeStatus, Bucket>> = BTreeMap::new();
        for (attributes, bucket) in self.series.query(&query)? {
            let (Some(hash), Some(status)) = (attributes.get(ARTEFACT_HASH), attributes.get(STATUS))
            else {
                continue;
            };
            let Some(status) = ReportNodeStatus::parse(status) else {
                tracing::warn!(status = %status, artefact_hash = %hash, "skipping unknown report node status");
                continue;
            };
            out.entry(hash.clone()).or_default().insert(status, bucket);
        }
        Ok(out)
    }

    pub fn query_by_execution_id_and_artefact_hash(
        &self,
        execution_id: &str,
        artefact_hash: &str,
        range: Option<Range>,
    ) -> Result<BTreeMap<ReportNodeStatus, u64>, StoreError> {
        let query = TimeSeriesQuery::new()
            .with_filter(EXECUTION_ID, execution_id)
            .with_filter(ARTEFACT_HASH, artefact_hash)
            .group_by(&[STATUS])
            .range(range);

        let mut out = BTreeMap::new();
        for (attributes, bucket) in self.series.query(&query)? {
            match attributes.get(STATUS).map(|s| (s, ReportNodeStatus::parse(s))) {
                Some((_, Some(status))) => {
                    *out.entry(status).or_insert(0) += bucket.count;
                }
                Some((raw, None)) => {
                    tracing::warn!(status = %raw, artefact_hash, "skipping unknown report node status");
                }
                None => {}
            }
        }
        Ok(out)
    }

    pub fn flush(&mut self) -> Result<(), StoreError> {
        self.series.flush()
    }

    pub fn close(&mut self) -> Result<(), StoreError> {
        self.series.close()
    }

    pub fn time_series(&self) -> &TimeSeries {
        &self.series
    }
}
