#![forbid(unsafe_code)]

use crate::ReportError;
use crate::builder::LiveState;
use agg_core::{Range, ReportNode, ReportNodeStatus};
use agg_storage::{LiveOperations, ReportNodeSource, ReportNodeTimeSeries};
use std::collections::{BTreeMap, BTreeSet};

/// Index, in a root-first path, of the occurrence a partial report is rebuilt from: the repeated
/// block owning the iteration nearest to the selected leaf, or the leaf itself.
///
/// Rebuilding from the block rather than from the single iteration makes the zoomed view count
/// every pass of the loop: a keyword run five times with one failure reads
/// `{PASSED: 4, FAILED: 1}`, not the one pass the selected node belongs to.
pub(crate) fn anchor_index(root_first: &[ReportNode]) -> usize {
    let leaf = root_first.len().saturating_sub(1);
    match root_first.iter().rposition(ReportNode::is_iteration) {
        Some(iteration) if iteration > 0 => iteration - 1,
        Some(iteration) => iteration,
        None => leaf,
    }
}

pub(crate) struct Ingested {
    /// Every artefact hash met below the anchor, anchor included.
    pub(crate) hashes: BTreeSet<String>,
    /// One occurrence per hash, preferring occurrences inside the requested range.
    pub(crate) last_by_hash: BTreeMap<String, ReportNode>,
    pub(crate) live: LiveState,
    pub(crate) points: usize,
}

/// Replays one occurrence subtree into a throwaway series.
pub(crate) struct PartialIngest<'s> {
    raw: &'s dyn ReportNodeSource,
    series: &'s mut ReportNodeTimeSeries,
    range: Option<Range>,
    live_operations: Option<&'s dyn LiveOperations>,
    out: Ingested,
}

impl<'s> PartialIngest<'s> {
    pub(crate) fn new(
        raw: &'s dyn ReportNodeSource,
        series: &'s mut ReportNodeTimeSeries,
        range: Option<Range>,
        live_operations: Option<&'s dyn LiveOperations>,
    ) -> Self {
        Self {
            raw,
            series,
            range,
            live_operations,
            out: Ingested {
                hashes: BTreeSet::new(),
                last_by_hash: BTreeMap::new(),
                live: LiveState::default(),
                points: 0,
            },
        }
    }

    /// RUNNING occurrences are counted whatever the execution status, so a selected occurrence left
    /// in flight by an ended execution still shows up.
    pub(crate) fn ingest(&mut self, node: ReportNode) -> Result<(), ReportError> {
        let in_range = self
            .range
            .is_none_or(|range| range.contains(node.execution_time_ms));

        if node.status == ReportNodeStatus::Running {
            if in_range {
                self.out.live.record_running(&node, self.live_operations);
            }
        } else if in_range && self.series.ingest_report_node_at(&node, node.execution_time_ms)? {
            self.out.points += 1;
        }

        let children = self.raw.children_of(&node.id)?;

        self.out.hashes.insert(node.artefact_hash.clone());
        if in_range || !self.out.last_by_hash.contains_key(&node.artefact_hash) {
            self.out.last_by_hash.insert(node.artefact_hash.clone(), node);
        }

        for child in children {
            self.ingest(child)?;
        }
        Ok(())
    }

    /// Flushes the series so its content becomes queryable.
    pub(crate) fn finish(self) -> Result<Ingested, ReportError> {
        self.series.flush()?;
        tracing::trace!(
            points = self.out.points,
            hashes = self.out.hashes.len(),
            "partial report subtree ingested"
        );
        Ok(self.out)
    }
}
