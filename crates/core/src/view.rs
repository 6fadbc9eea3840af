#![forbid(unsafe_code)]

use crate::{Artefact, ArtefactKind, Bucket, Operation, ParentSource, Range, ReportNode, ReportNodeStatus};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Key of the synthetic rollup entry in `buckets_by_status`.
pub const ALL_STATUSES_BUCKET: &str = "ALL";

/// Query options for one aggregated report.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedReportViewRequest {
    #[serde(default)]
    pub range: Option<Range>,
    /// Overrides the configured default when set.
    #[serde(default)]
    pub resolve_single_instance_report: Option<bool>,
    /// Switches to partial mode.
    #[serde(default)]
    pub selected_report_node_id: Option<String>,
    /// Partial mode only: restrict traversal to what was actually re-ingested.
    #[serde(default)]
    pub filter_resolved_plan_nodes: bool,
    /// Empty means no filter.
    #[serde(default)]
    pub filter_artefact_classes: BTreeSet<ArtefactKind>,
    #[serde(default)]
    pub fetch_current_operations: bool,
}

impl AggregatedReportViewRequest {
    pub fn full() -> Self {
        Self::default()
    }

    pub fn partial(selected_report_node_id: impl Into<String>) -> Self {
        Self {
            selected_report_node_id: Some(selected_report_node_id.into()),
            ..Self::default()
        }
    }

    pub fn is_included(&self, kind: ArtefactKind) -> bool {
        self.filter_artefact_classes.is_empty() || self.filter_artefact_classes.contains(&kind)
    }
}

/// Statistics of one structural node; the list projection is made of these.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedNodeView {
    pub artefact: Artefact,
    pub artefact_hash: String,
    pub count_by_status: BTreeMap<ReportNodeStatus, u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buckets_by_status: Option<BTreeMap<String, Bucket>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub single_instance_report_node: Option<ReportNode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub current_operations: Vec<Operation>,
}

pub type FlatAggregatedReportView = AggregatedNodeView;

impl AggregatedNodeView {
    /// Node of a filtered-out artefact: carries no statistics.
    pub fn without_statistics(artefact: Artefact, artefact_hash: String) -> Self {
        Self {
            artefact,
            artefact_hash,
            count_by_status: BTreeMap::new(),
            buckets_by_status: None,
            single_instance_report_node: None,
            current_operations: Vec::new(),
        }
    }

    pub fn count_total(&self) -> u64 {
        self.count_by_status.values().copied().sum()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedReportView {
    #[serde(flatten)]
    pub node: AggregatedNodeView,
    pub children: Vec<AggregatedReportView>,
    pub has_descendant_invocations: bool,
    pub parent_source: ParentSource,
}

impl AggregatedReportView {
    pub fn count_total(&self) -> u64 {
        self.node.count_total()
    }

    pub fn artefact_hash(&self) -> &str {
        &self.node.artefact_hash
    }

    /// Depth-first search by artefact hash, self included.
    pub fn find(&self, artefact_hash: &str) -> Option<&AggregatedReportView> {
        if self.node.artefact_hash == artefact_hash {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(artefact_hash))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedReport {
    pub aggregated_report_view: AggregatedReportView,
    /// Partial mode: occurrence ids from the execution root down to the anchor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_partial_path: Option<Vec<String>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlatAggregatedReport {
    pub aggregated_report_views: Vec<FlatAggregatedReportView>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_partial_path: Option<Vec<String>>,
}
