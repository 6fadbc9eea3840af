#![forbid(unsafe_code)]

use crate::partial::{PartialIngest, anchor_index};
use crate::{AggregatedReportConfig, ReportError, ResolvedPlanCache, ResolvedPlanTree};
use agg_core::{
    ALL_STATUSES_BUCKET, AggregatedNodeView, AggregatedReport, AggregatedReportView,
    AggregatedReportViewRequest, Bucket, FlatAggregatedReport, FlatAggregatedReportView,
    Operation, ReportNode, ReportNodeStatus, ResolvedPlanNode,
};
use agg_storage::{
    ExecutionSource, InMemoryReportNodeStore, LiveOperations, ReportNodeSource,
    ReportNodeTimeSeries, ResolvedPlanSource,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

type StatsByHash = BTreeMap<String, BTreeMap<ReportNodeStatus, Bucket>>;

/// Read-only collaborators of one builder.
#[derive(Clone, Copy)]
pub struct ReportSources<'a> {
    pub executions: &'a dyn ExecutionSource,
    pub plans: &'a dyn ResolvedPlanSource,
    pub report_nodes: &'a dyn ReportNodeSource,
    pub time_series: &'a ReportNodeTimeSeries,
    pub live_operations: Option<&'a dyn LiveOperations>,
    pub plan_cache: Option<&'a ResolvedPlanCache>,
}

impl<'a> ReportSources<'a> {
    pub fn new<S>(store: &'a S, time_series: &'a ReportNodeTimeSeries) -> Self
    where
        S: ExecutionSource + ResolvedPlanSource + ReportNodeSource,
    {
        Self {
            executions: store,
            plans: store,
            report_nodes: store,
            time_series,
            live_operations: None,
            plan_cache: None,
        }
    }

    pub fn with_live_operations(mut self, live_operations: &'a dyn LiveOperations) -> Self {
        self.live_operations = Some(live_operations);
        self
    }

    pub fn with_plan_cache(mut self, plan_cache: &'a ResolvedPlanCache) -> Self {
        self.plan_cache = Some(plan_cache);
        self
    }
}

/// In-flight occurrences seen while preparing one report.
#[derive(Debug, Default)]
pub(crate) struct LiveState {
    pub(crate) running_by_hash: HashMap<String, u64>,
    pub(crate) operations_by_hash: HashMap<String, Vec<Operation>>,
}

impl LiveState {
    pub(crate) fn record_running(
        &mut self,
        node: &ReportNode,
        live_operations: Option<&dyn LiveOperations>,
    ) {
        *self
            .running_by_hash
            .entry(node.artefact_hash.clone())
            .or_insert(0) += 1;
        if let Some(live_operations) = live_operations {
            let operations = live_operations.by_report_node_id(&node.id);
            if !operations.is_empty() {
                self.operations_by_hash
                    .entry(node.artefact_hash.clone())
                    .or_default()
                    .extend(operations);
            }
        }
    }
}

struct TreeInputs<'r> {
    request: &'r AggregatedReportViewRequest,
    stats: &'r StatsByHash,
    raw: &'r dyn ReportNodeSource,
    allowed_hashes: Option<&'r BTreeSet<String>>,
    live: &'r LiveState,
    resolve_single_instance: bool,
}

pub struct AggregatedReportViewBuilder<'a> {
    sources: ReportSources<'a>,
    config: AggregatedReportConfig,
    execution_id: String,
}

impl<'a> AggregatedReportViewBuilder<'a> {
    pub fn new(
        sources: ReportSources<'a>,
        config: AggregatedReportConfig,
        execution_id: impl Into<String>,
    ) -> Self {
        Self {
            sources,
            config,
            execution_id: execution_id.into(),
        }
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// `Ok(None)` while the execution's plan is not resolved yet.
    pub fn build_aggregated_report(
        &self,
        request: &AggregatedReportViewRequest,
    ) -> Result<Option<AggregatedReport>, ReportError> {
        let execution = self
            .sources
            .executions
            .execution(&self.execution_id)?
            .ok_or_else(|| ReportError::UnknownExecution(self.execution_id.clone()))?;

        let Some(root_id) = execution.resolved_plan_root_node_id.as_deref() else {
            tracing::debug!(execution_id = %self.execution_id, "resolved plan not available yet");
            return Ok(None);
        };
        let Some(tree) = self.load_tree(root_id)? else {
            tracing::debug!(execution_id = %self.execution_id, root_id, "resolved plan root not found");
            return Ok(None);
        };

        let live = execution.status.is_live();
        let report = match request.selected_report_node_id.as_deref() {
            None => self.build_full(&tree, request, live)?,
            Some(selected) => self.build_partial(&tree, request, selected)?,
        };
        Ok(Some(report))
    }

    pub fn build_aggregated_report_view(
        &self,
        request: &AggregatedReportViewRequest,
    ) -> Result<Option<AggregatedReportView>, ReportError> {
        Ok(self
            .build_aggregated_report(request)?
            .map(|report| report.aggregated_report_view))
    }

    pub fn build_flat_aggregated_report(
        &self,
        request: &AggregatedReportViewRequest,
    ) -> Result<Option<FlatAggregatedReport>, ReportError> {
        Ok(self.build_aggregated_report(request)?.map(|report| {
            let mut aggregated_report_views = Vec::new();
            flatten(&report.aggregated_report_view, request, &mut aggregated_report_views);
            FlatAggregatedReport {
                aggregated_report_views,
                resolved_partial_path: report.resolved_partial_path,
            }
        }))
    }

    fn load_tree(&self, root_id: &str) -> Result<Option<Arc<ResolvedPlanTree>>, ReportError> {
        let tree = match self.sources.plan_cache {
            Some(cache) => cache.get_or_load(&self.execution_id, root_id, self.sources.plans)?,
            None => ResolvedPlanTree::load(self.sources.plans, root_id)?.map(Arc::new),
        };
        Ok(tree)
    }

    fn resolve_single_instance(&self, request: &AggregatedReportViewRequest) -> bool {
        request
            .resolve_single_instance_report
            .unwrap_or(self.config.resolve_single_instance)
    }

    fn live_operations(&self, request: &AggregatedReportViewRequest) -> Option<&'a dyn LiveOperations> {
        if request.fetch_current_operations {
            self.sources.live_operations
        } else {
            None
        }
    }

    fn build_full(
        &self,
        tree: &ResolvedPlanTree,
        request: &AggregatedReportViewRequest,
        live: bool,
    ) -> Result<AggregatedReport, ReportError> {
        tracing::debug!(execution_id = %self.execution_id, live, "building full aggregated report");

        let mut live_state = LiveState::default();
        if live {
            let live_operations = self.live_operations(request);
            self.sources.report_nodes.stream_running(
                &self.execution_id,
                request.range,
                &mut |node| live_state.record_running(&node, live_operations),
            )?;
        }

        let stats = self
            .sources
            .time_series
            .query_by_execution_id_and_group_by_artefact_hash_and_statuses(
                &self.execution_id,
                request.range,
            )?;

        let inputs = TreeInputs {
            request,
            stats: &stats,
            raw: self.sources.report_nodes,
            allowed_hashes: None,
            live: &live_state,
            resolve_single_instance: self.resolve_single_instance(request),
        };
        Ok(AggregatedReport {
            aggregated_report_view: self.build_node(tree, tree.root(), &inputs, true)?,
            resolved_partial_path: None,
        })
    }

    fn build_partial(
        &self,
        tree: &ResolvedPlanTree,
        request: &AggregatedReportViewRequest,
        selected: &str,
    ) -> Result<AggregatedReport, ReportError> {
        let mut path = self.sources.report_nodes.path_to_root(selected)?;
        match path.first() {
            None => return Err(ReportError::UnknownReportNode(selected.to_string())),
            Some(leaf) if leaf.id != selected => {
                return Err(ReportError::PathMismatch {
                    selected: selected.to_string(),
                    found: leaf.id.clone(),
                });
            }
            Some(leaf) if leaf.execution_id != self.execution_id => {
                return Err(ReportError::UnknownReportNode(selected.to_string()));
            }
            Some(_) => {}
        }
        path.reverse();

        let anchor = anchor_index(&path);
        tracing::debug!(
            execution_id = %self.execution_id,
            selected,
            anchor = %path[anchor].id,
            "building partial aggregated report"
        );

        let mut series = ReportNodeTimeSeries::ephemeral()?;
        let built = self.build_partial_with(tree, request, &path[..=anchor], &mut series);
        if let Err(err) = series.close() {
            tracing::error!(error = %err, "unable to close the ephemeral report node time series");
        }
        built
    }

    fn build_partial_with(
        &self,
        tree: &ResolvedPlanTree,
        request: &AggregatedReportViewRequest,
        root_to_anchor: &[ReportNode],
        series: &mut ReportNodeTimeSeries,
    ) -> Result<AggregatedReport, ReportError> {
        let Some(anchor) = root_to_anchor.last() else {
            return Err(ReportError::UnknownReportNode(String::new()));
        };

        let mut ingest = PartialIngest::new(
            self.sources.report_nodes,
            series,
            request.range,
            self.live_operations(request),
        );
        ingest.ingest(anchor.clone())?;
        let ingested = ingest.finish()?;

        let stats = series.query_by_execution_id_and_group_by_artefact_hash_and_statuses(
            &self.execution_id,
            None,
        )?;

        let mut single_instances = InMemoryReportNodeStore::new();
        single_instances.save_all(ingested.last_by_hash.into_values());

        let allowed_hashes = request.filter_resolved_plan_nodes.then(|| {
            let mut allowed = ingested.hashes;
            allowed.extend(root_to_anchor.iter().map(|node| node.artefact_hash.clone()));
            allowed
        });

        let inputs = TreeInputs {
            request,
            stats: &stats,
            raw: &single_instances,
            allowed_hashes: allowed_hashes.as_ref(),
            live: &ingested.live,
            resolve_single_instance: self.resolve_single_instance(request),
        };
        Ok(AggregatedReport {
            aggregated_report_view: self.build_node(tree, tree.root(), &inputs, true)?,
            resolved_partial_path: Some(root_to_anchor.iter().map(|node| node.id.clone()).collect()),
        })
    }

    fn build_node(
        &self,
        tree: &ResolvedPlanTree,
        node: &ResolvedPlanNode,
        inputs: &TreeInputs<'_>,
        is_root: bool,
    ) -> Result<AggregatedReportView, ReportError> {
        let mut children = Vec::new();
        for child in tree.children(&node.id) {
            if inputs
                .allowed_hashes
                .is_some_and(|allowed| !allowed.contains(&child.artefact_hash))
            {
                continue;
            }
            let child_view = self.build_node(tree, child, inputs, false)?;
            if inputs.request.is_included(child_view.node.artefact.kind) {
                children.push(child_view);
            } else {
                // Splice: the excluded layer disappears, its children take its place.
                children.extend(child_view.children);
            }
        }

        let node_view = if is_root || inputs.request.is_included(node.artefact.kind) {
            self.node_statistics(node, inputs)?
        } else {
            AggregatedNodeView::without_statistics(node.artefact.clone(), node.artefact_hash.clone())
        };

        let has_descendant_invocations = children
            .iter()
            .any(|child| child.has_descendant_invocations || child.count_total() > 0);

        Ok(AggregatedReportView {
            node: node_view,
            children,
            has_descendant_invocations,
            parent_source: node.parent_source,
        })
    }

    fn node_statistics(
        &self,
        node: &ResolvedPlanNode,
        inputs: &TreeInputs<'_>,
    ) -> Result<AggregatedNodeView, ReportError> {
        let hash = node.artefact_hash.as_str();
        let buckets = inputs.stats.get(hash).filter(|buckets| !buckets.is_empty());

        let mut count_by_status: BTreeMap<ReportNodeStatus, u64> = buckets
            .into_iter()
            .flatten()
            .map(|(status, bucket)| (*status, bucket.count))
            .collect();
        if let Some(running) = inputs.live.running_by_hash.get(hash).copied().filter(|c| *c > 0) {
            *count_by_status.entry(ReportNodeStatus::Running).or_insert(0) += running;
        }

        let buckets_by_status = buckets.map(|buckets| {
            let mut out: BTreeMap<String, Bucket> = buckets
                .iter()
                .map(|(status, bucket)| (status.as_str().to_string(), bucket.clone()))
                .collect();
            if let Some(all) = Bucket::merged(buckets.values()) {
                out.insert(ALL_STATUSES_BUCKET.to_string(), all);
            }
            out
        });

        let total: u64 = count_by_status.values().sum();
        let single_instance_report_node = if inputs.resolve_single_instance && total == 1 {
            self.single_instance(inputs, hash)?
        } else {
            None
        };

        let current_operations = if inputs.request.fetch_current_operations {
            inputs
                .live
                .operations_by_hash
                .get(hash)
                .cloned()
                .unwrap_or_default()
        } else {
            Vec::new()
        };

        Ok(AggregatedNodeView {
            artefact: node.artefact.clone(),
            artefact_hash: node.artefact_hash.clone(),
            count_by_status,
            buckets_by_status,
            single_instance_report_node,
            current_operations,
        })
    }

    fn single_instance(
        &self,
        inputs: &TreeInputs<'_>,
        artefact_hash: &str,
    ) -> Result<Option<ReportNode>, ReportError> {
        let mut found = Vec::with_capacity(2);
        inputs.raw.stream_by_artefact_hash(
            &self.execution_id,
            artefact_hash,
            inputs.request.range,
            0,
            2,
            &mut |node| found.push(node),
        )?;
        if found.len() == 1 {
            return Ok(found.pop());
        }
        let found = if found.is_empty() { "no" } else { "more than one" };
        tracing::error!(
            execution_id = %self.execution_id,
            artefact_hash,
            found,
            range = ?inputs.request.range,
            "unexpected number of report nodes for a single instance"
        );
        Ok(None)
    }
}

/// Pre-order list of the nodes passing the artefact filter; children of excluded nodes still
/// appear.
pub fn flatten(
    view: &AggregatedReportView,
    request: &AggregatedReportViewRequest,
    out: &mut Vec<FlatAggregatedReportView>,
) {
    if request.is_included(view.node.artefact.kind) {
        out.push(view.node.clone());
    }
    for child in &view.children {
        flatten(child, request, out);
    }
}

#[cfg(test)]
mod tests;
