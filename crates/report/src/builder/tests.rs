use super::*;
use agg_core::{Artefact, ArtefactKind, Execution, ExecutionStatus, ParentSource, Range};
use agg_storage::StoreError;
use agg_storage::timeseries::TimeSeriesSettings;

struct Plan {
    execution: Option<Execution>,
    nodes: Vec<ResolvedPlanNode>,
}

impl ExecutionSource for Plan {
    fn execution(&self, execution_id: &str) -> Result<Option<Execution>, StoreError> {
        Ok(self.execution.clone().filter(|e| e.id == execution_id))
    }
}

impl ResolvedPlanSource for Plan {
    fn resolved_plan_node(&self, id: &str) -> Result<Option<ResolvedPlanNode>, StoreError> {
        Ok(self.nodes.iter().find(|node| node.id == id).cloned())
    }

    fn for_each_child(
        &self,
        parent_id: &str,
        visit: &mut dyn FnMut(ResolvedPlanNode),
    ) -> Result<(), StoreError> {
        for node in self.nodes.iter().filter(|n| n.parent_id.as_deref() == Some(parent_id)) {
            visit(node.clone());
        }
        Ok(())
    }
}

fn plan_node(id: &str, parent_id: Option<&str>, kind: ArtefactKind) -> ResolvedPlanNode {
    ResolvedPlanNode {
        id: id.to_string(),
        parent_id: parent_id.map(str::to_string),
        artefact_hash: id.to_string(),
        artefact: Artefact::new(id, id, kind),
        parent_source: ParentSource::Main,
    }
}

fn occurrence(id: &str, hash: &str, status: ReportNodeStatus) -> ReportNode {
    ReportNode {
        id: id.to_string(),
        execution_id: "e1".to_string(),
        parent_id: None,
        artefact_hash: hash.to_string(),
        name: hash.to_string(),
        status,
        duration_ms: (status != ReportNodeStatus::Running).then_some(1),
        execution_time_ms: 0,
        path: Vec::new(),
        resolved_artefact: None,
    }
}

fn plan(status: ExecutionStatus, root: Option<&str>) -> Plan {
    Plan {
        execution: Some(Execution {
            id: "e1".to_string(),
            status,
            resolved_plan_root_node_id: root.map(str::to_string),
        }),
        nodes: vec![
            plan_node("a", None, ArtefactKind::TestSet),
            plan_node("b", Some("a"), ArtefactKind::Sequence),
            plan_node("c", Some("b"), ArtefactKind::CallKeyword),
            plan_node("d", Some("a"), ArtefactKind::Echo),
        ],
    }
}

/// Raw accessor whose path and children answers are scripted.
struct ScriptedRaw {
    path: Vec<ReportNode>,
    broken_children: bool,
}

impl ReportNodeSource for ScriptedRaw {
    fn report_node(&self, id: &str) -> Result<Option<ReportNode>, StoreError> {
        Ok(self.path.iter().find(|node| node.id == id).cloned())
    }

    fn stream_running(
        &self,
        _execution_id: &str,
        _range: Option<Range>,
        _visit: &mut dyn FnMut(ReportNode),
    ) -> Result<(), StoreError> {
        Ok(())
    }

    fn stream_by_artefact_hash(
        &self,
        _execution_id: &str,
        _artefact_hash: &str,
        _range: Option<Range>,
        _skip: usize,
        _limit: usize,
        _visit: &mut dyn FnMut(ReportNode),
    ) -> Result<(), StoreError> {
        Ok(())
    }

    fn path_to_root(&self, _id: &str) -> Result<Vec<ReportNode>, StoreError> {
        Ok(self.path.clone())
    }

    fn children_of(&self, _id: &str) -> Result<Vec<ReportNode>, StoreError> {
        if self.broken_children {
            return Err(StoreError::UnknownId);
        }
        Ok(Vec::new())
    }
}

fn persisted(nodes: &[ReportNode]) -> (InMemoryReportNodeStore, ReportNodeTimeSeries) {
    let mut raw = InMemoryReportNodeStore::new();
    let mut series =
        ReportNodeTimeSeries::in_memory(&TimeSeriesSettings::single_resolution(1_000, 0)).unwrap();
    for node in nodes {
        series.ingest_report_node_at(node, node.execution_time_ms).unwrap();
        raw.save(node.clone());
    }
    series.flush().unwrap();
    (raw, series)
}

fn sources<'a>(
    plan: &'a Plan,
    raw: &'a dyn ReportNodeSource,
    series: &'a ReportNodeTimeSeries,
) -> ReportSources<'a> {
    ReportSources {
        executions: plan,
        plans: plan,
        report_nodes: raw,
        time_series: series,
        live_operations: None,
        plan_cache: None,
    }
}

#[test]
fn excluded_layer_is_spliced_without_touching_descendants() {
    let plan = plan(ExecutionStatus::Ended, Some("a"));
    let (raw, series) = persisted(&[
        occurrence("c1", "c", ReportNodeStatus::Passed),
        occurrence("c2", "c", ReportNodeStatus::Failed),
        occurrence("b1", "b", ReportNodeStatus::Passed),
    ]);
    let builder =
        AggregatedReportViewBuilder::new(sources(&plan, &raw, &series), AggregatedReportConfig::default(), "e1");

    let mut request = AggregatedReportViewRequest::full();
    request.filter_artefact_classes = [ArtefactKind::CallKeyword, ArtefactKind::Echo].into();
    let view = builder.build_aggregated_report_view(&request).unwrap().unwrap();

    let children: Vec<&str> = view.children.iter().map(|c| c.artefact_hash()).collect();
    assert_eq!(children, vec!["c", "d"]);
    let c = &view.children[0];
    assert_eq!(
        c.node.count_by_status,
        BTreeMap::from([(ReportNodeStatus::Passed, 1), (ReportNodeStatus::Failed, 1)])
    );
    assert!(view.find("b").is_none());
    assert!(view.has_descendant_invocations);

    let unfiltered = builder
        .build_aggregated_report_view(&AggregatedReportViewRequest::full())
        .unwrap()
        .unwrap();
    assert_eq!(
        unfiltered.find("c").unwrap().node.count_by_status,
        c.node.count_by_status
    );
}

#[test]
fn running_occurrences_merge_into_persisted_counts_of_live_executions() {
    let mut nodes: Vec<ReportNode> = (0..3)
        .map(|i| occurrence(&format!("c{i}"), "c", ReportNodeStatus::Passed))
        .collect();
    nodes.push(occurrence("c-running", "c", ReportNodeStatus::Running));
    let (raw, series) = persisted(&nodes);

    let live = plan(ExecutionStatus::Running, Some("a"));
    let builder =
        AggregatedReportViewBuilder::new(sources(&live, &raw, &series), AggregatedReportConfig::default(), "e1");
    let view = builder
        .build_aggregated_report_view(&AggregatedReportViewRequest::full())
        .unwrap()
        .unwrap();
    let c = view.find("c").unwrap();
    assert_eq!(
        c.node.count_by_status,
        BTreeMap::from([(ReportNodeStatus::Passed, 3), (ReportNodeStatus::Running, 1)])
    );
    assert_eq!(c.count_total(), 4);

    let buckets = c.node.buckets_by_status.as_ref().expect("persisted buckets");
    assert_eq!(buckets.len(), 2);
    assert_eq!(buckets["PASSED"].count, 3);
    assert_eq!(buckets[ALL_STATUSES_BUCKET].count, 3);
    assert!(!buckets.contains_key("RUNNING"));

    let ended = plan(ExecutionStatus::Ended, Some("a"));
    let builder =
        AggregatedReportViewBuilder::new(sources(&ended, &raw, &series), AggregatedReportConfig::default(), "e1");
    let view = builder
        .build_aggregated_report_view(&AggregatedReportViewRequest::full())
        .unwrap()
        .unwrap();
    assert_eq!(view.find("c").unwrap().count_total(), 3);
}

#[test]
fn untouched_nodes_have_no_buckets_and_no_invocations() {
    let plan = plan(ExecutionStatus::Ended, Some("a"));
    let (raw, series) = persisted(&[occurrence("d1", "d", ReportNodeStatus::Passed)]);
    let builder =
        AggregatedReportViewBuilder::new(sources(&plan, &raw, &series), AggregatedReportConfig::default(), "e1");
    let view = builder
        .build_aggregated_report_view(&AggregatedReportViewRequest::full())
        .unwrap()
        .unwrap();

    let b = view.find("b").unwrap();
    assert_eq!(b.count_total(), 0);
    assert!(b.node.buckets_by_status.is_none());
    assert!(!b.has_descendant_invocations);
    assert!(view.has_descendant_invocations);
    assert!(b.node.single_instance_report_node.is_none());

    let d = view.find("d").unwrap();
    assert_eq!(
        d.node.single_instance_report_node.as_ref().map(|n| n.id.as_str()),
        Some("d1")
    );
}

#[test]
fn missing_plan_root_is_not_an_error_but_missing_execution_is() {
    let (raw, series) = persisted(&[]);

    let unresolved = plan(ExecutionStatus::Initializing, None);
    let builder = AggregatedReportViewBuilder::new(
        sources(&unresolved, &raw, &series),
        AggregatedReportConfig::default(),
        "e1",
    );
    assert!(builder.build_aggregated_report(&AggregatedReportViewRequest::full()).unwrap().is_none());

    let dangling = plan(ExecutionStatus::Running, Some("not-stored"));
    let builder =
        AggregatedReportViewBuilder::new(sources(&dangling, &raw, &series), AggregatedReportConfig::default(), "e1");
    assert!(builder.build_aggregated_report(&AggregatedReportViewRequest::full()).unwrap().is_none());

    let builder =
        AggregatedReportViewBuilder::new(sources(&dangling, &raw, &series), AggregatedReportConfig::default(), "e2");
    let err = builder
        .build_aggregated_report(&AggregatedReportViewRequest::full())
        .unwrap_err();
    assert_eq!(err.code(), "UNKNOWN_EXECUTION");
}

#[test]
fn flatten_is_pre_order_and_filters_every_node() {
    let plan = plan(ExecutionStatus::Ended, Some("a"));
    let (raw, series) = persisted(&[occurrence("c1", "c", ReportNodeStatus::Passed)]);
    let builder =
        AggregatedReportViewBuilder::new(sources(&plan, &raw, &series), AggregatedReportConfig::default(), "e1");

    let flat = builder
        .build_flat_aggregated_report(&AggregatedReportViewRequest::full())
        .unwrap()
        .unwrap();
    let hashes: Vec<&str> = flat
        .aggregated_report_views
        .iter()
        .map(|v| v.artefact_hash.as_str())
        .collect();
    assert_eq!(hashes, vec!["a", "b", "c", "d"]);
    assert!(flat.resolved_partial_path.is_none());

    let mut request = AggregatedReportViewRequest::full();
    request.filter_artefact_classes = [ArtefactKind::CallKeyword].into();
    let flat = builder.build_flat_aggregated_report(&request).unwrap().unwrap();
    let hashes: Vec<&str> = flat
        .aggregated_report_views
        .iter()
        .map(|v| v.artefact_hash.as_str())
        .collect();
    assert_eq!(hashes, vec!["c"]);
}

#[test]
fn single_instance_detail_is_dropped_when_the_raw_store_disagrees() {
    let plan = plan(ExecutionStatus::Ended, Some("a"));
    let (_, series) = persisted(&[occurrence("d1", "d", ReportNodeStatus::Passed)]);
    let empty_raw = InMemoryReportNodeStore::new();
    let builder = AggregatedReportViewBuilder::new(
        sources(&plan, &empty_raw, &series),
        AggregatedReportConfig::default(),
        "e1",
    );
    let view = builder
        .build_aggregated_report_view(&AggregatedReportViewRequest::full())
        .unwrap()
        .unwrap();

    let d = view.find("d").unwrap();
    assert_eq!(
        d.node.count_by_status,
        BTreeMap::from([(ReportNodeStatus::Passed, 1)])
    );
    assert!(d.node.single_instance_report_node.is_none());
}

#[test]
fn path_headed_by_another_occurrence_is_a_mismatch() {
    let plan = plan(ExecutionStatus::Ended, Some("a"));
    let (_, series) = persisted(&[]);
    let raw = ScriptedRaw {
        path: vec![occurrence("other", "c", ReportNodeStatus::Passed)],
        broken_children: false,
    };
    let builder =
        AggregatedReportViewBuilder::new(sources(&plan, &raw, &series), AggregatedReportConfig::default(), "e1");

    let err = builder
        .build_aggregated_report(&AggregatedReportViewRequest::partial("c1"))
        .unwrap_err();
    assert_eq!(err.code(), "PATH_MISMATCH");
    assert!(matches!(
        err,
        ReportError::PathMismatch { ref selected, ref found } if selected == "c1" && found == "other"
    ));
}

#[test]
fn store_failure_during_partial_ingest_propagates_unchanged() {
    let plan = plan(ExecutionStatus::Ended, Some("a"));
    let (_, series) = persisted(&[]);
    let raw = ScriptedRaw {
        path: vec![occurrence("c1", "c", ReportNodeStatus::Passed)],
        broken_children: true,
    };
    let builder =
        AggregatedReportViewBuilder::new(sources(&plan, &raw, &series), AggregatedReportConfig::default(), "e1");

    let err = builder
        .build_aggregated_report(&AggregatedReportViewRequest::partial("c1"))
        .unwrap_err();
    assert!(matches!(err, ReportError::Store(StoreError::UnknownId)));
    assert_eq!(err.code(), "UNKNOWN_ID");

    let healthy = ScriptedRaw {
        path: vec![occurrence("c1", "c", ReportNodeStatus::Passed)],
        broken_children: false,
    };
    let builder = AggregatedReportViewBuilder::new(
        sources(&plan, &healthy, &series),
        AggregatedReportConfig::default(),
        "e1",
    );
    let view = builder
        .build_aggregated_report_view(&AggregatedReportViewRequest::partial("c1"))
        .unwrap()
        .unwrap();
    assert_eq!(view.find("c").unwrap().count_total(), 1);
}
