#![forbid(unsafe_code)]
#![allow(dead_code)]

use agg_core::{
    Artefact, ArtefactHashGenerator, ArtefactKind, Configuration, Execution, ExecutionStatus,
    ParentSource, ReportNode, ReportNodeStatus, ResolvedPlanNode,
};
use agg_report::{AggregatedReportConfig, AggregatedReportViewBuilder, ReportSources};
use agg_storage::{ReportNodeTimeSeries, SqliteStore};
use std::collections::HashMap;
use std::path::PathBuf;

pub(crate) const EXECUTION_ID: &str = "exec-1";

pub(crate) fn temp_dir(test_name: &str) -> PathBuf {
    let base = std::env::temp_dir();
    let pid = std::process::id();
    let nonce = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let dir = base.join(format!("agg_report_{test_name}_{pid}_{nonce}"));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

/// Plays the execution engine: stores the plan and occurrences, feeds the persisted series.
pub(crate) struct Fixture {
    pub(crate) dir: PathBuf,
    pub(crate) store: SqliteStore,
    pub(crate) series: ReportNodeTimeSeries,
    plan: HashMap<String, (String, Artefact)>,
    hashes: ArtefactHashGenerator,
    clock_ms: i64,
}

impl Fixture {
    pub(crate) fn new(test_name: &str) -> Self {
        let dir = temp_dir(test_name);
        let store = SqliteStore::open(&dir).expect("store should open");
        let config = Configuration::parse_properties(
            "reportNodeTimeSeries.resolution=1000\n\
             reportNodeTimeSeries.flush.period=0\n",
        );
        let series = ReportNodeTimeSeries::open(store.db_path(), &config).expect("series should open");
        Self {
            dir,
            store,
            series,
            plan: HashMap::new(),
            hashes: ArtefactHashGenerator,
            clock_ms: 0,
        }
    }

    pub(crate) fn execution(&mut self, status: ExecutionStatus, root_id: Option<&str>) {
        self.store
            .save_execution(&Execution {
                id: EXECUTION_ID.to_string(),
                status,
                resolved_plan_root_node_id: root_id.map(str::to_string),
            })
            .expect("execution should be saved");
    }

    /// Returns the node's artefact hash.
    pub(crate) fn plan_node(&mut self, id: &str, parent_id: Option<&str>, kind: ArtefactKind) -> String {
        let artefact = Artefact::new(format!("artefact-{id}"), id, kind);
        let hash = self.hashes.generate(None, &artefact.id);
        self.store
            .save_resolved_plan_node(&ResolvedPlanNode {
                id: id.to_string(),
                parent_id: parent_id.map(str::to_string),
                artefact_hash: hash.clone(),
                artefact: artefact.clone(),
                parent_source: ParentSource::Main,
            })
            .expect("plan node should be saved");
        self.plan.insert(id.to_string(), (hash.clone(), artefact));
        hash
    }

    pub(crate) fn hash_of(&self, plan_id: &str) -> String {
        self.plan[plan_id].0.clone()
    }

    /// One run of `plan_id`; terminal runs also land in the persisted series.
    pub(crate) fn occurrence(
        &mut self,
        id: &str,
        parent_id: Option<&str>,
        plan_id: &str,
        status: ReportNodeStatus,
    ) -> ReportNode {
        let (hash, artefact) = self.plan[plan_id].clone();
        self.record(id, parent_id, hash, artefact, status)
    }

    /// Work artefact of a loop pass; not part of the resolved plan.
    pub(crate) fn iteration(
        &mut self,
        id: &str,
        parent_id: &str,
        index: usize,
        status: ReportNodeStatus,
    ) -> ReportNode {
        let artefact = Artefact::iteration(format!("iteration-of-{parent_id}"), index);
        let hash = self.hashes.generate(None, &artefact.id);
        self.record(id, Some(parent_id), hash, artefact, status)
    }

    fn record(
        &mut self,
        id: &str,
        parent_id: Option<&str>,
        artefact_hash: String,
        artefact: Artefact,
        status: ReportNodeStatus,
    ) -> ReportNode {
        let execution_time_ms = self.clock_ms;
        self.clock_ms += 1_000;
        let node = ReportNode {
            id: id.to_string(),
            execution_id: EXECUTION_ID.to_string(),
            parent_id: parent_id.map(str::to_string),
            artefact_hash,
            name: artefact.name.clone(),
            status,
            duration_ms: (status != ReportNodeStatus::Running).then_some(10),
            execution_time_ms,
            path: Vec::new(),
            resolved_artefact: Some(artefact),
        };
        self.store.save_report_node(&node).expect("report node should be saved");
        self.series
            .ingest_report_node_at(&node, execution_time_ms)
            .expect("report node should be ingested");
        node
    }

    /// Saves an occurrence without feeding the series, like a node that has not finished yet.
    pub(crate) fn save_only(&mut self, node: &ReportNode) {
        self.store.save_report_node(node).expect("report node should be saved");
    }

    pub(crate) fn flush(&mut self) {
        self.series.flush().expect("series should flush");
    }

    pub(crate) fn sources(&self) -> ReportSources<'_> {
        ReportSources::new(&self.store, &self.series)
    }

    pub(crate) fn builder(&self) -> AggregatedReportViewBuilder<'_> {
        self.builder_with(AggregatedReportConfig::default())
    }

    pub(crate) fn builder_with(&self, config: AggregatedReportConfig) -> AggregatedReportViewBuilder<'_> {
        AggregatedReportViewBuilder::new(self.sources(), config, EXECUTION_ID)
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

/// `Root -> Loop -> Keyword`, five passes, the third one failing.
pub(crate) fn loop_execution(test_name: &str, status: ExecutionStatus) -> Fixture {
    let mut fx = Fixture::new(test_name);
    fx.execution(status, Some("root"));
    fx.plan_node("root", None, ArtefactKind::TestCase);
    fx.plan_node("loop", Some("root"), ArtefactKind::For);
    fx.plan_node("keyword", Some("loop"), ArtefactKind::CallKeyword);

    fx.occurrence("r1", None, "root", ReportNodeStatus::Failed);
    fx.occurrence("l1", Some("r1"), "loop", ReportNodeStatus::Failed);
    for i in 1..=5 {
        let status = if i == 3 {
            ReportNodeStatus::Failed
        } else {
            ReportNodeStatus::Passed
        };
        fx.iteration(&format!("it{i}"), "l1", i, status);
        fx.occurrence(&format!("kw{i}"), Some(&format!("it{i}")), "keyword", status);
    }
    fx.flush();
    fx
}
