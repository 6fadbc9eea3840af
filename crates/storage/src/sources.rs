#![forbid(unsafe_code)]

use crate::StoreError;
use agg_core::{Execution, Operation, Range, ReportNode, ResolvedPlanNode};
use std::collections::HashMap;
use std::sync::RwLock;

pub trait ExecutionSource {
    fn execution(&self, execution_id: &str) -> Result<Option<Execution>, StoreError>;
}

/// Read side of the static, per-execution resolved plan tree.
pub trait ResolvedPlanSource {
    fn resolved_plan_node(&self, id: &str) -> Result<Option<ResolvedPlanNode>, StoreError>;

    /// Children in plan order. The cursor is released before this returns.
    fn for_each_child(
        &self,
        parent_id: &str,
        visit: &mut dyn FnMut(ResolvedPlanNode),
    ) -> Result<(), StoreError>;

    fn resolved_children_of(&self, parent_id: &str) -> Result<Vec<ResolvedPlanNode>, StoreError> {
        let mut out = Vec::new();
        self.for_each_child(parent_id, &mut |node| out.push(node))?;
        Ok(out)
    }
}

/// Read side of the raw report node (occurrence) store.
pub trait ReportNodeSource {
    fn report_node(&self, id: &str) -> Result<Option<ReportNode>, StoreError>;

    /// Occurrences of `execution_id` currently in RUNNING state.
    fn stream_running(
        &self,
        execution_id: &str,
        range: Option<Range>,
        visit: &mut dyn FnMut(ReportNode),
    ) -> Result<(), StoreError>;

    fn stream_by_artefact_hash(
        &self,
        execution_id: &str,
        artefact_hash: &str,
        range: Option<Range>,
        skip: usize,
        limit: usize,
        visit: &mut dyn FnMut(ReportNode),
    ) -> Result<(), StoreError>;

    /// Leaf first, root last; empty when `id` is unknown.
    fn path_to_root(&self, id: &str) -> Result<Vec<ReportNode>, StoreError>;

    fn children_of(&self, id: &str) -> Result<Vec<ReportNode>, StoreError>;
}

pub trait LiveOperations {
    fn by_report_node_id(&self, report_node_id: &str) -> Vec<Operation>;
}

/// Operations registry fed by the agent-side telemetry, keyed by report node id.
#[derive(Debug, Default)]
pub struct InMemoryLiveOperations {
    operations: RwLock<HashMap<String, Vec<Operation>>>,
}

impl InMemoryLiveOperations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, operation: Operation) {
        let mut guard = match self.operations.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard
            .entry(operation.report_node_id.clone())
            .or_default()
            .push(operation);
    }

    pub fn clear(&self, report_node_id: &str) {
        let mut guard = match self.operations.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.remove(report_node_id);
    }
}

impl LiveOperations for InMemoryLiveOperations {
    fn by_report_node_id(&self, report_node_id: &str) -> Vec<Operation> {
        let guard = match self.operations.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.get(report_node_id).cloned().unwrap_or_default()
    }
}

pub(crate) fn in_range(range: Option<Range>, ts_ms: i64) -> bool {
    range.is_none_or(|range| range.contains(ts_ms))
}
