#![forbid(unsafe_code)]

use crate::sources::in_range;
use crate::{ReportNodeSource, StoreError};
use agg_core::{Range, ReportNode, ReportNodeStatus};
use std::collections::{BTreeMap, BTreeSet};

const MAX_PATH_DEPTH: usize = 1024;

/// Throwaway occurrence store. Iteration follows insertion order, like the SQLite store's
/// `(execution_time, seq)` ordering does for nodes saved in execution order.
#[derive(Clone, Debug, Default)]
pub struct InMemoryReportNodeStore {
    nodes: BTreeMap<String, (u64, ReportNode)>,
    next_seq: u64,
}

impl InMemoryReportNodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save(&mut self, node: ReportNode) {
        let seq = match self.nodes.get(&node.id) {
            Some((seq, _)) => *seq,
            None => {
                self.next_seq += 1;
                self.next_seq
            }
        };
        self.nodes.insert(node.id.clone(), (seq, node));
    }

    pub fn save_all(&mut self, nodes: impl IntoIterator<Item = ReportNode>) {
        for node in nodes {
            self.save(node);
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn ordered(&self) -> Vec<&ReportNode> {
        let mut out: Vec<(i64, u64, &ReportNode)> = self
            .nodes
            .values()
            .map(|(seq, node)| (node.execution_time_ms, *seq, node))
            .collect();
        out.sort_by_key(|(ts, seq, _)| (*ts, *seq));
        out.into_iter().map(|(_, _, node)| node).collect()
    }
}

impl ReportNodeSource for InMemoryReportNodeStore {
    fn report_node(&self, id: &str) -> Result<Option<ReportNode>, StoreError> {
        Ok(self.nodes.get(id).map(|(_, node)| node.clone()))
    }

    fn stream_running(
        &self,
        execution_id: &str,
        range: Option<Range>,
        visit: &mut dyn FnMut(ReportNode),
    ) -> Result<(), StoreError> {
        for node in self.ordered() {
            if node.execution_id == execution_id
                && node.status == ReportNodeStatus::Running
                && in_range(range, node.execution_time_ms)
            {
                visit(node.clone());
            }
        }
        Ok(())
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
        self.ordered()
            .into_iter()
            .filter(|node| {
                node.execution_id == execution_id
                    && node.artefact_hash == artefact_hash
                    && in_range(range, node.execution_time_ms)
            })
            .skip(skip)
            .take(limit)
            .for_each(|node| visit(node.clone()));
        Ok(())
    }

    fn path_to_root(&self, id: &str) -> Result<Vec<ReportNode>, StoreError> {
        let mut out = Vec::new();
        let mut seen = BTreeSet::new();
        let mut current = self.nodes.get(id).map(|(_, node)| node);
        while let Some(node) = current {
            if !seen.insert(node.id.as_str()) || out.len() >= MAX_PATH_DEPTH {
                return Err(StoreError::InvalidInput("report node ancestry is cyclic"));
            }
            out.push(node.clone());
            current = node
                .parent_id
                .as_deref()
                .and_then(|parent| self.nodes.get(parent))
                .map(|(_, node)| node);
        }
        Ok(out)
    }

    fn children_of(&self, id: &str) -> Result<Vec<ReportNode>, StoreError> {
        Ok(self
            .ordered()
            .into_iter()
            .filter(|node| node.parent_id.as_deref() == Some(id))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, parent: Option<&str>, hash: &str, status: ReportNodeStatus, ts: i64) -> ReportNode {
        ReportNode {
            id: id.to_string(),
            execution_id: "e1".to_string(),
            parent_id: parent.map(str::to_string),
            artefact_hash: hash.to_string(),
            name: id.to_string(),
            status,
            duration_ms: Some(1),
            execution_time_ms: ts,
            path: Vec::new(),
            resolved_artefact: None,
        }
    }

    #[test]
    fn path_and_children_follow_parent_links() {
        let mut store = InMemoryReportNodeStore::new();
        store.save(node("r", None, "hr", ReportNodeStatus::Passed, 0));
        store.save(node("a", Some("r"), "ha", ReportNodeStatus::Passed, 2));
        store.save(node("b", Some("r"), "hb", ReportNodeStatus::Passed, 1));
        store.save(node("c", Some("a"), "hc", ReportNodeStatus::Running, 3));

        let path: Vec<String> = store.path_to_root("c").unwrap().into_iter().map(|n| n.id).collect();
        assert_eq!(path, vec!["c", "a", "r"]);
        assert!(store.path_to_root("zzz").unwrap().is_empty());

        let children: Vec<String> = store.children_of("r").unwrap().into_iter().map(|n| n.id).collect();
        assert_eq!(children, vec!["b", "a"]);

        let mut running = Vec::new();
        store
            .stream_running("e1", None, &mut |n| running.push(n.id))
            .unwrap();
        assert_eq!(running, vec!["c"]);
    }

    #[test]
    fn by_artefact_hash_honours_range_skip_and_limit() {
        let mut store = InMemoryReportNodeStore::new();
        for i in 0..5 {
            store.save(node(&format!("n{i}"), None, "h", ReportNodeStatus::Passed, i * 10));
        }
        let mut found = Vec::new();
        store
            .stream_by_artefact_hash("e1", "h", Some(Range::new(10, 40)), 1, 5, &mut |n| {
                found.push(n.id)
            })
            .unwrap();
        assert_eq!(found, vec!["n2", "n3"]);
    }

    #[test]
    fn save_replaces_in_place() {
        let mut store = InMemoryReportNodeStore::new();
        store.save(node("a", None, "h", ReportNodeStatus::Running, 0));
        store.save(node("a", None, "h", ReportNodeStatus::Passed, 0));
        assert_eq!(store.len(), 1);
        assert_eq!(
            store.report_node("a").unwrap().unwrap().status,
            ReportNodeStatus::Passed
        );
    }
}
