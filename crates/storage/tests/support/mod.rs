#![forbid(unsafe_code)]
#![allow(dead_code)]

use agg_core::{Artefact, ArtefactKind, ReportNode, ReportNodeStatus};
use std::path::PathBuf;

pub(crate) fn temp_dir(test_name: &str) -> PathBuf {
    let base = std::env::temp_dir();
    let pid = std::process::id();
    let nonce = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let dir = base.join(format!("agg_storage_{test_name}_{pid}_{nonce}"));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

pub(crate) fn report_node(
    id: &str,
    parent_id: Option<&str>,
    artefact_hash: &str,
    status: ReportNodeStatus,
    execution_time_ms: i64,
) -> ReportNode {
    ReportNode {
        id: id.to_string(),
        execution_id: "exec-1".to_string(),
        parent_id: parent_id.map(str::to_string),
        artefact_hash: artefact_hash.to_string(),
        name: id.to_string(),
        status,
        duration_ms: (status != ReportNodeStatus::Running).then_some(5),
        execution_time_ms,
        path: Vec::new(),
        resolved_artefact: Some(Artefact::new(id, id, ArtefactKind::CallKeyword)),
    }
}
