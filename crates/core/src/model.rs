#![forbid(unsafe_code)]

use crate::Artefact;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportNodeStatus {
    TechnicalError,
    Failed,
    Interrupted,
    Passed,
    Skipped,
    Norun,
    Running,
    Vetoed,
    ImportError,
}

impl ReportNodeStatus {
    pub const ALL: &'static [ReportNodeStatus] = &[
        Self::TechnicalError,
        Self::Failed,
        Self::Interrupted,
        Self::Passed,
        Self::Skipped,
        Self::Norun,
        Self::Running,
        Self::Vetoed,
        Self::ImportError,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::TechnicalError => "TECHNICAL_ERROR",
            Self::Failed => "FAILED",
            Self::Interrupted => "INTERRUPTED",
            Self::Passed => "PASSED",
            Self::Skipped => "SKIPPED",
            Self::Norun => "NORUN",
            Self::Running => "RUNNING",
            Self::Vetoed => "VETOED",
            Self::ImportError => "IMPORT_ERROR",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == value.trim())
    }
}

impl std::fmt::Display for ReportNodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Initializing,
    Importing,
    Provisioning,
    Running,
    Aborting,
    ForcingAbort,
    Exporting,
    Deprovisioning,
    Ended,
}

impl ExecutionStatus {
    pub const ALL: &'static [ExecutionStatus] = &[
        Self::Initializing,
        Self::Importing,
        Self::Provisioning,
        Self::Running,
        Self::Aborting,
        Self::ForcingAbort,
        Self::Exporting,
        Self::Deprovisioning,
        Self::Ended,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "INITIALIZING",
            Self::Importing => "IMPORTING",
            Self::Provisioning => "PROVISIONING",
            Self::Running => "RUNNING",
            Self::Aborting => "ABORTING",
            Self::ForcingAbort => "FORCING_ABORT",
            Self::Exporting => "EXPORTING",
            Self::Deprovisioning => "DEPROVISIONING",
            Self::Ended => "ENDED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == value.trim())
    }

    /// Report nodes may still be in flight.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Running | Self::Aborting | Self::ForcingAbort)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub id: String,
    pub status: ExecutionStatus,
    pub resolved_plan_root_node_id: Option<String>,
}

/// One concrete run of a resolved plan node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportNode {
    pub id: String,
    pub execution_id: String,
    pub parent_id: Option<String>,
    pub artefact_hash: String,
    pub name: String,
    pub status: ReportNodeStatus,
    /// Only set once the node has finished.
    pub duration_ms: Option<i64>,
    pub execution_time_ms: i64,
    /// Ancestor ids, root first.
    #[serde(default)]
    pub path: Vec<String>,
    #[serde(default)]
    pub resolved_artefact: Option<Artefact>,
}

impl ReportNode {
    /// Terminal and timed: the only occurrences that may enter a statistics series.
    pub fn is_completed(&self) -> bool {
        !matches!(
            self.status,
            ReportNodeStatus::Running | ReportNodeStatus::Norun
        ) && self.duration_ms.is_some()
    }

    pub fn is_iteration(&self) -> bool {
        self.resolved_artefact
            .as_ref()
            .is_some_and(Artefact::is_iteration)
    }
}

/// Live telemetry event of an in-flight report node (keyword call, sleep, lock wait...).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub name: String,
    pub start_ms: i64,
    pub report_node_id: String,
    pub artefact_hash: Option<String>,
    #[serde(default)]
    pub details: serde_json::Value,
}
