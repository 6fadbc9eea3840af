#![forbid(unsafe_code)]

use agg_storage::StoreError;

#[derive(Debug)]
pub enum ReportError {
    Store(StoreError),
    UnknownExecution(String),
    /// Selected occurrence is missing or belongs to another execution.
    UnknownReportNode(String),
    PathMismatch { selected: String, found: String },
}

impl ReportError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Store(err) => err.code(),
            Self::UnknownExecution(_) => "UNKNOWN_EXECUTION",
            Self::UnknownReportNode(_) => "UNKNOWN_REPORT_NODE",
            Self::PathMismatch { .. } => "PATH_MISMATCH",
        }
    }
}

impl std::fmt::Display for ReportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(err) => write!(f, "store: {err}"),
            Self::UnknownExecution(id) => write!(f, "unknown execution: {id}"),
            Self::UnknownReportNode(id) => write!(f, "unknown report node: {id}"),
            Self::PathMismatch { selected, found } => write!(
                f,
                "report node path mismatch (selected={selected}, found={found})"
            ),
        }
    }
}

impl std::error::Error for ReportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for ReportError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}
