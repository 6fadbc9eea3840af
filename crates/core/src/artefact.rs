#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Name prefix the execution engine gives to the synthetic sequence wrapping one loop pass.
pub const ITERATION_NAME_PREFIX: &str = "Iteration";

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ArtefactKind {
    Sequence,
    TestCase,
    TestSet,
    TestScenario,
    ThreadGroup,
    ForEach,
    For,
    While,
    IfBlock,
    Switch,
    Case,
    Retry,
    Synchronized,
    CallPlan,
    CallKeyword,
    Echo,
    Set,
    Check,
    Assert,
    Sleep,
    Script,
    Export,
    BeforeSequence,
    AfterSequence,
    Wrapper,
}

impl ArtefactKind {
    pub const ALL: &'static [ArtefactKind] = &[
        Self::Sequence,
        Self::TestCase,
        Self::TestSet,
        Self::TestScenario,
        Self::ThreadGroup,
        Self::ForEach,
        Self::For,
        Self::While,
        Self::IfBlock,
        Self::Switch,
        Self::Case,
        Self::Retry,
        Self::Synchronized,
        Self::CallPlan,
        Self::CallKeyword,
        Self::Echo,
        Self::Set,
        Self::Check,
        Self::Assert,
        Self::Sleep,
        Self::Script,
        Self::Export,
        Self::BeforeSequence,
        Self::AfterSequence,
        Self::Wrapper,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sequence => "Sequence",
            Self::TestCase => "TestCase",
            Self::TestSet => "TestSet",
            Self::TestScenario => "TestScenario",
            Self::ThreadGroup => "ThreadGroup",
            Self::ForEach => "ForEach",
            Self::For => "For",
            Self::While => "While",
            Self::IfBlock => "IfBlock",
            Self::Switch => "Switch",
            Self::Case => "Case",
            Self::Retry => "Retry",
            Self::Synchronized => "Synchronized",
            Self::CallPlan => "CallPlan",
            Self::CallKeyword => "CallKeyword",
            Self::Echo => "Echo",
            Self::Set => "Set",
            Self::Check => "Check",
            Self::Assert => "Assert",
            Self::Sleep => "Sleep",
            Self::Script => "Script",
            Self::Export => "Export",
            Self::BeforeSequence => "BeforeSequence",
            Self::AfterSequence => "AfterSequence",
            Self::Wrapper => "Wrapper",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(value))
    }
}

impl std::fmt::Display for ArtefactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authored plan element referenced by resolved plan nodes and report nodes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artefact {
    pub id: String,
    pub name: String,
    pub kind: ArtefactKind,
    #[serde(default)]
    pub work_artefact: bool,
    #[serde(default)]
    pub iteration: bool,
}

impl Artefact {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: ArtefactKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            work_artefact: false,
            iteration: false,
        }
    }

    /// Synthetic sequence created by a loop handler for one pass over its body.
    pub fn iteration(id: impl Into<String>, index: usize) -> Self {
        Self {
            id: id.into(),
            name: format!("{ITERATION_NAME_PREFIX} {index}"),
            kind: ArtefactKind::Sequence,
            work_artefact: true,
            iteration: true,
        }
    }

    pub fn is_iteration(&self) -> bool {
        self.work_artefact && (self.iteration || self.name.starts_with(ITERATION_NAME_PREFIX))
    }
}

/// Stable hash of an artefact's structural position. Artefacts reached through a call to another
/// plan get the caller's id appended to their path, so the same keyword called from two places
/// hashes differently while every loop pass over one place hashes the same.
#[derive(Clone, Copy, Debug, Default)]
pub struct ArtefactHashGenerator;

impl ArtefactHashGenerator {
    pub fn generate(&self, path: Option<&str>, artefact_id: &str) -> String {
        let mut hasher = Sha256::new();
        if let Some(path) = path {
            hasher.update(path.as_bytes());
        }
        hasher.update(b"/");
        hasher.update(artefact_id.as_bytes());
        hex(&hasher.finalize())
    }

    pub fn child_path(path: Option<&str>, artefact_id: &str) -> String {
        match path {
            Some(path) if !path.is_empty() => format!("{path}/{artefact_id}"),
            _ => artefact_id.to_string(),
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}
