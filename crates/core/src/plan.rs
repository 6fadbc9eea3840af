#![forbid(unsafe_code)]

use crate::Artefact;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParentSource {
    Before,
    BeforeThread,
    Main,
    SubPlan,
    AfterThread,
    After,
    Wrapper,
}

impl ParentSource {
    pub const ALL: &'static [ParentSource] = &[
        Self::Before,
        Self::BeforeThread,
        Self::Main,
        Self::SubPlan,
        Self::AfterThread,
        Self::After,
        Self::Wrapper,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Before => "BEFORE",
            Self::BeforeThread => "BEFORE_THREAD",
            Self::Main => "MAIN",
            Self::SubPlan => "SUB_PLAN",
            Self::AfterThread => "AFTER_THREAD",
            Self::After => "AFTER",
            Self::Wrapper => "WRAPPER",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|source| source.as_str() == value.trim())
    }
}

/// Structural position in the per-execution resolved plan tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedPlanNode {
    pub id: String,
    pub parent_id: Option<String>,
    pub artefact_hash: String,
    pub artefact: Artefact,
    pub parent_source: ParentSource,
}

impl ResolvedPlanNode {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}
