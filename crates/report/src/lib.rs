#![forbid(unsafe_code)]

mod builder;
mod config;
mod error;
mod partial;
mod plan_tree;

pub use builder::{AggregatedReportViewBuilder, ReportSources, flatten};
pub use config::*;
pub use error::ReportError;
pub use plan_tree::{ResolvedPlanCache, ResolvedPlanTree};
