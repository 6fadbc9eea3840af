#![forbid(unsafe_code)]

mod memory;
mod report_node_time_series;
mod sources;
mod store;
pub mod timeseries;

pub use memory::InMemoryReportNodeStore;
pub use report_node_time_series::*;
pub use sources::{
    ExecutionSource, InMemoryLiveOperations, LiveOperations, ReportNodeSource, ResolvedPlanSource,
};
pub use store::{SqliteStore, StoreError};
