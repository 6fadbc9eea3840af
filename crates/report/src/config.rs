#![forbid(unsafe_code)]

use agg_core::Configuration;

pub const RESOLVE_SINGLE_INSTANCE_KEY: &str =
    "execution.report.aggregated-tree.resolve-single-instance";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AggregatedReportConfig {
    /// Default for requests that do not say whether single occurrences get their detail.
    pub resolve_single_instance: bool,
}

impl Default for AggregatedReportConfig {
    fn default() -> Self {
        Self {
            resolve_single_instance: true,
        }
    }
}

impl AggregatedReportConfig {
    pub fn from_configuration(configuration: &Configuration) -> Self {
        Self {
            resolve_single_instance: configuration.get_bool(RESOLVE_SINGLE_INSTANCE_KEY, true),
        }
    }
}
