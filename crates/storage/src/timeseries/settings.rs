#![forbid(unsafe_code)]

use crate::StoreError;
use agg_core::Configuration;
use std::collections::BTreeMap;

const MINUTE_MS: i64 = 60_000;
const HOUR_MS: i64 = 60 * MINUTE_MS;
const DAY_MS: i64 = 24 * HOUR_MS;

const DEFAULT_MAIN_RESOLUTION_MS: i64 = 5_000;
const DEFAULT_MAIN_FLUSH_PERIOD_MS: i64 = 1_000;
const DEFAULT_FLUSH_SERIES_QUEUE_SIZE: usize = 20_000;

/// Coarser companion collections kept next to the main one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Resolution {
    Minute,
    Hour,
    Day,
    Week,
}

impl Resolution {
    pub const ALL: &'static [Resolution] = &[Self::Minute, Self::Hour, Self::Day, Self::Week];

    pub fn name(self) -> &'static str {
        match self {
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Week => "week",
        }
    }

    pub fn millis(self) -> i64 {
        match self {
            Self::Minute => MINUTE_MS,
            Self::Hour => HOUR_MS,
            Self::Day => DAY_MS,
            Self::Week => 7 * DAY_MS,
        }
    }

    pub fn default_flush_period_ms(self) -> i64 {
        match self {
            Self::Minute => MINUTE_MS,
            Self::Hour => 5 * MINUTE_MS,
            Self::Day | Self::Week => HOUR_MS,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolutionSettings {
    pub flush_interval_ms: i64,
    pub enabled: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimeSeriesSettings {
    pub main_resolution_ms: i64,
    /// `0` disables interval flushes: data only lands on explicit flush/close.
    pub main_flush_interval_ms: i64,
    /// Pending buckets per collection before a flush is forced.
    pub flush_series_queue_size: usize,
    pub resolutions: BTreeMap<Resolution, ResolutionSettings>,
}

impl TimeSeriesSettings {
    /// Reads `{collection}.resolution`, `{collection}.flush.period`,
    /// `{collection}.flush.series.queue.size` and
    /// `{collection}.collections.{minute,hour,day,week}.{enabled,flush.period}`.
    pub fn read(configuration: &Configuration, collection_name: &str) -> Result<Self, StoreError> {
        let key = |suffix: &str| format!("{collection_name}.{suffix}");

        let main_resolution_ms =
            configuration.get_i64(&key("resolution"), DEFAULT_MAIN_RESOLUTION_MS);
        validate_main_resolution(main_resolution_ms)?;

        let mut resolutions = BTreeMap::new();
        for resolution in Resolution::ALL {
            let prefix = format!("collections.{}", resolution.name());
            resolutions.insert(
                *resolution,
                ResolutionSettings {
                    enabled: configuration.get_bool(&key(&format!("{prefix}.enabled")), true),
                    flush_interval_ms: configuration.get_i64(
                        &key(&format!("{prefix}.flush.period")),
                        resolution.default_flush_period_ms(),
                    ),
                },
            );
        }

        Ok(Self {
            main_resolution_ms,
            main_flush_interval_ms: configuration
                .get_i64(&key("flush.period"), DEFAULT_MAIN_FLUSH_PERIOD_MS),
            flush_series_queue_size: configuration.get_usize(
                &key("flush.series.queue.size"),
                DEFAULT_FLUSH_SERIES_QUEUE_SIZE,
            ),
            resolutions,
        })
    }

    /// One collection, no companions, no forced flushes.
    pub fn single_resolution(main_resolution_ms: i64, main_flush_interval_ms: i64) -> Self {
        Self {
            main_resolution_ms,
            main_flush_interval_ms,
            flush_series_queue_size: usize::MAX,
            resolutions: BTreeMap::new(),
        }
    }
}

fn validate_main_resolution(resolution_ms: i64) -> Result<(), StoreError> {
    if resolution_ms <= 0 || MINUTE_MS % resolution_ms != 0 {
        return Err(StoreError::InvalidInput(
            "main resolution must be a divisor of one minute",
        ));
    }
    Ok(())
}
