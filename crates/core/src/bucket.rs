#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Half-open time window in epoch milliseconds: `from <= t < to`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub from: i64,
    pub to: i64,
}

impl Range {
    pub fn new(from: i64, to: i64) -> Self {
        Self { from, to }
    }

    pub fn contains(&self, ts_ms: i64) -> bool {
        self.from <= ts_ms && ts_ms < self.to
    }
}

/// Grouping attributes of a time-series point, ordered so their JSON form is canonical.
pub type BucketAttributes = BTreeMap<String, String>;

/// Aggregate of the points of one attribute combination over `[begin, end)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    pub begin: i64,
    pub end: i64,
    pub count: u64,
    pub sum: i64,
    pub min: i64,
    pub max: i64,
}

impl Bucket {
    pub fn point(begin: i64, end: i64, value: i64) -> Self {
        Self {
            begin,
            end,
            count: 1,
            sum: value,
            min: value,
            max: value,
        }
    }

    pub fn accumulate(&mut self, other: &Bucket) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = other.clone();
            return;
        }
        self.begin = self.begin.min(other.begin);
        self.end = self.end.max(other.end);
        self.count = self.count.saturating_add(other.count);
        self.sum = self.sum.saturating_add(other.sum);
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    pub fn merged<'a>(buckets: impl IntoIterator<Item = &'a Bucket>) -> Option<Bucket> {
        let mut iter = buckets.into_iter();
        let mut out = iter.next()?.clone();
        for bucket in iter {
            out.accumulate(bucket);
        }
        Some(out)
    }
}
