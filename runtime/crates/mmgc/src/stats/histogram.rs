//! Histogram - Pause Time Distribution
//!
//! Logarithmic buckets (1, 2, 4, 8, ... microseconds) for computing pause
//! percentiles of incremental steps.

use serde::Serialize;
use std::collections::BTreeMap;

/// Pause time histogram
#[derive(Debug, Clone)]
pub struct Histogram {
    buckets: BTreeMap<u64, u64>,
    count: u64,
    sum: u64,
    min: u64,
    max: u64,
}

/// Percentile summary of a [`Histogram`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PauseSummary {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

impl Histogram {
    pub fn new() -> Self {
        Self {
            buckets: BTreeMap::new(),
            count: 0,
            sum: 0,
            min: u64::MAX,
            max: 0,
        }
    }

    /// Record one value
    pub fn record(&mut self, value: u64) {
        *self.buckets.entry(Self::bucket(value)).or_insert(0) += 1;
        self.count += 1;
        self.sum = self.sum.saturating_add(value);
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    /// Upper bound of the bucket holding `value`
    fn bucket(value: u64) -> u64 {
        if value == 0 {
            0
        } else {
            value.next_power_of_two()
        }
    }

    /// Bucket bound below which a fraction `p` of values fall
    pub fn percentile(&self, p: f64) -> u64 {
        if self.count == 0 {
            return 0;
        }

        let target = ((self.count as f64 * p).ceil() as u64).max(1);
        let mut cumulative = 0;
        for (&bucket, &count) in self.buckets.iter() {
            cumulative += count;
            if cumulative >= target {
                return bucket.min(self.max);
            }
        }
        self.max
    }

    pub fn p50(&self) -> u64 {
        self.percentile(0.50)
    }

    pub fn p99(&self) -> u64 {
        self.percentile(0.99)
    }

    pub fn mean(&self) -> u64 {
        self.sum.checked_div(self.count).unwrap_or(0)
    }

    pub fn min(&self) -> u64 {
        if self.count == 0 {
            0
        } else {
            self.min
        }
    }

    pub fn max(&self) -> u64 {
        self.max
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn summary(&self) -> PauseSummary {
        PauseSummary {
            count: self.count,
            mean_us: self.mean(),
            p50_us: self.p50(),
            p99_us: self.p99(),
            max_us: self.max,
        }
    }

    pub fn clear(&mut self) {
        *self = Self::new();
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}
