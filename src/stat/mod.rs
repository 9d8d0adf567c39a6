pub mod counter;
pub mod histogram;
pub mod render;
pub mod sharded;

pub use counter::{Counter, CounterWriter};
pub use histogram::{BucketLabel, HistogramError, HistogramKind, HistogramSpec};
pub use render::{format_stat, render_histogram, write_histogram};
pub use sharded::ShardedStat;

use crate::arith;

/// Selects one scalar out of a stat, for sorting and printing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatField {
    Count,
    Sum,
    Min,
    Max,
    Average,
}

/// Running statistics over a stream of samples.
///
/// The histogram vector is sized once from the owning [`HistogramSpec`] and
/// never reallocated. Counters saturate instead of wrapping.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatData {
    count: i64,
    sum: i64,
    min: i64,
    max: i64,
    histogram: Vec<i64>,
}

impl StatData {
    /// Creates an empty stat with room for `spec`'s buckets.
    pub fn new(spec: &HistogramSpec) -> Self {
        Self {
            count: 0,
            sum: 0,
            min: 0,
            max: 0,
            histogram: vec![0; spec.buckets()],
        }
    }

    /// Folds one sample into the running statistics.
    pub fn add_sample(&mut self, spec: &HistogramSpec, value: i64) {
        if self.count == 0 {
            self.count = 1;
            self.sum = value;
            self.min = value;
            self.max = value;
        } else {
            self.count = self.count.saturating_add(1);
            self.sum = self.sum.saturating_add(value);
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }

        if let Some(bucket) = spec
            .bucket_index(value)
            .and_then(|idx| self.histogram.get_mut(idx))
        {
            *bucket = bucket.saturating_add(1);
        }
    }

    /// Discards everything recorded so far and keeps only `value`.
    pub fn reset_to(&mut self, spec: &HistogramSpec, value: i64) {
        self.clear();
        self.add_sample(spec, value);
    }

    /// Merges another stat built from the same histogram spec.
    pub fn merge(&mut self, other: &StatData) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            self.min = other.min;
            self.max = other.max;
        } else {
            self.min = self.min.min(other.min);
            self.max = self.max.max(other.max);
        }
        self.count = self.count.saturating_add(other.count);
        self.sum = self.sum.saturating_add(other.sum);

        for (dst, src) in self.histogram.iter_mut().zip(&other.histogram) {
            *dst = dst.saturating_add(*src);
        }
    }

    /// Overwrites this stat with `other` without reallocating.
    pub fn copy_from(&mut self, other: &StatData) {
        self.count = other.count;
        self.sum = other.sum;
        self.min = other.min;
        self.max = other.max;
        for (dst, src) in self.histogram.iter_mut().zip(&other.histogram) {
            *dst = *src;
        }
    }

    pub fn clear(&mut self) {
        self.count = 0;
        self.sum = 0;
        self.min = 0;
        self.max = 0;
        self.histogram.fill(0);
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn count(&self) -> i64 {
        self.count
    }

    pub fn sum(&self) -> i64 {
        self.sum
    }

    pub fn min(&self) -> i64 {
        self.min
    }

    pub fn max(&self) -> i64 {
        self.max
    }

    /// Integer mean of all samples; 0 when empty or when the division fails.
    pub fn average(&self) -> i64 {
        if self.count == 0 {
            return 0;
        }
        arith::div64(self.sum, self.count).unwrap_or(0)
    }

    /// Per-bucket counters, empty when histogramming is disabled.
    pub fn histogram(&self) -> &[i64] {
        &self.histogram
    }

    pub fn field(&self, field: StatField) -> i64 {
        match field {
            StatField::Count => self.count,
            StatField::Sum => self.sum,
            StatField::Min => self.min,
            StatField::Max => self.max,
            StatField::Average => self.average(),
        }
    }
}
