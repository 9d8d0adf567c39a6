use std::fmt;

use thiserror::Error;

/// Number of buckets in a logarithmic histogram.
pub const LOG_BUCKETS: usize = 128;

/// Index of the bucket that counts zero samples in a logarithmic histogram.
pub const LOG_ZERO_BUCKET: usize = 64;

/// Upper bound on buckets a linear histogram may allocate, including the
/// underflow and overflow buckets.
pub const MAX_LINEAR_BUCKETS: usize = 4096;

/// Errors raised when histogram parameters are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistogramError {
    #[error("histogram interval must be positive, got {0}")]
    InvalidInterval(i64),

    #[error("histogram stop ({stop}) must be greater than start ({start})")]
    EmptyRange { start: i64, stop: i64 },

    #[error("histogram needs {buckets} buckets, max is {max}")]
    TooManyBuckets { buckets: u128, max: usize },
}

/// Bucketing scheme of a histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistogramKind {
    None,
    /// Signed power-of-two buckets around a dedicated zero bucket.
    Log,
    /// Fixed-width buckets over `[start, stop]` plus underflow and overflow.
    Linear { start: i64, stop: i64, interval: i64 },
}

/// Validated histogram parameters shared by every stat of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistogramSpec {
    kind: HistogramKind,
    buckets: usize,
}

impl HistogramSpec {
    /// Stat without a histogram.
    pub const fn none() -> Self {
        Self {
            kind: HistogramKind::None,
            buckets: 0,
        }
    }

    /// Logarithmic histogram with [`LOG_BUCKETS`] buckets.
    pub const fn log() -> Self {
        Self {
            kind: HistogramKind::Log,
            buckets: LOG_BUCKETS,
        }
    }

    /// Linear histogram. The regular buckets cover `start..=stop` in steps of
    /// `interval`; index 0 counts samples below `start` and the last index
    /// counts samples past the last regular bucket.
    pub fn linear(start: i64, stop: i64, interval: i64) -> Result<Self, HistogramError> {
        if interval <= 0 {
            return Err(HistogramError::InvalidInterval(interval));
        }
        if stop <= start {
            return Err(HistogramError::EmptyRange { start, stop });
        }

        let span = i128::from(stop) - i128::from(start);
        let regular = span / i128::from(interval) + 1;
        let total = regular + 2;
        if total > MAX_LINEAR_BUCKETS as i128 {
            return Err(HistogramError::TooManyBuckets {
                buckets: total as u128,
                max: MAX_LINEAR_BUCKETS,
            });
        }

        Ok(Self {
            kind: HistogramKind::Linear {
                start,
                stop,
                interval,
            },
            buckets: total as usize,
        })
    }

    /// Build a spec from an already chosen kind, validating linear parameters.
    pub fn from_kind(kind: HistogramKind) -> Result<Self, HistogramError> {
        match kind {
            HistogramKind::None => Ok(Self::none()),
            HistogramKind::Log => Ok(Self::log()),
            HistogramKind::Linear {
                start,
                stop,
                interval,
            } => Self::linear(start, stop, interval),
        }
    }

    pub fn kind(&self) -> HistogramKind {
        self.kind
    }

    /// Total bucket count, 0 when histogramming is disabled.
    pub fn buckets(&self) -> usize {
        self.buckets
    }

    pub fn is_enabled(&self) -> bool {
        self.buckets > 0
    }

    /// Returns the bucket a sample falls into, or `None` without a histogram.
    pub fn bucket_index(&self, value: i64) -> Option<usize> {
        match self.kind {
            HistogramKind::None => None,
            HistogramKind::Log => Some(log_bucket(value)),
            HistogramKind::Linear {
                start, interval, ..
            } => {
                let offset = i128::from(value) - i128::from(start);
                let idx = offset.div_euclid(i128::from(interval)) + 1;
                let last = self.buckets as i128 - 1;
                Some(idx.clamp(0, last) as usize)
            }
        }
    }

    /// Representative value printed for a bucket.
    pub fn bucket_label(&self, idx: usize) -> BucketLabel {
        match self.kind {
            HistogramKind::None => BucketLabel::Value(0),
            HistogramKind::Log => BucketLabel::Value(log_bucket_floor(idx)),
            HistogramKind::Linear {
                start, interval, ..
            } => {
                if idx == 0 {
                    return BucketLabel::Below(start);
                }
                let offset = i128::from(interval) * (idx as i128 - 1);
                let value = saturate(i128::from(start) + offset);
                if idx + 1 >= self.buckets {
                    BucketLabel::AtLeast(value)
                } else {
                    BucketLabel::Value(value)
                }
            }
        }
    }
}

impl Default for HistogramSpec {
    fn default() -> Self {
        Self::none()
    }
}

/// Text label of a histogram bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketLabel {
    /// Lower bound of a regular bucket.
    Value(i64),
    /// Linear underflow bucket, everything below the start.
    Below(i64),
    /// Linear overflow bucket, everything at or past the limit.
    AtLeast(i64),
}

impl fmt::Display for BucketLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BucketLabel::Value(v) => write!(f, "{v}"),
            BucketLabel::Below(v) => write!(f, "<{v}"),
            BucketLabel::AtLeast(v) => write!(f, ">={v}"),
        }
    }
}

/// Most significant set bit, counted from 1. `msb64(0) == 0`.
pub fn msb64(value: u64) -> u32 {
    64 - value.leading_zeros()
}

fn log_bucket(value: i64) -> usize {
    let idx = match value.cmp(&0) {
        std::cmp::Ordering::Equal => LOG_ZERO_BUCKET,
        std::cmp::Ordering::Greater => LOG_ZERO_BUCKET + msb64(value as u64) as usize,
        std::cmp::Ordering::Less => {
            LOG_ZERO_BUCKET.saturating_sub(msb64(value.unsigned_abs()) as usize)
        }
    };
    idx.min(LOG_BUCKETS - 1)
}

fn log_bucket_floor(idx: usize) -> i64 {
    match idx.cmp(&LOG_ZERO_BUCKET) {
        std::cmp::Ordering::Equal => 0,
        std::cmp::Ordering::Greater => {
            let shift = (idx - LOG_ZERO_BUCKET - 1).min(62);
            1i64 << shift
        }
        std::cmp::Ordering::Less => {
            let shift = (LOG_ZERO_BUCKET - 1 - idx).min(63);
            saturate(-(1i128 << shift))
        }
    }
}

fn saturate(v: i128) -> i64 {
    v.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_msb64() {
        assert_eq!(msb64(0), 0);
        assert_eq!(msb64(1), 1);
        assert_eq!(msb64(8), 4);
        assert_eq!(msb64(512), 10);
        assert_eq!(msb64(u64::MAX), 64);
    }

    #[test]
    fn test_log_bucket_zero_and_small() {
        let spec = HistogramSpec::log();
        assert_eq!(spec.bucket_index(0), Some(LOG_ZERO_BUCKET));
        assert_eq!(spec.bucket_index(1), Some(65));
        assert_eq!(spec.bucket_index(2), Some(66));
        assert_eq!(spec.bucket_index(3), Some(66));
        assert_eq!(spec.bucket_index(-1), Some(63));
        assert_eq!(spec.bucket_index(-3), Some(62));
    }

    #[test]
    fn test_log_bucket_powers_of_two_land_in_their_own_bucket() {
        let spec = HistogramSpec::log();
        for k in 0..62u32 {
            let p = 1i64 << k;
            let idx = spec.bucket_index(p).expect("log bucket");
            assert_eq!(spec.bucket_label(idx), BucketLabel::Value(p));
            if p > 1 {
                // One below a power of two belongs to the lower-magnitude bucket.
                assert_eq!(spec.bucket_index(p - 1), Some(idx - 1));
            }

            let neg = spec.bucket_index(-p).expect("log bucket");
            assert_eq!(spec.bucket_label(neg), BucketLabel::Value(-p));
            assert_eq!(LOG_ZERO_BUCKET - neg, idx - LOG_ZERO_BUCKET);
        }
    }

    #[test]
    fn test_log_bucket_extremes_are_clamped() {
        let spec = HistogramSpec::log();
        assert_eq!(spec.bucket_index(i64::MAX), Some(LOG_BUCKETS - 1));
        assert_eq!(spec.bucket_index(i64::MIN), Some(0));
        assert_eq!(spec.bucket_label(0), BucketLabel::Value(i64::MIN));
    }

    #[test]
    fn test_linear_bucket_count() {
        let spec = HistogramSpec::linear(0, 100, 50).expect("valid spec");
        assert_eq!(spec.buckets(), 5);

        let spec = HistogramSpec::linear(0, 99, 10).expect("valid spec");
        assert_eq!(spec.buckets(), 12);
    }

    #[test]
    fn test_linear_bucket_index() {
        let spec = HistogramSpec::linear(0, 100, 50).expect("valid spec");
        assert_eq!(spec.bucket_index(-5), Some(0));
        assert_eq!(spec.bucket_index(-1), Some(0));
        assert_eq!(spec.bucket_index(0), Some(1));
        assert_eq!(spec.bucket_index(49), Some(1));
        assert_eq!(spec.bucket_index(50), Some(2));
        assert_eq!(spec.bucket_index(99), Some(2));
        assert_eq!(spec.bucket_index(100), Some(3));
        assert_eq!(spec.bucket_index(150), Some(4));
        assert_eq!(spec.bucket_index(i64::MAX), Some(4));
        assert_eq!(spec.bucket_index(i64::MIN), Some(0));
    }

    #[test]
    fn test_linear_labels() {
        let spec = HistogramSpec::linear(0, 100, 50).expect("valid spec");
        assert_eq!(spec.bucket_label(0).to_string(), "<0");
        assert_eq!(spec.bucket_label(1).to_string(), "0");
        assert_eq!(spec.bucket_label(2).to_string(), "50");
        assert_eq!(spec.bucket_label(3).to_string(), "100");
        assert_eq!(spec.bucket_label(4).to_string(), ">=150");
    }

    #[test]
    fn test_linear_rejects_bad_parameters() {
        assert_eq!(
            HistogramSpec::linear(0, 100, 0),
            Err(HistogramError::InvalidInterval(0))
        );
        assert_eq!(
            HistogramSpec::linear(10, 10, 1),
            Err(HistogramError::EmptyRange { start: 10, stop: 10 })
        );
        assert!(matches!(
            HistogramSpec::linear(i64::MIN, i64::MAX, 1),
            Err(HistogramError::TooManyBuckets { .. })
        ));
    }

    #[test]
    fn test_none_has_no_buckets() {
        let spec = HistogramSpec::none();
        assert!(!spec.is_enabled());
        assert_eq!(spec.bucket_index(42), None);
    }
}
