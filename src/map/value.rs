use std::fmt;

use super::key::truncate_str;
use super::sort::SortScalar;
use crate::stat::{HistogramSpec, StatData, StatField};

/// Value type stored by a map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Int64,
    Str,
    Stat,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ValueKind::Int64 => "int64",
            ValueKind::Str => "string",
            ValueKind::Stat => "stat",
        })
    }
}

/// Behaviour of one value kind inside a map.
///
/// The value type is fixed when the map is constructed, so every
/// type-specific rule is resolved at compile time.
pub trait MapValue: Send + Sized {
    /// Per-map parameters shared by every value (string length, histogram).
    type Params: Clone + fmt::Debug + Send + Sync;

    /// What an update carries.
    type Input<'a>: Copy;

    const KIND: ValueKind;

    /// A zeroed value with any buffers already allocated.
    fn empty(params: &Self::Params) -> Self;

    /// Update with `accumulate = false`.
    fn set(&mut self, params: &Self::Params, input: Self::Input<'_>);

    /// Update with `accumulate = true`.
    fn accumulate(&mut self, params: &Self::Params, input: Self::Input<'_>);

    /// Folds another value of the same map schema into this one.
    fn merge_from(&mut self, params: &Self::Params, other: &Self);

    /// Overwrites this value with `other` without reallocating.
    fn copy_from(&mut self, params: &Self::Params, other: &Self);

    fn clear(&mut self);

    /// Whether entries can be ordered by this value, either directly
    /// (`None`) or through a stat field.
    fn supports_sort(field: Option<StatField>) -> bool;

    /// The scalar compared when sorting by value.
    fn sort_scalar(&self, field: Option<StatField>) -> SortScalar<'_>;
}

impl MapValue for i64 {
    type Params = ();
    type Input<'a> = i64;

    const KIND: ValueKind = ValueKind::Int64;

    fn empty(_: &()) -> Self {
        0
    }

    fn set(&mut self, _: &(), input: i64) {
        *self = input;
    }

    fn accumulate(&mut self, _: &(), input: i64) {
        *self = self.wrapping_add(input);
    }

    fn merge_from(&mut self, _: &(), other: &i64) {
        *self = self.wrapping_add(*other);
    }

    fn copy_from(&mut self, _: &(), other: &i64) {
        *self = *other;
    }

    fn clear(&mut self) {
        *self = 0;
    }

    fn supports_sort(field: Option<StatField>) -> bool {
        field.is_none()
    }

    fn sort_scalar(&self, _: Option<StatField>) -> SortScalar<'_> {
        SortScalar::Int(*self)
    }
}

/// A string with a fixed byte budget.
///
/// At most `max_len - 1` bytes are kept. Longer writes and appends are
/// silently cut at the last char boundary that fits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundedString {
    buf: String,
}

impl BoundedString {
    pub fn as_str(&self) -> &str {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn append(&mut self, max_len: usize, s: &str) {
        let room = max_len.saturating_sub(1).saturating_sub(self.buf.len());
        self.buf.push_str(truncate_str(s, room));
    }
}

impl fmt::Display for BoundedString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.buf)
    }
}

impl MapValue for BoundedString {
    /// Buffer size in bytes.
    type Params = usize;
    type Input<'a> = &'a str;

    const KIND: ValueKind = ValueKind::Str;

    fn empty(max_len: &usize) -> Self {
        Self {
            buf: String::with_capacity(*max_len),
        }
    }

    fn set(&mut self, max_len: &usize, input: &str) {
        self.buf.clear();
        self.append(*max_len, input);
    }

    fn accumulate(&mut self, max_len: &usize, input: &str) {
        self.append(*max_len, input);
    }

    fn merge_from(&mut self, max_len: &usize, other: &Self) {
        self.append(*max_len, &other.buf);
    }

    fn copy_from(&mut self, max_len: &usize, other: &Self) {
        self.set(max_len, &other.buf);
    }

    fn clear(&mut self) {
        self.buf.clear();
    }

    fn supports_sort(field: Option<StatField>) -> bool {
        field.is_none()
    }

    fn sort_scalar(&self, _: Option<StatField>) -> SortScalar<'_> {
        SortScalar::Str(&self.buf)
    }
}

impl MapValue for StatData {
    type Params = HistogramSpec;
    type Input<'a> = i64;

    const KIND: ValueKind = ValueKind::Stat;

    fn empty(spec: &HistogramSpec) -> Self {
        StatData::new(spec)
    }

    fn set(&mut self, spec: &HistogramSpec, input: i64) {
        self.reset_to(spec, input);
    }

    fn accumulate(&mut self, spec: &HistogramSpec, input: i64) {
        self.add_sample(spec, input);
    }

    fn merge_from(&mut self, _: &HistogramSpec, other: &Self) {
        self.merge(other);
    }

    fn copy_from(&mut self, _: &HistogramSpec, other: &Self) {
        StatData::copy_from(self, other);
    }

    fn clear(&mut self) {
        StatData::clear(self);
    }

    fn supports_sort(field: Option<StatField>) -> bool {
        field.is_some()
    }

    fn sort_scalar(&self, field: Option<StatField>) -> SortScalar<'_> {
        SortScalar::Int(self.field(field.unwrap_or(StatField::Count)))
    }
}
