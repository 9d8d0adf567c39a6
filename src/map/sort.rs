use std::cmp::Ordering;

use super::key::KeyPart;
use super::pool::{Entry, Pool};
use super::value::MapValue;
use crate::stat::StatField;

/// Largest `n` handled by the partial top-N pass; larger requests sort fully.
pub const TOP_N_MAX: usize = 30;

/// What entries are ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortBy {
    /// The stored Int64 or string value.
    Value,
    /// Key part `n`, counted from 0.
    Key(usize),
    /// One field of a stat value.
    Stat(StatField),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Ascending,
    Descending,
}

/// Scalar extracted from an entry for comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortScalar<'a> {
    Int(i64),
    Str(&'a str),
}

impl SortScalar<'_> {
    fn compare(&self, other: &SortScalar<'_>) -> Ordering {
        match (self, other) {
            (SortScalar::Int(a), SortScalar::Int(b)) => a.cmp(b),
            (SortScalar::Str(a), SortScalar::Str(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}

/// Strict "belongs before" test. Equal scalars are never before each other,
/// which keeps both sorts stable.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Comparator {
    pub(crate) by: SortBy,
    pub(crate) direction: Direction,
}

impl Comparator {
    fn scalar<'a, V: MapValue>(&self, entry: &'a Entry<V>) -> SortScalar<'a> {
        match self.by {
            SortBy::Value => entry.value.sort_scalar(None),
            SortBy::Stat(field) => entry.value.sort_scalar(Some(field)),
            SortBy::Key(n) => match entry.key.part(n) {
                Some(KeyPart::Int(v)) => SortScalar::Int(v),
                Some(KeyPart::Str(s)) => SortScalar::Str(s),
                None => SortScalar::Int(0),
            },
        }
    }

    pub(crate) fn before<V: MapValue>(&self, pool: &Pool<V>, a: usize, b: usize) -> bool {
        let ord = self
            .scalar(pool.entry(a))
            .compare(&self.scalar(pool.entry(b)));
        match self.direction {
            Direction::Ascending => ord == Ordering::Less,
            Direction::Descending => ord == Ordering::Greater,
        }
    }
}

/// Stable bottom-up merge sort of the active list, relinking in place.
pub(crate) fn merge_sort<V: MapValue>(pool: &mut Pool<V>, cmp: &Comparator) {
    let mut list = pool.head();
    if list.is_none() {
        return;
    }

    let mut insize = 1usize;
    loop {
        let mut p = list;
        list = None;
        let mut tail: Option<usize> = None;
        let mut merges = 0usize;

        while p.is_some() {
            merges += 1;

            // Step `q` past up to `insize` elements of the left run.
            let mut q = p;
            let mut psize = 0usize;
            while psize < insize {
                psize += 1;
                q = q.and_then(|idx| pool.next(idx));
                if q.is_none() {
                    break;
                }
            }
            let mut qsize = insize;

            while psize > 0 || (qsize > 0 && q.is_some()) {
                let take_left = match (p, q) {
                    (Some(_), _) if qsize == 0 || q.is_none() => true,
                    (Some(l), Some(r)) if psize > 0 => !cmp.before(pool, r, l),
                    _ => false,
                };

                let picked = if take_left {
                    let Some(idx) = p else { break };
                    p = pool.next(idx);
                    psize -= 1;
                    idx
                } else {
                    let Some(idx) = q else { break };
                    q = pool.next(idx);
                    qsize -= 1;
                    idx
                };

                match tail {
                    Some(t) => pool.set_next(t, Some(picked)),
                    None => list = Some(picked),
                }
                tail = Some(picked);
            }

            p = q;
        }

        if let Some(t) = tail {
            pool.set_next(t, None);
        }
        if merges <= 1 {
            break;
        }
        insize *= 2;
    }

    pool.relink_from(list);
}

/// Orders the first `n` entries exactly and leaves the rest unordered.
///
/// Bubbles the first `n` entries into order, then makes one pass over the
/// remainder, splicing any entry that beats the current n-th into place. The
/// displaced n-th entry falls out of the prefix, so the prefix always holds
/// the best `n` entries seen so far.
pub(crate) fn sort_top_n<V: MapValue>(pool: &mut Pool<V>, n: usize, cmp: &Comparator) {
    if n == 0 || n > TOP_N_MAX {
        merge_sort(pool, cmp);
        return;
    }

    loop {
        let mut swapped = false;
        let mut cur = pool.head();
        let mut pos = 1;
        while let Some(a) = cur {
            if pos >= n {
                break;
            }
            let Some(b) = pool.next(a) else { break };
            if cmp.before(pool, b, a) {
                pool.unlink(b);
                pool.insert_before(b, a);
                swapped = true;
                cur = Some(a);
            } else {
                cur = Some(b);
            }
            pos += 1;
        }
        if !swapped {
            break;
        }
    }

    let Some(mut tail) = pool.active().take(n).last() else {
        return;
    };

    let mut cur = pool.next(tail);
    while let Some(idx) = cur {
        let next = pool.next(idx);
        if cmp.before(pool, idx, tail) {
            let mut at = tail;
            while let Some(prev) = pool.prev(at) {
                if cmp.before(pool, idx, prev) {
                    at = prev;
                } else {
                    break;
                }
            }
            pool.unlink(idx);
            pool.insert_before(idx, at);
            if let Some(prev) = pool.prev(tail) {
                tail = prev;
            }
        }
        cur = next;
    }
}
