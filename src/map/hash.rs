use super::key::ProbeKey;
use super::pool::Pool;

/// Smallest and largest accepted `hash_bits`.
pub const MIN_HASH_BITS: u32 = 1;
pub const MAX_HASH_BITS: u32 = 16;

/// Fixed table of `2^bits` chain heads over the pool's entries.
///
/// Chains are doubly linked through the entries so removal needs no scan.
/// The table is never resized.
#[derive(Debug)]
pub(crate) struct HashIndex {
    heads: Vec<Option<usize>>,
    bits: u32,
}

impl HashIndex {
    pub(crate) fn new(bits: u32) -> Self {
        Self {
            heads: vec![None; 1usize << bits],
            bits,
        }
    }

    pub(crate) fn bucket_of(&self, probe: &ProbeKey<'_>) -> usize {
        probe.bucket(self.bits)
    }

    pub(crate) fn buckets(&self) -> usize {
        self.heads.len()
    }

    pub(crate) fn head(&self, bucket: usize) -> Option<usize> {
        self.heads.get(bucket).copied().flatten()
    }

    pub(crate) fn find<V>(&self, pool: &Pool<V>, bucket: usize, probe: &ProbeKey<'_>) -> Option<usize> {
        let mut cur = self.head(bucket);
        while let Some(idx) = cur {
            let entry = pool.entry(idx);
            if entry.key.matches(probe) {
                return Some(idx);
            }
            cur = entry.chain_next;
        }
        None
    }

    /// Pushes `idx` on the head of `bucket`'s chain.
    pub(crate) fn insert<V>(&mut self, pool: &mut Pool<V>, bucket: usize, idx: usize) {
        let old = self.heads[bucket];
        {
            let entry = pool.entry_mut(idx);
            entry.bucket = bucket;
            entry.chain_prev = None;
            entry.chain_next = old;
        }
        if let Some(old) = old {
            pool.entry_mut(old).chain_prev = Some(idx);
        }
        self.heads[bucket] = Some(idx);
    }

    pub(crate) fn remove<V>(&mut self, pool: &mut Pool<V>, idx: usize) {
        let (bucket, prev, next) = {
            let entry = pool.entry_mut(idx);
            (entry.bucket, entry.chain_prev.take(), entry.chain_next.take())
        };
        match prev {
            Some(p) => pool.entry_mut(p).chain_next = next,
            None => self.heads[bucket] = next,
        }
        if let Some(n) = next {
            pool.entry_mut(n).chain_prev = prev;
        }
    }

    pub(crate) fn reset(&mut self) {
        self.heads.fill(None);
    }
}
