pub mod hash;
pub mod key;
pub mod list;
pub mod pool;
pub mod sort;
pub mod value;

pub use hash::{MAX_HASH_BITS, MIN_HASH_BITS};
pub use key::{Key, KeyKind, KeyPart, KeySchema, MAX_KEY_ARITY};
pub use list::List;
pub use sort::{Direction, SortBy, SortScalar, TOP_N_MAX};
pub use value::{BoundedString, MapValue, ValueKind};

use thiserror::Error;

use crate::stat::{self, HistogramSpec, StatData, StatField};
use hash::HashIndex;
use key::ProbeKey;
use pool::{Acquired, Entry, Pool};
use sort::Comparator;

/// Default number of entries a map holds.
pub const DEFAULT_CAPACITY: usize = 2048;

/// Default hash table size, as a power of two.
pub const DEFAULT_HASH_BITS: u32 = 8;

/// Errors returned by map operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MapError {
    #[error("map is full ({capacity} entries) and wrapping is disabled")]
    CapacityExhausted { capacity: usize },

    #[error("key has {got} parts, map expects {expected}")]
    KeyArity { expected: usize, got: usize },

    #[error("key part {index} has the wrong type")]
    KeyType { index: usize },

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(&'static str),

    #[error("invalid map option: {0}")]
    InvalidOption(&'static str),
}

/// Construction options shared by every value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapOptions {
    /// Number of preallocated entries. 0 means unbounded: the map grows on
    /// demand and never evicts.
    pub capacity: usize,
    /// Reuse the oldest entry when the pool is exhausted.
    pub wrap: bool,
    /// The hash table has `2^hash_bits` chains.
    pub hash_bits: u32,
}

impl Default for MapOptions {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            wrap: false,
            hash_bits: DEFAULT_HASH_BITS,
        }
    }
}

impl MapOptions {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ..Default::default()
        }
    }

    pub fn wrap(mut self, wrap: bool) -> Self {
        self.wrap = wrap;
        self
    }

    pub fn hash_bits(mut self, bits: u32) -> Self {
        self.hash_bits = bits;
        self
    }
}

/// Fixed-capacity associative container of aggregated values.
///
/// All entries are allocated up front; updates of a bounded map never touch
/// the allocator. New keys on a full map either evict the oldest inserted
/// entry (`wrap`) or fail with [`MapError::CapacityExhausted`].
pub struct Map<V: MapValue> {
    options: MapOptions,
    schema: KeySchema,
    params: V::Params,
    pool: Pool<V>,
    index: HashIndex,
    empty: V,
}

impl<V: MapValue> Map<V> {
    pub fn new(options: MapOptions, schema: KeySchema, params: V::Params) -> Result<Self, MapError> {
        if !(MIN_HASH_BITS..=MAX_HASH_BITS).contains(&options.hash_bits) {
            return Err(MapError::InvalidOption("hash_bits must be between 1 and 16"));
        }
        if options.capacity == 0 && options.wrap {
            return Err(MapError::InvalidOption("wrap requires a bounded capacity"));
        }

        let entries = (0..options.capacity)
            .map(|_| Entry::new(schema.blank_key(), V::empty(&params)))
            .collect();

        Ok(Self {
            options,
            pool: Pool::new(entries),
            index: HashIndex::new(options.hash_bits),
            empty: V::empty(&params),
            schema,
            params,
        })
    }

    /// Inserts or updates `key`.
    ///
    /// With `accumulate` the input is folded into the stored value (add,
    /// append or add-sample); otherwise it replaces it. A new key starts from
    /// the empty value either way.
    pub fn upsert(
        &mut self,
        key: &[KeyPart<'_>],
        input: V::Input<'_>,
        accumulate: bool,
    ) -> Result<(), MapError> {
        let probe = self.schema.probe(key)?;
        let idx = self.find_or_insert(&probe)?;
        let value = &mut self.pool.entry_mut(idx).value;
        if accumulate {
            value.accumulate(&self.params, input);
        } else {
            value.set(&self.params, input);
        }
        Ok(())
    }

    /// `upsert` with `accumulate = false`.
    pub fn set(&mut self, key: &[KeyPart<'_>], input: V::Input<'_>) -> Result<(), MapError> {
        self.upsert(key, input, false)
    }

    /// `upsert` with `accumulate = true`.
    pub fn add(&mut self, key: &[KeyPart<'_>], input: V::Input<'_>) -> Result<(), MapError> {
        self.upsert(key, input, true)
    }

    /// Looks up `key`. Keys that do not fit the schema are never present.
    pub fn get(&self, key: &[KeyPart<'_>]) -> Option<&V> {
        let probe = self.schema.probe(key).ok()?;
        self.find(&probe).map(|idx| &self.pool.entry(idx).value)
    }

    /// Like [`Map::get`], falling back to the zero value.
    pub fn get_or_default(&self, key: &[KeyPart<'_>]) -> &V {
        self.get(key).unwrap_or(&self.empty)
    }

    pub fn exists(&self, key: &[KeyPart<'_>]) -> bool {
        self.get(key).is_some()
    }

    /// Removes `key`, returning whether it was present.
    pub fn delete(&mut self, key: &[KeyPart<'_>]) -> bool {
        let Ok(probe) = self.schema.probe(key) else {
            return false;
        };
        match self.find(&probe) {
            Some(idx) => {
                self.index.remove(&mut self.pool, idx);
                self.pool.release(idx);
                true
            }
            None => false,
        }
    }

    /// Returns every entry to the pool and empties every hash chain.
    pub fn clear(&mut self) {
        self.pool.reset();
        self.index.reset();
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.pool.live()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.live() == 0
    }

    /// Configured capacity, 0 for unbounded maps.
    pub fn capacity(&self) -> usize {
        self.options.capacity
    }

    /// Slots available before the next new key evicts or fails.
    pub fn free_count(&self) -> usize {
        self.pool.slots() - self.pool.live()
    }

    pub fn options(&self) -> &MapOptions {
        &self.options
    }

    pub fn schema(&self) -> &KeySchema {
        &self.schema
    }

    pub fn params(&self) -> &V::Params {
        &self.params
    }

    /// Live entries in active-list order: insertion order, or the order left
    /// by the last sort.
    pub fn iter(&self) -> Iter<'_, V> {
        Iter {
            pool: &self.pool,
            cur: self.pool.head(),
        }
    }

    /// Live entries in hash bucket order.
    pub fn iter_buckets(&self) -> BucketIter<'_, V> {
        BucketIter {
            pool: &self.pool,
            index: &self.index,
            bucket: 0,
            cur: self.index.head(0),
        }
    }

    /// Stable sort of all entries.
    pub fn sort(&mut self, by: SortBy, direction: Direction) -> Result<(), MapError> {
        let cmp = self.comparator(by, direction)?;
        sort::merge_sort(&mut self.pool, &cmp);
        Ok(())
    }

    /// Moves the best `n` entries, in order, to the front of the map.
    ///
    /// `n == 0` or `n > TOP_N_MAX` sorts everything.
    pub fn sort_top_n(&mut self, n: usize, by: SortBy, direction: Direction) -> Result<(), MapError> {
        let cmp = self.comparator(by, direction)?;
        sort::sort_top_n(&mut self.pool, n, &cmp);
        Ok(())
    }

    /// Folds `value` into the entry for an already stored `key`, copying it
    /// into a fresh entry when absent. Used when aggregating shards.
    pub(crate) fn fold_entry(&mut self, key: &Key, value: &V) -> Result<(), MapError> {
        let probe = key.as_probe();
        let bucket = self.index.bucket_of(&probe);
        match self.index.find(&self.pool, bucket, &probe) {
            Some(idx) => {
                self.pool
                    .entry_mut(idx)
                    .value
                    .merge_from(&self.params, value);
            }
            None => {
                let idx = self.insert_new(&probe, bucket)?;
                self.pool
                    .entry_mut(idx)
                    .value
                    .copy_from(&self.params, value);
            }
        }
        Ok(())
    }

    fn comparator(&self, by: SortBy, direction: Direction) -> Result<Comparator, MapError> {
        let supported = match by {
            SortBy::Value => V::supports_sort(None),
            SortBy::Stat(field) => V::supports_sort(Some(field)),
            SortBy::Key(n) => n < self.schema.arity(),
        };
        if !supported {
            return Err(MapError::UnsupportedOperation(match by {
                SortBy::Value => "sort by value needs an int64 or string map",
                SortBy::Stat(_) => "sort by stat field needs a stat map",
                SortBy::Key(_) => "sort key index out of range",
            }));
        }
        Ok(Comparator { by, direction })
    }

    fn find(&self, probe: &ProbeKey<'_>) -> Option<usize> {
        let bucket = self.index.bucket_of(probe);
        self.index.find(&self.pool, bucket, probe)
    }

    fn find_or_insert(&mut self, probe: &ProbeKey<'_>) -> Result<usize, MapError> {
        let bucket = self.index.bucket_of(probe);
        if let Some(idx) = self.index.find(&self.pool, bucket, probe) {
            return Ok(idx);
        }
        self.insert_new(probe, bucket)
    }

    fn insert_new(&mut self, probe: &ProbeKey<'_>, bucket: usize) -> Result<usize, MapError> {
        let idx = match self.pool.acquire(self.options.wrap) {
            Some(Acquired::Fresh(idx)) => idx,
            Some(Acquired::Reclaimed(idx)) => {
                self.index.remove(&mut self.pool, idx);
                idx
            }
            None if self.options.capacity == 0 => self.pool.grow(Entry::new(
                self.schema.blank_key(),
                V::empty(&self.params),
            )),
            None => {
                return Err(MapError::CapacityExhausted {
                    capacity: self.options.capacity,
                })
            }
        };

        let entry = self.pool.entry_mut(idx);
        entry.key.write(probe);
        entry.value.clear();
        self.index.insert(&mut self.pool, bucket, idx);
        self.pool.push_back(idx);
        Ok(idx)
    }
}

impl Map<StatData> {
    pub fn histogram_spec(&self) -> &HistogramSpec {
        &self.params
    }

    /// Renders the histogram stored under `key`; empty when absent.
    pub fn render_histogram(&self, key: &[KeyPart<'_>]) -> String {
        stat::render_histogram(self.get_or_default(key), &self.params)
    }

    /// Reads one field of the stat under `key`, zero when absent.
    pub fn stat_field(&self, key: &[KeyPart<'_>], field: StatField) -> i64 {
        self.get_or_default(key).field(field)
    }
}

impl<V: MapValue> std::fmt::Debug for Map<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Map")
            .field("options", &self.options)
            .field("schema", &self.schema)
            .field("len", &self.len())
            .finish()
    }
}

/// Iterator over live entries in active-list order.
pub struct Iter<'a, V> {
    pool: &'a Pool<V>,
    cur: Option<usize>,
}

impl<'a, V> Iterator for Iter<'a, V> {
    type Item = (&'a Key, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.cur?;
        let entry = self.pool.entry(idx);
        self.cur = entry.next;
        Some((&entry.key, &entry.value))
    }
}

/// Iterator over live entries chain by chain.
pub struct BucketIter<'a, V> {
    pool: &'a Pool<V>,
    index: &'a HashIndex,
    bucket: usize,
    cur: Option<usize>,
}

impl<'a, V> Iterator for BucketIter<'a, V> {
    type Item = (&'a Key, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(idx) = self.cur {
                let entry = self.pool.entry(idx);
                self.cur = entry.chain_next;
                return Some((&entry.key, &entry.value));
            }
            self.bucket += 1;
            if self.bucket >= self.index.buckets() {
                return None;
            }
            self.cur = self.index.head(self.bucket);
        }
    }
}
