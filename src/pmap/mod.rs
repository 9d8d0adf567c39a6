use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Mutex, MutexGuard};
use tracing::debug;

use crate::map::{KeyPart, KeySchema, Map, MapError, MapOptions, MapValue};
use crate::percpu::{CpuIndex, PerCpu, ShardWriter, ThreadCpuIndex};

/// A map split into one shard per CPU plus an aggregation map.
///
/// Two access modes share the same value:
///
/// * sharded: methods taking `&mut self` (and [`PMap::writers`]) reach a
///   shard directly without locking. Exclusive access to each shard comes
///   from the borrow checker.
/// * locked: `*_locked` methods take `&self` and lock one shard at a time,
///   so readers may poll while writers run.
///
/// The aggregation map only changes when [`PMap::aggregate`] or
/// [`PMap::aggregate_locked`] runs; between runs it is stale.
pub struct PMap<V: MapValue> {
    schema: KeySchema,
    shards: PerCpu<Map<V>>,
    agg: Mutex<Map<V>>,
    cpu: Box<dyn CpuIndex>,
    dropped: AtomicUsize,
}

impl<V: MapValue> PMap<V> {
    /// Creates `shards` maps with identical options and schema.
    ///
    /// The aggregation map has the same capacity but never wraps: keys that
    /// do not fit are counted in [`PMap::last_dropped`].
    pub fn new(
        shards: usize,
        options: MapOptions,
        schema: KeySchema,
        params: V::Params,
    ) -> Result<Self, MapError> {
        let shards = PerCpu::try_new(shards, |_| {
            Map::new(options, schema.clone(), params.clone())
        })?;
        let agg = Map::new(options.wrap(false), schema.clone(), params)?;

        debug!(
            shards = shards.len(),
            capacity = options.capacity,
            wrap = options.wrap,
            kind = %V::KIND,
            "created per-cpu map",
        );

        Ok(Self {
            schema,
            shards,
            agg: Mutex::new(agg),
            cpu: Box::new(ThreadCpuIndex),
            dropped: AtomicUsize::new(0),
        })
    }

    /// Replaces the source of the current shard index.
    pub fn with_cpu_index(mut self, cpu: impl CpuIndex + 'static) -> Self {
        self.cpu = Box::new(cpu);
        self
    }

    pub fn shards(&self) -> usize {
        self.shards.len()
    }

    pub fn schema(&self) -> &KeySchema {
        &self.schema
    }

    /// Shard the calling context writes to.
    pub fn current_shard(&self) -> usize {
        self.shards.shard_of(self.cpu.current())
    }

    // --- Sharded mode ---

    /// Updates `key` on the current shard.
    pub fn upsert(
        &mut self,
        key: &[KeyPart<'_>],
        input: V::Input<'_>,
        accumulate: bool,
    ) -> Result<(), MapError> {
        let cpu = self.cpu.current();
        self.shards.get_mut(cpu).upsert(key, input, accumulate)
    }

    pub fn set(&mut self, key: &[KeyPart<'_>], input: V::Input<'_>) -> Result<(), MapError> {
        self.upsert(key, input, false)
    }

    pub fn add(&mut self, key: &[KeyPart<'_>], input: V::Input<'_>) -> Result<(), MapError> {
        self.upsert(key, input, true)
    }

    /// Updates `key` on an explicit shard.
    pub fn upsert_on(
        &mut self,
        cpu: usize,
        key: &[KeyPart<'_>],
        input: V::Input<'_>,
        accumulate: bool,
    ) -> Result<(), MapError> {
        self.shards.get_mut(cpu).upsert(key, input, accumulate)
    }

    /// One exclusive writer per shard, for running shards on separate
    /// threads.
    pub fn writers(&mut self) -> Vec<ShardWriter<'_, Map<V>>> {
        self.shards.writers()
    }

    pub fn shard_mut(&mut self, cpu: usize) -> &mut Map<V> {
        self.shards.get_mut(cpu)
    }

    /// Reads `key` from a single shard.
    pub fn get_on(&mut self, cpu: usize, key: &[KeyPart<'_>]) -> Option<&V> {
        self.shards.get_mut(cpu).get(key)
    }

    /// Removes `key` from every shard and from the aggregation map.
    pub fn delete(&mut self, key: &[KeyPart<'_>]) -> bool {
        let mut found = false;
        for shard in self.shards.iter_mut() {
            found |= shard.delete(key);
        }
        found |= self.agg.get_mut().delete(key);
        found
    }

    pub fn delete_on(&mut self, cpu: usize, key: &[KeyPart<'_>]) -> bool {
        self.shards.get_mut(cpu).delete(key)
    }

    /// Clears every shard and the aggregation map.
    pub fn clear(&mut self) {
        for shard in self.shards.iter_mut() {
            shard.clear();
        }
        self.agg.get_mut().clear();
        debug!(shards = self.shards.len(), "cleared per-cpu map");
    }

    /// Rebuilds the aggregation map from every shard.
    ///
    /// Shards are walked hash bucket by hash bucket. Matching keys are merged
    /// by the value type's rule (add, append, stat merge); new keys are
    /// copied. With `clear`, each shard is emptied once folded.
    pub fn aggregate(&mut self, clear: bool) -> &mut Map<V> {
        let agg = self.agg.get_mut();
        agg.clear();

        let mut dropped = 0;
        for shard in self.shards.iter_mut() {
            dropped += fold_shard(agg, shard, clear);
        }
        self.dropped.store(dropped, Ordering::Relaxed);

        debug!(entries = agg.len(), dropped, clear, "aggregated per-cpu map");
        agg
    }

    /// Result of the last aggregation.
    pub fn aggregated(&mut self) -> &mut Map<V> {
        self.agg.get_mut()
    }

    // --- Locked mode ---

    pub fn upsert_locked(
        &self,
        key: &[KeyPart<'_>],
        input: V::Input<'_>,
        accumulate: bool,
    ) -> Result<(), MapError> {
        self.shards
            .lock(self.cpu.current())
            .upsert(key, input, accumulate)
    }

    pub fn set_locked(&self, key: &[KeyPart<'_>], input: V::Input<'_>) -> Result<(), MapError> {
        self.upsert_locked(key, input, false)
    }

    pub fn add_locked(&self, key: &[KeyPart<'_>], input: V::Input<'_>) -> Result<(), MapError> {
        self.upsert_locked(key, input, true)
    }

    pub fn lock_shard(&self, cpu: usize) -> MutexGuard<'_, Map<V>> {
        self.shards.lock(cpu)
    }

    pub fn clear_locked(&self) {
        for cpu in 0..self.shards.len() {
            self.shards.lock(cpu).clear();
        }
        self.agg.lock().clear();
    }

    /// Locked-mode [`PMap::aggregate`].
    ///
    /// Holds the aggregation lock throughout and each shard lock only while
    /// that shard is folded, so every shard contributes a consistent
    /// snapshot but shards are not frozen together.
    pub fn aggregate_locked(&self, clear: bool) -> MutexGuard<'_, Map<V>> {
        let mut agg = self.agg.lock();
        agg.clear();

        let mut dropped = 0;
        for cpu in 0..self.shards.len() {
            let mut shard = self.shards.lock(cpu);
            dropped += fold_shard(&mut agg, &mut shard, clear);
        }
        self.dropped.store(dropped, Ordering::Relaxed);

        debug!(entries = agg.len(), dropped, clear, "aggregated per-cpu map");
        agg
    }

    pub fn aggregated_locked(&self) -> MutexGuard<'_, Map<V>> {
        self.agg.lock()
    }

    /// Entries the last aggregation could not fit into the aggregation map.
    pub fn last_dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

fn fold_shard<V: MapValue>(agg: &mut Map<V>, shard: &mut Map<V>, clear: bool) -> usize {
    let mut dropped = 0;
    for (key, value) in shard.iter_buckets() {
        if agg.fold_entry(key, value).is_err() {
            dropped += 1;
        }
    }
    if clear {
        shard.clear();
    }
    dropped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::{BoundedString, KeyKind};
    use crate::percpu::FixedCpuIndex;
    use crate::stat::{HistogramSpec, StatData};
    use std::sync::Arc;
    use std::thread;

    fn k(v: i64) -> [KeyPart<'static>; 1] {
        [KeyPart::Int(v)]
    }

    fn int_pmap(shards: usize, capacity: usize) -> PMap<i64> {
        PMap::new(shards, MapOptions::with_capacity(capacity), KeySchema::int(), ())
            .expect("valid pmap")
    }

    #[test]
    fn test_aggregate_sums_ints_across_shards() {
        let mut pmap = int_pmap(3, 16);
        pmap.upsert_on(0, &k(1), 5, true).expect("add");
        pmap.upsert_on(1, &k(1), 7, true).expect("add");
        pmap.upsert_on(2, &k(1), 1, true).expect("add");
        pmap.upsert_on(1, &k(2), 4, true).expect("add");

        let agg = pmap.aggregate(false);
        assert_eq!(agg.get(&k(1)), Some(&13));
        assert_eq!(agg.get(&k(2)), Some(&4));
        assert_eq!(agg.len(), 2);

        // Shards are untouched without clear.
        assert_eq!(pmap.get_on(1, &k(1)), Some(&7));
    }

    #[test]
    fn test_aggregate_merges_stats() {
        let spec = HistogramSpec::log();
        let mut pmap = PMap::<StatData>::new(2, MapOptions::with_capacity(8), KeySchema::int(), spec)
            .expect("valid pmap");
        for v in [4, 9] {
            pmap.upsert_on(0, &k(1), v, true).expect("add");
        }
        for v in [-3, 100, 2] {
            pmap.upsert_on(1, &k(1), v, true).expect("add");
        }

        let mut expected = StatData::new(&spec);
        for v in [4, 9, -3, 100, 2] {
            expected.add_sample(&spec, v);
        }

        let agg = pmap.aggregate(false);
        assert_eq!(agg.get(&k(1)), Some(&expected));
    }

    #[test]
    fn test_aggregate_appends_strings() {
        let mut pmap = PMap::<BoundedString>::new(
            2,
            MapOptions::with_capacity(4),
            KeySchema::new(vec![KeyKind::Int64]).expect("schema"),
            6,
        )
        .expect("valid pmap");
        pmap.upsert_on(0, &k(1), "abc", false).expect("set");
        pmap.upsert_on(1, &k(1), "defg", false).expect("set");

        let agg = pmap.aggregate(false);
        assert_eq!(agg.get(&k(1)).map(|s| s.as_str()), Some("abcde"));
    }

    #[test]
    fn test_aggregate_with_clear_empties_shards() {
        let mut pmap = int_pmap(2, 4);
        pmap.upsert_on(0, &k(1), 1, true).expect("add");
        pmap.upsert_on(1, &k(2), 2, true).expect("add");

        assert_eq!(pmap.aggregate(true).len(), 2);
        assert!(pmap.shard_mut(0).is_empty());
        assert!(pmap.shard_mut(1).is_empty());

        // A second aggregation sees nothing new and replaces the old result.
        assert!(pmap.aggregate(false).is_empty());
    }

    #[test]
    fn test_aggregation_is_not_incremental() {
        let mut pmap = int_pmap(2, 4);
        pmap.upsert_on(0, &k(1), 1, true).expect("add");
        pmap.aggregate(false);
        pmap.upsert_on(0, &k(1), 1, true).expect("add");

        assert_eq!(pmap.aggregated().get(&k(1)), Some(&1));
        assert_eq!(pmap.aggregate(false).get(&k(1)), Some(&2));
    }

    #[test]
    fn test_aggregate_counts_dropped_entries() {
        let mut pmap = int_pmap(2, 2);
        pmap.upsert_on(0, &k(1), 1, true).expect("add");
        pmap.upsert_on(0, &k(2), 1, true).expect("add");
        pmap.upsert_on(1, &k(3), 1, true).expect("add");
        pmap.upsert_on(1, &k(4), 1, true).expect("add");

        assert_eq!(pmap.aggregate(false).len(), 2);
        assert_eq!(pmap.last_dropped(), 2);
    }

    #[test]
    fn test_current_shard_follows_cpu_index() {
        let mut pmap = int_pmap(4, 4).with_cpu_index(FixedCpuIndex(6));
        assert_eq!(pmap.current_shard(), 2);
        pmap.add(&k(1), 3).expect("add");
        assert_eq!(pmap.get_on(2, &k(1)), Some(&3));
        assert_eq!(pmap.get_on(0, &k(1)), None);
    }

    #[test]
    fn test_delete_everywhere() {
        let mut pmap = int_pmap(2, 4);
        pmap.upsert_on(0, &k(1), 1, true).expect("add");
        pmap.upsert_on(1, &k(1), 1, true).expect("add");
        pmap.aggregate(false);

        assert!(pmap.delete(&k(1)));
        assert_eq!(pmap.get_on(0, &k(1)), None);
        assert_eq!(pmap.get_on(1, &k(1)), None);
        assert!(pmap.aggregated().is_empty());
        assert!(!pmap.delete_on(0, &k(1)));
    }

    #[test]
    fn test_writers_on_scoped_threads() {
        let mut pmap = int_pmap(4, 64);
        thread::scope(|s| {
            for mut w in pmap.writers() {
                s.spawn(move || {
                    for i in 0..1000 {
                        w.add(&k(i % 10), 1).expect("add");
                    }
                });
            }
        });

        let agg = pmap.aggregate(true);
        assert_eq!(agg.len(), 10);
        for key in 0..10 {
            assert_eq!(agg.get(&k(key)), Some(&400));
        }
    }

    #[test]
    fn test_locked_mode_concurrent_with_polling() {
        let pmap = Arc::new(int_pmap(4, 64));
        let mut handles = vec![];
        for t in 0..4 {
            let pmap = Arc::clone(&pmap);
            handles.push(thread::spawn(move || {
                for i in 0..2000 {
                    pmap.lock_shard(t).add(&k(i % 5), 1).expect("add");
                }
            }));
        }

        // Poll while writers run; partial totals never exceed the final one.
        for _ in 0..20 {
            let agg = pmap.aggregate_locked(false);
            let total: i64 = agg.iter().map(|(_, v)| *v).sum();
            assert!(total <= 8000);
        }

        for h in handles {
            h.join().expect("thread panicked");
        }

        let agg = pmap.aggregate_locked(true);
        let total: i64 = agg.iter().map(|(_, v)| *v).sum();
        assert_eq!(total, 8000);
        drop(agg);

        assert!(pmap.lock_shard(0).is_empty());
    }

    #[test]
    fn test_add_locked_uses_current_shard() {
        let pmap = int_pmap(2, 4).with_cpu_index(FixedCpuIndex(1));
        pmap.add_locked(&k(9), 2).expect("add");
        pmap.set_locked(&k(8), 5).expect("set");
        assert_eq!(pmap.lock_shard(1).get(&k(9)), Some(&2));
        assert_eq!(pmap.aggregate_locked(false).get(&k(8)), Some(&5));
        pmap.clear_locked();
        assert!(pmap.aggregated_locked().is_empty());
    }
}
