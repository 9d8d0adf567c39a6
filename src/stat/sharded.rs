use parking_lot::{Mutex, MutexGuard};

use super::{HistogramSpec, StatData};
use crate::percpu::{CpuIndex, PerCpu, ShardWriter, ThreadCpuIndex};

/// A single statistic kept per CPU and merged on read.
pub struct ShardedStat {
    spec: HistogramSpec,
    shards: PerCpu<StatData>,
    agg: Mutex<StatData>,
    cpu: Box<dyn CpuIndex>,
}

impl ShardedStat {
    pub fn new(shards: usize, spec: HistogramSpec) -> Self {
        Self {
            spec,
            shards: PerCpu::new(shards, |_| StatData::new(&spec)),
            agg: Mutex::new(StatData::new(&spec)),
            cpu: Box::new(ThreadCpuIndex),
        }
    }

    pub fn with_cpu_index(mut self, cpu: impl CpuIndex + 'static) -> Self {
        self.cpu = Box::new(cpu);
        self
    }

    pub fn spec(&self) -> &HistogramSpec {
        &self.spec
    }

    pub fn shards(&self) -> usize {
        self.shards.len()
    }

    /// Adds a sample to the current shard without locking.
    pub fn add(&mut self, value: i64) {
        let cpu = self.cpu.current();
        self.shards.get_mut(cpu).add_sample(&self.spec, value);
    }

    /// Adds a sample to the current shard under its lock.
    pub fn add_locked(&self, value: i64) {
        self.shards
            .lock(self.cpu.current())
            .add_sample(&self.spec, value);
    }

    /// One writer per shard, for running shards on separate threads.
    pub fn writers(&mut self) -> Vec<StatWriter<'_>> {
        let spec = self.spec;
        self.shards
            .writers()
            .into_iter()
            .map(|inner| StatWriter { spec, inner })
            .collect()
    }

    /// The statistics gathered on one shard.
    pub fn cpu_stat(&mut self, cpu: usize) -> &StatData {
        self.shards.get_mut(cpu)
    }

    pub fn cpu_stat_locked(&self, cpu: usize) -> MutexGuard<'_, StatData> {
        self.shards.lock(cpu)
    }

    /// Merges every shard into the aggregate, optionally clearing shards.
    pub fn get(&mut self, clear: bool) -> &StatData {
        let agg = self.agg.get_mut();
        agg.clear();
        for shard in self.shards.iter_mut() {
            agg.merge(shard);
            if clear {
                shard.clear();
            }
        }
        agg
    }

    /// Locked-mode [`ShardedStat::get`], locking one shard at a time.
    pub fn get_locked(&self, clear: bool) -> MutexGuard<'_, StatData> {
        let mut agg = self.agg.lock();
        agg.clear();
        for cpu in 0..self.shards.len() {
            let mut shard = self.shards.lock(cpu);
            agg.merge(&shard);
            if clear {
                shard.clear();
            }
        }
        agg
    }
}

/// Exclusive writer for one shard of a [`ShardedStat`].
pub struct StatWriter<'a> {
    spec: HistogramSpec,
    inner: ShardWriter<'a, StatData>,
}

impl StatWriter<'_> {
    pub fn add(&mut self, value: i64) {
        self.inner.add_sample(&self.spec, value);
    }

    pub fn cpu(&self) -> usize {
        self.inner.cpu()
    }
}
