use crate::percpu::{CpuIndex, PerCpu, ShardWriter, ThreadCpuIndex};

/// A 64-bit counter kept per CPU and summed on read.
pub struct Counter {
    shards: PerCpu<i64>,
    cpu: Box<dyn CpuIndex>,
}

impl Counter {
    pub fn new(shards: usize) -> Self {
        Self {
            shards: PerCpu::new(shards, |_| 0),
            cpu: Box::new(ThreadCpuIndex),
        }
    }

    pub fn with_cpu_index(mut self, cpu: impl CpuIndex + 'static) -> Self {
        self.cpu = Box::new(cpu);
        self
    }

    pub fn shards(&self) -> usize {
        self.shards.len()
    }

    /// Adds to the current shard without locking. Overflow wraps.
    pub fn add(&mut self, value: i64) {
        let cpu = self.cpu.current();
        let count = self.shards.get_mut(cpu);
        *count = count.wrapping_add(value);
    }

    /// Adds to the current shard under its lock.
    pub fn add_locked(&self, value: i64) {
        let mut count = self.shards.lock(self.cpu.current());
        *count = count.wrapping_add(value);
    }

    pub fn writers(&mut self) -> Vec<CounterWriter<'_>> {
        self.shards
            .writers()
            .into_iter()
            .map(|inner| CounterWriter { inner })
            .collect()
    }

    /// Value of one shard, optionally resetting it.
    pub fn get_cpu(&mut self, cpu: usize, clear: bool) -> i64 {
        let count = self.shards.get_mut(cpu);
        if clear {
            std::mem::take(count)
        } else {
            *count
        }
    }

    pub fn get_cpu_locked(&self, cpu: usize, clear: bool) -> i64 {
        let mut count = self.shards.lock(cpu);
        if clear {
            std::mem::take(&mut *count)
        } else {
            *count
        }
    }

    /// Sum over every shard, optionally resetting them.
    pub fn get(&mut self, clear: bool) -> i64 {
        let mut sum = 0i64;
        for count in self.shards.iter_mut() {
            sum = sum.wrapping_add(*count);
            if clear {
                *count = 0;
            }
        }
        sum
    }

    /// Locked-mode [`Counter::get`], locking one shard at a time.
    pub fn get_locked(&self, clear: bool) -> i64 {
        (0..self.shards.len()).fold(0i64, |sum, cpu| {
            sum.wrapping_add(self.get_cpu_locked(cpu, clear))
        })
    }
}

/// Exclusive writer for one shard of a [`Counter`].
pub struct CounterWriter<'a> {
    inner: ShardWriter<'a, i64>,
}

impl CounterWriter<'_> {
    pub fn add(&mut self, value: i64) {
        *self.inner = self.inner.wrapping_add(value);
    }

    pub fn cpu(&self) -> usize {
        self.inner.cpu()
    }
}
