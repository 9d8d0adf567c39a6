use std::cell::Cell;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Mutex, MutexGuard};

/// Source of the shard index for the calling context.
///
/// The returned index must stay stable for the duration of one update.
/// Values past the shard count wrap around.
pub trait CpuIndex: Send + Sync {
    fn current(&self) -> usize;
}

static NEXT_THREAD_SLOT: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static THREAD_SLOT: usize = NEXT_THREAD_SLOT.fetch_add(1, Ordering::Relaxed);
}

/// Gives each OS thread its own index on first use, round-robin.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadCpuIndex;

impl CpuIndex for ThreadCpuIndex {
    fn current(&self) -> usize {
        THREAD_SLOT.with(|slot| *slot)
    }
}

/// Always reports the same shard.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedCpuIndex(pub usize);

impl CpuIndex for FixedCpuIndex {
    fn current(&self) -> usize {
        self.0
    }
}

/// Number of shards to create when none is configured.
pub fn default_shards() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// One value per shard, each behind its own lock.
///
/// Holders of `&mut PerCpu` reach shards without locking; the lock is only
/// taken through `&self` for the opt-in locked mode.
#[derive(Debug)]
pub struct PerCpu<T> {
    shards: Box<[Mutex<T>]>,
}

impl<T> PerCpu<T> {
    /// Builds `shards` values (at least one) from `init(shard_index)`.
    pub fn new(shards: usize, mut init: impl FnMut(usize) -> T) -> Self {
        Self {
            shards: (0..shards.max(1)).map(|i| Mutex::new(init(i))).collect(),
        }
    }

    pub fn try_new<E>(
        shards: usize,
        mut init: impl FnMut(usize) -> Result<T, E>,
    ) -> Result<Self, E> {
        let shards = (0..shards.max(1))
            .map(|i| init(i).map(Mutex::new))
            .collect::<Result<Vec<_>, E>>()?;
        Ok(Self {
            shards: shards.into_boxed_slice(),
        })
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Maps any cpu number onto a shard index.
    pub fn shard_of(&self, cpu: usize) -> usize {
        cpu % self.shards.len()
    }

    /// Lock-free access through an exclusive borrow.
    pub fn get_mut(&mut self, cpu: usize) -> &mut T {
        let idx = self.shard_of(cpu);
        self.shards[idx].get_mut()
    }

    /// Locked access for concurrent readers and writers.
    pub fn lock(&self, cpu: usize) -> MutexGuard<'_, T> {
        self.shards[self.shard_of(cpu)].lock()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> + '_ {
        self.shards.iter_mut().map(Mutex::get_mut)
    }

    /// Splits into one exclusive writer per shard, to hand out one per
    /// thread of execution.
    pub fn writers(&mut self) -> Vec<ShardWriter<'_, T>> {
        self.shards
            .iter_mut()
            .enumerate()
            .map(|(cpu, shard)| ShardWriter::new(cpu, shard.get_mut()))
            .collect()
    }
}

/// Exclusive handle to a single shard.
///
/// It can be moved to the thread that owns the shard but not shared between
/// threads, which is the affinity rule the lock-free mode relies on.
pub struct ShardWriter<'a, T> {
    cpu: usize,
    shard: &'a mut T,
    _not_sync: PhantomData<Cell<()>>,
}

impl<'a, T> ShardWriter<'a, T> {
    pub(crate) fn new(cpu: usize, shard: &'a mut T) -> Self {
        Self {
            cpu,
            shard,
            _not_sync: PhantomData,
        }
    }

    /// Shard index this writer owns.
    pub fn cpu(&self) -> usize {
        self.cpu
    }
}

impl<T> Deref for ShardWriter<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.shard
    }
}

impl<T> DerefMut for ShardWriter<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.shard
    }
}
