use super::key::Key;
use super::value::MapValue;

/// One arena slot. While free, `next` links the free list.
#[derive(Debug)]
pub(crate) struct Entry<V> {
    pub(crate) key: Key,
    pub(crate) value: V,
    pub(crate) prev: Option<usize>,
    pub(crate) next: Option<usize>,
    pub(crate) chain_prev: Option<usize>,
    pub(crate) chain_next: Option<usize>,
    pub(crate) bucket: usize,
    pub(crate) live: bool,
}

impl<V> Entry<V> {
    pub(crate) fn new(key: Key, value: V) -> Self {
        Self {
            key,
            value,
            prev: None,
            next: None,
            chain_prev: None,
            chain_next: None,
            bucket: 0,
            live: false,
        }
    }
}

/// Result of taking a slot from the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Acquired {
    /// Popped from the free list.
    Fresh(usize),
    /// Oldest live entry, detached from the active list but still hashed.
    Reclaimed(usize),
}

/// Fixed arena of entries with a free list and an insertion-ordered active
/// list, both linked by index.
#[derive(Debug)]
pub(crate) struct Pool<V> {
    entries: Vec<Entry<V>>,
    free: Option<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    live: usize,
}

impl<V: MapValue> Pool<V> {
    pub(crate) fn new(entries: Vec<Entry<V>>) -> Self {
        let mut pool = Self {
            entries,
            free: None,
            head: None,
            tail: None,
            live: 0,
        };
        pool.reset();
        pool
    }

    /// Returns every slot to the free list in index order and zeroes values.
    pub(crate) fn reset(&mut self) {
        let n = self.entries.len();
        for (i, entry) in self.entries.iter_mut().enumerate() {
            entry.value.clear();
            entry.prev = None;
            entry.next = if i + 1 < n { Some(i + 1) } else { None };
            entry.chain_prev = None;
            entry.chain_next = None;
            entry.bucket = 0;
            entry.live = false;
        }
        self.free = if n > 0 { Some(0) } else { None };
        self.head = None;
        self.tail = None;
        self.live = 0;
    }

    /// Takes a free slot, or with `wrap` the oldest live entry.
    pub(crate) fn acquire(&mut self, wrap: bool) -> Option<Acquired> {
        if let Some(idx) = self.free {
            let entry = &mut self.entries[idx];
            self.free = entry.next.take();
            entry.live = true;
            self.live += 1;
            return Some(Acquired::Fresh(idx));
        }
        if wrap {
            let idx = self.head?;
            self.unlink(idx);
            return Some(Acquired::Reclaimed(idx));
        }
        None
    }

    /// Appends a new live slot. Only unbounded maps grow.
    pub(crate) fn grow(&mut self, mut entry: Entry<V>) -> usize {
        entry.live = true;
        self.entries.push(entry);
        self.live += 1;
        self.entries.len() - 1
    }

    /// Unlinks a live entry from the active list and pushes it on the free list.
    /// The caller must already have removed it from its hash chain.
    pub(crate) fn release(&mut self, idx: usize) {
        self.unlink(idx);
        let free = self.free;
        let entry = &mut self.entries[idx];
        entry.value.clear();
        entry.live = false;
        entry.next = free;
        self.free = Some(idx);
        self.live -= 1;
    }
}

impl<V> Pool<V> {
    pub(crate) fn live(&self) -> usize {
        self.live
    }

    pub(crate) fn slots(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn head(&self) -> Option<usize> {
        self.head
    }

    #[cfg(test)]
    pub(crate) fn tail(&self) -> Option<usize> {
        self.tail
    }

    pub(crate) fn next(&self, idx: usize) -> Option<usize> {
        self.entries[idx].next
    }

    pub(crate) fn prev(&self, idx: usize) -> Option<usize> {
        self.entries[idx].prev
    }

    pub(crate) fn entry(&self, idx: usize) -> &Entry<V> {
        &self.entries[idx]
    }

    pub(crate) fn entry_mut(&mut self, idx: usize) -> &mut Entry<V> {
        &mut self.entries[idx]
    }

    pub(crate) fn push_back(&mut self, idx: usize) {
        let tail = self.tail;
        {
            let entry = &mut self.entries[idx];
            entry.prev = tail;
            entry.next = None;
        }
        match tail {
            Some(t) => self.entries[t].next = Some(idx),
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
    }

    /// Places a detached entry directly before `at`.
    pub(crate) fn insert_before(&mut self, idx: usize, at: usize) {
        let prev = self.entries[at].prev;
        {
            let entry = &mut self.entries[idx];
            entry.prev = prev;
            entry.next = Some(at);
        }
        self.entries[at].prev = Some(idx);
        match prev {
            Some(p) => self.entries[p].next = Some(idx),
            None => self.head = Some(idx),
        }
    }

    pub(crate) fn unlink(&mut self, idx: usize) {
        let (prev, next) = {
            let entry = &mut self.entries[idx];
            (entry.prev.take(), entry.next.take())
        };
        match prev {
            Some(p) => self.entries[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.entries[n].prev = prev,
            None => self.tail = prev,
        }
    }

    /// Sets the head of a list whose `next` links were rewritten and
    /// rebuilds the `prev` links and tail from it.
    pub(crate) fn relink_from(&mut self, head: Option<usize>) {
        self.head = head;
        let mut prev = None;
        let mut cur = head;
        while let Some(idx) = cur {
            self.entries[idx].prev = prev;
            prev = Some(idx);
            cur = self.entries[idx].next;
        }
        self.tail = prev;
    }

    pub(crate) fn set_next(&mut self, idx: usize, next: Option<usize>) {
        self.entries[idx].next = next;
    }

    /// Indices of live entries in active-list order.
    pub(crate) fn active(&self) -> ActiveIter<'_, V> {
        ActiveIter {
            pool: self,
            cur: self.head,
        }
    }
}

pub(crate) struct ActiveIter<'a, V> {
    pool: &'a Pool<V>,
    cur: Option<usize>,
}

impl<V> Iterator for ActiveIter<'_, V> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let idx = self.cur?;
        self.cur = self.pool.next(idx);
        Some(idx)
    }
}
