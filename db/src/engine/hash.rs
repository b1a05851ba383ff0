//! Chained hash index with progressive rehash.
//!
//! The index is a pair of tables (primary and secondary) plus a resize
//! cursor. A key lives in exactly one table at any moment; lookups consult
//! both. Growing never stops the world: every mutating operation relocates
//! at most [`RESIZE_BATCH`] nodes from the secondary into the primary, so
//! the tail latency of a single call stays bounded while the amortized
//! cost stays O(1).
//!
//! Nodes live in an internal slab and are referenced by `u32` handles from
//! the bucket arrays and chain links, so a node never moves in memory when
//! it is relocated between tables.

use tracing::debug;

const RESIZE_BATCH: usize = 128;
const LOAD_FACTOR_MAX: usize = 8;
const INITIAL_CAPACITY: usize = 4;

/// djb2 over raw bytes, seeded at 5381; the hash for every key string in
/// the system.
pub(crate) fn hash_bytes(data: &[u8]) -> u64 {
    let mut hash: u64 = 5381;
    for &byte in data {
        hash = hash.wrapping_mul(33).wrapping_add(u64::from(byte));
    }
    hash
}

struct Node<T> {
    hash: u64,
    next: Option<u32>,
    value: T,
}

enum Slot<T> {
    Occupied(Node<T>),
    Vacant { next_free: Option<u32> },
}

/// One bucket array. Capacity is always a power of two; the bucket for a
/// hash is `hash & (capacity - 1)`. A zero-capacity table holds nothing
/// and matches nothing.
struct Table {
    buckets: Vec<Option<u32>>,
    len: usize,
}

impl Table {
    fn unallocated() -> Self {
        Table {
            buckets: Vec::new(),
            len: 0,
        }
    }

    fn with_capacity(capacity: usize) -> Self {
        debug_assert!(capacity.is_power_of_two());
        Table {
            buckets: vec![None; capacity],
            len: 0,
        }
    }

    fn bucket(&self, hash: u64) -> usize {
        (hash & (self.buckets.len() as u64 - 1)) as usize
    }
}

pub(crate) struct HashIndex<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    primary: Table,
    secondary: Option<Table>,
    resize_pos: usize,
    relocations: u64,
}

impl<T> HashIndex<T> {
    pub(crate) fn new() -> Self {
        HashIndex {
            slots: Vec::new(),
            free_head: None,
            primary: Table::unallocated(),
            secondary: None,
            resize_pos: 0,
            relocations: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.primary.len + self.secondary.as_ref().map_or(0, |t| t.len)
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lifetime total of nodes moved between tables; the delta across any
    /// single call is bounded by the migration batch size.
    #[cfg(test)]
    pub(crate) fn relocations(&self) -> u64 {
        self.relocations
    }

    /// Prepends a node to its primary chain, starting a rehash when the
    /// load factor crosses the threshold, then runs one migration batch.
    pub(crate) fn insert(&mut self, hash: u64, value: T) {
        if self.primary.buckets.is_empty() {
            self.primary = Table::with_capacity(INITIAL_CAPACITY);
        }
        let idx = self.alloc(hash, value);
        let bucket = self.primary.bucket(hash);
        self.node_mut(idx).next = self.primary.buckets[bucket];
        self.primary.buckets[bucket] = Some(idx);
        self.primary.len += 1;

        if self.secondary.is_none()
            && self.primary.len / self.primary.buckets.len() >= LOAD_FACTOR_MAX
        {
            self.begin_resize();
        }
        self.migrate_batch();
    }

    /// Searches the primary chain, then the secondary if a rehash is in
    /// flight. Runs one migration batch first, hence the mutable receiver.
    pub(crate) fn lookup(&mut self, hash: u64, mut eq: impl FnMut(&T) -> bool) -> Option<&T> {
        self.migrate_batch();
        let (_, _, idx) = self.find(hash, &mut eq)?;
        Some(&self.node(idx).value)
    }

    pub(crate) fn lookup_mut(
        &mut self,
        hash: u64,
        mut eq: impl FnMut(&T) -> bool,
    ) -> Option<&mut T> {
        self.migrate_batch();
        let (_, _, idx) = self.find(hash, &mut eq)?;
        Some(&mut self.node_mut(idx).value)
    }

    /// Detaches and returns the matching node from whichever table holds
    /// it.
    pub(crate) fn remove(&mut self, hash: u64, mut eq: impl FnMut(&T) -> bool) -> Option<T> {
        self.migrate_batch();
        let (in_secondary, prev, idx) = self.find(hash, &mut eq)?;
        let next = self.node(idx).next;
        if let Some(prev) = prev {
            self.node_mut(prev).next = next;
        } else if in_secondary {
            if let Some(secondary) = self.secondary.as_mut() {
                let bucket = secondary.bucket(hash);
                secondary.buckets[bucket] = next;
            }
        } else {
            let bucket = self.primary.bucket(hash);
            self.primary.buckets[bucket] = next;
        }
        if in_secondary {
            if let Some(secondary) = self.secondary.as_mut() {
                secondary.len -= 1;
            }
            if self.secondary.as_ref().is_some_and(|t| t.len == 0) {
                self.release_secondary();
            }
        } else {
            self.primary.len -= 1;
        }
        Some(self.free(idx))
    }

    /// Visits every value, primary chains first, then whatever is still
    /// waiting in the secondary. Non-mutating: no migration batch runs, so
    /// enumeration never reshuffles the tables underneath itself.
    pub(crate) fn iter(&self) -> Iter<'_, T> {
        Iter {
            index: self,
            in_secondary: false,
            bucket_at: 0,
            chain: None,
        }
    }

    fn begin_resize(&mut self) {
        debug_assert!(self.secondary.is_none());
        let doubled = self.primary.buckets.len() * 2;
        let old = std::mem::replace(&mut self.primary, Table::with_capacity(doubled));
        debug!(
            occupied = old.len,
            capacity = doubled,
            "hash index rehash started"
        );
        self.secondary = Some(old);
        self.resize_pos = 0;
    }

    fn release_secondary(&mut self) {
        self.secondary = None;
        self.resize_pos = 0;
        debug!(relocations = self.relocations, "hash index rehash finished");
    }

    /// Relocates at most [`RESIZE_BATCH`] nodes from the secondary table
    /// into the primary, advancing the resize cursor across buckets and
    /// detaching one chain head per step.
    fn migrate_batch(&mut self) {
        let Some(mut secondary) = self.secondary.take() else {
            return;
        };
        let mut moved = 0usize;
        while moved < RESIZE_BATCH && secondary.len > 0 {
            let Some(idx) = secondary.buckets[self.resize_pos] else {
                self.resize_pos += 1;
                continue;
            };
            let (hash, next) = {
                let node = self.node(idx);
                (node.hash, node.next)
            };
            secondary.buckets[self.resize_pos] = next;
            secondary.len -= 1;

            let bucket = self.primary.bucket(hash);
            self.node_mut(idx).next = self.primary.buckets[bucket];
            self.primary.buckets[bucket] = Some(idx);
            self.primary.len += 1;
            moved += 1;
        }
        self.relocations += moved as u64;
        if secondary.len == 0 {
            self.resize_pos = 0;
            debug!(relocations = self.relocations, "hash index rehash finished");
        } else {
            self.secondary = Some(secondary);
        }
    }

    /// Locates a match as (found-in-secondary, chain predecessor, node).
    fn find(
        &self,
        hash: u64,
        eq: &mut impl FnMut(&T) -> bool,
    ) -> Option<(bool, Option<u32>, u32)> {
        let tables = [(false, Some(&self.primary)), (true, self.secondary.as_ref())];
        for (in_secondary, table) in tables {
            let Some(table) = table else { continue };
            if table.buckets.is_empty() {
                continue;
            }
            let mut prev = None;
            let mut cursor = table.buckets[table.bucket(hash)];
            while let Some(idx) = cursor {
                let node = self.node(idx);
                if node.hash == hash && eq(&node.value) {
                    return Some((in_secondary, prev, idx));
                }
                prev = Some(idx);
                cursor = node.next;
            }
        }
        None
    }

    fn alloc(&mut self, hash: u64, value: T) -> u32 {
        let node = Node {
            hash,
            next: None,
            value,
        };
        match self.free_head {
            Some(idx) => {
                let next_free = match &self.slots[idx as usize] {
                    Slot::Vacant { next_free } => *next_free,
                    Slot::Occupied(_) => unreachable!("free list points at an occupied slot"),
                };
                self.free_head = next_free;
                self.slots[idx as usize] = Slot::Occupied(node);
                idx
            }
            None => {
                self.slots.push(Slot::Occupied(node));
                (self.slots.len() - 1) as u32
            }
        }
    }

    fn free(&mut self, idx: u32) -> T {
        let slot = std::mem::replace(
            &mut self.slots[idx as usize],
            Slot::Vacant {
                next_free: self.free_head,
            },
        );
        self.free_head = Some(idx);
        match slot {
            Slot::Occupied(node) => node.value,
            Slot::Vacant { .. } => unreachable!("freeing a vacant slot"),
        }
    }

    fn node(&self, idx: u32) -> &Node<T> {
        match &self.slots[idx as usize] {
            Slot::Occupied(node) => node,
            Slot::Vacant { .. } => unreachable!("chain points at a vacant slot"),
        }
    }

    fn node_mut(&mut self, idx: u32) -> &mut Node<T> {
        match &mut self.slots[idx as usize] {
            Slot::Occupied(node) => node,
            Slot::Vacant { .. } => unreachable!("chain points at a vacant slot"),
        }
    }
}

pub(crate) struct Iter<'a, T> {
    index: &'a HashIndex<T>,
    in_secondary: bool,
    bucket_at: usize,
    chain: Option<u32>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        loop {
            if let Some(idx) = self.chain {
                let node = self.index.node(idx);
                self.chain = node.next;
                return Some(&node.value);
            }
            let table = if self.in_secondary {
                self.index.secondary.as_ref()?
            } else {
                &self.index.primary
            };
            match table.buckets.get(self.bucket_at) {
                Some(head) => {
                    self.chain = *head;
                    self.bucket_at += 1;
                }
                None if self.in_secondary => return None,
                None => {
                    self.in_secondary = true;
                    self.bucket_at = 0;
                }
            }
        }
    }
}
