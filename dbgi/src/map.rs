//! The striped identity map from keys to cache nodes.
//!
//! There is a fixed number of slots, each the head of an intrusive doubly-linked list of nodes.
//! Slots are grouped into stripes: slot `s` belongs to stripe `s % stripes` and lives at index
//! `s / stripes` inside it. Each stripe owns its slots, its nodes, the free list of recycled nodes
//! and the arena holding the key strings, all behind one read/write lock.
//!
//! Nodes are addressed by their index in the stripe's node table. Indices are reused, so anything
//! that outlives a lock acquisition holds a [`NodeRef`], which also carries the generation of the
//! node at the time it was obtained.

use parking_lot::{Condvar, Mutex, RwLock};
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Instant,
};

use crate::{
    loaded::Loaded,
    string_arena::{ArenaStr, StringArena},
};

/// `last_time_requested` before any request was made.
pub const NEVER: u64 = u64::MAX;

/// The per-node state touched without the stripe write lock.
///
/// A fresh instance is allocated every time a node is (re)created, so scopes and workers holding
/// on to it can never affect a recycled node.
pub struct NodeCounters {
    /// The number of live touches on the node's data.
    pub touch_count: AtomicU64,
    /// Set by the worker that claimed the node for loading.
    pub is_working: AtomicBool,
    /// Microseconds since the cache epoch, or [`NEVER`].
    pub last_time_requested: AtomicU64,
}

impl NodeCounters {
    fn new() -> Arc<Self> {
        Arc::new(NodeCounters {
            touch_count: AtomicU64::new(0),
            is_working: AtomicBool::new(false),
            last_time_requested: AtomicU64::new(NEVER),
        })
    }

    /// Claim the node for loading. Only one caller ever succeeds.
    pub fn try_claim(&self) -> bool {
        self.is_working
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

pub struct CacheNode {
    path: ArenaStr,
    pub min_timestamp: u64,
    generation: u64,
    pub ref_count: u64,
    pub counters: Arc<NodeCounters>,
    /// Set once, by the worker that loaded the node. `Some` means parsing is done.
    pub loaded: Option<Arc<Loaded>>,
    prev: Option<u32>,
    next: Option<u32>,
}

impl CacheNode {
    pub fn parse_done(&self) -> bool {
        self.loaded.is_some()
    }
}

/// A handle to a node that detects recycling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodeRef {
    pub index: u32,
    pub generation: u64,
}

#[derive(Clone, Copy, Default)]
struct Slot {
    first: Option<u32>,
    last: Option<u32>,
}

pub struct StripeState {
    slots: Vec<Slot>,
    nodes: Vec<CacheNode>,
    free_nodes: Vec<u32>,
    strings: StringArena,
}

impl StripeState {
    fn new(slot_count: usize) -> Self {
        StripeState {
            slots: vec![Slot::default(); slot_count],
            nodes: Vec::new(),
            free_nodes: Vec::new(),
            strings: StringArena::new(),
        }
    }

    fn iter_slot(&self, slot: usize) -> impl Iterator<Item = u32> + '_ {
        let mut cursor = self.slots[slot].first;
        std::iter::from_fn(move || {
            let index = cursor?;
            cursor = self.nodes[index as usize].next;
            Some(index)
        })
    }

    fn path_of(&self, index: u32) -> &[u8] {
        self.strings.get(self.nodes[index as usize].path)
    }

    /// Find the node for `path` with the smallest `min_timestamp` that is at least
    /// `min_timestamp`.
    pub fn find_closest(&self, slot: usize, path: &str, min_timestamp: u64) -> Option<u32> {
        self.iter_slot(slot)
            .filter(|&i| self.path_of(i) == path.as_bytes())
            .filter(|&i| self.nodes[i as usize].min_timestamp >= min_timestamp)
            .min_by_key(|&i| self.nodes[i as usize].min_timestamp - min_timestamp)
    }

    /// Find the node with exactly this key.
    pub fn find_exact(&self, slot: usize, path: &str, min_timestamp: u64) -> Option<u32> {
        self.iter_slot(slot).find(|&i| {
            self.nodes[i as usize].min_timestamp == min_timestamp
                && self.path_of(i) == path.as_bytes()
        })
    }

    /// Create a node for the key and link it at the end of `slot`. The node starts with a
    /// `ref_count` of zero.
    pub fn insert_new(&mut self, slot: usize, path: &str, min_timestamp: u64) -> u32 {
        let path = self.strings.alloc(path.as_bytes());
        let prev = self.slots[slot].last;
        let index = match self.free_nodes.pop() {
            Some(index) => {
                let node = &mut self.nodes[index as usize];
                node.path = path;
                node.min_timestamp = min_timestamp;
                node.generation += 1;
                node.ref_count = 0;
                node.counters = NodeCounters::new();
                node.loaded = None;
                node.prev = prev;
                node.next = None;
                index
            }
            None => {
                self.nodes.push(CacheNode {
                    path,
                    min_timestamp,
                    generation: 0,
                    ref_count: 0,
                    counters: NodeCounters::new(),
                    loaded: None,
                    prev,
                    next: None,
                });
                (self.nodes.len() - 1) as u32
            }
        };

        match prev {
            Some(prev) => self.nodes[prev as usize].next = Some(index),
            None => self.slots[slot].first = Some(index),
        }
        self.slots[slot].last = Some(index);
        index
    }

    /// Unlink the node from `slot`, release its key and put it on the free list.
    ///
    /// Returns the loaded data so that the caller can drop it after releasing the lock.
    pub fn remove(&mut self, slot: usize, index: u32) -> Option<Arc<Loaded>> {
        let (prev, next) = {
            let node = &self.nodes[index as usize];
            (node.prev, node.next)
        };
        match prev {
            Some(prev) => self.nodes[prev as usize].next = next,
            None => self.slots[slot].first = next,
        }
        match next {
            Some(next) => self.nodes[next as usize].prev = prev,
            None => self.slots[slot].last = prev,
        }

        let node = &mut self.nodes[index as usize];
        let path = std::mem::replace(&mut node.path, ArenaStr::EMPTY);
        node.generation += 1;
        node.prev = None;
        node.next = None;
        let loaded = node.loaded.take();
        self.strings.release(path);
        self.free_nodes.push(index);
        loaded
    }

    pub fn node(&self, index: u32) -> &CacheNode {
        &self.nodes[index as usize]
    }

    pub fn node_mut(&mut self, index: u32) -> &mut CacheNode {
        &mut self.nodes[index as usize]
    }

    pub fn node_ref(&self, index: u32) -> NodeRef {
        NodeRef {
            index,
            generation: self.nodes[index as usize].generation,
        }
    }

    /// Resolve a handle, failing if the node was removed since the handle was taken.
    pub fn resolve_mut(&mut self, node_ref: NodeRef) -> Option<&mut CacheNode> {
        self.nodes
            .get_mut(node_ref.index as usize)
            .filter(|node| node.generation == node_ref.generation)
    }

    /// Remove every node. Used on shutdown.
    pub fn clear(&mut self) -> Vec<Arc<Loaded>> {
        let mut loaded = Vec::new();
        for slot in 0..self.slots.len() {
            while let Some(index) = self.slots[slot].first {
                loaded.extend(self.remove(slot, index));
            }
        }
        loaded
    }

    /// The number of nodes currently linked.
    pub fn len(&self) -> usize {
        self.nodes.len() - self.free_nodes.len()
    }
}

pub struct Stripe {
    pub state: RwLock<StripeState>,
    /// Bumped whenever a node of this stripe gets its load result.
    epoch: Mutex<u64>,
    cond: Condvar,
}

impl Stripe {
    fn new(slot_count: usize) -> Self {
        Stripe {
            state: RwLock::new(StripeState::new(slot_count)),
            epoch: Mutex::new(0),
            cond: Condvar::new(),
        }
    }

    /// Read the current epoch. Take it while holding the state lock to avoid missing a wake-up.
    pub fn epoch(&self) -> u64 {
        *self.epoch.lock()
    }

    /// Wake every thread waiting for a load result in this stripe.
    pub fn notify(&self) {
        *self.epoch.lock() += 1;
        self.cond.notify_all();
    }

    /// Wait until the epoch moves past `seen` or `deadline` passes.
    pub fn wait(&self, seen: u64, deadline: Instant) {
        let mut epoch = self.epoch.lock();
        while *epoch == seen {
            if self.cond.wait_until(&mut epoch, deadline).timed_out() {
                return;
            }
        }
    }
}

pub struct ShardedMap {
    stripes: Vec<Stripe>,
    slot_count: usize,
}

impl ShardedMap {
    /// `stripes` is clamped to `slot_count`.
    pub fn new(slot_count: usize, stripes: usize) -> Self {
        assert!(slot_count > 0 && stripes > 0);
        let stripe_count = stripes.min(slot_count);
        let slots_per_stripe = slot_count.div_ceil(stripe_count);
        ShardedMap {
            stripes: (0..stripe_count)
                .map(|_| Stripe::new(slots_per_stripe))
                .collect(),
            slot_count,
        }
    }

    /// Returns the stripe owning `path` and the index of its slot within the stripe.
    pub fn locate(&self, path: &str) -> (&Stripe, usize) {
        let slot = (fxhash::hash64(path.as_bytes()) % self.slot_count as u64) as usize;
        let stripe_count = self.stripes.len();
        (&self.stripes[slot % stripe_count], slot / stripe_count)
    }

    pub fn stripes(&self) -> &[Stripe] {
        &self.stripes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closest_timestamp_match() {
        let mut state = StripeState::new(4);
        let path = "/bin/app.rdi";
        let n10 = state.insert_new(1, path, 10);
        let n20 = state.insert_new(1, path, 20);
        let n30 = state.insert_new(1, path, 30);
        state.insert_new(1, "/bin/other.rdi", 16);

        assert_eq!(state.find_closest(1, path, 15), Some(n20));
        assert_eq!(state.find_closest(1, path, 20), Some(n20));
        assert_eq!(state.find_closest(1, path, 0), Some(n10));
        assert_eq!(state.find_closest(1, path, 21), Some(n30));
        assert_eq!(state.find_closest(1, path, 35), None);
        assert_eq!(state.find_closest(2, path, 0), None);

        assert_eq!(state.find_exact(1, path, 15), None);
        assert_eq!(state.find_exact(1, path, 30), Some(n30));
    }

    #[test]
    fn remove_relinks_and_recycles() {
        let mut state = StripeState::new(1);
        let a = state.insert_new(0, "/a", 0);
        let b = state.insert_new(0, "/b", 0);
        let c = state.insert_new(0, "/c", 0);
        let b_ref = state.node_ref(b);

        state.remove(0, b);
        assert_eq!(state.iter_slot(0).collect::<Vec<_>>(), vec![a, c]);
        assert!(state.resolve_mut(b_ref).is_none());
        assert_eq!(state.len(), 2);

        // The freed node is reused with a new generation and fresh counters.
        let d = state.insert_new(0, "/d", 7);
        assert_eq!(d, b);
        assert_ne!(state.node_ref(d), b_ref);
        assert_eq!(state.iter_slot(0).collect::<Vec<_>>(), vec![a, c, d]);
        assert_eq!(state.find_exact(0, "/d", 7), Some(d));
        assert_eq!(state.find_exact(0, "/b", 0), None);

        state.remove(0, a);
        state.remove(0, d);
        assert_eq!(state.iter_slot(0).collect::<Vec<_>>(), vec![c]);
        assert_eq!(state.slots[0].last, Some(c));
        state.remove(0, c);
        assert_eq!(state.slots[0].first, None);
        assert_eq!(state.slots[0].last, None);
        assert_eq!(state.len(), 0);
    }

    #[test]
    fn claim_is_exclusive() {
        let mut state = StripeState::new(1);
        let a = state.insert_new(0, "/a", 0);
        let counters = state.node(a).counters.clone();
        assert!(counters.try_claim());
        assert!(!counters.try_claim());

        // Recycling gives the node counters of its own.
        state.remove(0, a);
        let b = state.insert_new(0, "/a", 0);
        assert!(state.node(b).counters.try_claim());
    }

    #[test]
    fn slots_map_to_stripes() {
        let map = ShardedMap::new(10, 4);
        assert_eq!(map.stripes().len(), 4);
        let (stripe, slot) = map.locate("/some/file.rdi");
        assert!(slot < stripe.state.read().slots.len());

        let map = ShardedMap::new(2, 16);
        assert_eq!(map.stripes().len(), 2);
    }

    #[test]
    fn wait_returns_on_notify_or_deadline() {
        let stripe = Arc::new(Stripe::new(1));
        let seen = stripe.epoch();
        let start = Instant::now();
        stripe.wait(seen, start + std::time::Duration::from_millis(10));
        assert!(start.elapsed() >= std::time::Duration::from_millis(10));

        let notifier = {
            let stripe = stripe.clone();
            std::thread::spawn(move || {
                std::thread::sleep(std::time::Duration::from_millis(10));
                stripe.notify();
            })
        };
        stripe.wait(seen, Instant::now() + std::time::Duration::from_secs(10));
        assert_ne!(stripe.epoch(), seen);
        notifier.join().unwrap();
    }
}
