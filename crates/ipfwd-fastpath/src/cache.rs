//! Bounded, recency-evicting rewrite cache.
//!
//! Maps destination IPv4 address to a [`ForwardingAction`]. The cache is
//! sharded: each shard owns a hash map plus a lazily-compacted recency
//! queue behind its own short-lived lock, so independent packet-processing
//! contexts can look up and insert concurrently. Capacity is enforced per
//! shard, which makes the recency bound exact within a shard and
//! approximate globally, the same contract as the kernel LRU map this
//! design replaces.
//!
//! Entries never expire on their own. Staleness after a topology change is
//! handled exclusively through [`invalidate`](RewriteCache::invalidate) /
//! [`invalidate_all`](RewriteCache::invalidate_all), driven by an external
//! control plane.

use std::collections::{HashMap, VecDeque};
use std::net::Ipv4Addr;

use parking_lot::Mutex;

use crate::types::ForwardingAction;

/// Default total entry bound.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Default shard count. Power of two, sized for typical receive-queue
/// parallelism.
pub const DEFAULT_SHARDS: usize = 16;

/// Recency queue may grow to this multiple of the shard capacity before a
/// compaction sweep discards superseded entries.
const ORDER_SLACK: usize = 4;

struct Slot {
    action: ForwardingAction,
    touched: u64,
}

struct Shard {
    map: HashMap<Ipv4Addr, Slot>,
    /// Append-only recency log with lazy invalidation: an entry is live
    /// only while its tick matches the slot's `touched`.
    order: VecDeque<(Ipv4Addr, u64)>,
    clock: u64,
    capacity: usize,
}

impl Shard {
    fn new(capacity: usize) -> Self {
        Self {
            map: HashMap::with_capacity(capacity),
            order: VecDeque::new(),
            clock: 0,
            capacity,
        }
    }

    fn touch(&mut self, dst: Ipv4Addr) -> u64 {
        self.clock += 1;
        self.order.push_back((dst, self.clock));
        self.clock
    }

    fn lookup(&mut self, dst: Ipv4Addr) -> Option<ForwardingAction> {
        let tick = match self.map.get(&dst) {
            Some(_) => {
                self.clock += 1;
                self.clock
            }
            None => return None,
        };
        self.order.push_back((dst, tick));
        let slot = self.map.get_mut(&dst)?;
        slot.touched = tick;
        let action = slot.action;
        self.maybe_compact();
        Some(action)
    }

    fn insert(&mut self, dst: Ipv4Addr, action: ForwardingAction) {
        let tick = self.touch(dst);
        self.map.insert(dst, Slot { action, touched: tick });
        while self.map.len() > self.capacity {
            self.evict_lru();
        }
        self.maybe_compact();
    }

    /// Pop recency entries until one still names the live generation of a
    /// resident key, and remove that key.
    fn evict_lru(&mut self) {
        while let Some((ip, tick)) = self.order.pop_front() {
            let live = self.map.get(&ip).is_some_and(|slot| slot.touched == tick);
            if live {
                self.map.remove(&ip);
                return;
            }
        }
    }

    fn maybe_compact(&mut self) {
        let threshold = self.capacity.saturating_mul(ORDER_SLACK).max(64);
        if self.order.len() > threshold {
            let map = &self.map;
            self.order
                .retain(|(ip, tick)| map.get(ip).is_some_and(|slot| slot.touched == *tick));
        }
    }
}

/// Concurrent bounded map from destination address to forwarding action.
pub struct RewriteCache {
    shards: Box<[Mutex<Shard>]>,
    shard_capacity: usize,
}

impl RewriteCache {
    /// Create a cache with the given total capacity and [`DEFAULT_SHARDS`]
    /// shards. Capacity is rounded up to a multiple of the shard count.
    pub fn new(capacity: usize) -> Self {
        Self::with_shards(capacity, DEFAULT_SHARDS)
    }

    /// Create a cache with an explicit shard count. A single shard gives
    /// exact global LRU order at the cost of one lock for all contexts.
    pub fn with_shards(capacity: usize, shards: usize) -> Self {
        let shards = shards.max(1);
        let shard_capacity = capacity.div_ceil(shards).max(1);
        let shards = (0..shards)
            .map(|_| Mutex::new(Shard::new(shard_capacity)))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            shards,
            shard_capacity,
        }
    }

    fn shard(&self, dst: Ipv4Addr) -> &Mutex<Shard> {
        // Fibonacci mix so consecutive host addresses spread across shards.
        let mixed = u32::from(dst).wrapping_mul(0x9E37_79B9);
        let idx = (mixed >> 16) as usize % self.shards.len();
        &self.shards[idx]
    }

    /// Fast-path lookup. Bumps the entry's recency on hit; no other side
    /// effect. Never blocks on I/O.
    pub fn lookup(&self, dst: Ipv4Addr) -> Option<ForwardingAction> {
        self.shard(dst).lock().lookup(dst)
    }

    /// Upsert an action for `dst`. If the owning shard is at capacity and
    /// the key is new, the least-recently-touched entry is evicted first.
    pub fn insert(&self, dst: Ipv4Addr, action: ForwardingAction) {
        self.shard(dst).lock().insert(dst, action);
    }

    /// Control-plane hook: drop the entry for `dst` if present.
    pub fn invalidate(&self, dst: Ipv4Addr) -> bool {
        self.shard(dst).lock().map.remove(&dst).is_some()
    }

    /// Control-plane hook: drop every entry.
    pub fn invalidate_all(&self) {
        for shard in self.shards.iter() {
            let mut shard = shard.lock();
            shard.map.clear();
            shard.order.clear();
        }
    }

    /// Total entries resident across all shards.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().map.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.lock().map.is_empty())
    }

    /// Total entry bound (shard capacity times shard count).
    pub fn capacity(&self) -> usize {
        self.shard_capacity * self.shards.len()
    }

    /// Copy out every resident entry, for control-plane queries.
    pub fn snapshot(&self) -> Vec<(Ipv4Addr, ForwardingAction)> {
        let mut out = Vec::with_capacity(self.len());
        for shard in self.shards.iter() {
            let shard = shard.lock();
            out.extend(shard.map.iter().map(|(ip, slot)| (*ip, slot.action)));
        }
        out
    }
}

impl Default for RewriteCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use ipfwd_core::{InterfaceId, MacAddr};
    use proptest::prelude::*;

    fn action_from(seed: u8) -> ForwardingAction {
        ForwardingAction::new(
            InterfaceId(u32::from(seed)),
            MacAddr::new([0x02, 0, 0, 0, 0, seed]),
            MacAddr::new([0x02, 0xff, 0, 0, 0, seed]),
        )
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn insert_then_lookup_returns_value(addr in any::<u32>(), seed in any::<u8>()) {
            let cache = RewriteCache::new(256);
            let dst = Ipv4Addr::from(addr);
            cache.insert(dst, action_from(seed));
            prop_assert_eq!(cache.lookup(dst), Some(action_from(seed)));
        }

        #[test]
        fn residency_never_exceeds_capacity(
            addrs in proptest::collection::vec(any::<u32>(), 0..512),
        ) {
            let cache = RewriteCache::with_shards(64, 4);
            for addr in addrs {
                cache.insert(Ipv4Addr::from(addr), action_from((addr % 251) as u8));
            }
            prop_assert!(cache.len() <= cache.capacity());
        }
    }
}
