//! Bounded collections with oldest-first eviction.
//!
//! Every unbounded stream the registry ingests (devices, node databases,
//! traceroute targets, traceroute entries, waypoints) is held in one of the two
//! containers below. Caps are enforced inside the mutating call, never lazily.
//!
//! - [`CappedMap`] keys by identity and remembers the order in which each key was
//!   *first* inserted. Overwriting an existing key keeps its original position, so
//!   the oldest distinct key is always the next to go.
//! - [`CappedLog`] is an ordered list with a length cap that evicts from the front.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// Named retention caps. Loaded from the `[retention]` config section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_max_devices")]
    pub max_devices: usize,
    #[serde(default = "default_max_node_databases")]
    pub max_node_databases: usize,
    #[serde(default = "default_max_traceroute_targets")]
    pub max_traceroute_targets: usize,
    #[serde(default = "default_max_traceroutes_per_target")]
    pub max_traceroutes_per_target: usize,
    #[serde(default = "default_max_waypoints")]
    pub max_waypoints: usize,
}

fn default_max_devices() -> usize {
    10
}

fn default_max_node_databases() -> usize {
    10
}

fn default_max_traceroute_targets() -> usize {
    100
}

fn default_max_traceroutes_per_target() -> usize {
    100
}

fn default_max_waypoints() -> usize {
    100
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_devices: default_max_devices(),
            max_node_databases: default_max_node_databases(),
            max_traceroute_targets: default_max_traceroute_targets(),
            max_traceroutes_per_target: default_max_traceroutes_per_target(),
            max_waypoints: default_max_waypoints(),
        }
    }
}

/// Map with a distinct-key cap. Iteration follows first-insertion order.
#[derive(Debug, Clone)]
pub struct CappedMap<K, V> {
    cap: usize,
    order: VecDeque<K>,
    entries: HashMap<K, V>,
}

impl<K: Eq + Hash + Clone, V> CappedMap<K, V> {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            order: VecDeque::new(),
            entries: HashMap::new(),
        }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Insert or overwrite `key`. Returns the entries evicted to get back under the cap.
    ///
    /// An overwrite does not move `key` in the eviction order.
    pub fn insert(&mut self, key: K, value: V) -> Vec<(K, V)> {
        if self.entries.insert(key.clone(), value).is_none() {
            self.order.push_back(key);
        }
        self.enforce_cap()
    }

    /// Return the entry for `key`, inserting `make()` first if it is absent.
    ///
    /// When the fresh insert pushes the map over its cap the oldest *other* keys are
    /// evicted and handed back alongside the reference.
    pub fn get_or_insert_with(&mut self, key: K, make: impl FnOnce() -> V) -> (&mut V, Vec<(K, V)>) {
        let mut evicted = Vec::new();
        if !self.entries.contains_key(&key) {
            // make room first so the fresh key is never the one evicted
            while !self.entries.is_empty() && self.entries.len() >= self.cap {
                let Some(oldest) = self.order.pop_front() else {
                    break;
                };
                if let Some(value) = self.entries.remove(&oldest) {
                    evicted.push((oldest, value));
                }
            }
            self.order.push_back(key.clone());
        }
        (self.entries.entry(key).or_insert_with(make), evicted)
    }

    /// Like [`get_or_insert_with`](Self::get_or_insert_with) but never evicts. The map
    /// may sit one over its cap until the caller runs [`enforce_cap`](Self::enforce_cap).
    pub fn get_or_insert_deferred(&mut self, key: K, make: impl FnOnce() -> V) -> &mut V {
        if !self.entries.contains_key(&key) {
            self.order.push_back(key.clone());
        }
        self.entries.entry(key).or_insert_with(make)
    }

    /// Re-check the cap (e.g. after a merge). Returns evicted entries.
    pub fn enforce_cap(&mut self) -> Vec<(K, V)> {
        let mut evicted = Vec::new();
        while self.entries.len() > self.cap {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            if let Some(value) = self.entries.remove(&oldest) {
                evicted.push((oldest, value));
            }
        }
        evicted
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.entries.get_mut(key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Remove `key` entirely, including its slot in the eviction order.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let value = self.entries.remove(key)?;
        self.order.retain(|k| k != key);
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys in eviction order (oldest first).
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.order.iter()
    }

    /// Entries in eviction order (oldest first).
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.order
            .iter()
            .filter_map(move |k| self.entries.get(k).map(|v| (k, v)))
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut V> {
        self.entries.values_mut()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.entries.clear();
    }
}

/// Ordered list with a length cap; the front is the oldest entry.
#[derive(Debug, Clone, PartialEq)]
pub struct CappedLog<T> {
    cap: usize,
    items: VecDeque<T>,
}

impl<T> CappedLog<T> {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            items: VecDeque::new(),
        }
    }

    /// Append to the back and evict from the front while over the cap.
    pub fn push(&mut self, item: T) -> Vec<T> {
        self.items.push_back(item);
        self.enforce_cap()
    }

    /// Remove the first entry matching `pred` and append `item` as most recent.
    pub fn upsert_by(&mut self, item: T, pred: impl Fn(&T) -> bool) -> Vec<T> {
        if let Some(pos) = self.items.iter().position(|existing| pred(existing)) {
            self.items.remove(pos);
        }
        self.push(item)
    }

    pub fn enforce_cap(&mut self) -> Vec<T> {
        let mut evicted = Vec::new();
        while self.items.len() > self.cap {
            if let Some(front) = self.items.pop_front() {
                evicted.push(front);
            }
        }
        evicted
    }

    pub fn retain(&mut self, keep: impl FnMut(&T) -> bool) {
        self.items.retain(keep);
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn find(&self, pred: impl Fn(&T) -> bool) -> Option<&T> {
        self.items.iter().find(|item| pred(item))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn into_vec(self) -> Vec<T> {
        self.items.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_keeps_most_recent_distinct_keys() {
        let mut map = CappedMap::new(3);
        for k in 0..7u32 {
            map.insert(k, k * 10);
        }
        assert_eq!(map.len(), 3);
        assert_eq!(map.keys().copied().collect::<Vec<_>>(), vec![4, 5, 6]);
    }

    #[test]
    fn overwrite_does_not_refresh_position() {
        let mut map = CappedMap::new(2);
        map.insert("a", 1);
        map.insert("b", 2);
        map.insert("a", 3);
        let evicted = map.insert("c", 4);
        assert_eq!(evicted, vec![("a", 3)]);
        assert!(map.contains_key(&"b"));
        assert!(map.contains_key(&"c"));
    }

    #[test]
    fn get_or_insert_spares_the_new_key() {
        let mut map = CappedMap::new(1);
        map.insert(1, "one");
        let (value, evicted) = map.get_or_insert_with(2, || "two");
        assert_eq!(*value, "two");
        assert_eq!(evicted, vec![(1, "one")]);
    }

    #[test]
    fn deferred_insert_waits_for_enforce_cap() {
        let mut map = CappedMap::new(1);
        map.insert(1, "one");
        *map.get_or_insert_deferred(2, || "two") = "second";
        assert_eq!(map.len(), 2);
        map.remove(&1);
        assert!(map.enforce_cap().is_empty());
        assert_eq!(map.get(&2), Some(&"second"));
    }

    #[test]
    fn remove_forgets_order_slot() {
        let mut map = CappedMap::new(2);
        map.insert(1, ());
        map.insert(2, ());
        map.remove(&1);
        map.insert(3, ());
        assert_eq!(map.keys().copied().collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn log_evicts_from_front() {
        let mut log = CappedLog::new(2);
        log.push(1);
        log.push(2);
        let evicted = log.push(3);
        assert_eq!(evicted, vec![1]);
        assert_eq!(log.iter().copied().collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn log_upsert_moves_to_back() {
        let mut log = CappedLog::new(3);
        log.push((1, "a"));
        log.push((2, "b"));
        log.push((3, "c"));
        log.upsert_by((1, "a2"), |e| e.0 == 1);
        let evicted = log.push((4, "d"));
        assert_eq!(evicted, vec![(2, "b")]);
        assert_eq!(
            log.iter().map(|e| e.1).collect::<Vec<_>>(),
            vec!["c", "a2", "d"]
        );
    }
}
