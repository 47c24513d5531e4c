//! Bounded search result cache.
//!
//! Eviction follows insertion order: the oldest inserted entry goes first,
//! whether or not it was read recently. Entries are stamped with the store
//! generation they were computed at and are discarded once the store moves on.

use std::collections::{HashMap, VecDeque};

use crate::types::search::SearchOptions;

/// Builds the key for a normalized query and its options.
pub fn cache_key(normalized_query: &str, options: &SearchOptions) -> Option<String> {
    let options = serde_json::to_string(options).ok()?;
    Some(format!("{}\u{1f}{}", normalized_query, options))
}

pub struct QueryCache<V> {
    capacity: usize,
    entries: HashMap<String, (u64, V)>,
    order: VecDeque<String>,
}

impl<V: Clone> QueryCache<V> {
    /// A capacity of zero disables caching.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Returns the cached value when it was computed at `generation`.
    pub fn get(&mut self, key: &str, generation: u64) -> Option<V> {
        match self.entries.get(key) {
            Some((stamp, value)) if *stamp == generation => Some(value.clone()),
            Some(_) => {
                self.entries.remove(key);
                self.order.retain(|k| k != key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&mut self, key: String, generation: u64, value: V) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.insert(key.clone(), (generation, value)).is_none() {
            self.order.push_back(key);
        }
        while self.entries.len() > self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}
