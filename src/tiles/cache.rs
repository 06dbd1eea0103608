use lru::LruCache;
use std::hash::Hash;

/// LRU cache bounded by the summed cost of its entries instead of their count
///
/// Inserting evicts least recently used entries until the new entry fits.
/// Lowering the limit does not evict by itself, the next insert does.
pub struct CostLruCache<K: Hash + Eq, V> {
    entries: LruCache<K, (V, usize)>,
    max_cost: usize,
    total_cost: usize,
}

impl<K: Hash + Eq, V> CostLruCache<K, V> {
    pub fn new(max_cost: usize) -> Self {
        Self {
            entries: LruCache::unbounded(),
            max_cost,
            total_cost: 0,
        }
    }

    /// Inserts an entry, returning `false` (and dropping the value) if its cost alone exceeds the limit
    pub fn insert(&mut self, key: K, value: V, cost: usize) -> bool {
        if let Some((_, old_cost)) = self.entries.pop(&key) {
            self.total_cost -= old_cost;
        }
        if cost > self.max_cost {
            return false;
        }
        while self.total_cost + cost > self.max_cost {
            match self.entries.pop_lru() {
                Some((_, (_, evicted_cost))) => self.total_cost -= evicted_cost,
                None => break,
            }
        }
        self.entries.put(key, (value, cost));
        self.total_cost += cost;
        true
    }

    /// Looks up an entry and marks it most recently used
    pub fn get(&mut self, key: &K) -> Option<&V> {
        self.entries.get(key).map(|(value, _)| value)
    }

    /// Removes an entry and hands it out
    pub fn take(&mut self, key: &K) -> Option<V> {
        let (value, cost) = self.entries.pop(key)?;
        self.total_cost -= cost;
        Some(value)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains(key)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.total_cost = 0;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_cost(&self) -> usize {
        self.total_cost
    }

    pub fn max_cost(&self) -> usize {
        self.max_cost
    }

    pub fn set_max_cost(&mut self, max_cost: usize) {
        self.max_cost = max_cost;
    }

    /// Keys from most to least recently used
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.iter().map(|(key, _)| key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_evicts_least_recently_used() {
        let mut cache = CostLruCache::new(10);
        assert!(cache.insert("a", 1, 4));
        assert!(cache.insert("b", 2, 4));
        assert_eq!(cache.get(&"a"), Some(&1));

        assert!(cache.insert("c", 3, 4));
        assert!(cache.contains(&"a"));
        assert!(!cache.contains(&"b"));
        assert_eq!(cache.total_cost(), 8);
    }

    #[test]
    fn test_oversized_insert_is_refused() {
        let mut cache = CostLruCache::new(0);
        assert!(!cache.insert(1, "tile", 16));
        assert!(cache.is_empty());
        assert_eq!(cache.total_cost(), 0);
    }

    #[test]
    fn test_reinsert_replaces_cost() {
        let mut cache = CostLruCache::new(10);
        cache.insert(1, 'x', 6);
        cache.insert(1, 'y', 3);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.total_cost(), 3);
        assert_eq!(cache.take(&1), Some('y'));
        assert_eq!(cache.total_cost(), 0);
    }

    #[test]
    fn test_lowering_limit_evicts_on_next_insert() {
        let mut cache = CostLruCache::new(100);
        for key in 0..5 {
            cache.insert(key, key, 10);
        }
        cache.set_max_cost(20);
        assert_eq!(cache.len(), 5);

        cache.insert(5, 5, 10);
        assert_eq!(cache.len(), 2);
        assert!(cache.contains(&5));
        assert!(cache.contains(&4));
        assert_eq!(cache.keys().copied().collect::<Vec<_>>(), vec![5, 4]);
    }
}
