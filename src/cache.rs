use std::collections::HashMap;

/// A least-recently-used map from template name to compiled template.
///
/// Recency is tracked with a monotonically increasing tick per access; the
/// entry with the smallest tick is evicted once the cache is full. Capacities
/// stay small (hundreds of templates), so eviction scans the entries.
#[derive(Debug)]
pub(crate) struct LruCache<V> {
    capacity: usize,
    tick: u64,
    entries: HashMap<String, Entry<V>>,
}

#[derive(Debug)]
struct Entry<V> {
    value: V,
    last_used: u64,
}

impl<V: Clone> LruCache<V> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            tick: 0,
            entries: HashMap::with_capacity(capacity),
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.tick = self.tick.wrapping_add(1);
        self.tick
    }

    pub(crate) fn get(&mut self, name: &str) -> Option<V> {
        let tick = self.next_tick();
        let entry = self.entries.get_mut(name)?;
        entry.last_used = tick;
        tracing::trace!(name, "template cache hit");
        Some(entry.value.clone())
    }

    /// Stores `value` under `name` unless another value got there first, and
    /// returns whichever value is now cached.
    pub(crate) fn insert(&mut self, name: &str, value: V) -> V {
        if self.capacity == 0 {
            return value;
        }
        if let Some(existing) = self.get(name) {
            return existing;
        }

        if self.entries.len() >= self.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(name, _)| name.clone());
            if let Some(oldest) = oldest {
                self.entries.remove(&oldest);
                tracing::debug!(name = %oldest, "evicted compiled template");
            }
        }

        let last_used = self.next_tick();
        self.entries.insert(
            name.to_owned(),
            Entry {
                value: value.clone(),
                last_used,
            },
        );
        value
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
