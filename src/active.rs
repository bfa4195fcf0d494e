//! Registry of live execution contexts shared between threads.
//!
//! Each context (a [`Graph`](crate::Graph) with its queue) is driven by one
//! thread at a time. The registry only tracks which contexts exist. It takes
//! a shared lock around a whole read and an exclusive lock around a whole
//! write, so iteration never observes a half-applied change.

use std::hash::Hash;
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::RwLock;

/// Cloneable handle; clones share the same map.
#[derive(Debug)]
pub struct ActiveRegistry<K, V> {
    inner: Arc<RwLock<HashMap<K, V>>>,
}

impl<K, V> Clone for ActiveRegistry<K, V> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<K: Eq + Hash, V> Default for ActiveRegistry<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash, V> ActiveRegistry<K, V> {
    pub fn new() -> Self {
        Self { inner: Arc::new(RwLock::new(HashMap::new())) }
    }

    /// Returns the entry previously registered under `key`.
    pub fn register(&self, key: K, value: V) -> Option<V> {
        self.inner.write().insert(key, value)
    }

    pub fn unregister(&self, key: &K) -> Option<V> {
        self.inner.write().remove(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.inner.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.inner.read().get(key).cloned()
    }

    /// Runs `f` over the whole map under the shared lock.
    pub fn with_read<R>(&self, f: impl FnOnce(&HashMap<K, V>) -> R) -> R {
        f(&self.inner.read())
    }

    /// Runs `f` over the whole map under the exclusive lock.
    pub fn with_write<R>(&self, f: impl FnOnce(&mut HashMap<K, V>) -> R) -> R {
        f(&mut self.inner.write())
    }

    /// Snapshot of the keys.
    pub fn keys(&self) -> Vec<K>
    where
        K: Clone,
    {
        self.inner.read().keys().cloned().collect()
    }
}
