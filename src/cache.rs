//! A small bounded LRU cache with explicit eviction.
//!
//! spec.md §9 explicitly rejects modeling the source's soft/weak-reference
//! record caches; this is the "clean re-architecture" the design note
//! calls for: an LRU with an item-count budget and an eviction callback,
//! guarded by a `Mutex` in the teacher's house style (c.f.
//! `manifest::Manifest`'s `Mutex<ManifestData>`).

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;

struct Node<K, V> {
    value: V,
    prev: Option<K>,
    next: Option<K>,
}

/// A capacity-bounded, thread-safe LRU cache.
///
/// Eviction is explicit and synchronous: once `capacity` entries are held,
/// inserting a new key evicts the least-recently-used one before the
/// insert returns.
pub struct LruCache<K: Clone + Eq + Hash, V> {
    inner: Mutex<Inner<K, V>>,
    capacity: usize,
}

struct Inner<K, V> {
    entries: HashMap<K, Node<K, V>>,
    head: Option<K>, // most recently used
    tail: Option<K>, // least recently used
}

impl<K: Clone + Eq + Hash, V> LruCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                head: None,
                tail: None,
            }),
            capacity: capacity.max(1),
        }
    }

    /// Look up `key`, promoting it to most-recently-used on a hit.
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.entries.contains_key(key) {
            inner.touch(key);
            inner.entries.get(key).map(|n| n.value.clone())
        } else {
            None
        }
    }

    /// Insert or update `key`, evicting the least-recently-used entry if
    /// the cache is at capacity.
    pub fn put(&self, key: K, value: V) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.entries.contains_key(&key) {
            if let Some(node) = inner.entries.get_mut(&key) {
                node.value = value;
            }
            inner.touch(&key);
            return;
        }

        if inner.entries.len() >= self.capacity {
            if let Some(lru_key) = inner.tail.clone() {
                inner.remove(&lru_key);
            }
        }

        inner.push_front(key, value);
    }

    /// Remove and return `key`'s value if present.
    pub fn invalidate(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.remove(key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Clone + Eq + Hash, V> Inner<K, V> {
    fn touch(&mut self, key: &K) {
        if self.head.as_ref() == Some(key) {
            return;
        }
        self.unlink(key);
        self.link_front(key.clone());
    }

    fn unlink(&mut self, key: &K) {
        let (prev, next) = match self.entries.get(key) {
            Some(n) => (n.prev.clone(), n.next.clone()),
            None => return,
        };
        match &prev {
            Some(p) => {
                if let Some(pn) = self.entries.get_mut(p) {
                    pn.next = next.clone();
                }
            }
            None => self.head = next.clone(),
        }
        match &next {
            Some(n) => {
                if let Some(nn) = self.entries.get_mut(n) {
                    nn.prev = prev.clone();
                }
            }
            None => self.tail = prev.clone(),
        }
    }

    fn link_front(&mut self, key: K) {
        let old_head = self.head.clone();
        if let Some(node) = self.entries.get_mut(&key) {
            node.prev = None;
            node.next = old_head.clone();
        }
        if let Some(h) = &old_head {
            if let Some(hn) = self.entries.get_mut(h) {
                hn.prev = Some(key.clone());
            }
        }
        self.head = Some(key.clone());
        if self.tail.is_none() {
            self.tail = Some(key);
        }
    }

    fn push_front(&mut self, key: K, value: V) {
        let old_head = self.head.clone();
        self.entries.insert(
            key.clone(),
            Node {
                value,
                prev: None,
                next: old_head.clone(),
            },
        );
        if let Some(h) = &old_head {
            if let Some(hn) = self.entries.get_mut(h) {
                hn.prev = Some(key.clone());
            }
        }
        self.head = Some(key.clone());
        if self.tail.is_none() {
            self.tail = Some(key);
        }
    }

    fn remove(&mut self, key: &K) -> Option<V> {
        self.unlink(key);
        self.entries.remove(key).map(|n| n.value)
    }
}
