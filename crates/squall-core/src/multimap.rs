//! Ordered multi-valued map
//!
//! Keys keep their first-insertion order and every key maps to the list of
//! values added under it, duplicates included. Used for headers, query
//! string parameters and form parameters.

use smallvec::SmallVec;

type Values<V> = SmallVec<[V; 2]>;

/// Insertion-ordered `key -> [values]` container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiMap<K, V> {
    entries: Vec<(K, Values<V>)>,
}

impl<K: PartialEq, V> MultiMap<K, V> {
    /// Create an empty map
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Append a value under `key`, creating the key if needed
    pub fn add(&mut self, key: K, value: V) -> &mut Self {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, values)) => values.push(value),
            None => {
                let mut values = Values::new();
                values.push(value);
                self.entries.push((key, values));
            }
        }
        self
    }

    /// Check if the key has been added at least once
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: PartialEq<Q>,
        Q: ?Sized,
    {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// All values for `key`, in insertion order
    pub fn get_all<Q>(&self, key: &Q) -> Option<&[V]>
    where
        K: PartialEq<Q>,
        Q: ?Sized,
    {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, values)| values.as_slice())
    }

    /// First value for `key`
    pub fn get_first<Q>(&self, key: &Q) -> Option<&V>
    where
        K: PartialEq<Q>,
        Q: ?Sized,
    {
        self.get_all(key).and_then(|values| values.first())
    }

    /// Iterate over `(key, values)` in key insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&K, &[V])> {
        self.entries.iter().map(|(k, values)| (k, values.as_slice()))
    }

    /// Iterate over keys
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.iter().map(|(k, _)| k)
    }

    /// Number of distinct keys
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<V> MultiMap<String, V> {
    /// Case-insensitive lookup, for header names
    pub fn get_all_ignore_case(&self, key: &str) -> Option<&[V]> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, values)| values.as_slice())
    }

    /// Remove a key case-insensitively, returning its values
    pub fn remove_ignore_case(&mut self, key: &str) -> Option<Values<V>> {
        let index = self.entries.iter().position(|(k, _)| k.eq_ignore_ascii_case(key))?;
        Some(self.entries.remove(index).1)
    }
}

impl<K: PartialEq, V> Default for MultiMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
