//! A fixed-size, open-chaining hash table whose key handling is supplied by the user.
//!
//! The table never computes hashes or compares keys itself. A [`KeyOps`] implementation extracts
//! the key from a stored value, hashes it and compares two keys, so the same table can intern
//! strings, longs or option descriptors keyed by name.

use std::marker::PhantomData;
use std::ops::ControlFlow;

/// Key handling for a [`HandleTable`].
pub trait KeyOps<V> {
    /// The key type, borrowed out of a stored value.
    type Key: ?Sized;

    /// Extract the key of a value.
    fn key(value: &V) -> &Self::Key;

    /// Hash a key. Only the low bits matter after the table reduces the hash by its size.
    fn hash(key: &Self::Key) -> u32;

    /// Are two keys equal?
    fn equals(k1: &Self::Key, k2: &Self::Key) -> bool;
}

/// Java's `String.hashCode` over bytes (`h = c + 31 * h`).
pub fn compute_string_hash(s: &str) -> u32 {
    s.bytes()
        .fold(0u32, |h, c| (c as u32).wrapping_add(h.wrapping_mul(31)))
}

/// Values keyed by a string name.
pub struct StrKey;

impl<V: AsRef<str>> KeyOps<V> for StrKey {
    type Key = str;
    fn key(value: &V) -> &str {
        value.as_ref()
    }
    fn hash(key: &str) -> u32 {
        compute_string_hash(key)
    }
    fn equals(k1: &str, k2: &str) -> bool {
        k1 == k2
    }
}

/// Values keyed by a 64-bit integer.
pub struct LongKey;

impl<V: AsRef<i64>> KeyOps<V> for LongKey {
    type Key = i64;
    fn key(value: &V) -> &i64 {
        value.as_ref()
    }
    fn hash(key: &i64) -> u32 {
        (*key ^ (*key >> 32)) as u32
    }
    fn equals(k1: &i64, k2: &i64) -> bool {
        k1 == k2
    }
}

pub struct HandleTable<V, O: KeyOps<V>> {
    buckets: Vec<Vec<V>>,
    number_of_entries: usize,
    _ops: PhantomData<O>,
}

impl<V, O: KeyOps<V>> HandleTable<V, O> {
    pub fn new(table_size: usize) -> Self {
        assert!(table_size > 0, "a hash table needs at least one bucket");
        let mut buckets = Vec::with_capacity(table_size);
        buckets.resize_with(table_size, Vec::new);
        Self {
            buckets,
            number_of_entries: 0,
            _ops: PhantomData,
        }
    }

    fn index_for(&self, key: &O::Key) -> usize {
        O::hash(key) as usize % self.buckets.len()
    }

    fn insert(&mut self, value: V, replace: bool) -> bool {
        let index = self.index_for(O::key(&value));
        let bucket = &mut self.buckets[index];
        if let Some(existing) = bucket
            .iter_mut()
            .find(|e| O::equals(O::key(e), O::key(&value)))
        {
            if replace {
                *existing = value;
            }
            return false;
        }
        // New entries go to the head of the chain.
        bucket.insert(0, value);
        self.number_of_entries += 1;
        true
    }

    /// Insert the value. Returns false and keeps the existing entry if one with the same key exists.
    pub fn add(&mut self, value: V) -> bool {
        self.insert(value, false)
    }

    /// Insert the value. Returns false if an entry with the same key existed, in which case it is replaced.
    pub fn put(&mut self, value: V) -> bool {
        self.insert(value, true)
    }

    pub fn get(&self, key: &O::Key) -> Option<&V> {
        self.buckets[self.index_for(key)]
            .iter()
            .find(|e| O::equals(O::key(e), key))
    }

    pub fn get_mut(&mut self, key: &O::Key) -> Option<&mut V> {
        let index = self.index_for(key);
        self.buckets[index]
            .iter_mut()
            .find(|e| O::equals(O::key(e), key))
    }

    /// Return the entry for the key, inserting the value built by `create` if there is none.
    pub fn intern<F: FnOnce() -> V>(&mut self, key: &O::Key, create: F) -> &V {
        let index = self.index_for(key);
        let pos = self.buckets[index]
            .iter()
            .position(|e| O::equals(O::key(e), key));
        let pos = match pos {
            Some(pos) => pos,
            None => {
                let value = create();
                debug_assert!(O::equals(O::key(&value), key));
                self.buckets[index].insert(0, value);
                self.number_of_entries += 1;
                0
            }
        };
        &self.buckets[index][pos]
    }

    /// Visit every value, bucket by bucket. The visitor can stop the walk by returning `ControlFlow::Break`.
    pub fn for_each<F: FnMut(&V) -> ControlFlow<()>>(&self, mut visitor: F) {
        for bucket in self.buckets.iter() {
            for value in bucket.iter() {
                if visitor(value).is_break() {
                    return;
                }
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &V> {
        self.buckets.iter().flat_map(|b| b.iter())
    }

    pub fn number_of_entries(&self) -> usize {
        self.number_of_entries
    }

    pub fn is_empty(&self) -> bool {
        self.number_of_entries == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(String, u32);
    impl AsRef<str> for Named {
        fn as_ref(&self) -> &str {
            &self.0
        }
    }

    #[test]
    fn string_hash_matches_java() {
        // "hello".hashCode() == 99162322
        assert_eq!(compute_string_hash("hello"), 99162322);
        assert_eq!(compute_string_hash(""), 0);
    }

    #[test]
    fn add_does_not_replace() {
        let mut table: HandleTable<Named, StrKey> = HandleTable::new(7);
        assert!(table.add(Named("a".to_string(), 1)));
        assert!(!table.add(Named("a".to_string(), 2)));
        assert_eq!(table.get("a").unwrap().1, 1);
        assert_eq!(table.number_of_entries(), 1);
    }

    #[test]
    fn put_replaces() {
        let mut table: HandleTable<Named, StrKey> = HandleTable::new(7);
        assert!(table.put(Named("a".to_string(), 1)));
        assert!(!table.put(Named("a".to_string(), 2)));
        assert_eq!(table.get("a").unwrap().1, 2);
        assert_eq!(table.number_of_entries(), 1);
    }

    #[test]
    fn collisions_in_one_bucket() {
        let mut table: HandleTable<Named, StrKey> = HandleTable::new(1);
        for (i, name) in ["x", "y", "z"].iter().enumerate() {
            assert!(table.add(Named(name.to_string(), i as u32)));
        }
        assert_eq!(table.get("y").unwrap().1, 1);
        assert!(table.get("w").is_none());
        assert_eq!(table.iter().count(), 3);
    }

    #[test]
    fn intern_once() {
        let mut table: HandleTable<Named, StrKey> = HandleTable::new(3);
        let mut created = 0;
        for _ in 0..3 {
            table.intern("k", || {
                created += 1;
                Named("k".to_string(), 9)
            });
        }
        assert_eq!(created, 1);
        assert_eq!(table.number_of_entries(), 1);
    }

    #[test]
    fn for_each_can_stop() {
        let mut table: HandleTable<Named, StrKey> = HandleTable::new(5);
        for i in 0..10 {
            table.add(Named(format!("n{}", i), i));
        }
        let mut seen = 0;
        table.for_each(|_| {
            seen += 1;
            if seen == 4 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });
        assert_eq!(seen, 4);
    }
}
