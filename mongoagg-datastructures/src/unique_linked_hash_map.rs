use linked_hash_map::LinkedHashMap;
use std::{fmt::Display, hash::Hash, iter::IntoIterator};
use thiserror::Error;

/// An insertion-ordered map that refuses duplicate keys. User-supplied
/// specifications ($project fields, $sort keys, $group accumulators) are
/// ordered documents where a repeated key is an error, not a silent
/// overwrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueLinkedHashMap<K, V>(LinkedHashMap<K, V>)
where
    K: Hash + Eq + PartialEq + Display;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("duplicate key found: {0}")]
pub struct DuplicateKeyError(pub String);

impl DuplicateKeyError {
    pub fn key_name(self) -> String {
        self.0
    }
}

impl<K, V> UniqueLinkedHashMap<K, V>
where
    K: Hash + PartialEq + Eq + Display,
{
    pub fn new() -> Self {
        Self(LinkedHashMap::new())
    }

    /// Inserts a key-value pair, failing if the key is already present.
    /// The existence check happens before insertion so the error can carry
    /// the offending key without cloning it.
    pub fn insert(&mut self, k: K, v: V) -> Result<(), DuplicateKeyError> {
        if self.0.contains_key(&k) {
            return Err(DuplicateKeyError(format!("{}", k)));
        }
        self.0.insert(k, v);
        Ok(())
    }

    pub fn insert_many(
        &mut self,
        other: impl Iterator<Item = (K, V)>,
    ) -> Result<(), DuplicateKeyError> {
        for (k, v) in other {
            self.insert(k, v)?;
        }
        Ok(())
    }

    pub fn get(&self, k: &K) -> Option<&V> {
        self.0.get(k)
    }

    pub fn contains_key(&self, k: &K) -> bool {
        self.0.contains_key(k)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.0.keys()
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.0.values()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.0.iter()
    }
}

impl<K, V> Default for UniqueLinkedHashMap<K, V>
where
    K: Hash + PartialEq + Eq + Display,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> IntoIterator for UniqueLinkedHashMap<K, V>
where
    K: Hash + PartialEq + Eq + Display,
{
    type Item = (K, V);
    type IntoIter = linked_hash_map::IntoIter<K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<K, V> From<LinkedHashMap<K, V>> for UniqueLinkedHashMap<K, V>
where
    K: Hash + Eq + PartialEq + Display,
{
    fn from(lhm: LinkedHashMap<K, V>) -> Self {
        Self(lhm)
    }
}

impl<K, V> From<UniqueLinkedHashMap<K, V>> for LinkedHashMap<K, V>
where
    K: Hash + Eq + PartialEq + Display,
{
    fn from(ulhm: UniqueLinkedHashMap<K, V>) -> Self {
        ulhm.0
    }
}
