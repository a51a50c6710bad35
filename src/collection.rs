//! Write-once, nested-key result collection: each rank accumulates `(key path, value)`
//! pairs locally, then a single [`NestedMap::gather`] call merges every rank's map at
//! root, rejecting any key two ranks wrote independently.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::communicator::Communicator;
use crate::error::{Error, Result};

/// A local, write-once map keyed by a path of string components (e.g. `["epoch3",
/// "loss"]`). Writing the same key twice is a programming error, not a race — it is
/// caught locally before anything goes on the wire.
#[derive(Debug, Default)]
pub struct NestedMap<V> {
    entries: HashMap<Vec<String>, V>,
}

impl<V> NestedMap<V> {
    pub fn new() -> NestedMap<V> {
        NestedMap {
            entries: HashMap::new(),
        }
    }

    /// Write `value` at `key`. Errors if `key` was already written on this rank.
    pub fn insert(&mut self, key: Vec<String>, value: V) -> Result<()> {
        if self.entries.contains_key(&key) {
            return Err(Error::OverwriteNotAllowed { key });
        }
        self.entries.insert(key, value);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<V: Clone + Serialize + DeserializeOwned> NestedMap<V> {
    /// Gather every rank's map at `root`, merge them, and un-flatten the result into a
    /// [`NestedTree`]. On root returns `Some(tree)`; elsewhere `None`. Any key written
    /// by more than one rank fails the whole gather with [`Error::DuplicateGatherKeys`]
    /// enumerating every collision.
    pub fn gather(&self, comm: &mut Communicator, root: usize) -> Result<Option<NestedTree<V>>> {
        let flat: Vec<(Vec<String>, V)> = self
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let Some(per_rank) = comm.gather(flat, root)? else {
            return Ok(None);
        };

        let mut owners: HashMap<Vec<String>, Vec<usize>> = HashMap::new();
        let mut values: HashMap<Vec<String>, V> = HashMap::new();
        for (rank, entries) in per_rank.into_iter().enumerate() {
            for (key, value) in entries {
                owners.entry(key.clone()).or_default().push(rank);
                values.entry(key).or_insert(value);
            }
        }

        let duplicates: Vec<(Vec<String>, Vec<usize>)> =
            owners.into_iter().filter(|(_, ranks)| ranks.len() > 1).collect();

        if !duplicates.is_empty() {
            let mut report = String::new();
            for (key, ranks) in &duplicates {
                report.push_str(&format!("key {key:?} written by ranks {ranks:?}\n"));
            }
            return Err(Error::DuplicateGatherKeys { report });
        }

        Ok(Some(NestedTree::from_flat(values)))
    }
}

/// The merged, un-flattened result of a [`NestedMap::gather`]: a tree whose leaves are
/// user values and whose branches are keyed by the original path components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NestedTree<V> {
    Leaf(V),
    Branch(HashMap<String, NestedTree<V>>),
}

impl<V> NestedTree<V> {
    /// Build a tree from a flat `key path -> value` map by grouping on the first
    /// remaining path component at each level.
    pub fn from_flat(flat: HashMap<Vec<String>, V>) -> NestedTree<V> {
        let mut grouped: HashMap<String, HashMap<Vec<String>, V>> = HashMap::new();
        for (mut key, value) in flat {
            if key.is_empty() {
                // A zero-component key at the top level means there was exactly one
                // entry and no nesting at all; treat the whole tree as that leaf.
                return NestedTree::Leaf(value);
            }
            let head = key.remove(0);
            grouped.entry(head).or_default().insert(key, value);
        }
        NestedTree::Branch(
            grouped
                .into_iter()
                .map(|(component, sub)| (component, NestedTree::from_flat(sub)))
                .collect(),
        )
    }

    /// Look up a value by its full path of components.
    pub fn get(&self, path: &[&str]) -> Option<&V> {
        match (self, path) {
            (NestedTree::Leaf(v), []) => Some(v),
            (NestedTree::Branch(map), [head, rest @ ..]) => map.get(*head)?.get(rest),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_write_at_same_key_errors() {
        let mut map: NestedMap<i32> = NestedMap::new();
        map.insert(vec!["a".into()], 1).unwrap();
        let err = map.insert(vec!["a".into()], 2).unwrap_err();
        assert!(matches!(err, Error::OverwriteNotAllowed { .. }));
    }

    #[test]
    fn distinct_keys_both_succeed() {
        let mut map: NestedMap<i32> = NestedMap::new();
        map.insert(vec!["a".into()], 1).unwrap();
        map.insert(vec!["b".into()], 2).unwrap();
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn unflattens_two_level_tree() {
        let mut flat = HashMap::new();
        flat.insert(vec!["epoch1".to_string(), "loss".to_string()], 0.5);
        flat.insert(vec!["epoch1".to_string(), "acc".to_string()], 0.9);
        flat.insert(vec!["epoch2".to_string(), "loss".to_string()], 0.3);

        let tree = NestedTree::from_flat(flat);
        assert_eq!(tree.get(&["epoch1", "loss"]), Some(&0.5));
        assert_eq!(tree.get(&["epoch1", "acc"]), Some(&0.9));
        assert_eq!(tree.get(&["epoch2", "loss"]), Some(&0.3));
        assert_eq!(tree.get(&["epoch3", "loss"]), None);
    }

    #[test]
    fn single_entry_with_empty_path_is_a_bare_leaf() {
        let mut flat = HashMap::new();
        flat.insert(Vec::new(), 42);
        let tree = NestedTree::from_flat(flat);
        assert_eq!(tree, NestedTree::Leaf(42));
    }
}
