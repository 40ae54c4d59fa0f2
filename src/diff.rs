use serde::Serialize;
use std::collections::BTreeMap;

/// Raw classification of a key between two snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Change {
    New,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChangeCounts {
    pub new: usize,
    pub update: usize,
    pub delete: usize,
}

impl ChangeCounts {
    fn record(&mut self, change: Change) {
        match change {
            Change::New => self.new += 1,
            Change::Update => self.update += 1,
            Change::Delete => self.delete += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.new + self.update + self.delete
    }
}

/// Changed keys in ascending key order. Unchanged keys are absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet<K> {
    pub changes: BTreeMap<K, Change>,
    pub counts: ChangeCounts,
}

impl<K> ChangeSet<K> {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Classifies every key of `current` and `previous`.
///
/// A key only in `current` is new, only in `previous` is deleted, and in both
/// with unequal values is updated.
pub fn compare<K, V>(current: &BTreeMap<K, V>, previous: &BTreeMap<K, V>) -> ChangeSet<K>
where
    K: Ord + Clone,
    V: PartialEq,
{
    let mut changes = BTreeMap::new();
    let mut counts = ChangeCounts::default();

    for (key, old) in previous {
        let change = match current.get(key) {
            None => Change::Delete,
            Some(value) if value != old => Change::Update,
            Some(_) => continue,
        };
        counts.record(change);
        changes.insert(key.clone(), change);
    }
    for key in current.keys() {
        if !previous.contains_key(key) {
            counts.record(Change::New);
            changes.insert(key.clone(), Change::New);
        }
    }

    ChangeSet { changes, counts }
}
