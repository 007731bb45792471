//! In-memory engine.
//!
//! Committed state is an immutable `Arc<BTreeMap>`; snapshots pin the Arc
//! they were created from, and a batch publishes by swapping in a rebuilt
//! map under the engine lock. That models exactly the guarantees the
//! storage layer assumes of a real LSM engine: stable snapshot reads and
//! atomic, all-or-nothing batch commits.

use crate::{owned_bounds, KvEngine, KvError, KvIter, KvPair, KvSession, Result};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::iter::Peekable;
use std::ops::Bound;
use std::sync::Arc;

type Map = BTreeMap<Vec<u8>, Vec<u8>>;

// `lo..hi`, where an empty `hi` means unbounded.
fn range_to(lo: &[u8], hi: &[u8]) -> (Bound<Vec<u8>>, Bound<Vec<u8>>) {
    let hi = if hi.is_empty() {
        Bound::Unbounded
    } else {
        Bound::Excluded(hi.to_vec())
    };
    (Bound::Included(lo.to_vec()), hi)
}

/// A heap-backed [`KvEngine`]. Cloning yields a handle to the same store,
/// which is how tests model closing and reopening a database.
#[derive(Clone, Default)]
pub struct MemoryEngine {
    shared: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    committed: RwLock<Arc<Map>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys in committed state.
    pub fn len(&self) -> usize {
        self.shared.committed.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KvEngine for MemoryEngine {
    fn recover(&self) -> Result<()> {
        // Nothing buffered survives a crash of a heap-backed engine.
        Ok(())
    }

    fn cleanup_range(&self, lo: &[u8], hi: &[u8]) -> Result<()> {
        let bounds = range_to(lo, hi);
        let mut committed = self.shared.committed.write();
        if committed.range::<Vec<u8>, _>(bounds.clone()).next().is_none() {
            return Ok(());
        }
        let mut map = (**committed).clone();
        let doomed: Vec<_> = map
            .range::<Vec<u8>, _>(bounds)
            .map(|(k, _)| k.clone())
            .collect();
        for key in doomed {
            map.remove(&key);
        }
        *committed = Arc::new(map);
        Ok(())
    }

    fn snapshot_session(&self) -> Result<Box<dyn KvSession>> {
        Ok(Box::new(SnapshotSession {
            view: self.shared.committed.read().clone(),
        }))
    }

    fn batch_session(&self) -> Result<Box<dyn KvSession>> {
        Ok(Box::new(BatchSession {
            shared: self.shared.clone(),
            base: self.shared.committed.read().clone(),
            overlay: BTreeMap::new(),
            done: false,
        }))
    }
}

struct SnapshotSession {
    view: Arc<Map>,
}

impl KvSession for SnapshotSession {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.view.get(key).cloned())
    }

    fn insert(&mut self, _key: &[u8], _value: &[u8]) -> Result<()> {
        Err(KvError::ReadOnlySession)
    }

    fn put(&mut self, _key: &[u8], _value: &[u8]) -> Result<()> {
        Err(KvError::ReadOnlySession)
    }

    fn delete(&mut self, _key: &[u8]) -> Result<()> {
        Err(KvError::ReadOnlySession)
    }

    fn delete_range(&mut self, _lo: &[u8], _hi: &[u8]) -> Result<()> {
        Err(KvError::ReadOnlySession)
    }

    fn iter<'a>(&'a self, lo: Bound<&[u8]>, hi: Bound<&[u8]>, reverse: bool) -> Result<KvIter<'a>> {
        let range = self.view.range::<Vec<u8>, _>(owned_bounds(lo, hi));
        let pairs = range.map(|(k, v)| Ok((k.clone(), v.clone())));
        if reverse {
            Ok(Box::new(pairs.rev()))
        } else {
            Ok(Box::new(pairs))
        }
    }

    fn commit(&mut self) -> Result<()> {
        Ok(())
    }
}

struct BatchSession {
    shared: Arc<Shared>,
    base: Arc<Map>,
    /// Buffered writes; `None` is a tombstone.
    overlay: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    done: bool,
}

impl BatchSession {
    fn check_open(&self) -> Result<()> {
        if self.done {
            return Err(KvError::ReadOnlySession);
        }
        Ok(())
    }
}

impl KvSession for BatchSession {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.overlay.get(key) {
            Some(slot) => Ok(slot.clone()),
            None => Ok(self.base.get(key).cloned()),
        }
    }

    fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_open()?;
        if self.get(key)?.is_some() {
            return Err(KvError::KeyAlreadyExists);
        }
        self.overlay.insert(key.to_vec(), Some(value.to_vec()));
        Ok(())
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_open()?;
        self.overlay.insert(key.to_vec(), Some(value.to_vec()));
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.check_open()?;
        if self.get(key)?.is_none() {
            return Err(KvError::KeyNotFound);
        }
        self.overlay.insert(key.to_vec(), None);
        Ok(())
    }

    fn delete_range(&mut self, lo: &[u8], hi: &[u8]) -> Result<()> {
        self.check_open()?;
        let bounds = range_to(lo, hi);
        let mut doomed: Vec<Vec<u8>> = self
            .base
            .range::<Vec<u8>, _>(bounds.clone())
            .map(|(k, _)| k.clone())
            .collect();
        doomed.extend(
            self.overlay
                .range::<Vec<u8>, _>(bounds)
                .filter(|(_, slot)| slot.is_some())
                .map(|(k, _)| k.clone()),
        );
        for key in doomed {
            self.overlay.insert(key, None);
        }
        Ok(())
    }

    fn iter<'a>(&'a self, lo: Bound<&[u8]>, hi: Bound<&[u8]>, reverse: bool) -> Result<KvIter<'a>> {
        let bounds = owned_bounds(lo, hi);
        let base: Box<dyn Iterator<Item = (&'a Vec<u8>, &'a Vec<u8>)> + 'a> = {
            let range = self.base.range::<Vec<u8>, _>(bounds.clone());
            if reverse {
                Box::new(range.rev())
            } else {
                Box::new(range)
            }
        };
        let overlay: Box<dyn Iterator<Item = (&'a Vec<u8>, &'a Option<Vec<u8>>)> + 'a> = {
            let range = self.overlay.range::<Vec<u8>, _>(bounds);
            if reverse {
                Box::new(range.rev())
            } else {
                Box::new(range)
            }
        };
        Ok(Box::new(MergeIter {
            base: base.peekable(),
            overlay: overlay.peekable(),
            reverse,
        }))
    }

    fn commit(&mut self) -> Result<()> {
        self.check_open()?;
        self.done = true;
        let mut committed = self.shared.committed.write();
        let mut map = (**committed).clone();
        for (key, slot) in std::mem::take(&mut self.overlay) {
            match slot {
                Some(value) => {
                    map.insert(key, value);
                }
                None => {
                    map.remove(&key);
                }
            }
        }
        *committed = Arc::new(map);
        Ok(())
    }
}

/// Merges the overlay over the base view. On equal keys the overlay wins;
/// tombstones suppress base entries.
struct MergeIter<'a> {
    base: Peekable<Box<dyn Iterator<Item = (&'a Vec<u8>, &'a Vec<u8>)> + 'a>>,
    overlay: Peekable<Box<dyn Iterator<Item = (&'a Vec<u8>, &'a Option<Vec<u8>>)> + 'a>>,
    reverse: bool,
}

impl Iterator for MergeIter<'_> {
    type Item = Result<KvPair>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let take_overlay = match (self.base.peek(), self.overlay.peek()) {
                (None, None) => return None,
                (Some(_), None) => false,
                (None, Some(_)) => true,
                (Some((bk, _)), Some((ok, _))) => match bk.cmp(ok) {
                    std::cmp::Ordering::Equal => {
                        self.base.next();
                        true
                    }
                    std::cmp::Ordering::Less => self.reverse,
                    std::cmp::Ordering::Greater => !self.reverse,
                },
            };
            if take_overlay {
                let (key, slot) = self.overlay.next().unwrap();
                if let Some(value) = slot {
                    return Some(Ok((key.clone(), value.clone())));
                }
                // Tombstone: nothing to yield, keep scanning.
            } else {
                let (key, value) = self.base.next().unwrap();
                return Some(Ok((key.clone(), value.clone())));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn collect(iter: KvIter<'_>) -> Vec<(Vec<u8>, Vec<u8>)> {
        iter.map(|r| r.unwrap()).collect()
    }

    fn pair(k: &str, v: &str) -> (Vec<u8>, Vec<u8>) {
        (k.as_bytes().to_vec(), v.as_bytes().to_vec())
    }

    #[test]
    fn batch_commit_publishes_atomically() {
        let engine = MemoryEngine::new();
        let mut batch = engine.batch_session().unwrap();
        batch.put(b"a", b"1").unwrap();
        batch.put(b"b", b"2").unwrap();

        let before = engine.snapshot_session().unwrap();
        assert_eq!(before.get(b"a").unwrap(), None);

        batch.commit().unwrap();
        // The pre-commit snapshot still sees nothing.
        assert_eq!(before.get(b"a").unwrap(), None);
        let after = engine.snapshot_session().unwrap();
        assert_eq!(after.get(b"a").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn dropped_batch_discards_writes() {
        let engine = MemoryEngine::new();
        {
            let mut batch = engine.batch_session().unwrap();
            batch.put(b"a", b"1").unwrap();
        }
        assert!(engine.is_empty());
    }

    #[test]
    fn insert_respects_existing_keys() {
        let engine = MemoryEngine::new();
        let mut batch = engine.batch_session().unwrap();
        batch.insert(b"a", b"1").unwrap();
        assert!(matches!(batch.insert(b"a", b"2"), Err(KvError::KeyAlreadyExists)));
        batch.commit().unwrap();

        let mut batch = engine.batch_session().unwrap();
        assert!(matches!(batch.insert(b"a", b"2"), Err(KvError::KeyAlreadyExists)));
        batch.delete(b"a").unwrap();
        batch.insert(b"a", b"3").unwrap();
        batch.commit().unwrap();

        let snap = engine.snapshot_session().unwrap();
        assert_eq!(snap.get(b"a").unwrap(), Some(b"3".to_vec()));
    }

    #[test]
    fn delete_missing_key_fails() {
        let engine = MemoryEngine::new();
        let mut batch = engine.batch_session().unwrap();
        assert!(matches!(batch.delete(b"nope"), Err(KvError::KeyNotFound)));
    }

    #[test]
    fn merge_iterator_overlays_and_tombstones() {
        let engine = MemoryEngine::new();
        let mut batch = engine.batch_session().unwrap();
        for (k, v) in [("a", "1"), ("b", "2"), ("c", "3")] {
            batch.put(k.as_bytes(), v.as_bytes()).unwrap();
        }
        batch.commit().unwrap();

        let mut batch = engine.batch_session().unwrap();
        batch.put(b"b", b"2'").unwrap();
        batch.delete(b"c").unwrap();
        batch.put(b"d", b"4").unwrap();

        let forward = collect(batch.iter(Bound::Unbounded, Bound::Unbounded, false).unwrap());
        assert_eq!(forward, vec![pair("a", "1"), pair("b", "2'"), pair("d", "4")]);

        let backward = collect(batch.iter(Bound::Unbounded, Bound::Unbounded, true).unwrap());
        assert_eq!(backward, vec![pair("d", "4"), pair("b", "2'"), pair("a", "1")]);

        let bounded = collect(
            batch
                .iter(Bound::Included(b"b"), Bound::Excluded(b"d"), false)
                .unwrap(),
        );
        assert_eq!(bounded, vec![pair("b", "2'")]);
    }

    #[test]
    fn delete_range_spans_base_and_overlay() {
        let engine = MemoryEngine::new();
        let mut batch = engine.batch_session().unwrap();
        batch.put(b"a", b"1").unwrap();
        batch.put(b"b", b"2").unwrap();
        batch.commit().unwrap();

        let mut batch = engine.batch_session().unwrap();
        batch.put(b"c", b"3").unwrap();
        batch.delete_range(b"a", b"z").unwrap();
        batch.commit().unwrap();
        assert!(engine.is_empty());
    }

    #[test]
    fn cleanup_range_bypasses_sessions() {
        let engine = MemoryEngine::new();
        let mut batch = engine.batch_session().unwrap();
        batch.put(b"t1", b"x").unwrap();
        batch.put(b"u1", b"y").unwrap();
        batch.commit().unwrap();

        engine.cleanup_range(b"t", b"u").unwrap();
        let snap = engine.snapshot_session().unwrap();
        assert_eq!(snap.get(b"t1").unwrap(), None);
        assert_eq!(snap.get(b"u1").unwrap(), Some(b"y".to_vec()));
    }

    #[test]
    fn snapshot_rejects_writes() {
        let engine = MemoryEngine::new();
        let mut snap = engine.snapshot_session().unwrap();
        assert!(matches!(snap.put(b"a", b"1"), Err(KvError::ReadOnlySession)));
        assert!(matches!(snap.delete(b"a"), Err(KvError::ReadOnlySession)));
    }

    #[test]
    fn clones_share_the_store() {
        let engine = MemoryEngine::new();
        let mut batch = engine.batch_session().unwrap();
        batch.put(b"a", b"1").unwrap();
        batch.commit().unwrap();

        let reopened = engine.clone();
        let snap = reopened.snapshot_session().unwrap();
        assert_eq!(snap.get(b"a").unwrap(), Some(b"1".to_vec()));
    }
}
