//! The ordered key-value engine contract the storage layer is built on.
//!
//! The engine supplies two kinds of sessions: snapshots, which see the
//! committed state as of their creation and reject writes, and batches,
//! which buffer writes and publish them atomically on commit. At most one
//! batch session is in flight at a time; the storage layer enforces this
//! with its writer mutex, the engine does not have to.
//!
//! [`memory::MemoryEngine`] implements the contract in memory and is the
//! default engine for tests and embedders that do not need durability.

pub mod memory;

use std::ops::Bound;
use thiserror::Error;

pub type Result<T, E = KvError> = std::result::Result<T, E>;

/// Errors surfaced by engine sessions.
#[derive(Debug, Error)]
pub enum KvError {
    #[error("key not found")]
    KeyNotFound,
    #[error("key already exists")]
    KeyAlreadyExists,
    #[error("session is read-only")]
    ReadOnlySession,
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// A key/value pair as returned by iterators.
pub type KvPair = (Vec<u8>, Vec<u8>);

/// Streaming iterator over a key range. Items surface engine errors
/// per-entry so a corrupt record does not hide the entries before it.
pub type KvIter<'a> = Box<dyn Iterator<Item = Result<KvPair>> + 'a>;

/// One session against the engine: either a snapshot or a write batch.
pub trait KvSession: Send {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Writes `key`, failing with [`KvError::KeyAlreadyExists`] when it is
    /// already present.
    fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Writes `key` unconditionally.
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Removes `key`, failing with [`KvError::KeyNotFound`] when absent.
    fn delete(&mut self, key: &[u8]) -> Result<()>;

    /// Removes every key in `lo..hi` (upper bound exclusive). An empty
    /// `hi` means no upper bound.
    fn delete_range(&mut self, lo: &[u8], hi: &[u8]) -> Result<()>;

    /// Iterates the session's view of `(lo, hi)` in key order, or reversed.
    fn iter<'a>(
        &'a self,
        lo: Bound<&[u8]>,
        hi: Bound<&[u8]>,
        reverse: bool,
    ) -> Result<KvIter<'a>>;

    /// Publishes buffered writes. A session must not be used afterwards;
    /// dropping a batch without committing discards it.
    fn commit(&mut self) -> Result<()>;
}

/// The engine itself. Shared behind an `Arc` by the database.
pub trait KvEngine: Send + Sync {
    /// Completes or undoes any write batch interrupted by a crash.
    fn recover(&self) -> Result<()>;

    /// Deletes the key range `lo..hi` directly from committed state; an
    /// empty `hi` means no upper bound. Used at open to drop stale
    /// transient namespaces.
    fn cleanup_range(&self, lo: &[u8], hi: &[u8]) -> Result<()>;

    fn snapshot_session(&self) -> Result<Box<dyn KvSession>>;

    fn batch_session(&self) -> Result<Box<dyn KvSession>>;
}

pub(crate) fn owned_bounds(lo: Bound<&[u8]>, hi: Bound<&[u8]>) -> (Bound<Vec<u8>>, Bound<Vec<u8>>) {
    (lo.map(<[u8]>::to_vec), hi.map(<[u8]>::to_vec))
}
