//! Shared primitive types for the basalt storage engine.
//!
//! Everything here is a plain newtype with no behavior beyond what the
//! keyspace layout demands, so that every layer (codec, kv, datastore) can
//! agree on them without depending on each other.

use std::fmt;

/// A 64-bit prefix that partitions the engine keyspace.
///
/// Every key written by the storage layer starts with the order-preserving
/// encoding of a namespace, so that one table or index occupies one
/// contiguous key range.
///
/// The layout of the namespace space is fixed:
///
/// | range                          | use                                  |
/// |--------------------------------|--------------------------------------|
/// | `1`                            | the `__catalog` system table         |
/// | `2`                            | the `__sequence` system table        |
/// | `3`                            | the engine's rollback segment        |
/// | `10..`                         | user tables and indexes              |
/// | top `2^24` values              | transient (never persisted)          |
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Namespace(pub u64);

/// Number of namespaces reserved for transient use.
pub const TRANSIENT_NAMESPACE_COUNT: u64 = 1 << 24;

impl Namespace {
    /// Namespace of the `__catalog` system table.
    pub const CATALOG: Namespace = Namespace(1);
    /// Namespace of the `__sequence` system table.
    pub const SEQUENCES: Namespace = Namespace(2);
    /// Namespace of the engine's rollback segment. Opaque to the storage
    /// layer; reserved here so it is never handed out.
    pub const ROLLBACK_SEGMENT: Namespace = Namespace(3);
    /// First namespace available to user relations.
    pub const FIRST_USER: Namespace = Namespace(10);
    /// Lowest transient namespace.
    pub const MIN_TRANSIENT: Namespace = Namespace(u64::MAX - TRANSIENT_NAMESPACE_COUNT + 1);
    /// Highest transient namespace.
    pub const MAX_TRANSIENT: Namespace = Namespace(u64::MAX);

    /// Whether this namespace falls in the transient range.
    pub fn is_transient(self) -> bool {
        self >= Self::MIN_TRANSIENT
    }

    /// Whether this namespace is reserved for system use.
    pub fn is_reserved(self) -> bool {
        self < Self::FIRST_USER
    }
}

impl From<u64> for Namespace {
    fn from(n: u64) -> Self {
        Namespace(n)
    }
}

impl From<Namespace> for u64 {
    fn from(ns: Namespace) -> Self {
        ns.0
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Per-column direction bitmap for key tuples.
///
/// Bit `i` set means component `i` of the tuple sorts descending and its
/// encoded bytes are one's-complemented. Tuples are capped at 64 columns,
/// which the schema layer enforces long before a key is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SortOrder(u64);

impl SortOrder {
    /// All columns ascending.
    pub const ASC: SortOrder = SortOrder(0);

    pub fn from_bits(bits: u64) -> Self {
        SortOrder(bits)
    }

    pub fn bits(self) -> u64 {
        self.0
    }

    /// Whether column `pos` sorts descending.
    pub fn is_desc(self, pos: usize) -> bool {
        pos < 64 && self.0 & (1 << pos) != 0
    }

    /// Returns a copy with column `pos` marked descending.
    #[must_use]
    pub fn with_desc(self, pos: usize) -> Self {
        debug_assert!(pos < 64);
        SortOrder(self.0 | (1 << pos))
    }

    pub fn is_all_asc(self) -> bool {
        self.0 == 0
    }
}

/// Monotonic transaction identifier, assigned at `begin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxId(pub u64);

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_ranges() {
        assert!(Namespace::CATALOG.is_reserved());
        assert!(Namespace::ROLLBACK_SEGMENT.is_reserved());
        assert!(!Namespace::FIRST_USER.is_reserved());
        assert!(!Namespace(500).is_transient());
        assert!(Namespace::MIN_TRANSIENT.is_transient());
        assert!(Namespace::MAX_TRANSIENT.is_transient());
        assert_eq!(
            Namespace::MAX_TRANSIENT.0 - Namespace::MIN_TRANSIENT.0 + 1,
            TRANSIENT_NAMESPACE_COUNT
        );
    }

    #[test]
    fn sort_order_bits() {
        let so = SortOrder::ASC.with_desc(0).with_desc(3);
        assert!(so.is_desc(0));
        assert!(!so.is_desc(1));
        assert!(so.is_desc(3));
        assert!(!so.is_desc(63));
        assert!(SortOrder::ASC.is_all_asc());
        assert!(!so.is_all_asc());
    }
}
