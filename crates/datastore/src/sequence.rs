//! Monotonic identifier generation with cached leases.
//!
//! A sequence persists a single number, the *lease*, in the
//! `__sequence` system table. The lease is an upper bound on every value
//! handed out so far: after a crash the sequence resumes from the lease,
//! skipping at most `cache - 1` values. While values stay under the
//! lease, `next` is a pure in-memory increment, which is what makes bulk
//! inserts cheap.
//!
//! The in-memory position lives outside the catalog snapshot, in a
//! per-name cell owned by the database; only the writable transaction
//! touches it.

use crate::catalog::store;
use crate::error::{Error, Result};
use crate::schema::SequenceInfo;
use crate::transaction::Transaction;
use std::sync::Arc;

/// In-memory generation state of one sequence.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct SequenceCell {
    /// Last value handed out, if any. Seeded from the persisted lease
    /// when the catalog is loaded.
    pub current_value: Option<i64>,
    /// Values served against the current lease. At or above the cache
    /// size, the next call persists a fresh lease.
    pub cached: u64,
}

impl SequenceCell {
    /// Forces the next call to persist a lease before serving.
    pub fn invalidate_lease(&mut self, cache: u64) {
        self.cached = cache.max(1);
    }
}

/// A view over `(transaction, sequence info)`.
#[derive(Clone)]
pub struct Sequence {
    info: Arc<SequenceInfo>,
}

impl Sequence {
    pub(crate) fn new(info: Arc<SequenceInfo>) -> Sequence {
        Sequence { info }
    }

    pub fn info(&self) -> &Arc<SequenceInfo> {
        &self.info
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Returns the next value.
    ///
    /// The candidate is `current + increment` (or `start` on the very
    /// first call), wrapping to the opposite bound when the sequence
    /// cycles and failing with [`Error::SequenceExhausted`] when it does
    /// not. A lease covering the next `cache` values is persisted only
    /// when the current lease runs out.
    pub fn next(&self, tx: &mut Transaction) -> Result<i64> {
        tx.require_writable()?;
        let info = &self.info;
        let cache = info.cache.max(1);

        let (candidate, lease) = tx.with_sequence_cell(&info.name, |cell| {
            let candidate = match cell.current_value {
                Some(current) => advance(info, current)?,
                None => info.start,
            };
            cell.cached = cell.cached.saturating_add(1);
            let lease = if cell.cached <= cache && cell.current_value.is_some() {
                None
            } else {
                cell.cached = 1;
                Some(lease_for(info, candidate, cache))
            };
            cell.current_value = Some(candidate);
            Ok((candidate, lease))
        })?;

        tx.mark_sequence_used(&info.name);
        if let Some(lease) = lease {
            store::write_sequence_lease(tx, &info.name, lease)?;
        }
        Ok(candidate)
    }

    /// Persists the last value handed out as the lease, shrinking any
    /// unused headroom. Runs at commit and at database shutdown.
    pub(crate) fn release(&self, tx: &mut Transaction) -> Result<()> {
        let info = &self.info;
        let current = tx.with_sequence_cell(&info.name, |cell| {
            let current = cell.current_value;
            cell.invalidate_lease(info.cache);
            Ok(current)
        })?;
        if let Some(current) = current {
            store::write_sequence_lease(tx, &info.name, current)?;
        }
        Ok(())
    }
}

fn advance(info: &SequenceInfo, current: i64) -> Result<i64> {
    let crossed = |next: Option<i64>| match next {
        Some(next) if info.increment_by > 0 => next > info.max,
        Some(next) => next < info.min,
        // Arithmetic overflow means the bound was crossed either way.
        None => true,
    };
    let next = current.checked_add(info.increment_by);
    if !crossed(next) {
        return Ok(next.unwrap());
    }
    if !info.cycle {
        return Err(Error::SequenceExhausted(info.name.as_str().into()));
    }
    Ok(if info.increment_by > 0 { info.min } else { info.max })
}

/// The lease covering `cache` values starting at `candidate`, clamped to
/// the sequence bounds.
fn lease_for(info: &SequenceInfo, candidate: i64, cache: u64) -> i64 {
    let lead = candidate as i128 + info.increment_by as i128 * (cache as i128 - 1);
    lead.clamp(info.min as i128, info.max as i128) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq(increment_by: i64, min: i64, max: i64, cycle: bool) -> SequenceInfo {
        SequenceInfo {
            name: "s".into(),
            increment_by,
            min,
            max,
            start: if increment_by > 0 { min } else { max },
            cache: 1,
            cycle,
            owner: None,
        }
    }

    #[test]
    fn advance_steps_by_increment() {
        let info = seq(3, 1, 10, false);
        assert_eq!(advance(&info, 1).unwrap(), 4);
        assert_eq!(advance(&info, 7).unwrap(), 10);
    }

    #[test]
    fn advance_exhausts_without_cycle() {
        let info = seq(3, 1, 10, false);
        let err = advance(&info, 9).unwrap_err();
        assert!(err.is_sequence_exhausted());

        let info = seq(-2, 1, 10, false);
        assert!(advance(&info, 2).is_err());
    }

    #[test]
    fn advance_wraps_to_opposite_bound_with_cycle() {
        let info = seq(3, 1, 10, true);
        assert_eq!(advance(&info, 9).unwrap(), 1);

        let info = seq(-2, 1, 10, true);
        assert_eq!(advance(&info, 2).unwrap(), 10);
    }

    #[test]
    fn advance_handles_integer_overflow() {
        let info = seq(1, i64::MIN, i64::MAX, false);
        assert!(advance(&info, i64::MAX).is_err());

        let info = seq(1, i64::MIN, i64::MAX, true);
        assert_eq!(advance(&info, i64::MAX).unwrap(), i64::MIN);
    }

    #[test]
    fn lease_is_clamped_to_bounds() {
        let mut info = seq(1, 1, 3, false);
        info.cache = 5;
        assert_eq!(lease_for(&info, 1, 5), 3);

        let mut info = seq(1, 1, 100, false);
        info.cache = 5;
        assert_eq!(lease_for(&info, 1, 5), 5);

        let mut info = seq(-1, 1, 100, false);
        info.cache = 10;
        assert_eq!(lease_for(&info, 100, 10), 91);
    }
}
