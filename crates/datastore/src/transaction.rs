//! Transactions: one engine session plus the catalog snapshot captured
//! at `begin`.
//!
//! The initialization of a writable transaction is sensitive: it holds
//! the database's writer mutex and a read guard on the open-transaction
//! gate for its whole life, released on commit, rollback or drop
//! (whichever comes first). Use [`crate::Database::begin`] to construct
//! one so the guards are acquired in a consistent order.

use crate::catalog::{Catalog, CatalogWriter};
use crate::database::DatabaseInner;
use crate::error::{Error, Result};
use crate::expr::ExpressionParser;
use crate::sequence::SequenceCell;
use basalt_kv::KvSession;
use basalt_primitives::TxId;
use parking_lot::{
    lock_api::{ArcMutexGuard, ArcRwLockReadGuard},
    RawMutex, RawRwLock,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

// Type aliases for lock guards
pub(crate) type WriterGuard = ArcMutexGuard<RawMutex, ()>;
pub(crate) type TxGateGuard = ArcRwLockReadGuard<RawRwLock, ()>;

type Hook = Box<dyn FnOnce() + Send>;

pub struct Transaction {
    db: Arc<DatabaseInner>,
    session: Box<dyn KvSession>,
    writable: bool,
    id: TxId,
    /// The catalog as of `begin`. DDL committed elsewhere stays invisible
    /// for the life of this transaction.
    catalog: Arc<Catalog>,
    /// Private clone mutated by the catalog writer; published on commit.
    pending_catalog: Option<Catalog>,
    write_guard: Option<WriterGuard>,
    tx_guard: Option<TxGateGuard>,
    on_commit: Vec<Hook>,
    on_rollback: Vec<Hook>,
    /// Sequences that advanced in this transaction, in first-use order.
    used_sequences: Vec<String>,
    /// Clears the owning connection's in-transaction flag on completion.
    conn_flag: Option<Arc<AtomicBool>>,
    started_at: Instant,
    finished: bool,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("writable", &self.writable)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl Transaction {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        db: Arc<DatabaseInner>,
        session: Box<dyn KvSession>,
        writable: bool,
        id: TxId,
        catalog: Arc<Catalog>,
        write_guard: Option<WriterGuard>,
        tx_guard: Option<TxGateGuard>,
        conn_flag: Option<Arc<AtomicBool>>,
    ) -> Transaction {
        Transaction {
            db,
            session,
            writable,
            id,
            catalog,
            pending_catalog: None,
            write_guard,
            tx_guard,
            on_commit: Vec::new(),
            on_rollback: Vec::new(),
            used_sequences: Vec::new(),
            conn_flag,
            started_at: Instant::now(),
            finished: false,
        }
    }

    pub fn id(&self) -> TxId {
        self.id
    }

    pub fn writable(&self) -> bool {
        self.writable
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// The catalog this transaction sees: its own pending changes when a
    /// catalog writer is active, the `begin` snapshot otherwise.
    pub fn catalog(&self) -> &Catalog {
        match &self.pending_catalog {
            Some(pending) => pending,
            None => &self.catalog,
        }
    }

    /// The writer over a private clone of the catalog. The clone is
    /// published atomically when this transaction commits and discarded
    /// on rollback.
    pub fn catalog_writer(&mut self) -> Result<CatalogWriter<'_>> {
        self.require_writable()?;
        if self.pending_catalog.is_none() {
            self.pending_catalog = Some((*self.catalog).clone());
        }
        Ok(CatalogWriter::new(self))
    }

    /// Registers a hook to run after a successful commit. Hooks run in
    /// LIFO order and must not block.
    pub fn on_commit(&mut self, hook: impl FnOnce() + Send + 'static) {
        self.on_commit.push(Box::new(hook));
    }

    /// Registers a hook to run on rollback, in LIFO order.
    pub fn on_rollback(&mut self, hook: impl FnOnce() + Send + 'static) {
        self.on_rollback.push(Box::new(hook));
    }

    /// Flushes the session and publishes catalog and sequence state.
    ///
    /// On failure the rollback hooks run instead and the error is
    /// returned; either way every guard is released.
    pub fn commit(mut self) -> Result<()> {
        let result = self.commit_inner();
        if result.is_err() && !self.finished {
            self.rollback_inner();
        }
        result
    }

    /// Discards the session and reverts eagerly applied cache state.
    pub fn rollback(mut self) {
        self.rollback_inner();
    }

    fn commit_inner(&mut self) -> Result<()> {
        // Shrink the leases of every sequence that advanced, so a clean
        // restart resumes without gaps. The used list stays in place
        // until the session is flushed; a failure in here still runs the
        // rollback invalidation over it.
        let used = self.used_sequences.clone();
        for name in &used {
            let sequence = match self.catalog().get_sequence(name) {
                Ok(sequence) => sequence,
                // Dropped in this very transaction.
                Err(Error::NotFound(_)) => continue,
                Err(err) => return Err(err),
            };
            sequence.release(self)?;
        }

        self.session.commit()?;
        self.finished = true;
        self.used_sequences.clear();

        if let Some(pending) = self.pending_catalog.take() {
            *self.db.catalog.write() = Arc::new(pending);
        }
        while let Some(hook) = self.on_commit.pop() {
            hook();
        }
        self.release_guards();
        Ok(())
    }

    fn rollback_inner(&mut self) {
        self.finished = true;
        self.pending_catalog = None;

        // Any lease this transaction wrote is gone with the session;
        // force the next use to persist a fresh one. Cells of sequences
        // that never existed before this transaction are dropped.
        for name in std::mem::take(&mut self.used_sequences) {
            match self.catalog.get_sequence_info(&name) {
                Ok(info) => {
                    let cache = info.cache;
                    self.db.with_sequence_cell_opt(&name, |cell| {
                        cell.invalidate_lease(cache);
                    });
                }
                Err(_) => self.db.remove_sequence_cell(&name),
            }
        }

        while let Some(hook) = self.on_rollback.pop() {
            hook();
        }
        self.release_guards();
    }

    fn release_guards(&mut self) {
        if let Some(flag) = self.conn_flag.take() {
            flag.store(false, Ordering::Release);
        }
        self.write_guard = None;
        self.tx_guard = None;
    }

    pub(crate) fn require_writable(&self) -> Result<()> {
        if !self.writable {
            return Err(Error::ReadOnlyTransaction);
        }
        Ok(())
    }

    pub(crate) fn session(&self) -> &dyn KvSession {
        &*self.session
    }

    pub(crate) fn session_mut(&mut self) -> &mut dyn KvSession {
        &mut *self.session
    }

    /// The pending catalog clone; only callable while a catalog writer
    /// is active.
    pub(crate) fn pending_catalog_mut(&mut self) -> &mut Catalog {
        self.pending_catalog
            .as_mut()
            .expect("catalog writer is active")
    }

    /// Replaces the pending catalog wholesale; used by the open path
    /// after hydrating from the system tables.
    pub(crate) fn set_pending_catalog(&mut self, catalog: Catalog) {
        self.pending_catalog = Some(catalog);
    }

    pub(crate) fn db(&self) -> &Arc<DatabaseInner> {
        &self.db
    }

    pub(crate) fn expression_parser(&self) -> Option<ExpressionParser> {
        self.db.options.expression_parser.clone()
    }

    pub(crate) fn with_sequence_cell<R>(
        &self,
        name: &str,
        f: impl FnOnce(&mut SequenceCell) -> Result<R>,
    ) -> Result<R> {
        self.db.with_sequence_cell(name, f)
    }

    pub(crate) fn mark_sequence_used(&mut self, name: &str) {
        if !self.used_sequences.iter().any(|n| n == name) {
            self.used_sequences.push(name.to_owned());
        }
    }

    pub(crate) fn forget_sequence(&mut self, name: &str) {
        self.used_sequences.retain(|n| n != name);
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        // Dropping without commit rolls back.
        if !self.finished {
            self.rollback_inner();
        }
    }
}
