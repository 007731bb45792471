//! Database lifetime: open/recover, connections, transaction admission,
//! catalog publication and the transient namespace allocator.

use crate::catalog::{store, Catalog};
use crate::error::{Error, Result};
use crate::expr::ExpressionParser;
use crate::sequence::SequenceCell;
use crate::transaction::Transaction;
use basalt_codec::key::key_prefix;
use basalt_kv::memory::MemoryEngine;
use basalt_kv::KvEngine;
use basalt_primitives::{Namespace, TxId, TRANSIENT_NAMESPACE_COUNT};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// A hook that rebuilds the in-memory catalog from the persisted system
/// tables; a SQL frontend overrides this to use its own expression
/// machinery.
pub type CatalogLoader = Arc<dyn Fn(&mut Transaction) -> Result<Catalog> + Send + Sync>;

/// Configuration for [`Database::open`].
#[derive(Clone, Default)]
pub struct Options {
    /// Overrides catalog hydration at open.
    pub catalog_loader: Option<CatalogLoader>,
    /// Parses expression text the canonical catalog reader cannot.
    pub expression_parser: Option<ExpressionParser>,
    /// Lease size of the rowid sequences created for tables without a
    /// primary key. Zero behaves like one.
    pub rowid_sequence_cache: u64,
}

impl Options {
    fn normalized(mut self) -> Options {
        if self.rowid_sequence_cache == 0 {
            self.rowid_sequence_cache = 64;
        }
        self
    }
}

pub(crate) struct DatabaseInner {
    pub(crate) engine: Arc<dyn KvEngine>,
    /// The published catalog. The lock guards the pointer swap only;
    /// readers clone the `Arc` and go on without it.
    pub(crate) catalog: RwLock<Arc<Catalog>>,
    pub(crate) options: Options,
    /// In-memory sequence positions, outside the catalog snapshot.
    sequence_cells: Mutex<HashMap<String, SequenceCell>>,
    /// Writable transactions serialize on this.
    write_mutex: Arc<Mutex<()>>,
    /// Every transaction holds a read guard; close waits on the write
    /// side for in-flight transactions to finish.
    tx_gate: Arc<RwLock<()>>,
    next_tx_id: AtomicU64,
    transient_counter: AtomicU64,
    closed: AtomicBool,
}

impl DatabaseInner {
    pub(crate) fn with_sequence_cell<R>(
        &self,
        name: &str,
        f: impl FnOnce(&mut SequenceCell) -> Result<R>,
    ) -> Result<R> {
        let mut cells = self.sequence_cells.lock();
        f(cells.entry(name.to_owned()).or_default())
    }

    /// Like [`Self::with_sequence_cell`] but does not create the cell.
    pub(crate) fn with_sequence_cell_opt(&self, name: &str, f: impl FnOnce(&mut SequenceCell)) {
        if let Some(cell) = self.sequence_cells.lock().get_mut(name) {
            f(cell);
        }
    }

    pub(crate) fn remove_sequence_cell(&self, name: &str) {
        self.sequence_cells.lock().remove(name);
    }

    fn seed_sequence_cell(&self, name: &str, lease: i64, cache: u64) {
        let mut cells = self.sequence_cells.lock();
        let cell = cells.entry(name.to_owned()).or_default();
        cell.current_value = Some(lease);
        cell.invalidate_lease(cache);
    }
}

/// An open database. Cloning yields another handle to the same instance.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

impl Database {
    /// Opens a database over `engine`: recovers interrupted writes,
    /// drops stale transient namespaces, and hydrates (or initializes)
    /// the catalog.
    pub fn open(engine: impl KvEngine + 'static, options: Options) -> Result<Database> {
        Self::open_shared(Arc::new(engine), options)
    }

    /// Opens a fresh in-memory database; the engine of choice for tests.
    pub fn open_memory() -> Result<Database> {
        Self::open(MemoryEngine::new(), Options::default())
    }

    pub fn open_shared(engine: Arc<dyn KvEngine>, options: Options) -> Result<Database> {
        engine.recover().map_err(Error::Io)?;
        engine
            .cleanup_range(&key_prefix(Namespace::MIN_TRANSIENT), &[])
            .map_err(Error::Io)?;

        let inner = Arc::new(DatabaseInner {
            engine,
            catalog: RwLock::new(Arc::new(Catalog::default())),
            options: options.normalized(),
            sequence_cells: Mutex::new(HashMap::new()),
            write_mutex: Arc::new(Mutex::new(())),
            tx_gate: Arc::new(RwLock::new(())),
            next_tx_id: AtomicU64::new(1),
            transient_counter: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });
        let db = Database { inner };

        let mut tx = db.begin_internal(true)?;
        tx.catalog_writer()?.init()?;
        let catalog = match db.inner.options.catalog_loader.clone() {
            Some(loader) => loader(&mut tx)?,
            None => store::load_catalog(&tx)?,
        };
        tx.set_pending_catalog(catalog);
        let leases = store::read_sequence_leases(&tx)?;
        tx.commit()?;

        let catalog = db.catalog();
        for (name, lease) in leases {
            let cache = match catalog.get_sequence_info(&name) {
                Ok(info) => info.cache,
                Err(_) => {
                    log::warn!("sequence `{name}` has a lease but no catalog entry; ignoring");
                    continue;
                }
            };
            db.inner.seed_sequence_cell(&name, lease, cache);
        }
        Ok(db)
    }

    /// The currently published catalog.
    pub fn catalog(&self) -> Arc<Catalog> {
        self.inner.catalog.read().clone()
    }

    /// Opens a connection. Connections serialize their transactions and
    /// refuse to nest them.
    pub fn connect(&self) -> Result<Connection> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        Ok(Connection {
            db: self.clone(),
            in_tx: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Begins a transaction. A writable transaction blocks until it is
    /// the only writer; read-only transactions are unlimited and see the
    /// engine snapshot taken here.
    pub fn begin(&self, writable: bool) -> Result<Transaction> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        self.begin_internal(writable)
    }

    fn begin_internal(&self, writable: bool) -> Result<Transaction> {
        self.begin_with_flag(writable, None)
    }

    fn begin_with_flag(
        &self,
        writable: bool,
        conn_flag: Option<Arc<AtomicBool>>,
    ) -> Result<Transaction> {
        let write_guard = writable.then(|| self.inner.write_mutex.clone().lock_arc());
        let tx_guard = self.inner.tx_gate.clone().read_arc();
        let session = if writable {
            self.inner.engine.batch_session()
        } else {
            self.inner.engine.snapshot_session()
        }
        .map_err(Error::Io)?;
        let id = TxId(self.inner.next_tx_id.fetch_add(1, Ordering::Relaxed));
        let catalog = self.catalog();
        Ok(Transaction::new(
            self.inner.clone(),
            session,
            writable,
            id,
            catalog,
            write_guard,
            Some(tx_guard),
            conn_flag,
        ))
    }

    /// Allocates a namespace for transient state (sort spills, hash
    /// join scratch). The counter is instance-scoped and wraps; callers
    /// must tolerate leftovers from an unwrapped lifetime by checking
    /// emptiness before use.
    pub fn transient_namespace(&self) -> Namespace {
        let offset = self
            .inner
            .transient_counter
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some((v + 1) % TRANSIENT_NAMESPACE_COUNT)
            })
            .unwrap();
        Namespace(Namespace::MIN_TRANSIENT.0 + offset)
    }

    /// Closes the database: stops admitting work, releases every
    /// sequence lease, and waits for in-flight transactions. Subsequent
    /// calls are no-ops.
    pub fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let names: Vec<String> = {
            let catalog = self.catalog();
            catalog.list_sequences().map(|s| s.name.clone()).collect()
        };
        if !names.is_empty() {
            let mut tx = self.begin_internal(true)?;
            for name in names {
                tx.mark_sequence_used(&name);
            }
            tx.commit()?;
        }

        // Wait for in-flight transactions to drain.
        let _gate = self.inner.tx_gate.write();
        Ok(())
    }
}

/// A handle serializing transaction access for one user session.
pub struct Connection {
    db: Database,
    in_tx: Arc<AtomicBool>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

impl Connection {
    /// Begins a transaction on this connection. A connection cannot
    /// nest transactions.
    pub fn begin(&self, writable: bool) -> Result<Transaction> {
        if self.db.inner.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        if self.in_tx.swap(true, Ordering::AcqRel) {
            return Err(Error::NestedTransaction);
        }
        match self
            .db
            .begin_with_flag(writable, Some(self.in_tx.clone()))
        {
            Ok(tx) => Ok(tx),
            Err(err) => {
                self.in_tx.store(false, Ordering::Release);
                Err(err)
            }
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}
