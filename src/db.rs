use crate::builder::GeoproxBuilder;
use crate::error::{GeoproxError, Result};
use crate::index::{GridIndex, report_inconsistency};
use crate::query::{self, CancelToken, Query, SearchHit, StaleEntries};
use crate::spatial::Coordinate;
use crate::store::PointStore;
use crate::types::{Config, DbStats, PointRecord, RecordId};
use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{info, instrument, warn};

/// Main database handle.
///
/// Cloning is cheap; clones share the same store and index. Reads run in
/// parallel. Writes take a lock stripe chosen by record id, so writers to
/// unrelated ids do not wait on each other.
#[derive(Clone)]
pub struct Geoprox {
    pub(crate) inner: Arc<Shared>,
}

pub(crate) struct Shared {
    pub store: PointStore,
    pub index: RwLock<GridIndex>,
    pub stripes: WriteStripes,
    pub config: Config,
    pub closed: AtomicBool,
    pub search_count: AtomicU64,
    pub repaired_count: AtomicU64,
    pub compaction_count: AtomicU64,
}

/// Writer locks striped by record id
pub(crate) struct WriteStripes {
    stripes: Vec<Mutex<()>>,
}

impl WriteStripes {
    fn new(count: usize) -> Self {
        Self {
            stripes: (0..count.max(1)).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Lock the stripe owning `id`
    pub fn lock(&self, id: &RecordId) -> Result<MutexGuard<'_, ()>> {
        let mut hasher = FxHasher::default();
        id.hash(&mut hasher);
        let slot = (hasher.finish() % self.stripes.len() as u64) as usize;
        self.stripes[slot]
            .lock()
            .map_err(|_| GeoproxError::Lock("Failed to acquire write stripe".to_string()))
    }

    /// Lock every stripe, in order, shutting out all writers
    pub fn lock_all(&self) -> Result<Vec<MutexGuard<'_, ()>>> {
        self.stripes
            .iter()
            .map(|stripe| {
                stripe
                    .lock()
                    .map_err(|_| GeoproxError::Lock("Failed to acquire write stripe".to_string()))
            })
            .collect()
    }
}

/// Outcome of comparing the index against the store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexReport {
    /// Records in the store with no index entry
    pub unindexed: usize,
    /// Index entries with no record in the store
    pub orphaned: usize,
    /// Records filed under a cell that does not match their coordinate
    pub misfiled: usize,
}

impl IndexReport {
    pub fn is_consistent(&self) -> bool {
        self.unindexed == 0 && self.orphaned == 0 && self.misfiled == 0
    }
}

impl Geoprox {
    /// Open a database at the given AOF path.
    /// Use ":memory:" for an in-memory only database.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.to_str() == Some(":memory:") {
            return Self::memory();
        }
        GeoproxBuilder::new().aof_path(path).build()
    }

    /// Create an in-memory database
    pub fn memory() -> Result<Self> {
        GeoproxBuilder::new().in_memory().build()
    }

    /// Wrap a store, building the index from its contents.
    pub(crate) fn from_parts(store: PointStore, config: Config) -> Result<Self> {
        config.validate()?;
        let index = GridIndex::new(config.cell_size_meters)?;

        let db = Geoprox {
            inner: Arc::new(Shared {
                store,
                index: RwLock::new(index),
                stripes: WriteStripes::new(config.write_stripes),
                config,
                closed: AtomicBool::new(false),
                search_count: AtomicU64::new(0),
                repaired_count: AtomicU64::new(0),
                compaction_count: AtomicU64::new(0),
            }),
        };
        db.rebuild_index()?;
        Ok(db)
    }

    /// Get the configuration the database was opened with
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Fetch a record by id, failing with `NotFound`
    pub fn get(&self, id: &RecordId) -> Result<Arc<PointRecord>> {
        self.ensure_open()?;
        self.inner.store.get(id)
    }

    pub fn contains(&self, id: &RecordId) -> Result<bool> {
        self.ensure_open()?;
        self.inner.store.contains(id)
    }

    /// Snapshot of every record. Not for serving queries.
    pub fn all(&self) -> Result<impl Iterator<Item = Arc<PointRecord>> + use<>> {
        self.ensure_open()?;
        self.inner.store.all()
    }

    /// Number of records
    pub fn len(&self) -> Result<usize> {
        self.ensure_open()?;
        self.inner.store.len()
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.ensure_open()?;
        self.inner.store.is_empty()
    }

    /// Records within `radius_meters` of `center`, nearest first.
    ///
    /// Fails with `InvalidArgument` for a non-positive radius or zero limit.
    /// No match is an empty vector, not an error.
    pub fn search(
        &self,
        center: Coordinate,
        radius_meters: f64,
        limit: Option<usize>,
    ) -> Result<Vec<SearchHit>> {
        let query = Query {
            center,
            radius_meters,
            limit,
        };
        self.run_query(&query, None)
    }

    /// Run a prepared [`Query`]
    pub fn search_query(&self, query: &Query) -> Result<Vec<SearchHit>> {
        self.run_query(query, None)
    }

    /// Run a query that gives up with `Cancelled` once `token` is cancelled.
    /// A cancelled search never returns partial results.
    pub fn search_with_cancel(&self, query: &Query, token: &CancelToken) -> Result<Vec<SearchHit>> {
        self.run_query(query, Some(token))
    }

    #[instrument(
        level = "debug",
        skip(self, cancel),
        fields(radius = query.radius_meters, limit = ?query.limit)
    )]
    fn run_query(&self, query: &Query, cancel: Option<&CancelToken>) -> Result<Vec<SearchHit>> {
        self.ensure_open()?;
        let (hits, stale) = query::execute(&self.inner.store, &self.inner.index, query, cancel)?;
        self.inner.search_count.fetch_add(1, Ordering::Relaxed);

        if self.inner.config.repair_on_query && !stale.is_empty() {
            if let Err(e) = self.repair(stale) {
                warn!(error = %e, "index repair after search failed");
            }
        }
        Ok(hits)
    }

    /// Correct index entries a search found stale, re-checking each one
    /// against the store under its write stripe first.
    fn repair(&self, stale: StaleEntries) -> Result<()> {
        let grid = *self.index_read()?.grid();

        for id in stale.missing {
            let _guard = self.inner.stripes.lock(&id)?;
            if self.inner.store.contains(&id)? {
                continue;
            }
            if self.index_write()?.evict(id) {
                report_inconsistency(format!("{} was indexed but absent from the store", id));
                self.inner.repaired_count.fetch_add(1, Ordering::Relaxed);
            }
        }

        for seen in stale.misfiled {
            let _guard = self.inner.stripes.lock(&seen.id)?;
            let Some(current) = self.inner.store.try_get(&seen.id)? else {
                continue;
            };
            let expected = grid.cell_of(&current.coordinate);
            let mut index = self.index_write()?;
            if index.cell_of_id(&current.id) != Some(expected) {
                report_inconsistency(format!(
                    "{} was filed under {:?}, expected {}",
                    current.id,
                    index.cell_of_id(&current.id),
                    expected
                ));
                index.insert(current.id, &current.coordinate);
                self.inner.repaired_count.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    /// Discard the index and rebuild it from a full scan of the store.
    pub fn rebuild_index(&self) -> Result<usize> {
        self.ensure_open()?;
        let _guards = self.inner.stripes.lock_all()?;
        let mut index = self.index_write()?;
        index.clear();
        for record in self.inner.store.all()? {
            index.insert(record.id, &record.coordinate);
        }
        let count = index.len();
        info!(
            records = count,
            cells = index.occupied_cells(),
            "spatial index rebuilt"
        );
        Ok(count)
    }

    /// Compare index membership with the store without changing either.
    pub fn verify_index(&self) -> Result<IndexReport> {
        self.ensure_open()?;
        let _guards = self.inner.stripes.lock_all()?;
        let index = self.index_read()?;
        let grid = *index.grid();
        let mut report = IndexReport::default();

        for record in self.inner.store.all()? {
            match index.cell_of_id(&record.id) {
                None => report.unindexed += 1,
                Some(cell) if cell != grid.cell_of(&record.coordinate) => report.misfiled += 1,
                Some(_) => {}
            }
        }
        for id in index.ids() {
            if !self.inner.store.contains(&id)? {
                report.orphaned += 1;
            }
        }
        Ok(report)
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats> {
        self.ensure_open()?;
        let (indexed_count, occupied_cells) = {
            let index = self.index_read()?;
            (index.len(), index.occupied_cells())
        };
        Ok(DbStats {
            record_count: self.inner.store.len()?,
            indexed_count,
            occupied_cells,
            aof_size: self.inner.store.journal_size()?,
            search_count: self.inner.search_count.load(Ordering::Relaxed),
            repaired_count: self.inner.repaired_count.load(Ordering::Relaxed),
            compaction_count: self.inner.compaction_count.load(Ordering::Relaxed),
        })
    }

    /// Rewrite the AOF down to the live records. A no-op when in memory.
    pub fn compact(&self) -> Result<()> {
        self.ensure_open()?;
        let _guards = self.inner.stripes.lock_all()?;
        if self.inner.store.compact()? {
            self.inner.compaction_count.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Compact once the AOF has outgrown its threshold. Must be called
    /// without holding a write stripe.
    pub(crate) fn maybe_compact(&self) {
        match self.inner.store.needs_compaction() {
            Ok(true) => {
                if let Err(e) = self.compact() {
                    warn!(error = %e, "automatic AOF compaction failed");
                }
            }
            Ok(false) => {}
            Err(e) => warn!(error = %e, "could not check AOF size"),
        }
    }

    /// Flush and fsync the AOF
    pub fn sync(&self) -> Result<()> {
        self.ensure_open()?;
        self.inner.store.sync()
    }

    /// Close the database. Later operations fail with `DatabaseClosed`.
    pub fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Err(GeoproxError::DatabaseClosed);
        }
        self.inner.store.sync()?;
        info!("database closed");
        Ok(())
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(GeoproxError::DatabaseClosed);
        }
        Ok(())
    }

    pub(crate) fn index_read(&self) -> Result<RwLockReadGuard<'_, GridIndex>> {
        self.inner
            .index
            .read()
            .map_err(|_| GeoproxError::Lock("Failed to acquire index read lock".to_string()))
    }

    pub(crate) fn index_write(&self) -> Result<RwLockWriteGuard<'_, GridIndex>> {
        self.inner
            .index
            .write()
            .map_err(|_| GeoproxError::Lock("Failed to acquire index write lock".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Attributes;

    fn coord(lat: f64, lon: f64) -> Coordinate {
        Coordinate::new(lat, lon).unwrap()
    }

    #[test]
    fn test_memory_db_creation() {
        let db = Geoprox::memory().unwrap();
        assert!(db.is_empty().unwrap());
        assert_eq!(db.config(), &Config::default());
    }

    #[test]
    fn test_open_memory_path() {
        let db = Geoprox::open(":memory:").unwrap();
        assert_eq!(db.stats().unwrap().aof_size, 0);
    }

    #[test]
    fn test_search_repairs_orphaned_index_entry() {
        let db = Geoprox::memory().unwrap();
        let center = coord(12.9716, 77.5946);
        let orphan = RecordId::generate();
        db.index_write().unwrap().insert(orphan, &center);

        let hits = db.search(center, 1_000.0, None).unwrap();
        assert!(hits.is_empty());
        assert!(!db.index_read().unwrap().contains(&orphan));
        assert_eq!(db.stats().unwrap().repaired_count, 1);
    }

    #[test]
    fn test_search_repairs_misfiled_entry() {
        let db = Geoprox::memory().unwrap();
        let center = coord(12.9716, 77.5946);
        let id = db.register(center, Attributes::new()).unwrap();

        // File the id one cell over, as if a relocation lost its index update.
        let elsewhere = coord(12.9716, 77.70);
        db.index_write().unwrap().insert(id, &elsewhere);
        assert_eq!(db.verify_index().unwrap().misfiled, 1);

        let hits = db.search(center, 20_000.0, None).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(db.verify_index().unwrap().is_consistent());
    }

    #[test]
    fn test_rebuild_index_restores_consistency() {
        let db = Geoprox::memory().unwrap();
        for i in 0..20 {
            db.register(coord(i as f64, i as f64), Attributes::new())
                .unwrap();
        }
        db.index_write().unwrap().clear();
        assert_eq!(db.verify_index().unwrap().unindexed, 20);

        assert_eq!(db.rebuild_index().unwrap(), 20);
        assert!(db.verify_index().unwrap().is_consistent());
    }

    #[test]
    fn test_closed_database_rejects_operations() {
        let db = Geoprox::memory().unwrap();
        let id = db.register(coord(1.0, 1.0), Attributes::new()).unwrap();
        db.close().unwrap();

        let closed = |result: Result<()>| matches!(result, Err(GeoproxError::DatabaseClosed));
        assert!(closed(db.len().map(|_| ())));
        assert!(closed(db.is_empty().map(|_| ())));
        assert!(closed(db.stats().map(|_| ())));
        assert!(closed(db.sync()));
        assert!(closed(db.rebuild_index().map(|_| ())));
        assert!(closed(db.verify_index().map(|_| ())));
        assert!(closed(db.get(&id).map(|_| ())));
        assert!(closed(db.contains(&id).map(|_| ())));
        assert!(closed(db.all().map(|_| ())));
        assert!(closed(db.compact()));
        assert!(closed(db.relocate(id, coord(2.0, 2.0)).map(|_| ())));
        assert!(closed(db.deregister(&id).map(|_| ())));

        assert!(matches!(
            db.search(coord(0.0, 0.0), 10.0, None),
            Err(GeoproxError::DatabaseClosed)
        ));
        assert!(matches!(
            db.register(coord(0.0, 0.0), Attributes::new()),
            Err(GeoproxError::DatabaseClosed)
        ));
        assert!(matches!(db.close(), Err(GeoproxError::DatabaseClosed)));
    }

    #[test]
    fn test_stripes_cover_every_id() {
        let stripes = WriteStripes::new(4);
        for _ in 0..32 {
            let id = RecordId::generate();
            drop(stripes.lock(&id).unwrap());
        }
        assert_eq!(stripes.lock_all().unwrap().len(), 4);
    }
}
