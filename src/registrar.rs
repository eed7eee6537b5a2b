//! Registration, relocation and deregistration
//!
//! Every mutation runs under the write stripe of the record it touches and
//! keeps the store and the index in step: the store is written first, then
//! the index, and a failed index update rolls the store back.

use crate::db::Geoprox;
use crate::error::{GeoproxError, Result};
use crate::spatial::Coordinate;
use crate::store::PointStore;
use crate::types::{Attributes, PointRecord, RecordId};
use std::sync::Arc;
use tracing::{debug, error, warn};

impl Geoprox {
    /// Register a new entity and return its freshly generated id.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use geoprox::{Attributes, Coordinate, Geoprox};
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let db = Geoprox::memory()?;
    /// let shop = Coordinate::new(12.9716, 77.5946)?;
    /// let id = db.register(shop, Attributes::new())?;
    ///
    /// assert_eq!(db.get(&id)?.coordinate, shop);
    /// # Ok(())
    /// # }
    /// ```
    pub fn register(&self, coordinate: Coordinate, attributes: Attributes) -> Result<RecordId> {
        self.ensure_open()?;
        let id = RecordId::generate();
        {
            let _guard = self.inner.stripes.lock(&id)?;
            let record = self.write_through(id, |store| store.put(id, coordinate, attributes))?;
            debug!(%id, coordinate = %record.coordinate, "registered");
        }
        self.maybe_compact();
        Ok(id)
    }

    /// Register from raw degrees, failing with `InvalidCoordinate` for
    /// out-of-range or non-finite values.
    pub fn register_at(&self, lat: f64, lon: f64, attributes: Attributes) -> Result<RecordId> {
        let coordinate = Coordinate::new(lat, lon)?;
        self.register(coordinate, attributes)
    }

    /// Insert or fully replace the record for a caller-chosen id. Returns the
    /// record's new version.
    pub fn upsert(
        &self,
        id: RecordId,
        coordinate: Coordinate,
        attributes: Attributes,
    ) -> Result<u64> {
        self.ensure_open()?;
        let version = {
            let _guard = self.inner.stripes.lock(&id)?;
            self.write_through(id, |store| store.put(id, coordinate, attributes))?
                .version
        };
        self.maybe_compact();
        Ok(version)
    }

    /// Replace an existing record's coordinate and attributes, failing with
    /// `NotFound` if the id is not registered.
    pub fn update(
        &self,
        id: RecordId,
        coordinate: Coordinate,
        attributes: Attributes,
    ) -> Result<u64> {
        self.ensure_open()?;
        let version = {
            let _guard = self.inner.stripes.lock(&id)?;
            self.write_through(id, |store| store.update(id, coordinate, attributes))?
                .version
        };
        self.maybe_compact();
        Ok(version)
    }

    /// Move a record to a new coordinate and re-index it. Returns the new version.
    pub fn relocate(&self, id: RecordId, coordinate: Coordinate) -> Result<u64> {
        self.ensure_open()?;
        let version = {
            let _guard = self.inner.stripes.lock(&id)?;
            let record = self.write_through(id, |store| store.relocate(id, coordinate))?;
            debug!(%id, coordinate = %record.coordinate, version = record.version, "relocated");
            record.version
        };
        self.maybe_compact();
        Ok(version)
    }

    /// Relocate only if the stored version still equals `expected_version`,
    /// failing with `VersionConflict` otherwise.
    pub fn relocate_if_version(
        &self,
        id: RecordId,
        coordinate: Coordinate,
        expected_version: u64,
    ) -> Result<u64> {
        self.ensure_open()?;
        let version = {
            let _guard = self.inner.stripes.lock(&id)?;
            let current = self.inner.store.get(&id)?;
            if current.version != expected_version {
                return Err(GeoproxError::VersionConflict {
                    id,
                    expected: expected_version,
                    actual: current.version,
                });
            }
            self.write_through(id, |store| store.relocate(id, coordinate))?
                .version
        };
        self.maybe_compact();
        Ok(version)
    }

    /// Remove a record from the index and the store, returning the record
    /// as it was. Fails with `NotFound` if the id is not registered.
    pub fn deregister(&self, id: &RecordId) -> Result<Arc<PointRecord>> {
        self.ensure_open()?;
        let record = {
            let _guard = self.inner.stripes.lock(id)?;
            let record = self.inner.store.get(id)?;

            self.index_write()?.remove(*id, &record.coordinate);

            if let Err(e) = self.inner.store.remove(id) {
                // Put the index entry back so store and index still agree.
                warn!(%id, error = %e, "store removal failed, restoring index entry");
                if let Ok(mut index) = self.index_write() {
                    index.insert(*id, &record.coordinate);
                }
                return Err(e);
            }
            debug!(%id, "deregistered");
            record
        };
        self.maybe_compact();
        Ok(record)
    }

    /// Apply `write` to the store, then file the result in the index. If the
    /// index cannot be updated the store is returned to its previous state.
    ///
    /// Callers hold the write stripe for `id`.
    fn write_through<F>(&self, id: RecordId, write: F) -> Result<Arc<PointRecord>>
    where
        F: FnOnce(&PointStore) -> Result<Arc<PointRecord>>,
    {
        let store = &self.inner.store;
        let previous = store.try_get(&id)?;
        let record = write(store)?;

        let indexed = self
            .index_write()
            .map(|mut index| index.insert(id, &record.coordinate));

        if let Err(e) = indexed {
            warn!(%id, error = %e, "index update failed, rolling back store write");
            let rollback = match previous {
                Some(previous) => store.restore(previous),
                None => store.remove(&id).map(|_| ()),
            };
            if let Err(rollback_err) = rollback {
                error!(%id, error = %rollback_err, "rollback failed, store and index disagree");
            }
            return Err(e);
        }

        Ok(record)
    }
}
