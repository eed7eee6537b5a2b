//! PointRecord store
//!
//! The store is the source of truth for every record's coordinate and
//! attributes. Records are held as `Arc<PointRecord>` and replaced wholesale,
//! so a reader holding one never observes a half-applied update.
//!
//! When a journal is attached, each mutation is appended to it before the
//! in-memory map changes.

use crate::error::{GeoproxError, Result};
use crate::persistence::{AOFCommand, AOFFile};
use crate::spatial::Coordinate;
use crate::types::{Attributes, PointRecord, RecordId};
use rustc_hash::FxHashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::info;

pub struct PointStore {
    records: RwLock<FxHashMap<RecordId, Arc<PointRecord>>>,
    journal: Option<Mutex<AOFFile>>,
}

impl PointStore {
    /// Create an in-memory store with no journal
    pub fn new() -> Self {
        Self {
            records: RwLock::new(FxHashMap::default()),
            journal: None,
        }
    }

    /// Create a store backed by an AOF, replaying it to restore previous state.
    pub fn with_journal(mut aof: AOFFile) -> Result<Self> {
        let commands = aof.replay()?;
        let frames = commands.len();

        let mut records = FxHashMap::default();
        for command in commands {
            match command {
                AOFCommand::Put { record } => {
                    records.insert(record.id, Arc::new(record));
                }
                AOFCommand::Remove { id } => {
                    records.remove(&id);
                }
            }
        }

        info!(
            path = %aof.path().display(),
            frames,
            records = records.len(),
            "AOF replayed"
        );

        Ok(Self {
            records: RwLock::new(records),
            journal: Some(Mutex::new(aof)),
        })
    }

    /// Insert or fully replace a record. A new id starts at version 1, an
    /// existing one moves to its next version.
    pub(crate) fn put(
        &self,
        id: RecordId,
        coordinate: Coordinate,
        attributes: Attributes,
    ) -> Result<Arc<PointRecord>> {
        let record = match self.try_get(&id)? {
            Some(current) => current.successor(coordinate, attributes),
            None => PointRecord::first(id, coordinate, attributes),
        };
        self.commit(record)
    }

    /// Replace an existing record, failing with `NotFound` if it is absent.
    pub(crate) fn update(
        &self,
        id: RecordId,
        coordinate: Coordinate,
        attributes: Attributes,
    ) -> Result<Arc<PointRecord>> {
        let current = self.get(&id)?;
        self.commit(current.successor(coordinate, attributes))
    }

    /// Move an existing record, keeping its attributes.
    pub(crate) fn relocate(&self, id: RecordId, coordinate: Coordinate) -> Result<Arc<PointRecord>> {
        let current = self.get(&id)?;
        self.commit(current.successor(coordinate, current.attributes.clone()))
    }

    /// Put back a record exactly as it was, version included. Used to undo
    /// a write whose index update failed.
    pub(crate) fn restore(&self, record: Arc<PointRecord>) -> Result<()> {
        if let Some(journal) = &self.journal {
            lock_journal(journal)?.write_put(&record)?;
        }
        self.write()?.insert(record.id, record);
        Ok(())
    }

    fn commit(&self, record: PointRecord) -> Result<Arc<PointRecord>> {
        if let Some(journal) = &self.journal {
            lock_journal(journal)?.write_put(&record)?;
        }
        let record = Arc::new(record);
        self.write()?.insert(record.id, Arc::clone(&record));
        Ok(record)
    }

    /// Fetch a record, failing with `NotFound`
    pub fn get(&self, id: &RecordId) -> Result<Arc<PointRecord>> {
        self.try_get(id)?.ok_or(GeoproxError::NotFound(*id))
    }

    /// Fetch a record if present
    pub fn try_get(&self, id: &RecordId) -> Result<Option<Arc<PointRecord>>> {
        Ok(self.read()?.get(id).cloned())
    }

    /// Delete a record. Returns whether anything was removed.
    pub(crate) fn remove(&self, id: &RecordId) -> Result<bool> {
        if !self.contains(id)? {
            return Ok(false);
        }
        if let Some(journal) = &self.journal {
            lock_journal(journal)?.write_remove(id)?;
        }
        Ok(self.write()?.remove(id).is_some())
    }

    pub fn contains(&self, id: &RecordId) -> Result<bool> {
        Ok(self.read()?.contains_key(id))
    }

    /// Every record, as a snapshot taken at call time.
    ///
    /// The sequence is finite and calling `all` again starts a fresh pass.
    /// Meant for index rebuilds; queries never scan the store.
    pub fn all(&self) -> Result<impl Iterator<Item = Arc<PointRecord>> + use<>> {
        let snapshot: Vec<Arc<PointRecord>> = self.read()?.values().cloned().collect();
        Ok(snapshot.into_iter())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.read()?.is_empty())
    }

    /// Whether writes go through an AOF
    pub fn is_persistent(&self) -> bool {
        self.journal.is_some()
    }

    /// Size of the journal in bytes, zero without one
    pub fn journal_size(&self) -> Result<u64> {
        match &self.journal {
            Some(journal) => Ok(lock_journal(journal)?.size()),
            None => Ok(0),
        }
    }

    pub(crate) fn needs_compaction(&self) -> Result<bool> {
        match &self.journal {
            Some(journal) => Ok(lock_journal(journal)?.needs_rewrite()),
            None => Ok(false),
        }
    }

    /// Rewrite the journal down to one frame per live record.
    ///
    /// Callers must keep writers out for the duration.
    pub(crate) fn compact(&self) -> Result<bool> {
        let Some(journal) = &self.journal else {
            return Ok(false);
        };
        let records = self.read()?;
        lock_journal(journal)?.rewrite(records.values().map(|record| record.as_ref()))?;
        Ok(true)
    }

    /// Flush and fsync the journal
    pub fn sync(&self) -> Result<()> {
        if let Some(journal) = &self.journal {
            lock_journal(journal)?.sync()?;
        }
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, FxHashMap<RecordId, Arc<PointRecord>>>> {
        self.records
            .read()
            .map_err(|_| GeoproxError::Lock("Failed to acquire store read lock".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, FxHashMap<RecordId, Arc<PointRecord>>>> {
        self.records
            .write()
            .map_err(|_| GeoproxError::Lock("Failed to acquire store write lock".to_string()))
    }
}

impl Default for PointStore {
    fn default() -> Self {
        Self::new()
    }
}

fn lock_journal(journal: &Mutex<AOFFile>) -> Result<MutexGuard<'_, AOFFile>> {
    journal
        .lock()
        .map_err(|_| GeoproxError::Lock("Failed to acquire journal lock".to_string()))
}
