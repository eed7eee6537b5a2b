//! Proximity query engine
//!
//! A radius search asks the index for candidate ids, loads each candidate's
//! current record from the store, keeps those whose exact great-circle
//! distance is within the radius, and returns them nearest first.

use crate::error::{GeoproxError, Result};
use crate::index::GridIndex;
use crate::spatial::Coordinate;
use crate::store::PointStore;
use crate::types::{PointRecord, RecordId};
use std::cmp::Ordering;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, RwLock};

/// How many candidates are filtered between cancellation checks.
const CANCEL_CHECK_INTERVAL: usize = 256;

/// A radius query around a center point.
///
/// # Examples
///
/// ```rust
/// use geoprox::{Coordinate, Query};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let center = Coordinate::new(12.9716, 77.5946)?;
/// let query = Query::new(center, 20_000.0).with_limit(10);
/// assert!(query.validate().is_ok());
///
/// assert!(Query::new(center, -5.0).validate().is_err());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Query {
    pub center: Coordinate,
    pub radius_meters: f64,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new(center: Coordinate, radius_meters: f64) -> Self {
        Self {
            center,
            radius_meters,
            limit: None,
        }
    }

    /// Keep at most `limit` results. A zero limit is rejected by `validate`.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Fail with `InvalidArgument` for a non-positive or non-finite radius,
    /// or a zero limit.
    pub fn validate(&self) -> Result<()> {
        if !self.radius_meters.is_finite() || self.radius_meters <= 0.0 {
            return Err(GeoproxError::InvalidArgument(format!(
                "radius must be a positive number of meters, got {}",
                self.radius_meters
            )));
        }
        if self.limit == Some(0) {
            return Err(GeoproxError::InvalidArgument(
                "limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// One search result
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub record: Arc<PointRecord>,
    pub distance_meters: f64,
}

/// Cooperative cancellation flag shared between a caller and a running search.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    /// Checks left before the token cancels itself
    #[cfg(test)]
    trip_after: Option<Arc<std::sync::atomic::AtomicUsize>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that reports cancelled from its `checks + 1`th check onwards.
    #[cfg(test)]
    pub(crate) fn tripping_after(checks: usize) -> Self {
        Self {
            trip_after: Some(Arc::new(std::sync::atomic::AtomicUsize::new(checks))),
            ..Self::default()
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, AtomicOrdering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        #[cfg(test)]
        if let Some(remaining) = &self.trip_after {
            let spent = remaining
                .fetch_update(AtomicOrdering::AcqRel, AtomicOrdering::Acquire, |n| {
                    n.checked_sub(1)
                })
                .is_err();
            if spent {
                self.cancel();
            }
        }
        self.cancelled.load(AtomicOrdering::Acquire)
    }
}

/// Index entries the engine found to disagree with the store.
#[derive(Debug, Default)]
pub(crate) struct StaleEntries {
    /// Indexed ids with no record in the store
    pub missing: Vec<RecordId>,
    /// Ids filed under a cell that no longer matches their stored coordinate
    pub misfiled: Vec<Arc<PointRecord>>,
}

impl StaleEntries {
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.misfiled.is_empty()
    }
}

/// Run a validated query against the store and index.
pub(crate) fn execute(
    store: &PointStore,
    index: &RwLock<GridIndex>,
    query: &Query,
    cancel: Option<&CancelToken>,
) -> Result<(Vec<SearchHit>, StaleEntries)> {
    query.validate()?;

    let (candidates, grid) = {
        let index = index
            .read()
            .map_err(|_| GeoproxError::Lock("Failed to acquire index read lock".to_string()))?;
        (
            index.candidate_entries(&query.center, query.radius_meters),
            *index.grid(),
        )
    };

    let mut hits = Vec::new();
    let mut stale = StaleEntries::default();

    for (i, (id, cell)) in candidates.iter().enumerate() {
        if i % CANCEL_CHECK_INTERVAL == 0 && cancel.is_some_and(CancelToken::is_cancelled) {
            return Err(GeoproxError::Cancelled);
        }

        let Some(record) = store.try_get(id)? else {
            stale.missing.push(*id);
            continue;
        };

        if grid.cell_of(&record.coordinate) != *cell {
            stale.misfiled.push(Arc::clone(&record));
        }

        let distance_meters = record.coordinate.distance_to(&query.center);
        if distance_meters <= query.radius_meters {
            hits.push(SearchHit {
                record,
                distance_meters,
            });
        }
    }

    if cancel.is_some_and(CancelToken::is_cancelled) {
        return Err(GeoproxError::Cancelled);
    }

    hits.sort_by(|a, b| {
        a.distance_meters
            .partial_cmp(&b.distance_meters)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.record.id.cmp(&b.record.id))
    });
    if let Some(limit) = query.limit {
        hits.truncate(limit);
    }

    Ok((hits, stale))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Attributes;

    fn coord(lat: f64, lon: f64) -> Coordinate {
        Coordinate::new(lat, lon).unwrap()
    }

    fn populated(points: &[(f64, f64)]) -> (PointStore, RwLock<GridIndex>, Vec<RecordId>) {
        let store = PointStore::new();
        let mut index = GridIndex::new(10_000.0).unwrap();
        let mut ids = Vec::new();
        for &(lat, lon) in points {
            let id = RecordId::generate();
            let record = store.put(id, coord(lat, lon), Attributes::new()).unwrap();
            index.insert(id, &record.coordinate);
            ids.push(id);
        }
        (store, RwLock::new(index), ids)
    }

    #[test]
    fn test_validate_rejects_bad_radius_and_limit() {
        let center = coord(0.0, 0.0);
        for radius in [0.0, -5.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                Query::new(center, radius).validate(),
                Err(GeoproxError::InvalidArgument(_))
            ));
        }
        assert!(Query::new(center, 1.0).with_limit(0).validate().is_err());
        assert!(Query::new(center, 1.0).with_limit(1).validate().is_ok());
    }

    #[test]
    fn test_execute_orders_by_distance_and_limits() {
        let (store, index, ids) = populated(&[(0.0, 0.03), (0.0, 0.01), (0.0, 0.02), (0.0, 5.0)]);
        let query = Query::new(coord(0.0, 0.0), 10_000.0);

        let (hits, stale) = execute(&store, &index, &query, None).unwrap();
        assert!(stale.is_empty());
        let order: Vec<RecordId> = hits.iter().map(|hit| hit.record.id).collect();
        assert_eq!(order, vec![ids[1], ids[2], ids[0]]);
        assert!(hits.windows(2).all(|w| w[0].distance_meters <= w[1].distance_meters));

        let (limited, _) = execute(&store, &index, &query.with_limit(2), None).unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].record.id, ids[1]);
    }

    #[test]
    fn test_ties_break_by_id() {
        let (store, index, mut ids) = populated(&[(1.0, 1.0), (1.0, 1.0), (1.0, 1.0)]);
        let (hits, _) = execute(&store, &index, &Query::new(coord(1.0, 1.0), 5.0), None).unwrap();

        ids.sort();
        let order: Vec<RecordId> = hits.iter().map(|hit| hit.record.id).collect();
        assert_eq!(order, ids);
    }

    #[test]
    fn test_execute_reports_stale_entries() {
        let (store, index, ids) = populated(&[(10.0, 10.0)]);
        let ghost = RecordId::generate();
        index.write().unwrap().insert(ghost, &coord(10.0, 10.0));
        // Move the stored record without telling the index.
        store.relocate(ids[0], coord(10.0, 10.2)).unwrap();

        let query = Query::new(coord(10.0, 10.0), 50_000.0);
        let (hits, stale) = execute(&store, &index, &query, None).unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(stale.missing, vec![ghost]);
        assert_eq!(stale.misfiled.len(), 1);
        assert_eq!(stale.misfiled[0].id, ids[0]);
    }

    #[test]
    fn test_cancel_mid_scan_discards_partial_hits() {
        let points: Vec<(f64, f64)> = (0..3 * CANCEL_CHECK_INTERVAL)
            .map(|i| (0.0, i as f64 * 0.00001))
            .collect();
        let (store, index, _) = populated(&points);
        let query = Query::new(coord(0.0, 0.0), 10_000.0);

        // Passes the check before the first candidate, trips at the next one.
        let token = CancelToken::tripping_after(1);
        assert!(matches!(
            execute(&store, &index, &query, Some(&token)),
            Err(GeoproxError::Cancelled)
        ));
        assert!(token.is_cancelled());

        let (hits, _) = execute(&store, &index, &query, Some(&CancelToken::new())).unwrap();
        assert_eq!(hits.len(), points.len());
    }

    #[test]
    fn test_cancelled_search_returns_nothing() {
        let (store, index, _) = populated(&[(0.0, 0.0), (0.0, 0.001)]);
        let token = CancelToken::new();
        token.cancel();

        let query = Query::new(coord(0.0, 0.0), 1_000.0);
        assert!(matches!(
            execute(&store, &index, &query, Some(&token)),
            Err(GeoproxError::Cancelled)
        ));
        assert!(token.clone().is_cancelled());
    }
}
