//! Grid-based spatial index
//!
//! The globe is cut into a uniform latitude/longitude grid whose cell edge is
//! `cell_size_meters` along a meridian. Each live record id belongs to exactly
//! one cell. A reverse map from id to cell makes every insert an upsert and
//! lets removals heal entries filed under the wrong cell.
//!
//! Radius queries enumerate the cells covering the query's bounding box and
//! keep every cell whose minimum great-circle distance to the center is within
//! the radius. The result is a superset of the true matches; exact filtering
//! happens in the query engine against the store.

use crate::error::{GeoproxError, Result};
use crate::spatial::{BoundingBox, Coordinate, METERS_PER_DEGREE};
use crate::types::RecordId;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use std::fmt;
use std::ops::RangeInclusive;
use tracing::{trace, warn};

/// Tolerance added to the radius when testing cells, absorbing rounding in
/// the cell-boundary math.
const BOUNDARY_SLACK_M: f64 = 0.5;

/// Key of one grid cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellKey {
    pub row: u32,
    pub col: u32,
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cell({}, {})", self.row, self.col)
    }
}

/// Geometry of the grid: maps coordinates to cells and cells to bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Grid {
    step_deg: f64,
    rows: u32,
    cols: u32,
}

/// Columns a query box touches: every column, or a few disjoint ranges.
#[derive(Debug, PartialEq)]
enum ColumnSpan {
    All,
    Ranges(SmallVec<[RangeInclusive<u32>; 4]>),
}

impl ColumnSpan {
    fn len(&self, cols: u32) -> usize {
        match self {
            ColumnSpan::All => cols as usize,
            ColumnSpan::Ranges(ranges) => ranges
                .iter()
                .map(|range| (range.end() - range.start()) as usize + 1)
                .sum(),
        }
    }
}

impl Grid {
    /// Build a grid whose cells are `cell_size_meters` tall.
    pub fn new(cell_size_meters: f64) -> Result<Self> {
        if !cell_size_meters.is_finite() || cell_size_meters <= 0.0 {
            return Err(GeoproxError::InvalidArgument(format!(
                "cell size must be positive, got {}",
                cell_size_meters
            )));
        }

        let step_deg = (cell_size_meters / METERS_PER_DEGREE).min(180.0);
        let rows = (180.0 / step_deg).ceil();
        let cols = (360.0 / step_deg).ceil();
        if cols > u32::MAX as f64 {
            return Err(GeoproxError::InvalidArgument(format!(
                "cell size of {} m is too small for the grid",
                cell_size_meters
            )));
        }

        Ok(Self {
            step_deg,
            rows: rows as u32,
            cols: cols as u32,
        })
    }

    /// Cell edge in degrees
    pub fn step_degrees(&self) -> f64 {
        self.step_deg
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn cols(&self) -> u32 {
        self.cols
    }

    /// The cell a coordinate falls into
    pub fn cell_of(&self, coordinate: &Coordinate) -> CellKey {
        CellKey {
            row: self.row_index(coordinate.lat()),
            col: self.col_index(coordinate.lon()),
        }
    }

    /// Lat/lon extent of a cell
    pub fn bounds(&self, key: CellKey) -> BoundingBox {
        let min_lat = -90.0 + key.row as f64 * self.step_deg;
        let min_lon = -180.0 + key.col as f64 * self.step_deg;
        BoundingBox::new(
            min_lat,
            min_lon,
            (min_lat + self.step_deg).min(90.0),
            (min_lon + self.step_deg).min(180.0),
        )
    }

    fn row_index(&self, lat: f64) -> u32 {
        let row = ((lat.clamp(-90.0, 90.0) + 90.0) / self.step_deg).floor() as u32;
        row.min(self.rows - 1)
    }

    fn col_index(&self, lon: f64) -> u32 {
        let col = ((lon.clamp(-180.0, 180.0) + 180.0) / self.step_deg).floor() as u32;
        col.min(self.cols - 1)
    }

    /// Rows touched by the box, padded by one row on each side.
    fn row_span(&self, bbox: &BoundingBox) -> RangeInclusive<u32> {
        let first = self.row_index(bbox.min_lat).saturating_sub(1);
        let last = (self.row_index(bbox.max_lat) + 1).min(self.rows - 1);
        first..=last
    }

    /// Columns touched by the box, padded by one column on each side and
    /// wrapped across the antimeridian. Sized arithmetically; no column is
    /// listed one by one.
    fn column_span(&self, bbox: &BoundingBox) -> ColumnSpan {
        if bbox.spans_all_longitudes() {
            return ColumnSpan::All;
        }

        let mut segments: SmallVec<[(f64, f64); 2]> = SmallVec::new();
        if bbox.min_lon < -180.0 {
            segments.push((bbox.min_lon + 360.0, 180.0));
            segments.push((-180.0, bbox.max_lon));
        } else if bbox.max_lon > 180.0 {
            segments.push((bbox.min_lon, 180.0));
            segments.push((-180.0, bbox.max_lon - 360.0));
        } else {
            segments.push((bbox.min_lon, bbox.max_lon));
        }

        let cols = self.cols as i64;
        let mut spans: SmallVec<[(i64, i64); 4]> = SmallVec::new();
        for (lo, hi) in segments {
            let start = self.col_index(lo) as i64 - 1;
            let end = self.col_index(hi) as i64 + 1;
            if end - start + 1 >= cols {
                return ColumnSpan::All;
            }
            // Padding may step one column past either edge of the grid.
            if start < 0 {
                spans.push((start + cols, cols - 1));
                spans.push((0, end));
            } else if end >= cols {
                spans.push((start, cols - 1));
                spans.push((0, end - cols));
            } else {
                spans.push((start, end));
            }
        }
        spans.sort_unstable();

        let mut ranges: SmallVec<[RangeInclusive<u32>; 4]> = SmallVec::new();
        let mut total = 0i64;
        for (start, end) in spans {
            if let Some(last) = ranges.last_mut() {
                let last_end = *last.end() as i64;
                if start <= last_end + 1 {
                    let merged_end = end.max(last_end);
                    total += merged_end - last_end;
                    *last = *last.start()..=merged_end as u32;
                    continue;
                }
            }
            total += end - start + 1;
            ranges.push(start as u32..=end as u32);
        }

        if total >= cols {
            ColumnSpan::All
        } else {
            ColumnSpan::Ranges(ranges)
        }
    }
}

/// Spatial index mapping grid cells to the ids they hold.
///
/// The index only records bucket membership. It never stores coordinates,
/// so the store stays the single source of truth for where a record is.
#[derive(Debug)]
pub struct GridIndex {
    grid: Grid,
    cells: FxHashMap<CellKey, FxHashSet<RecordId>>,
    members: FxHashMap<RecordId, CellKey>,
}

impl GridIndex {
    /// Create an empty index with the given cell edge length.
    pub fn new(cell_size_meters: f64) -> Result<Self> {
        Ok(Self {
            grid: Grid::new(cell_size_meters)?,
            cells: FxHashMap::default(),
            members: FxHashMap::default(),
        })
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// File `id` under the cell of `coordinate`, moving it out of any other
    /// cell it was in. Returns the cell it now lives in.
    pub fn insert(&mut self, id: RecordId, coordinate: &Coordinate) -> CellKey {
        let key = self.grid.cell_of(coordinate);
        if let Some(previous) = self.members.insert(id, key) {
            if previous == key {
                return key;
            }
            self.detach(id, previous);
        }
        self.cells.entry(key).or_default().insert(id);
        key
    }

    /// Remove `id` from the cell derived from `coordinate`.
    ///
    /// If the id is filed under a different cell the mismatch is logged and
    /// the entry removed from where it actually is. Returns whether anything
    /// was removed; an absent id is a no-op.
    pub fn remove(&mut self, id: RecordId, coordinate: &Coordinate) -> bool {
        let expected = self.grid.cell_of(coordinate);
        match self.members.get(&id).copied() {
            Some(actual) => {
                if actual != expected {
                    report_inconsistency(format!(
                        "{} removed from {} but indexed under {}",
                        id, expected, actual
                    ));
                }
                self.members.remove(&id);
                self.detach(id, actual);
                true
            }
            None => {
                trace!(%id, cell = %expected, "remove of unindexed id ignored");
                false
            }
        }
    }

    /// Drop `id` wherever it is filed, without a coordinate.
    pub fn evict(&mut self, id: RecordId) -> bool {
        match self.members.remove(&id) {
            Some(cell) => {
                self.detach(id, cell);
                true
            }
            None => false,
        }
    }

    /// Every id whose cell could hold a point within `radius_meters` of
    /// `center`. Never misses a true match; may contain extras.
    pub fn candidates(&self, center: &Coordinate, radius_meters: f64) -> Vec<RecordId> {
        self.candidate_entries(center, radius_meters)
            .into_iter()
            .map(|(id, _)| id)
            .collect()
    }

    /// Like [`GridIndex::candidates`], paired with the cell each id is filed under.
    pub fn candidate_entries(
        &self,
        center: &Coordinate,
        radius_meters: f64,
    ) -> Vec<(RecordId, CellKey)> {
        let reach = radius_meters + BOUNDARY_SLACK_M;
        let bbox = BoundingBox::around(center, reach);
        let rows = self.grid.row_span(&bbox);
        let columns = self.grid.column_span(&bbox);

        let row_count = (rows.end() - rows.start() + 1) as usize;
        let box_cells = row_count.saturating_mul(columns.len(self.grid.cols));

        let mut entries = Vec::new();
        let mut visited = 0usize;
        let mut accept = |key: CellKey, members: &FxHashSet<RecordId>| {
            visited += 1;
            if self.grid.bounds(key).min_distance_from(center) <= reach {
                entries.extend(members.iter().map(|id| (*id, key)));
            }
        };

        if box_cells > self.cells.len() {
            // Fewer occupied cells than cells in the box: walk the occupied ones.
            for (key, members) in &self.cells {
                accept(*key, members);
            }
        } else {
            for row in rows {
                let mut visit = |col: u32| {
                    let key = CellKey { row, col };
                    if let Some(members) = self.cells.get(&key) {
                        accept(key, members);
                    }
                };
                match &columns {
                    ColumnSpan::All => (0..self.grid.cols).for_each(&mut visit),
                    ColumnSpan::Ranges(ranges) => {
                        ranges.iter().cloned().flatten().for_each(&mut visit)
                    }
                }
            }
        }

        trace!(
            box_cells,
            cells_tested = visited,
            candidates = entries.len(),
            "candidate cells enumerated"
        );
        entries
    }

    /// Cell an id is currently filed under
    pub fn cell_of_id(&self, id: &RecordId) -> Option<CellKey> {
        self.members.get(id).copied()
    }

    pub fn contains(&self, id: &RecordId) -> bool {
        self.members.contains_key(id)
    }

    /// Ids currently indexed
    pub fn ids(&self) -> impl Iterator<Item = RecordId> + '_ {
        self.members.keys().copied()
    }

    /// Number of indexed ids
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Number of non-empty cells
    pub fn occupied_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn clear(&mut self) {
        self.cells.clear();
        self.members.clear();
    }

    fn detach(&mut self, id: RecordId, cell: CellKey) {
        if let Some(members) = self.cells.get_mut(&cell) {
            members.remove(&id);
            if members.is_empty() {
                self.cells.remove(&cell);
            }
        }
    }
}

pub(crate) fn report_inconsistency(detail: String) {
    let err = GeoproxError::IndexInconsistency(detail);
    warn!(error = %err, "index disagrees with store");
}
