//! Spatial primitives for geoprox
//!
//! This module provides the validated [`Coordinate`] value type, great-circle
//! distance on a spherical Earth, and the bounding-box math the grid index
//! uses to decide which cells a radius query has to visit.

use crate::error::{GeoproxError, Result};
use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_PI_2, PI};
use std::fmt;

/// Mean Earth radius in meters (IUGG), the sphere used for every distance.
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Length of one degree of arc along a great circle, in meters.
pub const METERS_PER_DEGREE: f64 = EARTH_RADIUS_M * PI / 180.0;

const TO_RAD: f64 = PI / 180.0;

/// A validated geographic coordinate on the WGS84 sphere (EPSG:4326).
///
/// A `Coordinate` can only be obtained through [`Coordinate::new`] (or by
/// deserializing, which runs the same checks), so latitude is always within
/// `[-90, 90]` and longitude within `[-180, 180]`.
///
/// # Examples
///
/// ```rust
/// use geoprox::Coordinate;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let bangalore = Coordinate::new(12.9716, 77.5946)?;
/// let chennai = Coordinate::new(13.0827, 80.2707)?;
///
/// let km = bangalore.distance_to(&chennai) / 1000.0;
/// assert!(km > 280.0 && km < 300.0);
///
/// assert!(Coordinate::new(91.0, 0.0).is_err());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawCoordinate")]
pub struct Coordinate {
    lat: f64,
    lon: f64,
}

#[derive(Deserialize)]
struct RawCoordinate {
    lat: f64,
    lon: f64,
}

impl TryFrom<RawCoordinate> for Coordinate {
    type Error = GeoproxError;

    fn try_from(raw: RawCoordinate) -> Result<Self> {
        Coordinate::new(raw.lat, raw.lon)
    }
}

impl Coordinate {
    /// Creates a coordinate, failing with [`GeoproxError::InvalidCoordinate`]
    /// when either value is out of range, NaN or infinite.
    pub fn new(lat: f64, lon: f64) -> Result<Self> {
        let valid = lat.is_finite()
            && lon.is_finite()
            && (-90.0..=90.0).contains(&lat)
            && (-180.0..=180.0).contains(&lon);

        if !valid {
            return Err(GeoproxError::InvalidCoordinate { lat, lon });
        }

        Ok(Self { lat, lon })
    }

    /// Latitude in decimal degrees
    pub fn lat(&self) -> f64 {
        self.lat
    }

    /// Longitude in decimal degrees
    pub fn lon(&self) -> f64 {
        self.lon
    }

    /// Great-circle distance in meters, computed with the haversine formula
    /// on a sphere of radius [`EARTH_RADIUS_M`].
    ///
    /// The result is symmetric and zero for identical coordinates.
    pub fn distance_to(&self, other: &Coordinate) -> f64 {
        haversine(self.lat, self.lon, other.lat, other.lon)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:.6})", self.lat, self.lon)
    }
}

/// Haversine distance between two raw lat/lon pairs in degrees.
pub(crate) fn haversine(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1 * TO_RAD;
    let phi2 = lat2 * TO_RAD;
    let half_dlat = (lat2 - lat1) * TO_RAD * 0.5;
    let half_dlon = (lon2 - lon1) * TO_RAD * 0.5;

    let sin_half_dlat = half_dlat.sin();
    let sin_half_dlon = half_dlon.sin();

    let a = sin_half_dlat * sin_half_dlat
        + phi1.cos() * phi2.cos() * sin_half_dlon * sin_half_dlon;
    let a = a.clamp(0.0, 1.0);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

/// Wraps a longitude difference into `(-180, 180]`.
fn wrap_lon_delta(delta: f64) -> f64 {
    let wrapped = (delta + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped == -180.0 { 180.0 } else { wrapped }
}

/// A bounding box defined by minimum and maximum latitude and longitude.
///
/// Boxes produced by [`BoundingBox::around`] may carry longitudes beyond
/// `±180` when they cross the antimeridian; `min_lon..=max_lon` is always the
/// unwrapped span.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    /// Create a new bounding box
    pub fn new(min_lat: f64, min_lon: f64, max_lat: f64, max_lon: f64) -> Self {
        Self {
            min_lat,
            min_lon,
            max_lat,
            max_lon,
        }
    }

    /// Smallest lat/lon box containing every point within `radius_meters`
    /// of `center`.
    ///
    /// When the circle reaches a pole the box spans all longitudes.
    pub fn around(center: &Coordinate, radius_meters: f64) -> Self {
        let angular = radius_meters / EARTH_RADIUS_M;
        if angular >= PI {
            return Self::world();
        }

        let delta_lat = angular.to_degrees();
        let min_lat = center.lat - delta_lat;
        let max_lat = center.lat + delta_lat;

        if min_lat <= -90.0 || max_lat >= 90.0 {
            return Self::new(min_lat.max(-90.0), -180.0, max_lat.min(90.0), 180.0);
        }

        let ratio = (angular.sin() / (center.lat * TO_RAD).cos()).min(1.0);
        let delta_lon = ratio.asin().to_degrees();

        Self::new(
            min_lat,
            center.lon - delta_lon,
            max_lat,
            center.lon + delta_lon,
        )
    }

    /// The whole globe
    pub fn world() -> Self {
        Self::new(-90.0, -180.0, 90.0, 180.0)
    }

    /// Whether the box covers every longitude
    pub fn spans_all_longitudes(&self) -> bool {
        self.max_lon - self.min_lon >= 360.0
    }

    /// Check if the coordinate lies inside the box, honouring antimeridian wrap.
    pub fn contains(&self, coordinate: &Coordinate) -> bool {
        coordinate.lat >= self.min_lat
            && coordinate.lat <= self.max_lat
            && self.contains_lon(coordinate.lon)
    }

    /// Minimum great-circle distance in meters from `point` to any point of
    /// this box, treating its sides as meridian and parallel segments.
    ///
    /// Returns zero when the point lies inside.
    pub fn min_distance_from(&self, point: &Coordinate) -> f64 {
        if self.contains_lon(point.lon) {
            if point.lat < self.min_lat {
                return (self.min_lat - point.lat) * METERS_PER_DEGREE;
            }
            if point.lat > self.max_lat {
                return (point.lat - self.max_lat) * METERS_PER_DEGREE;
            }
            return 0.0;
        }

        // Outside the longitude span the nearest point sits on one of the two
        // meridian sides; the parallel sides only contribute their corners.
        let west = meridian_segment_distance(point, self.min_lon, self.min_lat, self.max_lat);
        let east = meridian_segment_distance(point, self.max_lon, self.min_lat, self.max_lat);
        west.min(east)
    }

    fn contains_lon(&self, lon: f64) -> bool {
        if self.spans_all_longitudes() {
            return true;
        }
        let offset = (lon - self.min_lon).rem_euclid(360.0);
        offset <= self.max_lon - self.min_lon
    }
}

/// Distance from `point` to the meridian segment at `meridian_lon` between
/// `lat_lo` and `lat_hi`.
fn meridian_segment_distance(point: &Coordinate, meridian_lon: f64, lat_lo: f64, lat_hi: f64) -> f64 {
    let dlon = wrap_lon_delta(meridian_lon - point.lon) * TO_RAD;
    let phi = point.lat * TO_RAD;

    if dlon.abs() < FRAC_PI_2 {
        let foot = phi.sin().atan2(phi.cos() * dlon.cos());
        if foot >= lat_lo * TO_RAD && foot <= lat_hi * TO_RAD {
            let cross = (phi.cos() * dlon.sin().abs()).min(1.0);
            return cross.asin() * EARTH_RADIUS_M;
        }
    }

    let low = haversine(point.lat, point.lon, lat_lo, meridian_lon);
    let high = haversine(point.lat, point.lon, lat_hi, meridian_lon);
    low.min(high)
}
