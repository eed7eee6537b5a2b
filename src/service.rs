//! Request and response shapes for a service layer sitting in front of the
//! database.
//!
//! The database itself only sees coordinates and an attribute bag. This
//! module strips credential fields from registration requests, applies the
//! default search radius, and wraps search results in the status envelope
//! clients expect: 200 with results, or 400 with an empty list and a
//! "not found" message when nothing matched. Validation failures are
//! returned as errors, never as an envelope.

use crate::db::Geoprox;
use crate::error::Result;
use crate::query::SearchHit;
use crate::spatial::Coordinate;
use crate::types::{Attributes, RecordId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const STATUS_OK: u16 = 200;
pub const STATUS_NOT_FOUND: u16 = 400;

/// Raw `{lat, lon}` pair as sent by clients; validated when handled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinates {
    pub fn to_coordinate(self) -> Result<Coordinate> {
        Coordinate::new(self.lat, self.lon)
    }
}

/// Inbound registration for a user or shop
#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationRequest {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    pub coordinates: Coordinates,
    /// Any other fields, stored verbatim as attributes
    #[serde(flatten)]
    pub extra: Attributes,
}

impl RegistrationRequest {
    /// Attributes handed to the database: `name` plus the extra fields.
    /// Credentials are left behind.
    pub fn attributes(&self) -> Attributes {
        let mut attributes = self.extra.clone();
        attributes.insert("name".to_string(), Value::String(self.name.clone()));
        attributes
    }
}

/// Inbound radius search
#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub coordinates: Coordinates,
    /// Meters; the database's default radius when absent
    #[serde(default)]
    pub radius: Option<f64>,
}

/// One entity in a search response
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NearbyEntity {
    pub id: RecordId,
    pub coordinates: Coordinates,
    pub distance_meters: f64,
    #[serde(flatten)]
    pub attributes: Attributes,
}

impl From<&SearchHit> for NearbyEntity {
    fn from(hit: &SearchHit) -> Self {
        let coordinate = hit.record.coordinate;
        Self {
            id: hit.record.id,
            coordinates: Coordinates {
                lat: coordinate.lat(),
                lon: coordinate.lon(),
            },
            distance_meters: hit.distance_meters,
            attributes: hit.record.attributes.clone(),
        }
    }
}

/// Outbound response envelope
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope<T> {
    pub status: u16,
    pub message: String,
    pub data: Vec<T>,
}

impl Envelope<NearbyEntity> {
    /// 200 with the results, or 400 "not found" for an empty list.
    pub fn from_hits(hits: &[SearchHit]) -> Self {
        if hits.is_empty() {
            return Self {
                status: STATUS_NOT_FOUND,
                message: "not found".to_string(),
                data: Vec::new(),
            };
        }
        Self {
            status: STATUS_OK,
            message: format!("{} found", hits.len()),
            data: hits.iter().map(NearbyEntity::from).collect(),
        }
    }
}

/// Register the entity described by `request`.
pub fn handle_register(db: &Geoprox, request: &RegistrationRequest) -> Result<RecordId> {
    let coordinate = request.coordinates.to_coordinate()?;
    db.register(coordinate, request.attributes())
}

/// Run the search described by `request` and wrap the outcome.
pub fn handle_search(db: &Geoprox, request: &SearchRequest) -> Result<Envelope<NearbyEntity>> {
    let center = request.coordinates.to_coordinate()?;
    let radius = request
        .radius
        .unwrap_or(db.config().default_radius_meters);
    let hits = db.search(center, radius, None)?;
    Ok(Envelope::from_hits(&hits))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GeoproxError;
    use serde_json::json;

    fn registration(lat: f64, lon: f64) -> RegistrationRequest {
        serde_json::from_value(json!({
            "name": "Corner Shop",
            "email": "owner@example.com",
            "password": "hunter2",
            "coordinates": {"lat": lat, "lon": lon},
            "category": "grocery"
        }))
        .unwrap()
    }

    #[test]
    fn test_registration_drops_credentials() {
        let request = registration(12.9716, 77.5946);
        let attributes = request.attributes();

        assert_eq!(attributes.get("name"), Some(&json!("Corner Shop")));
        assert_eq!(attributes.get("category"), Some(&json!("grocery")));
        assert!(!attributes.contains_key("email"));
        assert!(!attributes.contains_key("password"));
        assert!(!attributes.contains_key("coordinates"));
    }

    #[test]
    fn test_handle_register_and_search() {
        let db = Geoprox::memory().unwrap();
        let id = handle_register(&db, &registration(12.9716, 77.5946)).unwrap();

        let request: SearchRequest = serde_json::from_value(json!({
            "coordinates": {"lat": 12.9716, "lon": 77.5946}
        }))
        .unwrap();
        let envelope = handle_search(&db, &request).unwrap();

        assert_eq!(envelope.status, STATUS_OK);
        assert_eq!(envelope.data.len(), 1);
        assert_eq!(envelope.data[0].id, id);
        assert_eq!(envelope.data[0].distance_meters, 0.0);
    }

    #[test]
    fn test_empty_search_is_not_found_envelope() {
        let db = Geoprox::memory().unwrap();
        let request: SearchRequest = serde_json::from_value(json!({
            "coordinates": {"lat": 0.0, "lon": 0.0},
            "radius": 500.0
        }))
        .unwrap();

        let envelope = handle_search(&db, &request).unwrap();
        assert_eq!(envelope.status, STATUS_NOT_FOUND);
        assert_eq!(envelope.message, "not found");
        assert!(envelope.data.is_empty());
    }

    #[test]
    fn test_validation_errors_are_not_envelopes() {
        let db = Geoprox::memory().unwrap();
        let request: SearchRequest = serde_json::from_value(json!({
            "coordinates": {"lat": 0.0, "lon": 0.0},
            "radius": -5.0
        }))
        .unwrap();
        assert!(matches!(
            handle_search(&db, &request),
            Err(GeoproxError::InvalidArgument(_))
        ));

        assert!(matches!(
            handle_register(&db, &registration(95.0, 0.0)),
            Err(GeoproxError::InvalidCoordinate { .. })
        ));
    }

    #[test]
    fn test_envelope_serializes_flat_attributes() {
        let db = Geoprox::memory().unwrap();
        handle_register(&db, &registration(1.0, 2.0)).unwrap();
        let hits = db
            .search(Coordinate::new(1.0, 2.0).unwrap(), 10.0, None)
            .unwrap();

        let value = serde_json::to_value(Envelope::from_hits(&hits)).unwrap();
        assert_eq!(value["status"], json!(200));
        assert_eq!(value["data"][0]["name"], json!("Corner Shop"));
        assert_eq!(value["data"][0]["coordinates"]["lat"], json!(1.0));
    }
}
