use geoprox::prelude::*;
use geoprox::{DbStats, SyncPolicy};
use serde_json::json;

fn coord(lat: f64, lon: f64) -> Coordinate {
    Coordinate::new(lat, lon).unwrap()
}

fn named(name: &str) -> Attributes {
    let mut attributes = Attributes::new();
    attributes.insert("name".to_string(), json!(name));
    attributes
}

#[test]
fn test_bangalore_chennai_scenario() {
    let db = Geoprox::memory().unwrap();
    let bangalore = db.register(coord(12.9716, 77.5946), named("bangalore")).unwrap();
    let chennai = db.register(coord(13.0827, 80.2707), named("chennai")).unwrap();

    let center = coord(12.9716, 77.5946);
    let near = db.search(center, 20_000.0, None).unwrap();
    assert_eq!(near.len(), 1);
    assert_eq!(near[0].record.id, bangalore);
    assert_eq!(near[0].distance_meters, 0.0);

    let wide = db.search(center, 300_000.0, None).unwrap();
    assert_eq!(wide.len(), 2);
    assert_eq!(wide[0].record.id, bangalore);
    assert_eq!(wide[1].record.id, chennai);
    // Roughly 290 km apart
    assert!((wide[1].distance_meters - 290_000.0).abs() < 5_000.0);
}

#[test]
fn test_negative_radius_is_invalid_argument() {
    let db = Geoprox::memory().unwrap();
    db.register(coord(0.0, 0.0), Attributes::new()).unwrap();

    assert!(matches!(
        db.search(coord(0.0, 0.0), -5.0, None),
        Err(GeoproxError::InvalidArgument(_))
    ));
    assert!(matches!(
        db.search(coord(0.0, 0.0), 0.0, None),
        Err(GeoproxError::InvalidArgument(_))
    ));
}

#[test]
fn test_out_of_range_coordinate_is_rejected() {
    assert!(matches!(
        Coordinate::new(91.0, 0.0),
        Err(GeoproxError::InvalidCoordinate { .. })
    ));
    assert!(matches!(
        Coordinate::new(0.0, 180.5),
        Err(GeoproxError::InvalidCoordinate { .. })
    ));
    assert!(Coordinate::new(f64::NAN, 0.0).is_err());
    assert!(Coordinate::new(90.0, -180.0).is_ok());
}

#[test]
fn test_deregister_is_not_idempotent() {
    let db = Geoprox::memory().unwrap();
    let id = db.register(coord(48.8566, 2.3522), named("paris")).unwrap();

    let removed = db.deregister(&id).unwrap();
    assert_eq!(removed.attributes, named("paris"));
    assert!(matches!(db.deregister(&id), Err(GeoproxError::NotFound(missing)) if missing == id));
    assert!(matches!(db.get(&id), Err(GeoproxError::NotFound(_))));
}

#[test]
fn test_register_get_round_trip() {
    let db = Geoprox::memory().unwrap();
    let mut attributes = named("shop");
    attributes.insert("tags".to_string(), json!(["open", "late"]));
    attributes.insert("rating".to_string(), json!(4.5));

    let id = db.register(coord(-33.8688, 151.2093), attributes.clone()).unwrap();
    let record = db.get(&id).unwrap();
    assert_eq!(record.id, id);
    assert_eq!(record.coordinate, coord(-33.8688, 151.2093));
    assert_eq!(record.attributes, attributes);
}

#[test]
fn test_empty_database_search_is_empty() {
    let db = Geoprox::memory().unwrap();
    let hits = db.search(coord(0.0, 0.0), 1_000_000.0, None).unwrap();
    assert!(hits.is_empty());
}

#[test]
fn test_search_across_antimeridian() {
    let db = Geoprox::memory().unwrap();
    let west = db.register(coord(0.0, 179.99), named("west")).unwrap();
    let east = db.register(coord(0.0, -179.99), named("east")).unwrap();
    db.register(coord(0.0, 178.0), named("far")).unwrap();

    let hits = db.search(coord(0.0, 180.0), 5_000.0, None).unwrap();
    let mut ids: Vec<RecordId> = hits.iter().map(|hit| hit.record.id).collect();
    ids.sort();
    let mut expected = vec![west, east];
    expected.sort();
    assert_eq!(ids, expected);
}

#[test]
fn test_search_near_pole_sees_every_longitude() {
    let db = Geoprox::memory().unwrap();
    for lon in [-170.0, -90.0, 0.0, 45.0, 135.0, 180.0] {
        db.register(coord(89.95, lon), Attributes::new()).unwrap();
    }
    db.register(coord(89.0, 0.0), Attributes::new()).unwrap();

    let hits = db.search(coord(90.0, 0.0), 10_000.0, None).unwrap();
    assert_eq!(hits.len(), 6);
    assert!(hits.iter().all(|hit| hit.distance_meters <= 10_000.0));
}

#[test]
fn test_radius_larger_than_earth_returns_everything() {
    let db = Geoprox::memory().unwrap();
    for (lat, lon) in [(0.0, 0.0), (45.0, 90.0), (-60.0, -120.0), (10.0, 179.0)] {
        db.register(coord(lat, lon), Attributes::new()).unwrap();
    }

    let hits = db.search(coord(0.0, 0.0), 25_000_000.0, None).unwrap();
    assert_eq!(hits.len(), 4);
}

#[test]
fn test_limit_keeps_nearest() {
    let db = Geoprox::memory().unwrap();
    let ids: Vec<RecordId> = (1..=5)
        .map(|i| db.register(coord(0.0, i as f64 * 0.01), Attributes::new()).unwrap())
        .collect();

    let hits = db.search(coord(0.0, 0.0), 10_000.0, Some(3)).unwrap();
    let found: Vec<RecordId> = hits.iter().map(|hit| hit.record.id).collect();
    assert_eq!(found, ids[..3].to_vec());

    assert!(db.search(coord(0.0, 0.0), 10_000.0, Some(0)).is_err());
}

#[test]
fn test_relocate_moves_search_results() {
    let db = Geoprox::memory().unwrap();
    let id = db.register(coord(40.7128, -74.0060), named("truck")).unwrap();

    db.relocate(id, coord(34.0522, -118.2437)).unwrap();
    assert!(db.search(coord(40.7128, -74.0060), 50_000.0, None).unwrap().is_empty());
    let hits = db.search(coord(34.0522, -118.2437), 50_000.0, None).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].record.version, 2);
    assert_eq!(hits[0].record.attributes, named("truck"));
}

#[test]
fn test_custom_grid_gives_same_answers() {
    let coarse = GeoproxBuilder::new()
        .config(Config::default().with_cell_size_meters(200_000.0))
        .build()
        .unwrap();
    let fine = GeoproxBuilder::new()
        .config(Config::default().with_cell_size_meters(500.0))
        .build()
        .unwrap();

    for i in 0..50 {
        let point = coord(10.0 + (i as f64) * 0.013, 20.0 - (i as f64) * 0.017);
        let id = RecordId::generate();
        coarse.upsert(id, point, Attributes::new()).unwrap();
        fine.upsert(id, point, Attributes::new()).unwrap();
    }

    let center = coord(10.3, 19.6);
    let a: Vec<RecordId> = coarse
        .search(center, 25_000.0, None)
        .unwrap()
        .iter()
        .map(|hit| hit.record.id)
        .collect();
    let b: Vec<RecordId> = fine
        .search(center, 25_000.0, None)
        .unwrap()
        .iter()
        .map(|hit| hit.record.id)
        .collect();
    assert!(!a.is_empty());
    assert_eq!(a, b);
}

#[test]
fn test_cancel_token_aborts_search() {
    let db = Geoprox::memory().unwrap();
    for i in 0..1_000 {
        db.register(coord(0.0, (i as f64) * 0.0001), Attributes::new())
            .unwrap();
    }

    let token = CancelToken::new();
    let query = Query::new(coord(0.0, 0.05), 20_000.0);
    assert_eq!(db.search_with_cancel(&query, &token).unwrap().len(), 1_000);

    token.cancel();
    assert!(matches!(
        db.search_with_cancel(&query, &token),
        Err(GeoproxError::Cancelled)
    ));
}

#[test]
fn test_stats_track_activity() {
    let db = Geoprox::memory().unwrap();
    let id = db.register(coord(1.0, 1.0), Attributes::new()).unwrap();
    db.register(coord(50.0, 50.0), Attributes::new()).unwrap();
    db.search(coord(1.0, 1.0), 100.0, None).unwrap();
    db.deregister(&id).unwrap();

    let DbStats {
        record_count,
        indexed_count,
        occupied_cells,
        aof_size,
        search_count,
        repaired_count,
        ..
    } = db.stats().unwrap();
    assert_eq!(record_count, 1);
    assert_eq!(indexed_count, 1);
    assert_eq!(occupied_cells, 1);
    assert_eq!(aof_size, 0);
    assert_eq!(search_count, 1);
    assert_eq!(repaired_count, 0);
}

#[test]
fn test_config_sync_policy_round_trip() {
    let config = Config::default().with_sync_policy(SyncPolicy::Never);
    let db = GeoproxBuilder::new().config(config.clone()).build().unwrap();
    assert_eq!(db.config(), &config);
}
