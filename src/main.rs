use geoprox::{
    Attributes, CancelToken, Coordinate, Geoprox, Query, RegistrationRequest, SearchRequest,
    handle_register, handle_search, init_logging,
};
use serde_json::json;
use tracing::level_filters::LevelFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging(LevelFilter::INFO)?;

    println!("🚀 Geoprox Proximity Demo");

    let db = Geoprox::memory()?;

    // Register entities through the service boundary
    println!("\n🏪 Registering entities:");
    let bangalore: RegistrationRequest = serde_json::from_value(json!({
        "name": "Bangalore Bakery",
        "email": "owner@bakery.example",
        "password": "not stored",
        "coordinates": {"lat": 12.9716, "lon": 77.5946},
        "category": "bakery"
    }))?;
    let chennai: RegistrationRequest = serde_json::from_value(json!({
        "name": "Chennai Books",
        "coordinates": {"lat": 13.0827, "lon": 80.2707},
        "category": "books"
    }))?;

    let bakery_id = handle_register(&db, &bangalore)?;
    let books_id = handle_register(&db, &chennai)?;
    println!("Registered {} as {}", bangalore.name, bakery_id);
    println!("Registered {} as {}", chennai.name, books_id);

    // Distance between the two
    println!("\n📏 Distance:");
    let here = Coordinate::new(12.9716, 77.5946)?;
    let there = Coordinate::new(13.0827, 80.2707)?;
    println!("{} to {}: {:.1} km", here, there, here.distance_to(&there) / 1000.0);

    // Radius searches
    println!("\n🔍 Radius searches from {}:", here);
    for radius in [20_000.0, 300_000.0] {
        let request = SearchRequest {
            coordinates: geoprox::Coordinates {
                lat: here.lat(),
                lon: here.lon(),
            },
            radius: Some(radius),
        };
        let envelope = handle_search(&db, &request)?;
        println!(
            "  within {:.0} km: status {} ({}), {} result(s)",
            radius / 1000.0,
            envelope.status,
            envelope.message,
            envelope.data.len()
        );
        for entity in &envelope.data {
            println!(
                "    {} at {:.1} km",
                entity.attributes.get("name").unwrap_or(&json!("?")),
                entity.distance_meters / 1000.0
            );
        }
    }

    // An empty search is a "not found" envelope, not an error
    let empty = handle_search(
        &db,
        &SearchRequest {
            coordinates: geoprox::Coordinates { lat: 0.0, lon: 0.0 },
            radius: None,
        },
    )?;
    println!("  around (0, 0): status {} ({})", empty.status, empty.message);

    // Relocate a vehicle
    println!("\n🚚 Relocation:");
    let mut van = Attributes::new();
    van.insert("name".to_string(), json!("Delivery Van"));
    let van_id = db.register(here, van)?;
    let version = db.relocate(van_id, there)?;
    println!("Van moved to {} (version {})", there, version);
    let near_chennai = db.search(there, 1_000.0, None)?;
    println!("Entities within 1 km of Chennai: {}", near_chennai.len());

    // Cancellable search
    println!("\n⏹️  Cancellation:");
    let token = CancelToken::new();
    token.cancel();
    match db.search_with_cancel(&Query::new(here, 300_000.0), &token) {
        Err(e) => println!("Cancelled search returned: {}", e),
        Ok(hits) => println!("Search finished with {} hits", hits.len()),
    }

    // Deregistration
    println!("\n🗑️  Deregistration:");
    let removed = db.deregister(&bakery_id)?;
    println!("Removed {} (version {})", removed.id, removed.version);
    match db.deregister(&bakery_id) {
        Err(e) => println!("Second removal: {}", e),
        Ok(_) => println!("Second removal unexpectedly succeeded"),
    }

    // Statistics
    println!("\n📊 Database Statistics:");
    let stats = db.stats()?;
    println!("Records: {}", stats.record_count);
    println!("Indexed: {}", stats.indexed_count);
    println!("Occupied cells: {}", stats.occupied_cells);
    println!("Searches served: {}", stats.search_count);

    db.close()?;
    println!("\n✨ Demo complete");
    Ok(())
}
