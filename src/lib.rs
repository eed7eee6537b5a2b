//! # Geoprox - an embedded geospatial proximity index
//!
//! Geoprox stores point-tagged entities (users, shops, vehicles) and answers
//! "who is within R meters of here?" quickly, using a uniform lat/lon grid
//! as a coarse filter and exact great-circle distance as the final test.
//!
//! ## Features
//!
//! - **Exact results**: every hit is within the radius by haversine distance,
//!   and nothing within the radius is missed, including across the
//!   antimeridian and near the poles
//! - **Concurrent**: searches run in parallel; writers to different ids do
//!   not block each other
//! - **Self-healing index**: searches trust the record store and repair
//!   stale index entries they run into
//! - **Optional persistence**: append-only file with replay and compaction
//!
//! ## Quick Start
//!
//! ```rust
//! use geoprox::{Attributes, Coordinate, Geoprox};
//! use serde_json::json;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Geoprox::memory()?;
//!
//! let mut attributes = Attributes::new();
//! attributes.insert("name".to_string(), json!("Corner Shop"));
//! let shop = db.register(Coordinate::new(12.9716, 77.5946)?, attributes)?;
//! db.register(Coordinate::new(13.0827, 80.2707)?, Attributes::new())?;
//!
//! let here = Coordinate::new(12.9716, 77.5946)?;
//! let nearby = db.search(here, 20_000.0, None)?;
//! assert_eq!(nearby.len(), 1);
//! assert_eq!(nearby[0].record.id, shop);
//!
//! let wider = db.search(here, 300_000.0, None)?;
//! assert_eq!(wider.len(), 2);
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod db;
pub mod error;
pub mod index;
pub mod persistence;
pub mod query;
mod registrar;
pub mod service;
pub mod spatial;
pub mod store;
pub mod types;

pub use builder::GeoproxBuilder;
pub use db::{Geoprox, IndexReport};
pub use error::{GeoproxError, Result};

pub use spatial::{BoundingBox, Coordinate, EARTH_RADIUS_M, METERS_PER_DEGREE};

pub use index::{CellKey, Grid, GridIndex};
pub use query::{CancelToken, Query, SearchHit};
pub use store::PointStore;

pub use types::{Attributes, Config, DbStats, PointRecord, RecordId, SyncPolicy};

pub use persistence::{AOFCommand, AOFConfig, AOFFile};

pub use service::{
    Coordinates, Envelope, NearbyEntity, RegistrationRequest, SearchRequest, handle_register,
    handle_search,
};

use once_cell::sync::OnceCell;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, fmt::format::FmtSpan};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

static LOGGING: OnceCell<()> = OnceCell::new();

/// Install a `tracing` subscriber writing to stderr.
///
/// `RUST_LOG` wins over `level` when set. Calling this more than once is
/// harmless; only the first call installs anything.
pub fn init_logging(level: impl Into<LevelFilter>) -> Result<&'static ()> {
    LOGGING.get_or_try_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(level.into().to_string()))?;

        tracing_subscriber::fmt::fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::CLOSE)
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|e| GeoproxError::Config(format!("logging already initialized: {}", e)))
    })
}

/// Prelude module for common imports
pub mod prelude {
    pub use crate::{
        Attributes, CancelToken, Config, Coordinate, Geoprox, GeoproxBuilder, GeoproxError,
        PointRecord, Query, RecordId, Result, SearchHit,
    };
}
