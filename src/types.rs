use crate::error::{GeoproxError, Result};
use crate::spatial::Coordinate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime};
use uuid::Uuid;

/// Opaque attribute bag carried alongside every record
pub type Attributes = serde_json::Map<String, serde_json::Value>;

/// Unique, immutable identifier assigned to a record at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(Uuid);

impl RecordId {
    /// Generate a fresh random id
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for RecordId {
    type Err = GeoproxError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| GeoproxError::InvalidArgument(format!("invalid record id '{}': {}", s, e)))
    }
}

impl From<Uuid> for RecordId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// A registered entity: identity, current location and metadata.
///
/// Records are immutable once built; every mutation swaps in a new
/// `Arc<PointRecord>` so readers always see a whole record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointRecord {
    pub id: RecordId,
    pub coordinate: Coordinate,
    pub attributes: Attributes,
    /// Starts at 1 and increments on every replacement or relocation
    pub version: u64,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
}

impl PointRecord {
    pub(crate) fn first(id: RecordId, coordinate: Coordinate, attributes: Attributes) -> Self {
        let now = SystemTime::now();
        Self {
            id,
            coordinate,
            attributes,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Successor of `self` carrying new data and the next version.
    pub(crate) fn successor(&self, coordinate: Coordinate, attributes: Attributes) -> Self {
        Self {
            id: self.id,
            coordinate,
            attributes,
            version: self.version + 1,
            created_at: self.created_at,
            updated_at: SystemTime::now(),
        }
    }
}

/// Synchronization policy for persistence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPolicy {
    /// Never sync to disk (fastest, least safe)
    Never,
    /// Sync at most once per second (recommended balance)
    #[default]
    EverySecond,
    /// Sync after every write (slowest, safest)
    Always,
}

impl SyncPolicy {
    pub(crate) fn interval(&self) -> Option<Duration> {
        match self {
            SyncPolicy::Never => None,
            SyncPolicy::EverySecond => Some(Duration::from_secs(1)),
            SyncPolicy::Always => Some(Duration::ZERO),
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Edge length of a grid cell in meters
    pub cell_size_meters: f64,

    /// Radius used by search requests that do not carry one
    pub default_radius_meters: f64,

    /// Number of writer lock stripes; writes to ids in different stripes run in parallel
    pub write_stripes: usize,

    /// How often the AOF is synced to disk
    pub sync_policy: SyncPolicy,

    /// AOF size in bytes that triggers compaction
    pub aof_rewrite_threshold: u64,

    /// Correct stale index entries noticed while serving a search
    pub repair_on_query: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cell_size_meters: 10_000.0,
            default_radius_meters: 20_000.0,
            write_stripes: 64,
            sync_policy: SyncPolicy::default(),
            aof_rewrite_threshold: 64 * 1024 * 1024, // 64MB
            repair_on_query: true,
        }
    }
}

impl Config {
    pub fn with_cell_size_meters(mut self, meters: f64) -> Self {
        self.cell_size_meters = meters;
        self
    }

    pub fn with_default_radius_meters(mut self, meters: f64) -> Self {
        self.default_radius_meters = meters;
        self
    }

    pub fn with_write_stripes(mut self, stripes: usize) -> Self {
        self.write_stripes = stripes;
        self
    }

    pub fn with_sync_policy(mut self, policy: SyncPolicy) -> Self {
        self.sync_policy = policy;
        self
    }

    pub fn with_aof_rewrite_threshold(mut self, bytes: u64) -> Self {
        self.aof_rewrite_threshold = bytes;
        self
    }

    pub fn with_repair_on_query(mut self, enabled: bool) -> Self {
        self.repair_on_query = enabled;
        self
    }

    /// Reject values the index and engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        if !self.cell_size_meters.is_finite() || self.cell_size_meters <= 0.0 {
            return Err(GeoproxError::InvalidArgument(format!(
                "cell_size_meters must be positive, got {}",
                self.cell_size_meters
            )));
        }
        if !self.default_radius_meters.is_finite() || self.default_radius_meters <= 0.0 {
            return Err(GeoproxError::InvalidArgument(format!(
                "default_radius_meters must be positive, got {}",
                self.default_radius_meters
            )));
        }
        if self.write_stripes == 0 {
            return Err(GeoproxError::InvalidArgument(
                "write_stripes must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse a configuration from TOML text; missing fields take their defaults.
    #[cfg(feature = "toml")]
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a TOML file.
    #[cfg(feature = "toml")]
    pub fn from_toml_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            GeoproxError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }
}

/// Statistics about the database
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DbStats {
    /// Number of records in the store
    pub record_count: usize,
    /// Number of ids held by the index
    pub indexed_count: usize,
    /// Number of non-empty grid cells
    pub occupied_cells: usize,
    /// Size of the AOF file in bytes
    pub aof_size: u64,
    /// Searches served
    pub search_count: u64,
    /// Index entries corrected after disagreeing with the store
    pub repaired_count: u64,
    /// AOF compactions performed
    pub compaction_count: u64,
}
