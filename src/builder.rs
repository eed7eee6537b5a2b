//! Database builder for flexible configuration
//!
//! This module provides a builder pattern for creating databases that are
//! either purely in memory or backed by an append-only file.

use crate::db::Geoprox;
use crate::error::Result;
use crate::persistence::{AOFConfig, AOFFile};
use crate::store::PointStore;
use crate::types::Config;
use std::path::PathBuf;
use tracing::info;

/// Builder for creating database instances with custom configuration.
///
/// # Examples
///
/// ## In-memory database
/// ```rust
/// use geoprox::GeoproxBuilder;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let db = GeoproxBuilder::new()
///     .in_memory()
///     .build()?;
/// # Ok(())
/// # }
/// ```
///
/// ## Persistent database with a custom grid
/// ```rust
/// use geoprox::{Config, GeoproxBuilder, SyncPolicy};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Config::default()
///     .with_cell_size_meters(5_000.0)
///     .with_sync_policy(SyncPolicy::Always);
///
/// let temp_path = std::env::temp_dir().join("geoprox_builder_doc.aof");
/// let db = GeoproxBuilder::new()
///     .aof_path(&temp_path)
///     .config(config)
///     .build()?;
/// # drop(db);
/// # std::fs::remove_file(temp_path)?;
/// # Ok(())
/// # }
/// ```
pub struct GeoproxBuilder {
    aof_path: Option<PathBuf>,
    config: Config,
    in_memory: bool,
}

impl GeoproxBuilder {
    /// Create a new builder. Defaults to an in-memory database; use
    /// `aof_path()` to enable persistence.
    pub fn new() -> Self {
        Self {
            aof_path: None,
            config: Config::default(),
            in_memory: true,
        }
    }

    /// Set the AOF (Append-Only File) path for persistence.
    ///
    /// If the file exists it is replayed on `build()` and the spatial index is
    /// rebuilt from the restored records.
    pub fn aof_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.aof_path = Some(path.into());
        self.in_memory = false;
        self
    }

    /// Create an in-memory database with no persistence.
    pub fn in_memory(mut self) -> Self {
        self.in_memory = true;
        self.aof_path = None;
        self
    }

    /// Set the database configuration.
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Build the database.
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid, or if the AOF cannot be opened
    /// or contains a malformed frame.
    pub fn build(self) -> Result<Geoprox> {
        self.config.validate()?;

        let store = match (self.in_memory, self.aof_path) {
            (false, Some(path)) => {
                let aof_config = AOFConfig {
                    rewrite_size_threshold: self.config.aof_rewrite_threshold,
                    sync_policy: self.config.sync_policy,
                };
                let aof = AOFFile::open_with_config(&path, aof_config)?;
                info!(path = %path.display(), "opening persistent database");
                PointStore::with_journal(aof)?
            }
            _ => PointStore::new(),
        };

        Geoprox::from_parts(store, self.config)
    }
}

impl Default for GeoproxBuilder {
    fn default() -> Self {
        Self::new()
    }
}
