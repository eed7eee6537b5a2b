use crate::types::RecordId;
use thiserror::Error;

/// Error types for geoprox
#[derive(Debug, Error)]
pub enum GeoproxError {
    /// Latitude or longitude out of range, NaN or infinite
    #[error("invalid coordinate: lat={lat}, lon={lon}")]
    InvalidCoordinate { lat: f64, lon: f64 },

    /// Non-positive radius, malformed limit or bad configuration value
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The id is not present in the store
    #[error("record not found: {0}")]
    NotFound(RecordId),

    /// Index and store disagree. Only ever logged, queries recover by trusting the store.
    #[error("index inconsistency: {0}")]
    IndexInconsistency(String),

    /// Optimistic relocation lost against a concurrent writer
    #[error("version conflict on {id}: expected {expected}, found {actual}")]
    VersionConflict {
        id: RecordId,
        expected: u64,
        actual: u64,
    },

    /// A search was cancelled by its caller
    #[error("search cancelled")]
    Cancelled,

    /// Lock acquisition failed
    #[error("lock error: {0}")]
    Lock(String),

    /// Database is closed
    #[error("database is closed")]
    DatabaseClosed,

    /// Serialization error with context
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Unexpected end of file during deserialization
    #[error("unexpected end of file")]
    UnexpectedEof,

    /// Invalid data format
    #[error("invalid data format")]
    InvalidFormat,

    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(String),

    #[error("init logging error: {0}")]
    InitLogging(#[from] tracing_subscriber::filter::ParseError),

    #[cfg(feature = "toml")]
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// I/O error from persistence layer
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for GeoproxError {
    fn from(err: serde_json::Error) -> Self {
        GeoproxError::Serialization(err.to_string())
    }
}

/// Result type alias for geoprox operations
pub type Result<T> = std::result::Result<T, GeoproxError>;
