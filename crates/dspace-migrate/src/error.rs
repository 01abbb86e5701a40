//! Error types for the migration engine.

use thiserror::Error;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing required fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection establishment or reconnect budget exhausted.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A batch fetch exhausted its retries; the table read stops here.
    #[error("Chunk read failed for table {table} at offset {offset}: {message}")]
    ChunkRead {
        table: String,
        offset: i64,
        message: String,
    },

    /// None of the configured candidate fields had a value for this entity.
    #[error("No value in any of {candidates:?} for entity {entity}")]
    UnresolvedField {
        entity: String,
        candidates: Vec<String>,
    },

    /// Target rejected the payload (4xx). Permanent, never retried.
    #[error("Target rejected {entity}: {message}")]
    Validation { entity: String, message: String },

    /// Target reported a conflict (409). Permanent, never retried.
    #[error("Target reported conflict for {entity}: {message}")]
    Conflict { entity: String, message: String },

    /// Network/timeout class failure, retried per policy.
    #[error("Transient error: {0}")]
    Transient(String),

    /// A retried operation failed on its final attempt.
    #[error("{source} (gave up after {attempts} attempts)")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<MigrateError>,
    },

    /// Source database error.
    #[error("Source database error: {0}")]
    Source(#[from] tokio_postgres::Error),

    /// Target API transport error.
    #[error("Target API error: {0}")]
    Api(#[from] reqwest::Error),

    /// IO error (fixture files, config files).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML deserialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MigrateError {
    /// Create a ChunkRead error.
    pub fn chunk_read(table: impl Into<String>, offset: i64, message: impl Into<String>) -> Self {
        MigrateError::ChunkRead {
            table: table.into(),
            offset,
            message: message.into(),
        }
    }

    /// Whether this error class may be retried.
    ///
    /// Connection and timeout failures are transient; validation and
    /// conflict responses are permanent and propagate on the first attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            MigrateError::Transient(_) | MigrateError::Connection(_) => true,
            // A transport-level database error (closed socket, timeout) has no
            // server-side error code attached; anything with a code is a real
            // statement failure.
            MigrateError::Source(e) => e.is_closed() || e.as_db_error().is_none(),
            MigrateError::Api(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }

    /// Format error with full details including error chain.
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
