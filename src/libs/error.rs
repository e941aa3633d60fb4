use std::path::PathBuf;

/// Errors surfaced by the loader and the admin helpers.
///
/// Every variant is returned to the immediate caller after the owning
/// operation has rolled back and released its connection.
#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    /// The destination could not be reached.
    #[error("cannot connect to destination: {0}")]
    Connection(#[source] sqlx::Error),

    /// `CREATE TABLE` (or the existence check before it) failed.
    #[error("failed to create table `{table}`: {source}")]
    SchemaCreation {
        table: String,
        #[source]
        source: sqlx::Error,
    },

    /// The batched insert failed and was rolled back.
    #[error("failed to load records into `{table}`: {source}")]
    Load {
        table: String,
        #[source]
        source: sqlx::Error,
    },

    /// Every attempt of a retried statement failed.
    #[error("statement failed after {attempts} attempt(s): {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: sqlx::Error,
    },

    /// The retry classifier rejected an error as permanent.
    #[error("statement failed with a non-retryable error on attempt {attempt}: {source}")]
    NonRetryable {
        attempt: u32,
        #[source]
        source: sqlx::Error,
    },

    /// A catalog or admin query failed.
    #[error("query failed: {0}")]
    Query(#[source] sqlx::Error),

    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    /// The record source did not contain a JSON array of objects.
    #[error("invalid record source {path}: {message}")]
    Source { path: PathBuf, message: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T, E = LoaderError> = std::result::Result<T, E>;
