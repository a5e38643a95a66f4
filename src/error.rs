//! Crate-wide error taxonomy.
//!
//! Every module surfaces errors through one of these types; `anyhow` is
//! only used at the binary boundary in `main.rs`.

use thiserror::Error;

/// Configuration resolution errors. Each variant names the offending key
/// so operators can fix the environment without reading source.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable '{key}'")]
    MissingKey { key: String },

    #[error("invalid value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}

/// Persistence errors from the PostgreSQL backend.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("database pool error: {0}")]
    Pool(String),

    #[error("database query failed: {0}")]
    Query(String),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("failed to (de)serialize database value: {0}")]
    Serialization(String),
}

impl From<tokio_postgres::Error> for DatabaseError {
    fn from(err: tokio_postgres::Error) -> Self {
        Self::Query(err.to_string())
    }
}

impl From<deadpool_postgres::PoolError> for DatabaseError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        Self::Pool(err.to_string())
    }
}

/// Edit-session errors. `WriteFailed` and `ResyncFailed` carry the store
/// error so the gateway can report it verbatim; the session itself stays
/// alive only on `WriteFailed`.
#[derive(Debug, Error)]
pub enum EditError {
    #[error("case {case_id} is already being edited")]
    AlreadyEditing { case_id: i64 },

    #[error("no active edit session for case {case_id}")]
    NoActiveSession { case_id: i64 },

    #[error("a save for case {case_id} is already in flight")]
    SaveInFlight { case_id: i64 },

    #[error("'{field}' is not an editable field")]
    UnknownField { field: String },

    #[error("invalid value for field '{field}': {message}")]
    InvalidValue { field: &'static str, message: String },

    #[error("partial update for case {case_id} failed: {source}")]
    WriteFailed {
        case_id: i64,
        #[source]
        source: DatabaseError,
    },

    #[error("case {case_id} no longer exists in the store")]
    CaseGone { case_id: i64 },
}

/// Blob storage errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object '{key}' not found in storage")]
    NotFound { key: String },

    #[error("storage read failed for '{key}': {message}")]
    ReadFailed { key: String, message: String },

    #[error("storage write failed for '{key}': {message}")]
    WriteFailed { key: String, message: String },

    #[error("signed URL token rejected: {0}")]
    InvalidToken(String),

    #[error("signed URL token expired")]
    TokenExpired,
}

/// Channel (gateway / Telegram) errors.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("failed to start channel '{name}': {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("telegram api call '{method}' failed: {reason}")]
    TelegramApi { method: String, reason: String },
}
