//! Error types for the application.

use thiserror::Error;

/// Top-level application error.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {message}")]
    ParseError { message: String },

    #[error("Config validation failed: {message}")]
    ValidationError { message: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },
}

/// Failures talking to Discord, Twitch or the emote CDN.
///
/// All of these are transient from the relay's point of view: they are
/// logged at the handler boundary and the triggering operation is dropped.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{endpoint} returned {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("Discord error: {0}")]
    Discord(#[from] serenity::Error),

    #[error("IRC error: {message}")]
    Irc { message: String },

    #[error("Invalid Discord ID '{id}'")]
    InvalidId { id: String },

    #[error("Not connected: {what}")]
    NotConnected { what: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Persistent emote store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Store lock poisoned")]
    LockPoisoned,

    #[error("Store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Result type alias using AppError.
pub type Result<T> = std::result::Result<T, AppError>;

/// Result type alias for platform operations.
pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
