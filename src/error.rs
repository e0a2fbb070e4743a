//! Error types for bookdesk.
//!
//! Defines the main error enum used throughout the application.

use thiserror::Error;

/// Main error type for bookdesk operations.
#[derive(Error, Debug)]
pub enum BookdeskError {
    /// Database connection errors (host unreachable, auth failed, etc.)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Query execution errors (syntax errors, constraint violations, etc.)
    #[error("Query error: {0}")]
    Query(String),

    /// Statements refused by the proxy whitelist.
    #[error("Rejected statement: {0}")]
    Rejected(String),

    /// Missing or malformed input caught before anything is sent to the store.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Wrong or unknown credentials.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Configuration errors (invalid config file, missing required fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// File system errors (CSV and backup files).
    #[error("I/O error: {0}")]
    Io(String),

    /// Internal application errors (unexpected states, bugs, etc.)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BookdeskError {
    /// Creates a connection error with the given message.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Creates a query error with the given message.
    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    /// Creates a rejected-statement error with the given message.
    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::Rejected(msg.into())
    }

    /// Creates a validation error with the given message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Creates an authentication error with the given message.
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(msg.into())
    }

    /// Creates a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates an I/O error with the given message.
    pub fn io(msg: impl Into<String>) -> Self {
        Self::Io(msg.into())
    }

    /// Creates an internal error with the given message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns the error category as a string for display purposes.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Connection(_) => "Connection Error",
            Self::Query(_) => "Query Error",
            Self::Rejected(_) => "Rejected Statement",
            Self::Validation(_) => "Validation Error",
            Self::Auth(_) => "Authentication Error",
            Self::Config(_) => "Configuration Error",
            Self::Io(_) => "I/O Error",
            Self::Internal(_) => "Internal Error",
        }
    }

    /// Returns the bare message without the category prefix.
    ///
    /// This is what ends up in the `error` field of a `{data, error}` response.
    pub fn message(&self) -> &str {
        match self {
            Self::Connection(m)
            | Self::Query(m)
            | Self::Rejected(m)
            | Self::Validation(m)
            | Self::Auth(m)
            | Self::Config(m)
            | Self::Io(m)
            | Self::Internal(m) => m,
        }
    }
}

impl From<std::io::Error> for BookdeskError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// Result type alias using BookdeskError.
pub type Result<T> = std::result::Result<T, BookdeskError>;
