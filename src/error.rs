// src/error.rs

//! Unified error handling for the collection engine.

use std::fmt;

use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization failed
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Crawl pattern failed to compile
    #[error("Invalid pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },

    /// Metadata store failure
    #[error("Store error: {0}")]
    Store(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Collection error
    #[error("Collect error for {context}: {message}")]
    Collect { context: String, message: String },
}

impl From<sled::Error> for AppError {
    fn from(e: sled::Error) -> Self {
        Self::Store(e.to_string())
    }
}

impl AppError {
    /// Create a metadata store error.
    pub fn store(message: impl fmt::Display) -> Self {
        Self::Store(message.to_string())
    }

    /// Create a pattern compilation error.
    pub fn pattern(pattern: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Pattern {
            pattern: pattern.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a collection error with context.
    pub fn collect(context: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Collect {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// Whether this error invalidates the change-detection ground truth.
    ///
    /// Store failures are the only fatal class: continuing against an
    /// unreliable metadata store risks silently re-delivering or dropping
    /// records, so the whole run aborts and the supervisor restarts it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}
