// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Parley messaging core.

use strum::Display;
use thiserror::Error;

/// The primary error type used across all Parley collaborator traits and the
/// dispatch pipeline.
#[derive(Debug, Error)]
pub enum ParleyError {
    /// Caller-visible bad input (paging bounds, missing required field).
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    /// A row was absent where one was required.
    #[error("not found: {0}")]
    NotFound(String),

    /// Uniqueness violation. In the messaging core this means the ID
    /// generator handed out an id that is already persisted.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The identity resolver rejected the credentials.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Configuration errors (invalid TOML, missing required fields, type mismatches).
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend errors (database connection, query failure, serialization).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Broker errors (topology declaration, publish, consume, ack).
    #[error("broker error: {message}")]
    Broker {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Transport errors (bind failure, frame write, upgrade).
    #[error("channel error: {message}")]
    Channel {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Coarse classification of a [`ParleyError`], used at API boundaries to
/// pick a status code and by the dispatcher to pick a log severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    InvalidParam,
    NotFound,
    Conflict,
    Internal,
    Unauthorized,
}

impl ParleyError {
    /// Classify this error into the five-way taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ParleyError::InvalidParam(_) => ErrorKind::InvalidParam,
            ParleyError::NotFound(_) => ErrorKind::NotFound,
            ParleyError::Conflict(_) => ErrorKind::Conflict,
            ParleyError::Unauthorized(_) => ErrorKind::Unauthorized,
            ParleyError::Config(_)
            | ParleyError::Storage { .. }
            | ParleyError::Broker { .. }
            | ParleyError::Channel { .. }
            | ParleyError::Timeout { .. }
            | ParleyError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Shorthand for a storage error carrying a plain message.
    pub fn storage(message: impl Into<String>) -> Self {
        ParleyError::Storage {
            source: message.into().into(),
        }
    }

    /// Shorthand for a broker error without an underlying source.
    pub fn broker(message: impl Into<String>) -> Self {
        ParleyError::Broker {
            message: message.into(),
            source: None,
        }
    }
}
