//! Application error types.
//!
//! These errors are serializable so a run summary can carry the error that
//! ended it, and so the `status` command can print it back as JSON.

use serde::Serialize;
use thiserror::Error;

/// Application-level errors raised by the sync engine and its collaborators.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum AppError {
    /// The remote answered a page request with a non-success status.
    #[error("Fetch failed: {status} {status_text} for {url}")]
    Fetch {
        url: String,
        status: u16,
        status_text: String,
    },

    /// Network request failed before a response was received.
    #[error("Network error: {message}")]
    Network { message: String },

    /// A remote record could not be decoded into the expected shape.
    #[error("Decode error: {message}")]
    Decode {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        endpoint: Option<String>,
    },

    /// Database operation failed.
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        operation: Option<String>,
    },

    /// Configuration is missing or invalid.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Another sync run already holds the run lock.
    #[error("A sync run is already in progress")]
    RunInProgress,

    /// The run was stopped by a shutdown request.
    #[error("Sync run cancelled")]
    Cancelled,

    /// Internal application error.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl AppError {
    /// Create a fetch error from a failed response.
    pub fn fetch(url: impl Into<String>, status: u16, status_text: impl Into<String>) -> Self {
        Self::Fetch {
            url: url.into(),
            status,
            status_text: status_text.into(),
        }
    }

    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create a decode error for records returned by `endpoint`.
    pub fn decode(message: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
            endpoint: Some(endpoint.into()),
        }
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            operation: None,
        }
    }

    /// Create a database error with operation context.
    pub fn database_with_op(message: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            operation: Some(operation.into()),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// HTTP status carried by a fetch error.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Fetch { status, .. } => Some(*status),
            _ => None,
        }
    }
}

// Conversions from common error types

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::database(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::network("Request timed out")
        } else if err.is_connect() {
            Self::network("Failed to connect to server")
        } else if err.is_decode() {
            Self::Decode {
                message: err.to_string(),
                endpoint: err.url().map(|u| u.to_string()),
            }
        } else {
            Self::network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode {
            message: err.to_string(),
            endpoint: None,
        }
    }
}

impl From<crate::db::DbError> for AppError {
    fn from(err: crate::db::DbError) -> Self {
        Self::database(err.to_string())
    }
}
