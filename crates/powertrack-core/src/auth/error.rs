use std::path::PathBuf;

use thiserror::Error;

/// Malformed or incomplete credential state. Never recoverable by retrying.
#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Missing credential field: {0}")]
    MissingField(&'static str),

    #[error("Invalid base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("Invalid header value for {0}")]
    InvalidHeader(&'static str),

    #[error("Invalid endpoint '{0}'")]
    InvalidEndpoint(String),

    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("Failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result alias for credential operations.
pub type Result<T> = std::result::Result<T, CredentialError>;
