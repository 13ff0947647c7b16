//! OpenStack client errors

use thiserror::Error;

/// Errors that can occur when interacting with the OpenStack APIs
#[derive(Debug, Error)]
pub enum OpenStackError {
    /// HTTP request/response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// An OpenStack service returned a non-success status
    #[error("OpenStack API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Keystone rejected the credentials or returned no token
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid request (e.g., ambiguous lookup, missing required fields)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// clouds.yaml or endpoint configuration problem
    #[error("Configuration error: {0}")]
    Config(String),
}

impl OpenStackError {
    /// True for 404 responses and explicit not-found lookups
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Api { status, .. } => *status == 404,
            _ => false,
        }
    }
}
