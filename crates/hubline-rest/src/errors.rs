//! REST client errors.

use thiserror::Error;

/// Errors returned by [`crate::RelayClient`].
#[derive(Debug, Error)]
pub enum RestError {
    /// The connection string does not have the `Endpoint=...;AccessKey=...;` shape.
    #[error("invalid connection string: {0}")]
    InvalidConnectionString(String),
    /// Signing the access token failed.
    #[error("failed to sign access token: {0}")]
    Sign(#[from] jsonwebtoken::errors::Error),
    /// The request could not be sent or its response could not be read.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The relay answered with a non-success status.
    #[error("relay returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly empty.
        body: String,
    },
}
