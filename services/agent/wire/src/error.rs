//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug)]
pub enum WireError {
    /// Body could not be encoded or decoded as JSON
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// Request or response could not be assembled
    #[error("http: {0}")]
    Http(#[from] http::Error),

    /// Unexpected status code
    #[error("unexpected status {0}")]
    Status(u16),

    /// Path parameter missing or malformed
    #[error("invalid path parameter {0}")]
    Param(String),
}
