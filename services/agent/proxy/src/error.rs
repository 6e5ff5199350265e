//! Proxy and control API errors

use mesh_storage::StorageError;
use mesh_wire::WireError;
use thiserror::Error;

/// Failures of proxy setup and control API handlers
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Port protocol other than `tcp`
    #[error("Invalid protocol: {0}")]
    InvalidProtocol(String),
    /// Listener could not be bound
    #[error("Cannot listen on {addr}: {source}")]
    Bind {
        /// Requested listen address
        addr: String,
        /// Underlying error
        source: std::io::Error,
    },
    /// Request body or path parameter unusable
    #[error("Bad request: {0}")]
    BadRequest(String),
    /// Persistence failed
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// Encoding failed
    #[error(transparent)]
    Wire(#[from] WireError),
}
