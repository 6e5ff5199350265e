//! Persistence of published services and opened ports for the mesh agent.
//!
//! Everything an agent publishes or opens is recorded per mesh name so that a
//! restarted agent can republish its services and reopen its ports. Records
//! are keyed exactly like the control API paths that create them:
//! `{proto}/{svc}` for services and `{ip}/{proto}/{port}` for ports.
//! Backends are pluggable (in-memory, JSON file).

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;

use async_trait::async_trait;
use mesh_wire::{ListenAddr, PortRecord, PortSpec, ServiceRecord, ServiceTarget};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Stored data cannot be read back
    #[error("Data corruption: {0}")]
    Corruption(String),
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Persistent store of the services and ports of every mesh an agent joined
#[async_trait]
pub trait MeshStore: Send + Sync {
    /// Every persisted service of `mesh`
    async fn all_services(&self, mesh: &str) -> Result<Vec<ServiceRecord>, StorageError>;

    /// One persisted service
    async fn get_service(
        &self,
        mesh: &str,
        protocol: &str,
        name: &str,
    ) -> Result<Option<ServiceRecord>, StorageError>;

    /// Persist a service, replacing any record with the same protocol and name
    async fn set_service(
        &self,
        mesh: &str,
        protocol: &str,
        name: &str,
        target: ServiceTarget,
    ) -> Result<ServiceRecord, StorageError>;

    /// Forget a service; absent records are not an error
    async fn del_service(&self, mesh: &str, protocol: &str, name: &str)
        -> Result<(), StorageError>;

    /// Every persisted port of `mesh`
    async fn all_ports(&self, mesh: &str) -> Result<Vec<PortRecord>, StorageError>;

    /// One persisted port
    async fn get_port(
        &self,
        mesh: &str,
        ip: &str,
        protocol: &str,
        port: u16,
    ) -> Result<Option<PortRecord>, StorageError>;

    /// Persist a port, replacing any record on the same address
    async fn set_port(
        &self,
        mesh: &str,
        ip: &str,
        protocol: &str,
        port: u16,
        spec: PortSpec,
    ) -> Result<PortRecord, StorageError>;

    /// Forget a port; absent records are not an error
    async fn del_port(
        &self,
        mesh: &str,
        ip: &str,
        protocol: &str,
        port: u16,
    ) -> Result<(), StorageError>;
}

/// Storage key of a service record
pub fn service_key(protocol: &str, name: &str) -> String {
    format!("{}/{}", protocol, name)
}

/// Storage key of a port record
pub fn port_key(ip: &str, protocol: &str, port: u16) -> String {
    format!("{}/{}/{}", ip, protocol, port)
}

fn service_record(protocol: &str, name: &str, target: ServiceTarget) -> ServiceRecord {
    ServiceRecord {
        name: name.to_string(),
        protocol: protocol.to_string(),
        host: target.host,
        port: target.port,
    }
}

fn port_record(ip: &str, protocol: &str, port: u16, spec: PortSpec) -> PortRecord {
    PortRecord {
        protocol: protocol.to_string(),
        listen: ListenAddr {
            ip: ip.to_string(),
            port,
        },
        target: spec.target,
    }
}

/// Storage backend configuration
#[derive(Clone, Debug, Default)]
pub enum StorageMode {
    /// In-memory storage, lost on restart
    #[default]
    InMemory,
    /// One JSON document per mesh under a data directory
    File {
        /// Data directory path
        data_dir: PathBuf,
    },
}

// Re-export backend implementations
pub use backend::file::FileStore;
pub use backend::mem::MemoryStore;

/// Create a store from configuration
pub async fn from_mode(mode: StorageMode) -> Result<Arc<dyn MeshStore>, StorageError> {
    match mode {
        StorageMode::InMemory => Ok(Arc::new(MemoryStore::new())),
        StorageMode::File { data_dir } => Ok(Arc::new(FileStore::new(data_dir).await?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_follow_api_paths() {
        assert_eq!(service_key("tcp", "db"), "tcp/db");
        assert_eq!(port_key("127.0.0.1", "tcp", 5432), "127.0.0.1/tcp/5432");
    }

    #[tokio::test]
    async fn test_from_mode_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = from_mode(StorageMode::File {
            data_dir: dir.path().join("nested"),
        })
        .await
        .unwrap();

        assert!(store.all_services("mesh").await.unwrap().is_empty());
        assert!(dir.path().join("nested").is_dir());
    }
}
