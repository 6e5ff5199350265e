//! File-based storage backend, one JSON document per mesh

use super::mem::MeshRecords;
use crate::{port_key, port_record, service_key, service_record, MeshStore, StorageError};
use async_trait::async_trait;
use dashmap::DashMap;
use mesh_wire::{PortRecord, PortSpec, ServiceRecord, ServiceTarget};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// On-disk layout of a mesh document
#[derive(Serialize, Deserialize, Debug, Default)]
struct MeshDocument {
    #[serde(default)]
    services: Vec<ServiceRecord>,
    #[serde(default)]
    ports: Vec<PortRecord>,
}

impl From<&MeshRecords> for MeshDocument {
    fn from(records: &MeshRecords) -> Self {
        Self {
            services: records.services.values().cloned().collect(),
            ports: records.ports.values().cloned().collect(),
        }
    }
}

impl From<MeshDocument> for MeshRecords {
    fn from(doc: MeshDocument) -> Self {
        let mut records = MeshRecords::default();
        for s in doc.services {
            records.services.insert(service_key(&s.protocol, &s.name), s);
        }
        for p in doc.ports {
            records
                .ports
                .insert(port_key(&p.listen.ip, &p.protocol, p.listen.port), p);
        }
        records
    }
}

/// File-based mesh store
///
/// Documents are read once per mesh and cached; every change rewrites the
/// whole document through a temporary file and a rename.
pub struct FileStore {
    data_dir: PathBuf,
    /// Per-mesh cache of loaded documents
    cache: Arc<DashMap<String, MeshRecords>>,
    /// Serializes read-modify-write cycles
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Create a store under `data_dir`, creating the directory if needed
    pub async fn new(data_dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir)?;
        info!("File store at {}", data_dir.display());

        Ok(Self {
            data_dir,
            cache: Arc::new(DashMap::new()),
            write_lock: Mutex::new(()),
        })
    }

    fn mesh_file(&self, mesh: &str) -> PathBuf {
        self.data_dir.join(format!("{}.json", encode_mesh_name(mesh)))
    }

    fn load(&self, mesh: &str) -> Result<MeshRecords, StorageError> {
        if let Some(records) = self.cache.get(mesh) {
            return Ok(records.clone());
        }

        let path = self.mesh_file(mesh);
        let records = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let doc: MeshDocument = serde_json::from_str(&content).map_err(|e| {
                StorageError::Corruption(format!("Invalid document for mesh {}: {}", mesh, e))
            })?;
            debug!(
                "Loaded mesh {}: {} services, {} ports",
                mesh,
                doc.services.len(),
                doc.ports.len()
            );
            MeshRecords::from(doc)
        } else {
            MeshRecords::default()
        };

        self.cache.insert(mesh.to_string(), records.clone());
        Ok(records)
    }

    fn save(&self, path: &Path, records: &MeshRecords) -> Result<(), StorageError> {
        let content = serde_json::to_string_pretty(&MeshDocument::from(records))?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    fn update<T>(
        &self,
        mesh: &str,
        change: impl FnOnce(&mut MeshRecords) -> T,
    ) -> Result<T, StorageError> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut records = self.load(mesh)?;
        let result = change(&mut records);
        self.save(&self.mesh_file(mesh), &records)?;
        self.cache.insert(mesh.to_string(), records);
        Ok(result)
    }
}

/// File stem for `mesh`: bytes outside `[A-Za-z0-9._-]` become `%XX`
fn encode_mesh_name(mesh: &str) -> String {
    let mut encoded = String::with_capacity(mesh.len());
    for byte in mesh.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.') {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{:02X}", byte));
        }
    }
    encoded
}

#[async_trait]
impl MeshStore for FileStore {
    async fn all_services(&self, mesh: &str) -> Result<Vec<ServiceRecord>, StorageError> {
        Ok(self.load(mesh)?.services.into_values().collect())
    }

    async fn get_service(
        &self,
        mesh: &str,
        protocol: &str,
        name: &str,
    ) -> Result<Option<ServiceRecord>, StorageError> {
        Ok(self.load(mesh)?.services.remove(&service_key(protocol, name)))
    }

    async fn set_service(
        &self,
        mesh: &str,
        protocol: &str,
        name: &str,
        target: ServiceTarget,
    ) -> Result<ServiceRecord, StorageError> {
        let record = service_record(protocol, name, target);
        self.update(mesh, |m| {
            m.services
                .insert(service_key(protocol, name), record.clone())
        })?;
        Ok(record)
    }

    async fn del_service(
        &self,
        mesh: &str,
        protocol: &str,
        name: &str,
    ) -> Result<(), StorageError> {
        self.update(mesh, |m| m.services.remove(&service_key(protocol, name)))?;
        Ok(())
    }

    async fn all_ports(&self, mesh: &str) -> Result<Vec<PortRecord>, StorageError> {
        Ok(self.load(mesh)?.ports.into_values().collect())
    }

    async fn get_port(
        &self,
        mesh: &str,
        ip: &str,
        protocol: &str,
        port: u16,
    ) -> Result<Option<PortRecord>, StorageError> {
        Ok(self.load(mesh)?.ports.remove(&port_key(ip, protocol, port)))
    }

    async fn set_port(
        &self,
        mesh: &str,
        ip: &str,
        protocol: &str,
        port: u16,
        spec: PortSpec,
    ) -> Result<PortRecord, StorageError> {
        let record = port_record(ip, protocol, port, spec);
        self.update(mesh, |m| {
            m.ports
                .insert(port_key(ip, protocol, port), record.clone())
        })?;
        Ok(record)
    }

    async fn del_port(
        &self,
        mesh: &str,
        ip: &str,
        protocol: &str,
        port: u16,
    ) -> Result<(), StorageError> {
        self.update(mesh, |m| m.ports.remove(&port_key(ip, protocol, port)))?;
        Ok(())
    }
}
