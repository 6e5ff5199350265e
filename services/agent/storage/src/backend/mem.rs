//! In-memory storage backend for development and testing

use crate::{port_key, port_record, service_key, service_record, MeshStore, StorageError};
use async_trait::async_trait;
use dashmap::DashMap;
use mesh_wire::{PortRecord, PortSpec, ServiceRecord, ServiceTarget};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Records of one mesh, ordered by key
#[derive(Debug, Default, Clone)]
pub(crate) struct MeshRecords {
    pub(crate) services: BTreeMap<String, ServiceRecord>,
    pub(crate) ports: BTreeMap<String, PortRecord>,
}

/// In-memory mesh store
#[derive(Debug, Default)]
pub struct MemoryStore {
    /// Per-mesh records: mesh name -> records
    meshes: Arc<DashMap<String, MeshRecords>>,
}

impl MemoryStore {
    /// Create an empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MeshStore for MemoryStore {
    async fn all_services(&self, mesh: &str) -> Result<Vec<ServiceRecord>, StorageError> {
        Ok(self
            .meshes
            .get(mesh)
            .map(|m| m.services.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn get_service(
        &self,
        mesh: &str,
        protocol: &str,
        name: &str,
    ) -> Result<Option<ServiceRecord>, StorageError> {
        Ok(self
            .meshes
            .get(mesh)
            .and_then(|m| m.services.get(&service_key(protocol, name)).cloned()))
    }

    async fn set_service(
        &self,
        mesh: &str,
        protocol: &str,
        name: &str,
        target: ServiceTarget,
    ) -> Result<ServiceRecord, StorageError> {
        debug!("Store service mesh={} key={}/{}", mesh, protocol, name);

        let record = service_record(protocol, name, target);
        self.meshes
            .entry(mesh.to_string())
            .or_default()
            .services
            .insert(service_key(protocol, name), record.clone());
        Ok(record)
    }

    async fn del_service(
        &self,
        mesh: &str,
        protocol: &str,
        name: &str,
    ) -> Result<(), StorageError> {
        debug!("Drop service mesh={} key={}/{}", mesh, protocol, name);

        if let Some(mut m) = self.meshes.get_mut(mesh) {
            m.services.remove(&service_key(protocol, name));
        }
        Ok(())
    }

    async fn all_ports(&self, mesh: &str) -> Result<Vec<PortRecord>, StorageError> {
        Ok(self
            .meshes
            .get(mesh)
            .map(|m| m.ports.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn get_port(
        &self,
        mesh: &str,
        ip: &str,
        protocol: &str,
        port: u16,
    ) -> Result<Option<PortRecord>, StorageError> {
        Ok(self
            .meshes
            .get(mesh)
            .and_then(|m| m.ports.get(&port_key(ip, protocol, port)).cloned()))
    }

    async fn set_port(
        &self,
        mesh: &str,
        ip: &str,
        protocol: &str,
        port: u16,
        spec: PortSpec,
    ) -> Result<PortRecord, StorageError> {
        debug!("Store port mesh={} key={}", mesh, port_key(ip, protocol, port));

        let record = port_record(ip, protocol, port, spec);
        self.meshes
            .entry(mesh.to_string())
            .or_default()
            .ports
            .insert(port_key(ip, protocol, port), record.clone());
        Ok(record)
    }

    async fn del_port(
        &self,
        mesh: &str,
        ip: &str,
        protocol: &str,
        port: u16,
    ) -> Result<(), StorageError> {
        debug!("Drop port mesh={} key={}", mesh, port_key(ip, protocol, port));

        if let Some(mut m) = self.meshes.get_mut(mesh) {
            m.ports.remove(&port_key(ip, protocol, port));
        }
        Ok(())
    }
}
